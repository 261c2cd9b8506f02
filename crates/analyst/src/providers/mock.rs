use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::Mutex;

use crate::models::message::Message;
use crate::providers::base::{Provider, ToolChoice, Usage};

/// A mock provider that returns pre-configured responses and records every transcript
/// it was asked to complete
#[derive(Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<Result<Message, String>>>>,
    repeat: Option<Message>,
    pub calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockProvider {
    /// Create a new mock provider with a sequence of responses
    pub fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into_iter().map(Ok).collect())),
            repeat: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Answer every request with the same message
    pub fn repeating(message: Message) -> Self {
        Self {
            repeat: Some(message),
            ..Self::new(Vec::new())
        }
    }

    /// Fail the next request with `error`
    pub fn failing(error: &str) -> Self {
        let provider = Self::new(Vec::new());
        provider.responses.lock().unwrap().push(Err(error.to_string()));
        provider
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[Value],
        _tool_choice: ToolChoice,
    ) -> Result<(Message, Usage)> {
        self.calls.lock().unwrap().push(messages.to_vec());

        let mut responses = self.responses.lock().unwrap();
        if !responses.is_empty() {
            return responses
                .remove(0)
                .map(|message| (message, Usage::default()))
                .map_err(|e| anyhow!(e));
        }
        match &self.repeat {
            Some(message) => Ok((message.clone(), Usage::default())),
            // Return empty response if no more pre-configured responses
            None => Ok((Message::assistant().with_text(""), Usage::default())),
        }
    }
}
