use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::message::Message;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// How the model may use the offered tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
    Required,
}

/// Base trait for chat completion engines
#[async_trait]
pub trait Provider: Send + Sync {
    /// Generate the next assistant turn for the transcript.
    ///
    /// `tools` is the function-calling catalog produced by
    /// [`tools_to_openai_spec`](super::utils::tools_to_openai_spec).
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[Value],
        tool_choice: ToolChoice,
    ) -> Result<(Message, Usage)>;
}
