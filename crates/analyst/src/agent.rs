use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::errors::{AgentError, AgentResult};
use crate::mcp::McpClient;
use crate::models::content::ToolResult;
use crate::models::message::{Message, ToolRequest};
use crate::providers::base::{Provider, ToolChoice};
use crate::tracking::{track, NoopTracker, TrackKind, Tracker};

pub const DEFAULT_MAX_ITERATIONS: usize = 5;

/// Returned when the model is still requesting tools after the last iteration
pub const BUDGET_EXHAUSTED_MESSAGE: &str = "I apologize, but I've reached my maximum number of analysis steps. Please try rephrasing your question or breaking it into smaller parts.";

const RESULT_PREVIEW_CHARS: usize = 100;

/// Something the agent can dispatch tool calls to
#[async_trait]
pub trait Toolbox: Send + Sync {
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> AgentResult<ToolResult>;
}

#[async_trait]
impl Toolbox for McpClient {
    async fn call_tool(&self, name: &str, arguments: Map<String, Value>) -> AgentResult<ToolResult> {
        McpClient::call_tool(self, name, arguments).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// The model produced a turn without tool requests
    Answered,
    /// The iteration budget ran out while the model was still calling tools
    BudgetExhausted,
}

/// Everything one query produced
#[derive(Debug, Clone, Serialize)]
pub struct Reply {
    pub answer: String,
    pub outcome: Outcome,
    pub engine_calls: usize,
    pub transcript: Vec<Message>,
}

/// Agent drives a completion engine through a bounded tool-calling loop
pub struct Agent {
    provider: Box<dyn Provider>,
    max_iterations: usize,
    tracker: Arc<dyn Tracker>,
}

impl Agent {
    /// Create a new Agent with the specified provider
    pub fn new(provider: Box<dyn Provider>) -> Self {
        Self {
            provider,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tracker: Arc::new(NoopTracker),
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn Tracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    /// Answer `query` and return only the final text
    pub async fn process_query(
        &self,
        toolbox: &dyn Toolbox,
        system_prompt: &str,
        tools: &[Value],
        query: &str,
    ) -> AgentResult<String> {
        let input = json!({"query": query});
        track(self.tracker.as_ref(), "process-query", TrackKind::General, input, async {
            let reply = self.reply(toolbox, system_prompt, tools, query).await?;
            Ok(reply.answer)
        })
        .await
    }

    /// Run the tool-calling loop for one query.
    ///
    /// Each iteration asks the provider for a turn. A turn without tool requests ends the
    /// loop with its text as the answer; otherwise every request is dispatched in order
    /// and its result appended before the next iteration. Any tool failure aborts the
    /// query.
    pub async fn reply(
        &self,
        toolbox: &dyn Toolbox,
        system_prompt: &str,
        tools: &[Value],
        query: &str,
    ) -> AgentResult<Reply> {
        tracing::info!("Processing query: {}", query);

        let mut transcript = vec![
            Message::system().with_text(system_prompt),
            Message::user().with_text(query),
        ];
        let mut engine_calls = 0;

        for iteration in 1..=self.max_iterations {
            tracing::info!("Iteration {}/{}", iteration, self.max_iterations);

            let input = json!({
                "iteration": iteration,
                "messages": transcript.len(),
                "tools": tools.len()
            });
            let (response, usage) = track(self.tracker.as_ref(), "complete", TrackKind::Llm, input, async {
                self.provider
                    .complete(&transcript, tools, ToolChoice::Auto)
                    .await
                    .map_err(|e| AgentError::Provider(format!("{:#}", e)))
            })
            .await?;
            engine_calls += 1;
            tracing::debug!(
                "Usage: input={:?} output={:?} total={:?}",
                usage.input_tokens,
                usage.output_tokens,
                usage.total_tokens
            );

            let requests: Vec<ToolRequest> =
                response.tool_requests().into_iter().cloned().collect();

            if requests.is_empty() {
                tracing::info!("Model decision: provide final answer");
                let answer = response.text();
                transcript.push(response);
                return Ok(Reply {
                    answer,
                    outcome: Outcome::Answered,
                    engine_calls,
                    transcript,
                });
            }

            let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();
            tracing::info!(
                "Model decision: call {} tools: {}",
                names.len(),
                names.join(", ")
            );
            transcript.push(response);

            for request in &requests {
                let text = self.dispatch_tool_call(toolbox, request).await?;
                transcript.push(Message::tool().with_tool_response(request.id.clone(), text));
            }
        }

        tracing::warn!("Max iterations reached");
        Ok(Reply {
            answer: BUDGET_EXHAUSTED_MESSAGE.to_string(),
            outcome: Outcome::BudgetExhausted,
            engine_calls,
            transcript,
        })
    }

    /// Decode one request, run it and return the text that goes into the transcript
    async fn dispatch_tool_call(
        &self,
        toolbox: &dyn Toolbox,
        request: &ToolRequest,
    ) -> AgentResult<String> {
        let call = request.tool_call()?;

        let args = Value::Object(call.arguments.clone());
        tracing::info!("Calling: {}", call.name);
        tracing::debug!("Args: {}", args);

        let result = toolbox.call_tool(&call.name, call.arguments).await?;
        let text = result.to_text();

        let preview: String = text.chars().take(RESULT_PREVIEW_CHARS).collect();
        tracing::info!("Result: {}...", preview);
        tracing::info!("Tool {} completed", call.name);
        Ok(text)
    }
}
