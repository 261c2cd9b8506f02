use serde::{Deserialize, Serialize};
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum AgentError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Discovery failed: {0}")]
    Discovery(String),

    #[error("Prompt not found: {0}")]
    PromptNotFound(String),

    #[error("Tool not found: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Could not decode tool call arguments: {0}")]
    PayloadDecode(String),

    #[error("Not initialized: {0}")]
    NotInitialized(String),

    #[error("Invalid tool schema: {0}")]
    Schema(String),

    #[error("Completion provider error: {0}")]
    Provider(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
