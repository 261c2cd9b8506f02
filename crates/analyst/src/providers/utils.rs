use anyhow::{anyhow, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashSet;

use crate::errors::{AgentError, AgentResult};
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::Tool;

lazy_static! {
    static ref FUNCTION_NAME: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
}

/// Convert internal Message format to OpenAI's API message specification
///
/// A tool message becomes one `tool` entry per response it carries, and assistant tool
/// requests are sent back with their arguments exactly as the model produced them.
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });

        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.text.is_empty() {
                        converted["content"] = json!(text.text);
                    }
                }
                MessageContent::ToolRequest(request) => {
                    let call = json!({
                        "id": request.id,
                        "type": "function",
                        "function": {
                            "name": request.name,
                            "arguments": request.arguments,
                        }
                    });
                    match converted.get_mut("tool_calls").and_then(Value::as_array_mut) {
                        Some(tool_calls) => tool_calls.push(call),
                        None => converted["tool_calls"] = json!([call]),
                    }
                }
                MessageContent::ToolResponse(response) => {
                    output.push(json!({
                        "role": "tool",
                        "content": response.text,
                        "tool_call_id": response.id
                    }));
                }
            }
        }

        if converted.get("tool_calls").is_some() && converted.get("content").is_none() {
            converted["content"] = Value::Null;
        }

        if message.role != Role::Tool
            && (converted.get("content").is_some() || converted.get("tool_calls").is_some())
        {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert one tool descriptor into OpenAI's function-calling shape
pub fn tool_to_openai_spec(tool: &Tool) -> AgentResult<Value> {
    if tool.name.trim().is_empty() {
        return Err(AgentError::Schema("tool name must not be empty".to_string()));
    }
    let description = tool
        .description
        .as_deref()
        .ok_or_else(|| AgentError::Schema(format!("Tool {} has no description", tool.name)))?;

    Ok(json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": description,
            "parameters": tool.input_schema,
        }
    }))
}

/// Convert a tool catalog to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> AgentResult<Vec<Value>> {
    let mut tool_names = HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(AgentError::Schema(format!("Duplicate tool name: {}", tool.name)));
        }
        result.push(tool_to_openai_spec(tool)?);
    }

    Ok(result)
}

/// Convert OpenAI's API response to internal Message format
pub fn openai_response_to_message(response: Value) -> Result<Message> {
    let original = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| anyhow!("No choices in response: {}", response))?;

    let mut message = Message::assistant();

    if let Some(text) = original.get("content").and_then(Value::as_str) {
        message = message.with_text(text);
    }

    if let Some(tool_calls) = original.get("tool_calls").and_then(Value::as_array) {
        for tool_call in tool_calls {
            let id = tool_call["id"].as_str().unwrap_or_default();
            let function_name = tool_call["function"]["name"].as_str().unwrap_or_default();
            let arguments = match &tool_call["function"]["arguments"] {
                Value::String(arguments) => arguments.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };

            if !is_valid_function_name(function_name) {
                tracing::warn!(
                    "Model requested function '{}' which does not match [a-zA-Z0-9_-]+",
                    function_name
                );
            }

            message = message.with_tool_request(id, function_name, arguments);
        }
    }

    Ok(message)
}

pub fn is_valid_function_name(name: &str) -> bool {
    FUNCTION_NAME.is_match(name)
}

#[derive(Debug, thiserror::Error)]
#[error("Context length exceeded. Message: {0}")]
pub struct ContextLengthExceededError(String);

pub fn check_openai_context_length_error(error: &Value) -> Option<ContextLengthExceededError> {
    let code = error.get("code")?.as_str()?;
    if code == "context_length_exceeded" || code == "string_above_max_length" {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        Some(ContextLengthExceededError(message))
    } else {
        None
    }
}
