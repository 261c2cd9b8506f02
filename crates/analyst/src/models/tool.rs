use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{AgentError, AgentResult};

/// A tool exposed by the tool registry, as described by its `tools/list` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    /// The qualified name of the tool, e.g. `repo_get_repo_info`
    pub name: String,
    /// A description of what the tool does
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// A JSON Schema object defining the expected parameters for the tool
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl Tool {
    /// Create a new tool with the given name and description
    pub fn new<N, D>(name: N, description: D, input_schema: Value) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Tool {
            name: name.into(),
            description: Some(description.into()),
            input_schema,
        }
    }

    /// Check arguments against the declared input schema.
    ///
    /// Covers the subset of JSON Schema the registry emits for its tools: the
    /// `required` list and the primitive `type` of each declared property. Properties
    /// described with combinators such as `anyOf` are not checked.
    pub fn validate_arguments(&self, arguments: &Map<String, Value>) -> AgentResult<()> {
        let Some(schema) = self.input_schema.as_object() else {
            return Ok(());
        };

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !arguments.contains_key(key) {
                    return Err(AgentError::InvalidArguments(format!(
                        "{} is missing required argument '{}'",
                        self.name, key
                    )));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
            for (key, value) in arguments {
                let Some(expected) = properties.get(key).and_then(|p| p.get("type")) else {
                    continue;
                };
                if !matches_type(expected, value) {
                    return Err(AgentError::InvalidArguments(format!(
                        "{} expects argument '{}' of type {}, got {}",
                        self.name, key, expected, value
                    )));
                }
            }
        }

        Ok(())
    }
}

fn matches_type(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => matches_named_type(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .any(|name| matches_named_type(name, value)),
        _ => true,
    }
}

fn matches_named_type(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "integer" => value.as_f64().is_some_and(|n| n.fract() == 0.0),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

/// A tool call request that the agent dispatches to the tool registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// The name of the tool to execute
    pub name: String,
    /// The decoded arguments for the execution
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new<S: Into<String>>(name: S, arguments: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    /// Strictly decode a serialized argument payload.
    ///
    /// The payload must be a JSON object; anything else is rejected.
    pub fn decode<S: Into<String>>(name: S, payload: &str) -> AgentResult<Self> {
        let name = name.into();
        let value: Value = serde_json::from_str(payload).map_err(|e| {
            AgentError::PayloadDecode(format!("arguments for {} are not valid JSON: {}", name, e))
        })?;

        match value {
            Value::Object(arguments) => Ok(Self { name, arguments }),
            other => Err(AgentError::PayloadDecode(format!(
                "arguments for {} must be a JSON object, got {}",
                name, other
            ))),
        }
    }
}
