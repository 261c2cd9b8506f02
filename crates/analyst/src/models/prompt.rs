use serde::{Deserialize, Serialize};

use super::content::Content;
use super::role::Role;

/// An argument accepted by a prompt template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// A prompt template advertised by the tool registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Content,
}

/// A prompt rendered by the registry with concrete arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedPrompt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

impl RenderedPrompt {
    /// The text of the first message that carries text
    pub fn text(&self) -> Option<&str> {
        self.messages.iter().find_map(|m| m.content.as_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rendered_prompt_text() {
        let prompt: RenderedPrompt = serde_json::from_value(json!({
            "messages": [
                {"role": "user", "content": {"type": "text", "text": "You are an expert GitHub analyst."}}
            ]
        }))
        .unwrap();

        assert_eq!(prompt.text(), Some("You are an expert GitHub analyst."));
    }

    #[test]
    fn test_rendered_prompt_without_text() {
        let prompt = RenderedPrompt {
            description: None,
            messages: vec![PromptMessage {
                role: Role::User,
                content: Content::image("aGk=", "image/png"),
            }],
        };
        assert_eq!(prompt.text(), None);
    }
}
