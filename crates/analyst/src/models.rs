//! These models represent the objects passed around by the host
//!
//! There are several different related formats we need to interact with:
//! - MCP tool descriptors, prompts and call results, received from the tool registry
//! - openai messages/tools, sent from the agent to the LLM
//!
//! We always immediately convert those data models into the internal structs using
//! to/from helpers, so the agent loop never touches either wire format directly.
pub mod content;
pub mod message;
pub mod prompt;
pub mod role;
pub mod tool;
