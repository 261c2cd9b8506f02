//! Client side of the Model Context Protocol, used to reach the tool registry.
pub mod client;
pub mod protocol;
pub mod transport;

pub use client::{ClientState, McpClient};
pub use transport::{HttpTransport, McpTransport};
