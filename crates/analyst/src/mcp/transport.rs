//! MCP transport implementations.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

pub const SESSION_ID_HEADER: &str = "Mcp-Session-Id";

/// Transports move JSON-RPC messages between the client and an MCP server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for its response.
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification; no response is expected.
    async fn notify(&self, notification: JsonRpcNotification) -> Result<()>;

    /// Release the server-side session.
    async fn close(&self) -> Result<()>;
}

/// MCP streamable HTTP transport.
///
/// Every message is POSTed to a single endpoint. The server answers either with a JSON
/// body or with a `text/event-stream` body carrying the response as an SSE event, and
/// may assign a session id during `initialize` that must be echoed on later requests.
pub struct HttpTransport {
    client: Client,
    url: String,
    next_id: AtomicU64,
    session_id: Mutex<Option<String>>,
}

impl HttpTransport {
    pub fn new<S: Into<String>>(url: S, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
            session_id: Mutex::new(None),
        })
    }

    /// The session id assigned by the server, if any
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().ok().and_then(|id| id.clone())
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn post(&self, body: &serde_json::Value) -> Result<Response> {
        let mut request = self
            .client
            .post(&self.url)
            .header(ACCEPT, "application/json, text/event-stream")
            .json(body);

        if let Some(session_id) = self.session_id() {
            request = request.header(SESSION_ID_HEADER, session_id);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach MCP server at {}", self.url))?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            if let Ok(mut current) = self.session_id.lock() {
                *current = Some(session_id.to_string());
            }
        }

        Ok(response)
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn send(&self, mut request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        let id = RequestId::Number(self.next_request_id());
        request.id = id.clone();

        let response = self.post(&serde_json::to_value(&request)?).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("{} request failed: {}\n{}", request.method, status, body);
        }

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("text/event-stream"));

        if is_event_stream {
            let body = response.text().await?;
            parse_event_stream(&body, &id)
                .ok_or_else(|| anyhow!("No response for {} in event stream", request.method))
        } else {
            response
                .json()
                .await
                .with_context(|| format!("Failed to parse {} response", request.method))
        }
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<()> {
        let response = self.post(&serde_json::to_value(&notification)?).await?;
        let status = response.status();
        if !status.is_success() {
            bail!("{} notification rejected: {}", notification.method, status);
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let session_id = match self.session_id.lock() {
            Ok(mut current) => current.take(),
            Err(_) => None,
        };

        let Some(session_id) = session_id else {
            return Ok(());
        };

        let response = self
            .client
            .delete(&self.url)
            .header(SESSION_ID_HEADER, session_id)
            .send()
            .await?;

        match response.status() {
            // Servers that do not allow client-initiated termination answer 405
            status if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            status => Err(anyhow!("Session termination failed: {}", status)),
        }
    }
}

/// Find the JSON-RPC response with the given id in an SSE body.
fn parse_event_stream(body: &str, id: &RequestId) -> Option<JsonRpcResponse> {
    let normalized = body.replace("\r\n", "\n");
    normalized.split("\n\n").find_map(|event| {
        let data = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|line| line.strip_prefix(' ').unwrap_or(line))
            .collect::<Vec<_>>()
            .join("\n");
        if data.is_empty() {
            return None;
        }
        serde_json::from_str::<JsonRpcResponse>(&data)
            .ok()
            .filter(|response| response.id.as_ref() == Some(id))
    })
}
