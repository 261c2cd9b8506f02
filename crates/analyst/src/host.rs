//! The session host: owns the tool registry connection and answers queries.

use futures::future::LocalBoxFuture;
use serde_json::Value;
use std::collections::HashMap;

use crate::agent::{Agent, Reply};
use crate::config::Settings;
use crate::errors::{AgentError, AgentResult};
use crate::mcp::{HttpTransport, McpClient};
use crate::providers::configs::OpenAiProviderConfig;
use crate::providers::openai::OpenAiProvider;
use crate::providers::utils::tools_to_openai_spec;
use crate::tracking;

/// Argument the registry's system prompt expects: its context, serialized as an object
const SYSTEM_PROMPT_CONTEXT: &str = r#"{"context": ""}"#;

/// What `initialize` produces and every query reuses
struct Session {
    system_prompt: String,
    tools: Vec<Value>,
}

pub struct Host {
    client: McpClient,
    agent: Agent,
    system_prompt_name: String,
    session: Option<Session>,
}

impl Host {
    /// Build a host from settings. Nothing is contacted until [`Host::initialize`].
    pub fn new(settings: &Settings) -> AgentResult<Self> {
        let tracker = tracking::from_settings(&settings.tracking);

        let transport = HttpTransport::new(settings.mcp.url.clone(), settings.mcp.timeout())
            .map_err(|e| AgentError::Connection(format!("{:#}", e)))?;
        let client = McpClient::new(Box::new(transport), tracker.clone());

        let provider = OpenAiProvider::new(OpenAiProviderConfig {
            host: settings.provider.host.clone(),
            api_key: settings.provider.api_key.clone(),
            model: settings.provider.model.clone(),
            temperature: settings.provider.temperature,
            max_tokens: settings.provider.max_tokens,
            timeout: settings.provider.timeout(),
        })
        .map_err(|e| AgentError::Provider(format!("{:#}", e)))?;

        let agent = Agent::new(Box::new(provider))
            .with_max_iterations(settings.agent.max_iterations)
            .with_tracker(tracker);

        Ok(Self::from_parts(
            client,
            agent,
            settings.agent.system_prompt_name.clone(),
        ))
    }

    pub fn from_parts<S: Into<String>>(client: McpClient, agent: Agent, system_prompt_name: S) -> Self {
        Self {
            client,
            agent,
            system_prompt_name: system_prompt_name.into(),
            session: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn client(&self) -> &McpClient {
        &self.client
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.system_prompt.as_str())
    }

    /// The adapted tool catalog offered to the model
    pub fn tool_specs(&self) -> &[Value] {
        self.session.as_ref().map(|s| s.tools.as_slice()).unwrap_or_default()
    }

    /// Connect to the registry, discover its catalog and load the system prompt.
    pub async fn initialize(&mut self) -> AgentResult<()> {
        if self.session.is_some() {
            tracing::warn!("Host already initialized");
            return Ok(());
        }
        tracing::info!("Initializing host...");

        self.client.connect().await?;
        let tools = self.client.discover_tools().await?.to_vec();
        self.client.discover_prompts().await?;

        let arguments = HashMap::from([(
            "arguments".to_string(),
            SYSTEM_PROMPT_CONTEXT.to_string(),
        )]);
        let prompt = self
            .client
            .get_prompt(&self.system_prompt_name, arguments)
            .await?;
        let system_prompt = prompt
            .text()
            .ok_or_else(|| {
                AgentError::PromptNotFound(format!(
                    "{} has no text message",
                    self.system_prompt_name
                ))
            })?
            .to_string();
        tracing::info!("System prompt loaded");

        let tools = tools_to_openai_spec(&tools)?;
        tracing::info!("Host initialized with {} tools", tools.len());

        self.session = Some(Session {
            system_prompt,
            tools,
        });
        Ok(())
    }

    fn session(&self) -> AgentResult<&Session> {
        self.session.as_ref().ok_or_else(|| {
            AgentError::NotInitialized("process_query called before initialize()".to_string())
        })
    }

    /// Answer one question
    pub async fn process_query(&self, query: &str) -> AgentResult<String> {
        let session = self.session()?;
        self.agent
            .process_query(&self.client, &session.system_prompt, &session.tools, query)
            .await
    }

    /// Answer one question, returning the outcome and transcript as well
    pub async fn reply(&self, query: &str) -> AgentResult<Reply> {
        let session = self.session()?;
        self.agent
            .reply(&self.client, &session.system_prompt, &session.tools, query)
            .await
    }

    /// Release the registry connection. Later calls are no-ops.
    pub async fn close(&mut self) -> AgentResult<()> {
        self.session = None;
        self.client.close().await
    }

    /// Build, initialize, run `f` and close the host, closing on every exit path.
    pub async fn scoped<T, E, F>(settings: &Settings, f: F) -> Result<T, E>
    where
        E: From<AgentError>,
        F: for<'a> FnOnce(&'a Host) -> LocalBoxFuture<'a, Result<T, E>>,
    {
        Self::new(settings)?.run_scoped(f).await
    }

    /// Initialize this host, run `f` and close it, closing on every exit path.
    ///
    /// A failure to close is reported only when everything before it succeeded.
    pub async fn run_scoped<T, E, F>(mut self, f: F) -> Result<T, E>
    where
        E: From<AgentError>,
        F: for<'a> FnOnce(&'a Host) -> LocalBoxFuture<'a, Result<T, E>>,
    {
        let result = match self.initialize().await {
            Ok(()) => f(&self).await,
            Err(e) => Err(E::from(e)),
        };

        match (self.close().await, result) {
            (Ok(()), result) => result,
            (Err(close_err), Ok(_)) => Err(E::from(close_err)),
            (Err(close_err), Err(e)) => {
                tracing::warn!("Failed to close host: {}", close_err);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Outcome, BUDGET_EXHAUSTED_MESSAGE};
    use crate::mcp::client::testing::{repo_info_tool, StubTransport};
    use crate::mcp::ClientState;
    use crate::models::message::Message;
    use crate::providers::mock::MockProvider;
    use crate::tracking::NoopTracker;
    use futures::FutureExt;
    use serde_json::json;
    use std::sync::Arc;

    const PROMPT_NAME: &str = "scope_github_analytics_prompt";

    /// A registry answering every method except `missing`
    fn registry_without(missing: &str) -> StubTransport {
        let answers = [
            ("tools/list", json!({"tools": [repo_info_tool()]})),
            (
                "prompts/list",
                json!({"prompts": [{"name": PROMPT_NAME, "description": "GitHub analytics scope"}]}),
            ),
            (
                "prompts/get",
                json!({"messages": [{"role": "user", "content": {"type": "text", "text": "You are an expert GitHub analyst."}}]}),
            ),
            (
                "tools/call",
                json!({"content": [{"type": "text", "text": "{\"stargazers_count\": 230000}"}]}),
            ),
        ];
        answers
            .into_iter()
            .filter(|(method, _)| *method != missing)
            .fold(StubTransport::new(), |stub, (method, result)| stub.respond(method, result))
    }

    fn registry() -> StubTransport {
        registry_without("")
    }

    fn host(stub: &StubTransport, provider: MockProvider) -> Host {
        let client = McpClient::new(Box::new(stub.clone()), Arc::new(NoopTracker));
        Host::from_parts(client, Agent::new(Box::new(provider)), PROMPT_NAME)
    }

    #[tokio::test]
    async fn test_initialize_loads_prompt_and_tools() -> AgentResult<()> {
        let stub = registry();
        let mut host = host(&stub, MockProvider::new(vec![]));

        host.initialize().await?;

        assert!(host.is_initialized());
        assert_eq!(host.system_prompt(), Some("You are an expert GitHub analyst."));
        assert_eq!(host.tool_specs().len(), 1);
        assert_eq!(host.tool_specs()[0]["function"]["name"], "repo_get_repo_info");

        let sent = stub.sent.lock().unwrap();
        let get = sent.iter().find(|r| r.method == "prompts/get").unwrap();
        assert_eq!(
            get.params,
            Some(json!({"name": PROMPT_NAME, "arguments": {"arguments": "{\"context\": \"\"}"}}))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_initialize_runs_once() -> AgentResult<()> {
        let stub = registry();
        let mut host = host(&stub, MockProvider::new(vec![]));

        host.initialize().await?;
        host.initialize().await?;

        let initializes = stub.methods().iter().filter(|m| *m == "initialize").count();
        assert_eq!(initializes, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_query_before_initialize() {
        let host = host(&registry(), MockProvider::new(vec![]));
        assert!(matches!(
            host.process_query("q").await,
            Err(AgentError::NotInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_system_prompt_fails_initialize() {
        let stub = registry_without("prompts/get").fail("prompts/get", -32602, "Unknown prompt");
        let mut host = host(&stub, MockProvider::new(vec![]));

        assert!(matches!(
            host.initialize().await,
            Err(AgentError::PromptNotFound(_))
        ));
        assert!(!host.is_initialized());
    }

    #[tokio::test]
    async fn test_process_query_uses_session() -> AgentResult<()> {
        let stub = registry();
        let provider = MockProvider::new(vec![
            Message::assistant().with_tool_request(
                "call_1",
                "repo_get_repo_info",
                r#"{"owner":"facebook","repo":"react"}"#,
            ),
            Message::assistant().with_text("facebook/react has 230,000 stars."),
        ]);
        let mut host = host(&stub, provider.clone());
        host.initialize().await?;

        let reply = host.reply("How many stars does facebook/react have?").await?;

        assert_eq!(reply.outcome, Outcome::Answered);
        assert_eq!(reply.answer, "facebook/react has 230,000 stars.");
        assert_eq!(
            provider.calls.lock().unwrap()[0][0].text(),
            "You are an expert GitHub analyst."
        );
        let tool_calls = stub.methods().iter().filter(|m| *m == "tools/call").count();
        assert_eq!(tool_calls, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_scoped_closes_after_success() {
        let stub = registry();
        let host = host(
            &stub,
            MockProvider::repeating(Message::assistant().with_tool_request(
                "call_1",
                "repo_get_repo_info",
                r#"{"owner":"a","repo":"b"}"#,
            )),
        );

        let answer: AgentResult<String> = host
            .run_scoped(|host| async move { host.process_query("q").await }.boxed_local())
            .await;

        assert_eq!(answer.unwrap(), BUDGET_EXHAUSTED_MESSAGE);
        assert_eq!(*stub.closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scoped_closes_after_failed_initialize() {
        let stub = registry_without("tools/list").fail("tools/list", -32603, "boom");
        let host = host(&stub, MockProvider::new(vec![]));

        let result: AgentResult<()> = host
            .run_scoped(|_| async { Ok(()) }.boxed_local())
            .await;

        assert!(matches!(result, Err(AgentError::Discovery(_))));
        assert_eq!(*stub.closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scoped_closes_after_failed_query() {
        let stub = registry();
        let host = host(&stub, MockProvider::failing("Server error: 500"));

        let result: AgentResult<String> = host
            .run_scoped(|host| async move { host.process_query("q").await }.boxed_local())
            .await;

        assert!(matches!(result, Err(AgentError::Provider(_))));
        assert_eq!(*stub.closes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() -> AgentResult<()> {
        let stub = registry();
        let mut host = host(&stub, MockProvider::new(vec![]));
        host.initialize().await?;

        host.close().await?;
        host.close().await?;

        assert_eq!(*stub.closes.lock().unwrap(), 1);
        assert_eq!(host.client().state(), ClientState::Closed);
        assert!(!host.is_initialized());
        Ok(())
    }
}
