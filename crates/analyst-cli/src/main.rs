use analyst::config::Settings;
use analyst::host::Host;
use anyhow::{Context, Result};
use clap::Parser;
use futures::FutureExt;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod prompt;
mod session;

#[derive(Parser, Debug)]
#[command(author, version, about = "Ask questions about GitHub repositories", long_about = None)]
struct Cli {
    /// Question to answer; starts an interactive session when omitted
    query: Vec<String>,

    /// TOML file with settings (environment variables still take precedence)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum number of tool-calling rounds per question
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Tool registry endpoint
    #[arg(long)]
    mcp_url: Option<String>,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(model) = &self.model {
            settings.provider.model = model.clone();
        }
        if let Some(max_iterations) = self.max_iterations {
            settings.agent.max_iterations = max_iterations.max(1);
        }
        if let Some(url) = &self.mcp_url {
            settings.mcp.url = url.clone();
        }
    }

    fn question(&self) -> Option<String> {
        if self.query.is_empty() {
            None
        } else {
            Some(self.query.join(" "))
        }
    }
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let mut settings =
        Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut settings);
    setup_logging(&settings.log.level);

    tracing::info!(
        "Using model {} with tool registry at {}",
        settings.provider.model,
        settings.mcp.url
    );

    let question = cli.question();
    Host::scoped(&settings, |host| {
        async move {
            match question {
                Some(query) => session::single_shot(host, &query).await,
                None => session::interactive(host).await,
            }
        }
        .boxed_local()
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use analyst::config::{
        AgentSettings, LogSettings, McpSettings, ProviderSettings, TrackingSettings,
    };

    fn settings() -> Settings {
        Settings {
            provider: ProviderSettings {
                host: "https://api.groq.com/openai".to_string(),
                api_key: "test-key".to_string(),
                model: "llama-3.1-70b-versatile".to_string(),
                temperature: None,
                max_tokens: None,
                timeout_secs: 600,
            },
            mcp: McpSettings::default(),
            agent: AgentSettings::default(),
            tracking: TrackingSettings::default(),
            log: LogSettings::default(),
        }
    }

    #[test]
    fn test_positional_words_form_one_question() {
        let cli = Cli::parse_from(["analyst", "How", "many", "stars", "does", "facebook/react", "have?"]);
        assert_eq!(
            cli.question().as_deref(),
            Some("How many stars does facebook/react have?")
        );
        assert!(Cli::parse_from(["analyst"]).question().is_none());
    }

    #[test]
    fn test_flags_override_settings() {
        let cli = Cli::parse_from([
            "analyst",
            "--model",
            "llama-3.3-70b-versatile",
            "--max-iterations",
            "3",
            "--mcp-url",
            "http://registry:9000/mcp",
        ]);
        let mut settings = settings();
        cli.apply_overrides(&mut settings);

        assert_eq!(settings.provider.model, "llama-3.3-70b-versatile");
        assert_eq!(settings.agent.max_iterations, 3);
        assert_eq!(settings.mcp.url, "http://registry:9000/mcp");
    }

    #[test]
    fn test_no_flags_keep_settings() {
        let mut settings = settings();
        Cli::parse_from(["analyst"]).apply_overrides(&mut settings);
        assert_eq!(settings.provider.model, "llama-3.1-70b-versatile");
        assert_eq!(settings.agent.max_iterations, 5);
    }
}
