use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "ANALYST";

/// Read as the provider key when `ANALYST_PROVIDER__API_KEY` is not set
pub const API_KEY_FALLBACK_ENV: &str = "GROQ_API_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Convert a configuration key such as `provider.api_key` into the environment variable
/// that sets it
pub fn to_env_var(field: &str) -> String {
    format!("{}_{}", ENV_PREFIX, field.replace('.', "__")).to_uppercase()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_host")]
    pub host: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl ProviderSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct McpSettings {
    #[serde(default = "default_mcp_url")]
    pub url: String,
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            url: default_mcp_url(),
            timeout_secs: default_mcp_timeout(),
        }
    }
}

impl McpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default = "default_system_prompt_name")]
    pub system_prompt_name: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt_name: default_system_prompt_name(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_tracking_project")]
    pub project: String,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            project: default_tracking_project(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub provider: ProviderSettings,
    #[serde(default)]
    pub mcp: McpSettings,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub tracking: TrackingSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Settings {
    /// Load settings from the environment alone
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load settings from defaults, then `file` if given, then `ANALYST_*` variables
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("provider.host", default_provider_host())?
            .set_default("provider.model", default_model())?
            .set_default("provider.timeout_secs", default_provider_timeout())?
            .set_default("mcp.url", default_mcp_url())?
            .set_default("mcp.timeout_secs", default_mcp_timeout())?
            .set_default("agent.max_iterations", default_max_iterations() as u64)?
            .set_default("agent.system_prompt_name", default_system_prompt_name())?
            .set_default("tracking.enabled", false)?
            .set_default("tracking.project", default_tracking_project())?
            .set_default("log.level", default_log_level())?;

        if let Ok(api_key) = std::env::var(API_KEY_FALLBACK_ENV) {
            builder = builder.set_default("provider.api_key", api_key)?;
        }

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = match config.try_deserialize() {
            Ok(settings) => settings,
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);
                return Err(map_missing_field(err));
            }
        };

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.api_key.trim().is_empty() {
            return Err(ConfigError::MissingEnvVar {
                env_var: to_env_var("provider.api_key"),
            });
        }
        if self.agent.max_iterations == 0 {
            return Err(ConfigError::Invalid(
                "agent.max_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn map_missing_field(err: config::ConfigError) -> ConfigError {
    let error_str = err.to_string();
    // "missing field `api_key`", possibly followed by the section it belongs to
    if let Some(rest) = error_str.split("missing field `").nth(1) {
        let field = rest.split('`').next().unwrap_or_default();
        let key = match field {
            "api_key" | "provider" => "provider.api_key",
            other => other,
        };
        ConfigError::MissingEnvVar {
            env_var: to_env_var(key),
        }
    } else if let config::ConfigError::NotFound(field) = &err {
        ConfigError::MissingEnvVar {
            env_var: to_env_var(field),
        }
    } else {
        ConfigError::Other(err)
    }
}

fn default_provider_host() -> String {
    "https://api.groq.com/openai".to_string()
}

fn default_model() -> String {
    "llama-3.1-70b-versatile".to_string()
}

fn default_provider_timeout() -> u64 {
    600
}

fn default_mcp_url() -> String {
    "http://localhost:8000/mcp".to_string()
}

fn default_mcp_timeout() -> u64 {
    60
}

fn default_max_iterations() -> usize {
    5
}

fn default_system_prompt_name() -> String {
    "scope_github_analytics_prompt".to_string()
}

fn default_tracking_project() -> String {
    "github-analytics-host".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}
