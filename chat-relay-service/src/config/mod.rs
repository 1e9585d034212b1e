use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

/// Default completion model.
const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Default overall deadline for one completion, in seconds.
const DEFAULT_COMPLETION_TIMEOUT_SECS: u64 = 120;

/// Default cap on the number of history turns loaded per query.
const DEFAULT_HISTORY_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRelayConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub openai: OpenAiConfig,
    pub relay: RelayConfig,
    pub cors: CorsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    /// Base URL of the OpenAI-compatible API, without trailing slash.
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Overall deadline for one upstream completion, from request to last chunk.
    pub completion_timeout_secs: u64,
    /// Maximum number of stored turns sent as context.
    pub history_limit: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    /// Allowed origins; `*` mirrors any origin.
    pub allowed_origins: Vec<String>,
}

impl RelayConfig {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }
}

impl CorsConfig {
    pub fn allows_any_origin(&self) -> bool {
        self.allowed_origins.is_empty() || self.allowed_origins.iter().any(|o| o == "*")
    }
}

impl ChatRelayConfig {
    pub fn load() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        Ok(ChatRelayConfig {
            common: common_config,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", None, is_prod)?,
                database: get_env("MONGODB_DB_NAME", Some("chat_db"), is_prod)?,
            },
            openai: OpenAiConfig {
                api_key: get_env("OPENAI_API_KEY", None, is_prod)?,
                base_url: get_env("OPENAI_BASE_URL", Some("https://api.openai.com/v1"), is_prod)?
                    .trim_end_matches('/')
                    .to_string(),
                model: get_env("OPENAI_MODEL", Some(DEFAULT_MODEL), is_prod)?,
            },
            relay: RelayConfig {
                completion_timeout_secs: parse_positive(
                    "COMPLETION_TIMEOUT_SECS",
                    &get_env(
                        "COMPLETION_TIMEOUT_SECS",
                        Some(&DEFAULT_COMPLETION_TIMEOUT_SECS.to_string()),
                        is_prod,
                    )?,
                )?,
                history_limit: parse_positive(
                    "CHAT_HISTORY_LIMIT",
                    &get_env(
                        "CHAT_HISTORY_LIMIT",
                        Some(&DEFAULT_HISTORY_LIMIT.to_string()),
                        is_prod,
                    )?,
                )?,
            },
            cors: CorsConfig {
                allowed_origins: parse_origins(&get_env(
                    "CORS_ALLOWED_ORIGINS",
                    Some("*"),
                    is_prod,
                )?),
            },
        })
    }
}

/// Parse a strictly positive integer setting.
fn parse_positive<T>(key: &str, raw: &str) -> Result<T, AppError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value: T = raw.trim().parse().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("{} must be a positive integer: {}", key, e))
    })?;

    if value <= T::default() {
        return Err(AppError::ConfigError(anyhow::anyhow!(
            "{} must be greater than zero, got {}",
            key,
            raw.trim()
        )));
    }
    Ok(value)
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}
