use thiserror::Error;

use crate::anthropic::AnthropicError;
use crate::job::RequestError;
use crate::persistence::StoreError;
use crate::quota::QuotaError;

#[derive(Debug, Error)]
pub enum RoadmapperError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid request: {0}")]
    Request(#[from] RequestError),

    #[error("quota error: {0}")]
    Quota(#[from] QuotaError),

    #[error("Anthropic API error: {0}")]
    Anthropic(#[from] AnthropicError),

    #[error("artifact store error: {0}")]
    Store(#[from] StoreError),

    #[error("roadmap not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("missing API key: set ANTHROPIC_API_KEY or api_key in the config file")]
    MissingApiKey,

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
