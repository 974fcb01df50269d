//! Configuration loaded from `roadmapper.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! `ANTHROPIC_API_KEY` and `ROADMAPPER_DATABASE` take precedence over the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::stages::StageTable;

pub const DEFAULT_CONFIG_FILE: &str = "roadmapper.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoadmapperConfig {
    /// Anthropic API key.
    #[serde(default)]
    pub api_key: String,

    /// Model identifier sent with every stage call.
    #[serde(default = "default_model")]
    pub model: String,

    /// Messages endpoint override, e.g. a local proxy.
    #[serde(default)]
    pub api_base_url: Option<String>,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite file holding persisted artifacts.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Pending artifact writes held before new ones are dropped.
    #[serde(default = "default_writer_queue_capacity")]
    pub writer_queue_capacity: usize,

    /// Artifact writes applied at the same time.
    #[serde(default = "default_writer_concurrency")]
    pub writer_concurrency: usize,

    /// Roadmaps an authenticated user may generate.
    #[serde(default = "default_user_allowance")]
    pub user_allowance: u32,

    /// Roadmaps an anonymous trial visitor may generate.
    #[serde(default = "default_trial_allowance")]
    pub trial_allowance: u32,

    /// Replaces every stage's own time budget when set.
    #[serde(default)]
    pub stage_timeout_secs: Option<u64>,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub log_json: bool,
}

fn default_model() -> String {
    "claude-sonnet-4-5-20250929".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("roadmapper.db")
}

fn default_writer_queue_capacity() -> usize {
    256
}

fn default_writer_concurrency() -> usize {
    4
}

fn default_user_allowance() -> u32 {
    10
}

fn default_trial_allowance() -> u32 {
    1
}

impl Default for RoadmapperConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_model(),
            api_base_url: None,
            bind_addr: default_bind_addr(),
            database_path: default_database_path(),
            writer_queue_capacity: default_writer_queue_capacity(),
            writer_concurrency: default_writer_concurrency(),
            user_allowance: default_user_allowance(),
            trial_allowance: default_trial_allowance(),
            stage_timeout_secs: None,
            log_json: false,
        }
    }
}

impl RoadmapperConfig {
    /// Load from `path`, or from `roadmapper.toml` in the current directory
    /// when no path is given. Only an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        let mut config = if required || path.exists() {
            let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.display().to_string(),
                source,
            })?;
            Self::parse(&contents)?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str::<RoadmapperConfig>(contents)?)
    }

    /// Overlay environment values. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty("ANTHROPIC_API_KEY") {
            self.api_key = key;
        }
        if let Some(db) = non_empty("ROADMAPPER_DATABASE") {
            self.database_path = PathBuf::from(db);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.writer_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "writer_queue_capacity",
                reason: "must be at least 1".into(),
            });
        }
        if self.writer_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "writer_concurrency",
                reason: "must be at least 1".into(),
            });
        }
        if self.stage_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "stage_timeout_secs",
                reason: "must be at least 1 second".into(),
            });
        }
        Ok(())
    }

    /// The API key, or an error when none is configured.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        if self.api_key.trim().is_empty() {
            Err(ConfigError::MissingApiKey)
        } else {
            Ok(&self.api_key)
        }
    }

    /// The standard stage table with `stage_timeout_secs` applied.
    pub fn stage_table(&self) -> StageTable {
        let table = StageTable::standard();
        match self.stage_timeout_secs {
            Some(secs) => table.with_time_budget(Duration::from_secs(secs)),
            None => table,
        }
    }
}
