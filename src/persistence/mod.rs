//! Durable, incrementally updated roadmap artifacts.
//!
//! Writes are additive: a stage write touches only that stage's row,
//! completion only grows, and status only moves forward. Any two writes for
//! the same job therefore commute, which is what lets the background writer
//! apply them out of order.

mod sqlite;
mod writer;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::job::{JobStatus, ResultSource};

pub use sqlite::SqliteArtifactStore;
pub use writer::PersistenceWriter;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt artifact row: {0}")]
    Corrupt(String),

    #[error("store lock poisoned")]
    LockPoisoned,
}

/// One stage's value as carried by a terminal status write.
#[derive(Debug, Clone, PartialEq)]
pub struct StageRecord {
    pub stage_index: usize,
    pub stage_key: String,
    pub value: Value,
    pub source: ResultSource,
}

/// One additive update to a job's artifact. `created_at` is the job's own
/// creation time; `at` is when the write was produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactWrite {
    /// A stage finished; merge its value and raise completion.
    Stage {
        job_id: String,
        requester: String,
        stage_index: usize,
        stage_key: String,
        value: Value,
        source: ResultSource,
        completion: u8,
        created_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    /// The job's status moved. Terminal writes carry every recorded stage so
    /// that this write alone rebuilds the whole artifact.
    Status {
        job_id: String,
        requester: String,
        status: JobStatus,
        error: Option<String>,
        completion: u8,
        stages: Vec<StageRecord>,
        created_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },
}

impl ArtifactWrite {
    pub fn job_id(&self) -> &str {
        match self {
            ArtifactWrite::Stage { job_id, .. } | ArtifactWrite::Status { job_id, .. } => job_id,
        }
    }

    /// Terminal status writes are never dropped by the writer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ArtifactWrite::Status { status, .. } if status.is_terminal())
    }

    /// Short description for logs.
    pub fn label(&self) -> String {
        match self {
            ArtifactWrite::Stage { stage_key, .. } => format!("stage:{stage_key}"),
            ArtifactWrite::Status { status, .. } => format!("status:{status}"),
        }
    }
}

/// A stage value as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredStage {
    pub stage_index: usize,
    pub value: Value,
    pub source: ResultSource,
}

/// The durable view of a job, readable independently of any live stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedArtifact {
    pub job_id: String,
    pub requester: String,
    pub status: JobStatus,
    pub completion: u8,
    /// Stage values keyed by stage key.
    pub stages: BTreeMap<String, StoredStage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersistedArtifact {
    /// Stage values without their metadata, keyed by stage key.
    pub fn content(&self) -> Map<String, Value> {
        self.stages
            .iter()
            .map(|(k, s)| (k.clone(), s.value.clone()))
            .collect()
    }
}

/// Durable storage for artifacts. Implementations apply each write atomically.
pub trait ArtifactStore: Send + Sync {
    fn apply(&self, write: &ArtifactWrite) -> Result<(), StoreError>;

    fn get(&self, job_id: &str) -> Result<Option<PersistedArtifact>, StoreError>;
}
