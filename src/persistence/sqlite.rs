//! SQLite-backed artifact store.
//!
//! One row per job in `artifacts` plus one row per finished stage in
//! `artifact_stages`. Every merge rule is expressed in the upsert itself so
//! a write is a single transaction regardless of what has already landed.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use super::{ArtifactStore, ArtifactWrite, PersistedArtifact, StoreError, StoredStage};
use crate::job::{JobStatus, ResultSource};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS artifacts (
    job_id      TEXT PRIMARY KEY,
    requester   TEXT NOT NULL,
    status      TEXT NOT NULL,
    status_rank INTEGER NOT NULL,
    completion  INTEGER NOT NULL DEFAULT 0,
    error       TEXT,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS artifact_stages (
    job_id      TEXT NOT NULL,
    stage_index INTEGER NOT NULL,
    stage_key   TEXT NOT NULL,
    value       TEXT NOT NULL,
    source      TEXT NOT NULL,
    written_at  TEXT NOT NULL,
    PRIMARY KEY (job_id, stage_index)
);
";

// Upsert the job row. Right-hand sides see the pre-update row, so status and
// error only follow a write of higher rank, completion and updated_at only
// grow and created_at only shrinks.
const UPSERT_ARTIFACT: &str = "
INSERT INTO artifacts (job_id, requester, status, status_rank, completion, error, created_at, updated_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT(job_id) DO UPDATE SET
    status      = CASE WHEN excluded.status_rank > artifacts.status_rank
                       THEN excluded.status ELSE artifacts.status END,
    error       = CASE WHEN excluded.status_rank > artifacts.status_rank
                       THEN COALESCE(excluded.error, artifacts.error)
                       ELSE COALESCE(artifacts.error, excluded.error) END,
    status_rank = MAX(artifacts.status_rank, excluded.status_rank),
    completion  = MAX(artifacts.completion, excluded.completion),
    created_at  = MIN(artifacts.created_at, excluded.created_at),
    updated_at  = MAX(artifacts.updated_at, excluded.updated_at)
";

const UPSERT_STAGE: &str = "
INSERT INTO artifact_stages (job_id, stage_index, stage_key, value, source, written_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(job_id, stage_index) DO UPDATE SET
    stage_key  = excluded.stage_key,
    value      = excluded.value,
    source     = excluded.source,
    written_at = excluded.written_at
";

/// Fixed-width UTC timestamps so SQL `MIN`/`MAX` order them correctly.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

fn upsert_stage(
    tx: &rusqlite::Transaction<'_>,
    job_id: &str,
    stage_index: usize,
    stage_key: &str,
    value: &serde_json::Value,
    source: ResultSource,
    at: &str,
) -> Result<(), StoreError> {
    tx.execute(
        UPSERT_STAGE,
        params![
            job_id,
            stage_index as i64,
            stage_key,
            serde_json::to_string(value)?,
            source.as_str(),
            at,
        ],
    )?;
    Ok(())
}

pub struct SqliteArtifactStore {
    conn: Mutex<Connection>,
}

impl SqliteArtifactStore {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

impl ArtifactStore for SqliteArtifactStore {
    fn apply(&self, write: &ArtifactWrite) -> Result<(), StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        match write {
            ArtifactWrite::Stage {
                job_id,
                requester,
                stage_index,
                stage_key,
                value,
                source,
                completion,
                created_at,
                at,
            } => {
                let at = timestamp(at);
                tx.execute(
                    UPSERT_ARTIFACT,
                    params![
                        job_id,
                        requester,
                        JobStatus::Running.as_str(),
                        JobStatus::Running.rank(),
                        completion,
                        Option::<String>::None,
                        timestamp(created_at),
                        at,
                    ],
                )?;
                upsert_stage(&tx, job_id, *stage_index, stage_key, value, *source, &at)?;
            }
            ArtifactWrite::Status {
                job_id,
                requester,
                status,
                error,
                completion,
                stages,
                created_at,
                at,
            } => {
                let at = timestamp(at);
                tx.execute(
                    UPSERT_ARTIFACT,
                    params![
                        job_id,
                        requester,
                        status.as_str(),
                        status.rank(),
                        completion,
                        error,
                        timestamp(created_at),
                        at,
                    ],
                )?;
                for stage in stages {
                    upsert_stage(
                        &tx,
                        job_id,
                        stage.stage_index,
                        &stage.stage_key,
                        &stage.value,
                        stage.source,
                        &at,
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn get(&self, job_id: &str) -> Result<Option<PersistedArtifact>, StoreError> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                "SELECT requester, status, completion, error, created_at, updated_at
                 FROM artifacts WHERE job_id = ?1",
                params![job_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, u8>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?;

        let Some((requester, status, completion, error, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let status = JobStatus::parse(&status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status {status:?}")))?;

        let mut stmt = conn.prepare(
            "SELECT stage_index, stage_key, value, source
             FROM artifact_stages WHERE job_id = ?1 ORDER BY stage_index ASC",
        )?;
        let rows = stmt.query_map(params![job_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut stages = BTreeMap::new();
        for row in rows {
            let (stage_index, stage_key, value, source) = row?;
            let source = ResultSource::parse(&source)
                .ok_or_else(|| StoreError::Corrupt(format!("unknown source {source:?}")))?;
            stages.insert(
                stage_key,
                StoredStage {
                    stage_index: stage_index as usize,
                    value: serde_json::from_str(&value)?,
                    source,
                },
            );
        }

        Ok(Some(PersistedArtifact {
            job_id: job_id.to_string(),
            requester,
            status,
            completion,
            stages,
            error,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }
}
