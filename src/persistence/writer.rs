//! Fire-and-forget background writer for artifact updates.
//!
//! `enqueue` never blocks and never fails. A dispatcher task drains a bounded
//! queue and applies each write on the blocking pool, several at a time, so
//! writes for consecutive stages may land in any order. Store errors and
//! panics are logged and go no further.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, Semaphore, mpsc};

use super::{ArtifactStore, ArtifactWrite};

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// Handle to the background writer. Cheap to clone.
#[derive(Clone)]
pub struct PersistenceWriter {
    tx: mpsc::Sender<ArtifactWrite>,
    in_flight: Arc<InFlight>,
}

impl PersistenceWriter {
    /// Start the dispatcher. Must be called inside a tokio runtime.
    pub fn spawn(store: Arc<dyn ArtifactStore>, capacity: usize, concurrency: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<ArtifactWrite>(capacity.max(1));
        let in_flight = Arc::new(InFlight::default());
        let limit = Arc::new(Semaphore::new(concurrency.max(1)));

        let dispatcher_in_flight = Arc::clone(&in_flight);
        tokio::spawn(async move {
            while let Some(write) = rx.recv().await {
                let Ok(permit) = Arc::clone(&limit).acquire_owned().await else {
                    dispatcher_in_flight.finish();
                    break;
                };
                let store = Arc::clone(&store);
                let in_flight = Arc::clone(&dispatcher_in_flight);

                tokio::spawn(async move {
                    let job_id = write.job_id().to_string();
                    let label = write.label();
                    let outcome = tokio::task::spawn_blocking(move || store.apply(&write)).await;
                    match outcome {
                        Ok(Ok(())) => {
                            tracing::debug!(job_id = %job_id, write = %label, "artifact write applied");
                        }
                        Ok(Err(e)) => {
                            tracing::error!(job_id = %job_id, write = %label, error = %e, "artifact write failed");
                        }
                        Err(e) => {
                            tracing::error!(job_id = %job_id, write = %label, error = %e, "artifact write task panicked");
                        }
                    }
                    drop(permit);
                    in_flight.finish();
                });
            }
            tracing::debug!("persistence writer stopped");
        });

        Self { tx, in_flight }
    }

    /// Queue a write. Returns immediately. A full queue drops stage and
    /// non-terminal status writes; terminal status writes wait for space on a
    /// detached task instead, and carry every stage, so the durable record
    /// always reaches its final state.
    pub fn enqueue(&self, write: ArtifactWrite) {
        self.in_flight.begin();
        match self.tx.try_send(write) {
            Ok(()) => {}
            Err(TrySendError::Full(write)) if write.is_terminal() => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    tracing::error!(
                        job_id = %write.job_id(),
                        write = %write.label(),
                        "no runtime to deliver terminal artifact write"
                    );
                    self.in_flight.finish();
                    return;
                };
                tracing::debug!(
                    job_id = %write.job_id(),
                    write = %write.label(),
                    "persistence queue full, waiting to deliver terminal write"
                );
                let tx = self.tx.clone();
                let in_flight = Arc::clone(&self.in_flight);
                runtime.spawn(async move {
                    if let Err(e) = tx.send(write).await {
                        tracing::warn!(
                            job_id = %e.0.job_id(),
                            write = %e.0.label(),
                            "persistence writer stopped, dropping artifact write"
                        );
                        in_flight.finish();
                    }
                });
            }
            Err(TrySendError::Full(write)) => {
                tracing::warn!(
                    job_id = %write.job_id(),
                    write = %write.label(),
                    "persistence queue full, dropping artifact write"
                );
                self.in_flight.finish();
            }
            Err(TrySendError::Closed(write)) => {
                tracing::warn!(
                    job_id = %write.job_id(),
                    write = %write.label(),
                    "persistence writer stopped, dropping artifact write"
                );
                self.in_flight.finish();
            }
        }
    }

    /// Writes queued or running right now.
    pub fn pending(&self) -> usize {
        self.in_flight.count.load(Ordering::SeqCst)
    }

    /// Wait until every write enqueued so far has been applied or dropped.
    pub async fn flush(&self) {
        loop {
            let idle = self.in_flight.idle.notified();
            if self.pending() == 0 {
                return;
            }
            idle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, ResultSource};
    use crate::persistence::{PersistedArtifact, SqliteArtifactStore, StageRecord, StoreError};
    use chrono::Utc;
    use serde_json::json;
    use std::sync::Mutex;

    fn stage(index: usize, key: &str, completion: u8) -> ArtifactWrite {
        ArtifactWrite::Stage {
            job_id: "job-w".into(),
            requester: "trial:t".into(),
            stage_index: index,
            stage_key: key.into(),
            value: json!({"items": [index]}),
            source: ResultSource::Parsed,
            completion,
            created_at: Utc::now(),
            at: Utc::now(),
        }
    }

    fn complete_with_all_stages() -> ArtifactWrite {
        ArtifactWrite::Status {
            job_id: "job-w".into(),
            requester: "trial:t".into(),
            status: JobStatus::Complete,
            error: None,
            completion: 100,
            stages: (0..8)
                .map(|i| StageRecord {
                    stage_index: i,
                    stage_key: format!("stage_{i}"),
                    value: json!({"items": [i]}),
                    source: ResultSource::Parsed,
                })
                .collect(),
            created_at: Utc::now(),
            at: Utc::now(),
        }
    }

    struct FailingStore;

    impl ArtifactStore for FailingStore {
        fn apply(&self, _write: &ArtifactWrite) -> Result<(), StoreError> {
            Err(StoreError::Corrupt("disk on fire".into()))
        }

        fn get(&self, _job_id: &str) -> Result<Option<PersistedArtifact>, StoreError> {
            Ok(None)
        }
    }

    struct PanickingStore;

    impl ArtifactStore for PanickingStore {
        fn apply(&self, _write: &ArtifactWrite) -> Result<(), StoreError> {
            panic!("store bug");
        }

        fn get(&self, _job_id: &str) -> Result<Option<PersistedArtifact>, StoreError> {
            Ok(None)
        }
    }

    /// Holds every write until the gate is released, then applies it to an
    /// in-memory SQLite store.
    struct GatedStore {
        gate: Mutex<()>,
        inner: SqliteArtifactStore,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                gate: Mutex::new(()),
                inner: SqliteArtifactStore::open_in_memory().unwrap(),
            }
        }
    }

    impl ArtifactStore for GatedStore {
        fn apply(&self, write: &ArtifactWrite) -> Result<(), StoreError> {
            let _held = self.gate.lock().map_err(|_| StoreError::LockPoisoned)?;
            self.inner.apply(write)
        }

        fn get(&self, job_id: &str) -> Result<Option<PersistedArtifact>, StoreError> {
            self.inner.get(job_id)
        }
    }

    #[tokio::test]
    async fn writes_are_applied_after_flush() {
        let store = Arc::new(SqliteArtifactStore::open_in_memory().unwrap());
        let writer = PersistenceWriter::spawn(store.clone(), 16, 4);

        for i in 0..8 {
            writer.enqueue(stage(i, &format!("stage_{i}"), ((i + 1) * 100 / 8) as u8));
        }
        writer.enqueue(complete_with_all_stages());
        writer.flush().await;

        let artifact = store.get("job-w").unwrap().unwrap();
        assert_eq!(artifact.stages.len(), 8);
        assert_eq!(artifact.completion, 100);
        assert_eq!(artifact.status, JobStatus::Complete);
        assert_eq!(writer.pending(), 0);
    }

    #[tokio::test]
    async fn store_errors_are_swallowed() {
        let writer = PersistenceWriter::spawn(Arc::new(FailingStore), 4, 1);
        writer.enqueue(stage(0, "a", 12));
        writer.flush().await;
        assert_eq!(writer.pending(), 0);
    }

    #[tokio::test]
    async fn panicking_store_does_not_kill_the_writer() {
        let writer = PersistenceWriter::spawn(Arc::new(PanickingStore), 4, 1);
        writer.enqueue(stage(0, "a", 12));
        writer.enqueue(stage(1, "b", 25));
        writer.flush().await;
        assert_eq!(writer.pending(), 0);
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking() {
        let store = Arc::new(GatedStore::new());
        let held = store.gate.lock().unwrap();
        let writer = PersistenceWriter::spawn(store.clone(), 1, 1);

        for i in 0..32 {
            writer.enqueue(stage(i, "x", 1));
        }
        assert!(writer.pending() < 32, "some writes must have been dropped");

        drop(held);
        writer.flush().await;
        assert_eq!(writer.pending(), 0);
    }

    #[tokio::test]
    async fn terminal_write_survives_a_full_queue() {
        let store = Arc::new(GatedStore::new());
        let held = store.gate.lock().unwrap();
        let writer = PersistenceWriter::spawn(store.clone(), 1, 1);

        for i in 0..8 {
            writer.enqueue(stage(i, &format!("stage_{i}"), ((i + 1) * 100 / 8) as u8));
        }
        writer.enqueue(complete_with_all_stages());
        assert!(writer.pending() >= 2, "terminal write must still be pending");

        drop(held);
        writer.flush().await;

        let artifact = store.get("job-w").unwrap().unwrap();
        assert_eq!(artifact.status, JobStatus::Complete);
        assert_eq!(artifact.completion, 100);
        assert_eq!(artifact.stages.len(), 8);
    }

    #[tokio::test]
    async fn flush_with_nothing_queued_returns() {
        let writer = PersistenceWriter::spawn(Arc::new(FailingStore), 4, 1);
        writer.flush().await;
    }
}
