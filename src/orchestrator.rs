use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;

use crate::anthropic::{AnthropicError, ModelClient};
use crate::events::StageEvent;
use crate::job::{
    GenerationJob, GenerationRequest, JobError, JobStatus, JobSummary, StageDiagnostic,
    StageResult,
};
use crate::persistence::{ArtifactWrite, PersistenceWriter, StageRecord};
use crate::quota::QuotaToken;
use crate::recover::{Recovered, RecoveryTier, recover};
use crate::stages::{StageDescriptor, StageTable};

/// Drives one job at a time through the stage table: prompt, bounded model
/// call, recovery, record, event, background write.
pub struct Pipeline<M> {
    model: M,
    stages: StageTable,
    writer: PersistenceWriter,
}

/// How a stage attempt went before it was recorded.
struct Attempt {
    recovered: Recovered,
    /// Set when the value is a fallback; says why.
    degraded: Option<String>,
}

impl<M: ModelClient + 'static> Pipeline<M> {
    pub fn new(model: M, stages: StageTable, writer: PersistenceWriter) -> Self {
        Self {
            model,
            stages,
            writer,
        }
    }

    pub fn stages(&self) -> &StageTable {
        &self.stages
    }

    pub fn writer(&self) -> &PersistenceWriter {
        &self.writer
    }

    /// Run a job on its own task. Returns the job id and the job's events.
    /// Dropping the receiver does not stop the job.
    pub fn spawn(
        self: &Arc<Self>,
        request: GenerationRequest,
        token: QuotaToken,
    ) -> (String, mpsc::Receiver<StageEvent>) {
        // Room for every event a job can emit, so sends never wait on a slow reader.
        let (tx, rx) = mpsc::channel(self.stages.len() + 1);
        let job = GenerationJob::new(token.requester.clone(), request);
        let job_id = job.id().to_string();
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            pipeline.drive(job, &token, tx).await;
        });
        (job_id, rx)
    }

    /// Run a job to its terminal status, sending events to `events`.
    pub async fn run(
        &self,
        request: GenerationRequest,
        token: QuotaToken,
        events: mpsc::Sender<StageEvent>,
    ) -> GenerationJob {
        let job = GenerationJob::new(token.requester.clone(), request);
        self.drive(job, &token, events).await
    }

    async fn drive(
        &self,
        mut job: GenerationJob,
        token: &QuotaToken,
        events: mpsc::Sender<StageEvent>,
    ) -> GenerationJob {
        job.start();
        tracing::info!(
            job_id = %job.id(),
            requester = %job.requester(),
            quota_remaining = token.remaining,
            stages = self.stages.len(),
            "job started"
        );
        self.writer.enqueue(status_write(&job, None));

        for stage in self.stages.iter() {
            let started = Instant::now();
            let prompt = stage.prompt(job.request(), job.results());
            let attempt = self.attempt(stage, &prompt).await;

            if let Some(reason) = &attempt.degraded {
                if stage.is_foundational() {
                    tracing::error!(
                        job_id = %job.id(),
                        stage = stage.key,
                        reason = %reason,
                        "foundational stage failed, aborting job"
                    );
                    return self.abort(job, stage.index, reason.clone(), &events).await;
                }
                tracing::warn!(
                    job_id = %job.id(),
                    stage = stage.key,
                    reason = %reason,
                    "stage degraded to fallback"
                );
                job.note_degraded(StageDiagnostic {
                    stage_index: stage.index,
                    stage_key: stage.key,
                    reason: reason.clone(),
                });
            }

            let completion = self.stages.completion_after(stage.index);
            let source = attempt.recovered.source();
            let value = attempt.recovered.output.clone().into_value();
            let result = StageResult {
                stage_index: stage.index,
                stage_key: stage.key,
                output: attempt.recovered.output,
                source,
            };
            match record_or_skip(&mut job, stage, result, completion) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => return self.abort(job, stage.index, e.to_string(), &events).await,
            }

            tracing::info!(
                job_id = %job.id(),
                stage = stage.key,
                tier = %attempt.recovered.tier,
                completion,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "stage finished"
            );

            emit(
                &events,
                StageEvent::Data {
                    job_id: job.id().to_string(),
                    stage_index: stage.index,
                    stage_key: stage.key.to_string(),
                    value: value.clone(),
                    source,
                    completion,
                },
            )
            .await;

            self.writer.enqueue(ArtifactWrite::Stage {
                job_id: job.id().to_string(),
                requester: job.requester().to_string(),
                stage_index: stage.index,
                stage_key: stage.key.to_string(),
                value,
                source,
                completion,
                created_at: job.created_at(),
                at: Utc::now(),
            });
        }

        job.complete();
        self.writer.enqueue(status_write(&job, None));
        emit(
            &events,
            StageEvent::Complete {
                job_id: job.id().to_string(),
                stage_index: self.stages.len().saturating_sub(1),
                completion: job.completion(),
            },
        )
        .await;
        log_summary(&job);
        job
    }

    /// Call the model within the stage's budget and recover its output.
    async fn attempt(&self, stage: &StageDescriptor, prompt: &str) -> Attempt {
        let call = self.model.complete(prompt, stage.max_tokens, stage.time_budget);
        let outcome = match tokio::time::timeout(stage.time_budget, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(AnthropicError::Timeout {
                budget_ms: millis(stage.time_budget),
            }),
        };

        match outcome {
            Ok(raw) => {
                let recovered = recover(&raw, &stage.shape, stage.fallback);
                let degraded = (recovered.tier == RecoveryTier::Fallback)
                    .then(|| "model output could not be recovered".to_string());
                Attempt {
                    recovered,
                    degraded,
                }
            }
            Err(e) => Attempt {
                recovered: Recovered {
                    output: stage.fallback_value(None),
                    tier: RecoveryTier::Fallback,
                },
                degraded: Some(format!("{}: {e}", e.kind())),
            },
        }
    }

    async fn abort(
        &self,
        mut job: GenerationJob,
        stage_index: usize,
        message: String,
        events: &mpsc::Sender<StageEvent>,
    ) -> GenerationJob {
        job.fail();
        self.writer.enqueue(status_write(&job, Some(message.clone())));
        emit(
            events,
            StageEvent::Error {
                job_id: job.id().to_string(),
                stage_index,
                message,
            },
        )
        .await;
        log_summary(&job);
        job
    }
}

/// Record a stage result. A rejected foundational result is an error; any
/// other rejected result is logged and the stage is left out.
fn record_or_skip(
    job: &mut GenerationJob,
    stage: &StageDescriptor,
    result: StageResult,
    completion: u8,
) -> Result<bool, JobError> {
    match job.record(result, completion) {
        Ok(()) => Ok(true),
        Err(e) if stage.is_foundational() => {
            tracing::error!(job_id = %job.id(), stage = stage.key, error = %e, "stage result rejected");
            Err(e)
        }
        Err(e) => {
            tracing::error!(
                job_id = %job.id(),
                stage = stage.key,
                error = %e,
                "stage result rejected, leaving stage out"
            );
            Ok(false)
        }
    }
}

/// Status writes for a finished job carry every recorded stage.
fn status_write(job: &GenerationJob, error: Option<String>) -> ArtifactWrite {
    let stages = if job.status().is_terminal() {
        job.results()
            .iter()
            .map(|r| StageRecord {
                stage_index: r.stage_index,
                stage_key: r.stage_key.to_string(),
                value: r.output.clone().into_value(),
                source: r.source,
            })
            .collect()
    } else {
        Vec::new()
    };
    ArtifactWrite::Status {
        job_id: job.id().to_string(),
        requester: job.requester().to_string(),
        status: job.status(),
        error,
        completion: job.completion(),
        stages,
        created_at: job.created_at(),
        at: Utc::now(),
    }
}

async fn emit(events: &mpsc::Sender<StageEvent>, event: StageEvent) {
    if events.send(event).await.is_err() {
        tracing::debug!("event receiver dropped, job continues");
    }
}

fn log_summary(job: &GenerationJob) {
    let summary = JobSummary::from_job(job);
    let degraded = summary.degraded_stages.join(",");
    if summary.status == JobStatus::Failed {
        tracing::warn!(
            job_id = %summary.job_id,
            completion = summary.completion,
            duration_ms = summary.duration_ms,
            "job failed"
        );
    } else {
        tracing::info!(
            job_id = %summary.job_id,
            completion = summary.completion,
            stages = summary.stages_recorded,
            degraded = %degraded,
            duration_ms = summary.duration_ms,
            "job complete"
        );
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
