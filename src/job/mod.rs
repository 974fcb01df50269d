//! Roadmap jobs: the request, the per-stage results, and the lifecycle.

mod request;
mod state;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::stages::StageOutput;

pub use request::{GenerationRequest, RequestError, Requester};
pub use state::{JobStatus, StateMachine, Transition};

/// Where a stage's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    /// The model's output parsed (possibly after repair) into the stage shape.
    Parsed,
    /// The stage's fallback builder produced the value.
    Fallback,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::Parsed => "parsed",
            ResultSource::Fallback => "fallback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parsed" => Some(ResultSource::Parsed),
            "fallback" => Some(ResultSource::Fallback),
            _ => None,
        }
    }
}

/// The shape-valid output of one stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    pub stage_index: usize,
    pub stage_key: &'static str,
    pub output: StageOutput,
    pub source: ResultSource,
}

/// Why a stage ended up with its fallback value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDiagnostic {
    pub stage_index: usize,
    pub stage_key: &'static str,
    pub reason: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("stage {got} recorded while stage {expected} was due")]
    OutOfOrder { expected: usize, got: usize },

    #[error("job is {status}, cannot record stage results")]
    NotRunning { status: JobStatus },
}

/// One accepted roadmap request and everything the orchestrator has learned
/// about it so far. Owned by the orchestrator task for the job's lifetime.
#[derive(Debug, Clone)]
pub struct GenerationJob {
    id: String,
    requester: Requester,
    request: GenerationRequest,
    results: Vec<StageResult>,
    current_stage: usize,
    status: JobStatus,
    completion: u8,
    diagnostics: Vec<StageDiagnostic>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl GenerationJob {
    pub fn new(requester: Requester, request: GenerationRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            requester,
            request,
            results: Vec::new(),
            current_stage: 0,
            status: JobStatus::Pending,
            completion: 0,
            diagnostics: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn requester(&self) -> &Requester {
        &self.requester
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn current_stage(&self) -> usize {
        self.current_stage
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn completion(&self) -> u8 {
        self.completion
    }

    pub fn diagnostics(&self) -> &[StageDiagnostic] {
        &self.diagnostics
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn transition(&mut self, to: JobStatus) -> Transition {
        let t = StateMachine::next(&mut self.status, to);
        if matches!(t, Transition::Moved(..)) {
            self.updated_at = Utc::now();
        }
        t
    }

    pub fn start(&mut self) -> Transition {
        self.transition(JobStatus::Running)
    }

    pub fn complete(&mut self) -> Transition {
        self.transition(JobStatus::Complete)
    }

    pub fn fail(&mut self) -> Transition {
        self.transition(JobStatus::Failed)
    }

    /// Append the next stage's result and raise completion to `completion`.
    /// Completion never goes down.
    pub fn record(&mut self, result: StageResult, completion: u8) -> Result<(), JobError> {
        if self.status != JobStatus::Running {
            return Err(JobError::NotRunning {
                status: self.status,
            });
        }
        if result.stage_index != self.current_stage {
            return Err(JobError::OutOfOrder {
                expected: self.current_stage,
                got: result.stage_index,
            });
        }
        self.results.push(result);
        self.current_stage += 1;
        self.completion = self.completion.max(completion.min(100));
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn note_degraded(&mut self, diagnostic: StageDiagnostic) {
        self.diagnostics.push(diagnostic);
    }

    /// The roadmap assembled so far: a fold of the recorded results keyed by
    /// stage key.
    pub fn running_result(&self) -> Map<String, Value> {
        self.results.iter().fold(Map::new(), |mut acc, r| {
            acc.insert(r.stage_key.to_string(), r.output.clone().into_value());
            acc
        })
    }
}

/// Summary produced when a job reaches a terminal status.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub requester: String,
    pub status: JobStatus,
    pub completion: u8,
    pub stages_recorded: usize,
    pub degraded_stages: Vec<&'static str>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl JobSummary {
    pub fn from_job(job: &GenerationJob) -> Self {
        let now = Utc::now();
        Self {
            job_id: job.id.clone(),
            requester: job.requester.to_string(),
            status: job.status,
            completion: job.completion,
            stages_recorded: job.results.len(),
            degraded_stages: job.diagnostics.iter().map(|d| d.stage_key).collect(),
            started_at: job.created_at,
            finished_at: now,
            duration_ms: (now - job.created_at).num_milliseconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::Shape;
    use serde_json::json;

    fn job() -> GenerationJob {
        GenerationJob::new(
            Requester::User("u1".into()),
            GenerationRequest::new("grow a bakery with AI", "no budget for staff"),
        )
    }

    fn result(index: usize, key: &'static str, value: Value) -> StageResult {
        StageResult {
            stage_index: index,
            stage_key: key,
            output: Shape::list("items").validate(value).unwrap(),
            source: ResultSource::Parsed,
        }
    }

    #[test]
    fn job_creation_defaults() {
        let job = job();
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.completion(), 0);
        assert_eq!(job.current_stage(), 0);
        assert!(job.results().is_empty());
        assert!(Uuid::parse_str(job.id()).is_ok());
    }

    #[test]
    fn record_requires_running_status() {
        let mut job = job();
        let err = job.record(result(0, "a", json!({})), 12).unwrap_err();
        assert_eq!(
            err,
            JobError::NotRunning {
                status: JobStatus::Pending
            }
        );
    }

    #[test]
    fn record_enforces_stage_order() {
        let mut job = job();
        job.start();
        job.record(result(0, "a", json!({})), 12).unwrap();
        let err = job.record(result(2, "c", json!({})), 37).unwrap_err();
        assert_eq!(err, JobError::OutOfOrder { expected: 1, got: 2 });
        assert_eq!(job.current_stage(), 1);
    }

    #[test]
    fn completion_never_decreases() {
        let mut job = job();
        job.start();
        job.record(result(0, "a", json!({})), 50).unwrap();
        job.record(result(1, "b", json!({})), 25).unwrap();
        assert_eq!(job.completion(), 50);
    }

    #[test]
    fn running_result_folds_results_by_key() {
        let mut job = job();
        job.start();
        job.record(result(0, "a", json!({"items": [1]})), 50).unwrap();
        job.record(result(1, "b", json!({"items": [2, 3]})), 100).unwrap();
        let running = job.running_result();
        assert_eq!(running["a"], json!({"items": [1]}));
        assert_eq!(running["b"], json!({"items": [2, 3]}));
        assert_eq!(running.len(), 2);
    }

    #[test]
    fn failed_job_stays_failed() {
        let mut job = job();
        job.start();
        assert!(matches!(job.fail(), Transition::Moved(..)));
        assert!(matches!(job.complete(), Transition::Rejected { .. }));
        assert_eq!(job.status(), JobStatus::Failed);
    }

    #[test]
    fn summary_from_job() {
        let mut job = job();
        job.start();
        job.record(result(0, "a", json!({})), 12).unwrap();
        job.note_degraded(StageDiagnostic {
            stage_index: 0,
            stage_key: "a",
            reason: "timeout".into(),
        });
        job.complete();
        let summary = JobSummary::from_job(&job);
        assert_eq!(summary.job_id, job.id());
        assert_eq!(summary.requester, "user:u1");
        assert_eq!(summary.status, JobStatus::Complete);
        assert_eq!(summary.stages_recorded, 1);
        assert_eq!(summary.degraded_stages, vec!["a"]);
    }

    #[test]
    fn result_source_strings() {
        assert_eq!(ResultSource::parse("fallback"), Some(ResultSource::Fallback));
        assert_eq!(ResultSource::Parsed.as_str(), "parsed");
        assert_eq!(ResultSource::parse("x"), None);
    }
}
