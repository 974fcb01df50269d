use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a roadmap job.
///
/// Flows one way: `Pending → Running → (Complete | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "complete" => Some(JobStatus::Complete),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Position in the lifecycle. Persisted status only ever moves to a
    /// higher rank, which keeps out-of-order writes from regressing it.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Running => 1,
            JobStatus::Complete | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 2
    }
}

/// Result of asking to move a job to a new status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The job moved from the first status to the second.
    Moved(JobStatus, JobStatus),
    /// The move is not allowed; the job keeps its current status.
    Rejected { from: JobStatus, to: JobStatus },
}

/// Validates status changes for a job.
pub struct StateMachine;

impl StateMachine {
    /// Whether `from → to` is a legal lifecycle step.
    ///
    /// - `Pending` may only start running.
    /// - `Running` may only finish, either way.
    /// - Terminal statuses never change.
    pub fn allows(from: JobStatus, to: JobStatus) -> bool {
        matches!(
            (from, to),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Complete)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }

    /// Compute the transition for `current → to`, updating `current` when allowed.
    pub fn next(current: &mut JobStatus, to: JobStatus) -> Transition {
        let from = *current;
        if Self::allows(from, to) {
            *current = to;
            Transition::Moved(from, to)
        } else {
            Transition::Rejected { from, to }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_walks_all_statuses() {
        let mut status = JobStatus::Pending;
        assert_eq!(
            StateMachine::next(&mut status, JobStatus::Running),
            Transition::Moved(JobStatus::Pending, JobStatus::Running)
        );
        assert_eq!(
            StateMachine::next(&mut status, JobStatus::Complete),
            Transition::Moved(JobStatus::Running, JobStatus::Complete)
        );
        assert_eq!(status, JobStatus::Complete);
    }

    #[test]
    fn terminal_statuses_never_change() {
        for terminal in [JobStatus::Complete, JobStatus::Failed] {
            for to in [
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Complete,
                JobStatus::Failed,
            ] {
                let mut status = terminal;
                let t = StateMachine::next(&mut status, to);
                assert!(matches!(t, Transition::Rejected { .. }));
                assert_eq!(status, terminal);
            }
        }
    }

    #[test]
    fn pending_cannot_skip_running() {
        let mut status = JobStatus::Pending;
        assert!(matches!(
            StateMachine::next(&mut status, JobStatus::Complete),
            Transition::Rejected { .. }
        ));
        assert!(matches!(
            StateMachine::next(&mut status, JobStatus::Failed),
            Transition::Rejected { .. }
        ));
        assert_eq!(status, JobStatus::Pending);
    }

    #[test]
    fn rank_orders_lifecycle() {
        assert!(JobStatus::Pending.rank() < JobStatus::Running.rank());
        assert!(JobStatus::Running.rank() < JobStatus::Complete.rank());
        assert_eq!(JobStatus::Complete.rank(), JobStatus::Failed.rank());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }

    #[test]
    fn status_string_roundtrip() {
        for s in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Complete,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(s.as_str()), Some(s));
            assert_eq!(s.to_string(), s.as_str());
        }
        assert_eq!(JobStatus::parse("done"), None);
        assert_eq!(serde_json::to_string(&JobStatus::Complete).unwrap(), r#""complete""#);
    }
}
