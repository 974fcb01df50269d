//! Per-job progress events, in the order the orchestrator emits them.

use serde::Serialize;
use serde_json::Value;

use crate::job::ResultSource;

/// One progress event. A job emits zero or more `Data` events and then
/// exactly one terminal event (`Error` or `Complete`).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageEvent {
    Data {
        job_id: String,
        stage_index: usize,
        stage_key: String,
        value: Value,
        source: ResultSource,
        completion: u8,
    },
    Error {
        job_id: String,
        stage_index: usize,
        message: String,
    },
    Complete {
        job_id: String,
        stage_index: usize,
        completion: u8,
    },
}

impl StageEvent {
    /// Name used for the SSE `event:` field.
    pub fn event_name(&self) -> &'static str {
        match self {
            StageEvent::Data { .. } => "data",
            StageEvent::Error { .. } => "error",
            StageEvent::Complete { .. } => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StageEvent::Data { .. })
    }

    pub fn job_id(&self) -> &str {
        match self {
            StageEvent::Data { job_id, .. }
            | StageEvent::Error { job_id, .. }
            | StageEvent::Complete { job_id, .. } => job_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn data_event_wire_format() {
        let event = StageEvent::Data {
            job_id: "j1".into(),
            stage_index: 3,
            stage_key: "quick_wins".into(),
            value: json!({"items": [1, 2]}),
            source: ResultSource::Parsed,
            completion: 50,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "data",
                "job_id": "j1",
                "stage_index": 3,
                "stage_key": "quick_wins",
                "value": {"items": [1, 2]},
                "source": "parsed",
                "completion": 50
            })
        );
        assert_eq!(event.event_name(), "data");
        assert!(!event.is_terminal());
    }

    #[test]
    fn terminal_events() {
        let error = StageEvent::Error {
            job_id: "j1".into(),
            stage_index: 0,
            message: "timed out".into(),
        };
        let complete = StageEvent::Complete {
            job_id: "j1".into(),
            stage_index: 7,
            completion: 100,
        };
        assert!(error.is_terminal());
        assert!(complete.is_terminal());
        assert_eq!(
            serde_json::to_value(&complete).unwrap(),
            json!({"type": "complete", "job_id": "j1", "stage_index": 7, "completion": 100})
        );
        assert_eq!(serde_json::to_value(&error).unwrap()["type"], "error");
        assert_eq!(error.job_id(), "j1");
    }
}
