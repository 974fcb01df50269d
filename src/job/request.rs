use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_TEXT_CHARS: usize = 4_000;
const MAX_CLASSIFIER_CHARS: usize = 200;

/// Who asked for a roadmap. Quota is accounted per requester.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Requester {
    /// An authenticated account.
    User(String),
    /// An anonymous trial visitor.
    Trial(String),
}

impl Requester {
    /// Parse the `user:<id>` / `trial:<id>` form used in storage and the CLI.
    pub fn parse(s: &str) -> Option<Self> {
        let (kind, id) = s.split_once(':')?;
        let id = id.trim();
        if id.is_empty() {
            return None;
        }
        match kind {
            "user" => Some(Requester::User(id.to_string())),
            "trial" => Some(Requester::Trial(id.to_string())),
            _ => None,
        }
    }

    pub fn is_trial(&self) -> bool {
        matches!(self, Requester::Trial(_))
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requester::User(id) => write!(f, "user:{id}"),
            Requester::Trial(id) => write!(f, "trial:{id}"),
        }
    }
}

/// Immutable input to one roadmap job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub goals: String,
    pub challenges: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub experience_level: Option<String>,
    #[serde(default)]
    pub urgency: Option<String>,
    #[serde(default)]
    pub budget: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} is longer than {max} characters")]
    TooLong { field: &'static str, max: usize },
}

impl GenerationRequest {
    pub fn new(goals: impl Into<String>, challenges: impl Into<String>) -> Self {
        Self {
            goals: goals.into(),
            challenges: challenges.into(),
            industry: None,
            experience_level: None,
            urgency: None,
            budget: None,
        }
    }

    /// Reject blank or oversized input before any allowance is spent.
    pub fn validate(&self) -> Result<(), RequestError> {
        for (field, value) in [("goals", &self.goals), ("challenges", &self.challenges)] {
            if value.trim().is_empty() {
                return Err(RequestError::Empty { field });
            }
            if value.chars().count() > MAX_TEXT_CHARS {
                return Err(RequestError::TooLong {
                    field,
                    max: MAX_TEXT_CHARS,
                });
            }
        }

        let optional = [
            ("industry", &self.industry),
            ("experience_level", &self.experience_level),
            ("urgency", &self.urgency),
            ("budget", &self.budget),
        ];
        for (field, value) in optional {
            if value
                .as_ref()
                .is_some_and(|v| v.chars().count() > MAX_CLASSIFIER_CHARS)
            {
                return Err(RequestError::TooLong {
                    field,
                    max: MAX_CLASSIFIER_CHARS,
                });
            }
        }
        Ok(())
    }
}
