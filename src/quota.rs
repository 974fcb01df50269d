//! Allowance accounting consulted before a job starts.
//!
//! The pipeline only depends on [`QuotaGate`]; [`InMemoryQuotaGate`] is the
//! implementation the server ships with.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::Requester;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("no roadmap allowance left for {requester}")]
    Exhausted { requester: String },

    #[error("quota gate unavailable: {0}")]
    Unavailable(String),
}

/// Proof that one unit of allowance was debited for a requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaToken {
    pub requester: Requester,
    /// Units left after this debit.
    pub remaining: u32,
    pub debited_at: DateTime<Utc>,
}

/// Authorizes and debits one unit of allowance, atomically, per job attempt.
pub trait QuotaGate: Send + Sync {
    fn authorize_and_debit(&self, requester: &Requester) -> Result<QuotaToken, QuotaError>;

    /// Units currently left for `requester`, without debiting.
    fn remaining(&self, requester: &Requester) -> Result<u32, QuotaError>;
}

/// Per-requester allowance held in memory. Requesters seen for the first time
/// start with the allowance for their kind.
pub struct InMemoryQuotaGate {
    user_allowance: u32,
    trial_allowance: u32,
    remaining: Mutex<HashMap<Requester, u32>>,
}

impl InMemoryQuotaGate {
    pub fn new(user_allowance: u32, trial_allowance: u32) -> Self {
        Self {
            user_allowance,
            trial_allowance,
            remaining: Mutex::new(HashMap::new()),
        }
    }

    /// Set the allowance for one requester explicitly.
    pub fn grant(&self, requester: Requester, units: u32) -> Result<(), QuotaError> {
        let mut remaining = self
            .remaining
            .lock()
            .map_err(|_| QuotaError::Unavailable("quota lock poisoned".into()))?;
        remaining.insert(requester, units);
        Ok(())
    }

    fn initial(&self, requester: &Requester) -> u32 {
        if requester.is_trial() {
            self.trial_allowance
        } else {
            self.user_allowance
        }
    }
}

impl QuotaGate for InMemoryQuotaGate {
    fn authorize_and_debit(&self, requester: &Requester) -> Result<QuotaToken, QuotaError> {
        // Check and debit happen under one lock so racing submissions from the
        // same requester cannot both spend the last unit.
        let mut remaining = self
            .remaining
            .lock()
            .map_err(|_| QuotaError::Unavailable("quota lock poisoned".into()))?;
        let initial = self.initial(requester);
        let units = remaining.entry(requester.clone()).or_insert(initial);
        if *units == 0 {
            return Err(QuotaError::Exhausted {
                requester: requester.to_string(),
            });
        }
        *units -= 1;
        Ok(QuotaToken {
            requester: requester.clone(),
            remaining: *units,
            debited_at: Utc::now(),
        })
    }

    fn remaining(&self, requester: &Requester) -> Result<u32, QuotaError> {
        let remaining = self
            .remaining
            .lock()
            .map_err(|_| QuotaError::Unavailable("quota lock poisoned".into()))?;
        Ok(remaining
            .get(requester)
            .copied()
            .unwrap_or_else(|| self.initial(requester)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};

    #[test]
    fn debits_until_exhausted() {
        let gate = InMemoryQuotaGate::new(2, 1);
        let user = Requester::User("u1".into());
        assert_eq!(gate.authorize_and_debit(&user).unwrap().remaining, 1);
        assert_eq!(gate.authorize_and_debit(&user).unwrap().remaining, 0);
        assert_eq!(
            gate.authorize_and_debit(&user),
            Err(QuotaError::Exhausted {
                requester: "user:u1".into()
            })
        );
    }

    #[test]
    fn trial_and_user_allowances_differ() {
        let gate = InMemoryQuotaGate::new(5, 1);
        assert_eq!(gate.remaining(&Requester::User("a".into())).unwrap(), 5);
        assert_eq!(gate.remaining(&Requester::Trial("a".into())).unwrap(), 1);
    }

    #[test]
    fn requesters_are_accounted_separately() {
        let gate = InMemoryQuotaGate::new(1, 1);
        assert!(gate.authorize_and_debit(&Requester::User("a".into())).is_ok());
        assert!(gate.authorize_and_debit(&Requester::User("b".into())).is_ok());
        assert!(gate.authorize_and_debit(&Requester::User("a".into())).is_err());
    }

    #[test]
    fn concurrent_requests_spend_the_last_unit_once() {
        let gate = Arc::new(InMemoryQuotaGate::new(5, 1));
        let requester = Requester::User("racer".into());
        gate.grant(requester.clone(), 1).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let barrier = Arc::clone(&barrier);
                let requester = requester.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    gate.authorize_and_debit(&requester)
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            results.iter().filter(|r| matches!(r, Err(QuotaError::Exhausted { .. }))).count(),
            1
        );
        assert_eq!(gate.remaining(&requester).unwrap(), 0);
    }
}
