//! Wait registry: correlating suspended tests with external callbacks.
//!
//! The resolving event usually arrives on a different connection than the
//! one that started the run, so an opaque identifier is the only context
//! the two call paths share. Tokens are removed exactly once, whether by
//! resolution, cancellation, or the timeout sweep, which is what makes
//! concurrent resolution attempts first-resolver-wins.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::error::CrucibleError;
use crate::result::Result;

/// Correlation record for one suspended test
#[derive(Debug, Clone)]
pub struct WaitToken {
    pub identifier: String,
    pub run_id: Uuid,
    pub test_id: String,
    /// Operator-facing instruction surfaced while the run is parked
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub timeout: Option<Duration>,
}

impl WaitToken {
    pub fn new(
        identifier: impl Into<String>,
        run_id: Uuid,
        test_id: impl Into<String>,
        message: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            run_id,
            test_id: test_id.into(),
            message: message.into(),
            created_at: Utc::now(),
            timeout,
        }
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        match self.timeout {
            Some(timeout) => match chrono::Duration::from_std(timeout) {
                Ok(timeout) => now - self.created_at > timeout,
                Err(_) => false,
            },
            None => false,
        }
    }
}

/// Table of outstanding waits, shared by every concurrent run.
#[derive(Default)]
pub struct WaitRegistry {
    tokens: DashMap<String, WaitToken>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token; the identifier must not already be outstanding.
    pub fn begin(&self, token: WaitToken) -> Result<()> {
        match self.tokens.entry(token.identifier.clone()) {
            Entry::Occupied(_) => Err(CrucibleError::duplicate_wait_identifier(&token.identifier)),
            Entry::Vacant(entry) => {
                tracing::debug!(
                    identifier = %token.identifier,
                    run_id = %token.run_id,
                    test_id = %token.test_id,
                    "wait registered"
                );
                entry.insert(token);
                Ok(())
            }
        }
    }

    /// Remove and return the token for `identifier`. One-shot: of any
    /// number of concurrent callers, exactly one succeeds.
    pub fn take(&self, identifier: &str) -> Result<WaitToken> {
        self.tokens
            .remove(identifier)
            .map(|(_, token)| token)
            .ok_or_else(|| CrucibleError::unknown_wait_identifier(identifier))
    }

    /// Remove the outstanding token for a run, if any (cancellation path).
    pub fn take_for_run(&self, run_id: Uuid) -> Option<WaitToken> {
        let identifier = self
            .tokens
            .iter()
            .find(|entry| entry.value().run_id == run_id)
            .map(|entry| entry.key().clone())?;
        self.tokens.remove(&identifier).map(|(_, token)| token)
    }

    /// Remove and return every token past its timeout.
    pub fn drain_overdue(&self, now: DateTime<Utc>) -> Vec<WaitToken> {
        let overdue: Vec<String> = self
            .tokens
            .iter()
            .filter(|entry| entry.value().is_overdue(now))
            .map(|entry| entry.key().clone())
            .collect();

        overdue
            .into_iter()
            .filter_map(|identifier| {
                // remove_if re-checks under the shard lock; a concurrent
                // resolve_wait may already have taken the token
                self.tokens
                    .remove_if(&identifier, |_, token| token.is_overdue(now))
                    .map(|(_, token)| token)
            })
            .collect()
    }

    pub fn outstanding(&self) -> usize {
        self.tokens.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(identifier: &str, timeout: Option<Duration>) -> WaitToken {
        WaitToken::new(identifier, Uuid::new_v4(), "test-1", "visit the launch URL", timeout)
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let registry = WaitRegistry::new();
        registry.begin(token("uid-1", None)).unwrap();

        let err = registry.begin(token("uid-1", None)).unwrap_err();
        assert!(matches!(err, CrucibleError::DuplicateWaitIdentifier { .. }));
        assert_eq!(registry.outstanding(), 1);
    }

    #[test]
    fn test_take_is_one_shot() {
        let registry = WaitRegistry::new();
        registry.begin(token("uid-1", None)).unwrap();

        assert!(registry.take("uid-1").is_ok());
        let err = registry.take("uid-1").unwrap_err();
        assert!(matches!(err, CrucibleError::UnknownWaitIdentifier { .. }));
    }

    #[test]
    fn test_concurrent_take_single_winner() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(WaitRegistry::new());
        registry.begin(token("uid-1", None)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.take("uid-1").is_ok())
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn test_take_for_run() {
        let registry = WaitRegistry::new();
        let run_id = Uuid::new_v4();
        registry
            .begin(WaitToken::new("uid-1", run_id, "t", "msg", None))
            .unwrap();

        assert!(registry.take_for_run(run_id).is_some());
        assert!(registry.take_for_run(run_id).is_none());
        assert_eq!(registry.outstanding(), 0);
    }

    #[test]
    fn test_drain_overdue_only_takes_expired() {
        let registry = WaitRegistry::new();
        registry
            .begin(token("expired", Some(Duration::from_secs(1))))
            .unwrap();
        registry.begin(token("fresh", None)).unwrap();

        let later = Utc::now() + chrono::Duration::seconds(5);
        let drained = registry.drain_overdue(later);

        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].identifier, "expired");
        assert_eq!(registry.outstanding(), 1);
    }
}
