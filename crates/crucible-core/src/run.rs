//! Run state: one invocation of a runnable within a session.
//!
//! A [`TestRun`] is mutated only by the coordinator holding its
//! [`RunHandle`] mutex. Suspension saves a [`Continuation`] (which test
//! index to resume at and the outputs accumulated so far) so any worker
//! can continue the traversal later.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::outcome::TestResult;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Queued,
    Running,
    Waiting,
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Cancelled)
    }
}

/// Saved traversal position for a suspended run
#[derive(Debug, Clone)]
pub(crate) struct Continuation {
    /// Index of the waiting test in the flattened traversal order
    pub resume_index: usize,
    /// Index of the waiting test's entry in `results`
    pub result_index: usize,
    /// Outputs accumulated by tests before the suspension point
    pub outputs: IndexMap<String, Value>,
    pub wait_identifier: String,
}

/// One invocation of a Suite, Group, or Test within a session.
#[derive(Debug, Clone)]
pub struct TestRun {
    pub id: Uuid,
    pub session_id: Uuid,
    pub runnable_id: String,
    pub status: RunStatus,
    /// Results in exact declaration order of the tests as traversed,
    /// stable across suspend/resume boundaries
    pub results: Vec<TestResult>,
    pub created_at: DateTime<Utc>,
    pub(crate) continuation: Option<Continuation>,
}

impl TestRun {
    pub fn new(session_id: Uuid, runnable_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            runnable_id: runnable_id.into(),
            status: RunStatus::Queued,
            results: Vec::new(),
            created_at: Utc::now(),
            continuation: None,
        }
    }

    /// Identifier of the outstanding wait, if the run is suspended
    pub fn wait_identifier(&self) -> Option<&str> {
        self.continuation
            .as_ref()
            .map(|c| c.wait_identifier.as_str())
    }
}

/// Shared ownership wrapper for a run: the mutex serializes all
/// traversal/resume/cancel access, the flag lets cancellation be
/// requested without holding the lock.
pub struct RunHandle {
    run: Mutex<TestRun>,
    cancel_requested: AtomicBool,
}

impl RunHandle {
    pub fn new(run: TestRun) -> Self {
        Self {
            run: Mutex::new(run),
            cancel_requested: AtomicBool::new(false),
        }
    }

    pub fn run(&self) -> &Mutex<TestRun> {
        &self.run
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Clone of the current run state
    pub async fn snapshot(&self) -> TestRun {
        self.run.lock().await.clone()
    }
}
