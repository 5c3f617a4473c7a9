//! Persistence seam for sessions and runs.
//!
//! The engine only needs a record store with read-your-own-writes within
//! the process; durable backends are external collaborators implementing
//! [`RunRepository`]. The bundled [`InMemoryRepository`] backs the engine
//! by default and the test suites.

use std::sync::Arc;

use dashmap::DashMap;
use uuid::Uuid;

use crate::run::RunHandle;
use crate::session::TestSession;

/// Record store for sessions and run handles.
pub trait RunRepository: Send + Sync {
    fn insert_session(&self, session: Arc<TestSession>);
    fn session(&self, session_id: Uuid) -> Option<Arc<TestSession>>;
    fn remove_session(&self, session_id: Uuid) -> Option<Arc<TestSession>>;

    fn insert_run(&self, run_id: Uuid, handle: Arc<RunHandle>);
    fn run(&self, run_id: Uuid) -> Option<Arc<RunHandle>>;
}

/// DashMap-backed repository used by default.
#[derive(Default)]
pub struct InMemoryRepository {
    sessions: DashMap<Uuid, Arc<TestSession>>,
    runs: DashMap<Uuid, Arc<RunHandle>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunRepository for InMemoryRepository {
    fn insert_session(&self, session: Arc<TestSession>) {
        self.sessions.insert(session.id, session);
    }

    fn session(&self, session_id: Uuid) -> Option<Arc<TestSession>> {
        self.sessions.get(&session_id).map(|r| Arc::clone(&r))
    }

    fn remove_session(&self, session_id: Uuid) -> Option<Arc<TestSession>> {
        self.sessions.remove(&session_id).map(|(_, s)| s)
    }

    fn insert_run(&self, run_id: Uuid, handle: Arc<RunHandle>) {
        self.runs.insert(run_id, handle);
    }

    fn run(&self, run_id: Uuid) -> Option<Arc<RunHandle>> {
        self.runs.get(&run_id).map(|r| Arc::clone(&r))
    }
}
