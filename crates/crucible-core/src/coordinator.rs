//! The execution coordinator: walks the effective tree, invokes test
//! procedures, and drives the run state machine including suspension,
//! resumption, timeout expiry, and cancellation.
//!
//! One run executes as a single logical sequence under its own mutex;
//! later tests may depend on earlier tests' outputs and scratch writes,
//! so tests within a run are never concurrent with each other. Runs in
//! different sessions proceed independently and only share the wait
//! registry and the scratch store.

use std::any::Any;
use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use indexmap::IndexMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::CrucibleError;
use crate::outcome::{self, AggregateStatus, Message, ResultStatus, TestResult};
use crate::procedure::{ExternalEvent, Outcome, TestContext};
use crate::repository::{InMemoryRepository, RunRepository};
use crate::requirements;
use crate::result::Result;
use crate::run::{Continuation, RunHandle, RunStatus, TestRun};
use crate::runnable::{BoundTest, RunnableIndex, SelectedOptions, TreeResolver};
use crate::scratch::{ScratchHandle, ScratchStore};
use crate::session::TestSession;
use crate::waits::{WaitRegistry, WaitToken};

/// The engine facade: session lifecycle, run execution, wait resolution,
/// cancellation, and reporting queries.
pub struct Engine {
    resolver: TreeResolver,
    repository: Arc<dyn RunRepository>,
    waits: WaitRegistry,
    scratch: Arc<ScratchStore>,
}

impl Engine {
    /// Engine over the given definition index with in-memory persistence
    pub fn new(index: Arc<RunnableIndex>) -> Self {
        Self::with_repository(index, Arc::new(InMemoryRepository::new()))
    }

    /// Engine with a caller-supplied persistence collaborator
    pub fn with_repository(index: Arc<RunnableIndex>, repository: Arc<dyn RunRepository>) -> Self {
        Self {
            resolver: TreeResolver::new(index),
            repository,
            waits: WaitRegistry::new(),
            scratch: Arc::new(ScratchStore::new()),
        }
    }

    pub fn scratch(&self) -> &Arc<ScratchStore> {
        &self.scratch
    }

    /// Number of currently outstanding waits (reporting/diagnostics)
    pub fn outstanding_waits(&self) -> usize {
        self.waits.outstanding()
    }

    /// Start testing a suite under a concrete option selection.
    ///
    /// The selection is validated (and defaults applied) up front, so a
    /// session always carries a resolvable option set.
    pub fn create_session(
        &self,
        suite_id: &str,
        selected_options: &SelectedOptions,
    ) -> Result<Arc<TestSession>> {
        let tree = self.resolver.resolve(suite_id, selected_options)?;
        let session = Arc::new(TestSession::new(suite_id, tree.selection.clone()));
        self.repository.insert_session(Arc::clone(&session));
        tracing::info!(session_id = %session.id, suite_id, "session created");
        Ok(session)
    }

    pub fn session(&self, session_id: Uuid) -> Option<Arc<TestSession>> {
        self.repository.session(session_id)
    }

    /// Destroy a session and its scratch namespace
    pub fn close_session(&self, session_id: Uuid) -> Result<()> {
        let session = self
            .repository
            .remove_session(session_id)
            .ok_or(CrucibleError::SessionNotFound { session_id })?;
        self.scratch.clear(session.id);
        tracing::info!(%session_id, "session closed");
        Ok(())
    }

    /// Requirement identifiers reachable through the tests included by
    /// the selection
    pub fn coverage(
        &self,
        suite_id: &str,
        selected_options: &SelectedOptions,
    ) -> Result<BTreeSet<String>> {
        let tree = self.resolver.resolve(suite_id, selected_options)?;
        Ok(requirements::coverage(&tree))
    }

    /// Execute a Suite, Group, or single Test within a session.
    ///
    /// Returns once the traversal completes, suspends on a wait, or is
    /// cancelled; the returned snapshot describes per-test outcomes so
    /// far. Only malformed requests (unknown target, missing inputs, bad
    /// option) reject the run before any test executes.
    pub async fn run(
        &self,
        session_id: Uuid,
        runnable_id: &str,
        provided_inputs: IndexMap<String, Value>,
    ) -> Result<TestRun> {
        let session = self
            .repository
            .session(session_id)
            .ok_or(CrucibleError::SessionNotFound { session_id })?;
        let tree = self
            .resolver
            .resolve(&session.suite_id, &session.selected_options)?;
        let target = tree
            .find(runnable_id)
            .ok_or_else(|| CrucibleError::runnable_not_found(runnable_id))?;
        if !target.user_runnable {
            return Err(CrucibleError::not_user_runnable(runnable_id));
        }
        let tests = target.bound_tests();

        // Exhaustive validation: collect every missing required input,
        // including those declared on the target and enclosing groups, so
        // the operator can fix the request in one round trip
        let mut available = session.inputs_snapshot().await;
        for (name, value) in &provided_inputs {
            available.insert(name.clone(), value.clone());
        }
        let missing = missing_required_inputs(&tests, &available);
        if !missing.is_empty() {
            return Err(CrucibleError::required_inputs_not_found(missing));
        }
        session.merge_inputs(provided_inputs).await;

        let run = TestRun::new(session_id, runnable_id);
        let run_id = run.id;
        let handle = Arc::new(RunHandle::new(run));
        self.repository.insert_run(run_id, Arc::clone(&handle));
        tracing::info!(%run_id, %session_id, runnable_id, tests = tests.len(), "run started");

        let mut guard = handle.run().lock().await;
        guard.status = RunStatus::Running;
        self.traverse(&mut guard, &handle, &session, &tests, 0, available, IndexMap::new())
            .await?;
        Ok(guard.clone())
    }

    /// Deliver an external event to the suspended test correlated with
    /// `identifier` and continue its run.
    ///
    /// One-shot: of concurrent resolution attempts for one identifier,
    /// exactly one succeeds; the rest fail with `UnknownWaitIdentifier`.
    pub async fn resolve_wait(&self, identifier: &str, event: ExternalEvent) -> Result<TestRun> {
        let token = self.waits.take(identifier)?;
        tracing::info!(identifier, run_id = %token.run_id, "wait resolved");
        self.resume_after_wait(token, Some(event)).await
    }

    /// Sweep overdue waits: each expired token's test is marked failed
    /// with a timeout diagnostic and its run resumes, so downstream tests
    /// still report. Returns the resumed runs.
    pub async fn expire_overdue(&self) -> Vec<TestRun> {
        let mut resumed = Vec::new();
        for token in self.waits.drain_overdue(Utc::now()) {
            tracing::warn!(
                identifier = %token.identifier,
                run_id = %token.run_id,
                "wait timed out"
            );
            match self.resume_after_wait(token, None).await {
                Ok(run) => resumed.push(run),
                Err(err) => tracing::warn!(error = %err, "timed-out run could not be resumed"),
            }
        }
        resumed
    }

    /// Cancel a run. Cooperative: an in-flight procedure finishes its
    /// current step; the coordinator stops at the next test boundary. A
    /// waiting run is cancelled immediately and its token removed.
    pub async fn cancel(&self, run_id: Uuid) -> Result<TestRun> {
        let handle = self
            .repository
            .run(run_id)
            .ok_or(CrucibleError::RunNotFound { run_id })?;
        handle.request_cancel();
        if let Some(token) = self.waits.take_for_run(run_id) {
            tracing::debug!(identifier = %token.identifier, "wait removed by cancellation");
        }

        let mut run = handle.run().lock().await;
        if !run.status.is_terminal() {
            if let Some(continuation) = run.continuation.take() {
                let result = &mut run.results[continuation.result_index];
                result.status = ResultStatus::Cancel;
                result.messages.push(Message::info("run cancelled while waiting"));
            }
            run.status = RunStatus::Cancelled;
        }
        tracing::info!(%run_id, "run cancelled");
        Ok(run.clone())
    }

    /// Ordered per-test results of a run
    pub async fn results(&self, run_id: Uuid) -> Result<Vec<TestResult>> {
        Ok(self.run_snapshot(run_id).await?.results)
    }

    /// Snapshot of a run's current state
    pub async fn run_snapshot(&self, run_id: Uuid) -> Result<TestRun> {
        let handle = self
            .repository
            .run(run_id)
            .ok_or(CrucibleError::RunNotFound { run_id })?;
        Ok(handle.snapshot().await)
    }

    /// Derived Group/Suite status over one run's results
    pub async fn aggregate_status(&self, run_id: Uuid, node_id: &str) -> Result<AggregateStatus> {
        let run = self.run_snapshot(run_id).await?;
        let session = self
            .repository
            .session(run.session_id)
            .ok_or(CrucibleError::SessionNotFound {
                session_id: run.session_id,
            })?;
        let tree = self
            .resolver
            .resolve(&session.suite_id, &session.selected_options)?;
        let node = tree
            .find(node_id)
            .ok_or_else(|| CrucibleError::runnable_not_found(node_id))?;
        Ok(outcome::status_of(node, &run.results))
    }

    /// Depth-first, declaration-order execution of `tests[start..]`.
    ///
    /// The caller holds the run lock; this never interleaves with another
    /// traversal of the same run.
    #[allow(clippy::too_many_arguments)]
    async fn traverse(
        &self,
        run: &mut TestRun,
        handle: &RunHandle,
        session: &TestSession,
        tests: &[BoundTest<'_>],
        start: usize,
        history: IndexMap<String, Value>,
        mut outputs: IndexMap<String, Value>,
    ) -> Result<()> {
        for index in start..tests.len() {
            let bound_test = &tests[index];
            let test = bound_test.test;
            if handle.cancel_requested() {
                run.status = RunStatus::Cancelled;
                run.continuation = None;
                tracing::info!(run_id = %run.id, "cancellation observed at test boundary");
                return Ok(());
            }

            let bound = bind_inputs(bound_test, &history, &outputs);
            let scratch = ScratchHandle::new(Arc::clone(&self.scratch), session.id);
            let mut ctx = TestContext::new(&test.id, run.id, session.id, bound, scratch);

            let invoked = match &test.procedure {
                Some(procedure) => {
                    AssertUnwindSafe(procedure.execute(&mut ctx))
                        .catch_unwind()
                        .await
                }
                None => Ok(Outcome::Omit),
            };

            let mut result = TestResult::new(&test.id, run.id, session.id, ResultStatus::Pass);
            let (inputs, test_outputs, messages, requests) = ctx.into_captures();
            result.inputs = inputs;
            result.messages = messages;
            result.requests = requests;

            // Outputs propagate to later tests regardless of outcome
            for (name, value) in &test_outputs {
                outputs.insert(name.clone(), value.clone());
            }
            result.outputs = test_outputs;

            let wait_request = match invoked {
                Err(panic) => {
                    let fault = panic_message(panic);
                    tracing::warn!(test_id = %test.id, fault, "procedure fault");
                    result.status = ResultStatus::Error;
                    result.messages.push(Message::error(fault.as_str()));
                    result.message = Some(fault);
                    None
                }
                Ok(Outcome::Pass) => None,
                Ok(Outcome::Fail(message)) => {
                    result.status = ResultStatus::Fail;
                    result.message = Some(message);
                    None
                }
                Ok(Outcome::Skip(reason)) => {
                    result.status = ResultStatus::Skip;
                    result.message = Some(reason);
                    None
                }
                Ok(Outcome::Omit) => {
                    result.status = ResultStatus::Omit;
                    None
                }
                Ok(Outcome::Wait(request)) => Some(request),
            };

            if let Some(request) = wait_request {
                let token = WaitToken::new(
                    &request.identifier,
                    run.id,
                    &test.id,
                    &request.message,
                    request.timeout,
                );
                if let Err(err) = self.waits.begin(token) {
                    // Structural error: surface synchronously and stop
                    // this run; other runs' waits are untouched
                    result.status = ResultStatus::Error;
                    result.messages.push(Message::error(err.to_string()));
                    result.message = Some(err.to_string());
                    run.results.push(result);
                    run.status = RunStatus::Cancelled;
                    run.continuation = None;
                    return Err(err);
                }
                result.status = ResultStatus::Wait;
                result.message = Some(request.message.clone());
                run.results.push(result);
                run.continuation = Some(Continuation {
                    resume_index: index,
                    result_index: run.results.len() - 1,
                    outputs: outputs.clone(),
                    wait_identifier: request.identifier.clone(),
                });
                run.status = RunStatus::Waiting;
                tracing::info!(
                    run_id = %run.id,
                    test_id = %test.id,
                    identifier = %request.identifier,
                    "run suspended"
                );
                return Ok(());
            }

            run.results.push(result);
        }

        run.status = RunStatus::Completed;
        run.continuation = None;
        // Outputs accumulate on the session so later runs can consume them
        session.merge_inputs(outputs).await;
        tracing::info!(run_id = %run.id, results = run.results.len(), "run completed");
        Ok(())
    }

    /// Continue a suspended run after its token was removed, either with
    /// a delivered event or (for the timeout path) with none.
    async fn resume_after_wait(
        &self,
        token: WaitToken,
        event: Option<ExternalEvent>,
    ) -> Result<TestRun> {
        let handle = self
            .repository
            .run(token.run_id)
            .ok_or(CrucibleError::RunNotFound { run_id: token.run_id })?;
        let mut run = handle.run().lock().await;

        // The token was already removed, so at most one resumer reaches
        // this point per identifier; a cancelled run has no continuation
        let Some(continuation) = run.continuation.take() else {
            return Err(CrucibleError::unknown_wait_identifier(&token.identifier));
        };
        if continuation.wait_identifier != token.identifier {
            run.continuation = Some(continuation);
            return Err(CrucibleError::unknown_wait_identifier(&token.identifier));
        }

        let session = self
            .repository
            .session(run.session_id)
            .ok_or(CrucibleError::SessionNotFound {
                session_id: run.session_id,
            })?;
        let tree = self
            .resolver
            .resolve(&session.suite_id, &session.selected_options)?;
        let tests = tree
            .tests_under(&run.runnable_id)
            .ok_or_else(|| CrucibleError::runnable_not_found(&run.runnable_id))?;
        let test = tests
            .get(continuation.resume_index)
            .map(|bound| bound.test)
            .ok_or_else(|| CrucibleError::runnable_not_found(&token.test_id))?;

        let mut outputs = continuation.outputs.clone();
        match event {
            Some(event) => {
                let prior_inputs = run.results[continuation.result_index].inputs.clone();
                let scratch = ScratchHandle::new(Arc::clone(&self.scratch), session.id);
                let mut ctx = TestContext::new(&test.id, run.id, session.id, prior_inputs, scratch);
                let invoked = match &test.procedure {
                    Some(procedure) => {
                        AssertUnwindSafe(procedure.resume(&mut ctx, event))
                            .catch_unwind()
                            .await
                    }
                    None => Ok(Outcome::Fail("no procedure bound".to_string())),
                };

                let (inputs, test_outputs, messages, requests) = ctx.into_captures();
                for (name, value) in &test_outputs {
                    outputs.insert(name.clone(), value.clone());
                }
                let result = &mut run.results[continuation.result_index];
                result.inputs = inputs;
                result.messages.extend(messages);
                result.requests.extend(requests);
                for (name, value) in test_outputs {
                    result.outputs.insert(name, value);
                }
                match invoked {
                    Err(panic) => {
                        let fault = panic_message(panic);
                        result.status = ResultStatus::Error;
                        result.messages.push(Message::error(fault.as_str()));
                        result.message = Some(fault);
                    }
                    Ok(Outcome::Pass) => {
                        result.status = ResultStatus::Pass;
                        result.message = None;
                    }
                    Ok(Outcome::Fail(message)) => {
                        result.status = ResultStatus::Fail;
                        result.message = Some(message);
                    }
                    Ok(Outcome::Skip(reason)) => {
                        result.status = ResultStatus::Skip;
                        result.message = Some(reason);
                    }
                    Ok(Outcome::Omit) => {
                        result.status = ResultStatus::Omit;
                        result.message = None;
                    }
                    Ok(Outcome::Wait(_)) => {
                        // One suspension per test; a second wait from a
                        // resumed continuation is a procedure bug
                        result.status = ResultStatus::Error;
                        result.message = Some("test requested a second wait".to_string());
                        result
                            .messages
                            .push(Message::error("nested waits are not supported"));
                    }
                }
            }
            None => {
                let result = &mut run.results[continuation.result_index];
                result.status = ResultStatus::Fail;
                result.message = Some(format!(
                    "timed out waiting for external request '{}'",
                    token.identifier
                ));
                result.messages.push(Message::error("wait timed out"));
            }
        }

        run.status = RunStatus::Running;
        let history = session.inputs_snapshot().await;
        self.traverse(
            &mut run,
            &handle,
            &session,
            &tests,
            continuation.resume_index + 1,
            history,
            outputs,
        )
        .await?;
        Ok(run.clone())
    }
}

/// Periodic timeout sweep driving [`Engine::expire_overdue`].
pub fn spawn_expiry_sweep(engine: Arc<Engine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let resumed = engine.expire_overdue().await;
            if !resumed.is_empty() {
                tracing::debug!(count = resumed.len(), "resumed timed-out runs");
            }
        }
    })
}

fn bind_inputs(
    test: &BoundTest<'_>,
    history: &IndexMap<String, Value>,
    outputs: &IndexMap<String, Value>,
) -> IndexMap<String, Value> {
    let mut bound = IndexMap::new();
    for def in &test.inputs {
        // Outputs from earlier tests in this run are freshest, then the
        // session history (which includes directly provided values)
        let value = outputs
            .get(&def.name)
            .or_else(|| history.get(&def.name))
            .cloned()
            .or_else(|| def.default.clone());
        if let Some(value) = value {
            bound.insert(def.name.clone(), value);
        }
    }
    bound
}

fn missing_required_inputs(
    tests: &[BoundTest<'_>],
    available: &IndexMap<String, Value>,
) -> Vec<String> {
    let mut produced: HashSet<&str> = HashSet::new();
    let mut missing: Vec<String> = Vec::new();
    for test in tests {
        for def in &test.inputs {
            if def.optional || def.default.is_some() {
                continue;
            }
            if available.contains_key(&def.name) || produced.contains(def.name.as_str()) {
                continue;
            }
            if !missing.contains(&def.name) {
                missing.push(def.name.clone());
            }
        }
        for output in &test.test.outputs {
            produced.insert(output.name.as_str());
        }
    }
    missing
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "procedure panicked".to_string()
    }
}
