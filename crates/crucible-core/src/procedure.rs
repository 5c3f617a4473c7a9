//! The polymorphic test capability: what a Test actually does.
//!
//! The engine never interprets wire-protocol semantics; it invokes an
//! opaque [`TestProcedure`] with a bound [`TestContext`] and records the
//! returned [`Outcome`]. A procedure that needs an out-of-band event
//! returns [`Outcome::Wait`]; the engine parks the run and later calls
//! [`TestProcedure::resume`] with the delivered [`ExternalEvent`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use uuid::Uuid;

use crate::outcome::{Message, RequestRecord};
use crate::scratch::ScratchHandle;

/// Request to suspend the current test until an external callback arrives
#[derive(Debug, Clone)]
pub struct WaitRequest {
    /// Correlation identifier the external callback must present.
    /// Must be unique among currently outstanding waits.
    pub identifier: String,
    /// Operator-facing instruction (e.g. a URL the tester must visit)
    pub message: String,
    pub timeout: Option<Duration>,
}

impl WaitRequest {
    pub fn new(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            message: message.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Tagged outcome a procedure reports for one test
#[derive(Debug, Clone)]
pub enum Outcome {
    Pass,
    Fail(String),
    Skip(String),
    Omit,
    Wait(WaitRequest),
}

/// An out-of-band event delivered to a suspended test, typically the
/// captured inbound request from the system under test
#[derive(Debug, Clone)]
pub struct ExternalEvent {
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl ExternalEvent {
    pub fn new(payload: Value) -> Self {
        Self {
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Execution context bound to one test invocation: resolved inputs, an
/// output recorder, scratch access, and diagnostic capture.
pub struct TestContext {
    test_id: String,
    run_id: Uuid,
    session_id: Uuid,
    inputs: IndexMap<String, Value>,
    outputs: IndexMap<String, Value>,
    messages: Vec<Message>,
    requests: Vec<RequestRecord>,
    scratch: ScratchHandle,
}

impl TestContext {
    pub(crate) fn new(
        test_id: impl Into<String>,
        run_id: Uuid,
        session_id: Uuid,
        inputs: IndexMap<String, Value>,
        scratch: ScratchHandle,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            run_id,
            session_id,
            inputs,
            outputs: IndexMap::new(),
            messages: Vec::new(),
            requests: Vec::new(),
            scratch,
        }
    }

    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Bound input value by declared name
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    /// Bound input as a string, if it is one
    pub fn input_str(&self, name: &str) -> Option<&str> {
        self.inputs.get(name).and_then(Value::as_str)
    }

    /// Record an output for propagation to later tests in the run
    pub fn output(&mut self, name: impl Into<String>, value: Value) {
        self.outputs.insert(name.into(), value);
    }

    /// Attach an info-level diagnostic message
    pub fn info(&mut self, content: impl Into<String>) {
        self.messages.push(Message::info(content));
    }

    /// Attach a warning-level diagnostic message
    pub fn warning(&mut self, content: impl Into<String>) {
        self.messages.push(Message::warning(content));
    }

    /// Attach an error-level diagnostic message
    pub fn error(&mut self, content: impl Into<String>) {
        self.messages.push(Message::error(content));
    }

    /// Capture a request/response exchange performed by this test
    pub fn record_request(&mut self, request: RequestRecord) {
        self.requests.push(request);
    }

    /// Session-scoped scratch storage
    pub fn scratch(&self) -> &ScratchHandle {
        &self.scratch
    }

    pub(crate) fn into_captures(
        self,
    ) -> (
        IndexMap<String, Value>,
        IndexMap<String, Value>,
        Vec<Message>,
        Vec<RequestRecord>,
    ) {
        (self.inputs, self.outputs, self.messages, self.requests)
    }
}

/// The opaque check a Test performs.
///
/// `execute` runs the test; `resume` continues a test that returned
/// [`Outcome::Wait`] once its external event arrives. Procedures that
/// never wait keep the default `resume`.
#[async_trait]
pub trait TestProcedure: Send + Sync {
    async fn execute(&self, ctx: &mut TestContext) -> Outcome;

    async fn resume(&self, _ctx: &mut TestContext, _event: ExternalEvent) -> Outcome {
        Outcome::Fail("test does not handle external events".to_string())
    }
}

type ExecuteFn = dyn Fn(&mut TestContext) -> Outcome + Send + Sync;
type ResumeFn = dyn Fn(&mut TestContext, ExternalEvent) -> Outcome + Send + Sync;

/// Closure-backed procedure, convenient for test kits whose checks are
/// synchronous and for engine tests.
pub struct FnProcedure {
    execute: Box<ExecuteFn>,
    resume: Option<Box<ResumeFn>>,
}

impl FnProcedure {
    pub fn new(execute: impl Fn(&mut TestContext) -> Outcome + Send + Sync + 'static) -> Self {
        Self {
            execute: Box::new(execute),
            resume: None,
        }
    }

    pub fn with_resume(
        mut self,
        resume: impl Fn(&mut TestContext, ExternalEvent) -> Outcome + Send + Sync + 'static,
    ) -> Self {
        self.resume = Some(Box::new(resume));
        self
    }
}

#[async_trait]
impl TestProcedure for FnProcedure {
    async fn execute(&self, ctx: &mut TestContext) -> Outcome {
        (self.execute)(ctx)
    }

    async fn resume(&self, ctx: &mut TestContext, event: ExternalEvent) -> Outcome {
        match &self.resume {
            Some(resume) => resume(ctx, event),
            None => Outcome::Fail("test does not handle external events".to_string()),
        }
    }
}
