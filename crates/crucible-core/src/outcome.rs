//! Per-test results, diagnostic messages, and bottom-up status aggregation.
//!
//! A [`TestResult`] records one execution of one test within a run. Results
//! are append-only in traversal order; the single permitted in-place change
//! is the `Wait` → terminal transition when a suspended test resumes, times
//! out, or is cancelled. Group- and suite-level status is never stored: it
//! is derived on demand by [`status_of`].

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::runnable::{RunnableKind, RunnableNode};

/// Outcome of one test execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pass,
    Fail,
    Skip,
    Omit,
    Error,
    Wait,
    Cancel,
}

impl ResultStatus {
    /// Whether this status is final for the test (a `Wait` is not)
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultStatus::Wait)
    }
}

/// Severity of a diagnostic message attached to a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Warning,
    Error,
}

/// A diagnostic message produced while a test executed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub level: MessageLevel,
    pub content: String,
}

impl Message {
    pub fn info(content: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Info,
            content: content.into(),
        }
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Warning,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Error,
            content: content.into(),
        }
    }
}

/// Direction of a captured request relative to the system under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDirection {
    Outgoing,
    Incoming,
}

/// A request/response exchange captured during a test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub direction: RequestDirection,
    pub verb: String,
    pub url: String,
    pub status: Option<u16>,
}

/// Outcome of one Test execution within a run.
///
/// Immutable once its status is terminal; a re-run of the same test in a
/// new run creates a new result rather than mutating this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Uuid,
    pub test_id: String,
    pub run_id: Uuid,
    pub session_id: Uuid,
    pub status: ResultStatus,
    pub message: Option<String>,
    pub messages: Vec<Message>,
    pub inputs: IndexMap<String, Value>,
    pub outputs: IndexMap<String, Value>,
    pub requests: Vec<RequestRecord>,
    pub created_at: DateTime<Utc>,
}

impl TestResult {
    pub fn new(
        test_id: impl Into<String>,
        run_id: Uuid,
        session_id: Uuid,
        status: ResultStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            test_id: test_id.into(),
            run_id,
            session_id,
            status,
            message: None,
            messages: Vec::new(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            requests: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Derived status of a Group or Suite over the results of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    Pass,
    Fail,
    Error,
    Wait,
    Skip,
    /// No descendant test has produced a result yet
    Pending,
}

// Precedence rank, highest wins: error > fail > wait > skip/omit > pass.
fn severity(status: ResultStatus) -> u8 {
    match status {
        ResultStatus::Error => 4,
        ResultStatus::Fail => 3,
        ResultStatus::Wait => 2,
        ResultStatus::Skip | ResultStatus::Omit | ResultStatus::Cancel => 1,
        ResultStatus::Pass => 0,
    }
}

fn collect_tests<'a>(node: &'a RunnableNode, optional: bool, out: &mut Vec<(&'a RunnableNode, bool)>) {
    let optional = optional || node.optional;
    match node.kind {
        RunnableKind::Test => out.push((node, optional)),
        _ => {
            for child in &node.children {
                collect_tests(child, optional, out);
            }
        }
    }
}

/// Roll up per-test results into the aggregate status of `node`.
///
/// Only required (non-optional) descendants can downgrade the aggregate;
/// optional descendants' failures are reported individually but never
/// propagate. Tests with no result in this run are ignored, so a partial
/// run aggregates over what actually executed. A node none of whose tests
/// have run yet is [`AggregateStatus::Pending`].
pub fn status_of(node: &RunnableNode, results: &[TestResult]) -> AggregateStatus {
    let mut tests = Vec::new();
    collect_tests(node, false, &mut tests);

    let mut required_max: Option<u8> = None;
    let mut saw_any = false;
    for (test, optional) in &tests {
        let Some(result) = results.iter().rev().find(|r| r.test_id == test.id) else {
            continue;
        };
        saw_any = true;
        if *optional {
            continue;
        }
        let rank = severity(result.status);
        required_max = Some(required_max.map_or(rank, |m| m.max(rank)));
    }

    if !saw_any {
        return AggregateStatus::Pending;
    }
    match required_max {
        Some(4) => AggregateStatus::Error,
        Some(3) => AggregateStatus::Fail,
        Some(2) => AggregateStatus::Wait,
        Some(1) => AggregateStatus::Skip,
        // Only optional tests produced results, or every required test passed
        Some(0) | None => AggregateStatus::Pass,
        Some(_) => unreachable!("severity ranks are 0..=4"),
    }
}
