//! Test sessions: a suite bound to a concrete option selection.
//!
//! A session accumulates input values across runs (provided inputs and
//! test outputs both land in the history) and owns one scratch namespace.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::runnable::SelectedOptions;

/// A binding of a suite to a selection of suite options, owning the
/// accumulated input history for its runs.
pub struct TestSession {
    pub id: Uuid,
    pub suite_id: String,
    /// Selection after defaults were applied at creation
    pub selected_options: SelectedOptions,
    pub created_at: DateTime<Utc>,
    inputs: Mutex<IndexMap<String, Value>>,
}

impl TestSession {
    pub fn new(suite_id: impl Into<String>, selected_options: SelectedOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            suite_id: suite_id.into(),
            selected_options,
            created_at: Utc::now(),
            inputs: Mutex::new(IndexMap::new()),
        }
    }

    /// Snapshot of the accumulated input history
    pub async fn inputs_snapshot(&self) -> IndexMap<String, Value> {
        self.inputs.lock().await.clone()
    }

    /// Merge new values into the input history, newest winning by name
    pub async fn merge_inputs(&self, values: IndexMap<String, Value>) {
        let mut inputs = self.inputs.lock().await;
        for (name, value) in values {
            inputs.insert(name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_inputs_accumulate_and_overwrite() {
        let session = TestSession::new("suite", SelectedOptions::new());

        let mut first = IndexMap::new();
        first.insert("url".to_string(), json!("https://a.example.com"));
        first.insert("token".to_string(), json!("t1"));
        session.merge_inputs(first).await;

        let mut second = IndexMap::new();
        second.insert("token".to_string(), json!("t2"));
        session.merge_inputs(second).await;

        let snapshot = session.inputs_snapshot().await;
        assert_eq!(snapshot.get("url"), Some(&json!("https://a.example.com")));
        assert_eq!(snapshot.get("token"), Some(&json!("t2")));
    }
}
