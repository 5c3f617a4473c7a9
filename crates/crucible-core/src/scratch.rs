//! Session-scoped scratch storage shared across tests in a run.
//!
//! Values are freeform JSON; tests agree informally on the shapes they
//! share. Key paths are dot-separated (`"patient.id"`); `set` creates
//! intermediate objects as needed. A session's scratch lives until the
//! session is closed.

use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Engine-wide scratch storage, one namespace per session.
#[derive(Default)]
pub struct ScratchStore {
    spaces: DashMap<Uuid, Value>,
}

impl ScratchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the value at `path` in the session's namespace.
    ///
    /// Path segments index into objects by key; segments that parse as an
    /// integer also index into arrays.
    pub fn get(&self, session_id: Uuid, path: &str) -> Option<Value> {
        let space = self.spaces.get(&session_id)?;
        let mut current = &*space;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }

    /// Write `value` at `path`, creating intermediate objects. A
    /// non-object intermediate is replaced by an object.
    pub fn set(&self, session_id: Uuid, path: &str, value: Value) {
        let mut space = self
            .spaces
            .entry(session_id)
            .or_insert_with(|| Value::Object(Map::new()));

        let mut current = &mut *space;
        let segments: Vec<&str> = path.split('.').collect();
        for segment in &segments[..segments.len() - 1] {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            current = current
                .as_object_mut()
                .expect("just ensured object")
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
        }
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current
            .as_object_mut()
            .expect("just ensured object")
            .insert(segments[segments.len() - 1].to_string(), value);
    }

    /// Drop a session's entire namespace (session close).
    pub fn clear(&self, session_id: Uuid) {
        self.spaces.remove(&session_id);
    }
}

/// Cheap handle binding the shared store to one session, handed to test
/// procedures through their execution context.
#[derive(Clone)]
pub struct ScratchHandle {
    store: Arc<ScratchStore>,
    session_id: Uuid,
}

impl ScratchHandle {
    pub fn new(store: Arc<ScratchStore>, session_id: Uuid) -> Self {
        Self { store, session_id }
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.store.get(self.session_id, path)
    }

    pub fn set(&self, path: &str, value: Value) {
        self.store.set(self.session_id, path, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get_scalar() {
        let store = ScratchStore::new();
        let session = Uuid::new_v4();

        store.set(session, "token", json!("abc"));
        assert_eq!(store.get(session, "token"), Some(json!("abc")));
    }

    #[test]
    fn test_nested_paths_create_intermediates() {
        let store = ScratchStore::new();
        let session = Uuid::new_v4();

        store.set(session, "patient.name.family", json!("Chalmers"));
        store.set(session, "patient.id", json!("example"));

        assert_eq!(store.get(session, "patient.name.family"), Some(json!("Chalmers")));
        assert_eq!(
            store.get(session, "patient"),
            Some(json!({"name": {"family": "Chalmers"}, "id": "example"}))
        );
    }

    #[test]
    fn test_array_index_on_get() {
        let store = ScratchStore::new();
        let session = Uuid::new_v4();

        store.set(session, "ids", json!(["a", "b", "c"]));
        assert_eq!(store.get(session, "ids.1"), Some(json!("b")));
        assert_eq!(store.get(session, "ids.9"), None);
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = ScratchStore::new();
        let one = Uuid::new_v4();
        let two = Uuid::new_v4();

        store.set(one, "k", json!(1));
        assert_eq!(store.get(two, "k"), None);
    }

    #[test]
    fn test_clear_drops_namespace() {
        let store = ScratchStore::new();
        let session = Uuid::new_v4();

        store.set(session, "k", json!(1));
        store.clear(session);
        assert_eq!(store.get(session, "k"), None);
    }

    #[test]
    fn test_scalar_intermediate_is_replaced() {
        let store = ScratchStore::new();
        let session = Uuid::new_v4();

        store.set(session, "a", json!(5));
        store.set(session, "a.b", json!(6));
        assert_eq!(store.get(session, "a.b"), Some(json!(6)));
    }
}
