//! State Store: per-request working memory with copy-on-write updates. Every read hands
//! the caller an owned clone rather than a reference into the lock, so a parallel Act-phase
//! group never observes a half-written sibling update.

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use wayfinder_types::{AgentState, CreateStateOptions};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no state found for request `{0}`")]
    NotFound(String),
    #[error("path `{0}` does not address a JSON value in AgentState")]
    InvalidPath(String),
    #[error("value at `{path}` does not deserialize back into AgentState: {source}")]
    Shape {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type StateResult<T> = Result<T, StateError>;

/// Owns the process-wide map of `request_id -> AgentState`. The Orchestrator serializes
/// all writes for a given id through this store even when its Act phase runs actions
/// concurrently: the parallel group reads one snapshot, then merges are applied one at a
/// time via `update`/`update_nested`.
#[derive(Default)]
pub struct StateStore {
    states: RwLock<HashMap<String, AgentState>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies the standard new-trip defaults: 1 day, `10:00-22:00`, lunch on (60 min,
    /// `11:30-13:30`), `normal` pacing, `max_steps=8`, `status=DRAFT`.
    pub async fn create(&self, user_input: &str, options: CreateStateOptions) -> AgentState {
        let request_id = uuid::Uuid::new_v4().to_string();
        let mut state = AgentState::new(request_id, user_input);
        state.trip.trip_id = options.trip_id;
        if let Some(max_steps) = options.max_steps {
            state.react.max_steps = max_steps;
        }
        let id = state.request_id.clone();
        self.states.write().await.insert(id, state.clone());
        state
    }

    pub async fn get(&self, id: &str) -> Option<AgentState> {
        self.states.read().await.get(id).cloned()
    }

    pub async fn delete(&self, id: &str) -> Option<AgentState> {
        self.states.write().await.remove(id)
    }

    /// Copy-on-write update via a pure transform. The closure receives an owned clone and
    /// returns the new value; the caller's returned handle is the one now stored.
    pub async fn update<F>(&self, id: &str, f: F) -> StateResult<AgentState>
    where
        F: FnOnce(AgentState) -> AgentState,
    {
        let mut guard = self.states.write().await;
        let current = guard
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        let next = f(current);
        guard.insert(id.to_string(), next.clone());
        Ok(next)
    }

    /// Sets a nested field addressed by a path of field names, e.g. `["draft", "nodes"]`.
    /// The update round-trips through `serde_json::Value` so arbitrary known paths can be
    /// set without a hand-written setter per field.
    pub async fn update_nested(
        &self,
        id: &str,
        path: &[&str],
        value: Value,
    ) -> StateResult<AgentState> {
        let mut guard = self.states.write().await;
        let current = guard
            .get(id)
            .cloned()
            .ok_or_else(|| StateError::NotFound(id.to_string()))?;
        let mut as_value =
            serde_json::to_value(&current).expect("AgentState always serializes");
        set_path(&mut as_value, path, value)
            .ok_or_else(|| StateError::InvalidPath(path.join(".")))?;
        let next: AgentState =
            serde_json::from_value(as_value).map_err(|source| StateError::Shape {
                path: path.join("."),
                source,
            })?;
        guard.insert(id.to_string(), next.clone());
        Ok(next)
    }
}

fn set_path(root: &mut Value, path: &[&str], value: Value) -> Option<()> {
    let (head, rest) = path.split_first()?;
    if rest.is_empty() {
        let obj = root.as_object_mut()?;
        obj.insert((*head).to_string(), value);
        return Some(());
    }
    let obj = root.as_object_mut()?;
    let child = obj
        .entry((*head).to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    set_path(child, rest, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_applies_new_trip_defaults() {
        let store = StateStore::new();
        let state = store.create("plan my trip", CreateStateOptions::default()).await;
        assert_eq!(state.trip.days, 1);
        assert_eq!(state.trip.day_boundaries.len(), 1);
        assert_eq!(state.trip.day_boundaries[0].start, "10:00");
        assert!(state.trip.lunch_break.enabled);
        assert_eq!(state.trip.lunch_break.duration_min, 60);
        assert_eq!(state.react.max_steps, 8);
        assert_eq!(state.result.status, wayfinder_types::ResultStatus::Draft);
    }

    #[tokio::test]
    async fn update_is_copy_on_write() {
        let store = StateStore::new();
        let created = store.create("hello", CreateStateOptions::default()).await;
        let id = created.request_id.clone();
        let updated = store
            .update(&id, |mut s| {
                s.react.step += 1;
                s
            })
            .await
            .unwrap();
        assert_eq!(updated.react.step, 1);
        // the stored copy reflects the update, not the original handle
        let fetched = store.get(&id).await.unwrap();
        assert_eq!(fetched.react.step, 1);
        assert_eq!(created.react.step, 0);
    }

    #[tokio::test]
    async fn update_nested_sets_draft_nodes() {
        let store = StateStore::new();
        let created = store.create("tokyo trip", CreateStateOptions::default()).await;
        let id = created.request_id.clone();
        let nodes = json!([{"id": "poi-1", "name": "Kiyomizu-dera", "open_windows": []}]);
        let updated = store
            .update_nested(&id, &["draft", "nodes"], nodes)
            .await
            .unwrap();
        assert_eq!(updated.draft.nodes.len(), 1);
        assert_eq!(updated.draft.nodes[0].id, "poi-1");
    }

    #[tokio::test]
    async fn get_missing_id_returns_none() {
        let store = StateStore::new();
        assert!(store.get("does-not-exist").await.is_none());
    }

    #[tokio::test]
    async fn update_missing_id_errors() {
        let store = StateStore::new();
        let err = store.update("missing", |s| s).await.unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }
}
