//! Action Registry: a flat name→record map of external action capabilities, each
//! addressed through one uniform `execute` entry point rather than a trait hierarchy.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use wayfinder_types::{ActionMetadata, ActionOutcome, AgentState};

#[async_trait]
pub trait Action: Send + Sync {
    fn name(&self) -> &str;
    fn metadata(&self) -> &ActionMetadata;
    async fn execute(&self, input: Value, state: &AgentState) -> anyhow::Result<ActionOutcome>;
}

/// A precondition token is opaque to the registry: the caller supplies the predicate that
/// interprets it, the registry just looks each one up and requires all to hold.
pub type PreconditionPredicate = Arc<dyn Fn(&str, &AgentState) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct ActionRegistry {
    actions: Arc<RwLock<HashMap<String, Arc<dyn Action>>>>,
    precondition: PreconditionPredicate,
}

impl ActionRegistry {
    /// `precondition` interprets a single opaque token against a state snapshot; it is
    /// supplied by the embedder since the core does not define a precondition vocabulary.
    pub fn new(precondition: PreconditionPredicate) -> Self {
        Self {
            actions: Arc::new(RwLock::new(HashMap::new())),
            precondition,
        }
    }

    pub async fn register(&self, action: Arc<dyn Action>) {
        self.actions
            .write()
            .await
            .insert(action.name().to_string(), action);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Action>> {
        self.actions.read().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// A missing action or a failed precondition must never crash the loop: this returns
    /// `false` so the Orchestrator's Plan step picks something else next iteration.
    pub async fn check_preconditions(&self, name: &str, state: &AgentState) -> bool {
        let Some(action) = self.get(name).await else {
            tracing::warn!(action = name, "precondition check on unknown action");
            return false;
        };
        action
            .metadata()
            .preconditions
            .iter()
            .all(|token| (self.precondition)(token, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wayfinder_types::{ActionCost, SideEffect};

    struct EchoAction {
        metadata: ActionMetadata,
    }

    #[async_trait]
    impl Action for EchoAction {
        fn name(&self) -> &str {
            "test.echo"
        }
        fn metadata(&self) -> &ActionMetadata {
            &self.metadata
        }
        async fn execute(
            &self,
            input: Value,
            _state: &AgentState,
        ) -> anyhow::Result<ActionOutcome> {
            Ok(ActionOutcome::ok(input))
        }
    }

    fn echo_action(preconditions: Vec<String>) -> Arc<dyn Action> {
        Arc::new(EchoAction {
            metadata: ActionMetadata {
                kind: "test".to_string(),
                cost: ActionCost::Low,
                side_effect: SideEffect::None,
                preconditions,
                idempotent: true,
                cacheable: false,
                cache_key: None,
            },
        })
    }

    fn always_true() -> PreconditionPredicate {
        Arc::new(|_token, _state| true)
    }

    #[tokio::test]
    async fn unknown_action_precondition_check_returns_false_not_panic() {
        let registry = ActionRegistry::new(always_true());
        let state = wayfinder_types::AgentState::new("r1", "hi");
        assert!(!registry.check_preconditions("does.not.exist", &state).await);
    }

    #[tokio::test]
    async fn registered_action_is_listed_and_fetchable() {
        let registry = ActionRegistry::new(always_true());
        registry.register(echo_action(vec![])).await;
        assert_eq!(registry.list().await, vec!["test.echo".to_string()]);
        assert!(registry.get("test.echo").await.is_some());
    }

    #[tokio::test]
    async fn preconditions_all_must_hold() {
        let registry = ActionRegistry::new(Arc::new(|token, _state| token == "nodes_resolved"));
        registry
            .register(echo_action(vec![
                "nodes_resolved".to_string(),
                "facts_loaded".to_string(),
            ]))
            .await;
        let state = wayfinder_types::AgentState::new("r1", "hi");
        assert!(!registry.check_preconditions("test.echo", &state).await);
    }
}
