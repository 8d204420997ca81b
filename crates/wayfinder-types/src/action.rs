use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCost {
    Low,
    Med,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    None,
    Reads,
    WritesDb,
    CallsApi,
}

/// `preconditions` is an opaque list of capability tokens. The core never assigns meaning
/// to a token itself — it only asks the caller-supplied predicate map in
/// `ActionRegistry::check_preconditions` whether a token holds against a state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMetadata {
    pub kind: String,
    pub cost: ActionCost,
    pub side_effect: SideEffect,
    pub preconditions: Vec<String>,
    pub idempotent: bool,
    pub cacheable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
}

/// The result an `Action::execute` call hands back to the orchestrator. Its `payload` is
/// a free-form JSON object whose shape is defined by the action family (see
/// `wayfinder-orchestrator`'s `updateStateFromAction`-equivalent merge routing).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn ok(payload: Value) -> Self {
        Self {
            payload,
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            payload: Value::Null,
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A candidate action under consideration by the Orchestrator's Plan step: a name plus
/// the input it would be invoked with, before preconditions or cache lookup happen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionCandidate {
    pub name: String,
    pub input: Value,
}
