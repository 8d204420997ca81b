//! LLM-backed action selection. Anything that can go wrong here — a timeout, a malformed
//! reply, an unknown or blocked action name — yields `None` rather than an error, so the
//! Orchestrator always has the rule-based planner to fall back on.

use async_trait::async_trait;
use serde::Deserialize;
use wayfinder_types::{ActionCandidate, ActionCost, AgentState};

#[async_trait]
pub trait Planner: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Clone)]
pub struct ActionCatalogEntry {
    pub name: String,
    pub description: String,
    pub preconditions: Vec<String>,
    pub cost: ActionCost,
}

#[derive(Debug, Deserialize)]
struct PlannerReply {
    action_name: String,
    #[serde(default)]
    input: serde_json::Value,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    confidence: f32,
    #[serde(default = "default_true")]
    should_continue: bool,
}

fn default_true() -> bool {
    true
}

fn state_summary(state: &AgentState) -> String {
    format!(
        "step={} nodes={} facts={} has_matrix={} optimizations={} user_input={:?}",
        state.react.step,
        state.draft.nodes.len(),
        state.memory.semantic_facts.pois.len(),
        state.compute.time_matrix_robust.is_some() || state.compute.time_matrix_api.is_some(),
        state.compute.optimization_results.len(),
        state.user_input,
    )
}

fn catalog_summary(catalog: &[ActionCatalogEntry]) -> String {
    catalog
        .iter()
        .map(|entry| {
            format!(
                "- {} ({:?} cost, preconditions: {:?}): {}",
                entry.name, entry.cost, entry.preconditions, entry.description
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_prompt(state: &AgentState, catalog: &[ActionCatalogEntry]) -> String {
    format!(
        "You are choosing the next action for a trip-planning agent.\n\
         State: {}\n\
         Available actions:\n{}\n\
         Reply with a single JSON object: \
         {{\"action_name\": string, \"input\": object, \"reasoning\": string, \
         \"confidence\": number, \"should_continue\": bool}}.",
        state_summary(state),
        catalog_summary(catalog),
    )
}

/// Asks `planner` to pick the next action. Returns `None` on any failure, or when the
/// model chooses to stop, or names an action that isn't in the catalog, or names one the
/// Orchestrator has currently blocked (e.g. a loop-guarded repeat).
pub async fn select_action(
    planner: &dyn Planner,
    state: &AgentState,
    catalog: &[ActionCatalogEntry],
    blocked: &[String],
) -> Option<ActionCandidate> {
    let prompt = build_prompt(state, catalog);
    let raw = match planner.complete(&prompt).await {
        Ok(raw) => raw,
        Err(err) => {
            tracing::warn!(error = %err, "planner call failed, yielding to rule-based planner");
            return None;
        }
    };

    let reply: PlannerReply = match serde_json::from_str(&raw) {
        Ok(reply) => reply,
        Err(err) => {
            tracing::warn!(error = %err, reply = %raw, "planner returned a malformed reply");
            return None;
        }
    };

    if !reply.should_continue {
        tracing::debug!(reasoning = %reply.reasoning, "planner chose to stop");
        return None;
    }
    if !catalog.iter().any(|entry| entry.name == reply.action_name) {
        tracing::warn!(action = %reply.action_name, "planner named an action outside the catalog");
        return None;
    }
    if blocked.contains(&reply.action_name) {
        tracing::warn!(action = %reply.action_name, "planner named a currently blocked action");
        return None;
    }

    Some(ActionCandidate {
        name: reply.action_name,
        input: reply.input,
    })
}
