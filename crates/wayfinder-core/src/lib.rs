//! Agent Entry: the thin embeddable surface other services call into. Wires together the
//! Router, the Orchestrator, the State Store and telemetry into one `route_and_run` call.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wayfinder_orchestrator::Orchestrator;
use wayfinder_router::route as route_message;
use wayfinder_state::StateStore;
use wayfinder_telemetry::{dedup_key, DedupCache, DedupRequest, EventJournal, EventKind};
use wayfinder_types::{AgentState, CreateStateOptions, Route, ResultStatus, RouteReason, RouterOutput};
use wayfinder_wire::{
    AgentRequest, AgentResponse, ExplainPayload, ResponseObservability, ResponseStatus,
    ResultPayload, SystemMode,
};

/// The fast, deterministic path for `SYSTEM1_API`/`SYSTEM1_RAG` routes. External to the
/// core: the embedder supplies the lookup/mutation logic, the core only maps its outcome.
#[async_trait]
pub trait FastExecutor: Send + Sync {
    async fn execute(&self, state: &AgentState, route: Route) -> anyhow::Result<FastExecutorOutcome>;
}

pub struct FastExecutorOutcome {
    pub success: bool,
    pub result: Value,
    pub answer_text: String,
}

#[derive(Clone)]
pub struct AgentCore {
    store: StateStore,
    orchestrator: Orchestrator,
    fast_executor: Arc<dyn FastExecutor>,
    journal: EventJournal,
    dedup: DedupCache,
}

impl AgentCore {
    pub fn new(
        store: StateStore,
        orchestrator: Orchestrator,
        fast_executor: Arc<dyn FastExecutor>,
        journal: EventJournal,
        dedup: DedupCache,
    ) -> Self {
        Self {
            store,
            orchestrator,
            fast_executor,
            journal,
            dedup,
        }
    }

    pub async fn route_and_run(&self, request: &AgentRequest) -> AgentResponse {
        let start = Instant::now();
        let recent_messages = request
            .conversation_context
            .as_ref()
            .map(|c| c.recent_messages.clone())
            .unwrap_or_default();
        let key = dedup_key(&DedupRequest {
            message: &request.message,
            user_id: &request.user_id,
            trip_id: request.trip_id.as_deref(),
            dry_run: request.options.dry_run,
            allow_webbrowse: request.options.allow_webbrowse,
            recent_messages: &recent_messages,
        });

        if !request.options.dry_run {
            if let Some(cached) = self.dedup.get(&key).await {
                if let Ok(mut response) = serde_json::from_value::<AgentResponse>(cached) {
                    response.request_id = request.request_id.clone();
                    response.observability.latency_ms = start.elapsed().as_millis() as u64;
                    return response;
                }
            }
        }

        let response = self.run_uncached(request, start).await;

        if !request.options.dry_run {
            if let Ok(value) = serde_json::to_value(&response) {
                self.dedup.set(key, value).await;
            }
        }

        response
    }

    async fn run_uncached(&self, request: &AgentRequest, start: Instant) -> AgentResponse {
        let mut options = CreateStateOptions::default();
        options.trip_id = request.trip_id.clone();
        options.max_steps = request.options.max_steps;
        let state = self.store.create(&request.message, options).await;

        let router_start = Instant::now();
        let context = request.conversation_context.clone().unwrap_or_default();
        let mut routed = route_message(&request.message, &context);
        let router_ms = router_start.elapsed().as_millis() as u64;

        self.journal
            .record(
                EventKind::RouterDecision,
                &request.request_id,
                serde_json::json!({
                    "route": routed.route,
                    "confidence": routed.confidence,
                    "reasons": routed.reasons,
                }),
                Value::Null,
            )
            .await;

        let mut fallback_used = false;
        if routed.route == Route::System2Webbrowse && !request.options.allow_webbrowse {
            routed = RouterOutput {
                route: Route::System2Reasoning,
                confidence: 0.7,
                reasons: vec![RouteReason::NoApi],
                required_capabilities: routed.required_capabilities,
                consent_required: false,
                budget: routed.budget,
                ui_hint: routed.ui_hint,
            };
            fallback_used = true;
            self.journal
                .record(EventKind::WebbrowseBlocked, &request.request_id, Value::Null, Value::Null)
                .await;
            self.journal
                .record(
                    EventKind::FallbackTriggered,
                    &request.request_id,
                    serde_json::json!({"downgraded_to": "SYSTEM2_REASONING"}),
                    Value::Null,
                )
                .await;
        }

        // §3's AgentState invariant treats an empty/"unknown" utterance as a hard block on
        // entity resolution regardless of how it was classified; only the Orchestrator's
        // Plan step (§4.8) implements that guard, so route it there even when the Router's
        // feature scoring landed on a System 1 path for lack of any other signal.
        let trimmed_input = request.message.trim();
        let force_slow_path =
            trimmed_input.is_empty() || trimmed_input.eq_ignore_ascii_case("unknown");

        let final_state = if !force_slow_path
            && matches!(routed.route, Route::System1Api | Route::System1Rag)
        {
            self.run_fast_path(&state, routed.route).await
        } else {
            self.run_orchestrated(&state.request_id, routed.budget)
                .await
                .unwrap_or(state)
        };

        let answer_text = synthesize_answer_text(&final_state);
        let response = AgentResponse {
            request_id: request.request_id.clone(),
            route: routed.route,
            result: ResultPayload {
                status: Some(ResponseStatus::from_agent_status(final_state.result.status)),
                answer_text,
                payload: serde_json::to_value(&final_state.result).unwrap_or(Value::Null),
            },
            explain: ExplainPayload {
                decision_log: final_state.react.decision_log.clone(),
            },
            observability: ResponseObservability {
                latency_ms: start.elapsed().as_millis() as u64,
                router_ms,
                system_mode: system_mode_for(routed.route),
                tool_calls: final_state.observability.tool_calls,
                browser_steps: final_state.observability.browser_steps,
                tokens_est: 0,
                cost_est_usd: final_state.observability.cost_est_usd,
                fallback_used: fallback_used || final_state.observability.fallback_used,
            },
        };

        self.journal
            .record(
                EventKind::AgentComplete,
                &request.request_id,
                serde_json::json!({"status": response.result.status}),
                Value::Null,
            )
            .await;

        response
    }

    async fn run_fast_path(&self, state: &AgentState, route: Route) -> AgentState {
        let request_id = state.request_id.clone();
        match self.fast_executor.execute(state, route).await {
            Ok(outcome) => {
                let status = if outcome.success {
                    ResultStatus::Ready
                } else {
                    ResultStatus::NeedMoreInfo
                };
                self.store
                    .update(&request_id, move |mut s| {
                        s.result.status = status;
                        s.result.explanations.push(outcome.answer_text.clone());
                        s
                    })
                    .await
                    .unwrap_or_else(|_| state.clone())
            }
            Err(err) => {
                tracing::warn!(error = %err, "fast executor failed");
                self.store
                    .update(&request_id, |mut s| {
                        s.result.status = ResultStatus::NeedMoreInfo;
                        s
                    })
                    .await
                    .unwrap_or_else(|_| state.clone())
            }
        }
    }

    async fn run_orchestrated(
        &self,
        request_id: &str,
        budget: wayfinder_types::RouteBudget,
    ) -> Option<AgentState> {
        self.orchestrator
            .execute(&self.store, request_id, budget, CancellationToken::new())
            .await
            .ok()
    }
}

fn system_mode_for(route: Route) -> SystemMode {
    match route {
        Route::System1Api | Route::System1Rag => SystemMode::System1,
        Route::System2Reasoning | Route::System2Webbrowse => SystemMode::System2,
    }
}

fn synthesize_answer_text(state: &AgentState) -> String {
    match state.result.status {
        ResultStatus::Ready => {
            let n = state.result.timeline.len();
            if n > 0 {
                format!("已为您规划好行程，包含 {n} 个节点")
            } else {
                "已为您完成处理。".to_string()
            }
        }
        ResultStatus::Draft | ResultStatus::NeedMoreInfo => state
            .result
            .explanations
            .last()
            .cloned()
            .unwrap_or_else(|| "请提供更多出行日期或目的地信息，以便我们继续规划。".to_string()),
        ResultStatus::NeedConsent => "此操作需要您的确认后才能继续。".to_string(),
        ResultStatus::Failed => "抱歉，我们暂时无法完成您的行程规划。".to_string(),
        ResultStatus::Timeout => "规划超时，请稍后重试。".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use wayfinder_actions::{ActionCache, ActionRegistry};
    use wayfinder_wire::{ConversationContext, RequestOptions};

    struct CannedFastExecutor {
        success: bool,
    }

    #[async_trait]
    impl FastExecutor for CannedFastExecutor {
        async fn execute(&self, _state: &AgentState, _route: Route) -> anyhow::Result<FastExecutorOutcome> {
            Ok(FastExecutorOutcome {
                success: self.success,
                result: serde_json::json!({}),
                answer_text: "opening hours are 9-5".to_string(),
            })
        }
    }

    fn always_true() -> wayfinder_actions::PreconditionPredicate {
        Arc::new(|_token, _state| true)
    }

    fn core(success: bool) -> AgentCore {
        AgentCore::new(
            StateStore::new(),
            Orchestrator::new(
                ActionRegistry::new(always_true()),
                ActionCache::new(),
                HashMap::new(),
                None,
                vec![],
            ),
            Arc::new(CannedFastExecutor { success }),
            EventJournal::new(),
            DedupCache::new(),
        )
    }

    fn request(message: &str) -> AgentRequest {
        AgentRequest {
            request_id: "req-1".to_string(),
            user_id: "user-1".to_string(),
            trip_id: None,
            message: message.to_string(),
            conversation_context: Some(ConversationContext::default()),
            options: RequestOptions::default(),
        }
    }

    #[tokio::test]
    async fn factual_lookup_goes_through_fast_path_and_succeeds() {
        let core = core(true);
        let response = core.route_and_run(&request("what are the opening hours for the temple")).await;
        assert_eq!(response.result.status, Some(ResponseStatus::Ok));
        assert_eq!(response.observability.system_mode, SystemMode::System1);
    }

    #[tokio::test]
    async fn fast_path_failure_maps_to_need_more_info() {
        let core = core(false);
        let response = core.route_and_run(&request("what are the opening hours for the temple")).await;
        assert_eq!(response.result.status, Some(ResponseStatus::NeedMoreInfo));
    }

    #[tokio::test]
    async fn webbrowse_without_consent_downgrades_and_flags_fallback() {
        let core = core(true);
        let mut req = request("check the official site for live availability");
        req.options.allow_webbrowse = false;
        let response = core.route_and_run(&req).await;
        assert_eq!(response.route, Route::System2Reasoning);
        assert!(response.observability.fallback_used);
    }

    #[tokio::test]
    async fn duplicate_requests_within_ttl_return_cached_response_with_new_request_id() {
        let core = core(true);
        let mut req_a = request("what are the opening hours for the temple");
        req_a.request_id = "req-a".to_string();
        let mut req_b = req_a.clone();
        req_b.request_id = "req-b".to_string();

        let a = core.route_and_run(&req_a).await;
        let b = core.route_and_run(&req_b).await;

        assert_eq!(a.result.status, b.result.status);
        assert_eq!(a.result.answer_text, b.result.answer_text);
        assert_eq!(b.request_id, "req-b");
    }

    #[tokio::test]
    async fn dry_run_never_reads_or_writes_the_dedup_cache() {
        let core = core(true);
        let mut req = request("what are the opening hours for the temple");
        req.options.dry_run = true;
        req.request_id = "req-dry-1".to_string();
        core.route_and_run(&req).await;
        req.request_id = "req-dry-2".to_string();
        let second = core.route_and_run(&req).await;
        assert_eq!(second.request_id, "req-dry-2");
    }
}
