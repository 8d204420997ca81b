//! Routes an incoming message to a System 1 (fast, deterministic) or System 2
//! (reasoning/webbrowse) execution path. Two stages: a priority-ordered hard-rule table,
//! then confidence-weighted feature scoring when no hard rule fires.

use std::sync::OnceLock;

use regex::Regex;
use wayfinder_types::{Route, RouteBudget, RouteReason, RouterOutput, UiHint, UiMode};
use wayfinder_wire::ConversationContext;

struct Cues {
    high_risk: Regex,
    webbrowse: Regex,
    crud: Regex,
    factual: Regex,
    planning: Regex,
    constraint: Regex,
    realtime: Regex,
    ambiguous_pronoun: Regex,
}

fn cues() -> &'static Cues {
    static CUES: OnceLock<Cues> = OnceLock::new();
    CUES.get_or_init(|| Cues {
        high_risk: Regex::new(r"(?i)(pay|payment|refund|charge|batch\s*(delete|cancel|update)|支付|退款|批量)").unwrap(),
        webbrowse: Regex::new(r"(?i)(official\s*(site|website)|live\s*availability|check\s*availability|book\s*now|官网|实时库存|现场查)").unwrap(),
        crud: Regex::new(r"(?i)\b(delete|remove|move|add|reprioritize)\b|删除|移动|添加|调整优先级").unwrap(),
        factual: Regex::new(r"(?i)(hours?|price|where('?s| is)|recommend|几点|多少钱|在哪|推荐)").unwrap(),
        planning: Regex::new(r"(?i)(规划|几天|如果.*就|plan\s+(my|a|the)\s+trip|itinerary)").unwrap(),
        constraint: Regex::new(r"既要|又要|不要|避免|(?i)\bmust\b|(?i)\bcannot\b|(?i)\bwithout\b").unwrap(),
        realtime: Regex::new(r"(?i)(现在|实时|今天|right now|currently|live)").unwrap(),
        ambiguous_pronoun: Regex::new(r"(?i)\b(it|this|that|something)\b|这个|那个|它").unwrap(),
    })
}

fn budget(max_seconds: u32, max_steps: u32, max_browser_steps: u32) -> RouteBudget {
    RouteBudget {
        max_seconds,
        max_steps,
        max_browser_steps,
    }
}

fn ui_hint(mode: UiMode, message: &str) -> UiHint {
    UiHint {
        mode,
        status: "routed".to_string(),
        message: message.to_string(),
    }
}

/// `route(input, context) -> RouterOutput`. Never panics: any internal failure falls back
/// to a safe `SYSTEM1_API` decision rather than propagating.
pub fn route(input: &str, _context: &ConversationContext) -> RouterOutput {
    match try_route(input) {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(error = %err, "router fell back to SYSTEM1_API");
            RouterOutput {
                route: Route::System1Api,
                confidence: 0.3,
                reasons: vec![RouteReason::MissingInfo],
                required_capabilities: vec![],
                consent_required: false,
                budget: budget(3, 1, 0),
                ui_hint: ui_hint(UiMode::Fast, "falling back after a routing error"),
            }
        }
    }
}

fn try_route(input: &str) -> Result<RouterOutput, regex::Error> {
    let cues = cues();
    let planning = cues.planning.is_match(input);

    if cues.high_risk.is_match(input) {
        return Ok(RouterOutput {
            route: Route::System2Reasoning,
            confidence: 0.9,
            reasons: vec![RouteReason::HighRiskAction],
            required_capabilities: required_capabilities(Route::System2Reasoning),
            consent_required: true,
            budget: budget(60, 8, 0),
            ui_hint: ui_hint(UiMode::Slow, "this action needs your confirmation"),
        });
    }
    if cues.webbrowse.is_match(input) {
        return Ok(RouterOutput {
            route: Route::System2Webbrowse,
            confidence: 0.9,
            reasons: vec![RouteReason::RealtimeWeb, RouteReason::HighRiskAction],
            required_capabilities: required_capabilities(Route::System2Webbrowse),
            consent_required: true,
            budget: budget(60, 8, 12),
            ui_hint: ui_hint(UiMode::Slow, "checking a live source for you"),
        });
    }
    if cues.crud.is_match(input) && !planning {
        return Ok(RouterOutput {
            route: Route::System1Api,
            confidence: 0.85,
            reasons: vec![],
            required_capabilities: required_capabilities(Route::System1Api),
            consent_required: false,
            budget: budget(3, 1, 0),
            ui_hint: ui_hint(UiMode::Fast, "applying your change"),
        });
    }
    if cues.factual.is_match(input) && !planning {
        return Ok(RouterOutput {
            route: Route::System1Rag,
            confidence: 0.8,
            reasons: vec![],
            required_capabilities: required_capabilities(Route::System1Rag),
            consent_required: false,
            budget: budget(3, 1, 0),
            ui_hint: ui_hint(UiMode::Fast, "looking that up"),
        });
    }

    score_by_features(input, planning)
}

fn score_by_features(input: &str, planning: bool) -> Result<RouterOutput, regex::Error> {
    let cues = cues();
    let constraint_count = cues.constraint.find_iter(input).count();
    let realtime = cues.realtime.is_match(input);
    let ambiguity_score =
        cues.ambiguous_pronoun.find_iter(input).count() + input.matches('?').count();
    let high_ambiguity = ambiguity_score >= 2;

    let mut confidence: f32 = 0.5;
    let mut route = Route::System1Rag;
    let mut reasons = Vec::new();

    if constraint_count >= 2 {
        confidence += 0.3;
        route = Route::System2Reasoning;
        reasons.push(RouteReason::MultiConstraint);
    }
    if planning {
        confidence += 0.25;
        route = Route::System2Reasoning;
    }
    if realtime {
        confidence += 0.2;
        route = Route::System2Webbrowse;
        reasons.push(RouteReason::RealtimeWeb);
    }
    if high_ambiguity {
        confidence -= 0.3;
    }
    confidence = RouterOutput::clamp_confidence(confidence);

    if confidence < 0.45 {
        route = if planning {
            Route::System1Rag
        } else {
            Route::System1Api
        };
        reasons = vec![RouteReason::MissingInfo];
    }

    let consent_required = route == Route::System2Webbrowse || realtime;
    let (max_seconds, max_steps, max_browser_steps) = match route {
        Route::System1Api | Route::System1Rag => (3, 1, 0),
        Route::System2Reasoning => (60, 8, 0),
        Route::System2Webbrowse => (60, 8, 12),
    };

    Ok(RouterOutput {
        route,
        confidence,
        reasons,
        required_capabilities: required_capabilities(route),
        consent_required,
        budget: budget(max_seconds, max_steps, max_browser_steps),
        ui_hint: ui_hint(ui_mode_for(route), "routed by feature score"),
    })
}

fn ui_mode_for(route: Route) -> UiMode {
    match route {
        Route::System1Api | Route::System1Rag => UiMode::Fast,
        Route::System2Reasoning | Route::System2Webbrowse => UiMode::Slow,
    }
}

fn required_capabilities(route: Route) -> Vec<String> {
    match route {
        Route::System1Api => vec![],
        Route::System1Rag => vec!["places".to_string()],
        Route::System2Reasoning => {
            vec!["places".to_string(), "transport".to_string(), "planner".to_string()]
        }
        Route::System2Webbrowse => vec!["browser".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ConversationContext {
        ConversationContext::default()
    }

    #[test]
    fn payment_cue_routes_to_reasoning_with_consent() {
        let out = route("please refund my last booking", &ctx());
        assert_eq!(out.route, Route::System2Reasoning);
        assert!(out.consent_required);
        assert_eq!(out.reasons, vec![RouteReason::HighRiskAction]);
        assert_eq!(out.confidence, 0.9);
    }

    #[test]
    fn chinese_batch_mutation_is_high_risk() {
        let out = route("帮我批量删除这些酒店预订", &ctx());
        assert_eq!(out.route, Route::System2Reasoning);
        assert!(out.consent_required);
    }

    #[test]
    fn webbrowse_cue_requires_consent_and_browser_budget() {
        let out = route("check the official site for live availability", &ctx());
        assert_eq!(out.route, Route::System2Webbrowse);
        assert!(out.consent_required);
        assert_eq!(out.budget.max_browser_steps, 12);
    }

    #[test]
    fn crud_verb_without_planning_cue_is_system1_api() {
        let out = route("delete the museum stop", &ctx());
        assert_eq!(out.route, Route::System1Api);
        assert_eq!(out.confidence, 0.85);
    }

    #[test]
    fn factual_lookup_without_planning_cue_is_system1_rag() {
        let out = route("what are the opening hours for the temple", &ctx());
        assert_eq!(out.route, Route::System1Rag);
    }

    #[test]
    fn crud_verb_with_planning_cue_falls_through_to_feature_scoring() {
        // "add" is a CRUD verb, but a planning cue is present, so the hard CRUD rule must
        // not fire and feature scoring should take over.
        let out = route("如果天气不好就帮我规划几天行程, add a backup day", &ctx());
        assert_eq!(out.route, Route::System2Reasoning);
    }

    #[test]
    fn two_or_more_constraints_push_toward_reasoning() {
        let out = route("我既要省钱又要不要太累, 还要避免早起", &ctx());
        assert_eq!(out.route, Route::System2Reasoning);
        assert!(out.reasons.contains(&RouteReason::MultiConstraint));
    }

    #[test]
    fn realtime_cue_pushes_toward_webbrowse_and_requires_consent() {
        let out = route("现在哪些餐厅还在营业", &ctx());
        assert_eq!(out.route, Route::System2Webbrowse);
        assert!(out.consent_required);
    }

    #[test]
    fn high_ambiguity_without_other_signals_downgrades_below_threshold() {
        let out = route("can you fix it? is this that thing? what about something?", &ctx());
        assert!(out.confidence < 0.45);
        assert_eq!(out.route, Route::System1Api);
    }

    #[test]
    fn confidence_is_always_clamped_to_the_valid_range() {
        let out = route("既要又要不要避免现在规划几天行程", &ctx());
        assert!(out.confidence >= 0.1 && out.confidence <= 0.95);
    }

    #[test]
    fn plain_message_with_no_cues_defaults_to_rag() {
        let out = route("hello there", &ctx());
        assert_eq!(out.route, Route::System1Rag);
        assert!(!out.consent_required);
    }
}
