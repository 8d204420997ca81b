use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;
use wayfinder_types::{ActionCandidate, AgentState, Observation, ResultStatus};

pub enum PlanOutcome {
    /// A group of candidates to act on this iteration.
    Act(Vec<ActionCandidate>),
    /// Exit the loop. `Some((status, explanation))` assigns a terminal status directly;
    /// `None` means the caller should classify the exit from budget/step exhaustion alone.
    Stop(Option<(ResultStatus, String)>),
}

fn url_pattern() -> &'static Regex {
    static URL: OnceLock<Regex> = OnceLock::new();
    URL.get_or_init(|| Regex::new(r"https?://\S+").unwrap())
}

fn extract_first_url(input: &str) -> Option<String> {
    url_pattern().find(input).map(|m| m.as_str().to_string())
}

/// Returns the shared action name if the last `n` observations all chose the same action.
fn streak(observations: &[Observation], n: usize) -> Option<String> {
    if observations.len() < n {
        return None;
    }
    let tail = &observations[observations.len() - n..];
    let first = tail[0].action.clone();
    tail.iter().all(|o| o.action == first).then_some(first)
}

/// The ordered rule ladder: given the current state, what's the single next action to try.
/// Each branch is mutually exclusive with the others, so this never needs the Dependency
/// Analyzer on its own — multiple simultaneous candidates only arise when the LLM Planner
/// or a Repair step contributes additional ones.
pub fn rule_ladder(state: &AgentState) -> Option<ActionCandidate> {
    if state.draft.nodes.is_empty() {
        return Some(ActionCandidate {
            name: "places.resolve_entities".to_string(),
            input: json!({"query": state.user_input, "limit": 20}),
        });
    }
    if state.memory.semantic_facts.pois.is_empty() {
        let poi_ids: Vec<String> = state.draft.nodes.iter().map(|n| n.id.clone()).collect();
        return Some(ActionCandidate {
            name: "places.get_poi_facts".to_string(),
            input: json!({"poi_ids": poi_ids}),
        });
    }
    if state.compute.time_matrix_api.is_none() && state.compute.time_matrix_robust.is_none() {
        return Some(ActionCandidate {
            name: "transport.build_time_matrix".to_string(),
            input: json!({"nodes": state.draft.nodes}),
        });
    }
    if state.compute.time_matrix_robust.is_some() && state.compute.optimization_results.is_empty() {
        return Some(ActionCandidate {
            name: "itinerary.optimize_day_vrptw".to_string(),
            input: json!({"nodes": state.draft.nodes, "trip": state.trip}),
        });
    }
    if !state.compute.optimization_results.is_empty()
        && !state.result.timeline.is_empty()
        && state.result.status == ResultStatus::Draft
    {
        return Some(ActionCandidate {
            name: "policy.validate_feasibility".to_string(),
            input: json!({}),
        });
    }
    None
}

/// The non-LLM, non-webbrowse part of the Plan step: loop guards plus the rule ladder.
/// Called once the caller has already ruled out an LLM Planner pick and a `webbrowse`
/// URL candidate.
pub fn plan_by_rules(state: &AgentState) -> PlanOutcome {
    let resolve_attempts = state
        .react
        .observations
        .iter()
        .filter(|o| o.action == "places.resolve_entities")
        .count();
    if resolve_attempts >= 2 && state.draft.nodes.is_empty() {
        return PlanOutcome::Stop(Some((
            ResultStatus::NeedMoreInfo,
            "couldn't resolve any places from your request after two attempts".to_string(),
        )));
    }

    let trimmed = state.user_input.trim();
    if (trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown")) && state.draft.nodes.is_empty() {
        return PlanOutcome::Stop(Some((
            ResultStatus::NeedMoreInfo,
            "need more information about your trip to get started".to_string(),
        )));
    }

    let Some(candidate) = rule_ladder(state) else {
        return PlanOutcome::Stop(None);
    };

    if let Some(last_action) = streak(&state.react.observations, 3) {
        if last_action == candidate.name {
            return PlanOutcome::Stop(None);
        }
    }

    PlanOutcome::Act(vec![candidate])
}

/// The URL-extraction rule: a `webbrowse.browse` candidate is terminal for this
/// iteration — never combined with any other candidate.
pub fn plan_webbrowse(state: &AgentState) -> Option<ActionCandidate> {
    extract_first_url(&state.user_input).map(|url| ActionCandidate {
        name: "webbrowse.browse".to_string(),
        input: json!({"url": url}),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(action: &str) -> Observation {
        Observation {
            step: 0,
            action: action.to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn empty_nodes_requests_resolution() {
        let state = AgentState::new("r1", "plan a trip to kyoto");
        let candidate = rule_ladder(&state).unwrap();
        assert_eq!(candidate.name, "places.resolve_entities");
    }

    #[test]
    fn url_in_input_is_extracted() {
        let state = AgentState::new("r1", "check https://example.com/hotel for prices");
        let candidate = plan_webbrowse(&state).unwrap();
        assert_eq!(candidate.input["url"], "https://example.com/hotel");
    }

    #[test]
    fn repeated_zero_node_resolution_stops_with_need_more_info() {
        let mut state = AgentState::new("r1", "asdkjasldkj");
        state.react.observations.push(obs("places.resolve_entities"));
        state.react.observations.push(obs("places.resolve_entities"));
        match plan_by_rules(&state) {
            PlanOutcome::Stop(Some((status, _))) => assert_eq!(status, ResultStatus::NeedMoreInfo),
            _ => panic!("expected a terminal stop"),
        }
    }

    #[test]
    fn empty_input_with_no_nodes_stops() {
        let state = AgentState::new("r1", "   ");
        match plan_by_rules(&state) {
            PlanOutcome::Stop(Some((status, _))) => assert_eq!(status, ResultStatus::NeedMoreInfo),
            _ => panic!("expected a terminal stop"),
        }
    }

    #[test]
    fn same_action_three_times_in_a_row_stops_when_no_alternative() {
        use wayfinder_types::PlaceNode;
        let mut state = AgentState::new("r1", "plan a trip");
        state.draft.nodes.push(PlaceNode {
            id: "poi-1".to_string(),
            name: "Temple".to_string(),
            open_windows: vec![],
            metadata: None,
        });
        state.memory.semantic_facts.pois.push(serde_json::json!({}));
        state.compute.time_matrix_robust = Some(serde_json::json!({}));
        state
            .compute
            .optimization_results
            .push(serde_json::json!({}));
        state.result.timeline.push(wayfinder_types::TimelineEvent {
            kind: "NODE".to_string(),
            node_id: Some("poi-1".to_string()),
            day: 1,
            start_min: 600,
            end_min: 660,
            wait_min: 0,
        });
        for _ in 0..3 {
            state
                .react
                .observations
                .push(obs("policy.validate_feasibility"));
        }
        match plan_by_rules(&state) {
            PlanOutcome::Stop(None) => {}
            _ => panic!("expected a guard stop"),
        }
    }
}
