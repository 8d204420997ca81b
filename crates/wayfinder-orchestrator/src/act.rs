use wayfinder_types::{ActionOutcome, AgentState, PlaceNode, ResultStatus, TimelineEvent};

/// Routes an action's outcome to the state paths it's responsible for, by action-name
/// prefix. An error outcome leaves state untouched except for `places.resolve_entities`,
/// whose "invalid query"/"unknown" errors are a deliberate short-circuit the spec calls
/// out explicitly.
pub fn merge_outcome(
    state: &mut AgentState,
    action_name: &str,
    outcome: &ActionOutcome,
) -> Option<(ResultStatus, String)> {
    if action_name.starts_with("places.resolve_entities") {
        if let Some(error) = &outcome.error {
            let lower = error.to_lowercase();
            if lower.contains("invalid query") || lower.contains("unknown") {
                return Some((ResultStatus::NeedMoreInfo, error.clone()));
            }
        }
    }
    if outcome.is_error() {
        return None;
    }

    if action_name.starts_with("places.resolve_entities") {
        if let Some(nodes) = outcome.payload.get("nodes") {
            if let Ok(nodes) = serde_json::from_value::<Vec<PlaceNode>>(nodes.clone()) {
                state.draft.nodes = nodes;
            }
        }
    } else if action_name.starts_with("places.get_poi_facts") {
        if let Some(facts) = outcome.payload.get("facts") {
            let pois: Vec<serde_json::Value> = match facts {
                serde_json::Value::Object(map) => map.values().cloned().collect(),
                serde_json::Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            state.memory.semantic_facts.pois = pois;
        }
    } else if action_name.starts_with("transport.build_time_matrix") {
        if let Some(api) = outcome.payload.get("time_matrix_api") {
            state.compute.time_matrix_api = Some(api.clone());
        }
        if let Some(robust) = outcome.payload.get("time_matrix_robust") {
            state.compute.time_matrix_robust = Some(robust.clone());
        }
    } else if action_name.starts_with("itinerary.repair_cross_day") {
        state.compute.optimization_results = vec![outcome.payload.clone()];
        if let Some(timeline) = outcome.payload.get("timeline") {
            if let Ok(events) = serde_json::from_value::<Vec<TimelineEvent>>(timeline.clone()) {
                state.result.timeline = events;
            }
        }
    } else if action_name.starts_with("itinerary.optimize_") {
        state.compute.optimization_results.push(outcome.payload.clone());
        if let Some(timeline) = outcome.payload.get("timeline") {
            if let Ok(events) = serde_json::from_value::<Vec<TimelineEvent>>(timeline.clone()) {
                state.result.timeline = events;
            }
        }
    } else if action_name.starts_with("webbrowse.") {
        if let Some(snippet) = outcome.payload.get("snippet").and_then(|v| v.as_str()) {
            state.memory.episodic_snippets.push(snippet.to_string());
        }
        state.observability.browser_steps += 1;
    }
    // "policy.validate_feasibility" carries no merge of its own: the Critic step runs the
    // same check directly and is the sole authority on `result.status`.

    None
}

/// The reason code recorded in `decision_log` for an action chosen this iteration, derived
/// from the action name and (for the validation action) the Critic's verdict.
pub fn reason_code_for(action_name: &str, critic_pass: Option<bool>) -> String {
    if action_name.starts_with("places.resolve_entities") {
        "MISSING_NODES".to_string()
    } else if action_name.starts_with("places.get_poi_facts") {
        "FETCHING_FACTS".to_string()
    } else if action_name.starts_with("transport.build_time_matrix") {
        "MISSING_TIME_MATRIX".to_string()
    } else if action_name.starts_with("itinerary.optimize_") {
        "OPTIMIZING".to_string()
    } else if action_name.starts_with("itinerary.repair_cross_day") {
        "REPAIRING_SCHEDULE".to_string()
    } else if action_name.starts_with("policy.validate_feasibility") {
        match critic_pass {
            Some(true) => "VALIDATION_PASSED".to_string(),
            Some(false) => "VALIDATION_FAILED".to_string(),
            None => "VALIDATING".to_string(),
        }
    } else if action_name.starts_with("webbrowse.") {
        "WEB_BROWSE_REQUIRED".to_string()
    } else {
        "UNKNOWN_ACTION".to_string()
    }
}
