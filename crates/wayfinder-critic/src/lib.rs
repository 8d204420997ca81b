//! Checks a proposed timeline for feasibility. Purely advisory: nothing here mutates
//! `AgentState`, it only reports what's wrong so the Orchestrator's repair step can react.

use serde::{Deserialize, Serialize};
use wayfinder_types::{AgentState, TimelineEvent};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<u32>,
}

impl Violation {
    fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            node_id: None,
            day: None,
        }
    }

    fn for_node(code: &str, message: impl Into<String>, node_id: impl Into<String>, day: u32) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            node_id: Some(node_id.into()),
            day: Some(day),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeasibilityReport {
    pub pass: bool,
    pub violations: Vec<Violation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_slack: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_wait: Option<u32>,
}

/// Parses `HH:MM` into minutes since midnight. Malformed values are treated as absent
/// rather than as a hard error, since the Critic must never crash the loop.
fn parse_hhmm(value: &str) -> Option<u32> {
    let (h, m) = value.split_once(':')?;
    let h: u32 = h.parse().ok()?;
    let m: u32 = m.parse().ok()?;
    Some(h * 60 + m)
}

pub fn validate_feasibility(state: &AgentState) -> FeasibilityReport {
    let mut violations = Vec::new();
    let mut min_slack: Option<i64> = None;
    let timeline = &state.result.timeline;

    check_time_windows(state, timeline, &mut violations, &mut min_slack);
    check_day_boundary(state, timeline, &mut violations);
    if !timeline.is_empty() {
        check_lunch_anchor(state, timeline, &mut violations);
    }
    check_robust_transit(state, &mut violations);
    check_wait_visibility(timeline, &mut violations);
    check_schedule_sanity(state, timeline, &mut violations);

    let total_wait = if timeline.is_empty() {
        None
    } else {
        Some(timeline.iter().map(|event| event.wait_min).sum())
    };

    FeasibilityReport {
        pass: violations.is_empty(),
        violations,
        min_slack,
        total_wait,
    }
}

fn check_time_windows(
    state: &AgentState,
    timeline: &[TimelineEvent],
    violations: &mut Vec<Violation>,
    min_slack: &mut Option<i64>,
) {
    for event in timeline.iter().filter(|e| e.kind == "NODE") {
        let Some(node_id) = event.node_id.as_deref() else {
            continue;
        };
        let Some(node) = state.draft.nodes.iter().find(|n| n.id == node_id) else {
            continue;
        };
        if node.open_windows.is_empty() {
            continue;
        }
        let fits = node.open_windows.iter().any(|(start, end)| {
            match (parse_hhmm(start), parse_hhmm(end)) {
                (Some(start_min), Some(end_min)) => {
                    let slack = (event.start_min as i64 - start_min as i64)
                        .min(end_min as i64 - event.end_min as i64);
                    *min_slack = Some(min_slack.map_or(slack, |current| current.min(slack)));
                    event.start_min >= start_min && event.end_min <= end_min
                }
                _ => false,
            }
        });
        if !fits {
            violations.push(Violation::for_node(
                "TIME_WINDOW_CONFLICT",
                format!("node `{node_id}` is scheduled outside its open hours"),
                node_id.to_string(),
                event.day,
            ));
        }
    }
}

fn check_day_boundary(state: &AgentState, timeline: &[TimelineEvent], violations: &mut Vec<Violation>) {
    if state.trip.day_boundaries.is_empty() {
        return;
    }
    for event in timeline {
        let boundary = state
            .trip
            .day_boundaries
            .get((event.day as usize).saturating_sub(1))
            .unwrap_or(&state.trip.day_boundaries[0]);
        let Some(end_min) = parse_hhmm(&boundary.end) else {
            continue;
        };
        if event.end_min > end_min {
            violations.push(Violation::for_node(
                "DAY_BOUNDARY_EXCEEDED",
                format!("event ends at {} past day boundary {}", event.end_min, boundary.end),
                event.node_id.clone().unwrap_or_default(),
                event.day,
            ));
        }
    }
}

fn check_lunch_anchor(state: &AgentState, timeline: &[TimelineEvent], violations: &mut Vec<Violation>) {
    let (window_start, window_end) = (
        parse_hhmm(&state.trip.lunch_break.window.0),
        parse_hhmm(&state.trip.lunch_break.window.1),
    );
    let max_day = timeline.iter().map(|e| e.day).max().unwrap_or(0);
    for day in 1..=max_day {
        let lunches: Vec<&TimelineEvent> = timeline
            .iter()
            .filter(|e| e.day == day && e.kind == "LUNCH")
            .collect();
        match lunches.len() {
            0 => violations.push(Violation::for_node(
                "LUNCH_MISSING",
                format!("day {day} has no lunch event"),
                String::new(),
                day,
            )),
            1 => {
                if let (Some(start), Some(end)) = (window_start, window_end) {
                    let lunch_start = lunches[0].start_min;
                    if lunch_start < start || lunch_start > end {
                        violations.push(Violation::for_node(
                            "LUNCH_WINDOW_VIOLATION",
                            format!("day {day}'s lunch starts at {lunch_start}, outside the lunch window"),
                            String::new(),
                            day,
                        ));
                    }
                }
            }
            _ => violations.push(Violation::for_node(
                "LUNCH_MULTIPLE",
                format!("day {day} has {} lunch events", lunches.len()),
                String::new(),
                day,
            )),
        }
    }
}

fn check_robust_transit(state: &AgentState, violations: &mut Vec<Violation>) {
    if state.compute.time_matrix_robust.is_none() {
        violations.push(Violation::new(
            "ROBUST_TIME_MISSING",
            "no robust transit time matrix has been computed yet",
        ));
    }
}

fn check_wait_visibility(timeline: &[TimelineEvent], violations: &mut Vec<Violation>) {
    for event in timeline.iter().filter(|e| e.kind == "NODE" && e.wait_min > 15) {
        let Some(node_id) = event.node_id.as_deref() else {
            continue;
        };
        let has_wait_sibling = timeline
            .iter()
            .any(|e| e.kind == "WAIT" && e.day == event.day && e.node_id.as_deref() == Some(node_id));
        if !has_wait_sibling {
            violations.push(Violation::for_node(
                "WAIT_NOT_VISIBLE",
                format!("node `{node_id}` has a {}-minute wait with no visible WAIT event", event.wait_min),
                node_id.to_string(),
                event.day,
            ));
        }
    }
}

fn check_schedule_sanity(state: &AgentState, timeline: &[TimelineEvent], violations: &mut Vec<Violation>) {
    if !state.compute.optimization_results.is_empty() && timeline.is_empty() {
        violations.push(Violation::new(
            "SCHEDULE_MISSING",
            "optimization results exist but no timeline was produced",
        ));
    }
}
