//! Groups action candidates that can safely run in parallel this iteration, by comparing
//! each pair's inferred preconditions and side effects as dotted state paths.

use std::collections::HashMap;

use wayfinder_types::{ActionCandidate, ActionMetadata, AgentState};

/// An action candidate together with the state paths it reads (preconditions) and writes
/// (side effects), inferred from declared metadata plus name-pattern fallbacks.
#[derive(Debug, Clone)]
struct Inferred {
    candidate: ActionCandidate,
    preconditions: Vec<String>,
    side_effects: Vec<String>,
}

/// Name-prefix fallbacks for the state paths an action reads and writes, used when the
/// registry has no declared metadata for a candidate or the metadata doesn't carry path
/// information (it only carries opaque precondition tokens, not paths).
fn inferred_paths(name: &str) -> (Vec<&'static str>, Vec<&'static str>) {
    if name.starts_with("places.resolve_entities") {
        (vec![], vec!["draft.nodes"])
    } else if name.starts_with("places.get_poi_facts") {
        (vec!["draft.nodes"], vec!["memory.semantic_facts.pois"])
    } else if name.starts_with("transport.build_time_matrix") {
        (
            vec!["draft.nodes", "memory.semantic_facts"],
            vec!["compute.time_matrix_api", "compute.time_matrix_robust"],
        )
    } else if name.starts_with("itinerary.optimize_") {
        (
            vec!["draft.nodes", "compute.time_matrix_robust"],
            vec!["compute.optimization_results", "result.timeline"],
        )
    } else if name.starts_with("itinerary.repair_cross_day") {
        (
            vec!["result.timeline"],
            vec!["compute.optimization_results", "result.timeline"],
        )
    } else if name.starts_with("policy.validate_feasibility") {
        (vec!["result.timeline"], vec!["result.status"])
    } else if name.starts_with("webbrowse.") {
        (vec![], vec!["memory.episodic_snippets", "observability.browser_steps"])
    } else {
        (vec![], vec![])
    }
}

fn infer(candidate: &ActionCandidate, metadata: Option<&ActionMetadata>) -> Inferred {
    let (pattern_pre, pattern_eff) = inferred_paths(&candidate.name);
    let mut preconditions: Vec<String> = pattern_pre.into_iter().map(str::to_string).collect();
    if let Some(meta) = metadata {
        preconditions.extend(meta.preconditions.iter().cloned());
    }
    Inferred {
        candidate: candidate.clone(),
        preconditions,
        side_effects: pattern_eff.into_iter().map(str::to_string).collect(),
    }
}

/// Dotted-path prefix containment: `draft` overlaps `draft.nodes`, and a path always
/// overlaps itself.
fn paths_overlap(a: &str, b: &str) -> bool {
    a == b || a.starts_with(&format!("{b}.")) || b.starts_with(&format!("{a}."))
}

fn any_overlap(a: &[String], b: &[String]) -> bool {
    a.iter().any(|pa| b.iter().any(|pb| paths_overlap(pa, pb)))
}

/// Two actions may run in parallel iff neither's side effects overlap the other's
/// preconditions, and neither's side effects overlap the other's side effects.
fn compatible(a: &Inferred, b: &Inferred) -> bool {
    !any_overlap(&a.side_effects, &b.preconditions)
        && !any_overlap(&b.side_effects, &a.preconditions)
        && !any_overlap(&a.side_effects, &b.side_effects)
}

/// Greedily partitions `candidates` into groups whose members are pairwise compatible,
/// preserving input order. The caller (the Orchestrator) only acts on `groups[0]` each
/// iteration; later groups matter only if it re-consults the analyzer after group 0 is
/// spent.
pub fn find_parallelizable_actions(
    candidates: &[ActionCandidate],
    metadata: &HashMap<String, ActionMetadata>,
    _state: &AgentState,
) -> Vec<Vec<ActionCandidate>> {
    let inferred: Vec<Inferred> = candidates
        .iter()
        .map(|c| infer(c, metadata.get(&c.name)))
        .collect();

    let mut groups: Vec<Vec<Inferred>> = Vec::new();
    for item in inferred {
        let slot = groups
            .iter()
            .position(|group| group.iter().all(|existing| compatible(existing, &item)));
        match slot {
            Some(idx) => groups[idx].push(item),
            None => groups.push(vec![item]),
        }
    }

    groups
        .into_iter()
        .map(|group| group.into_iter().map(|i| i.candidate).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(name: &str) -> ActionCandidate {
        ActionCandidate {
            name: name.to_string(),
            input: json!({}),
        }
    }

    fn no_metadata() -> HashMap<String, ActionMetadata> {
        HashMap::new()
    }

    #[test]
    fn resolve_then_facts_are_serialized_not_parallel() {
        let state = AgentState::new("r1", "plan tokyo");
        let candidates = vec![
            candidate("places.resolve_entities"),
            candidate("places.get_poi_facts"),
        ];
        let groups = find_parallelizable_actions(&candidates, &no_metadata(), &state);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0][0].name, "places.resolve_entities");
        assert_eq!(groups[1][0].name, "places.get_poi_facts");
    }

    #[test]
    fn facts_and_matrix_building_from_independent_nodes_do_not_conflict_on_their_own_writes() {
        // facts writes memory.semantic_facts.pois, matrix writes compute.time_matrix_*;
        // matrix reads draft.nodes and memory.semantic_facts, which overlaps facts' write,
        // so these two still cannot run together.
        let state = AgentState::new("r1", "plan tokyo");
        let candidates = vec![
            candidate("places.get_poi_facts"),
            candidate("transport.build_time_matrix"),
        ];
        let groups = find_parallelizable_actions(&candidates, &no_metadata(), &state);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn unrelated_actions_group_together() {
        let state = AgentState::new("r1", "plan tokyo");
        let candidates = vec![
            candidate("places.get_poi_facts"),
            candidate("webbrowse.browse"),
        ];
        let groups = find_parallelizable_actions(&candidates, &no_metadata(), &state);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
    }

    #[test]
    fn single_candidate_forms_its_own_group() {
        let state = AgentState::new("r1", "plan tokyo");
        let candidates = vec![candidate("places.resolve_entities")];
        let groups = find_parallelizable_actions(&candidates, &no_metadata(), &state);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 1);
    }

    #[test]
    fn empty_candidates_produce_no_groups() {
        let state = AgentState::new("r1", "plan tokyo");
        let groups = find_parallelizable_actions(&[], &no_metadata(), &state);
        assert!(groups.is_empty());
    }

    #[test]
    fn path_overlap_is_prefix_containment() {
        assert!(paths_overlap("draft", "draft.nodes"));
        assert!(paths_overlap("draft.nodes", "draft.nodes"));
        assert!(!paths_overlap("draft.nodes", "draft.edits"));
    }
}
