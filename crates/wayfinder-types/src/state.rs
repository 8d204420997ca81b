use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-request working memory for an in-flight trip-planning request.
///
/// Every mutation is copy-on-write: callers receive a new `AgentState` from
/// `wayfinder-state` rather than a mutable reference, so a stale handle can never clobber a
/// newer one once a request has fanned out into parallel actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    pub request_id: String,
    pub user_input: String,
    pub trip: Trip,
    pub draft: Draft,
    pub memory: Memory,
    pub compute: Compute,
    pub react: React,
    pub result: AgentResult,
    pub observability: Observability,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pacing {
    Relaxed,
    Normal,
    Tight,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayBoundary {
    pub start: String,
    pub end: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LunchBreak {
    pub enabled: bool,
    pub duration_min: u32,
    pub window: (String, String),
}

impl Default for LunchBreak {
    fn default() -> Self {
        Self {
            enabled: true,
            duration_min: 60,
            window: ("11:30".to_string(), "13:30".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<String>,
    pub days: u32,
    pub day_boundaries: Vec<DayBoundary>,
    pub lunch_break: LunchBreak,
    pub pacing: Pacing,
}

impl Default for Trip {
    fn default() -> Self {
        Self {
            trip_id: None,
            days: 1,
            day_boundaries: vec![DayBoundary {
                start: "10:00".to_string(),
                end: "22:00".to_string(),
            }],
            lunch_break: LunchBreak::default(),
            pacing: Pacing::Normal,
        }
    }
}

/// A resolved POI entity. Exact field set beyond `id` is left to the `places.*` action
/// provider; the core only ever reads `id`, `name` and `open_windows` for scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceNode {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub open_windows: Vec<(String, String)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftEdit {
    pub kind: String,
    pub detail: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Draft {
    pub nodes: Vec<PlaceNode>,
    pub hard_nodes: Vec<String>,
    pub soft_nodes: Vec<String>,
    pub edits: Vec<DraftEdit>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticFacts {
    pub pois: Vec<Value>,
    #[serde(default)]
    pub rules: Vec<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Memory {
    pub semantic_facts: SemanticFacts,
    pub episodic_snippets: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_profile: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Compute {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clusters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_matrix_api: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_matrix_robust: Option<Value>,
    pub optimization_results: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub robustness: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionLogEntry {
    pub step: u32,
    pub chosen_action: String,
    pub reason_code: String,
    pub facts: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub step: u32,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct React {
    pub step: u32,
    pub max_steps: u32,
    pub observations: Vec<Observation>,
    pub decision_log: Vec<DecisionLogEntry>,
}

impl Default for React {
    fn default() -> Self {
        Self {
            step: 0,
            max_steps: 8,
            observations: Vec::new(),
            decision_log: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Draft,
    Ready,
    NeedMoreInfo,
    NeedConsent,
    Failed,
    Timeout,
}

impl ResultStatus {
    /// Once a state reaches one of these, no further mutation should be applied to it.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    pub day: u32,
    pub start_min: u32,
    pub end_min: u32,
    #[serde(default)]
    pub wait_min: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub status: ResultStatus,
    pub timeline: Vec<TimelineEvent>,
    pub dropped_items: Vec<String>,
    pub explanations: Vec<String>,
}

impl Default for AgentResult {
    fn default() -> Self {
        Self {
            status: ResultStatus::Draft,
            timeline: Vec::new(),
            dropped_items: Vec::new(),
            explanations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Observability {
    pub router_ms: u64,
    pub latency_ms: u64,
    pub tool_calls: u32,
    pub browser_steps: u32,
    pub cost_est_usd: f64,
    pub fallback_used: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CreateStateOptions {
    pub trip_id: Option<String>,
    pub max_steps: Option<u32>,
}

impl AgentState {
    /// New-trip defaults: 1 day, `10:00-22:00`, lunch on, `normal` pacing, `max_steps=8`,
    /// `status=DRAFT`.
    pub fn new(request_id: impl Into<String>, user_input: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            user_input: user_input.into().trim().to_string(),
            trip: Trip::default(),
            draft: Draft::default(),
            memory: Memory::default(),
            compute: Compute::default(),
            react: React::default(),
            result: AgentResult::default(),
            observability: Observability::default(),
        }
    }
}
