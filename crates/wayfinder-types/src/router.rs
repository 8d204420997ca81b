use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Route {
    System1Api,
    System1Rag,
    System2Reasoning,
    System2Webbrowse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RouteReason {
    MultiConstraint,
    MissingInfo,
    NoApi,
    RealtimeWeb,
    HighRiskAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouteBudget {
    pub max_seconds: u32,
    pub max_steps: u32,
    pub max_browser_steps: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiMode {
    Fast,
    Slow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiHint {
    pub mode: UiMode,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterOutput {
    pub route: Route,
    pub confidence: f32,
    pub reasons: Vec<RouteReason>,
    pub required_capabilities: Vec<String>,
    pub consent_required: bool,
    pub budget: RouteBudget,
    pub ui_hint: UiHint,
}

impl RouterOutput {
    /// Routing confidence is always reported in `[0.1, 0.95]` — never fully certain,
    /// never fully in doubt.
    pub fn clamp_confidence(value: f32) -> f32 {
        value.clamp(0.1, 0.95)
    }
}
