//! Request/response envelopes that cross the agent entry boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use wayfinder_types::{DecisionLogEntry, Route};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationContext {
    #[serde(default)]
    pub recent_messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestOptions {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub allow_webbrowse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_browser_steps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_budget_usd: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub request_id: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trip_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_context: Option<ConversationContext>,
    #[serde(default)]
    pub options: RequestOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseStatus {
    Ok,
    NeedMoreInfo,
    NeedConsent,
    Failed,
    Timeout,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultPayload {
    pub status: Option<ResponseStatus>,
    pub answer_text: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplainPayload {
    pub decision_log: Vec<DecisionLogEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemMode {
    System1,
    System2,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseObservability {
    pub latency_ms: u64,
    pub router_ms: u64,
    pub system_mode: SystemMode,
    pub tool_calls: u32,
    pub browser_steps: u32,
    pub tokens_est: u64,
    pub cost_est_usd: f64,
    pub fallback_used: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub request_id: String,
    pub route: Route,
    pub result: ResultPayload,
    pub explain: ExplainPayload,
    pub observability: ResponseObservability,
}

impl ResponseStatus {
    /// `READY→OK, DRAFT→NEED_MORE_INFO, NEED_MORE_INFO→NEED_MORE_INFO,
    /// NEED_CONSENT→NEED_CONSENT, FAILED→FAILED, TIMEOUT→TIMEOUT`.
    pub fn from_agent_status(status: wayfinder_types::ResultStatus) -> Self {
        use wayfinder_types::ResultStatus as S;
        match status {
            S::Ready => Self::Ok,
            S::Draft | S::NeedMoreInfo => Self::NeedMoreInfo,
            S::NeedConsent => Self::NeedConsent,
            S::Failed => Self::Failed,
            S::Timeout => Self::Timeout,
        }
    }
}
