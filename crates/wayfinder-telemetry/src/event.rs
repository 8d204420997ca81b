//! Append-only event journal: every `record` both pushes to an in-memory, queryable log
//! and emits a structured `tracing` event, so a deployment can either read the journal
//! back directly or ship the trace output to whatever collector it already runs.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RouterDecision,
    System2Step,
    CriticResult,
    WebbrowseBlocked,
    FallbackTriggered,
    AgentComplete,
}

impl EventKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::RouterDecision => "router_decision",
            Self::System2Step => "system2_step",
            Self::CriticResult => "critic_result",
            Self::WebbrowseBlocked => "webbrowse_blocked",
            Self::FallbackTriggered => "fallback_triggered",
            Self::AgentComplete => "agent_complete",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Clone, Default)]
pub struct EventJournal {
    events: Arc<RwLock<Vec<Event>>>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, kind: EventKind, request_id: &str, data: Value, metadata: Value) {
        let event = Event {
            kind,
            request_id: request_id.to_string(),
            timestamp: Utc::now(),
            data,
            metadata,
        };
        tracing::info!(
            target: "wayfinder.telemetry",
            event = kind.as_str(),
            request_id = %event.request_id,
            data = %event.data,
            "agent_event"
        );
        self.events.write().await.push(event);
    }

    pub async fn for_request(&self, request_id: &str) -> Vec<Event> {
        self.events
            .read()
            .await
            .iter()
            .filter(|e| e.request_id == request_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
