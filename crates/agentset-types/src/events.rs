use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An append-only event written through the `PersistenceClient` (Librarian
/// contract, spec.md §6 "Persisted state").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEvent {
    pub event_type: String,
    pub agent_id: String,
    pub mission_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl PersistedEvent {
    pub fn new(
        event_type: impl Into<String>,
        agent_id: impl Into<String>,
        mission_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            agent_id: agent_id.into(),
            mission_id: mission_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }

    /// The `dependency_auto_remap` event required by the auto-mapping rule
    /// (spec.md §4.1, testable property 1).
    pub fn dependency_auto_remap(
        mission_id: impl Into<String>,
        agent_id: impl Into<String>,
        from_step_id: &str,
        to_step_id: &str,
        input_name: &str,
        mapped_from: &str,
    ) -> Self {
        Self::new(
            "dependency_auto_remap",
            agent_id,
            mission_id,
            serde_json::json!({
                "fromStepId": from_step_id,
                "toStepId": to_step_id,
                "inputName": input_name,
                "mappedFrom": mapped_from,
            }),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum WorkProductType {
    Final,
    Interim,
    Plan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkProductScope {
    MissionOutput,
    AgentOutput,
    AgentStep,
}

/// Durable output of a step, keyed by `(agentId, stepId)` (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkProduct {
    pub id: String,
    pub agent_id: String,
    pub step_id: String,
    #[serde(rename = "type")]
    pub product_type: WorkProductType,
    pub scope: WorkProductScope,
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub is_deliverable: bool,
}
