use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelegatedTaskStatus {
    Pending,
    Accepted,
    Rejected,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl DelegatedTaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DelegatedTaskStatus::Completed
                | DelegatedTaskStatus::Failed
                | DelegatedTaskStatus::Cancelled
                | DelegatedTaskStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelegationMetrics {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegatedTask {
    pub id: String,
    pub task_type: String,
    pub description: String,
    #[serde(default)]
    pub inputs: serde_json::Value,
    pub delegated_by: String,
    pub delegated_to: String,
    pub status: DelegatedTaskStatus,
    pub deadline: DateTime<Utc>,
    pub priority: Priority,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: DelegationMetrics,
}

impl DelegatedTask {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now > self.deadline
    }
}
