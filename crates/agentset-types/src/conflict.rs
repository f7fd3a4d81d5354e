use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStatus {
    Pending,
    InProgress,
    Resolved,
    Failed,
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictStrategy {
    Voting,
    Consensus,
    Authority,
    Negotiation,
    External,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub vote: String,
    #[serde(default)]
    pub explanation: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conflict {
    pub id: String,
    pub description: String,
    #[serde(default)]
    pub conflicting_data: serde_json::Value,
    pub initiated_by: String,
    pub participants: Vec<String>,
    pub status: ConflictStatus,
    pub strategy: ConflictStrategy,
    #[serde(default)]
    pub votes: HashMap<String, Vote>,
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub escalated_to: Option<String>,
}

impl Conflict {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        initiated_by: impl Into<String>,
        participants: Vec<String>,
        strategy: ConflictStrategy,
        deadline: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            conflicting_data: serde_json::Value::Null,
            initiated_by: initiated_by.into(),
            participants,
            status: ConflictStatus::Pending,
            strategy,
            votes: HashMap::new(),
            resolution: None,
            explanation: None,
            deadline,
            escalated_to: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ConflictStatus::Resolved | ConflictStatus::Failed | ConflictStatus::Escalated
        )
    }

    pub fn all_voted(&self) -> bool {
        self.participants.iter().all(|p| self.votes.contains_key(p))
    }
}
