use crate::step::Step;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Initializing,
    Running,
    Paused,
    Completed,
    Error,
    Aborted,
    Planning,
    Reflecting,
    Unknown,
}

impl AgentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Error | AgentStatus::Aborted)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentStatus::Initializing => "INITIALIZING",
            AgentStatus::Running => "RUNNING",
            AgentStatus::Paused => "PAUSED",
            AgentStatus::Completed => "COMPLETED",
            AgentStatus::Error => "ERROR",
            AgentStatus::Aborted => "ABORTED",
            AgentStatus::Planning => "PLANNING",
            AgentStatus::Reflecting => "REFLECTING",
            AgentStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{s}")
    }
}

impl FromStr for AgentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "INITIALIZING" => AgentStatus::Initializing,
            "RUNNING" => AgentStatus::Running,
            "PAUSED" => AgentStatus::Paused,
            "COMPLETED" => AgentStatus::Completed,
            "ERROR" => AgentStatus::Error,
            "ABORTED" => AgentStatus::Aborted,
            "PLANNING" => AgentStatus::Planning,
            "REFLECTING" => AgentStatus::Reflecting,
            _ => AgentStatus::Unknown,
        })
    }
}

/// Coarse specialization label used to decide whether a step is delegated
/// (spec.md §6 verb→role defaults).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Researcher,
    Coder,
    Creative,
    Critic,
    Executor,
    Coordinator,
    DomainExpert,
}

impl Default for Role {
    fn default() -> Self {
        Role::Executor
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Researcher => "researcher",
            Role::Coder => "coder",
            Role::Creative => "creative",
            Role::Critic => "critic",
            Role::Executor => "executor",
            Role::Coordinator => "coordinator",
            Role::DomainExpert => "domain_expert",
        };
        write!(f, "{s}")
    }
}

impl Role {
    /// Verb→role defaults (spec.md §6). Falls back to substring matching,
    /// then to `executor`.
    pub fn for_verb(verb: &str) -> Role {
        let v = verb.to_ascii_lowercase();
        const TABLE: &[(&[&str], Role)] = &[
            (&["research", "analyze", "investigate", "search", "find"], Role::Researcher),
            (&["code"], Role::Coder),
            (&["create", "generate", "design", "write", "compose"], Role::Creative),
            (&["evaluate", "review", "assess", "critique", "judge"], Role::Critic),
            (&["execute", "implement", "perform", "run", "do", "accomplish"], Role::Executor),
            (&["coordinate", "manage", "organize", "plan", "direct"], Role::Coordinator),
            (&["advise", "consult", "explain", "teach", "guide"], Role::DomainExpert),
        ];
        for (verbs, role) in TABLE {
            if verbs.iter().any(|candidate| v == *candidate) {
                return role.clone();
            }
        }
        for (verbs, role) in TABLE {
            if verbs.iter().any(|candidate| v.contains(candidate)) {
                return role.clone();
            }
        }
        Role::Executor
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: String,
    pub content: String,
}

/// A snapshot of an agent's mutable state, as written to and read back from
/// the persistence layer by the lifecycle manager's checkpointing (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub mission_id: String,
    pub role: Role,
    pub status: AgentStatus,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub delegated_step_ids: HashSet<String>,
    #[serde(default)]
    pub conversation: Vec<ConversationEntry>,
    #[serde(default)]
    pub mission_context: Option<serde_json::Value>,
    #[serde(default)]
    pub input_values: HashMap<String, crate::value::InputValue>,
    #[serde(default)]
    pub waiting_steps: HashMap<String, String>,
    #[serde(default)]
    pub reflection_done: bool,
    #[serde(default)]
    pub version: String,
}

impl AgentSnapshot {
    pub fn versioned_id(&self) -> String {
        if self.version.is_empty() {
            self.id.clone()
        } else {
            format!("{}-v{}", self.id, self.version)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verb_role_defaults() {
        assert_eq!(Role::for_verb("research"), Role::Researcher);
        assert_eq!(Role::for_verb("CODE"), Role::Coder);
        assert_eq!(Role::for_verb("generate"), Role::Creative);
        assert_eq!(Role::for_verb("review"), Role::Critic);
        assert_eq!(Role::for_verb("accomplish"), Role::Executor);
        assert_eq!(Role::for_verb("organize"), Role::Coordinator);
        assert_eq!(Role::for_verb("teach"), Role::DomainExpert);
        assert_eq!(Role::for_verb("reorganize_spreadsheet"), Role::Coordinator);
        assert_eq!(Role::for_verb("frobnicate"), Role::Executor);
    }

    #[test]
    fn terminal_agent_statuses() {
        assert!(AgentStatus::Completed.is_terminal());
        assert!(AgentStatus::Error.is_terminal());
        assert!(AgentStatus::Aborted.is_terminal());
        assert!(!AgentStatus::Running.is_terminal());
        assert!(!AgentStatus::Paused.is_terminal());
    }
}
