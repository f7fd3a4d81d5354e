//! The `Agent` data struct (spec.md §3) and the external command channel
//! used to deliver messages, pause/resume/abort, and user-input responses
//! without the sender needing a lock on the agent's own task (spec.md §5
//! "per-agent message queues").

use agentset_types::{
    AgentSnapshot, AgentStatus, ConversationEntry, InputValue, Role, Step,
};
use std::collections::{HashMap, HashSet};
use tokio::sync::oneshot;

/// A message delivered to a running agent from outside its own loop:
/// HTTP handlers, the supervisor, or a sibling agent's collaboration call.
#[derive(Debug)]
pub enum AgentCommand {
    UserMessage { content: String },
    UserInputResponse { request_id: String, response: String },
    Pause,
    Resume,
    Abort,
    /// AWAIT_SIGNAL coordination (spec.md §5): a named signal arrived,
    /// waking any step paused on it.
    Signal { name: String },
    GetSnapshot { reply: oneshot::Sender<AgentSnapshot> },
    GetOutput { reply: oneshot::Sender<Option<Vec<agentset_types::PluginOutput>>> },
}

#[derive(Debug, Clone)]
pub struct Agent {
    pub id: String,
    pub mission_id: String,
    pub role: Role,
    pub status: AgentStatus,
    pub steps: Vec<Step>,
    pub delegated_step_ids: HashSet<String>,
    pub conversation: Vec<ConversationEntry>,
    pub mission_context: Option<serde_json::Value>,
    pub input_values: HashMap<String, InputValue>,
    /// requestId -> stepId, populated when a step goes WAITING on user
    /// input (spec.md §4.2 "Message handling").
    pub waiting_steps: HashMap<String, String>,
    pub reflection_done: bool,
    pub version: String,
}

impl Agent {
    pub fn new(id: impl Into<String>, mission_id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            mission_id: mission_id.into(),
            role,
            status: AgentStatus::Initializing,
            steps: Vec::new(),
            delegated_step_ids: HashSet::new(),
            conversation: Vec::new(),
            mission_context: None,
            input_values: HashMap::new(),
            waiting_steps: HashMap::new(),
            reflection_done: false,
            version: "0.0.1".to_string(),
        }
    }

    /// Active work exists iff any local step is PENDING/RUNNING/WAITING, or
    /// there are outstanding delegated steps (spec.md §4.2 "Loop").
    pub fn has_active_work(&self) -> bool {
        self.steps.iter().any(|s| {
            matches!(
                s.status,
                agentset_types::StepStatus::Pending
                    | agentset_types::StepStatus::Running
                    | agentset_types::StepStatus::Waiting
            )
        }) || !self.delegated_step_ids.is_empty()
    }

    pub fn find_step_mut(&mut self, step_id: &str) -> Option<&mut Step> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    pub fn find_step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.clone(),
            mission_id: self.mission_id.clone(),
            role: self.role.clone(),
            status: self.status,
            steps: self.steps.clone(),
            delegated_step_ids: self.delegated_step_ids.clone(),
            conversation: self.conversation.clone(),
            mission_context: self.mission_context.clone(),
            input_values: self.input_values.clone(),
            waiting_steps: self.waiting_steps.clone(),
            reflection_done: self.reflection_done,
            version: self.version.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: AgentSnapshot) {
        self.role = snapshot.role;
        self.status = snapshot.status;
        self.steps = snapshot.steps;
        self.delegated_step_ids = snapshot.delegated_step_ids;
        self.conversation = snapshot.conversation;
        self.mission_context = snapshot.mission_context;
        self.input_values = snapshot.input_values;
        self.waiting_steps = snapshot.waiting_steps;
        self.reflection_done = snapshot.reflection_done;
        self.version = snapshot.version;
    }

    /// The final output of a completed mission: the results of every
    /// endpoint step, in step order.
    pub fn final_output(&self) -> Option<Vec<agentset_types::PluginOutput>> {
        let mut outputs = Vec::new();
        for step in &self.steps {
            if step.is_endpoint(&self.steps) {
                if let Some(result) = &step.result {
                    outputs.extend(result.clone());
                }
            }
        }
        if outputs.is_empty() {
            None
        } else {
            Some(outputs)
        }
    }

    pub fn error_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == agentset_types::StepStatus::Error)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentset_types::StepStatus;

    #[test]
    fn has_active_work_false_when_all_terminal() {
        let mut a = Agent::new("a1", "m1", Role::Executor);
        let mut s = Step::new("s1", "m1", "a1", 1, "ACCOMPLISH");
        s.status = StepStatus::Completed;
        a.steps.push(s);
        assert!(!a.has_active_work());
    }

    #[test]
    fn has_active_work_true_when_delegated_pending() {
        let mut a = Agent::new("a1", "m1", Role::Executor);
        a.delegated_step_ids.insert("s1".to_string());
        assert!(a.has_active_work());
    }
}
