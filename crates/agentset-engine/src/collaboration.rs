//! `CollaborationManager` (SPEC_FULL.md §4.8): routes collaboration
//! messages to local agents, or forwards them to the owning remote
//! AgentSet via the TrafficManager — the fallback path shared with
//! `TaskDelegation::delegate_task` step 1.

use crate::agent::AgentCommand;
use crate::error::{EngineError, EngineResult};
use crate::mission::MissionRegistry;
use agentset_clients::TrafficManagerClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Open Question (a) resolution (spec.md §9, SPEC_FULL.md §9): cross-set
/// step-completion notification travels as an explicit message instead of
/// a direct map lookup into a remote AgentSet's agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollaborationMessage {
    UserMessage { content: String },
    StepCompleted {
        step_id: String,
        mission_id: String,
        result: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaborationEnvelope {
    pub target_agent_id: String,
    pub message: CollaborationMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CollaborationOutcome {
    DeliveredLocally,
    /// The envelope needs forwarding; caller (`agentset-server`) performs
    /// the actual HTTP POST with a service token attached.
    Forward { agent_set_url: String },
}

pub struct CollaborationManager {
    mission: MissionRegistry,
    traffic: Arc<dyn TrafficManagerClient>,
}

impl CollaborationManager {
    pub fn new(mission: MissionRegistry, traffic: Arc<dyn TrafficManagerClient>) -> Self {
        Self { mission, traffic }
    }

    pub async fn route(&self, envelope: CollaborationEnvelope) -> EngineResult<CollaborationOutcome> {
        if let Some(handle) = self.mission.get(&envelope.target_agent_id).await {
            let command = match envelope.message {
                CollaborationMessage::UserMessage { content } => AgentCommand::UserMessage { content },
                CollaborationMessage::StepCompleted { step_id, result, .. } => {
                    // Mirrors the USER_INPUT_RESPONSE path: a completed
                    // remote step updates local bookkeeping by id.
                    AgentCommand::UserInputResponse {
                        request_id: step_id,
                        response: result.to_string(),
                    }
                }
            };
            handle
                .commands
                .send(command)
                .await
                .map_err(|_| EngineError::lifecycle("target agent's command channel is closed"))?;
            return Ok(CollaborationOutcome::DeliveredLocally);
        }

        match self.traffic.locate_agent(&envelope.target_agent_id).await? {
            Some(agent_set_url) => Ok(CollaborationOutcome::Forward { agent_set_url }),
            None => Err(EngineError::not_found(format!(
                "agent {} not found locally or via traffic manager",
                envelope.target_agent_id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::mission::AgentHandle;
    use agentset_clients::fakes::FakeTrafficManagerClient;
    use agentset_types::{AgentStatus, Role};
    use tokio::sync::{mpsc, RwLock};

    #[tokio::test]
    async fn routes_to_local_agent() {
        let mission = MissionRegistry::new();
        let mut agent = Agent::new("a1", "m1", Role::Executor);
        agent.status = AgentStatus::Running;
        let (tx, mut rx) = mpsc::channel(8);
        mission
            .insert(Arc::new(AgentHandle {
                id: "a1".into(),
                mission_id: "m1".into(),
                state: Arc::new(RwLock::new(agent)),
                commands: tx,
            }))
            .await;

        let manager = CollaborationManager::new(mission, Arc::new(FakeTrafficManagerClient::new()));
        let outcome = manager
            .route(CollaborationEnvelope {
                target_agent_id: "a1".into(),
                message: CollaborationMessage::UserMessage { content: "hi".into() },
            })
            .await
            .unwrap();

        assert!(matches!(outcome, CollaborationOutcome::DeliveredLocally));
        assert!(matches!(rx.recv().await, Some(AgentCommand::UserMessage { .. })));
    }

    #[tokio::test]
    async fn forwards_to_remote_set_via_traffic_manager() {
        let mission = MissionRegistry::new();
        let traffic = Arc::new(FakeTrafficManagerClient::new());
        traffic.place("remote-agent", "http://set-b:9000");

        let manager = CollaborationManager::new(mission, traffic);
        let outcome = manager
            .route(CollaborationEnvelope {
                target_agent_id: "remote-agent".into(),
                message: CollaborationMessage::UserMessage { content: "hi".into() },
            })
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            CollaborationOutcome::Forward { agent_set_url } if agent_set_url == "http://set-b:9000"
        ));
    }
}
