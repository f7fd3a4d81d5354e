//! Cross-agent visibility within a single AgentSet: every agent belonging
//! to the same mission is reachable here so the execution loop can resolve
//! dependencies owned by a sibling agent and rewire sibling dependents
//! during plan replacement (spec.md §4.2.1 "Mission-wide means all agents
//! of the same missionId on this AgentSet").

use crate::agent::Agent;
use crate::dependency_resolver::MissionStepView;
use agentset_types::Step;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

use crate::agent::AgentCommand;

pub struct AgentHandle {
    pub id: String,
    pub mission_id: String,
    pub state: Arc<RwLock<Agent>>,
    pub commands: mpsc::Sender<AgentCommand>,
}

impl AgentHandle {
    pub async fn status(&self) -> agentset_types::AgentStatus {
        self.state.read().await.status
    }
}

/// Registry of every agent on this AgentSet, grouped for mission-wide
/// lookups. Owned by the supervisor; cloned (cheaply, it's `Arc`-backed)
/// into every agent's loop so it can see its mission siblings without a
/// back-reference to the whole supervisor (spec.md §9 "cyclic references").
#[derive(Clone, Default)]
pub struct MissionRegistry {
    agents: Arc<RwLock<HashMap<String, Arc<AgentHandle>>>>,
}

impl MissionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, handle: Arc<AgentHandle>) {
        self.agents.write().await.insert(handle.id.clone(), handle);
    }

    pub async fn remove(&self, agent_id: &str) -> Option<Arc<AgentHandle>> {
        self.agents.write().await.remove(agent_id)
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<AgentHandle>> {
        self.agents.read().await.get(agent_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.agents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn all(&self) -> Vec<Arc<AgentHandle>> {
        self.agents.read().await.values().cloned().collect()
    }

    /// Every agent sharing `mission_id`, including ones whose own loop is
    /// asking (used by `DependencyResolver` and by plan-replacement
    /// rewiring).
    pub async fn siblings(&self, mission_id: &str) -> Vec<Arc<AgentHandle>> {
        self.agents
            .read()
            .await
            .values()
            .filter(|h| h.mission_id == mission_id)
            .cloned()
            .collect()
    }

    pub async fn agents_in_mission(&self, mission_id: &str) -> usize {
        self.siblings(mission_id).await.len()
    }
}

/// A point-in-time snapshot of every step across every agent in a mission,
/// used both as a `MissionStepView` for dependency resolution and as the
/// write surface for mission-wide plan-replacement rewiring.
pub struct MissionSteps {
    /// stepId -> owning agent id, so rewritten steps can be written back.
    owner: HashMap<String, String>,
    steps: HashMap<String, Step>,
}

impl MissionSteps {
    pub async fn capture(registry: &MissionRegistry, mission_id: &str) -> Self {
        let mut owner = HashMap::new();
        let mut steps = HashMap::new();
        for handle in registry.siblings(mission_id).await {
            let agent = handle.state.read().await;
            for step in &agent.steps {
                owner.insert(step.id.clone(), agent.id.clone());
                steps.insert(step.id.clone(), step.clone());
            }
        }
        Self { owner, steps }
    }

    pub fn all_steps(&self) -> Vec<&Step> {
        self.steps.values().collect()
    }

    /// Write every rewritten/replaced step back to its owning agent. Used
    /// after `plan::rewire_dependents` has mutated a local copy of the
    /// mission-wide step set.
    pub async fn write_back(&self, registry: &MissionRegistry, rewritten: &[Step]) {
        for step in rewritten {
            let Some(owner_id) = self.owner.get(&step.id) else {
                continue;
            };
            let Some(handle) = registry.get(owner_id).await else {
                continue;
            };
            let mut agent = handle.state.write().await;
            if let Some(existing) = agent.find_step_mut(&step.id) {
                *existing = step.clone();
            }
        }
    }
}

impl MissionStepView for MissionSteps {
    fn find_step(&self, step_id: &str) -> Option<&Step> {
        self.steps.get(step_id)
    }
}
