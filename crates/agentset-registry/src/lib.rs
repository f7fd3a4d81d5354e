//! Maps `stepId -> (agentId, agentSetURL)`, consulted for cross-set
//! dependency dereference and delegation routing (spec.md §4.1 item 1).
//!
//! Single-writer per stepId (the owning agent), many-reader. The registry
//! itself is authoritative only for the AgentSet that holds it; agents on
//! other sets are looked up via the TrafficManager contract, out of scope
//! here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLocation {
    pub agent_id: String,
    pub agent_set_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("step {0} is not registered")]
    NotRegistered(String),
}

#[derive(Default)]
pub struct StepLocationRegistry {
    locations: RwLock<HashMap<String, StepLocation>>,
}

impl StepLocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new step location. Overwrites any existing entry — the
    /// owning agent is the sole writer for its own step ids.
    pub async fn register(&self, step_id: impl Into<String>, location: StepLocation) {
        let step_id = step_id.into();
        tracing::debug!(step_id = %step_id, agent_id = %location.agent_id, "registering step location");
        self.locations.write().await.insert(step_id, location);
    }

    /// Update an existing registration. Fails if the step id was never
    /// registered (spec.md §4.3).
    pub async fn update(&self, step_id: &str, location: StepLocation) -> Result<(), RegistryError> {
        let mut locations = self.locations.write().await;
        if !locations.contains_key(step_id) {
            return Err(RegistryError::NotRegistered(step_id.to_string()));
        }
        locations.insert(step_id.to_string(), location);
        Ok(())
    }

    pub async fn get(&self, step_id: &str) -> Option<StepLocation> {
        self.locations.read().await.get(step_id).cloned()
    }

    pub async fn remove(&self, step_id: &str) -> Option<StepLocation> {
        self.locations.write().await.remove(step_id)
    }

    /// Remove every step owned by `agent_id`, e.g. on agent removal.
    pub async fn remove_agent(&self, agent_id: &str) -> usize {
        let mut locations = self.locations.write().await;
        let before = locations.len();
        locations.retain(|_, loc| loc.agent_id != agent_id);
        before - locations.len()
    }

    pub async fn len(&self) -> usize {
        self.locations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(agent_id: &str) -> StepLocation {
        StepLocation {
            agent_id: agent_id.to_string(),
            agent_set_url: "http://localhost:9000".to_string(),
        }
    }

    #[tokio::test]
    async fn register_then_get_roundtrips() {
        let registry = StepLocationRegistry::new();
        registry.register("step-1", loc("agent-a")).await;
        let found = registry.get("step-1").await.unwrap();
        assert_eq!(found.agent_id, "agent-a");
    }

    #[tokio::test]
    async fn update_fails_when_not_registered() {
        let registry = StepLocationRegistry::new();
        let err = registry.update("missing", loc("agent-a")).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotRegistered(_)));
    }

    #[tokio::test]
    async fn update_succeeds_after_register() {
        let registry = StepLocationRegistry::new();
        registry.register("step-1", loc("agent-a")).await;
        registry.update("step-1", loc("agent-b")).await.unwrap();
        assert_eq!(registry.get("step-1").await.unwrap().agent_id, "agent-b");
    }

    #[tokio::test]
    async fn remove_agent_clears_only_its_steps() {
        let registry = StepLocationRegistry::new();
        registry.register("step-1", loc("agent-a")).await;
        registry.register("step-2", loc("agent-b")).await;
        let removed = registry.remove_agent("agent-a").await;
        assert_eq!(removed, 1);
        assert!(registry.get("step-1").await.is_none());
        assert!(registry.get("step-2").await.is_some());
    }
}
