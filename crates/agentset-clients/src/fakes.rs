//! Hand-written in-memory fakes for every contract in this crate, used by
//! `agentset-engine`'s unit and integration tests in place of a mocking
//! framework (SPEC_FULL.md §10).

use crate::brain::{BrainClient, BrainRequest, BrainResponse};
use crate::capabilities::CapabilitiesClient;
use crate::error::ClientResult;
use crate::mission_control::{MissionControlClient, MissionControlEvent};
use crate::persistence::PersistenceClient;
use crate::security::SecurityManagerClient;
use crate::traffic::TrafficManagerClient;
use agentset_types::{AgentSnapshot, PersistedEvent, PluginOutput, WorkProduct};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Scripted Brain fake: returns the next queued response in order,
/// recording every request it saw for assertions.
#[derive(Default)]
pub struct FakeBrainClient {
    responses: Mutex<Vec<BrainResponse>>,
    pub requests: Mutex<Vec<BrainRequest>>,
}

impl FakeBrainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: BrainResponse) {
        self.responses.try_lock().unwrap().push(response);
    }

    pub fn with_response(self, response: BrainResponse) -> Self {
        self.push_response(response);
        self
    }
}

#[async_trait]
impl BrainClient for FakeBrainClient {
    async fn think(&self, request: BrainRequest) -> ClientResult<BrainResponse> {
        self.requests.lock().await.push(request);
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            return Ok(BrainResponse { outputs: vec![] });
        }
        Ok(responses.remove(0))
    }
}

/// Routes verbs to canned outputs; unregistered verbs return a single
/// success output echoing the verb name, which is enough for dependency-
/// resolution tests that don't care about payload content.
#[derive(Default)]
pub struct FakeCapabilitiesClient {
    scripted: Mutex<HashMap<String, Vec<PluginOutput>>>,
    /// Verbs registered here sleep for the given duration before returning,
    /// so tests can observe a step mid-execution (e.g. to exercise abort).
    delays: Mutex<HashMap<String, std::time::Duration>>,
}

impl FakeCapabilitiesClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, verb: impl Into<String>, outputs: Vec<PluginOutput>) {
        self.scripted
            .try_lock()
            .unwrap()
            .insert(verb.into(), outputs);
    }

    pub fn script_delay(&self, verb: impl Into<String>, delay: std::time::Duration) {
        self.delays.try_lock().unwrap().insert(verb.into(), delay);
    }
}

#[async_trait]
impl CapabilitiesClient for FakeCapabilitiesClient {
    async fn execute(
        &self,
        verb: &str,
        _inputs: HashMap<String, serde_json::Value>,
    ) -> ClientResult<Vec<PluginOutput>> {
        if let Some(delay) = self.delays.lock().await.get(verb).copied() {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.scripted.lock().await;
        if let Some(outputs) = scripted.get(verb) {
            return Ok(outputs.clone());
        }
        Ok(vec![PluginOutput::success(
            "result",
            agentset_types::ValueType::String,
            serde_json::Value::String(format!("{verb} completed")),
        )])
    }
}

#[derive(Default)]
pub struct FakePersistenceClient {
    pub events: Mutex<Vec<PersistedEvent>>,
    pub work_products: Mutex<Vec<WorkProduct>>,
    pub agent_state: Mutex<HashMap<String, AgentSnapshot>>,
}

impl FakePersistenceClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceClient for FakePersistenceClient {
    async fn append_event(&self, event: PersistedEvent) -> ClientResult<()> {
        self.events.lock().await.push(event);
        Ok(())
    }

    async fn save_work_product(&self, product: WorkProduct) -> ClientResult<()> {
        self.work_products.lock().await.push(product);
        Ok(())
    }

    async fn save_agent_state(&self, snapshot: AgentSnapshot) -> ClientResult<()> {
        self.agent_state
            .lock()
            .await
            .insert(snapshot.id.clone(), snapshot);
        Ok(())
    }

    async fn load_agent_state(&self, agent_id: &str) -> ClientResult<Option<AgentSnapshot>> {
        Ok(self.agent_state.lock().await.get(agent_id).cloned())
    }
}

/// All agents resolve to `None` (i.e. local) unless explicitly placed with
/// `place`, mirroring a single-AgentSet test topology by default.
#[derive(Default)]
pub struct FakeTrafficManagerClient {
    placements: Mutex<HashMap<String, String>>,
    pub removed: Mutex<Vec<String>>,
}

impl FakeTrafficManagerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place(&self, agent_id: impl Into<String>, agent_set_url: impl Into<String>) {
        self.placements
            .try_lock()
            .unwrap()
            .insert(agent_id.into(), agent_set_url.into());
    }
}

#[async_trait]
impl TrafficManagerClient for FakeTrafficManagerClient {
    async fn locate_agent(&self, agent_id: &str) -> ClientResult<Option<String>> {
        Ok(self.placements.lock().await.get(agent_id).cloned())
    }

    async fn notify_agent_removed(&self, agent_id: &str) -> ClientResult<()> {
        self.removed.lock().await.push(agent_id.to_string());
        Ok(())
    }
}

pub struct FakeSecurityManagerClient {
    pub token: String,
}

impl Default for FakeSecurityManagerClient {
    fn default() -> Self {
        Self {
            token: "fake-service-token".to_string(),
        }
    }
}

#[async_trait]
impl SecurityManagerClient for FakeSecurityManagerClient {
    async fn issue_service_token(&self) -> ClientResult<String> {
        Ok(self.token.clone())
    }
}

#[derive(Default)]
pub struct FakeMissionControlClient {
    pub notifications: Mutex<Vec<MissionControlEvent>>,
}

impl FakeMissionControlClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MissionControlClient for FakeMissionControlClient {
    async fn notify(&self, event: MissionControlEvent) -> ClientResult<()> {
        self.notifications.lock().await.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_capabilities_client_falls_back_to_verb_echo() {
        let client = FakeCapabilitiesClient::new();
        let outputs = client.execute("SEARCH", HashMap::new()).await.unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].success);
    }

    #[tokio::test]
    async fn fake_capabilities_client_honors_script() {
        let client = FakeCapabilitiesClient::new();
        client.script(
            "CODE",
            vec![PluginOutput::success(
                "diff",
                agentset_types::ValueType::String,
                serde_json::json!("patch"),
            )],
        );
        let outputs = client.execute("CODE", HashMap::new()).await.unwrap();
        assert_eq!(outputs[0].name, "diff");
    }

    #[tokio::test]
    async fn fake_traffic_manager_defaults_to_local() {
        let client = FakeTrafficManagerClient::new();
        assert!(client.locate_agent("agent-1").await.unwrap().is_none());
        client.place("agent-2", "http://set-b:9000");
        assert_eq!(
            client.locate_agent("agent-2").await.unwrap().as_deref(),
            Some("http://set-b:9000")
        );
    }
}
