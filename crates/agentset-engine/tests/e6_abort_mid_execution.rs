//! E6 — abort during a capability call (spec.md §8): a RUNNING step mid
//! HTTP call is cancelled, reverts to PENDING, the agent transitions to
//! ABORTED, and a duplicate `removeAgent` for the same id is idempotent.

use agentset_bus::InMemoryBus;
use agentset_clients::fakes::{
    FakeBrainClient, FakeCapabilitiesClient, FakeMissionControlClient, FakePersistenceClient,
    FakeSecurityManagerClient, FakeTrafficManagerClient,
};
use agentset_engine::agent_set::AgentSet;
use agentset_engine::context::EngineContext;
use agentset_registry::StepLocationRegistry;
use agentset_types::{Step, StepStatus};
use std::sync::Arc;
use std::time::Duration;

fn test_context(capabilities: Arc<FakeCapabilitiesClient>) -> Arc<EngineContext> {
    Arc::new(EngineContext::new(
        Arc::new(FakeBrainClient::new()),
        capabilities,
        Arc::new(FakePersistenceClient::new()),
        Arc::new(FakeMissionControlClient::new()),
        Arc::new(FakeTrafficManagerClient::new()),
        Arc::new(FakeSecurityManagerClient::default()),
        Arc::new(InMemoryBus::new()),
        Arc::new(StepLocationRegistry::new()),
    ))
}

#[tokio::test]
async fn abort_mid_capability_call_reverts_step_and_is_idempotent() {
    let capabilities = Arc::new(FakeCapabilitiesClient::new());
    capabilities.script_delay("SLOW_CALL", Duration::from_secs(5));
    let ctx = test_context(capabilities);
    let set = AgentSet::new(ctx, 10);

    let snapshot = set.create_agent("m1", None, "do a thing").await.unwrap();
    let agent_id = snapshot.id.clone();
    let handle = set.mission_registry().get(&agent_id).await.unwrap();

    // Seed a slow step directly (bypassing planning) so its execution is
    // observably in flight when we abort.
    let slow_step_id = {
        let mut agent = handle.state.write().await;
        let mut step = Step::new("slow-step", "m1", agent_id.clone(), 2, "SLOW_CALL");
        step.status = StepStatus::Pending;
        agent.steps.push(step);
        agent.steps.last().unwrap().id.clone()
    };

    // Wait for the loop to pick the step up and start executing it.
    let mut waited = Duration::ZERO;
    loop {
        let running = {
            let agent = handle.state.read().await;
            agent.find_step(&slow_step_id).map(|s| s.status == StepStatus::Running).unwrap_or(false)
        };
        if running {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        waited += Duration::from_millis(20);
        assert!(waited < Duration::from_secs(5), "step never entered RUNNING");
    }

    set.abort_agent(&agent_id).await.unwrap();

    // Give the loop a moment to process the Abort command.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let status = handle.status().await;
    assert_eq!(status, agentset_types::AgentStatus::Aborted);

    let reverted = {
        let agent = handle.state.read().await;
        agent.find_step(&slow_step_id).map(|s| s.status).unwrap()
    };
    assert_eq!(reverted, StepStatus::Pending);

    // removeAgentFromSet is idempotent (spec.md §8 round-trip property):
    // the second call for the same id logs a warning and still succeeds.
    set.remove_agent(&agent_id).await.unwrap();
    set.remove_agent(&agent_id).await.unwrap();
}
