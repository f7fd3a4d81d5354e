//! `LifecycleManager` (spec.md §4.6): checkpoint timers, versioning,
//! restore, health-score monitoring, and best-effort cross-set migration.

use crate::agent::AgentCommand;
use crate::error::{EngineError, EngineResult};
use crate::mission::MissionRegistry;
use agentset_clients::{PersistenceClient, SecurityManagerClient};
use agentset_types::{AgentSnapshot, PersistedEvent};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(15 * 60);
const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);
const HEALTH_SCORE_FLOOR: i32 = 50;

pub struct LifecycleManager {
    mission: MissionRegistry,
    persistence: Arc<dyn PersistenceClient>,
    security: Arc<dyn SecurityManagerClient>,
    http: reqwest::Client,
    checkpoint_interval: Duration,
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl LifecycleManager {
    pub fn new(
        mission: MissionRegistry,
        persistence: Arc<dyn PersistenceClient>,
        security: Arc<dyn SecurityManagerClient>,
        http: reqwest::Client,
    ) -> Arc<Self> {
        Arc::new(Self {
            mission,
            persistence,
            security,
            http,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            timers: Mutex::new(HashMap::new()),
        })
    }

    /// Arm the per-agent checkpoint timer. Called on agent creation and on
    /// resume (spec.md §4.6 "Checkpointing").
    pub async fn arm_checkpoint_timer(self: &Arc<Self>, agent_id: &str) {
        self.clear_checkpoint_timer(agent_id).await;
        let this = self.clone();
        let agent_id = agent_id.to_string();
        let interval = self.checkpoint_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it
            loop {
                ticker.tick().await;
                if let Err(e) = this.checkpoint(&agent_id).await {
                    tracing::warn!(agent_id = %agent_id, error = %e, "scheduled checkpoint failed");
                }
            }
        });
        self.timers.lock().await.insert(agent_id, handle);
    }

    /// Cleared on pause/abort (spec.md §4.6 "Checkpointing" / §5
    /// "Cancellation and timeout").
    pub async fn clear_checkpoint_timer(&self, agent_id: &str) {
        if let Some(handle) = self.timers.lock().await.remove(agent_id) {
            handle.abort();
        }
    }

    /// `agent.saveAgentState()`, recording a `checkpointed` lifecycle
    /// event.
    pub async fn checkpoint(&self, agent_id: &str) -> EngineResult<()> {
        let Some(handle) = self.mission.get(agent_id).await else {
            return Err(EngineError::not_found(format!("agent {agent_id}")));
        };
        let snapshot = handle.state.read().await.snapshot();
        self.persistence.save_agent_state(snapshot).await?;
        self.persistence
            .append_event(PersistedEvent::new(
                "checkpointed",
                agent_id,
                &handle.mission_id,
                serde_json::json!({}),
            ))
            .await?;
        Ok(())
    }

    /// Increment the patch component of the agent's version and save the
    /// state under a version-suffixed id (spec.md §4.6 "Versioning").
    pub async fn create_version(
        &self,
        agent_id: &str,
        description: &str,
        changes: serde_json::Value,
    ) -> EngineResult<String> {
        let Some(handle) = self.mission.get(agent_id).await else {
            return Err(EngineError::not_found(format!("agent {agent_id}")));
        };
        let mut agent = handle.state.write().await;
        agent.version = bump_patch(&agent.version);
        let snapshot = agent.snapshot();
        let versioned_id = snapshot.versioned_id();
        drop(agent);

        self.persistence.save_agent_state(snapshot).await?;
        self.persistence
            .append_event(PersistedEvent::new(
                "version_created",
                agent_id,
                &handle.mission_id,
                serde_json::json!({ "description": description, "changes": changes, "versionedId": versioned_id }),
            ))
            .await?;
        Ok(versioned_id)
    }

    /// Replace an agent's in-memory fields from stored state (spec.md §4.6
    /// "Restore"): pause -> restore -> resume, emitting a `migrated` event.
    pub async fn restore(&self, agent_id: &str) -> EngineResult<()> {
        let Some(handle) = self.mission.get(agent_id).await else {
            return Err(EngineError::not_found(format!("agent {agent_id}")));
        };
        let Some(snapshot) = self.persistence.load_agent_state(agent_id).await? else {
            return Err(EngineError::not_found(format!("no saved state for {agent_id}")));
        };

        handle
            .commands
            .send(AgentCommand::Pause)
            .await
            .map_err(|_| EngineError::lifecycle("agent command channel closed"))?;

        {
            let mut agent = handle.state.write().await;
            agent.restore(snapshot);
        }

        self.persistence
            .append_event(PersistedEvent::new(
                "migrated",
                agent_id,
                &handle.mission_id,
                serde_json::json!({}),
            ))
            .await?;

        handle
            .commands
            .send(AgentCommand::Resume)
            .await
            .map_err(|_| EngineError::lifecycle("agent command channel closed"))?;
        Ok(())
    }

    /// Periodic health monitor (spec.md §4.6, ≥60s): force a checkpoint
    /// for any agent whose health score drops below 50.
    pub async fn health_sweep(&self) {
        for handle in self.mission.all().await {
            let (score, mission_id) = {
                let agent = handle.state.read().await;
                (health_score(&agent), agent.mission_id.clone())
            };
            let _ = mission_id;
            if score < HEALTH_SCORE_FLOOR {
                if let Err(e) = self.checkpoint(&handle.id).await {
                    tracing::warn!(agent_id = %handle.id, error = %e, "forced checkpoint after low health score failed");
                }
            }
        }
    }

    /// Best-effort cross-set migration (spec.md §4.6 "Migration"):
    /// pause -> checkpoint -> POST to the target's `migrateAgent` endpoint
    /// with a service token -> unregister locally on success.
    pub async fn migrate(&self, agent_id: &str, target_agent_set_url: &str) -> EngineResult<()> {
        let Some(handle) = self.mission.get(agent_id).await else {
            return Err(EngineError::not_found(format!("agent {agent_id}")));
        };

        handle
            .commands
            .send(AgentCommand::Pause)
            .await
            .map_err(|_| EngineError::lifecycle("agent command channel closed"))?;

        self.checkpoint(agent_id).await?;
        let snapshot = handle.state.read().await.snapshot();
        let token = self.security.issue_service_token().await?;

        let url = format!("{target_agent_set_url}/migrateAgent");
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&snapshot)
            .send()
            .await
            .map_err(|e| EngineError::TerminalExternal {
                service: "AgentSet (migration target)",
                source: agentset_clients::ClientError::Transport(url, e),
            })?;

        if !response.status().is_success() {
            return Err(EngineError::lifecycle(format!(
                "migration target rejected handoff: {}",
                response.status()
            )));
        }

        self.mission.remove(agent_id).await;
        Ok(())
    }
}

fn bump_patch(version: &str) -> String {
    let mut parts: Vec<u32> = version.split('.').filter_map(|p| p.parse().ok()).collect();
    while parts.len() < 3 {
        parts.push(0);
    }
    parts[2] += 1;
    format!("{}.{}.{}", parts[0], parts[1], parts[2])
}

/// `healthScore = 100 - 10*errorCount - (status != RUNNING ? 20 : 0)`,
/// clamped [0, 100] (spec.md §4.6 "Health monitor").
fn health_score(agent: &crate::agent::Agent) -> i32 {
    let mut score = 100 - 10 * agent.error_count() as i32;
    if agent.status != agentset_types::AgentStatus::Running {
        score -= 20;
    }
    score.clamp(0, 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_patch_increments_last_component() {
        assert_eq!(bump_patch("0.0.1"), "0.0.2");
        assert_eq!(bump_patch("1.2.9"), "1.2.10");
        assert_eq!(bump_patch(""), "0.0.1");
    }

    #[test]
    fn health_score_penalizes_errors_and_non_running_status() {
        let mut agent = crate::agent::Agent::new("a", "m", agentset_types::Role::Executor);
        assert_eq!(health_score(&agent), 80); // not running (initializing)
        agent.status = agentset_types::AgentStatus::Running;
        assert_eq!(health_score(&agent), 100);

        let mut s = agentset_types::Step::new("s1", "m", "a", 1, "X");
        s.status = agentset_types::StepStatus::Error;
        agent.steps.push(s);
        assert_eq!(health_score(&agent), 90);
    }

    #[test]
    fn health_score_clamped_at_zero() {
        let mut agent = crate::agent::Agent::new("a", "m", agentset_types::Role::Executor);
        for i in 0..20 {
            let mut s = agentset_types::Step::new(format!("s{i}"), "m", "a", 1, "X");
            s.status = agentset_types::StepStatus::Error;
            agent.steps.push(s);
        }
        assert_eq!(health_score(&agent), 0);
    }
}
