//! MissionControl contract: user-facing notifications and the cross-set
//! step-completion handshake resolving Open Question (a) (spec.md §4.9, §9).

use crate::error::{ClientError, ClientResult};
use agentset_types::AgentStatus;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionControlEvent {
    AgentUpdate {
        agent_id: String,
        mission_id: String,
        status: AgentStatus,
    },
    WorkProductUpdate {
        agent_id: String,
        mission_id: String,
        work_product_id: String,
    },
    /// Sent to the AgentSet that's awaiting a step it delegated across sets,
    /// in place of a direct cross-process map lookup.
    StepCompleted {
        step_id: String,
        mission_id: String,
        result: serde_json::Value,
    },
}

#[async_trait]
pub trait MissionControlClient: Send + Sync {
    async fn notify(&self, event: MissionControlEvent) -> ClientResult<()>;
}

pub struct HttpMissionControlClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMissionControlClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MissionControlClient for HttpMissionControlClient {
    async fn notify(&self, event: MissionControlEvent) -> ClientResult<()> {
        let url = format!("{}/notify", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(&event)
            .send()
            .await
            .map_err(|e| ClientError::Transport(url.clone(), e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "MissionControl",
                status,
                body,
            });
        }
        Ok(())
    }
}
