//! TrafficManager contract: cross-AgentSet agent location lookup, consulted
//! whenever a step/delegation/conflict/collaboration target isn't local
//! (spec.md §4.9).

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct LocateAgentResponse {
    #[serde(default)]
    agent_set_url: Option<String>,
}

#[async_trait]
pub trait TrafficManagerClient: Send + Sync {
    async fn locate_agent(&self, agent_id: &str) -> ClientResult<Option<String>>;
    async fn notify_agent_removed(&self, agent_id: &str) -> ClientResult<()>;
}

pub struct HttpTrafficManagerClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTrafficManagerClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl TrafficManagerClient for HttpTrafficManagerClient {
    async fn locate_agent(&self, agent_id: &str) -> ClientResult<Option<String>> {
        let url = format!("{}/agents/{}/location", self.base_url, agent_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(url.clone(), e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "TrafficManager",
                status,
                body,
            });
        }

        let body: LocateAgentResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(url, e))?;
        Ok(body.agent_set_url)
    }

    async fn notify_agent_removed(&self, agent_id: &str) -> ClientResult<()> {
        let url = format!("{}/agents/{}", self.base_url, agent_id);
        let response = self
            .http
            .delete(&url)
            .send()
            .await
            .map_err(|e| ClientError::Transport(url.clone(), e))?;

        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND
        {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "TrafficManager",
                status,
                body,
            });
        }
        Ok(())
    }
}
