//! Librarian contract: the append-only event log, work products, and
//! agent-state checkpoints (spec.md §4.9, §6 "Persisted state").

use crate::error::{ClientError, ClientResult};
use agentset_types::{AgentSnapshot, PersistedEvent, WorkProduct};
use async_trait::async_trait;

#[async_trait]
pub trait PersistenceClient: Send + Sync {
    async fn append_event(&self, event: PersistedEvent) -> ClientResult<()>;
    async fn save_work_product(&self, product: WorkProduct) -> ClientResult<()>;
    async fn save_agent_state(&self, snapshot: AgentSnapshot) -> ClientResult<()>;
    async fn load_agent_state(&self, agent_id: &str) -> ClientResult<Option<AgentSnapshot>>;
}

pub struct HttpPersistenceClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpPersistenceClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    async fn post(&self, path: &str, body: &impl serde::Serialize) -> ClientResult<()> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ClientError::Transport(url.clone(), e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "Librarian",
                status,
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceClient for HttpPersistenceClient {
    async fn append_event(&self, event: PersistedEvent) -> ClientResult<()> {
        self.post("/events", &event).await
    }

    async fn save_work_product(&self, product: WorkProduct) -> ClientResult<()> {
        self.post("/work-products", &product).await
    }

    async fn save_agent_state(&self, snapshot: AgentSnapshot) -> ClientResult<()> {
        self.post(&format!("/agents/{}/state", snapshot.id), &snapshot)
            .await
    }

    async fn load_agent_state(&self, agent_id: &str) -> ClientResult<Option<AgentSnapshot>> {
        let url = format!("{}/agents/{}/state", self.base_url, agent_id);
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
                service: "Librarian",
                status,
                body,
            });
        }

        let snapshot: AgentSnapshot = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(url, e))?;
        Ok(Some(snapshot))
    }
}
