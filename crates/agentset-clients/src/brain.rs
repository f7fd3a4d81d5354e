//! Brain contract: planning (ACCOMPLISH), reflection, simple-conversational
//! replies, and conflict NEGOTIATION all go through `think` (spec.md §4.9).

use crate::error::{ClientError, ClientResult};
use crate::retry::{with_retry, RetryOutcome};
use agentset_types::PluginOutput;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// spec.md §5 "Timeouts": ACCOMPLISH calls get a longer budget than every
/// other capability/Brain call.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1_800_000);
const ACCOMPLISH_TIMEOUT: Duration = Duration::from_millis(3_600_000);

#[derive(Debug, Clone, Serialize)]
pub struct BrainRequest {
    pub agent_id: String,
    pub mission_id: String,
    pub prompt: String,
    #[serde(default)]
    pub context: serde_json::Value,
    pub conversation_type: BrainConversationType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BrainConversationType {
    Accomplish,
    Reflect,
    SimpleResponse,
    Negotiate,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrainResponse {
    pub outputs: Vec<PluginOutput>,
}

#[async_trait]
pub trait BrainClient: Send + Sync {
    async fn think(&self, request: BrainRequest) -> ClientResult<BrainResponse>;
}

pub struct HttpBrainClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBrainClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl BrainClient for HttpBrainClient {
    async fn think(&self, request: BrainRequest) -> ClientResult<BrainResponse> {
        let url = format!("{}/think", self.base_url);
        let timeout = if request.conversation_type == BrainConversationType::Accomplish {
            ACCOMPLISH_TIMEOUT
        } else {
            DEFAULT_TIMEOUT
        };

        with_retry(|| async {
            let response = self
                .http
                .post(&url)
                .timeout(timeout)
                .json(&request)
                .send()
                .await
                .map_err(|e| RetryOutcome::Retryable(ClientError::Transport(url.clone(), e)))?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                let err = ClientError::Status {
                    service: "Brain",
                    status,
                    body,
                };
                return if status >= 500 {
                    Err(RetryOutcome::Retryable(err))
                } else {
                    Err(RetryOutcome::Fatal(err))
                };
            }

            response
                .json()
                .await
                .map_err(|e| RetryOutcome::Fatal(ClientError::Transport(url.clone(), e)))
        })
        .await
    }
}
