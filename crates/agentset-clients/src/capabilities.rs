//! CapabilitiesManager contract: dispatches every step verb other than the
//! Brain-routed ones (spec.md §4.9).

use crate::error::{ClientError, ClientResult};
use crate::retry::{with_retry, RetryOutcome};
use agentset_types::PluginOutput;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

const CAPABILITY_TIMEOUT: Duration = Duration::from_millis(1_800_000);

#[derive(Debug, Clone, Serialize)]
pub struct CapabilityRequest {
    pub verb: String,
    pub inputs: HashMap<String, serde_json::Value>,
}

#[async_trait]
pub trait CapabilitiesClient: Send + Sync {
    async fn execute(
        &self,
        verb: &str,
        inputs: HashMap<String, serde_json::Value>,
    ) -> ClientResult<Vec<PluginOutput>>;
}

pub struct HttpCapabilitiesClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpCapabilitiesClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl CapabilitiesClient for HttpCapabilitiesClient {
    async fn execute(
        &self,
        verb: &str,
        inputs: HashMap<String, serde_json::Value>,
    ) -> ClientResult<Vec<PluginOutput>> {
        let url = format!("{}/execute", self.base_url);
        let request = CapabilityRequest {
            verb: verb.to_string(),
            inputs,
        };

        with_retry(|| async {
            let response = self
                .http
                .post(&url)
                .timeout(CAPABILITY_TIMEOUT)
                .json(&request)
                .send()
                .await
                .map_err(|e| RetryOutcome::Retryable(ClientError::Transport(url.clone(), e)))?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                let err = ClientError::Status {
                    service: "CapabilitiesManager",
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
