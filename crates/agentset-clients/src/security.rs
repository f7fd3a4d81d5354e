//! SecurityManager contract: service tokens attached to every outbound
//! cross-AgentSet HTTP call (spec.md §4.9).

use crate::error::{ClientError, ClientResult};
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct ServiceTokenResponse {
    token: String,
}

#[async_trait]
pub trait SecurityManagerClient: Send + Sync {
    async fn issue_service_token(&self) -> ClientResult<String>;
}

pub struct HttpSecurityManagerClient {
    http: reqwest::Client,
    base_url: String,
    client_secret: String,
}

impl HttpSecurityManagerClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            client_secret: client_secret.into(),
        }
    }
}

#[async_trait]
impl SecurityManagerClient for HttpSecurityManagerClient {
    async fn issue_service_token(&self) -> ClientResult<String> {
        let url = format!("{}/service-tokens", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.client_secret)
            .send()
            .await
            .map_err(|e| ClientError::Transport(url.clone(), e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Status {
                service: "SecurityManager",
                status,
                body,
            });
        }

        let body: ServiceTokenResponse = response
            .json()
            .await
            .map_err(|e| ClientError::Transport(url, e))?;
        Ok(body.token)
    }
}
