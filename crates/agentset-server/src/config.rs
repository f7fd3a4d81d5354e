//! `Config::from_env` (SPEC_FULL.md §10), mirroring `agime-team-server`'s
//! env-var-driven configuration loader. Every URL in spec.md §6 is a bare
//! `host:port`; the `http://` scheme is prepended here so callers never
//! have to think about it.

use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub post_office_url: String,
    pub brain_url: String,
    pub librarian_url: String,
    pub traffic_manager_url: String,
    pub mission_control_url: String,
    pub security_manager_url: String,
    pub client_secret: String,
    pub rabbitmq_url: Option<String>,
    pub max_agents: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_agents() -> usize {
    1000
}

fn scheme_qualified(raw: &str) -> String {
    if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("HOST").unwrap_or_else(|_| default_host());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_port);
        let max_agents = std::env::var("MAX_AGENTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(default_max_agents);

        Ok(Self {
            host,
            port,
            post_office_url: scheme_qualified(&require_url("POSTOFFICE_URL")?),
            brain_url: scheme_qualified(&require_url("BRAIN_URL")?),
            librarian_url: scheme_qualified(&require_url("LIBRARIAN_URL")?),
            traffic_manager_url: scheme_qualified(&require_url("TRAFFIC_MANAGER_URL")?),
            mission_control_url: scheme_qualified(&require_url("MISSIONCONTROL_URL")?),
            security_manager_url: scheme_qualified(&require_url("SECURITYMANAGER_URL")?),
            client_secret: std::env::var("CLIENT_SECRET").unwrap_or_default(),
            rabbitmq_url: std::env::var("RABBITMQ_URL").ok(),
            max_agents,
        })
    }
}

fn require_url(var: &str) -> Result<String> {
    Ok(std::env::var(var).unwrap_or_else(|_| {
        tracing::warn!(var, "environment variable not set, falling back to localhost default");
        "localhost:9000".to_string()
    }))
}
