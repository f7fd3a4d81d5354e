//! HTTP supervisor binary exposing one AgentSet (spec.md §4.3, §6): wires
//! the out-of-scope collaborators (Brain, CapabilitiesManager, Librarian,
//! TrafficManager, MissionControl, SecurityManager, the `agent.events` bus)
//! to `agentset_engine::AgentSet` and serves it over axum.

mod auth;
mod config;
mod error;
mod routes;
mod state;

use agentset_bus::{InMemoryBus, MessageBus, RabbitMessageBus};
use agentset_clients::{
    HttpBrainClient, HttpCapabilitiesClient, HttpMissionControlClient, HttpPersistenceClient,
    HttpSecurityManagerClient, HttpTrafficManagerClient,
};
use agentset_engine::{AgentSet, EngineContext};
use agentset_registry::StepLocationRegistry;
use anyhow::Result;
use axum::Router;
use config::Config;
use state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agentset=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(host = %config.host, port = config.port, "starting agentset-server");

    let http = reqwest::Client::new();
    let bus: Arc<dyn MessageBus> = match &config.rabbitmq_url {
        Some(url) => {
            info!("connecting to RabbitMQ");
            Arc::new(RabbitMessageBus::connect(url.clone()).await)
        }
        None => {
            warn!("RABBITMQ_URL not set, using in-memory bus (single-process only)");
            Arc::new(InMemoryBus::new())
        }
    };

    // spec.md §6 lists six collaborator URLs and no separate one for the
    // CapabilitiesManager; PostOffice is the front door that proxies plugin
    // execution requests as well as bus registration, so its URL doubles
    // for both here.
    let ctx = Arc::new(EngineContext::new(
        Arc::new(HttpBrainClient::new(http.clone(), config.brain_url.clone())),
        Arc::new(HttpCapabilitiesClient::new(http.clone(), config.post_office_url.clone())),
        Arc::new(HttpPersistenceClient::new(http.clone(), config.librarian_url.clone())),
        Arc::new(HttpMissionControlClient::new(http.clone(), config.mission_control_url.clone())),
        Arc::new(HttpTrafficManagerClient::new(http.clone(), config.traffic_manager_url.clone())),
        Arc::new(HttpSecurityManagerClient::new(
            http.clone(),
            config.security_manager_url.clone(),
            config.client_secret.clone(),
        )),
        bus,
        Arc::new(StepLocationRegistry::new()),
    ));

    let agent_set = AgentSet::new(ctx, config.max_agents);
    agent_set.start_background_sweeps().await;

    let state = Arc::new(AppState { agent_set, config: config.clone() });
    let app = build_router(state);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("agentset-server shut down gracefully");
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    let protected = routes::protected_routes()
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_service_token));

    Router::new()
        .merge(routes::public_routes())
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).unwrap();
        tokio::select! {
            _ = ctrl_c => info!("received Ctrl+C, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received Ctrl+C, shutting down");
    }
}
