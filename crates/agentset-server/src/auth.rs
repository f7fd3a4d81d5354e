//! Bearer service-token middleware (spec.md §6: "all except health/ready
//! require a bearer service token"). The token is checked against this
//! AgentSet's own `CLIENT_SECRET`, the same value `SecurityManagerClient`
//! uses to obtain tokens for outbound calls — this process both issues and
//! accepts the one shared secret rather than validating a JWT, matching
//! the rest of the contract-only collaborators in this pack.

use crate::state::AppState;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

pub async fn require_service_token(
    State(state): State<Arc<AppState>>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    if state.config.client_secret.is_empty() {
        return Ok(next.run(request).await);
    }

    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == state.config.client_secret => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}
