//! HTTP surface (spec.md §6): thin handlers translating JSON bodies into
//! `AgentSet` calls and `EngineError`/`ApiError` into status codes. No
//! business logic lives here — every handler is a few lines of extraction,
//! delegation, and response shaping.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use agentset_engine::{CollaborationEnvelope, CollaborationOutcome, DelegationRequest};
use agentset_registry::StepLocation;
use agentset_types::{AgentSnapshot, Role};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post, put};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health)).route("/ready", get(ready))
}

/// Every route other than health/ready; the caller layers the bearer-token
/// middleware over this router (spec.md §6 "all except health/ready...").
pub fn protected_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/addAgent", post(add_agent))
        .route("/removeAgent", post(remove_agent))
        .route("/agent/:id/message", post(agent_message))
        .route("/agent/:id", get(agent_state))
        .route("/agent/:id/output", get(agent_output))
        .route("/pauseAgents", post(pause_agents))
        .route("/resumeAgents", post(resume_agents))
        .route("/abortAgents", post(abort_agents))
        .route("/abortAgent", post(abort_agent))
        .route("/resumeAgent", post(resume_agent))
        .route("/statistics/:mission_id", get(statistics))
        .route("/saveAgent", post(save_agent))
        .route("/step-location", post(register_step_location))
        .route("/step-location/:step_id", put(update_step_location).get(get_step_location))
        .route("/delegateTask", post(delegate_task))
        .route("/conflictVote", post(conflict_vote))
        .route("/resolveConflict", post(resolve_conflict))
        .route("/collaboration/message", post(collaboration_message))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let stats = state.agent_set.statistics(None).await;
    Json(json!({ "status": "ok", "agentCount": stats.agent_count }))
}

/// This AgentSet registers itself with the PostOffice on startup (main.rs);
/// readiness just reports whether that URL is configured, since the actual
/// registration call is fire-and-forget best-effort (spec.md §6 "/ready").
async fn ready(State(state): State<Arc<AppState>>) -> Json<Value> {
    let registered = !state.config.post_office_url.is_empty();
    Json(json!({ "ready": true, "registeredWithPostOffice": registered }))
}

#[derive(Debug, Deserialize)]
struct AddAgentRequest {
    mission_id: String,
    #[serde(default)]
    role: Option<Role>,
    initial_goal: String,
}

async fn add_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddAgentRequest>,
) -> ApiResult<Json<Value>> {
    if req.mission_id.is_empty() || req.initial_goal.is_empty() {
        return Err(ApiError::bad_request("mission_id and initial_goal are required"));
    }
    let snapshot = state
        .agent_set
        .create_agent(&req.mission_id, req.role, &req.initial_goal)
        .await?;
    Ok(Json(json!({ "message": "agent created", "agentId": snapshot.id })))
}

#[derive(Debug, Deserialize)]
struct AgentIdRequest {
    agent_id: String,
}

async fn remove_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentIdRequest>,
) -> ApiResult<StatusCode> {
    if req.agent_id.is_empty() {
        return Err(ApiError::bad_request("agent_id is required"));
    }
    state.agent_set.remove_agent(&req.agent_id).await?;
    Ok(StatusCode::OK)
}

/// A plain chat message, or a `USER_INPUT_RESPONSE` when `request_id` is
/// present (spec.md §4.2 "Message handling").
#[derive(Debug, Deserialize)]
struct AgentMessageRequest {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    response: Option<String>,
}

async fn agent_message(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
    Json(req): Json<AgentMessageRequest>,
) -> ApiResult<StatusCode> {
    match req.request_id {
        Some(request_id) => {
            state
                .agent_set
                .send_user_input_response(&agent_id, request_id, req.response.unwrap_or_default())
                .await?;
        }
        None => {
            let content = req
                .content
                .ok_or_else(|| ApiError::bad_request("content or request_id is required"))?;
            state.agent_set.send_user_message(&agent_id, content).await?;
        }
    }
    Ok(StatusCode::OK)
}

async fn agent_state(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentSnapshot>> {
    Ok(Json(state.agent_set.get_snapshot(&agent_id).await?))
}

async fn agent_output(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let output = state.agent_set.get_output(&agent_id).await?;
    Ok(Json(json!({ "output": output })))
}

#[derive(Debug, Deserialize)]
struct MissionRequest {
    mission_id: String,
}

async fn pause_agents(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MissionRequest>,
) -> ApiResult<StatusCode> {
    if req.mission_id.is_empty() {
        return Err(ApiError::bad_request("mission_id is required"));
    }
    let handles = state.agent_set.mission_registry().siblings(&req.mission_id).await;
    for handle in handles {
        state.agent_set.pause_agent(&handle.id).await?;
    }
    Ok(StatusCode::OK)
}

async fn resume_agents(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MissionRequest>,
) -> ApiResult<StatusCode> {
    if req.mission_id.is_empty() {
        return Err(ApiError::bad_request("mission_id is required"));
    }
    let handles = state.agent_set.mission_registry().siblings(&req.mission_id).await;
    for handle in handles {
        state.agent_set.resume_agent(&handle.id).await?;
    }
    Ok(StatusCode::OK)
}

async fn abort_agents(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MissionRequest>,
) -> ApiResult<Json<Value>> {
    if req.mission_id.is_empty() {
        return Err(ApiError::bad_request("mission_id is required"));
    }
    let count = state.agent_set.abort_mission_agents(&req.mission_id).await;
    Ok(Json(json!({ "count": count })))
}

async fn abort_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentIdRequest>,
) -> ApiResult<StatusCode> {
    if req.agent_id.is_empty() {
        return Err(ApiError::bad_request("agent_id is required"));
    }
    state.agent_set.abort_agent(&req.agent_id).await?;
    Ok(StatusCode::OK)
}

async fn resume_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentIdRequest>,
) -> ApiResult<StatusCode> {
    if req.agent_id.is_empty() {
        return Err(ApiError::bad_request("agent_id is required"));
    }
    state.agent_set.resume_agent(&req.agent_id).await?;
    Ok(StatusCode::OK)
}

async fn statistics(
    State(state): State<Arc<AppState>>,
    Path(mission_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if mission_id.is_empty() {
        return Err(ApiError::bad_request("mission_id is required"));
    }
    let stats = state.agent_set.statistics(Some(&mission_id)).await;
    Ok(Json(json!({
        "agentsCount": stats.agent_count,
        "byStatus": stats.by_status,
        "byMission": stats.by_mission,
    })))
}

async fn save_agent(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AgentIdRequest>,
) -> ApiResult<StatusCode> {
    if req.agent_id.is_empty() {
        return Err(ApiError::bad_request("agent_id is required"));
    }
    state.agent_set.lifecycle().checkpoint(&req.agent_id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct StepLocationCreateRequest {
    step_id: String,
    agent_id: String,
    #[serde(default)]
    agent_set_url: String,
}

async fn register_step_location(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StepLocationCreateRequest>,
) -> ApiResult<StatusCode> {
    if req.step_id.is_empty() || req.agent_id.is_empty() {
        return Err(ApiError::bad_request("step_id and agent_id are required"));
    }
    state
        .agent_set
        .register_step_location(
            req.step_id,
            StepLocation {
                agent_id: req.agent_id,
                agent_set_url: req.agent_set_url,
            },
        )
        .await;
    Ok(StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
struct StepLocationUpdateRequest {
    agent_id: String,
    #[serde(default)]
    agent_set_url: String,
}

async fn update_step_location(
    State(state): State<Arc<AppState>>,
    Path(step_id): Path<String>,
    Json(req): Json<StepLocationUpdateRequest>,
) -> ApiResult<StatusCode> {
    if req.agent_id.is_empty() {
        return Err(ApiError::bad_request("agent_id is required"));
    }
    state
        .agent_set
        .update_step_location(
            &step_id,
            StepLocation {
                agent_id: req.agent_id,
                agent_set_url: req.agent_set_url,
            },
        )
        .await?;
    Ok(StatusCode::OK)
}

async fn get_step_location(
    State(state): State<Arc<AppState>>,
    Path(step_id): Path<String>,
) -> ApiResult<Json<StepLocation>> {
    state
        .agent_set
        .get_step_location(&step_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("step location {step_id} is not registered")))
}

#[derive(Debug, Deserialize)]
struct DelegateTaskRequest {
    delegator_id: String,
    recipient_id: String,
    task_id: String,
    step_id: String,
    description: String,
    #[serde(default)]
    inputs: Value,
}

#[derive(Debug, Serialize)]
struct DelegateTaskResponseBody {
    task_id: String,
    accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

async fn delegate_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DelegateTaskRequest>,
) -> ApiResult<Json<DelegateTaskResponseBody>> {
    let task_id = req.task_id.clone();
    let response = state
        .agent_set
        .delegation()
        .delegate_task(
            &req.delegator_id,
            &req.recipient_id,
            DelegationRequest {
                task_id: req.task_id,
                step_id: req.step_id,
                description: req.description,
                inputs: req.inputs,
            },
        )
        .await?;
    Ok(Json(DelegateTaskResponseBody {
        task_id,
        accepted: response.accepted,
        reason: response.reason,
    }))
}

#[derive(Debug, Deserialize)]
struct ConflictVoteRequest {
    conflict_id: String,
    agent_id: String,
    vote: String,
    #[serde(default)]
    explanation: Option<String>,
}

async fn conflict_vote(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConflictVoteRequest>,
) -> ApiResult<Json<Value>> {
    let conflict = state
        .agent_set
        .conflicts()
        .submit_vote(&req.conflict_id, &req.agent_id, req.vote, req.explanation)
        .await?;
    Ok(Json(json!(conflict)))
}

#[derive(Debug, Deserialize)]
struct ResolveConflictRequest {
    conflict_id: String,
}

async fn resolve_conflict(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResolveConflictRequest>,
) -> ApiResult<Json<Value>> {
    let conflict = state.agent_set.conflicts().resolve_conflict(&req.conflict_id).await?;
    Ok(Json(json!(conflict)))
}

async fn collaboration_message(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<CollaborationEnvelope>,
) -> ApiResult<Json<Value>> {
    let outcome = state.agent_set.collaboration().route(envelope).await?;
    match outcome {
        CollaborationOutcome::DeliveredLocally => Ok(Json(json!({ "delivered": true }))),
        CollaborationOutcome::Forward { agent_set_url } => {
            // Actually performing the forward is the boundary's job, not the
            // engine's; the caller retries against the returned URL with its
            // own service token. Reported rather than silently dropped.
            Ok(Json(json!({ "delivered": false, "forwardTo": agent_set_url })))
        }
    }
}
