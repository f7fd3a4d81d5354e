//! The per-agent execution loop (spec.md §4.2 `runUntilDone` / `runAgent`)
//! and the step-execution path (`executeStep`). One instance of this loop
//! runs as its own `tokio::task` per agent, spawned by the supervisor.

use crate::agent::AgentCommand;
use crate::classifier::ConversationClassifier;
use crate::context::EngineContext;
use crate::mission::{AgentHandle, MissionRegistry, MissionSteps};
use crate::outcome::StepOutcome;
use crate::plan;
use crate::task_delegation::{DelegationRequest, TaskDelegation};
use agentset_bus::AgentStatusEvent;
use agentset_types::{AgentStatus, ConversationEntry, PluginOutput, Step, StepStatus, ValueType, WorkProduct, WorkProductScope, WorkProductType};
use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::LazyLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const LOOP_TICK: std::time::Duration = std::time::Duration::from_secs(1);
static PLACEHOLDER_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([a-zA-Z0-9_]+)\}").unwrap());

/// Drives the agent until it reaches a terminal status (COMPLETED, ERROR,
/// ABORTED) or its command channel closes. Mirrors `runUntilDone`: sleep
/// 1s between `runAgent` iterations while active work remains.
pub async fn run_until_done(
    handle: Arc<AgentHandle>,
    ctx: Arc<EngineContext>,
    mission: MissionRegistry,
    delegation: Arc<TaskDelegation>,
    mut commands: mpsc::Receiver<AgentCommand>,
) {
    let span = tracing::info_span!("agent_loop", agent_id = %handle.id, mission_id = %handle.mission_id);
    let _enter = span.enter();
    drop(_enter);

    let mut in_flight: HashMap<String, JoinHandle<()>> = HashMap::new();

    loop {
        drain_commands(&handle, &ctx, &mut commands, &mut in_flight).await;

        let status = handle.status().await;
        if status.is_terminal() {
            break;
        }

        if status == AgentStatus::Running {
            if let Err(e) = run_agent_tick(&handle, &ctx, &mission, &delegation, &mut in_flight).await {
                tracing::error!(agent_id = %handle.id, error = %e, "agent tick failed, transitioning to ERROR");
                transition_status(&handle, &ctx, AgentStatus::Error).await;
                break;
            }
        }

        let (has_work, status, has_any_step) = {
            let agent = handle.state.read().await;
            (agent.has_active_work(), agent.status, !agent.steps.is_empty())
        };

        // An agent with no steps yet is idle, not done -- it is still
        // waiting for its initial goal (spec.md §4.2 "Loop" presupposes
        // at least one seeded step; `createAgent` seeds it before this
        // loop starts).
        if !has_work && has_any_step && status == AgentStatus::Running {
            let reflection_done = handle.state.read().await.reflection_done;
            if !reflection_done {
                synthesize_reflect_step(&handle).await;
            } else {
                finish_mission(&handle, &ctx).await;
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(LOOP_TICK) => {}
            cmd = commands.recv() => {
                match cmd {
                    Some(cmd) => apply_command(&handle, &ctx, cmd, &mut in_flight).await,
                    None => break,
                }
            }
        }
    }

    for (_, task) in in_flight.drain() {
        task.abort();
    }
}

async fn drain_commands(
    handle: &Arc<AgentHandle>,
    ctx: &Arc<EngineContext>,
    commands: &mut mpsc::Receiver<AgentCommand>,
    in_flight: &mut HashMap<String, JoinHandle<()>>,
) {
    while let Ok(cmd) = commands.try_recv() {
        apply_command(handle, ctx, cmd, in_flight).await;
    }
}

/// Apply one externally-delivered command (spec.md §4.2 "Message
/// handling" and §5 "Cancellation and timeout").
async fn apply_command(
    handle: &Arc<AgentHandle>,
    ctx: &Arc<EngineContext>,
    cmd: AgentCommand,
    in_flight: &mut HashMap<String, JoinHandle<()>>,
) {
    match cmd {
        AgentCommand::UserMessage { content } => handle_user_message(handle, ctx, content).await,
        AgentCommand::UserInputResponse { request_id, response } => {
            handle_user_input_response(handle, &request_id, response).await;
        }
        AgentCommand::Pause => {
            abort_in_flight(in_flight, handle).await;
            transition_status(handle, ctx, AgentStatus::Paused).await;
        }
        AgentCommand::Abort => {
            abort_in_flight(in_flight, handle).await;
            transition_status(handle, ctx, AgentStatus::Aborted).await;
        }
        AgentCommand::Resume => {
            transition_status(handle, ctx, AgentStatus::Running).await;
        }
        AgentCommand::Signal { name } => {
            let mut agent = handle.state.write().await;
            for step in agent.steps.iter_mut() {
                if step.status == StepStatus::Paused && step.awaits_signal.as_deref() == Some(name.as_str()) {
                    step.status = StepStatus::Pending;
                }
            }
        }
        AgentCommand::GetSnapshot { reply } => {
            let snapshot = handle.state.read().await.snapshot();
            let _ = reply.send(snapshot);
        }
        AgentCommand::GetOutput { reply } => {
            let output = handle.state.read().await.final_output();
            let _ = reply.send(output);
        }
    }
}

/// Pause/abort cancel in-flight executor calls; the step reverts to
/// PENDING so it can retry after resume (spec.md §5).
async fn abort_in_flight(in_flight: &mut HashMap<String, JoinHandle<()>>, handle: &Arc<AgentHandle>) {
    let step_ids: Vec<String> = in_flight.keys().cloned().collect();
    for step_id in step_ids {
        if let Some(task) = in_flight.remove(&step_id) {
            task.abort();
        }
    }
    let mut agent = handle.state.write().await;
    for step in agent.steps.iter_mut() {
        if step.status == StepStatus::Running {
            step.status = StepStatus::Pending;
        }
    }
    for (_, step_id) in agent.waiting_steps.drain() {
        if let Some(step) = agent.steps.iter_mut().find(|s| s.id == step_id) {
            // A pending user question loses its waiter on pause/abort;
            // resolved with an empty string per spec.md §5.
            if step.status == StepStatus::Waiting {
                step.status = StepStatus::Completed;
                step.result = Some(vec![PluginOutput::success(
                    step.outputs.first().map(|o| o.name.clone()).unwrap_or_else(|| "answer".into()),
                    ValueType::String,
                    serde_json::Value::String(String::new()),
                )]);
            }
        }
    }
}

async fn transition_status(handle: &Arc<AgentHandle>, ctx: &Arc<EngineContext>, status: AgentStatus) {
    {
        let mut agent = handle.state.write().await;
        agent.status = status;
    }
    let _ = ctx
        .bus
        .publish_status_update(AgentStatusEvent {
            agent_id: handle.id.clone(),
            status: status.to_string(),
            mission_id: handle.mission_id.clone(),
            timestamp: Utc::now(),
        })
        .await;
}

async fn handle_user_message(handle: &Arc<AgentHandle>, ctx: &Arc<EngineContext>, content: String) {
    let status = handle.status().await;
    if matches!(status, AgentStatus::Error | AgentStatus::Completed) {
        let mut agent = handle.state.write().await;
        agent.status = AgentStatus::Running;
        agent.reflection_done = false;
    }

    if ctx.classifier.is_simple(&content) {
        let response = ctx
            .brain
            .think(agentset_clients::BrainRequest {
                agent_id: handle.id.clone(),
                mission_id: handle.mission_id.clone(),
                prompt: format!("Respond conversationally and briefly to: {content}"),
                context: serde_json::Value::Null,
                conversation_type: agentset_clients::BrainConversationType::SimpleResponse,
            })
            .await;

        let reply = match response {
            Ok(r) => r
                .outputs
                .first()
                .map(|o| o.result.as_str().unwrap_or_default().to_string())
                .unwrap_or_default(),
            Err(e) => {
                tracing::warn!(agent_id = %handle.id, error = %e, "brain call failed for simple message");
                String::new()
            }
        };

        let mut agent = handle.state.write().await;
        agent.conversation.push(ConversationEntry { role: "user".into(), content });
        agent.conversation.push(ConversationEntry { role: "assistant".into(), content: reply });
        return;
    }

    let mut agent = handle.state.write().await;
    agent.conversation.push(ConversationEntry { role: "user".into(), content: content.clone() });
    let step_no = agent.steps.len() as u32 + 1;
    let mut step = Step::new(
        format!("step-{}", uuid::Uuid::new_v4()),
        agent.mission_id.clone(),
        agent.id.clone(),
        step_no,
        "ACCOMPLISH",
    );
    step.description = content;
    agent.steps.push(step);
}

async fn handle_user_input_response(handle: &Arc<AgentHandle>, request_id: &str, response: String) {
    let mut agent = handle.state.write().await;
    let Some(step_id) = agent.waiting_steps.remove(request_id) else {
        // Duplicate delivery of the same response is a no-op (spec.md §8
        // "Round-trip / idempotence").
        return;
    };
    let Some(step) = agent.steps.iter_mut().find(|s| s.id == step_id) else {
        return;
    };
    if step.status.is_terminal() {
        return;
    }
    let output_name = step.outputs.first().map(|o| o.name.clone()).unwrap_or_else(|| "answer".into());
    step.status = StepStatus::Completed;
    step.result = Some(vec![PluginOutput::success(
        output_name,
        ValueType::String,
        serde_json::Value::String(response),
    )]);
}

async fn synthesize_reflect_step(handle: &Arc<AgentHandle>) {
    let mut agent = handle.state.write().await;
    let sinks: Vec<String> = agent
        .steps
        .iter()
        .filter(|s| s.is_endpoint(&agent.steps) && s.status == StepStatus::Completed)
        .map(|s| s.id.clone())
        .collect();

    let step_no = agent.steps.len() as u32 + 1;
    let mission_id = agent.mission_id.clone();
    let owner = agent.id.clone();
    let mut step = Step::new(format!("step-{}", uuid::Uuid::new_v4()), mission_id, owner, step_no, "REFLECT");
    step.description = "Reflect over mission outcome".into();
    for (i, sink_id) in sinks.iter().enumerate() {
        step.dependencies.push(agentset_types::Dependency {
            input_name: format!("input_{i}"),
            source_step_id: sink_id.clone(),
            output_name: String::new(),
        });
    }
    agent.reflection_done = true;
    agent.steps.push(step);
}

async fn finish_mission(handle: &Arc<AgentHandle>, ctx: &Arc<EngineContext>) {
    transition_status(handle, ctx, AgentStatus::Completed).await;
    let (final_output, mission_id) = {
        let agent = handle.state.read().await;
        (agent.final_output(), agent.mission_id.clone())
    };
    if let Some(outputs) = final_output {
        for output in outputs {
            let product = WorkProduct {
                id: format!("wp-{}", uuid::Uuid::new_v4()),
                agent_id: handle.id.clone(),
                step_id: String::new(),
                product_type: WorkProductType::Final,
                scope: WorkProductScope::MissionOutput,
                data: output.result.clone(),
                mime_type: output.mime_type.clone(),
                file_name: output.file_name.clone(),
                is_deliverable: output.is_deliverable(),
            };
            let _ = ctx.persistence.save_work_product(product).await;
        }
    }
    let _ = ctx
        .mission_control
        .notify(agentset_clients::MissionControlEvent::AgentUpdate {
            agent_id: handle.id.clone(),
            mission_id,
            status: AgentStatus::Completed,
        })
        .await;
}

/// One `runAgent()` iteration (spec.md §4.2).
async fn run_agent_tick(
    handle: &Arc<AgentHandle>,
    ctx: &Arc<EngineContext>,
    mission: &MissionRegistry,
    delegation: &Arc<TaskDelegation>,
    in_flight: &mut HashMap<String, JoinHandle<()>>,
) -> crate::error::EngineResult<()> {
    let mission_view = MissionSteps::capture(mission, &handle.mission_id).await;

    let (pending_candidates, pending_exist, role, is_coordinator, local_steps_snapshot) = {
        let agent = handle.state.read().await;
        let pending_candidates: Vec<Step> = agent.steps.iter().filter(|s| s.status == StepStatus::Pending).cloned().collect();
        let pending_exist = !pending_candidates.is_empty();
        (pending_candidates, pending_exist, agent.role.clone(), agent.role == agentset_types::Role::Coordinator, agent.steps.clone())
    };

    let mut executable = Vec::new();
    for step in &pending_candidates {
        if ctx
            .dependency_resolver
            .are_dependencies_satisfied(step, &local_steps_snapshot, &mission_view)
            .await
        {
            executable.push(step.id.clone());
        }
    }

    // Partition by role: steps recommending a different role than this
    // agent (and this agent isn't a coordinator) get routed to delegation.
    let mut local_steps = Vec::new();
    for step_id in executable {
        let needs_delegation = {
            let agent = handle.state.read().await;
            agent.find_step(&step_id).and_then(|s| s.recommended_role.clone()).map(|r| r != role.to_string()).unwrap_or(false)
        };
        if needs_delegation && !is_coordinator {
            if let Some(target) = find_delegate_target(handle, mission, &step_id).await {
                route_to_delegate(handle, delegation, &step_id, &target).await?;
                continue;
            }
        }
        local_steps.push(step_id);
    }

    // Dispatch all chosen local executions concurrently.
    for step_id in local_steps {
        {
            let mut agent = handle.state.write().await;
            if let Some(step) = agent.find_step_mut(&step_id) {
                step.status = StepStatus::Running;
            }
        }
        let handle_clone = handle.clone();
        let ctx_clone = ctx.clone();
        let mission_clone = mission.clone();
        let sid = step_id.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = execute_step(&handle_clone, &ctx_clone, &mission_clone, &sid).await {
                tracing::error!(agent_id = %handle_clone.id, step_id = %sid, error = %e, "step execution failed");
            }
        });
        in_flight.insert(step_id, task);
    }

    // Reap finished in-flight tasks so the map doesn't grow unbounded.
    in_flight.retain(|_, task| !task.is_finished());

    if !pending_exist {
        return Ok(());
    }

    let still_pending: Vec<Step> = {
        let agent = handle.state.read().await;
        agent.steps.iter().filter(|s| s.status == StepStatus::Pending).cloned().collect()
    };
    let mut any_executable = false;
    for step in &still_pending {
        if ctx.dependency_resolver.are_dependencies_satisfied(step, &still_pending, &mission_view).await {
            any_executable = true;
            break;
        }
    }
    if !any_executable && !still_pending.is_empty() {
        cancel_permanently_unsatisfied(handle, ctx, &mission_view).await;
    }

    Ok(())
}

async fn cancel_permanently_unsatisfied(
    handle: &Arc<AgentHandle>,
    ctx: &Arc<EngineContext>,
    mission_view: &MissionSteps,
) {
    let mut agent = handle.state.write().await;
    let snapshot = agent.steps.clone();
    for step in agent.steps.iter_mut() {
        if step.status != StepStatus::Pending {
            continue;
        }
        let permanently_unsat = step.are_dependencies_permanently_unsatisfied(&snapshot)
            || step
                .dependencies
                .iter()
                .any(|d| matches!(mission_view.find_step(&d.source_step_id), Some(s) if matches!(s.status, StepStatus::Error | StepStatus::Cancelled)));
        if permanently_unsat {
            step.status = StepStatus::Cancelled;
            let _ = ctx.persistence.append_event(agentset_types::PersistedEvent::new(
                "step_cancelled",
                &handle.id,
                &handle.mission_id,
                serde_json::json!({ "stepId": step.id, "reason": "dependency permanently unsatisfied" }),
            )).await;
        }
    }
}

async fn find_delegate_target(handle: &Arc<AgentHandle>, mission: &MissionRegistry, step_id: &str) -> Option<String> {
    let recommended_role = {
        let agent = handle.state.read().await;
        agent.find_step(step_id)?.recommended_role.clone()?
    };
    for sibling in mission.siblings(&handle.mission_id).await {
        if sibling.id == handle.id {
            continue;
        }
        let sibling_agent = sibling.state.read().await;
        if sibling_agent.role.to_string() == recommended_role && !sibling_agent.status.is_terminal() {
            return Some(sibling.id.clone());
        }
    }
    None
}

async fn route_to_delegate(
    handle: &Arc<AgentHandle>,
    delegation: &Arc<TaskDelegation>,
    step_id: &str,
    target_agent_id: &str,
) -> crate::error::EngineResult<()> {
    let description = {
        let mut agent = handle.state.write().await;
        let Some(description) = agent.find_step(step_id).map(|s| s.description.clone()) else {
            return Ok(());
        };
        agent.delegated_step_ids.insert(step_id.to_string());
        if let Some(step) = agent.find_step_mut(step_id) {
            // Awaiting the recipient's completion notification, not a
            // local computation -- mirrors the pending_user_input path.
            step.status = StepStatus::Waiting;
        }
        description
    };

    let response = delegation
        .delegate_task(
            &handle.id,
            target_agent_id,
            DelegationRequest {
                task_id: format!("task-{}", uuid::Uuid::new_v4()),
                step_id: step_id.to_string(),
                description,
                inputs: serde_json::Value::Null,
            },
        )
        .await?;

    if !response.accepted {
        let mut agent = handle.state.write().await;
        agent.delegated_step_ids.remove(step_id);
        if let Some(step) = agent.find_step_mut(step_id) {
            // Could not delegate; fall back to local execution next tick.
            step.status = StepStatus::Pending;
            step.recommended_role = None;
        }
    }
    Ok(())
}

/// `executeStep` (spec.md §4.2): dereference inputs, route to the
/// verb-appropriate executor, and interpret the result.
async fn execute_step(
    handle: &Arc<AgentHandle>,
    ctx: &Arc<EngineContext>,
    mission: &MissionRegistry,
    step_id: &str,
) -> crate::error::EngineResult<()> {
    if handle.status().await != AgentStatus::Running {
        return Ok(());
    }

    let mission_view = MissionSteps::capture(mission, &handle.mission_id).await;
    let (action_verb, step_no, description, mission_id, agent_id, auto_mapped) = {
        let mut agent = handle.state.write().await;
        // Dereference against this agent's own steps first, then widen to
        // every mission-visible step (own steps take precedence when both
        // see the same id, since they are the freshest copy).
        let mut visible_steps = agent.steps.clone();
        let local_ids: std::collections::HashSet<&str> = visible_steps.iter().map(|s| s.id.as_str()).collect();
        visible_steps.extend(mission_view.all_steps().into_iter().filter(|s| !local_ids.contains(s.id.as_str())).cloned());
        let Some(step) = agent.find_step_mut(step_id) else {
            return Ok(());
        };
        let auto_mapped = step.dereference_inputs(&visible_steps);
        let source_ids: Vec<String> = auto_mapped
            .iter()
            .map(|(input_name, _)| {
                step.dependencies
                    .iter()
                    .find(|d| &d.input_name == input_name)
                    .map(|d| d.source_step_id.clone())
                    .unwrap_or_default()
            })
            .collect();
        (
            step.action_verb.clone(),
            step.step_no,
            step.description.clone(),
            agent.mission_id.clone(),
            agent.id.clone(),
            auto_mapped.into_iter().zip(source_ids).collect::<Vec<_>>(),
        )
    };

    // Auto-mapping rule (spec.md §4.1, testable property 1): every
    // fallback binding gets a `dependency_auto_remap` persistence event.
    for ((input_name, mapped_from), source_step_id) in &auto_mapped {
        let _ = ctx
            .persistence
            .append_event(agentset_types::PersistedEvent::dependency_auto_remap(
                &mission_id,
                &agent_id,
                source_step_id,
                step_id,
                input_name,
                mapped_from,
            ))
            .await;
    }

    let inputs = {
        let agent = handle.state.read().await;
        agent
            .find_step(step_id)
            .map(|s| {
                s.input_values
                    .iter()
                    .map(|(k, v)| (k.clone(), v.value.clone()))
                    .collect::<HashMap<_, _>>()
            })
            .unwrap_or_default()
    };

    let outcome = match action_verb.as_str() {
        "ACCOMPLISH" if step_no == 1 => run_brain_step(ctx, &agent_id, &mission_id, &description, agentset_clients::BrainConversationType::Accomplish).await,
        "REFLECT" => run_brain_step(ctx, &agent_id, &mission_id, &description, agentset_clients::BrainConversationType::Reflect).await,
        _ => run_capability_step(ctx, &action_verb, inputs).await,
    };

    apply_step_outcome(handle, ctx, mission, step_id, outcome).await
}

async fn run_brain_step(
    ctx: &Arc<EngineContext>,
    agent_id: &str,
    mission_id: &str,
    description: &str,
    conversation_type: agentset_clients::BrainConversationType,
) -> StepOutcome {
    let response = ctx
        .brain
        .think(agentset_clients::BrainRequest {
            agent_id: agent_id.to_string(),
            mission_id: mission_id.to_string(),
            prompt: description.to_string(),
            context: serde_json::Value::Null,
            conversation_type,
        })
        .await;
    match response {
        Ok(r) => StepOutcome::from_plugin_outputs(r.outputs),
        Err(e) => StepOutcome::Error(e.to_string()),
    }
}

async fn run_capability_step(ctx: &Arc<EngineContext>, verb: &str, inputs: HashMap<String, serde_json::Value>) -> StepOutcome {
    match ctx.capabilities.execute(verb, inputs).await {
        Ok(outputs) => StepOutcome::from_plugin_outputs(outputs),
        Err(e) => StepOutcome::Error(e.to_string()),
    }
}

async fn apply_step_outcome(
    handle: &Arc<AgentHandle>,
    ctx: &Arc<EngineContext>,
    mission: &MissionRegistry,
    step_id: &str,
    outcome: StepOutcome,
) -> crate::error::EngineResult<()> {
    match outcome {
        StepOutcome::Plan(plan_output) => apply_plan_outcome(handle, ctx, mission, step_id, plan_output).await,
        StepOutcome::PendingUserInput { request_id } => {
            let mut agent = handle.state.write().await;
            let has_unresolved_placeholder = agent
                .find_step(step_id)
                .map(|s| s.input_values.values().any(|v| has_placeholder(&v.value)))
                .unwrap_or(false);
            if has_unresolved_placeholder {
                if let Some(step) = agent.find_step_mut(step_id) {
                    step.status = StepStatus::Pending;
                }
                agent.waiting_steps.retain(|_, sid| sid != step_id);
            } else {
                if let Some(step) = agent.find_step_mut(step_id) {
                    step.status = StepStatus::Waiting;
                }
                agent.waiting_steps.insert(request_id, step_id.to_string());
            }
            Ok(())
        }
        StepOutcome::Waiting => {
            let mut agent = handle.state.write().await;
            if let Some(step) = agent.find_step_mut(step_id) {
                step.status = StepStatus::Waiting;
            }
            Ok(())
        }
        StepOutcome::Completed(outputs) => {
            let mapped = {
                let mut agent = handle.state.write().await;
                let Some(step) = agent.find_step_mut(step_id) else {
                    return Ok(());
                };
                let mapped = step.map_plugin_outputs_to_custom_names(outputs);
                step.status = StepStatus::Completed;
                step.result = Some(mapped.clone());
                mapped
            };
            save_work_products(handle, ctx, step_id, &mapped).await;
            notify_delegation_complete(handle, ctx, mission, step_id).await;
            Ok(())
        }
        StepOutcome::Error(message) => handle_step_failure(handle, ctx, step_id, message).await,
        StepOutcome::Aborted => {
            let mut agent = handle.state.write().await;
            if let Some(step) = agent.find_step_mut(step_id) {
                step.status = StepStatus::Pending;
            }
            Ok(())
        }
    }
}

async fn apply_plan_outcome(
    handle: &Arc<AgentHandle>,
    ctx: &Arc<EngineContext>,
    mission: &MissionRegistry,
    step_id: &str,
    plan_output: PluginOutput,
) -> crate::error::EngineResult<()> {
    let tasks = plan::parse_plan_tasks(&plan_output)?;

    let (mission_id, owner_agent_id, next_step_no) = {
        let agent = handle.state.read().await;
        (agent.mission_id.clone(), agent.id.clone(), agent.steps.len() as u32 + 1)
    };
    let (workstream, _id_map) = plan::expand_plan(&tasks, &mission_id, &owner_agent_id, next_step_no);

    let mission_view = MissionSteps::capture(mission, &mission_id).await;
    let mut all_steps: Vec<Step> = mission_view.all_steps().into_iter().cloned().collect();
    let rewired = plan::rewire_dependents(step_id, &workstream, &mut all_steps);
    mission_view.write_back(mission, &all_steps).await;

    {
        let mut agent = handle.state.write().await;
        let Some(step) = agent.find_step_mut(step_id) else {
            return Ok(());
        };
        plan::mark_replaced(step, plan_output);
        agent.steps.extend(workstream.clone());
    }

    let _ = ctx
        .persistence
        .append_event(agentset_types::PersistedEvent::new(
            "plan_expanded",
            &handle.id,
            &mission_id,
            serde_json::json!({ "replacedStepId": step_id, "newStepCount": workstream.len(), "rewiredDependents": rewired }),
        ))
        .await;
    Ok(())
}

async fn handle_step_failure(
    handle: &Arc<AgentHandle>,
    ctx: &Arc<EngineContext>,
    step_id: &str,
    message: String,
) -> crate::error::EngineResult<()> {
    let mission_id = {
        let mut agent = handle.state.write().await;
        if let Some(step) = agent.find_step_mut(step_id) {
            step.status = StepStatus::Error;
            step.result = Some(vec![PluginOutput::error("error", message.clone())]);
        }
        agent.mission_id.clone()
    };

    let _ = ctx
        .persistence
        .append_event(agentset_types::PersistedEvent::new(
            "step_failed",
            &handle.id,
            &mission_id,
            serde_json::json!({ "stepId": step_id, "error": message }),
        ))
        .await;

    notify_dependents_of_failure(handle, step_id).await;

    let _ = ctx
        .mission_control
        .notify(agentset_clients::MissionControlEvent::AgentUpdate {
            agent_id: handle.id.clone(),
            mission_id,
            status: AgentStatus::Error,
        })
        .await;
    Ok(())
}

/// Mark direct dependents ERROR, propagating recursively only if the
/// dependent has no alternative source for the same output (spec.md §7
/// "Propagation"). Cross-agent dependents are left to MissionControl (not
/// modeled further here -- out of scope collaborator).
async fn notify_dependents_of_failure(handle: &Arc<AgentHandle>, failed_step_id: &str) {
    let mut agent = handle.state.write().await;
    let mut frontier = vec![failed_step_id.to_string()];
    while let Some(current) = frontier.pop() {
        let snapshot = agent.steps.clone();
        for step in agent.steps.iter_mut() {
            if step.status.is_terminal() {
                continue;
            }
            let depends_on_current = step.dependencies.iter().any(|d| d.source_step_id == current);
            if !depends_on_current {
                continue;
            }
            let has_alternative = step.dependencies.iter().any(|d| {
                d.source_step_id != current
                    && snapshot
                        .iter()
                        .find(|s| s.id == d.source_step_id)
                        .map(|s| s.status == StepStatus::Completed)
                        .unwrap_or(false)
            });
            if !has_alternative {
                step.status = StepStatus::Error;
                step.result = Some(vec![PluginOutput::error("error", format!("upstream step {current} failed"))]);
                frontier.push(step.id.clone());
            }
        }
    }
}

async fn save_work_products(handle: &Arc<AgentHandle>, ctx: &Arc<EngineContext>, step_id: &str, outputs: &[PluginOutput]) {
    for output in outputs {
        let product = WorkProduct {
            id: format!("wp-{}", uuid::Uuid::new_v4()),
            agent_id: handle.id.clone(),
            step_id: step_id.to_string(),
            product_type: if output.is_deliverable() { WorkProductType::Final } else { WorkProductType::Interim },
            scope: WorkProductScope::AgentStep,
            data: output.result.clone(),
            mime_type: output.mime_type.clone(),
            file_name: output.file_name.clone(),
            is_deliverable: output.is_deliverable(),
        };
        let _ = ctx.persistence.save_work_product(product).await;
    }
}

async fn notify_delegation_complete(handle: &Arc<AgentHandle>, ctx: &Arc<EngineContext>, mission: &MissionRegistry, step_id: &str) {
    let (delegating_agent_id, result, mission_id) = {
        let agent = handle.state.read().await;
        let Some(step) = agent.find_step(step_id) else { return };
        let Some(delegator) = step.delegating_agent_id.clone() else { return };
        (delegator, step.result.clone().unwrap_or_default(), agent.mission_id.clone())
    };

    let result_json = serde_json::to_value(&result).unwrap_or(serde_json::Value::Null);

    if let Some(delegator) = mission.get(&delegating_agent_id).await {
        let mut delegator_agent = delegator.state.write().await;
        delegator_agent.delegated_step_ids.remove(step_id);
        if let Some(step) = delegator_agent.find_step_mut(step_id) {
            if !step.status.is_terminal() {
                step.status = StepStatus::Completed;
                step.result = Some(result);
            }
        }
        return;
    }

    let _ = ctx
        .mission_control
        .notify(agentset_clients::MissionControlEvent::StepCompleted {
            step_id: step_id.to_string(),
            mission_id,
            result: result_json,
        })
        .await;
}

pub(crate) fn has_placeholder(value: &serde_json::Value) -> bool {
    value.as_str().map(|s| PLACEHOLDER_PATTERN.is_match(s)).unwrap_or(false)
}

/// Resolve `{key}` placeholders in `template` from completed steps'
/// outputs, used by `dereferenceInputsForExecution`'s placeholder
/// interpolation (spec.md §4.1) and by the stuck-user-input recovery path
/// (spec.md §4.3, E5).
pub fn resolve_placeholders(template: &str, resolved: &HashMap<String, String>) -> (String, bool) {
    let mut any_unresolved = false;
    let result = PLACEHOLDER_PATTERN.replace_all(template, |caps: &regex::Captures| {
        let key = &caps[1];
        match resolved.get(key) {
            Some(value) => value.clone(),
            None => {
                any_unresolved = true;
                caps[0].to_string()
            }
        }
    });
    (result.into_owned(), any_unresolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_placeholders_substitutes_known_keys() {
        let mut resolved = HashMap::new();
        resolved.insert("foo".to_string(), "bar".to_string());
        let (text, unresolved) = resolve_placeholders("value is {foo}", &resolved);
        assert_eq!(text, "value is bar");
        assert!(!unresolved);
    }

    #[test]
    fn resolve_placeholders_flags_unknown_keys() {
        let resolved = HashMap::new();
        let (text, unresolved) = resolve_placeholders("value is {foo}", &resolved);
        assert_eq!(text, "value is {foo}");
        assert!(unresolved);
    }
}
