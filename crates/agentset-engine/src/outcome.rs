//! Step execution outcomes, reified as explicit variants instead of
//! exceptions for control flow (spec.md §9 Design Notes).

use agentset_types::PluginOutput;

#[derive(Debug, Clone)]
pub enum StepOutcome {
    Completed(Vec<PluginOutput>),
    /// A plan to expand; the wrapped output is the PLAN `PluginOutput`.
    Plan(PluginOutput),
    PendingUserInput { request_id: String },
    /// The step set itself WAITING directly (REGROUP synchronization).
    Waiting,
    Error(String),
    /// Execution was interrupted by pause/abort; not a failure (spec.md §7
    /// "SignalAbort").
    Aborted,
}

impl StepOutcome {
    pub fn from_plugin_outputs(outputs: Vec<PluginOutput>) -> Self {
        if let Some(plan) = outputs.iter().find(|o| o.is_plan()) {
            return StepOutcome::Plan(plan.clone());
        }
        if let Some(error) = outputs.iter().find(|o| o.is_error()) {
            return StepOutcome::Error(error.result_description.clone());
        }
        if let Some(request_id) = outputs.iter().find_map(pending_user_input_request_id) {
            return StepOutcome::PendingUserInput { request_id };
        }
        StepOutcome::Completed(outputs)
    }
}

fn pending_user_input_request_id(output: &PluginOutput) -> Option<String> {
    let obj = output.result.as_object()?;
    if !obj.get("pending_user_input")?.as_bool()? {
        return None;
    }
    obj.get("request_id")?.as_str().map(String::from)
}
