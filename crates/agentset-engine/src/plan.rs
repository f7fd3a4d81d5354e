//! Plan expansion and plan-replacement rewiring (spec.md §4.2.1), the
//! hardest single algorithm in the engine.
//!
//! A step whose result contains a `PLAN` output is replaced by the plan's
//! workstream: new steps are appended, and every mission-wide step that
//! depended on the replaced step is rewired onto one of the workstream's
//! *final* steps (the ones nothing else in the workstream depends on).

use crate::error::{EngineError, EngineResult};
use agentset_types::{Dependency, InputReference, OutputDescriptor, PluginOutput, Step, StepStatus};
use serde::Deserialize;
use std::collections::HashMap;

/// One task descriptor inside a PLAN output's `result` array. `id` is a
/// plan-local reference used only to wire intra-plan dependencies; it is
/// translated to a real, globally-unique step id during expansion.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanTask {
    pub id: String,
    pub action_verb: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub dependencies: Vec<PlanTaskDependency>,
    #[serde(default)]
    pub outputs: Vec<OutputDescriptor>,
    #[serde(default)]
    pub recommended_role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanTaskDependency {
    pub input_name: String,
    /// Either another task's plan-local `id`, or an existing mission step
    /// id (e.g. to read an output produced before this plan was created).
    pub source_step_id: String,
    pub output_name: String,
}

/// Parse a PLAN `PluginOutput`'s `result` array into task descriptors.
/// Contract violation (spec.md §7 "Contract"): a malformed array, or any
/// element missing required fields, is an error, not a best-effort
/// partial expansion.
pub fn parse_plan_tasks(output: &PluginOutput) -> EngineResult<Vec<PlanTask>> {
    let tasks = output
        .plan_tasks()
        .ok_or_else(|| EngineError::contract("PLAN output has no result array"))?;
    tasks
        .iter()
        .map(|v| {
            serde_json::from_value(v.clone())
                .map_err(|e| EngineError::contract(format!("malformed plan task: {e}")))
        })
        .collect()
}

/// Expand parsed plan tasks into real `Step`s owned by `owner_agent_id`,
/// starting numbering at `next_step_no`. Returns the new steps in the
/// order given, plus the plan-local-id -> real-id map (for callers that
/// need to report back how the plan was wired).
pub fn expand_plan(
    tasks: &[PlanTask],
    mission_id: &str,
    owner_agent_id: &str,
    next_step_no: u32,
) -> (Vec<Step>, HashMap<String, String>) {
    let id_map: HashMap<String, String> = tasks
        .iter()
        .map(|t| (t.id.clone(), format!("step-{}", uuid::Uuid::new_v4())))
        .collect();

    let steps = tasks
        .iter()
        .enumerate()
        .map(|(i, task)| {
            let real_id = id_map[&task.id].clone();
            let mut step = Step::new(
                real_id,
                mission_id,
                owner_agent_id,
                next_step_no + i as u32,
                task.action_verb.clone(),
            );
            step.description = task.description.clone();
            step.outputs = task.outputs.clone();
            step.recommended_role = task.recommended_role.clone();
            for dep in &task.dependencies {
                // A dependency may reference another task in this same
                // plan (translate via id_map) or an already-existing
                // mission step (pass through unchanged).
                let source_step_id = id_map
                    .get(&dep.source_step_id)
                    .cloned()
                    .unwrap_or_else(|| dep.source_step_id.clone());
                step.dependencies.push(Dependency {
                    input_name: dep.input_name.clone(),
                    source_step_id: source_step_id.clone(),
                    output_name: dep.output_name.clone(),
                });
                step.input_references.insert(
                    dep.input_name.clone(),
                    InputReference {
                        source_step_id,
                        output_name: dep.output_name.clone(),
                    },
                );
            }
            step
        })
        .collect();

    (steps, id_map)
}

/// Final steps of a workstream: those no other step in the same workstream
/// depends on. Falls back to the last step when the workstream is cyclic
/// or a singleton with no clear sink (spec.md §4.2.1 step 1).
pub fn final_steps(workstream: &[Step]) -> Vec<&Step> {
    let finals: Vec<&Step> = workstream
        .iter()
        .filter(|w| w.is_endpoint(workstream))
        .collect();
    if finals.is_empty() {
        workstream.last().into_iter().collect()
    } else {
        finals
    }
}

/// Rewire every mission-wide step whose dependency's `source_step_id`
/// equals `replaced_step_id` onto a final step of `workstream` that
/// declares the same `output_name` (falling back to `finals[0]`).
/// Mutates `mission_steps` in place. Returns the number of dependencies
/// rewired, for logging/testing.
pub fn rewire_dependents(
    replaced_step_id: &str,
    workstream: &[Step],
    mission_steps: &mut [Step],
) -> usize {
    let finals = final_steps(workstream);
    if finals.is_empty() {
        return 0;
    }
    let mut rewired = 0;

    for dependent in mission_steps.iter_mut() {
        let matching: Vec<usize> = dependent
            .dependencies
            .iter()
            .enumerate()
            .filter(|(_, d)| d.source_step_id == replaced_step_id)
            .map(|(i, _)| i)
            .collect();

        for idx in matching.into_iter().rev() {
            let old = dependent.dependencies.remove(idx);
            let target = finals
                .iter()
                .find(|w| w.outputs.iter().any(|o| o.name == old.output_name))
                .copied()
                .unwrap_or(finals[0]);

            let new_dep = Dependency {
                input_name: old.input_name.clone(),
                source_step_id: target.id.clone(),
                output_name: old.output_name.clone(),
            };
            dependent.input_references.insert(
                new_dep.input_name.clone(),
                InputReference {
                    source_step_id: new_dep.source_step_id.clone(),
                    output_name: new_dep.output_name.clone(),
                },
            );
            dependent.dependencies.push(new_dep);
            rewired += 1;
        }
    }

    rewired
}

/// Mark the replaced step's terminal state: REPLACED, with the mapped plan
/// output stored as its result (spec.md §4.2.1 step 3).
pub fn mark_replaced(step: &mut Step, mapped_plan_output: PluginOutput) {
    step.status = StepStatus::Replaced;
    step.result = Some(vec![mapped_plan_output]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentset_types::ValueType;

    /// E2 — plan replacement rewiring.
    #[test]
    fn expand_and_rewire_e2_scenario() {
        let plan_output = PluginOutput {
            success: true,
            name: "plan".into(),
            result_type: ValueType::Plan,
            result_description: String::new(),
            result: serde_json::json!([
                {"id": "w1", "action_verb": "RESEARCH", "outputs": [{"name": "facts"}]},
                {
                    "id": "w2",
                    "action_verb": "WRITE",
                    "outputs": [{"name": "o1"}],
                    "dependencies": [dep_json("input", "w1", "facts")]
                },
            ]),
            mime_type: None,
            file_name: None,
            error: None,
        };

        let tasks = parse_plan_tasks(&plan_output).unwrap();
        assert_eq!(tasks.len(), 2);

        let (workstream, id_map) = expand_plan(&tasks, "m1", "agent-1", 2);
        assert_eq!(workstream.len(), 2);
        assert_eq!(workstream[0].status, StepStatus::Pending);
        assert_eq!(workstream[1].status, StepStatus::Pending);

        let w2_id = id_map["w2"].clone();
        assert_eq!(workstream[1].dependencies[0].source_step_id, id_map["w1"]);

        let finals = final_steps(&workstream);
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].id, w2_id);

        // D depends on R's output o1.
        let mut d = Step::new("D", "m1", "agent-2", 5, "USE");
        d.dependencies.push(Dependency {
            input_name: "input".into(),
            source_step_id: "R".into(),
            output_name: "o1".into(),
        });
        let mut mission = vec![d];

        let rewired = rewire_dependents("R", &workstream, &mut mission);
        assert_eq!(rewired, 1);
        assert_eq!(mission[0].dependencies.len(), 1);
        assert_eq!(mission[0].dependencies[0].source_step_id, w2_id);
        assert_eq!(mission[0].dependencies[0].output_name, "o1");

        // No dependency anywhere still points at the replaced step (invariant 3).
        assert!(mission
            .iter()
            .flat_map(|s| &s.dependencies)
            .all(|d| d.source_step_id != "R"));
    }

    fn dep_json(input: &str, source: &str, output: &str) -> serde_json::Value {
        serde_json::json!({"input_name": input, "source_step_id": source, "output_name": output})
    }

    #[test]
    fn final_steps_falls_back_to_last_when_cyclic() {
        let mut a = Step::new("a", "m1", "ag", 1, "X");
        let mut b = Step::new("b", "m1", "ag", 2, "Y");
        a.dependencies.push(Dependency {
            input_name: "i".into(),
            source_step_id: "b".into(),
            output_name: "o".into(),
        });
        b.dependencies.push(Dependency {
            input_name: "i".into(),
            source_step_id: "a".into(),
            output_name: "o".into(),
        });
        let workstream = vec![a, b];
        let finals = final_steps(&workstream);
        assert_eq!(finals.len(), 1);
        assert_eq!(finals[0].id, "b");
    }
}
