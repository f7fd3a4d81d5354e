use crate::value::{InputValue, PluginOutput, ValueType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Error,
    Cancelled,
    Replaced,
    Paused,
}

impl StepStatus {
    /// Terminal statuses never transition back to Running (invariant 2, §8).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Error | StepStatus::Cancelled | StepStatus::Replaced
        )
    }
}

/// One edge in a step's dependency list: `inputName` is satisfied by
/// `sourceStepId`'s `outputName` once that step completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dependency {
    pub input_name: String,
    pub source_step_id: String,
    pub output_name: String,
}

/// The declared binding a dependency came from — kept alongside
/// `dependencies` because rewiring (§4.2.1) must update both the ordered
/// list and the by-name lookup in lockstep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputReference {
    pub source_step_id: String,
    pub output_name: String,
}

/// A named output descriptor declared by a step (what it promises to
/// produce, independent of whether it has run yet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub mission_id: String,
    pub owner_agent_id: String,
    pub step_no: u32,
    pub action_verb: String,
    #[serde(default)]
    pub description: String,
    pub status: StepStatus,
    #[serde(default)]
    pub input_references: HashMap<String, InputReference>,
    #[serde(default)]
    pub input_values: HashMap<String, InputValue>,
    #[serde(default)]
    pub outputs: Vec<OutputDescriptor>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
    #[serde(default)]
    pub result: Option<Vec<PluginOutput>>,
    #[serde(default)]
    pub recommended_role: Option<String>,
    #[serde(default)]
    pub delegating_agent_id: Option<String>,
    #[serde(default)]
    pub awaits_signal: Option<String>,
}

impl Step {
    pub fn new(
        id: impl Into<String>,
        mission_id: impl Into<String>,
        owner_agent_id: impl Into<String>,
        step_no: u32,
        action_verb: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            mission_id: mission_id.into(),
            owner_agent_id: owner_agent_id.into(),
            step_no,
            action_verb: action_verb.into(),
            description: String::new(),
            status: StepStatus::Pending,
            input_references: HashMap::new(),
            input_values: HashMap::new(),
            outputs: Vec::new(),
            dependencies: Vec::new(),
            result: None,
            recommended_role: None,
            delegating_agent_id: None,
            awaits_signal: None,
        }
    }

    fn find_source<'a>(all_steps: &'a [Step], id: &str) -> Option<&'a Step> {
        all_steps.iter().find(|s| s.id == id)
    }

    /// Locate the output a dependency resolves to, honoring the auto-mapping
    /// fallback: an exact name match wins; otherwise, if the producer has
    /// exactly one output, that sole output is used and the caller is told
    /// what its real name was so it can record `auto_mapped_from`.
    fn resolve_output<'a>(
        source: &'a Step,
        output_name: &str,
    ) -> Option<(&'a PluginOutput, Option<&'a str>)> {
        let result = source.result.as_ref()?;
        if let Some(exact) = result.iter().find(|o| o.name == output_name) {
            return Some((exact, None));
        }
        if result.len() == 1 {
            let sole = &result[0];
            return Some((sole, Some(sole.name.as_str())));
        }
        None
    }

    /// True iff every dependency's source step is COMPLETED and its output
    /// is resolvable (exact name match, or a lone auto-mappable output).
    pub fn are_dependencies_satisfied(&self, all_steps: &[Step]) -> bool {
        self.dependencies.iter().all(|dep| {
            match Self::find_source(all_steps, &dep.source_step_id) {
                Some(source) if source.status == StepStatus::Completed => {
                    Self::resolve_output(source, &dep.output_name).is_some()
                }
                _ => false,
            }
        })
    }

    /// True iff any dependency's source is ERROR/CANCELLED with no
    /// alternative mapping — this step can never become ready.
    pub fn are_dependencies_permanently_unsatisfied(&self, all_steps: &[Step]) -> bool {
        self.dependencies.iter().any(|dep| {
            match Self::find_source(all_steps, &dep.source_step_id) {
                Some(source) => {
                    matches!(source.status, StepStatus::Error | StepStatus::Cancelled)
                }
                None => false,
            }
        })
    }

    /// Populate `input_values` from completed dependency sources, recording
    /// `auto_mapped_from` when the auto-mapping fallback was used. Returns
    /// the list of `(input_name, mapped_from_output)` pairs that were
    /// auto-mapped, so the caller can emit `dependency_auto_remap` events.
    pub fn dereference_inputs(&mut self, all_steps: &[Step]) -> Vec<(String, String)> {
        let mut auto_mapped = Vec::new();
        let deps = self.dependencies.clone();
        for dep in &deps {
            let Some(source) = Self::find_source(all_steps, &dep.source_step_id) else {
                continue;
            };
            if source.status != StepStatus::Completed {
                continue;
            }
            let Some((output, mapped_from)) = Self::resolve_output(source, &dep.output_name) else {
                continue;
            };
            let mut value = InputValue::new(dep.input_name.clone(), output.result.clone(), output.result_type);
            if let Some(actual_name) = mapped_from {
                value = value.with_auto_mapped_from(actual_name);
                auto_mapped.push((dep.input_name.clone(), actual_name.to_string()));
            }
            self.input_values.insert(dep.input_name.clone(), value);
        }
        auto_mapped
    }

    /// Relabel this step's result according to its declared `outputs`
    /// mapping, preserving positional order when names line up 1:1 and
    /// falling back to the plugin's own name otherwise.
    pub fn map_plugin_outputs_to_custom_names(&self, result: Vec<PluginOutput>) -> Vec<PluginOutput> {
        if self.outputs.is_empty() || self.outputs.len() != result.len() {
            return result;
        }
        result
            .into_iter()
            .zip(self.outputs.iter())
            .map(|(mut output, desc)| {
                output.name = desc.name.clone();
                output
            })
            .collect()
    }

    /// True if no other step in `steps` depends on this one.
    pub fn is_endpoint(&self, steps: &[Step]) -> bool {
        !steps
            .iter()
            .any(|s| s.dependencies.iter().any(|d| d.source_step_id == self.id))
    }

    pub fn has_deliverable_outputs(&self) -> bool {
        self.result
            .as_ref()
            .map(|r| r.iter().any(|o| o.is_deliverable()))
            .unwrap_or(false)
    }
}

/// The coarse shape of a completed step's output — used by the reflection
/// and delivery paths to decide whether to surface something to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputType {
    Interim,
    Final,
    Plan,
}

impl Step {
    pub fn get_output_type(&self, steps: &[Step]) -> OutputType {
        let Some(result) = &self.result else {
            return OutputType::Interim;
        };
        if result.iter().any(|o| o.is_plan()) {
            return OutputType::Plan;
        }
        if self.is_endpoint(steps) {
            OutputType::Final
        } else {
            OutputType::Interim
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn producer(id: &str, outputs: Vec<PluginOutput>) -> Step {
        let mut s = Step::new(id, "m1", "a1", 1, "GENERATE");
        s.status = StepStatus::Completed;
        s.result = Some(outputs);
        s
    }

    fn consumer(id: &str, source_id: &str, input_name: &str, output_name: &str) -> Step {
        let mut s = Step::new(id, "m1", "a1", 2, "USE");
        s.dependencies.push(Dependency {
            input_name: input_name.to_string(),
            source_step_id: source_id.to_string(),
            output_name: output_name.to_string(),
        });
        s
    }

    /// E1 — auto-mapping fallback.
    #[test]
    fn dereference_inputs_auto_maps_sole_output() {
        let p = producer(
            "P",
            vec![PluginOutput::success(
                "answer",
                ValueType::String,
                serde_json::json!("The poem"),
            )],
        );
        let mut c = consumer("C", "P", "content", "poem");
        let all = vec![p.clone(), c.clone()];

        assert!(c.are_dependencies_satisfied(&all));
        let auto_mapped = c.dereference_inputs(&all);
        assert_eq!(auto_mapped, vec![("content".to_string(), "answer".to_string())]);

        let value = c.input_values.get("content").unwrap();
        assert_eq!(value.value, serde_json::json!("The poem"));
        assert_eq!(value.auto_mapped_from(), Some("answer"));
    }

    #[test]
    fn dereference_inputs_exact_match_does_not_auto_map() {
        let p = producer(
            "P",
            vec![PluginOutput::success("poem", ValueType::String, serde_json::json!("hi"))],
        );
        let mut c = consumer("C", "P", "content", "poem");
        let all = vec![p, c.clone()];

        c.dereference_inputs(&all);
        let value = c.input_values.get("content").unwrap();
        assert!(!value.is_auto_mapped());
    }

    #[test]
    fn permanently_unsatisfied_when_source_errored() {
        let mut p = producer("P", vec![]);
        p.status = StepStatus::Error;
        let c = consumer("C", "P", "content", "poem");
        let all = vec![p, c.clone()];

        assert!(c.are_dependencies_permanently_unsatisfied(&all));
        assert!(!c.are_dependencies_satisfied(&all));
    }

    #[test]
    fn not_satisfied_when_multiple_outputs_and_no_exact_match() {
        let p = producer(
            "P",
            vec![
                PluginOutput::success("a", ValueType::String, serde_json::json!("x")),
                PluginOutput::success("b", ValueType::String, serde_json::json!("y")),
            ],
        );
        let c = consumer("C", "P", "content", "poem");
        let all = vec![p, c.clone()];

        assert!(!c.are_dependencies_satisfied(&all));
    }

    #[test]
    fn is_endpoint_true_when_nothing_depends_on_it() {
        let p = producer("P", vec![]);
        let c = consumer("C", "P", "content", "poem");
        let all = vec![p.clone(), c.clone()];

        assert!(!p.is_endpoint(&all));
        assert!(c.is_endpoint(&all));
    }

    #[test]
    fn terminal_status_never_reverts_to_running() {
        for terminal in [StepStatus::Completed, StepStatus::Error, StepStatus::Cancelled, StepStatus::Replaced] {
            assert!(terminal.is_terminal());
        }
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Waiting.is_terminal());
    }
}
