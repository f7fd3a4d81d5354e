//! Evaluates step readiness and permanent-unsatisfiability across an
//! agent's own steps and across peer agents in the same mission, via the
//! `StepLocationRegistry` (spec.md §2 row 5, §4.1).
//!
//! `Step::are_dependencies_satisfied` (agentset-types) only sees one
//! agent's `steps` slice. When a dependency's source step belongs to
//! another agent on this AgentSet — or to an agent on a peer AgentSet —
//! this resolver widens the search using the registry before falling back
//! to `PlacementUnresolved`.

use agentset_registry::StepLocationRegistry;
use agentset_types::{Step, StepStatus};
use std::sync::Arc;

/// A read-only view over every agent's steps on this AgentSet, keyed by
/// step id. The supervisor builds this per dereference call; it is cheap
/// because it borrows rather than clones step data.
pub trait MissionStepView {
    fn find_step(&self, step_id: &str) -> Option<&Step>;
}

pub struct DependencyResolver {
    registry: Arc<StepLocationRegistry>,
}

impl DependencyResolver {
    pub fn new(registry: Arc<StepLocationRegistry>) -> Self {
        Self { registry }
    }

    /// True iff every dependency source is resolvable: locally-owned (via
    /// `local`), owned by another local agent (via `mission`), or -- if
    /// neither sees it -- registered with a remote AgentSet (in which case
    /// we can't verify completion here and conservatively report not
    /// ready; the cross-set dereference happens lazily on next poll, per
    /// spec.md §4.2.1 "Mission-wide means...").
    pub async fn are_dependencies_satisfied(
        &self,
        step: &Step,
        local_steps: &[Step],
        mission: &dyn MissionStepView,
    ) -> bool {
        for dep in &step.dependencies {
            if local_steps.iter().any(|s| s.id == dep.source_step_id) {
                continue;
            }
            if let Some(source) = mission.find_step(&dep.source_step_id) {
                if source.status != StepStatus::Completed {
                    return false;
                }
                continue;
            }
            // Not visible locally or on this mission's other agents.
            // Consult the registry purely to distinguish "known remote" from
            // "truly unplaced" -- either way we aren't ready yet.
            if self.registry.get(&dep.source_step_id).await.is_none() {
                return false;
            }
            return false;
        }
        step.are_dependencies_satisfied(local_steps)
    }

    /// True iff any dependency source anywhere visible (local, mission-wide,
    /// or registry-known) has terminated in a way this step can never
    /// recover from.
    pub async fn are_dependencies_permanently_unsatisfied(
        &self,
        step: &Step,
        local_steps: &[Step],
        mission: &dyn MissionStepView,
    ) -> bool {
        for dep in &step.dependencies {
            if local_steps.iter().any(|s| s.id == dep.source_step_id) {
                continue;
            }
            if let Some(source) = mission.find_step(&dep.source_step_id) {
                if matches!(source.status, StepStatus::Error | StepStatus::Cancelled) {
                    return true;
                }
            }
        }
        step.are_dependencies_permanently_unsatisfied(local_steps)
    }

    /// Resolve the AgentSet URL hosting `step_id`, for cross-set
    /// dereference/routing. `None` means it isn't registered at all.
    pub async fn locate(&self, step_id: &str) -> Option<agentset_registry::StepLocation> {
        self.registry.get(step_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentset_types::{Dependency, PluginOutput, StepStatus, ValueType};
    use std::collections::HashMap;

    struct FakeMission(HashMap<String, Step>);

    impl MissionStepView for FakeMission {
        fn find_step(&self, step_id: &str) -> Option<&Step> {
            self.0.get(step_id)
        }
    }

    fn completed(id: &str) -> Step {
        let mut s = Step::new(id, "m1", "other-agent", 1, "GENERATE");
        s.status = StepStatus::Completed;
        s.result = Some(vec![PluginOutput::success(
            "out",
            ValueType::String,
            serde_json::json!("v"),
        )]);
        s
    }

    fn consumer(source_id: &str) -> Step {
        let mut s = Step::new("C", "m1", "a1", 2, "USE");
        s.dependencies.push(Dependency {
            input_name: "content".into(),
            source_step_id: source_id.into(),
            output_name: "out".into(),
        });
        s
    }

    #[tokio::test]
    async fn resolves_against_peer_agent_in_same_mission() {
        let registry = Arc::new(StepLocationRegistry::new());
        let resolver = DependencyResolver::new(registry);
        let mission = FakeMission(HashMap::from([("P".to_string(), completed("P"))]));
        let c = consumer("P");

        assert!(resolver.are_dependencies_satisfied(&c, &[], &mission).await);
    }

    #[tokio::test]
    async fn unresolved_source_is_not_ready() {
        let registry = Arc::new(StepLocationRegistry::new());
        let resolver = DependencyResolver::new(registry);
        let mission = FakeMission(HashMap::new());
        let c = consumer("ghost");

        assert!(!resolver.are_dependencies_satisfied(&c, &[], &mission).await);
    }
}
