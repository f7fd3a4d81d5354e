//! Execution engine for the AgentSet supervisor (spec.md §4): the per-agent
//! run loop, dependency resolution, plan expansion, task delegation,
//! conflict resolution, collaboration routing, and lifecycle management.
//! `agentset-server` wires this crate's `AgentSet` to the HTTP surface.

pub mod agent;
pub mod agent_set;
pub mod classifier;
pub mod collaboration;
pub mod conflict_resolution;
pub mod context;
pub mod dependency_resolver;
pub mod error;
pub mod lifecycle;
pub mod mission;
pub mod outcome;
pub mod plan;
pub mod runtime;
pub mod task_delegation;

pub use agent::{Agent, AgentCommand};
pub use agent_set::{AgentSet, AgentSetStats};
pub use classifier::{ConversationClassifier, RegexClassifier};
pub use collaboration::{CollaborationEnvelope, CollaborationManager, CollaborationMessage, CollaborationOutcome};
pub use conflict_resolution::ConflictResolution;
pub use context::EngineContext;
pub use dependency_resolver::{DependencyResolver, MissionStepView};
pub use error::{EngineError, EngineResult};
pub use lifecycle::LifecycleManager;
pub use mission::{AgentHandle, MissionRegistry, MissionSteps};
pub use outcome::StepOutcome;
pub use task_delegation::{DelegationRequest, DelegationResponse, TaskDelegation};
