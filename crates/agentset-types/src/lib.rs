//! Shared data model for the AgentSet execution core.
//!
//! Every type here is a plain, serializable value: the engine, the bus, and
//! the HTTP surface all speak this vocabulary without depending on each
//! other's internals.

pub mod agent;
pub mod conflict;
pub mod delegation;
pub mod events;
pub mod step;
pub mod value;

pub use agent::{AgentSnapshot, AgentStatus, ConversationEntry, Role};
pub use conflict::{Conflict, ConflictStatus, ConflictStrategy, Vote};
pub use delegation::{DelegatedTask, DelegatedTaskStatus, Priority};
pub use events::{PersistedEvent, WorkProduct, WorkProductScope, WorkProductType};
pub use step::{Dependency, Step, StepStatus};
pub use value::{InputValue, PluginOutput, ValueType};
