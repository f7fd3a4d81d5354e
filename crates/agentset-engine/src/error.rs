//! The error taxonomy from spec.md §7, reified as a `thiserror` enum.
//!
//! `SignalAbort` is deliberately absent here: it is a control-flow outcome,
//! not a failure (see `StepOutcome::Aborted` in `agent.rs` and Design
//! Notes §9), so it never needs to round-trip through `Result`.

use agentset_clients::ClientError;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A remote call failed in a way that retrying might fix (HTTP timeout,
    /// bus disconnect). Exhausting the retry budget escalates to
    /// `TerminalExternal`.
    #[error("transient external failure calling {service}: {source}")]
    TransientExternal {
        service: &'static str,
        #[source]
        source: ClientError,
    },

    /// The retry budget for a transient failure was exhausted.
    #[error("{service} failed permanently: {source}")]
    TerminalExternal {
        service: &'static str,
        #[source]
        source: ClientError,
    },

    /// Malformed plan, missing required input, unknown actionVerb — never
    /// retried blindly.
    #[error("contract violation: {0}")]
    Contract(String),

    /// Operation attempted on an agent/step/conflict/delegation already in
    /// a terminal or otherwise incompatible state.
    #[error("lifecycle violation: {0}")]
    LifecycleViolation(String),

    /// A step's dependency source isn't in the step-location registry.
    #[error("step location unresolved: {0}")]
    PlacementUnresolved(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl EngineError {
    pub fn contract(msg: impl Into<String>) -> Self {
        EngineError::Contract(msg.into())
    }

    pub fn lifecycle(msg: impl Into<String>) -> Self {
        EngineError::LifecycleViolation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        EngineError::NotFound(msg.into())
    }
}
