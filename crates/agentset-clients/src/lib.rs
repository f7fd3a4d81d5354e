//! Thin HTTP port/adapter layer for the engine's out-of-scope collaborators
//! (spec.md §4.9): Brain, CapabilitiesManager, Librarian, TrafficManager,
//! SecurityManager, MissionControl. No business logic lives here beyond
//! request shaping and response parsing, so `agentset-engine` never has to
//! depend on `reqwest` or HTTP status codes directly.

pub mod brain;
pub mod capabilities;
pub mod error;
pub mod fakes;
pub mod mission_control;
pub mod persistence;
pub mod retry;
pub mod security;
pub mod traffic;

pub use brain::{BrainClient, BrainConversationType, BrainRequest, BrainResponse, HttpBrainClient};
pub use capabilities::{CapabilitiesClient, CapabilityRequest, HttpCapabilitiesClient};
pub use error::{ClientError, ClientResult};
pub use mission_control::{HttpMissionControlClient, MissionControlClient, MissionControlEvent};
pub use persistence::{HttpPersistenceClient, PersistenceClient};
pub use security::{HttpSecurityManagerClient, SecurityManagerClient};
pub use traffic::{HttpTrafficManagerClient, TrafficManagerClient};
