//! Bundles every out-of-scope collaborator an agent's loop needs to call,
//! so `Agent`/`AgentHandle` take one `Arc<EngineContext>` instead of six
//! separate client parameters (spec.md §4.9 / SPEC_FULL.md §4.9).

use crate::classifier::{ConversationClassifier, RegexClassifier};
use crate::dependency_resolver::DependencyResolver;
use agentset_bus::MessageBus;
use agentset_clients::{
    BrainClient, CapabilitiesClient, MissionControlClient, PersistenceClient,
    SecurityManagerClient, TrafficManagerClient,
};
use agentset_registry::StepLocationRegistry;
use std::sync::Arc;

pub struct EngineContext {
    pub brain: Arc<dyn BrainClient>,
    pub capabilities: Arc<dyn CapabilitiesClient>,
    pub persistence: Arc<dyn PersistenceClient>,
    pub mission_control: Arc<dyn MissionControlClient>,
    pub traffic: Arc<dyn TrafficManagerClient>,
    pub security: Arc<dyn SecurityManagerClient>,
    pub bus: Arc<dyn MessageBus>,
    pub registry: Arc<StepLocationRegistry>,
    pub dependency_resolver: Arc<DependencyResolver>,
    pub classifier: Arc<dyn ConversationClassifier>,
    pub http: reqwest::Client,
}

impl EngineContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        brain: Arc<dyn BrainClient>,
        capabilities: Arc<dyn CapabilitiesClient>,
        persistence: Arc<dyn PersistenceClient>,
        mission_control: Arc<dyn MissionControlClient>,
        traffic: Arc<dyn TrafficManagerClient>,
        security: Arc<dyn SecurityManagerClient>,
        bus: Arc<dyn MessageBus>,
        registry: Arc<StepLocationRegistry>,
    ) -> Self {
        let dependency_resolver = Arc::new(DependencyResolver::new(registry.clone()));
        Self {
            brain,
            capabilities,
            persistence,
            mission_control,
            traffic,
            security,
            bus,
            registry,
            dependency_resolver,
            classifier: Arc::new(RegexClassifier),
            http: reqwest::Client::new(),
        }
    }
}
