//! Shared application state handed to every handler: the `AgentSet`
//! supervisor plus the collaborators only the HTTP layer needs directly
//! (config, for the bearer-auth middleware and the `/ready` check).

use crate::config::Config;
use agentset_engine::AgentSet;
use std::sync::Arc;

pub struct AppState {
    pub agent_set: Arc<AgentSet>,
    pub config: Config,
}
