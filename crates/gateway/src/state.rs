use std::sync::Arc;

use teller_domain::config::ServerConfig;
use teller_domain::context::ExecutionLimits;
use teller_engine::Engine;
use teller_sessions::{ConversationStore, PendingActionStore};

use crate::auth::TokenValidator;

/// Shared application state passed to every connection.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub conversations: Arc<dyn ConversationStore>,
    pub pending: Arc<dyn PendingActionStore>,
    pub auth: Arc<dyn TokenValidator>,
    /// Budget applied to runs started over this gateway.
    pub limits: ExecutionLimits,
    pub config: Arc<ServerConfig>,
}
