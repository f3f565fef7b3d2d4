use std::sync::Arc;

use application::{ConversationService, HubHandle, SessionContext};
use config::AuthConfig;

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub conversations: Arc<ConversationService>,
    pub hub: HubHandle,
    pub session: SessionContext,
    pub jwt_service: Arc<JwtService>,
    pub auth: AuthConfig,
}

impl AppState {
    pub fn new(
        conversations: Arc<ConversationService>,
        session: SessionContext,
        jwt_service: Arc<JwtService>,
        auth: AuthConfig,
    ) -> Self {
        Self {
            conversations,
            hub: session.hub.clone(),
            session,
            jwt_service,
            auth,
        }
    }
}
