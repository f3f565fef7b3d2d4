use domain::{ConversationId, DomainError, RepositoryError, UserId};
use thiserror::Error;

use crate::hub::HubError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),
    #[error("user {user_id} is not a participant of conversation {conversation_id}")]
    NotParticipant {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    #[error("authentication failed")]
    Authentication,
    #[error("hub is not running")]
    HubUnavailable,
}

impl From<HubError> for ApplicationError {
    fn from(_: HubError) -> Self {
        ApplicationError::HubUnavailable
    }
}

/// 连接读写失败，只影响所在会话
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("transport failure: {0}")]
    Io(String),
}

impl TransportError {
    pub fn io(message: impl Into<String>) -> Self {
        TransportError::Io(message.into())
    }
}
