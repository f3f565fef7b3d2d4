mod conversation_service;
mod message_service;

pub use conversation_service::{
    AttachRequest, ConversationService, ConversationServiceDependencies,
    CreateConversationRequest,
};
pub use message_service::{MessageService, MessageServiceDependencies};
