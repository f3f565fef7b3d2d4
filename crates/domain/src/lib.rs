//! 聊天转发系统核心领域模型
//!
//! 包含会话、参与者、消息等实体，以及标识符和经过校验的值对象。

pub mod conversation;
pub mod errors;
pub mod message;
pub mod value_objects;

// 重新导出常用类型
pub use conversation::{Conversation, ConversationType, Participant};
pub use errors::{DomainError, DomainResult, RepositoryError};
pub use message::Message;
pub use value_objects::{
    ConversationId, DisplayName, MessageContent, MessageId, SessionId, Timestamp, UserId,
    MAX_DISPLAY_NAME_CHARS, MAX_MESSAGE_CHARS,
};
