use std::sync::Arc;

use domain::{ConversationId, Message, MessageContent, MessageId, UserId};

use crate::{clock::Clock, error::ApplicationError, repository::MessageStore};

pub struct MessageServiceDependencies {
    pub message_store: Arc<dyn MessageStore>,
    pub clock: Arc<dyn Clock>,
}

/// 入站消息的持久化入口
pub struct MessageService {
    deps: MessageServiceDependencies,
}

impl MessageService {
    pub fn new(deps: MessageServiceDependencies) -> Self {
        Self { deps }
    }

    /// 校验并追加一条消息，返回存储层确认后的消息
    ///
    /// 内容为空白或超长时返回 [`ApplicationError::Domain`]，不会触达存储层；
    /// 存储失败时返回 [`ApplicationError::Repository`]，不做重试。
    pub async fn record(
        &self,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: String,
    ) -> Result<Message, ApplicationError> {
        let content = MessageContent::new(content)?;
        let message = Message::new(
            MessageId::generate(),
            conversation_id,
            sender_id,
            content,
            self.deps.clock.now(),
        );

        let stored = self.deps.message_store.append(message).await?;
        Ok(stored)
    }
}
