//! 外部协作方接口：消息存储、会话存储、参与者存储。

use async_trait::async_trait;
use domain::{Conversation, ConversationId, Message, Participant, RepositoryError, UserId};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    // 追加一条消息，成功后才允许广播
    async fn append(&self, message: Message) -> Result<Message, RepositoryError>;
}

#[async_trait]
pub trait ConversationRepository: Send + Sync {
    /// 在同一事务中写入会话及其参与者
    async fn create_with_participants(
        &self,
        conversation: Conversation,
        participants: Vec<Participant>,
    ) -> Result<Conversation, RepositoryError>;

    async fn find_by_id(&self, id: ConversationId)
        -> Result<Option<Conversation>, RepositoryError>;

    /// 全部会话标识，用于启动时填充会话目录
    async fn list_ids(&self) -> Result<Vec<ConversationId>, RepositoryError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError>;
}
