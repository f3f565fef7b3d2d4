//! 进程内存储
//!
//! 用于测试和 `database.url = "memory"` 的开发模式，进程退出即丢失。

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use domain::{Conversation, ConversationId, Message, Participant, RepositoryError, UserId};
use tokio::sync::RwLock;

use crate::repository::{ConversationRepository, MessageStore, ParticipantRepository};

/// 会话与参与者存储
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<ConversationId, Conversation>>,
    participants: RwLock<HashMap<ConversationId, HashSet<UserId>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationStore {
    async fn create_with_participants(
        &self,
        conversation: Conversation,
        participants: Vec<Participant>,
    ) -> Result<Conversation, RepositoryError> {
        // 两把锁按固定顺序获取，写入要么全部可见要么全部不可见
        let mut conversations = self.conversations.write().await;
        let mut members = self.participants.write().await;
        if conversations.contains_key(&conversation.id) {
            return Err(RepositoryError::Conflict);
        }

        members.insert(
            conversation.id,
            participants.iter().map(|p| p.user_id).collect(),
        );
        conversations.insert(conversation.id, conversation.clone());
        Ok(conversation)
    }

    async fn find_by_id(
        &self,
        id: ConversationId,
    ) -> Result<Option<Conversation>, RepositoryError> {
        Ok(self.conversations.read().await.get(&id).cloned())
    }

    async fn list_ids(&self) -> Result<Vec<ConversationId>, RepositoryError> {
        Ok(self.conversations.read().await.keys().copied().collect())
    }
}

#[async_trait]
impl ParticipantRepository for InMemoryConversationStore {
    async fn is_member(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        Ok(self
            .participants
            .read()
            .await
            .get(&conversation_id)
            .is_some_and(|members| members.contains(&user_id)))
    }
}

/// 按追加顺序保存消息
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, message: Message) -> Result<Message, RepositoryError> {
        self.messages.write().await.push(message.clone());
        Ok(message)
    }
}
