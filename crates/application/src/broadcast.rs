//! 广播消息
//!
//! 每条被接受的入站消息在持久化成功后构造一次，按值分发给会话的所有在线成员。

use domain::{ConversationId, DisplayName, Message};
use serde::{Deserialize, Serialize};

/// 新成员接入时的系统通知内容
pub const JOINED_NOTICE: &str = "A new user has joined the conversation";

/// 成员离开时的系统通知内容
pub const LEFT_NOTICE: &str = "user left the chat";

/// 出站线上格式：`{"content", "conversationId", "username"}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastMessage {
    content: String,
    conversation_id: ConversationId,
    username: String,
}

impl BroadcastMessage {
    /// 由已持久化的消息构造，只接受存储层返回的 [`Message`]
    pub fn from_stored(message: &Message, sender: &DisplayName) -> Self {
        Self {
            content: message.content.as_str().to_owned(),
            conversation_id: message.conversation_id,
            username: sender.as_str().to_owned(),
        }
    }

    pub fn joined(conversation_id: ConversationId, username: &DisplayName) -> Self {
        Self::system(conversation_id, JOINED_NOTICE, username)
    }

    pub fn left(conversation_id: ConversationId, username: &DisplayName) -> Self {
        Self::system(conversation_id, LEFT_NOTICE, username)
    }

    fn system(conversation_id: ConversationId, content: &str, username: &DisplayName) -> Self {
        Self {
            content: content.to_owned(),
            conversation_id,
            username: username.as_str().to_owned(),
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
