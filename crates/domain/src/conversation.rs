use std::{fmt, str::FromStr};

use crate::errors::DomainError;
use crate::value_objects::{ConversationId, Timestamp, UserId};

/// 会话类型：一对一私聊或群聊
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    Private,
    Group,
}

impl ConversationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationType::Private => "private",
            ConversationType::Group => "group",
        }
    }
}

impl fmt::Display for ConversationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(ConversationType::Private),
            "group" => Ok(ConversationType::Group),
            other => Err(DomainError::UnknownConversationType(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub name: Option<String>,
    pub kind: ConversationType,
    pub creator_id: UserId,
    pub created_at: Timestamp,
}

impl Conversation {
    pub fn new(
        id: ConversationId,
        name: Option<String>,
        kind: ConversationType,
        creator_id: UserId,
        created_at: Timestamp,
    ) -> Result<Self, DomainError> {
        let name = match name {
            Some(raw) => Some(Self::validate_name(raw)?),
            None => None,
        };
        Ok(Self {
            id,
            name,
            kind,
            creator_id,
            created_at,
        })
    }

    /// 私聊恰好两名参与者，群聊至少一名
    pub fn validate_participants(&self, participants: &[UserId]) -> Result<(), DomainError> {
        match self.kind {
            ConversationType::Private if participants.len() != 2 => Err(
                DomainError::invalid_argument("participants", "private conversation needs exactly two"),
            ),
            ConversationType::Group if participants.is_empty() => Err(
                DomainError::invalid_argument("participants", "cannot be empty"),
            ),
            _ => Ok(()),
        }
    }

    fn validate_name(name: String) -> Result<String, DomainError> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::invalid_argument("name", "cannot be empty"));
        }
        if trimmed.chars().count() > 100 {
            return Err(DomainError::invalid_argument("name", "too long"));
        }
        Ok(trimmed.to_owned())
    }
}

/// 会话参与者（持久化的成员关系，与在线连接无关）
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Participant {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub joined_at: Timestamp,
}

impl Participant {
    pub fn new(conversation_id: ConversationId, user_id: UserId, joined_at: Timestamp) -> Self {
        Self {
            conversation_id,
            user_id,
            joined_at,
        }
    }
}
