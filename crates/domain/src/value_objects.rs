use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = OffsetDateTime;

/// 显示名最大长度（字符数）。
pub const MAX_DISPLAY_NAME_CHARS: usize = 50;

/// 单条消息最大长度（字符数）。
pub const MAX_MESSAGE_CHARS: usize = 4096;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|_| DomainError::invalid_argument($field, "must be a UUID"))
            }
        }
    };
}

uuid_identifier!(
    /// 用户唯一标识。
    UserId,
    "user_id"
);

uuid_identifier!(
    /// 会话（聊天）唯一标识。
    ConversationId,
    "conversation_id"
);

uuid_identifier!(
    /// 消息唯一标识。
    MessageId,
    "message_id"
);

uuid_identifier!(
    /// 单个 WebSocket 连接的标识，每次接入都会重新生成。
    SessionId,
    "session_id"
);

/// 经过验证的显示名。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DisplayName(String);

impl DisplayName {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("username", "cannot be empty"));
        }
        if value.chars().count() > MAX_DISPLAY_NAME_CHARS {
            return Err(DomainError::invalid_argument("username", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 消息正文内容。
///
/// 原样保留客户端发送的文本，只拒绝空白内容和超长内容。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageContent(String);

impl MessageContent {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::invalid_argument(
                "message_content",
                "cannot be empty",
            ));
        }
        if value.chars().count() > MAX_MESSAGE_CHARS {
            return Err(DomainError::invalid_argument("message_content", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_parse_from_strings() {
        let raw = Uuid::new_v4();
        let parsed: ConversationId = raw.to_string().parse().unwrap();
        assert_eq!(Uuid::from(parsed), raw);

        let err = "C1".parse::<UserId>().unwrap_err();
        assert_eq!(err, DomainError::invalid_argument("user_id", "must be a UUID"));
    }

    #[test]
    fn identifiers_serialize_as_plain_strings() {
        let id = ConversationId::generate();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }

    #[test]
    fn display_name_is_trimmed_and_bounded() {
        assert_eq!(DisplayName::parse("  alice ").unwrap().as_str(), "alice");
        assert!(DisplayName::parse("   ").is_err());
        assert!(DisplayName::parse("x".repeat(MAX_DISPLAY_NAME_CHARS + 1)).is_err());
        assert!(DisplayName::parse("名".repeat(MAX_DISPLAY_NAME_CHARS)).is_ok());
    }

    #[test]
    fn message_content_keeps_original_text() {
        let content = MessageContent::new("  hi  ").unwrap();
        assert_eq!(content.as_str(), "  hi  ");
        assert!(MessageContent::new("\n\t").is_err());
        assert!(MessageContent::new("a".repeat(MAX_MESSAGE_CHARS + 1)).is_err());
    }
}
