//! 应用层实现。
//!
//! 核心是 Hub 事件循环、会话目录和客户端会话；服务层负责会话创建、
//! 接入校验和消息持久化，外部存储通过 [`repository`] 中的 trait 抽象。

pub mod broadcast;
pub mod clock;
pub mod directory;
pub mod error;
pub mod hub;
pub mod memory;
pub mod metrics;
pub mod repository;
pub mod services;
pub mod session;

pub use broadcast::{BroadcastMessage, JOINED_NOTICE, LEFT_NOTICE};
pub use clock::{Clock, SystemClock};
pub use directory::{ConversationDirectory, MemberSummary, SessionHandle};
pub use error::{ApplicationError, TransportError};
pub use hub::{Hub, HubError, HubEvent, HubHandle, RegisterOutcome};
pub use memory::{InMemoryConversationStore, InMemoryMessageStore};
pub use metrics::{HubMetrics, HubStats};
pub use repository::{ConversationRepository, MessageStore, ParticipantRepository};
pub use services::{
    AttachRequest, ConversationService, ConversationServiceDependencies,
    CreateConversationRequest, MessageService, MessageServiceDependencies,
};
pub use session::{ClientSession, InboundFrame, SessionContext, SessionState};
