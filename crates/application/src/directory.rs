//! 会话目录
//!
//! 会话标识 → 当前在线成员集合。只由 Hub 事件循环持有和修改，因此不需要锁。
//! 成员以会话连接标识为键，不保证遍历顺序。

use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
    time::Duration,
};

use domain::{ConversationId, DisplayName, SessionId, UserId};
use serde::Serialize;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::Instant,
};

use crate::broadcast::BroadcastMessage;

pub type OutboundSender = mpsc::Sender<Arc<BroadcastMessage>>;
pub type OutboundReceiver = mpsc::Receiver<Arc<BroadcastMessage>>;

/// Hub 持有的会话句柄
///
/// 出站队列唯一的发送端在这里，句柄被丢弃即关闭队列，会话的出站泵随之退出。
#[derive(Debug)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub username: DisplayName,
    outbound: OutboundSender,
}

impl SessionHandle {
    /// 创建句柄及对应的有界出站队列接收端
    pub fn new(
        session_id: SessionId,
        conversation_id: ConversationId,
        user_id: UserId,
        username: DisplayName,
        capacity: usize,
    ) -> (Self, OutboundReceiver) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                session_id,
                conversation_id,
                user_id,
                username,
                outbound,
            },
            receiver,
        )
    }

    /// 非阻塞投递，队列满时立即返回
    pub(crate) fn try_deliver(
        &self,
        message: Arc<BroadcastMessage>,
    ) -> Result<(), TrySendError<Arc<BroadcastMessage>>> {
        self.outbound.try_send(message)
    }

    pub fn summary(&self) -> MemberSummary {
        MemberSummary {
            id: self.session_id,
            user_id: self.user_id,
            username: self.username.as_str().to_owned(),
        }
    }
}

/// 在线成员摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberSummary {
    pub id: SessionId,
    pub user_id: UserId,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
    UnknownConversation,
}

#[derive(Debug)]
pub struct Removed {
    pub session: SessionHandle,
    /// 移除后剩余成员数
    pub remaining: usize,
}

#[derive(Debug, Default)]
struct ConversationEntry {
    members: HashMap<SessionId, SessionHandle>,
    /// 成员为空的起始时间
    idle_since: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct ConversationDirectory {
    entries: HashMap<ConversationId, ConversationEntry>,
    // 会话连接所在的会话，保证一个连接至多属于一个会话
    locations: HashMap<SessionId, ConversationId>,
}

impl ConversationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建空条目，已存在时返回 false
    ///
    /// 已存在的空条目重新计时，保证接入校验之后、注册之前不会被回收。
    pub fn track(&mut self, conversation_id: ConversationId, now: Instant) -> bool {
        match self.entries.entry(conversation_id) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.members.is_empty() {
                    entry.idle_since = Some(now);
                }
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ConversationEntry {
                    members: HashMap::new(),
                    idle_since: Some(now),
                });
                true
            }
        }
    }

    #[cfg(test)]
    pub fn contains(&self, conversation_id: &ConversationId) -> bool {
        self.entries.contains_key(conversation_id)
    }

    /// 加入成员；重复加入或会话不存在时句柄被丢弃
    pub fn insert(&mut self, session: SessionHandle) -> InsertOutcome {
        if self.locations.contains_key(&session.session_id) {
            return InsertOutcome::AlreadyPresent;
        }
        let Some(entry) = self.entries.get_mut(&session.conversation_id) else {
            return InsertOutcome::UnknownConversation;
        };

        self.locations
            .insert(session.session_id, session.conversation_id);
        entry.idle_since = None;
        entry.members.insert(session.session_id, session);
        InsertOutcome::Inserted
    }

    /// 移除成员，返回被移除的句柄和剩余人数；不是成员时返回 None
    pub fn remove(
        &mut self,
        conversation_id: &ConversationId,
        session_id: &SessionId,
        now: Instant,
    ) -> Option<Removed> {
        let entry = self.entries.get_mut(conversation_id)?;
        let session = entry.members.remove(session_id)?;
        self.locations.remove(session_id);

        let remaining = entry.members.len();
        if remaining == 0 {
            entry.idle_since = Some(now);
        }
        Some(Removed { session, remaining })
    }

    pub fn members(
        &self,
        conversation_id: &ConversationId,
    ) -> Option<impl Iterator<Item = &SessionHandle>> {
        self.entries
            .get(conversation_id)
            .map(|entry| entry.members.values())
    }

    #[cfg(test)]
    pub fn member_count(&self, conversation_id: &ConversationId) -> Option<usize> {
        self.entries
            .get(conversation_id)
            .map(|entry| entry.members.len())
    }

    /// 回收空闲超过 `ttl` 的空会话条目
    pub fn evict_idle(&mut self, now: Instant, ttl: Duration) -> Vec<ConversationId> {
        let expired: Vec<ConversationId> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry.members.is_empty()
                    && entry
                        .idle_since
                        .is_some_and(|since| now.saturating_duration_since(since) >= ttl)
            })
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.entries.remove(id);
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn session_count(&self) -> usize {
        self.locations.len()
    }

    /// 清空目录并关闭全部出站队列，返回被关闭的会话数
    pub fn clear(&mut self) -> usize {
        let closed = self.locations.len();
        self.entries.clear();
        self.locations.clear();
        closed
    }
}
