//! Hub 运行计数器
//!
//! 所有丢弃路径（未知会话、背压、持久化失败）都会在这里留下计数。

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct HubMetrics {
    sessions_registered: AtomicU64,
    sessions_unregistered: AtomicU64,
    registrations_rejected: AtomicU64,
    sessions_evicted: AtomicU64,
    broadcasts: AtomicU64,
    broadcasts_unknown_conversation: AtomicU64,
    deliveries: AtomicU64,
    deliveries_dropped: AtomicU64,
    frames_rejected: AtomicU64,
    persistence_failures: AtomicU64,
    conversations_tracked: AtomicU64,
    conversations_evicted: AtomicU64,
    resident_conversations: AtomicU64,
    attached_sessions: AtomicU64,
}

/// 计数器快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub sessions_registered: u64,
    pub sessions_unregistered: u64,
    pub registrations_rejected: u64,
    pub sessions_evicted: u64,
    pub broadcasts: u64,
    pub broadcasts_unknown_conversation: u64,
    pub deliveries: u64,
    pub deliveries_dropped: u64,
    pub frames_rejected: u64,
    pub persistence_failures: u64,
    pub conversations_tracked: u64,
    pub conversations_evicted: u64,
    pub resident_conversations: u64,
    pub attached_sessions: u64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl HubMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn session_registered(&self) {
        bump(&self.sessions_registered, 1);
    }

    pub(crate) fn session_unregistered(&self) {
        bump(&self.sessions_unregistered, 1);
    }

    pub(crate) fn registration_rejected(&self) {
        bump(&self.registrations_rejected, 1);
    }

    pub(crate) fn session_evicted(&self) {
        bump(&self.sessions_evicted, 1);
    }

    pub(crate) fn broadcast_processed(&self) {
        bump(&self.broadcasts, 1);
    }

    pub(crate) fn broadcast_unknown_conversation(&self) {
        bump(&self.broadcasts_unknown_conversation, 1);
    }

    pub(crate) fn delivered(&self, count: u64) {
        bump(&self.deliveries, count);
    }

    pub(crate) fn delivery_dropped(&self) {
        bump(&self.deliveries_dropped, 1);
    }

    pub(crate) fn frame_rejected(&self) {
        bump(&self.frames_rejected, 1);
    }

    pub(crate) fn persistence_failed(&self) {
        bump(&self.persistence_failures, 1);
    }

    pub(crate) fn conversation_tracked(&self) {
        bump(&self.conversations_tracked, 1);
    }

    pub(crate) fn conversations_evicted(&self, count: u64) {
        bump(&self.conversations_evicted, count);
    }

    pub(crate) fn set_residency(&self, conversations: usize, sessions: usize) {
        self.resident_conversations
            .store(conversations as u64, Ordering::Relaxed);
        self.attached_sessions
            .store(sessions as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> HubStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        HubStats {
            sessions_registered: load(&self.sessions_registered),
            sessions_unregistered: load(&self.sessions_unregistered),
            registrations_rejected: load(&self.registrations_rejected),
            sessions_evicted: load(&self.sessions_evicted),
            broadcasts: load(&self.broadcasts),
            broadcasts_unknown_conversation: load(&self.broadcasts_unknown_conversation),
            deliveries: load(&self.deliveries),
            deliveries_dropped: load(&self.deliveries_dropped),
            frames_rejected: load(&self.frames_rejected),
            persistence_failures: load(&self.persistence_failures),
            conversations_tracked: load(&self.conversations_tracked),
            conversations_evicted: load(&self.conversations_evicted),
            resident_conversations: load(&self.resident_conversations),
            attached_sessions: load(&self.attached_sessions),
        }
    }
}
