//! Hub 事件循环
//!
//! 唯一持有 [`ConversationDirectory`] 的任务。成员变更与广播分发都作为事件
//! 进入同一个有界队列，按到达顺序逐个处理，因此目录本身不需要锁。
//!
//! 分发从不在会话队列上等待：每个接收方只做一次 `try_send`，队列已满时
//! 按 [`BackpressurePolicy`] 丢弃或驱逐，慢连接不会拖住整个循环。

use std::{collections::VecDeque, sync::Arc, time::Duration};

use config::{BackpressurePolicy, HubConfig, MAX_SWEEP_INTERVAL_SECS};
use domain::{ConversationId, SessionId};
use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::BroadcastMessage,
    directory::{ConversationDirectory, InsertOutcome, MemberSummary, SessionHandle},
    metrics::HubMetrics,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("hub is not running")]
pub struct HubError;

impl<T> From<mpsc::error::SendError<T>> for HubError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        HubError
    }
}

impl From<oneshot::error::RecvError> for HubError {
    fn from(_: oneshot::error::RecvError) -> Self {
        HubError
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Registered,
    /// 同一会话连接已在目录中，新句柄被丢弃
    AlreadyRegistered,
    UnknownConversation,
}

#[derive(Debug)]
pub enum HubEvent {
    Track {
        conversation_id: ConversationId,
        reply: Option<oneshot::Sender<bool>>,
    },
    Register {
        session: SessionHandle,
        reply: Option<oneshot::Sender<RegisterOutcome>>,
    },
    Unregister {
        conversation_id: ConversationId,
        session_id: SessionId,
    },
    Broadcast(BroadcastMessage),
    Members {
        conversation_id: ConversationId,
        reply: oneshot::Sender<Vec<MemberSummary>>,
    },
    Shutdown,
}

/// 向 Hub 投递事件的句柄，可自由克隆
///
/// 所有句柄都被丢弃后 Hub 关闭全部会话队列并退出。
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    metrics: Arc<HubMetrics>,
}

impl HubHandle {
    /// 为会话创建空的目录条目，返回是否为新建
    pub async fn track(&self, conversation_id: ConversationId) -> Result<bool, HubError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(HubEvent::Track {
                conversation_id,
                reply: Some(reply),
            })
            .await?;
        Ok(response.await?)
    }

    pub async fn register(&self, session: SessionHandle) -> Result<RegisterOutcome, HubError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(HubEvent::Register {
                session,
                reply: Some(reply),
            })
            .await?;
        Ok(response.await?)
    }

    pub async fn unregister(
        &self,
        conversation_id: ConversationId,
        session_id: SessionId,
    ) -> Result<(), HubError> {
        self.events
            .send(HubEvent::Unregister {
                conversation_id,
                session_id,
            })
            .await?;
        Ok(())
    }

    pub async fn broadcast(&self, message: BroadcastMessage) -> Result<(), HubError> {
        self.events.send(HubEvent::Broadcast(message)).await?;
        Ok(())
    }

    /// 会话当前在线成员快照，未知会话返回空列表
    pub async fn members(
        &self,
        conversation_id: ConversationId,
    ) -> Result<Vec<MemberSummary>, HubError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(HubEvent::Members {
                conversation_id,
                reply,
            })
            .await?;
        Ok(response.await?)
    }

    pub async fn shutdown(&self) -> Result<(), HubError> {
        self.events.send(HubEvent::Shutdown).await?;
        Ok(())
    }

    pub fn metrics(&self) -> Arc<HubMetrics> {
        Arc::clone(&self.metrics)
    }
}

const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(MAX_SWEEP_INTERVAL_SECS);

pub struct Hub {
    directory: ConversationDirectory,
    events: mpsc::Receiver<HubEvent>,
    policy: BackpressurePolicy,
    idle_ttl: Duration,
    sweep_interval: Duration,
    metrics: Arc<HubMetrics>,
}

impl Hub {
    pub fn new(config: &HubConfig) -> (Self, HubHandle) {
        let (sender, events) = mpsc::channel(config.event_capacity.max(1));
        let metrics = Arc::new(HubMetrics::new());
        let hub = Self {
            directory: ConversationDirectory::new(),
            events,
            policy: config.backpressure,
            idle_ttl: config.idle_conversation_ttl(),
            sweep_interval: config
                .sweep_interval()
                .clamp(Duration::from_millis(1), MAX_SWEEP_INTERVAL),
            metrics: Arc::clone(&metrics),
        };
        (
            hub,
            HubHandle {
                events: sender,
                metrics,
            },
        )
    }

    /// 在当前 tokio 运行时上启动事件循环
    pub fn spawn(config: &HubConfig) -> (HubHandle, JoinHandle<()>) {
        let (hub, handle) = Self::new(config);
        let task = tokio::spawn(hub.run());
        (handle, task)
    }

    pub async fn run(mut self) {
        info!(policy = ?self.policy, "hub event loop started");
        let mut sweep = time::interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(HubEvent::Shutdown) => {
                        info!("hub received shutdown");
                        break;
                    }
                    Some(event) => self.handle(event),
                    None => {
                        info!("all hub handles dropped");
                        break;
                    }
                },
                _ = sweep.tick() => self.sweep(Instant::now()),
            }
        }

        let closed = self.directory.clear();
        self.record_residency();
        info!(closed_sessions = closed, "hub event loop stopped");
    }

    fn handle(&mut self, event: HubEvent) {
        match event {
            HubEvent::Track {
                conversation_id,
                reply,
            } => {
                let created = self.directory.track(conversation_id, Instant::now());
                if created {
                    self.metrics.conversation_tracked();
                    debug!(conversation_id = %conversation_id, "conversation tracked");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(created);
                }
            }
            HubEvent::Register { session, reply } => self.register(session, reply),
            HubEvent::Unregister {
                conversation_id,
                session_id,
            } => self.unregister(conversation_id, session_id),
            HubEvent::Broadcast(message) => self.dispatch(message),
            HubEvent::Members {
                conversation_id,
                reply,
            } => {
                let members = self
                    .directory
                    .members(&conversation_id)
                    .map(|members| members.map(SessionHandle::summary).collect())
                    .unwrap_or_default();
                let _ = reply.send(members);
            }
            // 由 run 处理
            HubEvent::Shutdown => {}
        }
        self.record_residency();
    }

    fn register(&mut self, session: SessionHandle, reply: Option<oneshot::Sender<RegisterOutcome>>) {
        let conversation_id = session.conversation_id;
        let session_id = session.session_id;
        let username = session.username.clone();

        let outcome = match self.directory.insert(session) {
            InsertOutcome::Inserted => {
                self.metrics.session_registered();
                info!(
                    conversation_id = %conversation_id,
                    session_id = %session_id,
                    username = %username,
                    "session registered"
                );
                RegisterOutcome::Registered
            }
            InsertOutcome::AlreadyPresent => {
                debug!(session_id = %session_id, "duplicate register ignored");
                RegisterOutcome::AlreadyRegistered
            }
            InsertOutcome::UnknownConversation => {
                self.metrics.registration_rejected();
                warn!(
                    conversation_id = %conversation_id,
                    session_id = %session_id,
                    "register for unknown conversation dropped"
                );
                RegisterOutcome::UnknownConversation
            }
        };

        if outcome == RegisterOutcome::Registered {
            self.dispatch(BroadcastMessage::joined(conversation_id, &username));
        }
        if let Some(reply) = reply {
            let _ = reply.send(outcome);
        }
    }

    fn unregister(&mut self, conversation_id: ConversationId, session_id: SessionId) {
        let Some(removed) = self
            .directory
            .remove(&conversation_id, &session_id, Instant::now())
        else {
            debug!(session_id = %session_id, "unregister of absent session ignored");
            return;
        };

        self.metrics.session_unregistered();
        info!(
            conversation_id = %conversation_id,
            session_id = %session_id,
            remaining = removed.remaining,
            "session unregistered"
        );

        let username = removed.session.username.clone();
        let remaining = removed.remaining;
        // 丢弃句柄即关闭出站队列
        drop(removed);
        if remaining > 0 {
            self.dispatch(BroadcastMessage::left(conversation_id, &username));
        }
    }

    /// 将消息分发给会话当前的全部成员
    ///
    /// 驱逐产生的离开通知追加到同一工作队列，按产生顺序继续分发。
    fn dispatch(&mut self, message: BroadcastMessage) {
        let mut pending = VecDeque::from([message]);

        while let Some(message) = pending.pop_front() {
            let conversation_id = message.conversation_id();
            let Some(members) = self.directory.members(&conversation_id) else {
                self.metrics.broadcast_unknown_conversation();
                warn!(conversation_id = %conversation_id, "broadcast for unknown conversation dropped");
                continue;
            };

            let message = Arc::new(message);
            let mut delivered = 0u64;
            let mut congested = Vec::new();
            for session in members {
                match session.try_deliver(Arc::clone(&message)) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => congested.push(session.session_id),
                    // 出站泵已退出，会话会自行注销
                    Err(TrySendError::Closed(_)) => {
                        debug!(session_id = %session.session_id, "outbound queue already closed")
                    }
                }
            }
            self.metrics.broadcast_processed();
            self.metrics.delivered(delivered);

            for session_id in congested {
                self.metrics.delivery_dropped();
                match self.policy {
                    BackpressurePolicy::Drop => {
                        warn!(
                            conversation_id = %conversation_id,
                            session_id = %session_id,
                            "outbound queue full, message dropped for recipient"
                        );
                    }
                    BackpressurePolicy::Evict => {
                        let Some(removed) =
                            self.directory
                                .remove(&conversation_id, &session_id, Instant::now())
                        else {
                            continue;
                        };
                        self.metrics.session_evicted();
                        warn!(
                            conversation_id = %conversation_id,
                            session_id = %session_id,
                            "outbound queue full, session evicted"
                        );
                        if removed.remaining > 0 {
                            pending.push_back(BroadcastMessage::left(
                                conversation_id,
                                &removed.session.username,
                            ));
                        }
                    }
                }
            }
        }
    }

    fn sweep(&mut self, now: Instant) {
        let evicted = self.directory.evict_idle(now, self.idle_ttl);
        if !evicted.is_empty() {
            self.metrics.conversations_evicted(evicted.len() as u64);
            info!(count = evicted.len(), "idle conversations evicted from directory");
        }
        self.record_residency();
    }

    fn record_residency(&self) {
        self.metrics
            .set_residency(self.directory.len(), self.directory.session_count());
    }
}
