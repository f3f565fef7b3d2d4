//! 客户端会话
//!
//! 一个会话桥接一条物理连接和 Hub：
//! - 入站泵读取帧，先持久化，成功后把广播交给 Hub；
//! - 出站泵消费私有的有界队列并写回连接，队列被 Hub 关闭时结束。
//!
//! 连接以 `Stream`/`Sink` 的形式传入，与具体传输协议无关。

use std::{sync::Arc, time::Duration};

use domain::{ConversationId, DisplayName, SessionId, UserId};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::time;
use tracing::{debug, info, warn};

use crate::{
    broadcast::BroadcastMessage,
    directory::{OutboundReceiver, SessionHandle},
    error::{ApplicationError, TransportError},
    hub::{HubHandle, RegisterOutcome},
    metrics::HubMetrics,
    services::MessageService,
};

/// 会话生命周期：`Connecting → Active → Closing → Closed`，只能前进
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Active) | (Connecting, Closing) | (Active, Closing) | (Closing, Closed)
        )
    }
}

/// 传输层解出的入站帧
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// 会话运行所需的共享依赖
#[derive(Clone)]
pub struct SessionContext {
    pub hub: HubHandle,
    pub messages: Arc<MessageService>,
    pub outbound_capacity: usize,
    /// 入站结束后等待出站队列排空的上限
    pub close_linger: Duration,
}

#[derive(Debug)]
enum InboundEnd {
    PeerClosed,
    Transport(TransportError),
    HubUnavailable,
}

#[derive(Debug)]
enum PumpExit {
    Inbound(InboundEnd),
    Outbound(Result<(), TransportError>),
}

#[derive(Debug, Clone)]
struct Identity {
    id: SessionId,
    conversation_id: ConversationId,
    user_id: UserId,
    username: DisplayName,
}

#[derive(Debug)]
pub struct ClientSession {
    identity: Identity,
    state: SessionState,
}

impl ClientSession {
    /// 每次接入生成新的会话标识
    pub fn new(conversation_id: ConversationId, user_id: UserId, username: DisplayName) -> Self {
        Self {
            identity: Identity {
                id: SessionId::generate(),
                conversation_id,
                user_id,
                username,
            },
            state: SessionState::Connecting,
        }
    }

    pub fn id(&self) -> SessionId {
        self.identity.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if self.state.can_transition_to(next) {
            debug!(session_id = %self.identity.id, from = ?self.state, to = ?next, "session state changed");
            self.state = next;
        }
    }

    /// 注册到 Hub 并运行两个泵，直到会话关闭
    pub async fn run<S, K>(mut self, ctx: &SessionContext, incoming: S, mut outgoing: K) -> SessionState
    where
        S: Stream<Item = Result<InboundFrame, TransportError>> + Unpin,
        K: Sink<String, Error = TransportError> + Unpin,
    {
        let (handle, queue) = SessionHandle::new(
            self.identity.id,
            self.identity.conversation_id,
            self.identity.user_id,
            self.identity.username.clone(),
            ctx.outbound_capacity,
        );

        match ctx.hub.register(handle).await {
            Ok(RegisterOutcome::Registered) => self.transition(SessionState::Active),
            Ok(outcome) => {
                warn!(
                    session_id = %self.identity.id,
                    conversation_id = %self.identity.conversation_id,
                    ?outcome,
                    "session registration refused"
                );
                return self.close_without_pumps(&mut outgoing).await;
            }
            Err(err) => {
                warn!(session_id = %self.identity.id, error = %err, "session registration failed");
                return self.close_without_pumps(&mut outgoing).await;
            }
        }

        info!(
            session_id = %self.identity.id,
            conversation_id = %self.identity.conversation_id,
            user_id = %self.identity.user_id,
            "session active"
        );

        let metrics = ctx.hub.metrics();
        let identity = self.identity.clone();
        let inbound = inbound_pump(ctx, &metrics, &identity, incoming);
        let outbound = outbound_pump(queue, outgoing);
        tokio::pin!(inbound, outbound);

        let exit = tokio::select! {
            end = &mut inbound => PumpExit::Inbound(end),
            result = &mut outbound => PumpExit::Outbound(result),
        };
        self.transition(SessionState::Closing);

        match exit {
            PumpExit::Inbound(end) => {
                debug!(session_id = %self.identity.id, reason = ?end, "inbound pump finished");
                self.unregister(ctx).await;
                // 注销后 Hub 关闭队列，出站泵写完剩余消息后自行结束
                match time::timeout(ctx.close_linger, &mut outbound).await {
                    Ok(Err(err)) => debug!(session_id = %self.identity.id, error = %err, "outbound pump failed"),
                    Ok(Ok(())) => {}
                    Err(_) => debug!(session_id = %self.identity.id, "outbound drain timed out"),
                }
            }
            PumpExit::Outbound(result) => {
                if let Err(err) = result {
                    debug!(session_id = %self.identity.id, error = %err, "outbound pump failed");
                }
                // 队列可能已被 Hub 关闭（驱逐或停机），重复注销是空操作
                self.unregister(ctx).await;
            }
        }

        self.transition(SessionState::Closed);
        info!(session_id = %self.identity.id, conversation_id = %self.identity.conversation_id, "session closed");
        self.state
    }

    async fn unregister(&self, ctx: &SessionContext) {
        if let Err(err) = ctx.hub.unregister(self.identity.conversation_id, self.identity.id).await {
            debug!(session_id = %self.identity.id, error = %err, "unregister skipped");
        }
    }

    async fn close_without_pumps<K>(&mut self, outgoing: &mut K) -> SessionState
    where
        K: Sink<String, Error = TransportError> + Unpin,
    {
        self.transition(SessionState::Closing);
        if let Err(err) = outgoing.close().await {
            debug!(session_id = %self.identity.id, error = %err, "close after refused registration failed");
        }
        self.transition(SessionState::Closed);
        self.state
    }
}

async fn inbound_pump<S>(
    ctx: &SessionContext,
    metrics: &HubMetrics,
    session: &Identity,
    mut incoming: S,
) -> InboundEnd
where
    S: Stream<Item = Result<InboundFrame, TransportError>> + Unpin,
{
    while let Some(frame) = incoming.next().await {
        let content = match frame {
            Ok(InboundFrame::Text(text)) => text,
            Ok(InboundFrame::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    metrics.frame_rejected();
                    debug!(session_id = %session.id, "binary frame is not valid UTF-8, dropped");
                    continue;
                }
            },
            Ok(InboundFrame::Close) => return InboundEnd::PeerClosed,
            Err(err) => return InboundEnd::Transport(err),
        };

        let stored = match ctx
            .messages
            .record(session.conversation_id, session.user_id, content)
            .await
        {
            Ok(stored) => stored,
            Err(ApplicationError::Domain(err)) => {
                metrics.frame_rejected();
                debug!(session_id = %session.id, error = %err, "inbound frame rejected");
                continue;
            }
            Err(err) => {
                metrics.persistence_failed();
                warn!(
                    session_id = %session.id,
                    conversation_id = %session.conversation_id,
                    error = %err,
                    "message persistence failed, frame dropped"
                );
                continue;
            }
        };

        let message = BroadcastMessage::from_stored(&stored, &session.username);
        if ctx.hub.broadcast(message).await.is_err() {
            return InboundEnd::HubUnavailable;
        }
    }
    InboundEnd::PeerClosed
}

async fn outbound_pump<K>(mut queue: OutboundReceiver, mut outgoing: K) -> Result<(), TransportError>
where
    K: Sink<String, Error = TransportError> + Unpin,
{
    while let Some(message) = queue.recv().await {
        let payload = match message.to_json() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(error = %err, "failed to serialize outbound message");
                continue;
            }
        };
        outgoing.send(payload).await?;
    }
    outgoing.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broadcast::{JOINED_NOTICE, LEFT_NOTICE},
        clock::SystemClock,
        hub::Hub,
        memory::InMemoryMessageStore,
        repository::{MessageStore, MockMessageStore},
        services::MessageServiceDependencies,
    };
    use config::HubConfig;
    use domain::RepositoryError;
    use futures::channel::mpsc as chan;
    use serde_json::{json, Value};
    use tokio::task::JoinHandle;

    type Incoming = chan::UnboundedSender<Result<InboundFrame, TransportError>>;
    type Outgoing = chan::UnboundedReceiver<String>;

    fn context(hub: HubHandle, store: Arc<dyn MessageStore>) -> SessionContext {
        SessionContext {
            hub,
            messages: Arc::new(MessageService::new(MessageServiceDependencies {
                message_store: store,
                clock: Arc::new(SystemClock),
            })),
            outbound_capacity: 10,
            close_linger: Duration::from_secs(1),
        }
    }

    fn attach(
        ctx: &SessionContext,
        conversation_id: ConversationId,
        user_id: UserId,
        name: &str,
    ) -> (Incoming, Outgoing, JoinHandle<SessionState>) {
        let (in_tx, in_rx) = chan::unbounded();
        let (out_tx, out_rx) = chan::unbounded::<String>();
        let session =
            ClientSession::new(conversation_id, user_id, DisplayName::parse(name).unwrap());
        let ctx = ctx.clone();
        let task = tokio::spawn(async move {
            session
                .run(&ctx, in_rx, out_tx.sink_map_err(|_| TransportError::Closed))
                .await
        });
        (in_tx, out_rx, task)
    }

    async fn next_json(outgoing: &mut Outgoing) -> Value {
        let frame = outgoing.next().await.expect("outbound frame");
        serde_json::from_str(&frame).unwrap()
    }

    fn send_text(incoming: &Incoming, text: &str) {
        incoming
            .unbounded_send(Ok(InboundFrame::Text(text.to_owned())))
            .unwrap();
    }

    #[test]
    fn state_machine_only_moves_forward() {
        use SessionState::*;
        assert!(Connecting.can_transition_to(Active));
        assert!(Active.can_transition_to(Closing));
        assert!(Closing.can_transition_to(Closed));
        assert!(!Closing.can_transition_to(Active));
        assert!(!Closed.can_transition_to(Active));
        assert!(!Active.can_transition_to(Connecting));
    }

    #[tokio::test]
    async fn message_is_persisted_then_fanned_out() {
        let (hub, _hub_task) = Hub::spawn(&HubConfig::default());
        let store = Arc::new(InMemoryMessageStore::new());
        let ctx = context(hub.clone(), store.clone());
        let c1 = ConversationId::generate();
        hub.track(c1).await.unwrap();

        let user_a = UserId::generate();
        let (in_a, mut out_a, task_a) = attach(&ctx, c1, user_a, "A");
        assert_eq!(next_json(&mut out_a).await["content"], JOINED_NOTICE);

        let (in_b, mut out_b, task_b) = attach(&ctx, c1, UserId::generate(), "B");
        assert_eq!(next_json(&mut out_b).await["content"], JOINED_NOTICE);
        assert_eq!(next_json(&mut out_a).await["username"], "B");

        send_text(&in_a, "hi");
        let expected = json!({"content": "hi", "conversationId": c1.to_string(), "username": "A"});
        assert_eq!(next_json(&mut out_a).await, expected);
        assert_eq!(next_json(&mut out_b).await, expected);

        let stored = store.messages().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].conversation_id, c1);
        assert_eq!(stored[0].sender_id, user_a);
        assert_eq!(stored[0].content.as_str(), "hi");

        // A 断开：B 收到离开通知，A 的连接被关闭
        drop(in_a);
        assert_eq!(task_a.await.unwrap(), SessionState::Closed);
        assert!(out_a.next().await.is_none());
        let left = next_json(&mut out_b).await;
        assert_eq!(left["content"], LEFT_NOTICE);
        assert_eq!(left["username"], "A");

        in_b.unbounded_send(Ok(InboundFrame::Close)).unwrap();
        assert_eq!(task_b.await.unwrap(), SessionState::Closed);
        assert!(hub.members(c1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_persistence_is_never_broadcast() {
        let (hub, _hub_task) = Hub::spawn(&HubConfig::default());
        let mut store = MockMessageStore::new();
        store
            .expect_append()
            .times(1)
            .returning(|_| Err(RepositoryError::storage("disk full")));
        let ctx = context(hub.clone(), Arc::new(store));
        let c1 = ConversationId::generate();
        hub.track(c1).await.unwrap();

        let (incoming, mut outgoing, task) = attach(&ctx, c1, UserId::generate(), "A");
        assert_eq!(next_json(&mut outgoing).await["content"], JOINED_NOTICE);

        send_text(&incoming, "hi");
        incoming.unbounded_send(Ok(InboundFrame::Close)).unwrap();
        assert_eq!(task.await.unwrap(), SessionState::Closed);

        assert!(outgoing.next().await.is_none());
        assert_eq!(hub.metrics().snapshot().persistence_failures, 1);
        assert_eq!(hub.metrics().snapshot().broadcasts, 1);
    }

    #[tokio::test]
    async fn invalid_frames_are_dropped_before_persistence() {
        let (hub, _hub_task) = Hub::spawn(&HubConfig::default());
        let store = Arc::new(InMemoryMessageStore::new());
        let ctx = context(hub.clone(), store.clone());
        let c1 = ConversationId::generate();
        hub.track(c1).await.unwrap();

        let (incoming, mut outgoing, task) = attach(&ctx, c1, UserId::generate(), "A");
        next_json(&mut outgoing).await;

        send_text(&incoming, "   ");
        incoming
            .unbounded_send(Ok(InboundFrame::Binary(vec![0xff, 0xfe])))
            .unwrap();
        incoming
            .unbounded_send(Ok(InboundFrame::Binary(b"bytes".to_vec())))
            .unwrap();
        assert_eq!(next_json(&mut outgoing).await["content"], "bytes");

        incoming
            .unbounded_send(Err(TransportError::io("connection reset")))
            .unwrap();
        assert_eq!(task.await.unwrap(), SessionState::Closed);

        assert_eq!(store.messages().await.len(), 1);
        assert_eq!(hub.metrics().snapshot().frames_rejected, 2);
    }

    #[tokio::test]
    async fn refused_registration_closes_the_connection() {
        let (hub, _hub_task) = Hub::spawn(&HubConfig::default());
        let ctx = context(hub.clone(), Arc::new(InMemoryMessageStore::new()));

        let (_incoming, mut outgoing, task) =
            attach(&ctx, ConversationId::generate(), UserId::generate(), "A");

        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert!(outgoing.next().await.is_none());
        assert_eq!(hub.metrics().snapshot().registrations_rejected, 1);
    }

    #[tokio::test]
    async fn hub_shutdown_ends_the_session() {
        let (hub, hub_task) = Hub::spawn(&HubConfig::default());
        let ctx = context(hub.clone(), Arc::new(InMemoryMessageStore::new()));
        let c1 = ConversationId::generate();
        hub.track(c1).await.unwrap();

        let (_incoming, mut outgoing, task) = attach(&ctx, c1, UserId::generate(), "A");
        next_json(&mut outgoing).await;

        hub.shutdown().await.unwrap();
        hub_task.await.unwrap();

        assert_eq!(task.await.unwrap(), SessionState::Closed);
        assert!(outgoing.next().await.is_none());
    }
}
