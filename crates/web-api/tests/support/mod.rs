#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{
    ConversationService, ConversationServiceDependencies, Hub, HubHandle,
    InMemoryConversationStore, InMemoryMessageStore, MessageService, MessageServiceDependencies,
    SessionContext, SystemClock,
};
use axum::Router;
use config::{AuthConfig, HubConfig};
use serde_json::{json, Value};
use tokio::{net::TcpListener, sync::oneshot};
use uuid::Uuid;
use web_api::{router, AppState, JwtConfig, JwtService};

pub struct TestApp {
    pub router: Router,
    pub hub: HubHandle,
    pub jwt: Arc<JwtService>,
    pub messages: Arc<InMemoryMessageStore>,
}

pub fn build_app(hub_config: HubConfig, auth: AuthConfig) -> TestApp {
    let (hub, _task) = Hub::spawn(&hub_config);
    let store = Arc::new(InMemoryConversationStore::new());
    let messages = Arc::new(InMemoryMessageStore::new());

    let conversations = Arc::new(ConversationService::new(ConversationServiceDependencies {
        conversations: store.clone(),
        participants: store,
        hub: hub.clone(),
        clock: Arc::new(SystemClock),
        require_participant: auth.require_participant,
    }));
    let session = SessionContext {
        hub: hub.clone(),
        messages: Arc::new(MessageService::new(MessageServiceDependencies {
            message_store: messages.clone(),
            clock: Arc::new(SystemClock),
        })),
        outbound_capacity: hub_config.outbound_capacity,
        close_linger: Duration::from_millis(500),
    };
    let jwt = Arc::new(JwtService::new(JwtConfig {
        secret: "integration-test-secret-key-0123456789".to_string(),
        expiration_hours: 1,
    }));

    let state = AppState::new(conversations, session, jwt.clone(), auth);
    TestApp {
        router: router(state),
        hub,
        jwt,
        messages,
    }
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub hub: HubHandle,
    pub jwt: Arc<JwtService>,
    pub messages: Arc<InMemoryMessageStore>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(HubConfig::default(), AuthConfig::default()).await
    }

    pub async fn start_with(hub_config: HubConfig, auth: AuthConfig) -> Self {
        let app = build_app(hub_config, auth);
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let router = app.router;
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service())
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Self {
            addr,
            hub: app.hub,
            jwt: app.jwt,
            messages: app.messages,
            shutdown: Some(shutdown_tx),
        }
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn join_url(&self, conversation_id: &str, user_id: Uuid, username: &str) -> String {
        let token = self.jwt.generate_token(user_id).expect("token");
        format!(
            "ws://{}/ws/conversations/{}/join?userId={}&username={}&token={}",
            self.addr, conversation_id, user_id, username, token
        )
    }

    /// 创建群聊，返回会话标识
    pub async fn create_group(&self, creator: Uuid, participants: &[Uuid]) -> String {
        let response: Value = reqwest::Client::new()
            .post(self.http("/ws/conversations"))
            .json(&json!({
                "type": "group",
                "creator_id": creator,
                "participants": participants,
            }))
            .send()
            .await
            .expect("create conversation")
            .json()
            .await
            .expect("conversation json");
        response["id"].as_str().expect("id").to_string()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}
