//! 主应用程序入口
//!
//! 加载配置，启动 Hub 事件循环和 Axum Web API 服务。

use std::{sync::Arc, time::Duration};

use application::{
    repository::{ConversationRepository, MessageStore, ParticipantRepository},
    ConversationService, ConversationServiceDependencies, Hub, InMemoryConversationStore,
    InMemoryMessageStore, MessageService, MessageServiceDependencies, SessionContext, SystemClock,
};
use config::{AppConfig, DatabaseConfig};
use infrastructure::Infrastructure;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

struct Stores {
    conversations: Arc<dyn ConversationRepository>,
    participants: Arc<dyn ParticipantRepository>,
    messages: Arc<dyn MessageStore>,
}

async fn open_stores(config: &DatabaseConfig) -> anyhow::Result<Stores> {
    if config.is_in_memory() {
        tracing::warn!("使用进程内存储，重启后数据丢失");
        let store = Arc::new(InMemoryConversationStore::new());
        return Ok(Stores {
            conversations: store.clone(),
            participants: store,
            messages: Arc::new(InMemoryMessageStore::new()),
        });
    }

    tracing::info!(
        "连接数据库: {}",
        config.url.rsplit('@').next().unwrap_or("unknown")
    );
    let infrastructure = Infrastructure::connect(config).await?;
    Ok(Stores {
        conversations: infrastructure.conversation_repository(),
        participants: infrastructure.participant_repository(),
        messages: infrastructure.message_store(),
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    let stores = open_stores(&config.database).await?;
    let clock = Arc::new(SystemClock);

    let (hub, hub_task) = Hub::spawn(&config.hub);

    let conversations = Arc::new(ConversationService::new(ConversationServiceDependencies {
        conversations: stores.conversations,
        participants: stores.participants,
        hub: hub.clone(),
        clock: clock.clone(),
        require_participant: config.auth.require_participant,
    }));
    if config.hub.hydrate_on_startup {
        conversations.hydrate_directory().await?;
    }

    let session = SessionContext {
        hub: hub.clone(),
        messages: Arc::new(MessageService::new(MessageServiceDependencies {
            message_store: stores.messages,
            clock,
        })),
        outbound_capacity: config.hub.outbound_capacity,
        close_linger: config.session.close_linger(),
    };
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let state = AppState::new(conversations, session, jwt_service, config.auth.clone());

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("聊天转发服务启动在 http://{}", address);

    // 收到信号后停止接收新连接并关闭 Hub，所有会话随队列关闭而结束；
    // 超过宽限期不再等待在途连接
    let (signal_tx, mut signal_rx) = watch::channel(false);
    let stopping_hub = hub.clone();
    let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!("收到停机信号，开始优雅停机");
        let _ = signal_tx.send(true);
        if stopping_hub.shutdown().await.is_err() {
            tracing::debug!("hub already stopped");
        }
    });

    let grace: Duration = config.server.shutdown_grace();
    tokio::select! {
        result = server => result?,
        _ = async {
            let _ = signal_rx.wait_for(|stopping| *stopping).await;
            tokio::time::sleep(grace).await;
        } => {
            tracing::warn!(grace_secs = grace.as_secs(), "shutdown grace period elapsed");
        }
    }

    // 服务异常退出时信号分支不会执行，这里再关闭一次
    if hub.shutdown().await.is_err() {
        tracing::debug!("hub already stopped");
    }
    drop(hub);
    hub_task.await?;
    tracing::info!("服务已停止");

    Ok(())
}
