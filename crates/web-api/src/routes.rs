use std::str::FromStr;

use application::{AttachRequest, ClientSession, CreateConversationRequest, HubStats, MemberSummary};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use domain::{ConversationId, ConversationType, DisplayName, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::{error::ApiError, state::AppState, ws_connection};

#[derive(Debug, Deserialize)]
struct CreateConversationPayload {
    #[serde(rename = "type")]
    kind: ConversationType,
    creator_id: Uuid,
    #[serde(default)]
    participants: Vec<Uuid>,
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateConversationResponse {
    id: ConversationId,
}

#[derive(Debug, Deserialize)]
struct JoinQuery {
    #[serde(rename = "userId")]
    user_id: String,
    username: String,
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .nest("/ws", ws_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn ws_routes() -> Router<AppState> {
    Router::new()
        .route("/conversations", post(create_conversation))
        .route(
            "/conversations/{conversation_id}/join",
            get(join_conversation),
        )
        .route(
            "/conversations/{conversation_id}/clients",
            get(list_clients),
        )
        .route("/stats", get(stats))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "healthy" }))
}

async fn create_conversation(
    State(state): State<AppState>,
    Json(payload): Json<CreateConversationPayload>,
) -> Result<Json<CreateConversationResponse>, ApiError> {
    let request = CreateConversationRequest {
        kind: payload.kind,
        creator_id: UserId::from(payload.creator_id),
        participants: payload.participants.into_iter().map(UserId::from).collect(),
        name: payload.name,
    };

    let conversation = state.conversations.create_conversation(request).await?;
    Ok(Json(CreateConversationResponse {
        id: conversation.id,
    }))
}

/// 接入会话：先完成全部校验，通过后才升级协议
async fn join_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<JoinQuery>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let conversation_id = ConversationId::from_str(&conversation_id)?;
    let user_id = UserId::from_str(&query.user_id)?;
    let username = DisplayName::parse(query.username)?;

    if state.auth.require_token {
        let token = query
            .token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ApiError::unauthorized("Missing token"))?;
        let claims = state.jwt_service.verify_token(token)?;
        if UserId::from(claims.sub) != user_id {
            tracing::warn!(user_id = %user_id, "WebSocket upgrade failed: token subject mismatch");
            return Err(application::ApplicationError::Authentication.into());
        }
    }

    state
        .conversations
        .authorize_attach(AttachRequest {
            conversation_id,
            user_id,
        })
        .await?;

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    let ctx = state.session.clone();
    let session = ClientSession::new(conversation_id, user_id, username);
    Ok(upgrade.on_upgrade(move |socket| ws_connection::run_session(socket, ctx, session)))
}

async fn list_clients(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<MemberSummary>>, ApiError> {
    let conversation_id = ConversationId::from_str(&conversation_id)?;
    let clients = state.conversations.connected_clients(conversation_id).await?;
    Ok(Json(clients))
}

async fn stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.metrics().snapshot())
}
