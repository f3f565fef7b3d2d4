mod support;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use config::{AuthConfig, HubConfig};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use support::{build_app, TestApp};

fn app() -> TestApp {
    build_app(HubConfig::default(), AuthConfig::default())
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(
        router,
        Request::builder().uri(uri).body(Body::empty()).expect("request"),
    )
    .await
}

async fn post_json(router: &Router, uri: &str, payload: Value) -> (StatusCode, Value) {
    send(
        router,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .expect("request"),
    )
    .await
}

async fn create_group(router: &Router, creator: Uuid, participants: &[Uuid]) -> String {
    let (status, body) = post_json(
        router,
        "/ws/conversations",
        json!({"type": "group", "creator_id": creator, "participants": participants}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_str().expect("id").to_string()
}

fn join_uri(conversation_id: &str, user_id: &str, username: &str, token: Option<&str>) -> String {
    let mut uri = format!(
        "/ws/conversations/{conversation_id}/join?userId={user_id}&username={username}"
    );
    if let Some(token) = token {
        uri.push_str("&token=");
        uri.push_str(token);
    }
    uri
}

#[tokio::test]
async fn health_check_reports_healthy() {
    let app = app();
    let (status, body) = get(&app.router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "healthy"}));
}

#[tokio::test]
async fn created_conversation_starts_with_no_clients() {
    let app = app();
    let creator = Uuid::new_v4();
    let id = create_group(&app.router, creator, &[Uuid::new_v4()]).await;
    assert!(Uuid::parse_str(&id).is_ok());

    let (status, body) = get(&app.router, &format!("/ws/conversations/{id}/clients")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn private_conversation_with_two_others_is_rejected() {
    let app = app();
    let (status, body) = post_json(
        &app.router,
        "/ws/conversations",
        json!({
            "type": "private",
            "creator_id": Uuid::new_v4(),
            "participants": [Uuid::new_v4(), Uuid::new_v4()],
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");
}

#[tokio::test]
async fn unknown_conversation_type_is_a_client_error() {
    let app = app();
    let (status, _) = post_json(
        &app.router,
        "/ws/conversations",
        json!({"type": "channel", "creator_id": Uuid::new_v4()}),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn clients_of_unknown_conversation_is_empty() {
    let app = app();
    let (status, body) = get(
        &app.router,
        &format!("/ws/conversations/{}/clients", Uuid::new_v4()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, _) = get(&app.router, "/ws/conversations/not-a-uuid/clients").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn stats_expose_hub_counters() {
    let app = app();
    create_group(&app.router, Uuid::new_v4(), &[]).await;

    let (status, body) = get(&app.router, "/ws/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conversations_tracked"], 1);
    assert_eq!(body["sessions_registered"], 0);
    assert_eq!(body["deliveries_dropped"], 0);
}

#[tokio::test]
async fn join_rejects_malformed_identifiers() {
    let app = app();
    let user = Uuid::new_v4();
    let id = create_group(&app.router, user, &[]).await;
    let token = app.jwt.generate_token(user).expect("token");

    let (status, body) = get(
        &app.router,
        &join_uri("not-a-uuid", &user.to_string(), "A", Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_ARGUMENT");

    let (status, _) = get(&app.router, &join_uri(&id, "someone", "A", Some(&token))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(
        &app.router,
        &join_uri(&id, &user.to_string(), "%20%20", Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn join_requires_a_token_for_the_same_user() {
    let app = app();
    let user = Uuid::new_v4();
    let id = create_group(&app.router, user, &[]).await;

    let (status, body) = get(&app.router, &join_uri(&id, &user.to_string(), "A", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let other_token = app.jwt.generate_token(Uuid::new_v4()).expect("token");
    let (status, _) = get(
        &app.router,
        &join_uri(&id, &user.to_string(), "A", Some(&other_token)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = get(
        &app.router,
        &join_uri(&id, &user.to_string(), "A", Some("garbage")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn join_checks_conversation_and_membership() {
    let app = app();
    let member = Uuid::new_v4();
    let outsider = Uuid::new_v4();
    let id = create_group(&app.router, member, &[]).await;

    let token = app.jwt.generate_token(outsider).expect("token");
    let (status, body) = get(
        &app.router,
        &join_uri(&id, &outsider.to_string(), "O", Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_PARTICIPANT");

    let token = app.jwt.generate_token(member).expect("token");
    let (status, body) = get(
        &app.router,
        &join_uri(
            &Uuid::new_v4().to_string(),
            &member.to_string(),
            "M",
            Some(&token),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "CONVERSATION_NOT_FOUND");

    // 凭证有效但不是 WebSocket 握手
    let (status, _) = get(
        &app.router,
        &join_uri(&id, &member.to_string(), "M", Some(&token)),
    )
    .await;
    assert!(status.is_client_error());
    assert_eq!(app.hub.metrics().snapshot().sessions_registered, 0);
}

#[tokio::test]
async fn disabled_checks_let_anyone_reach_the_handshake() {
    let app = build_app(
        HubConfig::default(),
        AuthConfig {
            require_token: false,
            require_participant: false,
        },
    );
    let id = create_group(&app.router, Uuid::new_v4(), &[]).await;

    // 校验全部通过，只剩握手本身被拒绝
    let (status, _) = get(
        &app.router,
        &join_uri(&id, &Uuid::new_v4().to_string(), "guest", None),
    )
    .await;
    assert!(status.is_client_error());
    assert_ne!(status, StatusCode::UNAUTHORIZED);
    assert_ne!(status, StatusCode::FORBIDDEN);
}
