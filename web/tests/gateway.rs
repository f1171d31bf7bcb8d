//! Notification gateway handshake and session lifecycle, against a real
//! listener with a `tokio-tungstenite` client.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::body::Body;
use axum::http::{Request, StatusCode};
use courier_core::order::UserId;
use courier_testing::StaticTokenValidator;
use courier_web::{ConnectionRegistry, GatewayState, gateway_router};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Gateway {
    addr: SocketAddr,
    registry: ConnectionRegistry,
    validator: Arc<StaticTokenValidator>,
    shutdown: broadcast::Sender<()>,
}

async fn start(configure: impl FnOnce(GatewayState) -> GatewayState) -> Gateway {
    courier_testing::helpers::init_tracing();

    let registry = ConnectionRegistry::new();
    let validator = Arc::new(StaticTokenValidator::new());
    let (shutdown, _) = broadcast::channel(1);
    let state = configure(
        GatewayState::new(registry.clone(), validator.clone(), shutdown.clone())
            .with_ping_interval(Duration::from_secs(3600)),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, gateway_router(state)).await.unwrap();
    });

    Gateway {
        addr,
        registry,
        validator,
        shutdown,
    }
}

async fn connect(
    addr: SocketAddr,
    headers: &[(&'static str, &str)],
) -> Result<Client, tungstenite::Error> {
    let mut request = format!("ws://{addr}/ws").into_client_request().unwrap();
    for (name, value) in headers {
        request.headers_mut().insert(*name, value.parse().unwrap());
    }
    tokio_tungstenite::connect_async(request)
        .await
        .map(|(stream, _)| stream)
}

async fn connect_as(addr: SocketAddr, token: &str) -> Client {
    let bearer = format!("Bearer {token}");
    connect(addr, &[("authorization", bearer.as_str())])
        .await
        .expect("handshake should succeed")
}

fn rejected_status(result: Result<Client, tungstenite::Error>) -> (StatusCode, String) {
    match result {
        Err(tungstenite::Error::Http(response)) => {
            let body = response
                .body()
                .as_ref()
                .map(|b| String::from_utf8_lossy(b).to_string())
                .unwrap_or_default();
            (StatusCode::from_u16(response.status().as_u16()).unwrap(), body)
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake unexpectedly succeeded"),
    }
}

async fn wait_for_connections(registry: &ConnectionRegistry, expected: usize) {
    for _ in 0..200 {
        if registry.connection_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {expected} connections, have {}",
        registry.connection_count()
    );
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("frame should arrive")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = frame {
            return text.to_string();
        }
    }
}

#[tokio::test]
async fn missing_authorization_is_bad_request() {
    let gw = start(|s| s).await;

    let (status, _) = rejected_status(connect(gw.addr, &[]).await);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(gw.validator.calls(), 0);
}

#[tokio::test]
async fn empty_bearer_is_bad_request() {
    let gw = start(|s| s).await;

    let (status, _) =
        rejected_status(connect(gw.addr, &[("authorization", "Bearer ")]).await);
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(gw.validator.calls(), 0);
}

#[tokio::test]
async fn invalid_token_is_unauthorized_with_reason() {
    let gw = start(|s| s).await;

    let (status, body) =
        rejected_status(connect(gw.addr, &[("authorization", "Bearer nope")]).await);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("invalid token"), "body: {body}");
    assert_eq!(gw.registry.connection_count(), 0);
}

#[tokio::test]
async fn unreachable_auth_service_is_unauthorized() {
    let gw = start(|s| s).await;
    gw.validator.insert("good", UserId::random(), "client");
    gw.validator.set_unreachable(Some("connection refused"));

    let (status, body) =
        rejected_status(connect(gw.addr, &[("authorization", "Bearer good")]).await);
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body.contains("connection refused"), "body: {body}");
}

#[tokio::test]
async fn disallowed_origin_is_forbidden() {
    let gw = start(|s| s.with_allowed_origins(vec!["https://app.example".to_string()])).await;
    gw.validator.insert("good", UserId::random(), "client");

    let (status, _) = rejected_status(
        connect(
            gw.addr,
            &[
                ("authorization", "Bearer good"),
                ("origin", "https://evil.example"),
            ],
        )
        .await,
    );
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(gw.validator.calls(), 0);

    let client = connect(
        gw.addr,
        &[
            ("authorization", "Bearer good"),
            ("origin", "https://app.example"),
        ],
    )
    .await;
    assert!(client.is_ok());
}

#[tokio::test]
async fn plain_request_with_valid_token_is_bad_request() {
    let registry = ConnectionRegistry::new();
    let user = UserId::random();
    let validator = Arc::new(StaticTokenValidator::new().with_token("good", user));
    let (shutdown, _) = broadcast::channel(1);
    let app = gateway_router(GatewayState::new(registry, validator, shutdown));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/ws")
                .header("authorization", "Bearer good")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn valid_token_registers_session_until_close() {
    let gw = start(|s| s).await;
    let user = UserId::random();
    gw.validator.insert("good", user, "client");

    let mut client = connect_as(gw.addr, "good").await;
    wait_for_connections(&gw.registry, 1).await;

    let sessions = gw.registry.get(user).expect("user registered");
    assert_eq!(sessions.len(), 1);
    let frame = r#"{"type":"order.cancelled"}"#;
    sessions[0].push(frame.to_string()).unwrap();
    assert_eq!(next_text(&mut client).await, frame);

    client.close(None).await.unwrap();
    wait_for_connections(&gw.registry, 0).await;
    assert!(gw.registry.get(user).is_none());
}

#[tokio::test]
async fn one_user_may_hold_several_sessions() {
    let gw = start(|s| s).await;
    let user = UserId::random();
    gw.validator.insert("good", user, "client");

    let mut phone = connect_as(gw.addr, "good").await;
    let mut laptop = connect_as(gw.addr, "good").await;
    wait_for_connections(&gw.registry, 2).await;
    assert_eq!(gw.registry.user_count(), 1);

    for handle in gw.registry.get(user).unwrap() {
        handle.push("hello".to_string()).unwrap();
    }
    assert_eq!(next_text(&mut phone).await, "hello");
    assert_eq!(next_text(&mut laptop).await, "hello");

    drop(phone);
    wait_for_connections(&gw.registry, 1).await;
    assert_eq!(gw.registry.get(user).unwrap().len(), 1);
}

#[tokio::test]
async fn shutdown_closes_sessions() {
    let gw = start(|s| s).await;
    gw.validator.insert("good", UserId::random(), "client");

    let mut client = connect_as(gw.addr, "good").await;
    wait_for_connections(&gw.registry, 1).await;

    gw.shutdown.send(()).unwrap();
    wait_for_connections(&gw.registry, 0).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = client.next().await {
            if matches!(frame, Ok(Message::Close(_)) | Err(_)) {
                return;
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn sessions_are_pinged() {
    let gw = start(|s| s.with_ping_interval(Duration::from_millis(50))).await;
    gw.validator.insert("good", UserId::random(), "client");

    let mut client = connect_as(gw.addr, "good").await;
    let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("ping should arrive")
        .unwrap()
        .unwrap();
    assert!(matches!(frame, Message::Ping(_)));
}

#[tokio::test]
async fn zero_ping_interval_disables_pings() {
    let gw = start(|s| s.with_ping_interval(Duration::ZERO)).await;
    let user = UserId::random();
    gw.validator.insert("good", user, "client");

    let mut client = connect_as(gw.addr, "good").await;
    wait_for_connections(&gw.registry, 1).await;

    let quiet = tokio::time::timeout(Duration::from_millis(200), client.next()).await;
    assert!(quiet.is_err(), "no frame expected, got {quiet:?}");

    let sessions = gw.registry.get(user).unwrap();
    sessions[0].push("still here".to_string()).unwrap();
    assert_eq!(next_text(&mut client).await, "still here");

    drop(client);
    wait_for_connections(&gw.registry, 0).await;
}
