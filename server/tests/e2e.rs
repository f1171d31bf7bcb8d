//! Order API to WebSocket session, through the broker topology, with
//! in-memory store, broker and auth.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use axum::body::Body;
use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
use courier_core::event_bus::{AckMode, EventBus, Message as BusMessage};
use courier_core::order::UserId;
use courier_core::service::OrderService;
use courier_core::topology::{DEAD_LETTER_QUEUE, ORDER_EVENTS_EXCHANGE};
use courier_server::{Application, notification_consumers, topology};
use courier_testing::{
    InMemoryEventBus, InMemoryOrderRepository, StaticTokenValidator, test_clock,
};
use courier_web::{AppState, ConnectionRegistry, GatewayState, gateway_router, order_router};
use futures::StreamExt;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Stack {
    orders: axum::Router,
    bus: Arc<InMemoryEventBus>,
    registry: ConnectionRegistry,
    validator: Arc<StaticTokenValidator>,
    gateway: SocketAddr,
    stop: oneshot::Sender<()>,
    running: JoinHandle<anyhow::Result<()>>,
}

async fn start() -> Stack {
    courier_testing::helpers::init_tracing();

    let bus = Arc::new(InMemoryEventBus::with_topology(&topology(true)));
    let event_bus: Arc<dyn EventBus> = bus.clone();

    let service = OrderService::new(
        Arc::new(InMemoryOrderRepository::new()),
        event_bus.clone(),
        Arc::new(test_clock()),
    );
    let orders = order_router(AppState::new(service));

    let registry = ConnectionRegistry::new();
    let validator = Arc::new(StaticTokenValidator::new());
    let (shutdown_tx, _) = broadcast::channel(16);
    let consumers = notification_consumers(&event_bus, &registry, AckMode::Manual, &shutdown_tx);
    let router = gateway_router(GatewayState::new(
        registry.clone(),
        validator.clone(),
        shutdown_tx.clone(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let app = Application::new(listener, router, shutdown_tx)
        .with_consumers(consumers)
        .with_registry(registry.clone())
        .with_shutdown_timeout(Duration::from_secs(2));
    let gateway = app.local_addr().unwrap();

    let (stop, stopped) = oneshot::channel::<()>();
    let running = tokio::spawn(app.run_until(async move {
        let _ = stopped.await;
    }));

    Stack {
        orders,
        bus,
        registry,
        validator,
        gateway,
        stop,
        running,
    }
}

async fn connect(stack: &Stack, token: &str) -> Client {
    let mut request = format!("ws://{}/ws", stack.gateway)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("authorization", format!("Bearer {token}").parse().unwrap());
    let (client, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    client
}

async fn eventually(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn next_frame(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("frame should arrive")
            .expect("stream open")
            .expect("frame ok");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn post(stack: &Stack, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method("POST").uri(uri);
    let request = match body {
        Some(body) => builder
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = stack.orders.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

async fn create_order(stack: &Stack, user: UserId) -> String {
    let (status, body) = post(
        stack,
        "/orders",
        Some(json!({
            "user_id": user.to_string(),
            "order_address": "1 Main St",
            "order_location": "downtown",
            "order_date": "2025-01-01T10:00:00Z",
            "order_time_gap": "30m",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["order"]["order_id"].as_str().unwrap().to_string()
}

async fn stop(stack: Stack) {
    stack.stop.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(10), stack.running)
        .await
        .expect("application should stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn lifecycle_events_reach_the_owner() {
    let stack = start().await;
    let user = UserId::random();
    stack.validator.insert("rider", user, "client");

    let mut client = connect(&stack, "rider").await;
    eventually(|| stack.registry.connection_count() == 1, "session").await;

    let order_id = create_order(&stack, user).await;
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "order.created");
    assert_eq!(frame["payload"]["order_id"], order_id);
    assert_eq!(frame["payload"]["order_status"], "pending");

    let (status, _) = post(&stack, &format!("/orders/{order_id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    let frame = next_frame(&mut client).await;
    assert_eq!(frame["type"], "order.cancelled");
    assert_eq!(frame["payload"]["order_status"], "cancelled");

    eventually(
        || stack.bus.unacked_count("queue_order_cancelled") == 0,
        "ack",
    )
    .await;
    stop(stack).await;
}

#[tokio::test]
async fn every_session_of_the_owner_is_notified() {
    let stack = start().await;
    let user = UserId::random();
    stack.validator.insert("rider", user, "client");

    let mut phone = connect(&stack, "rider").await;
    let mut laptop = connect(&stack, "rider").await;
    eventually(|| stack.registry.connection_count() == 2, "sessions").await;

    create_order(&stack, user).await;
    assert_eq!(next_frame(&mut phone).await["type"], "order.created");
    assert_eq!(next_frame(&mut laptop).await["type"], "order.created");

    stop(stack).await;
}

#[tokio::test]
async fn events_for_offline_users_are_acknowledged() {
    let stack = start().await;

    create_order(&stack, UserId::random()).await;

    eventually(
        || {
            stack.bus.ready_count("queue_order_created") == 0
                && stack.bus.unacked_count("queue_order_created") == 0
        },
        "ack",
    )
    .await;
    assert_eq!(stack.bus.ready_count(DEAD_LETTER_QUEUE), 0);
    stop(stack).await;
}

#[tokio::test]
async fn malformed_event_is_dead_lettered() {
    let stack = start().await;

    stack
        .bus
        .publish(
            ORDER_EVENTS_EXCHANGE,
            &BusMessage::json("order.cancelled", b"{\"not\":\"an order\"}".to_vec()),
        )
        .await
        .unwrap();

    eventually(
        || stack.bus.ready_count(DEAD_LETTER_QUEUE) == 1,
        "dead letter",
    )
    .await;
    assert_eq!(stack.bus.unacked_count("queue_order_cancelled"), 0);
    stop(stack).await;
}

#[tokio::test]
async fn shutdown_closes_sessions_and_stops_consumers() {
    let stack = start().await;
    let user = UserId::random();
    stack.validator.insert("rider", user, "client");

    let mut client = connect(&stack, "rider").await;
    eventually(|| stack.registry.connection_count() == 1, "session").await;

    let registry = stack.registry.clone();
    let bus = stack.bus.clone();
    stop(stack).await;

    assert_eq!(registry.connection_count(), 0);
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = client.next().await {
            if matches!(frame, Ok(Message::Close(_)) | Err(_)) {
                return;
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    // Consumers are gone, so new events stay queued.
    bus.publish(
        ORDER_EVENTS_EXCHANGE,
        &BusMessage::json("order.updated", b"{}".to_vec()),
    )
    .await
    .unwrap();
    eventually(|| bus.ready_count("queue_order_updated") == 1, "queued").await;
}
