use std::time::Duration;

use actix_files::Files;
use actix_web::{test, web, App, HttpServer};
use futures::{SinkExt, StreamExt};
use relay_server::websocket::ws_route;
use relay_server::{AppState, Cli, Settings};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const RECV_TIMEOUT: Duration = Duration::from_secs(5);

fn test_state() -> web::Data<AppState> {
    let config = Settings::new(&Cli::default()).expect("Failed to load settings");
    web::Data::new(AppState::new(config))
}

/// Starts the relay on an ephemeral port and returns its address plus the
/// shared state so tests can observe the registry.
fn spawn_relay() -> (std::net::SocketAddr, web::Data<AppState>) {
    let state = test_state();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let addr = listener.local_addr().expect("Failed to read local addr");

    let factory_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(factory_state.clone())
            .route("/ws", web::get().to(ws_route))
    })
    .listen(listener)
    .expect("Failed to listen")
    .workers(1)
    .run();
    actix_web::rt::spawn(server);

    (addr, state)
}

async fn expect_text(
    stream: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
) -> String {
    let msg = timeout(RECV_TIMEOUT, stream.next())
        .await
        .expect("Timed out waiting for a relayed message")
        .expect("Connection closed while waiting for a message")
        .expect("WebSocket read failed");
    match msg {
        Message::Text(text) => text,
        other => panic!("Expected a text frame, got {:?}", other),
    }
}

#[actix_web::test]
async fn test_bad_handshake_gets_400_and_registers_nothing() {
    let state = test_state();
    let app = test::init_service(
        App::new()
            .app_data(state.clone())
            .route("/ws", web::get().to(ws_route)),
    )
    .await;

    // A plain GET, no upgrade headers
    let req = test::TestRequest::get().uri("/ws").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status().as_u16(), 400);
    let body = test::read_body(resp).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"]["message"], "Not a websocket handshake");

    assert_eq!(state.registry.connection_count(), 0);
}

#[actix_web::test]
async fn test_static_index_is_served() {
    let app = test::init_service(
        App::new().service(Files::new("/", "web/").index_file("index.html")),
    )
    .await;

    let req = test::TestRequest::get().uri("/").to_request();
    let resp = test::call_service(&app, req).await;
    assert!(resp.status().is_success());

    let body = test::read_body(resp).await;
    let html = String::from_utf8_lossy(&body);
    assert!(html.contains("Relay Chat"));
}

#[actix_web::test]
async fn test_message_is_broadcast_to_all_clients_including_sender() {
    let (addr, state) = spawn_relay();
    let url = format!("ws://{}/ws", addr);

    let (mut client_a, _) = connect_async(url.as_str()).await.expect("A failed to connect");
    let (mut client_b, _) = connect_async(url.as_str()).await.expect("B failed to connect");
    sleep(POLL_INTERVAL).await;
    assert_eq!(state.registry.connection_count(), 2);

    client_a
        .send(Message::Text("hello".to_string()))
        .await
        .expect("A failed to send");

    // Self-delivery is expected, not suppressed
    assert_eq!(expect_text(&mut client_a).await, "hello");
    assert_eq!(expect_text(&mut client_b).await, "hello");
}

#[actix_web::test]
async fn test_closed_client_is_evicted_and_skipped_afterwards() {
    let (addr, state) = spawn_relay();
    let url = format!("ws://{}/ws", addr);

    let (mut client_a, _) = connect_async(url.as_str()).await.expect("A failed to connect");
    let (mut client_b, _) = connect_async(url.as_str()).await.expect("B failed to connect");
    sleep(POLL_INTERVAL).await;
    assert_eq!(state.registry.connection_count(), 2);

    client_b.close(None).await.expect("B failed to close");

    // The server notices the close on its next read and unregisters B
    let mut waited = Duration::ZERO;
    while state.registry.connection_count() > 1 && waited < RECV_TIMEOUT {
        sleep(POLL_INTERVAL).await;
        waited += POLL_INTERVAL;
    }
    assert_eq!(state.registry.connection_count(), 1);

    client_a
        .send(Message::Text("still here".to_string()))
        .await
        .expect("A failed to send");
    assert_eq!(expect_text(&mut client_a).await, "still here");
    assert_eq!(state.registry.connection_count(), 1);
}

#[actix_web::test]
async fn test_large_message_is_relayed_intact() {
    let (addr, _state) = spawn_relay();
    let url = format!("ws://{}/ws", addr);

    let (mut client_a, _) = connect_async(url.as_str()).await.expect("A failed to connect");
    let (mut client_b, _) = connect_async(url.as_str()).await.expect("B failed to connect");
    sleep(POLL_INTERVAL).await;

    // Well past the websocket codec's 64 KiB default frame cap
    let large = "x".repeat(100 * 1024);
    client_a
        .send(Message::Text(large.clone()))
        .await
        .expect("A failed to send");

    assert_eq!(expect_text(&mut client_b).await, large);
    assert_eq!(expect_text(&mut client_a).await, large);
}

#[actix_web::test]
async fn test_binary_frames_are_relayed_opaquely() {
    let (addr, _state) = spawn_relay();
    let url = format!("ws://{}/ws", addr);

    let (mut client_a, _) = connect_async(url.as_str()).await.expect("A failed to connect");
    let (mut client_b, _) = connect_async(url.as_str()).await.expect("B failed to connect");
    sleep(POLL_INTERVAL).await;

    let payload = vec![0x00, 0x01, 0xfe, 0xff];
    client_a
        .send(Message::Binary(payload.clone()))
        .await
        .expect("A failed to send");

    let msg = timeout(RECV_TIMEOUT, client_b.next())
        .await
        .expect("Timed out waiting for the binary frame")
        .expect("Connection closed while waiting")
        .expect("WebSocket read failed");
    assert_eq!(msg, Message::Binary(payload));
}
