//! End-to-end scenario tests driving the real axum router (spec §8's
//! scenarios 1-2, plus the HTTP adjuncts), matching the teacher's
//! integration-test style of exercising a real loopback listener rather
//! than mocking the transport.

use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use duocall_proto::{ClientMessage, Envelope, ServerFrame, ServerMessage};
use duocall_server::{build_app, ServerConfig};
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

fn test_config() -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        environment: "test".to_string(),
        token_secret: "test-secret".to_string(),
        allowed_origins: vec!["*".to_string()],
        read_timeout: Duration::from_secs(5),
        write_timeout: Duration::from_secs(5),
        heartbeat_period: Duration::from_secs(3600),
        reaper_period: Duration::from_secs(3600),
        idle_cutoff: Duration::from_secs(3600),
        http_rate_per_min: 6000,
        ws_rate_per_min: 6000,
        max_sessions_per_source: 100,
        ice_servers: vec![duocall_proto::IceServerEntry {
            urls: vec!["stun:stun.example.com:3478".to_string()],
            username: None,
            credential: None,
        }],
    }
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (router, _engine, _limiter) = build_app(&test_config());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["status"], "healthy");
    assert_eq!(parsed["environment"], "test");
}

#[tokio::test]
async fn stats_endpoint_reports_empty_pool() {
    let (router, _engine, _limiter) = build_app(&test_config());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed["pool"]["waiting"], 0);
    assert_eq!(parsed["pool"]["active"], 0);
    assert_eq!(parsed["pool"]["rooms"], 0);
}

#[tokio::test]
async fn ice_servers_endpoint_reflects_config() {
    let (router, _engine, _limiter) = build_app(&test_config());
    let response = router
        .oneshot(
            Request::builder()
                .uri("/ice-servers")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(
        parsed["iceServers"][0]["urls"][0],
        "stun:stun.example.com:3478"
    );
}

async fn spawn_server() -> SocketAddr {
    let (router, _engine, _limiter) = build_app(&test_config());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let make_service = router.into_make_service_with_connect_info::<SocketAddr>();
    tokio::spawn(async move {
        axum::serve(listener, make_service).await.unwrap();
    });
    addr
}

async fn recv_server_message(
    socket: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> ServerMessage {
    loop {
        match socket.next().await.unwrap().unwrap() {
            Message::Text(text) => {
                let frame: ServerFrame = serde_json::from_str(&text).unwrap();
                return frame.message;
            }
            _ => continue,
        }
    }
}

async fn send_client_message(
    socket: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    msg: ClientMessage,
) {
    let frame = Envelope::new(msg);
    socket
        .send(Message::Text(serde_json::to_string(&frame).unwrap()))
        .await
        .unwrap();
}

#[tokio::test]
async fn solo_waiter_over_real_websocket() {
    let addr = spawn_server().await;
    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    let hello = recv_server_message(&mut socket).await;
    assert!(matches!(hello, ServerMessage::Session(_)));

    send_client_message(&mut socket, ClientMessage::FindMatch).await;
    let waiting = recv_server_message(&mut socket).await;
    assert!(matches!(waiting, ServerMessage::Waiting(_)));
}

#[tokio::test]
async fn pair_and_announce_over_real_websocket() {
    let addr = spawn_server().await;
    let (mut a, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();
    let (mut b, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    let session_a = match recv_server_message(&mut a).await {
        ServerMessage::Session(p) => p,
        other => panic!("expected session, got {other:?}"),
    };
    let session_b = match recv_server_message(&mut b).await {
        ServerMessage::Session(p) => p,
        other => panic!("expected session, got {other:?}"),
    };

    send_client_message(&mut a, ClientMessage::FindMatch).await;

    let match_a = match recv_server_message(&mut a).await {
        ServerMessage::MatchFound(p) => p,
        other => panic!("expected match_found, got {other:?}"),
    };
    let match_b = match recv_server_message(&mut b).await {
        ServerMessage::MatchFound(p) => p,
        other => panic!("expected match_found, got {other:?}"),
    };

    assert_eq!(match_a.room_id, match_b.room_id);
    assert_eq!(match_a.partner_id, session_b.user_id);
    assert_eq!(match_b.partner_id, session_a.user_id);
}
