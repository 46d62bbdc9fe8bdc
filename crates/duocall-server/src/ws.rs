use std::net::SocketAddr;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use duocall_engine::{FrameSink, FrameStream, SignalError, SignalResult};
use duocall_proto::ServerFrame;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};

use crate::state::AppState;

/// Adapts the write half of an axum `WebSocket` to `duocall_engine`'s
/// `FrameSink` (spec §4.1's Connection). Generalizes the teacher's
/// `ShroomConn` write half from a length-prefixed packet codec to a JSON
/// text frame.
pub struct WsFrameSink {
    inner: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_frame(&mut self, frame: &ServerFrame) -> SignalResult<()> {
        let text = serde_json::to_string(frame)
            .map_err(|err| SignalError::Transport(err.to_string()))?;
        self.inner
            .send(Message::Text(text))
            .await
            .map_err(|err| SignalError::Transport(err.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.inner.close().await;
    }
}

/// Adapts the read half of an axum `WebSocket` to `duocall_engine`'s
/// `FrameStream` (the read loop in spec §4.5). Transport-level `Ping`/`Pong`
/// control frames are not the protocol's own heartbeat messages (those are
/// JSON `ping`/`pong` types dispatched by the engine) and are swallowed here
/// rather than surfaced as frames.
pub struct WsFrameStream {
    inner: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn recv_bytes(&mut self) -> Option<SignalResult<Vec<u8>>> {
        loop {
            return match self.inner.next().await {
                None => None,
                Some(Err(err)) => Some(Err(SignalError::Transport(err.to_string()))),
                Some(Ok(Message::Text(text))) => Some(Ok(text.into_bytes())),
                Some(Ok(Message::Binary(bytes))) => Some(Ok(bytes)),
                Some(Ok(Message::Close(_))) => None,
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            };
        }
    }
}

/// `GET /ws` (spec §6): upgrades the connection and hands the split
/// sink/stream to `SignalingEngine::run_session`. Gated by the session-
/// traffic token bucket (spec §4.4 `allow_ws`) before the upgrade completes,
/// since a refused channel-path request never gets a socket at all (spec
/// §7's rate-limited error class).
pub async fn ws_upgrade(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let source = addr.ip().to_string();

    if !state.rate_limiter.allow_ws(&source) {
        return (StatusCode::TOO_MANY_REQUESTS, "session rate limit exceeded").into_response();
    }

    ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        let frame_sink: Box<dyn FrameSink> = Box::new(WsFrameSink { inner: sink });
        let frame_stream = WsFrameStream { inner: stream };

        if let Err(err) = state
            .engine
            .clone()
            .run_session(source.clone(), frame_sink, frame_stream)
            .await
        {
            log::warn!("session from {source} rejected at handshake: {err}");
        }
    })
}
