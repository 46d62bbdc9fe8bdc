use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use duocall_proto::ServerFrame;
use tokio::sync::Mutex;

use crate::error::{SignalError, SignalResult};

/// The write half of a session's bidirectional channel. Implemented by the
/// binary crate that owns the concrete transport (an `axum` WebSocket in the
/// `duocall-server` crate, a mock channel in tests) so `duocall-engine`
/// never depends on the transport itself.
#[async_trait]
pub trait FrameSink: Send + 'static {
    async fn send_frame(&mut self, frame: &ServerFrame) -> SignalResult<()>;
    async fn close(&mut self);
}

/// One client's bidirectional channel (spec §4.1): serializes outbound
/// writes under a lock, tracks a liveness timestamp, and closes exactly
/// once. Mirrors the write-lock discipline of the teacher's `ShroomConn`,
/// generalized from a packet codec to a JSON frame sink.
pub struct Connection {
    user_id: String,
    sink: Mutex<Box<dyn FrameSink>>,
    active: AtomicBool,
    last_liveness: AtomicI64,
}

impl Connection {
    pub fn new(user_id: impl Into<String>, sink: Box<dyn FrameSink>) -> Self {
        Self {
            user_id: user_id.into(),
            sink: Mutex::new(sink),
            active: AtomicBool::new(true),
            last_liveness: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Updates the liveness timestamp to now. Called on every successful
    /// inbound frame.
    pub fn touch(&self) {
        self.last_liveness
            .store(Utc::now().timestamp(), Ordering::Release);
    }

    pub fn last_liveness(&self) -> i64 {
        self.last_liveness.load(Ordering::Acquire)
    }

    /// Encodes and writes a frame under the write lock. Atomic per message;
    /// concurrent callers never interleave partial writes. Fails with
    /// `SignalError::Closed` if the connection was already closed.
    pub async fn write(&self, frame: &ServerFrame) -> SignalResult<()> {
        if !self.is_active() {
            return Err(SignalError::Closed);
        }
        let mut sink = self.sink.lock().await;
        if let Err(err) = sink.send_frame(frame).await {
            self.active.store(false, Ordering::Release);
            return Err(err);
        }
        Ok(())
    }

    /// Sets active=false and closes the underlying channel. Idempotent: a
    /// second call is a no-op, and no write() succeeds after this returns.
    pub async fn close(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            self.sink.lock().await.close().await;
        }
    }
}
