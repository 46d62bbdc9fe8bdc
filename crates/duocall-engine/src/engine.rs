use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use duocall_proto::{
    CandidatePayload, ClientDecodeError, ClientMessage, Envelope, ErrorPayload, IceServerEntry,
    IceServersPayload, MatchFoundPayload, OfferPayload, PartnerDisconnectedPayload, Role,
    ServerMessage, SessionPayload, WaitingPayload,
};
use tokio::task::JoinHandle;

use crate::connection::{Connection, FrameSink};
use crate::error::{SignalError, SignalResult};
use crate::ids::new_user_id;
use crate::pool::{CallState, User, UserPool};
use crate::rate_limit::RateLimiter;

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// The read half of a session's bidirectional channel (spec §4.5's read
/// loop). Implemented by the transport crate, mirrored after `FrameSink`.
#[async_trait]
pub trait FrameStream: Send + 'static {
    /// Returns the raw bytes of the next inbound frame. `None` signals a
    /// clean transport close; `Some(Err(_))` a transport-level read
    /// failure (spec §7's Transport error class).
    async fn recv_bytes(&mut self) -> Option<SignalResult<Vec<u8>>>;
}

/// Tunables named in spec §6's "Configuration inputs" that the engine
/// itself consumes (the rest -- listen address, origins, token secret --
/// belong to `duocall-server`).
#[derive(Clone)]
pub struct EngineConfig {
    pub heartbeat_period: Duration,
    pub read_timeout: Duration,
    pub reaper_period: Duration,
    pub idle_cutoff: Duration,
    pub ice_servers: Vec<IceServerEntry>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            reaper_period: Duration::from_secs(30),
            idle_cutoff: Duration::from_secs(300),
            ice_servers: Vec::new(),
        }
    }
}

enum CallControlEvent {
    Start,
    Accept,
    Reject,
    End,
}

enum DispatchOutcome {
    Continue,
    Disconnect,
}

/// Drives one session from handshake to teardown (spec §4.5). Holds the
/// two process-wide shared resources -- the `UserPool` and the
/// `RateLimiter` -- plus a side index from user id to source address so the
/// idle reaper (which never sees a `source` parameter) can still release
/// that user's rate-limiter slot on the way out.
pub struct SignalingEngine {
    pool: Arc<UserPool>,
    rate_limiter: Arc<RateLimiter>,
    config: EngineConfig,
    user_sources: DashMap<String, String>,
}

impl SignalingEngine {
    pub fn new(pool: Arc<UserPool>, rate_limiter: Arc<RateLimiter>, config: EngineConfig) -> Self {
        Self {
            pool,
            rate_limiter,
            config,
            user_sources: DashMap::new(),
        }
    }

    pub fn pool(&self) -> &Arc<UserPool> {
        &self.pool
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// Drives one session end-to-end: handshake, the concurrent
    /// heartbeat/read-loop pair, and teardown. Returns once the session has
    /// fully torn down; the only error it can surface to the caller is a
    /// rejected handshake (rate limit or initial write failure), since every
    /// later failure is absorbed by teardown.
    pub async fn run_session<S>(
        self: Arc<Self>,
        source: String,
        sink: Box<dyn FrameSink>,
        mut stream: S,
    ) -> SignalResult<()>
    where
        S: FrameStream,
    {
        if !self.rate_limiter.acquire_connection_slot(&source) {
            return Err(SignalError::RateLimited);
        }

        let user_id = new_user_id();
        let conn = Arc::new(Connection::new(user_id.clone(), sink));
        let user = self.pool.add_waiting(conn.clone());
        self.user_sources.insert(user_id.clone(), source.clone());

        let announce = Envelope::new(ServerMessage::Session(SessionPayload {
            user_id: user.id.clone(),
            token: user.token.clone(),
        }))
        .with_timestamp(now_iso());

        if let Err(err) = conn.write(&announce).await {
            self.pool.remove(&user.id);
            self.user_sources.remove(&user.id);
            conn.close().await;
            self.rate_limiter.release_connection_slot(&source);
            return Err(err);
        }

        let heartbeat = self.spawn_heartbeat(conn.clone());

        let reason = self.read_loop(&user, &mut stream).await;
        heartbeat.abort();

        self.teardown(&user.id, reason).await;
        Ok(())
    }

    fn spawn_heartbeat(&self, conn: Arc<Connection>) -> JoinHandle<()> {
        let period = self.config.heartbeat_period;
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let ping = Envelope::new(ServerMessage::Ping).with_timestamp(now_iso());
                if conn.write(&ping).await.is_err() {
                    break;
                }
            }
        })
    }

    async fn read_loop<S: FrameStream>(&self, user: &User, stream: &mut S) -> &'static str {
        loop {
            let next = tokio::time::timeout(self.config.read_timeout, stream.recv_bytes()).await;
            let bytes = match next {
                Err(_) => return "read timeout",
                Ok(None) => return "client closed the channel",
                Ok(Some(Err(_))) => return "transport read error",
                Ok(Some(Ok(bytes))) => bytes,
            };

            user.conn.touch();

            if let Err(err) = duocall_proto::validate_frame(&bytes) {
                self.send_error(user, &err.to_string()).await;
                continue;
            }

            let msg = match ClientMessage::decode(&bytes) {
                Ok(msg) => msg,
                Err(ClientDecodeError::Syntax(_)) => return "malformed frame",
                Err(err @ ClientDecodeError::InvalidPayload { .. }) => {
                    // A recognized type with a malformed payload is a
                    // validation failure (spec §7), not a transport
                    // failure: reply with an error and keep the session
                    // alive instead of tearing it down.
                    self.send_error(user, &err.to_string()).await;
                    continue;
                }
            };

            match self.dispatch(user, msg).await {
                DispatchOutcome::Continue => {}
                DispatchOutcome::Disconnect => return "client disconnected",
            }
        }
    }

    async fn dispatch(&self, user: &User, msg: ClientMessage) -> DispatchOutcome {
        match msg {
            ClientMessage::Ping | ClientMessage::Pong => {}
            ClientMessage::FindMatch => self.handle_find_match(user).await,
            ClientMessage::Offer(payload) => self.handle_offer(user, payload).await,
            ClientMessage::Answer(payload) => self.handle_answer(user, payload).await,
            ClientMessage::IceCandidate(payload) => self.handle_candidate(user, payload).await,
            ClientMessage::CallStart => {
                self.handle_call_control(user, CallControlEvent::Start).await
            }
            ClientMessage::CallAccept => {
                self.handle_call_control(user, CallControlEvent::Accept)
                    .await
            }
            ClientMessage::CallReject => {
                self.handle_call_control(user, CallControlEvent::Reject)
                    .await
            }
            ClientMessage::CallEnd => self.handle_call_control(user, CallControlEvent::End).await,
            ClientMessage::GetIceServers => self.handle_get_ice_servers(user).await,
            ClientMessage::Disconnect => return DispatchOutcome::Disconnect,
            ClientMessage::Unknown => {
                log::debug!("ignoring unknown message type from {}", user.id);
            }
        }
        DispatchOutcome::Continue
    }

    async fn handle_find_match(&self, user: &User) {
        if let Some(partner) = self.pool.pick_waiting_partner(&user.id) {
            if let Some(room) = self.pool.create_room(&user.id, &partner.id) {
                let to_requester = Envelope::new(ServerMessage::MatchFound(MatchFoundPayload {
                    partner_id: partner.id.clone(),
                    room_id: room.id.clone(),
                    role: Role::Caller,
                }))
                .with_timestamp(now_iso());
                let to_partner = Envelope::new(ServerMessage::MatchFound(MatchFoundPayload {
                    partner_id: user.id.clone(),
                    room_id: room.id.clone(),
                    role: Role::Callee,
                }))
                .with_timestamp(now_iso());

                let _ = user.conn.write(&to_requester).await;
                if partner.conn.write(&to_partner).await.is_err() {
                    log::warn!("match_found delivery failed for {}", partner.id);
                }
                return;
            }
        }

        let waiting = Envelope::new(ServerMessage::Waiting(WaitingPayload {
            status: "waiting".to_string(),
        }))
        .with_timestamp(now_iso());
        let _ = user.conn.write(&waiting).await;
    }

    async fn handle_offer(&self, user: &User, payload: OfferPayload) {
        if let Err(err) = duocall_proto::validate_offer(&payload) {
            self.send_error(user, &err.to_string()).await;
            return;
        }
        let Some(partner) = self.pool.find_partner(&user.id) else {
            self.send_error(user, "no partner to relay offer to").await;
            return;
        };

        self.pool.set_call_state(&user.id, CallState::Ringing);
        self.pool.set_call_state(&partner.id, CallState::Ringing);

        let frame = Envelope::new(ServerMessage::Offer(payload))
            .with_from(user.id.clone())
            .with_to(partner.id.clone())
            .with_timestamp(now_iso());
        let _ = partner.conn.write(&frame).await;
    }

    async fn handle_answer(&self, user: &User, payload: OfferPayload) {
        if let Err(err) = duocall_proto::validate_answer(&payload) {
            self.send_error(user, &err.to_string()).await;
            return;
        }
        let Some(partner) = self.pool.find_partner(&user.id) else {
            self.send_error(user, "no partner to relay answer to").await;
            return;
        };

        self.pool.set_call_state(&user.id, CallState::Answered);
        self.pool.set_call_state(&partner.id, CallState::Answered);
        self.pool.mark_started(&user.id);

        let frame = Envelope::new(ServerMessage::Answer(payload))
            .with_from(user.id.clone())
            .with_to(partner.id.clone())
            .with_timestamp(now_iso());
        let _ = partner.conn.write(&frame).await;
    }

    async fn handle_candidate(&self, user: &User, payload: CandidatePayload) {
        if let Err(err) = duocall_proto::validate_candidate(&payload) {
            self.send_error(user, &err.to_string()).await;
            return;
        }
        // Candidates may arrive after teardown; silently drop rather than
        // erroring back (spec §4.5, §7).
        let Some(partner) = self.pool.find_partner(&user.id) else {
            return;
        };

        let frame = Envelope::new(ServerMessage::IceCandidate(payload))
            .with_from(user.id.clone())
            .with_to(partner.id.clone())
            .with_timestamp(now_iso());
        let _ = partner.conn.write(&frame).await;
    }

    async fn handle_call_control(&self, user: &User, event: CallControlEvent) {
        let Some(partner) = self.pool.find_partner(&user.id) else {
            self.send_error(user, "no partner for call control").await;
            return;
        };

        let (notify, self_state, partner_state, mark_end) = match event {
            CallControlEvent::Start => (ServerMessage::CallIncoming, CallState::Ringing, None, false),
            CallControlEvent::Accept => (
                ServerMessage::CallAccepted,
                CallState::Answered,
                Some(CallState::Answered),
                false,
            ),
            CallControlEvent::Reject => (
                ServerMessage::CallRejected,
                CallState::Ended,
                Some(CallState::Ended),
                false,
            ),
            CallControlEvent::End => (
                ServerMessage::CallEnded,
                CallState::Ended,
                Some(CallState::Ended),
                true,
            ),
        };

        self.pool.set_call_state(&user.id, self_state);
        if let Some(state) = partner_state {
            self.pool.set_call_state(&partner.id, state);
        }
        if mark_end {
            self.pool.mark_ended(&user.id);
        }

        let frame = Envelope::new(notify)
            .with_from(user.id.clone())
            .with_timestamp(now_iso());
        let _ = partner.conn.write(&frame).await;
    }

    async fn handle_get_ice_servers(&self, user: &User) {
        let frame = Envelope::new(ServerMessage::IceServers(IceServersPayload {
            ice_servers: self.config.ice_servers.clone(),
        }))
        .with_timestamp(now_iso());
        let _ = user.conn.write(&frame).await;
    }

    async fn send_error(&self, user: &User, message: &str) {
        let frame = Envelope::new(ServerMessage::Error(ErrorPayload {
            message: message.to_string(),
        }))
        .with_timestamp(now_iso());
        let _ = user.conn.write(&frame).await;
    }

    /// The single teardown codepath (spec §4.5), reachable from the read
    /// loop exiting for any reason and from the idle reaper. Safe to invoke
    /// twice on the same user: the second call finds nothing left to
    /// remove or notify.
    pub async fn teardown(&self, user_id: &str, reason: &'static str) {
        let outcome = self.pool.teardown(user_id);

        if let Some(partner) = &outcome.partner {
            let frame = Envelope::new(ServerMessage::PartnerDisconnected(
                PartnerDisconnectedPayload {
                    reason: reason.to_string(),
                },
            ))
            .with_from(user_id.to_string())
            .with_timestamp(now_iso());
            if let Err(err) = partner.conn.write(&frame).await {
                log::warn!(
                    "best-effort partner_disconnected delivery to {} failed: {err}",
                    partner.id
                );
            }
        }

        if let Some(removed) = outcome.removed {
            removed.conn.close().await;
            log::info!("session {user_id} torn down ({reason})");
        }

        if let Some((_, source)) = self.user_sources.remove(user_id) {
            self.rate_limiter.release_connection_slot(&source);
        }
    }

    /// Spawns the idle reaper (spec §4.2): every `reaper_period`, scans the
    /// pool for connections whose liveness has lapsed past `idle_cutoff`
    /// and tears each one down through the same codepath the read loop
    /// uses.
    pub fn spawn_idle_reaper(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.reaper_period;
        let cutoff = self.config.idle_cutoff;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                for user_id in self.pool.idle_user_ids(cutoff) {
                    log::info!("reaping idle session {user_id}");
                    self.teardown(&user_id, "idle timeout").await;
                }
            }
        })
    }

    /// Tears down every session still tracked by the pool. Used on
    /// graceful process shutdown after the reapers have been cancelled
    /// (SPEC_FULL.md ADDITIONS §G).
    pub async fn shutdown_all(&self) {
        for user_id in self.pool.all_user_ids() {
            self.teardown(&user_id, "server shutting down").await;
        }
    }
}
