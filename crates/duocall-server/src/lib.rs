pub mod config;
pub mod error;
pub mod http;
pub mod state;
pub mod ws;

pub use config::ServerConfig;
pub use error::ServerError;
pub use state::AppState;

use std::sync::Arc;
use std::time::Duration;

use duocall_engine::{EngineConfig, RateLimiter, SignalingEngine, UserPool};

/// Wires a `ServerConfig` into the engine-level types it configures
/// (`UserPool`, `RateLimiter`, `SignalingEngine`) and the `AppState` the HTTP
/// router needs. Split out of `main` so integration tests can build the same
/// router the binary serves without going through environment variables.
pub fn build_engine(cfg: &ServerConfig) -> (Arc<SignalingEngine>, Arc<RateLimiter>) {
    let pool = Arc::new(UserPool::new());
    let rate_limiter = Arc::new(RateLimiter::new(
        cfg.http_rate_per_min,
        cfg.ws_rate_per_min,
        cfg.max_sessions_per_source,
    ));

    let engine_config = EngineConfig {
        heartbeat_period: cfg.heartbeat_period,
        read_timeout: cfg.read_timeout,
        reaper_period: cfg.reaper_period,
        idle_cutoff: cfg.idle_cutoff,
        ice_servers: cfg.ice_servers.clone(),
    };

    let engine = Arc::new(SignalingEngine::new(
        pool,
        rate_limiter.clone(),
        engine_config,
    ));

    (engine, rate_limiter)
}

/// Builds the full axum router plus the `AppState` it was constructed with,
/// given a `ServerConfig`. Does not bind a socket or spawn any background
/// task -- callers (both `main` and tests) decide when those start.
pub fn build_app(cfg: &ServerConfig) -> (axum::Router, Arc<SignalingEngine>, Arc<RateLimiter>) {
    let (engine, rate_limiter) = build_engine(cfg);
    let state = AppState::new(
        engine.clone(),
        rate_limiter.clone(),
        cfg.ice_servers.clone(),
        cfg.environment.clone(),
    );
    let router = http::router(state, &cfg.allowed_origins);
    (router, engine, rate_limiter)
}

/// Rate-limiter bucket pruning period (SPEC_FULL.md ADDITIONS §D names no
/// dedicated env var for this; it tracks the reaper cadence since both exist
/// to bound the memory of a long-running process).
pub fn default_rate_limiter_prune_period() -> Duration {
    Duration::from_secs(60)
}
