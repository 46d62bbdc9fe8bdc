use std::sync::Arc;

use chrono::{DateTime, Utc};
use duocall_engine::{RateLimiter, SignalingEngine};
use duocall_proto::IceServerEntry;

/// Shared axum handler state. Every field is cheap to clone (`Arc` or small
/// owned data) since axum clones `State` per request.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SignalingEngine>,
    pub rate_limiter: Arc<RateLimiter>,
    pub ice_servers: Vec<IceServerEntry>,
    pub environment: String,
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(
        engine: Arc<SignalingEngine>,
        rate_limiter: Arc<RateLimiter>,
        ice_servers: Vec<IceServerEntry>,
        environment: String,
    ) -> Self {
        Self {
            engine,
            rate_limiter,
            ice_servers,
            environment,
            version: env!("CARGO_PKG_VERSION"),
            started_at: Utc::now(),
        }
    }
}
