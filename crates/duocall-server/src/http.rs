use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::state::AppState;
use crate::ws::ws_upgrade;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
    time: String,
    environment: String,
    version: &'static str,
}

/// `GET /health` (spec §6): always 200 while the process is serving.
async fn health(State(state): State<AppState>) -> Json<HealthBody> {
    Json(HealthBody {
        status: "healthy",
        time: chrono::Utc::now().to_rfc3339(),
        environment: state.environment.clone(),
        version: state.version,
    })
}

#[derive(Serialize)]
struct PoolStatsBody {
    waiting: usize,
    active: usize,
    rooms: usize,
}

#[derive(Serialize)]
struct RateLimiterStatsBody {
    http_sources: usize,
    ws_sources: usize,
    connections_per_source: Vec<(String, usize)>,
}

#[derive(Serialize)]
struct StatsBody {
    pool: PoolStatsBody,
    rate_limiter: RateLimiterStatsBody,
    started_at: String,
}

/// `GET /stats` (spec §6): a read-only snapshot of the pool and rate limiter,
/// taken by calling each's public `stats()` accessor -- never by reaching
/// into their internals.
async fn stats(State(state): State<AppState>) -> Json<StatsBody> {
    let pool = state.engine.pool().stats();
    let limiter = state.rate_limiter.stats();
    Json(StatsBody {
        pool: PoolStatsBody {
            waiting: pool.waiting_count,
            active: pool.active_count,
            rooms: pool.room_count,
        },
        rate_limiter: RateLimiterStatsBody {
            http_sources: limiter.http_sources,
            ws_sources: limiter.ws_sources,
            connections_per_source: limiter.connections_per_source,
        },
        started_at: state.started_at.to_rfc3339(),
    })
}

#[derive(Serialize)]
struct IceServersBody {
    #[serde(rename = "iceServers")]
    ice_servers: Vec<duocall_proto::IceServerEntry>,
}

/// `GET /ice-servers` (spec §6): the STUN/TURN descriptors loaded from
/// config, in the same shape the `ice_servers` WebSocket message uses.
async fn ice_servers(State(state): State<AppState>) -> Json<IceServersBody> {
    Json(IceServersBody {
        ice_servers: state.ice_servers.clone(),
    })
}

/// Applies the HTTP token bucket (spec §4.4 `allow_http`) ahead of routing,
/// refusing with 429 and `Retry-After`/rate-limit headers per spec §7's
/// rate-limited error class. The `/ws` upgrade route is exempt here since
/// it is gated by the session-traffic bucket instead (`allow_ws`, enforced
/// in `ws_upgrade`).
async fn http_rate_limit(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: axum::extract::Request,
    next: Next,
) -> Response {
    let source = addr.ip().to_string();
    if !state.rate_limiter.allow_http(&source) {
        let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
        let headers = response.headers_mut();
        headers.insert("Retry-After", HeaderValue::from_static("60"));
        headers.insert(
            "X-RateLimit-Limit",
            HeaderValue::from_str(&state.rate_limiter.http_rate_per_min().to_string())
                .unwrap_or_else(|_| HeaderValue::from_static("0")),
        );
        headers.insert("X-RateLimit-Remaining", HeaderValue::from_static("0"));
        return response;
    }
    next.run(request).await
}

/// Builds the full HTTP/WS surface (spec §6's HTTP adjuncts plus the `/ws`
/// upgrade), with CORS restricted to the configured allowed origins
/// (SPEC_FULL.md ADDITIONS §E).
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin).ok())
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/ice-servers", get(ice_servers))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            http_rate_limit,
        ))
        .route("/ws", get(ws_upgrade))
        .layer(cors)
        .with_state(state)
}
