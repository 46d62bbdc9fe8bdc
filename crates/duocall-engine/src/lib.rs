pub mod connection;
pub mod engine;
mod ids;
pub mod pool;
pub mod rate_limit;

mod error;

pub use connection::{Connection, FrameSink};
pub use engine::{EngineConfig, FrameStream, SignalingEngine};
pub use error::{SignalError, SignalResult};
pub use pool::{CallState, PoolStats, Room, TeardownOutcome, User, UserPool, UserStatus};
pub use rate_limit::{spawn_pruner, RateLimiter, RateLimiterStats};
