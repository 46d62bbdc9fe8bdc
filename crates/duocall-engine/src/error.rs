use thiserror::Error;

/// Engine-level error taxonomy (spec §7). Validation and not-found failures
/// never reach this type -- they are local to one session and surfaced as an
/// `error` wire message built straight from the Validator's own
/// `Display` impl (see `engine.rs`'s `send_error`) -- so only the handshake-
/// and transport-level failures that actually propagate as a `Result` live
/// here.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("rate limited")]
    RateLimited,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("connection closed")]
    Closed,
}

pub type SignalResult<T> = Result<T, SignalError>;
