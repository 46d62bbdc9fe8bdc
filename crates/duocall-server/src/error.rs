use thiserror::Error;

/// Startup-only fatal errors (SPEC_FULL.md ADDITIONS §C). Each variant maps
/// to a distinct process exit code per spec §6's "Exit codes" clause; none
/// of these can occur once the server is serving traffic.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

impl ServerError {
    /// The process exit code `main` reports for this failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ServerError::Config(_) | ServerError::InvalidConfig(_) => 78,
            ServerError::Bind { .. } => 1,
        }
    }
}
