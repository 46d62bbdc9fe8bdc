use std::time::Duration;

use duocall_proto::IceServerEntry;

use crate::error::ServerError;

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

/// Everything named in spec §6's "Configuration inputs", loaded once at
/// startup and treated as read-only for the lifetime of the process
/// (SPEC_FULL.md ADDITIONS §D). Layered over environment variables with the
/// `config` crate, the same way `instrumentisto-medea` (the retrieval
/// pack's closest WebRTC media-server reference) reads its `MEDEA__`-
/// prefixed settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub environment: String,
    pub token_secret: String,
    pub allowed_origins: Vec<String>,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub heartbeat_period: Duration,
    pub reaper_period: Duration,
    pub idle_cutoff: Duration,
    pub http_rate_per_min: u32,
    pub ws_rate_per_min: u32,
    pub max_sessions_per_source: usize,
    pub ice_servers: Vec<IceServerEntry>,
}

impl ServerConfig {
    /// Loads configuration from `DUOCALL_*` environment variables, applying
    /// the defaults named in SPEC_FULL.md ADDITIONS §D and the production
    /// constraints spec §6 requires (token secret length, no wildcard CORS
    /// origin). A bad or missing required value is a fatal startup error;
    /// nothing here ever bangs on a socket.
    pub fn from_env() -> Result<Self, ServerError> {
        let source = config::Config::builder()
            .add_source(config::Environment::with_prefix("DUOCALL").try_parsing(true))
            .build()?;

        let environment = source
            .get::<String>("env")
            .unwrap_or_else(|_| "development".to_string());

        let token_secret = source
            .get::<String>("token_secret")
            .map_err(|_| ServerError::InvalidConfig("DUOCALL_TOKEN_SECRET is required".into()))?;
        if environment == "production" && token_secret.len() < 8 {
            return Err(ServerError::InvalidConfig(
                "DUOCALL_TOKEN_SECRET must be at least 8 bytes in production".into(),
            ));
        }

        let allowed_origins = parse_csv(source.get::<String>("allowed_origins").ok());
        if environment == "production" && allowed_origins.iter().any(|o| o == "*") {
            return Err(ServerError::InvalidConfig(
                "a wildcard DUOCALL_ALLOWED_ORIGINS entry is not permitted in production".into(),
            ));
        }

        let stun_urls = parse_csv(source.get::<String>("stun_urls").ok());
        let turn_urls = parse_csv(source.get::<String>("turn_urls").ok());
        let turn_username = source.get::<String>("turn_username").ok();
        let turn_credential = source.get::<String>("turn_credential").ok();

        let mut ice_servers = Vec::new();
        if !stun_urls.is_empty() {
            ice_servers.push(IceServerEntry {
                urls: stun_urls,
                username: None,
                credential: None,
            });
        }
        if !turn_urls.is_empty() {
            ice_servers.push(IceServerEntry {
                urls: turn_urls,
                username: turn_username,
                credential: turn_credential,
            });
        }

        Ok(Self {
            listen_addr: source
                .get::<String>("listen_addr")
                .unwrap_or_else(|_| default_listen_addr()),
            environment,
            token_secret,
            allowed_origins,
            read_timeout: Duration::from_secs(
                source.get::<u64>("read_timeout_secs").unwrap_or(60),
            ),
            write_timeout: Duration::from_secs(
                source.get::<u64>("write_timeout_secs").unwrap_or(10),
            ),
            heartbeat_period: Duration::from_secs(
                source.get::<u64>("heartbeat_secs").unwrap_or(30),
            ),
            reaper_period: Duration::from_secs(
                source.get::<u64>("reaper_period_secs").unwrap_or(30),
            ),
            idle_cutoff: Duration::from_secs(
                source.get::<u64>("idle_cutoff_secs").unwrap_or(300),
            ),
            http_rate_per_min: source.get::<u32>("http_rate_per_min").unwrap_or(60),
            ws_rate_per_min: source.get::<u32>("ws_rate_per_min").unwrap_or(30),
            max_sessions_per_source: source
                .get::<u64>("max_sessions_per_source")
                .unwrap_or(4) as usize,
            ice_servers,
        })
    }
}

fn parse_csv(raw: Option<String>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_csv_trims_and_drops_empty_entries() {
        assert_eq!(
            parse_csv(Some(" a, b ,,c".to_string())),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        assert!(parse_csv(None).is_empty());
    }
}
