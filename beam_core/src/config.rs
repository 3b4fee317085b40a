use std::time::Duration;

/// Default WebSocket port for the coordination service
pub const RELAY_PORT: u16 = 8080;

/// Reconnection window for a disconnected host (10 seconds).
/// Losing the host tears down every direct channel, so it gets the longer window.
pub const HOST_GRACE_SECS: u64 = 10;

/// Reconnection window for a disconnected peer (5 seconds)
pub const PEER_GRACE_SECS: u64 = 5;

/// Reconnect attempts allowed per identity inside `RECONNECT_WINDOW_SECS`
pub const RECONNECT_BURST: usize = 5;

/// Rolling window for the reconnect rate limit
pub const RECONNECT_WINDOW_SECS: u64 = 30;

/// Runtime configuration for the coordination service.
///
/// Every field has a default; `from_env` overrides from the environment so the
/// binary can be configured through a `.env` file.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub port: u16,
    /// Shared bearer credential checked once at connection open
    pub auth_token: String,
    pub host_grace: Duration,
    pub peer_grace: Duration,
    pub reconnect_burst: usize,
    pub reconnect_window: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: RELAY_PORT,
            auth_token: "SUPER_SECRET_CHANGE_THIS".to_string(),
            host_grace: Duration::from_secs(HOST_GRACE_SECS),
            peer_grace: Duration::from_secs(PEER_GRACE_SECS),
            reconnect_burst: RECONNECT_BURST,
            reconnect_window: Duration::from_secs(RECONNECT_WINDOW_SECS),
        }
    }
}

impl RelayConfig {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("BEAM_PORT") {
            if let Ok(port) = port.parse() {
                config.port = port;
            }
        }
        if let Ok(token) = std::env::var("BEAM_AUTH_TOKEN") {
            if !token.is_empty() {
                config.auth_token = token;
            }
        }
        if let Ok(ms) = std::env::var("BEAM_HOST_GRACE_MS") {
            if let Ok(ms) = ms.parse() {
                config.host_grace = Duration::from_millis(ms);
            }
        }
        if let Ok(ms) = std::env::var("BEAM_PEER_GRACE_MS") {
            if let Ok(ms) = ms.parse() {
                config.peer_grace = Duration::from_millis(ms);
            }
        }

        config
    }
}
