//! Client configuration.

use std::time::Duration;

use parlor_shared::constants::{
    CALL_NO_ANSWER_TIMEOUT, DEFAULT_HTTP_PORT, MESSAGE_ECHO_TIMEOUT, TYPING_EXPIRY,
};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the relay, `ws://` or `wss://`.
    /// Env: `PARLOR_SERVER_URL`
    /// Default: `ws://127.0.0.1:8080`
    pub server_url: String,

    /// How long a sent message waits for its echo before it is marked failed.
    pub message_echo_timeout: Duration,

    /// How long an outgoing call rings before it is reported missed.
    pub no_answer_timeout: Duration,

    /// How long a peer's typing indicator stays on.
    pub typing_expiry: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: format!("ws://127.0.0.1:{DEFAULT_HTTP_PORT}"),
            message_echo_timeout: MESSAGE_ECHO_TIMEOUT,
            no_answer_timeout: CALL_NO_ANSWER_TIMEOUT,
            typing_expiry: TYPING_EXPIRY,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(url) = lookup("PARLOR_SERVER_URL") {
            let url = url.trim().trim_end_matches('/');
            if url.starts_with("ws://") || url.starts_with("wss://") {
                config.server_url = url.to_string();
            } else {
                tracing::warn!(value = %url, "Invalid PARLOR_SERVER_URL, using default");
            }
        }
        config
    }

    /// Event-channel endpoint.
    pub fn ws_url(&self) -> String {
        format!("{}/ws", self.server_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_timers() {
        let config = ClientConfig::from_lookup(|_| None);
        assert_eq!(config.message_echo_timeout, Duration::from_secs(12));
        assert_eq!(config.no_answer_timeout, Duration::from_secs(30));
        assert_eq!(config.typing_expiry, Duration::from_secs(3));
        assert_eq!(config.ws_url(), "ws://127.0.0.1:8080/ws");
    }

    #[test]
    fn test_server_url_override() {
        let config = ClientConfig::from_lookup(|key| {
            (key == "PARLOR_SERVER_URL").then(|| "wss://chat.example.org/".to_string())
        });
        assert_eq!(config.ws_url(), "wss://chat.example.org/ws");

        let config = ClientConfig::from_lookup(|_| Some("http://nope".to_string()));
        assert_eq!(config.server_url, "ws://127.0.0.1:8080");
    }
}
