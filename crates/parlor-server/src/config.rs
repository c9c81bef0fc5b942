//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parlor_shared::constants::DEFAULT_HTTP_PORT;
use parlor_shared::types::UserId;

use crate::auth::{parse_token_table, Authenticator, QueryAuthenticator, StaticTokenAuthenticator};

/// How connections prove their identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Trust the `user_id` query parameter. Development only.
    Query,
    /// Bearer tokens resolved through `AUTH_TOKENS`.
    Token,
}

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP / WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: unset, which keeps everything in memory.
    pub database_path: Option<PathBuf>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Parlor"`
    pub instance_name: String,

    /// Env: `AUTH_MODE` (`query` | `token`)
    /// Default: `query`
    pub auth_mode: AuthMode,

    /// Token table for [`AuthMode::Token`].
    /// Env: `AUTH_TOKENS` (`token:user,token:user`)
    pub auth_tokens: HashMap<String, UserId>,

    /// How long a call id stays in the missed-call ledger.
    /// Env: `MISSED_CALL_DEDUP_SECS`
    /// Default: `120`
    pub missed_call_dedup: Duration,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Tokens are credentials; only their count is printed.
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("instance_name", &self.instance_name)
            .field("auth_mode", &self.auth_mode)
            .field("auth_tokens", &self.auth_tokens.len())
            .field("missed_call_dedup", &self.missed_call_dedup)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            instance_name: "Parlor".to_string(),
            auth_mode: AuthMode::Query,
            auth_tokens: HashMap::new(),
            missed_call_dedup: Duration::from_secs(120),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(mode) = lookup("AUTH_MODE") {
            match mode.trim().to_ascii_lowercase().as_str() {
                "query" => config.auth_mode = AuthMode::Query,
                "token" => config.auth_mode = AuthMode::Token,
                other => tracing::warn!(value = %other, "Invalid AUTH_MODE, using default"),
            }
        }

        if let Some(raw) = lookup("AUTH_TOKENS") {
            config.auth_tokens = parse_token_table(&raw);
        }

        if let Some(val) = lookup("MISSED_CALL_DEDUP_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => config.missed_call_dedup = Duration::from_secs(secs),
                Err(_) => {
                    tracing::warn!(value = %val, "Invalid MISSED_CALL_DEDUP_SECS, using default")
                }
            }
        }

        config
    }

    pub fn authenticator(&self) -> Arc<dyn Authenticator> {
        match self.auth_mode {
            AuthMode::Query => Arc::new(QueryAuthenticator),
            AuthMode::Token => Arc::new(StaticTokenAuthenticator::new(self.auth_tokens.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::from_lookup(env(&[]));
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.auth_mode, AuthMode::Query);
        assert!(config.database_path.is_none());
        assert_eq!(config.missed_call_dedup, Duration::from_secs(120));
    }

    #[test]
    fn test_overrides() {
        let config = ServerConfig::from_lookup(env(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/parlor.db"),
            ("AUTH_MODE", "Token"),
            ("AUTH_TOKENS", "t1:alice"),
            ("MISSED_CALL_DEDUP_SECS", "5"),
        ]));
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/parlor.db")));
        assert_eq!(config.auth_mode, AuthMode::Token);
        assert_eq!(config.auth_tokens["t1"], UserId::new("alice"));
        assert_eq!(config.missed_call_dedup, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = ServerConfig::from_lookup(env(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("AUTH_MODE", "magic"),
            ("MISSED_CALL_DEDUP_SECS", "-1"),
        ]));
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.auth_mode, AuthMode::Query);
        assert_eq!(config.missed_call_dedup, Duration::from_secs(120));
    }
}
