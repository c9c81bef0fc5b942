//! Connection authentication seam.
//!
//! The relay trusts whatever identity the authenticator returns for the whole
//! lifetime of the connection.

use std::collections::HashMap;

use parlor_shared::types::UserId;

use crate::error::ServerError;

/// Credentials presented on the upgrade request.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    /// `user_id` query parameter.
    pub user_id: Option<String>,
    /// `Authorization: Bearer ...` header, or the `token` query parameter.
    pub token: Option<String>,
}

pub trait Authenticator: Send + Sync {
    /// `Ok(None)` admits the connection unauthenticated; `Err` refuses the
    /// upgrade.
    fn authenticate(&self, credentials: &Credentials) -> Result<Option<UserId>, ServerError>;
}

/// Development mode: trusts the `user_id` query parameter.
#[derive(Debug, Default)]
pub struct QueryAuthenticator;

impl Authenticator for QueryAuthenticator {
    fn authenticate(&self, credentials: &Credentials) -> Result<Option<UserId>, ServerError> {
        Ok(credentials
            .user_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(UserId::new))
    }
}

/// Resolves bearer tokens through a fixed table.
#[derive(Debug, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, credentials: &Credentials) -> Result<Option<UserId>, ServerError> {
        let token = credentials
            .token
            .as_deref()
            .ok_or_else(|| ServerError::Unauthorized("missing token".into()))?;
        self.tokens
            .get(token)
            .cloned()
            .map(Some)
            .ok_or_else(|| ServerError::Unauthorized("unknown token".into()))
    }
}

/// Parse `AUTH_TOKENS` (`token:user,token:user`). Malformed entries are
/// skipped.
pub fn parse_token_table(raw: &str) -> HashMap<String, UserId> {
    raw.split(',')
        .filter_map(|entry| {
            let (token, user) = entry.trim().split_once(':')?;
            let (token, user) = (token.trim(), user.trim());
            if token.is_empty() || user.is_empty() {
                tracing::warn!(entry = %entry, "ignoring malformed AUTH_TOKENS entry");
                return None;
            }
            Some((token.to_string(), UserId::new(user)))
        })
        .collect()
}
