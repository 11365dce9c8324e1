//! Credential check at the WebSocket handshake.
//!
//! Token issuance lives outside this crate; the server only asks a
//! [`CredentialCheck`] to turn the `token` query parameter into an
//! identity or a rejection.

use std::collections::HashMap;

use thiserror::Error;

use crate::protocol::UserId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credential")]
    Missing,
    #[error("credential rejected")]
    Rejected,
    #[error("invalid token table entry: {0}")]
    InvalidEntry(String),
}

pub trait CredentialCheck: Send + Sync {
    fn check_credential(&self, token: Option<&str>) -> Result<Identity, AuthError>;
}

/// Fixed token table, e.g. loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Identity>,
    anonymous: Option<Identity>,
}

impl StaticTokens {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }

    /// Let connections without a token in as `identity`. Presented but
    /// unknown tokens are still rejected.
    pub fn allow_anonymous(mut self, identity: Identity) -> Self {
        self.anonymous = Some(identity);
        self
    }

    /// Parse `token:user_id:username` entries separated by commas.
    pub fn parse(spec: &str) -> Result<Self, AuthError> {
        let mut table = Self::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let mut parts = entry.splitn(3, ':');
            let (Some(token), Some(user_id), Some(username)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return Err(AuthError::InvalidEntry(entry.to_string()));
            };
            let user_id = user_id
                .parse()
                .map_err(|_| AuthError::InvalidEntry(entry.to_string()))?;
            table = table.with_token(token, Identity::new(user_id, username));
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl CredentialCheck for StaticTokens {
    fn check_credential(&self, token: Option<&str>) -> Result<Identity, AuthError> {
        match token.filter(|t| !t.is_empty()) {
            Some(token) => self.tokens.get(token).cloned().ok_or(AuthError::Rejected),
            None => self.anonymous.clone().ok_or(AuthError::Missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_table() {
        let table = StaticTokens::parse("abc:1:alice, def:2:bob").unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.check_credential(Some("def")),
            Ok(Identity::new(2, "bob"))
        );
        assert_eq!(table.check_credential(Some("zzz")), Err(AuthError::Rejected));
        assert_eq!(table.check_credential(None), Err(AuthError::Missing));
    }

    #[test]
    fn test_parse_rejects_bad_entries() {
        assert!(StaticTokens::parse("abc:notanumber:alice").is_err());
        assert!(StaticTokens::parse("abc:1").is_err());
        assert!(StaticTokens::parse("").unwrap().is_empty());
    }

    #[test]
    fn test_anonymous_only_without_token() {
        let table = StaticTokens::new().allow_anonymous(Identity::new(0, "guest"));
        assert_eq!(table.check_credential(None), Ok(Identity::new(0, "guest")));
        assert_eq!(table.check_credential(Some("")), Ok(Identity::new(0, "guest")));
        assert_eq!(table.check_credential(Some("forged")), Err(AuthError::Rejected));
    }
}
