//! Server settings read from `INKWELL_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use inkwell_collab::auth::{AuthError, Identity, StaticTokens};
use inkwell_collab::persistence::FlushConfig;
use inkwell_collab::server::ServerConfig;
use thiserror::Error;

pub const BIND: &str = "INKWELL_BIND";
pub const DATA_DIR: &str = "INKWELL_DATA_DIR";
pub const FLUSH_INTERVAL_SECS: &str = "INKWELL_FLUSH_INTERVAL_SECS";
pub const HEARTBEAT_SECS: &str = "INKWELL_HEARTBEAT_SECS";
pub const MAX_MISSED_PONGS: &str = "INKWELL_MAX_MISSED_PONGS";
pub const TOKENS: &str = "INKWELL_TOKENS";
pub const ALLOW_ANONYMOUS: &str = "INKWELL_ALLOW_ANONYMOUS";
pub const CREATE_MISSING: &str = "INKWELL_CREATE_MISSING";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: expected {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("INKWELL_TOKENS: {0}")]
    Tokens(#[from] AuthError),
}

pub struct Settings {
    pub server: ServerConfig,
    pub tokens: StaticTokens,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key lookup. Unset or blank keys keep the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };
        let mut server = ServerConfig::default();

        if let Some(bind) = get(BIND) {
            server.bind_addr = bind;
        }
        if let Some(dir) = get(DATA_DIR) {
            server.storage_path = Some(PathBuf::from(dir));
        }
        if let Some(raw) = get(FLUSH_INTERVAL_SECS) {
            server.flush = FlushConfig {
                interval: Duration::from_secs(parse_positive(FLUSH_INTERVAL_SECS, &raw)?),
            };
        }
        if let Some(raw) = get(HEARTBEAT_SECS) {
            server.heartbeat_interval = Duration::from_secs(parse_positive(HEARTBEAT_SECS, &raw)?);
        }
        if let Some(raw) = get(MAX_MISSED_PONGS) {
            server.max_missed_pongs = parse_positive(MAX_MISSED_PONGS, &raw)? as u32;
        }
        if let Some(raw) = get(CREATE_MISSING) {
            server.create_missing_documents = parse_flag(CREATE_MISSING, &raw)?;
        }

        let mut tokens = match get(TOKENS) {
            Some(raw) => StaticTokens::parse(&raw)?,
            None => StaticTokens::new(),
        };
        if let Some(raw) = get(ALLOW_ANONYMOUS) {
            if parse_flag(ALLOW_ANONYMOUS, &raw)? {
                tokens = tokens.allow_anonymous(Identity::new(0, "anonymous"));
            }
        }

        Ok(Self { server, tokens })
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(value) if value > 0 && value <= u64::from(u32::MAX) => Ok(value),
        _ => Err(ConfigError::Invalid {
            key,
            expected: "a positive integer",
            value: raw.to_string(),
        }),
    }
}

fn parse_flag(key: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            expected: "a boolean",
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell_collab::auth::CredentialCheck;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_env() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.server.bind_addr, "127.0.0.1:9090");
        assert!(settings.server.storage_path.is_none());
        assert!(settings.tokens.is_empty());
        assert!(settings.tokens.check_credential(None).is_err());
    }

    #[test]
    fn test_overrides() {
        let settings = settings(&[
            (BIND, "0.0.0.0:8000"),
            (DATA_DIR, "/var/lib/inkwell"),
            (FLUSH_INTERVAL_SECS, "10"),
            (HEARTBEAT_SECS, " 15 "),
            (MAX_MISSED_PONGS, "4"),
            (CREATE_MISSING, "yes"),
            (TOKENS, "t1:1:alice,t2:2:bob"),
        ])
        .unwrap();
        assert_eq!(settings.server.bind_addr, "0.0.0.0:8000");
        assert_eq!(settings.server.storage_path, Some(PathBuf::from("/var/lib/inkwell")));
        assert_eq!(settings.server.flush.interval, Duration::from_secs(10));
        assert_eq!(settings.server.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(settings.server.max_missed_pongs, 4);
        assert!(settings.server.create_missing_documents);
        assert_eq!(settings.tokens.len(), 2);
    }

    #[test]
    fn test_blank_values_keep_defaults() {
        let settings = settings(&[(BIND, "  "), (HEARTBEAT_SECS, "")]).unwrap();
        assert_eq!(settings.server.bind_addr, "127.0.0.1:9090");
        assert_eq!(settings.server.heartbeat_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            settings(&[(HEARTBEAT_SECS, "0")]),
            Err(ConfigError::Invalid { key: HEARTBEAT_SECS, .. })
        ));
        assert!(matches!(
            settings(&[(ALLOW_ANONYMOUS, "maybe")]),
            Err(ConfigError::Invalid { key: ALLOW_ANONYMOUS, .. })
        ));
        assert!(matches!(
            settings(&[(TOKENS, "broken")]),
            Err(ConfigError::Tokens(_))
        ));
    }

    #[test]
    fn test_anonymous_access() {
        let settings = settings(&[(ALLOW_ANONYMOUS, "true")]).unwrap();
        assert_eq!(
            settings.tokens.check_credential(None),
            Ok(Identity::new(0, "anonymous"))
        );
    }
}
