//! Environment-backed configuration for the smoke binary.

use std::{env, error::Error, fmt};

use chat_core::retry::ReconnectPolicy;

const DEFAULT_WS_URL: &str = "ws://localhost:8080/ws";
const DEFAULT_API_URL: &str = "http://localhost:8080";
const DEFAULT_USER_ID: &str = "smoke-user";
const DEFAULT_ROOM_ID: u64 = 1;

/// Runtime configuration for one smoke run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeConfig {
    /// WebSocket endpoint of the STOMP broker.
    pub ws_url: String,
    /// Base URL of the REST API.
    pub api_base_url: String,
    /// Acting user ID.
    pub user_id: String,
    /// Optional bearer token for REST and the broker handshake.
    pub access_token: Option<String>,
    /// Room to open.
    pub room_id: u64,
    /// Optional message to publish after opening the room.
    pub message: Option<String>,
    /// Reconnect delay override in milliseconds.
    pub reconnect_delay_ms: Option<u64>,
    /// Heartbeat interval override in milliseconds.
    pub heartbeat_interval_ms: Option<u64>,
}

impl SmokeConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let ws_url = optional_trimmed_env("CHAT_WS_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_WS_URL.to_owned());
        let api_base_url = optional_trimmed_env("CHAT_API_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_API_URL.to_owned());
        let user_id = optional_trimmed_env("CHAT_USER", &mut lookup)
            .unwrap_or_else(|| DEFAULT_USER_ID.to_owned());
        let access_token = optional_trimmed_env("CHAT_TOKEN", &mut lookup);
        let message = optional_trimmed_env("CHAT_SMOKE_MESSAGE", &mut lookup);

        let room_id =
            parse_optional_u64("CHAT_ROOM_ID", &mut lookup)?.unwrap_or(DEFAULT_ROOM_ID);
        if room_id == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_ROOM_ID",
                value: "0".to_owned(),
                reason: "must be at least 1".to_owned(),
            });
        }

        let reconnect_delay_ms = parse_optional_u64("CHAT_RECONNECT_DELAY_MS", &mut lookup)?;
        let heartbeat_interval_ms = parse_optional_u64("CHAT_HEARTBEAT_INTERVAL_MS", &mut lookup)?;

        Ok(Self {
            ws_url,
            api_base_url,
            user_id,
            access_token,
            room_id,
            message,
            reconnect_delay_ms,
            heartbeat_interval_ms,
        })
    }

    /// Reconnect policy with any overrides applied.
    pub fn policy(&self) -> ReconnectPolicy {
        let defaults = ReconnectPolicy::default();
        match (self.reconnect_delay_ms, self.heartbeat_interval_ms) {
            (None, None) => defaults,
            (reconnect, heartbeat) => ReconnectPolicy::new(
                reconnect.unwrap_or_else(|| defaults.reconnect_delay().as_millis() as u64),
                heartbeat.unwrap_or_else(|| defaults.heartbeat_interval().as_millis() as u64),
            ),
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<SmokeConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        SmokeConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn applies_defaults_for_empty_environment() {
        let cfg = config_from_pairs(&[]).expect("empty environment should parse");
        assert_eq!(cfg.ws_url, DEFAULT_WS_URL);
        assert_eq!(cfg.api_base_url, DEFAULT_API_URL);
        assert_eq!(cfg.user_id, DEFAULT_USER_ID);
        assert_eq!(cfg.room_id, DEFAULT_ROOM_ID);
        assert_eq!(cfg.access_token, None);
        assert_eq!(cfg.message, None);
    }

    #[test]
    fn parses_overrides() {
        let cfg = config_from_pairs(&[
            ("CHAT_WS_URL", "wss://chat.example.org/ws"),
            ("CHAT_API_URL", "https://chat.example.org"),
            ("CHAT_USER", "alice"),
            ("CHAT_TOKEN", "tok"),
            ("CHAT_ROOM_ID", "42"),
            ("CHAT_RECONNECT_DELAY_MS", "1000"),
            ("CHAT_HEARTBEAT_INTERVAL_MS", "2000"),
        ])
        .expect("config should parse");

        assert_eq!(cfg.ws_url, "wss://chat.example.org/ws");
        assert_eq!(cfg.user_id, "alice");
        assert_eq!(cfg.access_token.as_deref(), Some("tok"));
        assert_eq!(cfg.room_id, 42);

        let policy = cfg.policy();
        assert_eq!(policy.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(policy.heartbeat_interval(), Duration::from_secs(2));
    }

    #[test]
    fn rejects_room_id_zero() {
        let err = config_from_pairs(&[("CHAT_ROOM_ID", "0")])
            .expect_err("room id zero should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_ROOM_ID",
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_numeric_room_id() {
        let err = config_from_pairs(&[("CHAT_ROOM_ID", "abc")])
            .expect_err("non-numeric room id should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_ROOM_ID",
                ..
            }
        ));
    }
}
