//! Client configuration from environment variables.

use std::time::Duration;

use pokerroom_shared::SyncError;
use url::Url;

use crate::ws::{Backoff, ReconnectConfig};

/// Runtime settings for a [`RoomClient`](crate::RoomClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base of the session endpoint, e.g. `wss://poker.example.com`.
    pub base_url: String,
    pub reconnect: ReconnectConfig,
    /// How often a running countdown is resampled.
    pub tick_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "ws://localhost:8000".to_string(),
            reconnect: ReconnectConfig::default(),
            tick_interval: Duration::from_millis(1000),
        }
    }
}

impl ClientConfig {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `POKERROOM_WS_URL`: session endpoint base (default: "ws://localhost:8000")
    /// - `POKERROOM_RECONNECT_ATTEMPTS`: reconnection bound (default: 3)
    /// - `POKERROOM_RECONNECT_DELAY_MS`: base retry delay (default: 2000)
    /// - `POKERROOM_RECONNECT_MAX_DELAY_MS`: cap for growing delays (default: 30000)
    /// - `POKERROOM_RECONNECT_BACKOFF`: "fixed" | "linear" | "exponential" (default: "fixed")
    /// - `POKERROOM_TICK_MS`: countdown sampling interval (default: 1000)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    /// Unparseable values fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let number = |key: &str, default: u64| -> u64 {
            lookup(key)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        };

        let backoff = match lookup("POKERROOM_RECONNECT_BACKOFF")
            .unwrap_or_default()
            .trim()
            .to_lowercase()
            .as_str()
        {
            "linear" => Backoff::Linear,
            "exponential" => Backoff::Exponential {
                multiplier: Backoff::DEFAULT_MULTIPLIER,
            },
            _ => Backoff::Fixed,
        };

        let reconnect = ReconnectConfig {
            max_attempts: number(
                "POKERROOM_RECONNECT_ATTEMPTS",
                u64::from(defaults.reconnect.max_attempts),
            )
            .min(u64::from(u32::MAX)) as u32,
            initial_delay_ms: number(
                "POKERROOM_RECONNECT_DELAY_MS",
                defaults.reconnect.initial_delay_ms,
            ),
            max_delay_ms: number(
                "POKERROOM_RECONNECT_MAX_DELAY_MS",
                defaults.reconnect.max_delay_ms,
            ),
            backoff,
        };

        Self {
            base_url: lookup("POKERROOM_WS_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.base_url),
            reconnect,
            tick_interval: Duration::from_millis(number("POKERROOM_TICK_MS", 1000).max(1)),
        }
    }
}

/// Where a room session lives, plus the optional bearer credential.
#[derive(Clone, PartialEq, Eq)]
pub struct RoomEndpoint {
    base: String,
    room: String,
    credential: Option<String>,
}

impl RoomEndpoint {
    /// Validate `base` (must be a `ws` or `wss` URL) and `room`.
    /// An empty credential is treated as an anonymous join.
    pub fn new(base: &str, room: &str, credential: Option<&str>) -> Result<Self, SyncError> {
        let parsed = Url::parse(base.trim())
            .map_err(|e| SyncError::InvalidEndpoint(format!("{base}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(SyncError::InvalidEndpoint(format!(
                "{base}: expected a ws:// or wss:// URL"
            )));
        }
        if parsed.query().is_some() {
            return Err(SyncError::InvalidEndpoint(format!(
                "{base}: base URL must not carry a query"
            )));
        }
        let room = room.trim();
        if room.is_empty() {
            return Err(SyncError::InvalidEndpoint("room code is empty".to_string()));
        }

        Ok(Self {
            base: parsed.as_str().trim_end_matches('/').to_string(),
            room: room.to_string(),
            credential: credential
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
        })
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn has_credential(&self) -> bool {
        self.credential.is_some()
    }

    /// The URL to open, credential included.
    pub fn url(&self) -> String {
        let mut url = self.path();
        if let Some(token) = &self.credential {
            url.push_str("?token=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }

    /// The URL with the credential masked, for logs.
    pub fn redacted(&self) -> String {
        let mut url = self.path();
        if self.credential.is_some() {
            url.push_str("?token=***");
        }
        url
    }

    fn path(&self) -> String {
        format!("{}/ws/rooms/{}/", self.base, urlencoding::encode(&self.room))
    }
}

impl std::fmt::Debug for RoomEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomEndpoint")
            .field("url", &self.redacted())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn endpoint_with_and_without_credential() {
        let anon = RoomEndpoint::new("ws://localhost:8000/", "QX7P", None).unwrap();
        assert_eq!(anon.url(), "ws://localhost:8000/ws/rooms/QX7P/");
        assert!(!anon.has_credential());

        let authed = RoomEndpoint::new("wss://poker.example.com", "QX7P", Some("a b&c")).unwrap();
        assert_eq!(
            authed.url(),
            "wss://poker.example.com/ws/rooms/QX7P/?token=a%20b%26c"
        );
        assert_eq!(
            authed.redacted(),
            "wss://poker.example.com/ws/rooms/QX7P/?token=***"
        );
        assert!(!format!("{authed:?}").contains("a b&c"));
    }

    #[test]
    fn room_code_is_a_single_path_segment() {
        let endpoint = RoomEndpoint::new("ws://h", "../admin?x", None).unwrap();
        assert_eq!(endpoint.url(), "ws://h/ws/rooms/..%2Fadmin%3Fx/");
    }

    #[test]
    fn empty_credential_is_anonymous() {
        let endpoint = RoomEndpoint::new("ws://h", "R1", Some("  ")).unwrap();
        assert!(!endpoint.has_credential());
        assert_eq!(endpoint.url(), "ws://h/ws/rooms/R1/");
    }

    #[test]
    fn rejects_bad_bases_and_rooms() {
        assert!(matches!(
            RoomEndpoint::new("http://h", "R1", None),
            Err(SyncError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            RoomEndpoint::new("not a url", "R1", None),
            Err(SyncError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            RoomEndpoint::new("ws://h?x=1", "R1", None),
            Err(SyncError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            RoomEndpoint::new("ws://h", " ", None),
            Err(SyncError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn config_defaults() {
        let config = ClientConfig::from_lookup(|_| None);
        assert_eq!(config.base_url, "ws://localhost:8000");
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.initial_delay_ms, 2000);
        assert_eq!(config.reconnect.backoff, Backoff::Fixed);
        assert_eq!(config.tick_interval, Duration::from_secs(1));
    }

    #[test]
    fn config_overrides_and_lenient_parsing() {
        let vars: HashMap<&str, &str> = [
            ("POKERROOM_WS_URL", "wss://poker.example.com"),
            ("POKERROOM_RECONNECT_ATTEMPTS", "5"),
            ("POKERROOM_RECONNECT_DELAY_MS", "soon"),
            ("POKERROOM_RECONNECT_BACKOFF", "Exponential"),
            ("POKERROOM_TICK_MS", "250"),
        ]
        .into_iter()
        .collect();

        let config = ClientConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.base_url, "wss://poker.example.com");
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.initial_delay_ms, 2000);
        assert!(matches!(config.reconnect.backoff, Backoff::Exponential { .. }));
        assert_eq!(config.tick_interval, Duration::from_millis(250));
    }
}
