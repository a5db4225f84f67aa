//! Connection settings.
//!
//! [`ClientConfig`] holds everything needed to open and drive a session.
//! It deserializes from any serde format so callers can load it from a file
//! or environment layer; durations are written as integer milliseconds.
//!
//! ```
//! use routeros_client::ClientConfig;
//!
//! let config: ClientConfig = serde_json::from_str(
//!     r#"{ "host": "10.0.0.1", "request_timeout_ms": 5000 }"#,
//! ).unwrap();
//!
//! assert_eq!(config.port, 8728);
//! assert_eq!(config.request_timeout.as_secs(), 5);
//! ```

use std::fmt;
use std::net::Ipv6Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::protocol::DEFAULT_MAX_WORD_SIZE;

/// Default plain-text API port.
pub const DEFAULT_PORT: u16 = 8728;

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default deadline for a command to reach a terminal reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for monitor-style commands.
pub const DEFAULT_MONITOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for one router connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Router host name or address.
    pub host: String,
    /// API port.
    pub port: u16,
    #[serde(rename = "connect_timeout_ms", with = "millis")]
    pub connect_timeout: Duration,
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    #[serde(rename = "monitor_timeout_ms", with = "millis")]
    pub monitor_timeout: Duration,
    /// Attach `.tag=<n>` to every command and drop replies for other tags.
    pub tag_requests: bool,
    /// Largest word accepted from the router.
    pub max_word_size: u32,
}

impl ClientConfig {
    /// Config for `host` with every other field at its default.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// `host:port` string for connecting. Bare IPv6 addresses are bracketed.
    pub fn address(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Deadline that applies to `command`.
    pub fn timeout_for(&self, command: &Command) -> Duration {
        command.timeout_override().unwrap_or(if command.is_monitor() {
            self.monitor_timeout
        } else {
            self.request_timeout
        })
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "192.168.88.1".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            monitor_timeout: DEFAULT_MONITOR_TIMEOUT,
            tag_requests: true,
            max_word_size: DEFAULT_MAX_WORD_SIZE,
        }
    }
}

/// Username and password kept for automatic re-login.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().min(u64::MAX as u128) as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
