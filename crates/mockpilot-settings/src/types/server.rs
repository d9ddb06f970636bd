//! Network-facing settings: listener, WebSocket keepalive, auth, logging.

use std::time::Duration;

use mockpilot_core::logging::LogFormat;
use serde::{Deserialize, Serialize};

/// HTTP / WebSocket listener settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port.
    pub port: u16,
    /// Interval between server-initiated WebSocket pings.
    pub ws_ping_interval_ms: u64,
    /// Disconnect a client that has not answered a ping for this long.
    pub ws_pong_timeout_ms: u64,
    /// How long draining connections may keep flushing on shutdown.
    pub drain_grace_ms: u64,
    /// Upper bound for aborting leftover tasks after the drain.
    pub shutdown_timeout_ms: u64,
    /// Largest accepted body on the HTTP bus ingress, and largest inbound WebSocket frame.
    pub max_frame_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            ws_ping_interval_ms: 25_000,
            ws_pong_timeout_ms: 60_000,
            drain_grace_ms: 5_000,
            shutdown_timeout_ms: 10_000,
            max_frame_bytes: 1_048_576,
        }
    }
}

impl ServerSettings {
    /// `host:port` for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Ping cadence.
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ws_ping_interval_ms)
    }

    /// Pong deadline.
    #[must_use]
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.ws_pong_timeout_ms)
    }

    /// Drain grace.
    #[must_use]
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Task abort deadline.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Credential verification settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Shared HMAC secret for session tokens.
    pub jwt_secret: String,
    /// `HS256`, `HS384`, or `HS512`.
    pub jwt_algorithm: String,
    /// Expected `iss` claim, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Clock skew tolerance for `exp`.
    pub leeway_secs: u64,
}

/// Secret shipped in defaults; the relay warns when it is still in use.
pub const DEV_JWT_SECRET: &str = "mockpilot-dev-secret";

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: DEV_JWT_SECRET.to_string(),
            jwt_algorithm: "HS256".to_string(),
            issuer: None,
            leeway_secs: 30,
        }
    }
}

impl AuthSettings {
    /// True when the compiled-in development secret is active.
    #[must_use]
    pub fn uses_dev_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
