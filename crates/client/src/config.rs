//! Environment-driven configuration for the monitoring transports.

use std::time::Duration;

/// Connection settings for the WebSocket transport.
///
/// All fields have defaults suitable for local development; override
/// via environment variables through [`MonitorConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// `ws` or `wss`, mirroring the page scheme of the hosting UI.
    pub scheme: String,
    pub host: String,
    /// Backend WebSocket port (default: `8000`).
    pub port: u16,
    /// Keepalive cadence while connected (default: 30s).
    pub heartbeat_interval: Duration,
    /// Fixed delay between reconnect attempts (default: 3s).
    pub reconnect_delay: Duration,
    /// Abnormal closes tolerated before giving up (default: `5`).
    pub max_reconnect_attempts: u32,
}

impl ConnectionConfig {
    /// WebSocket address for one execution's progress stream.
    pub fn ws_endpoint(&self, execution_id: &str) -> String {
        format!(
            "{}://{}:{}/ws/test-execution/{}",
            self.scheme, self.host, self.port, execution_id
        )
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            scheme: "ws".into(),
            host: "localhost".into(),
            port: 8000,
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(3),
            max_reconnect_attempts: 5,
        }
    }
}

/// Settings for the HTTP polling watcher.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between status fetches (default: 2s).
    pub interval: Duration,
    /// Successful fetches allowed before timing out (default: `30`).
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(2000),
            max_attempts: 30,
        }
    }
}

/// Full transport configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub connection: ConnectionConfig,
    pub poll: PollConfig,
    /// Base URL of the REST API (default: `http://localhost:8000/api`).
    pub api_base_url: String,
}

impl MonitorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                  |
    /// |--------------------------|--------------------------|
    /// | `WS_SCHEME`              | `ws`                     |
    /// | `WS_HOST`                | `localhost`              |
    /// | `WS_PORT`                | `8000`                   |
    /// | `HEARTBEAT_INTERVAL_SECS`| `30`                     |
    /// | `RECONNECT_DELAY_MS`     | `3000`                   |
    /// | `MAX_RECONNECT_ATTEMPTS` | `5`                      |
    /// | `POLL_INTERVAL_MS`       | `2000`                   |
    /// | `POLL_MAX_ATTEMPTS`      | `30`                     |
    /// | `API_BASE_URL`           | `http://localhost:8000/api` |
    pub fn from_env() -> Self {
        let scheme = std::env::var("WS_SCHEME").unwrap_or_else(|_| "ws".into());
        let host = std::env::var("WS_HOST").unwrap_or_else(|_| "localhost".into());

        let port: u16 = std::env::var("WS_PORT")
            .unwrap_or_else(|_| "8000".into())
            .parse()
            .expect("WS_PORT must be a valid u16");

        let heartbeat_secs: u64 = std::env::var("HEARTBEAT_INTERVAL_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("HEARTBEAT_INTERVAL_SECS must be a valid u64");

        let reconnect_delay_ms: u64 = std::env::var("RECONNECT_DELAY_MS")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("RECONNECT_DELAY_MS must be a valid u64");

        let max_reconnect_attempts: u32 = std::env::var("MAX_RECONNECT_ATTEMPTS")
            .unwrap_or_else(|_| "5".into())
            .parse()
            .expect("MAX_RECONNECT_ATTEMPTS must be a valid u32");

        let poll_interval_ms: u64 = std::env::var("POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "2000".into())
            .parse()
            .expect("POLL_INTERVAL_MS must be a valid u64");

        let poll_max_attempts: u32 = std::env::var("POLL_MAX_ATTEMPTS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("POLL_MAX_ATTEMPTS must be a valid u32");

        let api_base_url =
            std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:8000/api".into());

        Self {
            connection: ConnectionConfig {
                scheme,
                host,
                port,
                heartbeat_interval: Duration::from_secs(heartbeat_secs),
                reconnect_delay: Duration::from_millis(reconnect_delay_ms),
                max_reconnect_attempts,
            },
            poll: PollConfig {
                interval: Duration::from_millis(poll_interval_ms),
                max_attempts: poll_max_attempts,
            },
            api_base_url,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            poll: PollConfig::default(),
            api_base_url: "http://localhost:8000/api".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_endpoint_includes_execution_id() {
        let config = ConnectionConfig::default();
        assert_eq!(
            config.ws_endpoint("abc-123"),
            "ws://localhost:8000/ws/test-execution/abc-123"
        );
    }

    #[test]
    fn ws_endpoint_respects_secure_scheme() {
        let config = ConnectionConfig {
            scheme: "wss".into(),
            host: "qa.example.com".into(),
            port: 443,
            ..Default::default()
        };
        assert_eq!(
            config.ws_endpoint("e1"),
            "wss://qa.example.com:443/ws/test-execution/e1"
        );
    }
}
