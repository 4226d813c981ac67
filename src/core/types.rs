use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Configuration for a CWP client connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host name or IP address of the CWP server
    pub address: String,
    /// TCP port of the CWP server
    pub port: u16,
    /// Frequency requested when connecting
    pub frequency: i32,
    /// Upper bound on establishing the TCP connection
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub connect_timeout: Duration,
    /// How often the line-up watchdog checks a held line
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub watchdog_period: Duration,
    /// Hold duration after which the watchdog forces a down/up cycle
    #[serde(serialize_with = "super::serde::serialize_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_millis")]
    pub line_up_limit: Duration,
    /// Disable Nagle's algorithm on the stream
    pub tcp_nodelay: bool,
    /// TCP keepalive idle time, `None` leaves the OS default
    #[serde(serialize_with = "super::serde::serialize_opt_millis")]
    #[serde(deserialize_with = "super::serde::deserialize_opt_millis")]
    pub tcp_keepalive: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            address: "127.0.0.1".to_string(),
            port: super::DEFAULT_PORT,
            frequency: super::DEFAULT_FREQUENCY,
            connect_timeout: Duration::from_secs(5),
            watchdog_period: Duration::from_secs(16),
            line_up_limit: Duration::from_secs(30),
            tcp_nodelay: true,
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl ClientConfig {
    /// Checks that the configuration can drive a connection
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(Error::config("Connect timeout must be non-zero"));
        }
        if self.watchdog_period.is_zero() {
            return Err(Error::config("Watchdog period must be non-zero"));
        }
        // The forced line-down carries the hold time in a 2-byte field.
        if self.line_up_limit.as_millis() > i16::MAX as u128 {
            return Err(Error::config(format!(
                "Line-up limit of {} ms does not fit a 2-byte payload",
                self.line_up_limit.as_millis()
            )));
        }
        Ok(())
    }

    /// Returns the `host:port` string used to dial the server
    pub fn endpoint(&self) -> String {
        endpoint(&self.address, self.port)
    }
}

/// Joins an address and a port into the string handed to the resolver
pub fn endpoint(address: &str, port: u16) -> String {
    format!("{}:{}", address, port)
}
