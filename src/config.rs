//! Runtime configuration of a component.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::port::DEFAULT_CONNECT_TIMEOUT;
use crate::transport::DEFAULT_READ_CHUNK;

/// Default first interval of the liveness timer.
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(1);

/// Settings of one component process.
///
/// Loaded from JSON or built with the `with_*` setters. Missing JSON fields
/// take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Address of the main controller.
    pub mc_address: Option<SocketAddr>,
    /// Local address for listening port sockets. Defaults to the local
    /// address of the control connection.
    pub bind_address: Option<IpAddr>,
    /// Connect timeout in milliseconds, for the control channel and
    /// inet-stream ports.
    pub connect_timeout_ms: u64,
    /// First liveness interval in milliseconds.
    pub liveness_interval_ms: u64,
    /// Maximum bytes per socket read.
    pub read_chunk_size: usize,
    pub tcp_nodelay: bool,
    /// Whether a PTC survives the end of its behaviour function.
    pub alive: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mc_address: None,
            bind_address: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            liveness_interval_ms: DEFAULT_LIVENESS_INTERVAL.as_millis() as u64,
            read_chunk_size: DEFAULT_READ_CHUNK,
            tcp_nodelay: true,
            alive: false,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_mc_address(mut self, address: SocketAddr) -> Self {
        self.mc_address = Some(address);
        self
    }

    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = Some(address);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }

    pub fn with_tcp_nodelay(mut self, nodelay: bool) -> Self {
        self.tcp_nodelay = nodelay;
        self
    }

    pub fn with_alive(mut self, alive: bool) -> Self {
        self.alive = alive;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_partial() {
        let config =
            RuntimeConfig::from_json(r#"{"mc_address": "127.0.0.1:9000", "alive": true}"#).unwrap();
        assert_eq!(config.mc_address, Some("127.0.0.1:9000".parse().unwrap()));
        assert!(config.alive);
        assert_eq!(config.read_chunk_size, DEFAULT_READ_CHUNK);
        assert_eq!(config.connect_timeout(), DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = RuntimeConfig::from_json(r#"{"mc_address": 5}"#).unwrap_err();
        assert!(matches!(err, crate::error::LinkError::Json(_)));
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::new()
            .with_liveness_interval(Duration::from_millis(250))
            .with_tcp_nodelay(false);
        assert_eq!(config.liveness_interval(), Duration::from_millis(250));
        assert!(!config.tcp_nodelay);
    }
}
