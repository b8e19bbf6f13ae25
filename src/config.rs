//! Runtime configuration shared by construction.
//!
//! Every component receives an `Arc<Config>` instead of reading global state.
//! Configuration files are YAML; every field has a default, so a file only
//! needs to list what it overrides.
//!
//! ```rust
//! use posecast::Config;
//!
//! let config = Config::from_yaml_str("port: 6000\nobject_names: [Head, Pelvis]\n").unwrap();
//! assert_eq!(config.port, 6000);
//! assert_eq!(config.object_count(), 2);
//! assert_eq!(config.protocol_version, posecast::PROTOCOL_VERSION);
//! ```

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::protocol::{DEFAULT_MAX_FRAME_LEN, HEADER_LEN};
use crate::{PosecastError, Result};

/// Protocol version compiled into this build
pub const PROTOCOL_VERSION: &str = "1.0.0";

/// Default TCP port for the server
pub const DEFAULT_PORT: u16 = 5555;

/// Rows buffered in memory between disk flushes
pub const DEFAULT_FLUSH_THRESHOLD: usize = 100;

/// Sampling and dispatch rate
pub const DEFAULT_TICK_HZ: f64 = 50.0;

/// Delay between failed connection attempts
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Version string exchanged during the handshake
    pub protocol_version: String,

    /// Interface the server listens on
    pub bind_address: IpAddr,

    /// Server TCP port (0 lets the OS choose)
    pub port: u16,

    pub retry_backoff_ms: u64,
    pub connect_timeout_ms: u64,
    pub handshake_timeout_ms: u64,

    /// Return to Connecting when a validated connection drops
    pub reconnect_on_loss: bool,

    /// Largest accepted frame in bytes
    pub max_frame_len: usize,

    /// Rows buffered before the writer flushes to disk
    pub flush_threshold: usize,

    /// Tracked objects, in wire and CSV column order
    pub object_names: Vec<String>,

    /// Base directory for recordings
    pub data_dir: PathBuf,

    /// Fixed update rate used to stamp pose samples
    pub tick_hz: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF.as_millis() as u64,
            connect_timeout_ms: 3_000,
            handshake_timeout_ms: 10_000,
            reconnect_on_loss: true,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            object_names: vec!["Head".into(), "LeftHand".into(), "RightHand".into()],
            data_dir: PathBuf::from("data"),
            tick_hz: DEFAULT_TICK_HZ,
        }
    }
}

impl Config {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml_ng::from_str(yaml).map_err(|e| PosecastError::Config {
            details: "invalid YAML".to_string(),
            source: Some(Box::new(e)),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| PosecastError::file_error(path.to_path_buf(), e))?;
        debug!(path = %path.display(), "Loaded configuration");
        Self::from_yaml_str(&yaml)
    }

    /// Serialize to YAML
    pub fn to_yaml_string(&self) -> Result<String> {
        serde_yaml_ng::to_string(self).map_err(|e| PosecastError::Config {
            details: "could not serialize configuration".to_string(),
            source: Some(Box::new(e)),
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.protocol_version.trim().is_empty() {
            return Err(PosecastError::config_error("protocol_version must not be empty"));
        }
        if self.flush_threshold == 0 {
            return Err(PosecastError::config_error("flush_threshold must be at least 1"));
        }
        if !(self.tick_hz.is_finite() && self.tick_hz > 0.0) {
            return Err(PosecastError::config_error(format!(
                "tick_hz must be a positive number, got {}",
                self.tick_hz
            )));
        }
        if self.max_frame_len < HEADER_LEN {
            return Err(PosecastError::config_error(format!(
                "max_frame_len must be at least {} bytes",
                HEADER_LEN
            )));
        }
        if let Some(name) = self.object_names.iter().find(|n| n.trim().is_empty() || n.contains(','))
        {
            return Err(PosecastError::config_error(format!(
                "object name '{}' cannot be used as a CSV column",
                name
            )));
        }
        Ok(())
    }

    pub fn object_count(&self) -> usize {
        self.object_names.len()
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    /// Seconds between two pose samples
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.protocol_version, "1.0.0");
        assert_eq!(config.retry_backoff(), Duration::from_secs(5));
        assert_eq!(config.flush_threshold, 100);
        assert_eq!(config.object_count(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::from_yaml_str(
            "bind_address: 127.0.0.1\nport: 0\nretry_backoff_ms: 250\ndata_dir: /tmp/recordings\n",
        )
        .unwrap();

        assert_eq!(config.listen_addr(), "127.0.0.1:0".parse().unwrap());
        assert_eq!(config.retry_backoff(), Duration::from_millis(250));
        assert_eq!(config.data_dir, PathBuf::from("/tmp/recordings"));
        assert_eq!(config.flush_threshold, DEFAULT_FLUSH_THRESHOLD);
    }

    #[test]
    fn yaml_round_trip() {
        let mut config = Config::default();
        config.object_names = vec!["Head".into()];
        config.reconnect_on_loss = false;

        let yaml = config.to_yaml_string().unwrap();
        assert_eq!(Config::from_yaml_str(&yaml).unwrap(), config);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            Config::from_yaml_str("flush_threshold: 0"),
            Err(PosecastError::Config { .. })
        ));
        assert!(Config::from_yaml_str("tick_hz: -1.0").is_err());
        assert!(Config::from_yaml_str("protocol_version: ''").is_err());
        assert!(Config::from_yaml_str("object_names: ['Left,Hand']").is_err());
        assert!(Config::from_yaml_str("port: [not, a, port]").is_err());
    }
}
