//! Tracing subscriber setup for binaries embedding posecast

use tracing_subscriber::EnvFilter;

use crate::{PosecastError, Result};

/// Install a formatted `tracing` subscriber
///
/// `RUST_LOG` takes precedence over `default_filter` (for example
/// `"posecast=info"`). Fails if a global subscriber is already installed.
pub fn init_logging(default_filter: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter).map_err(|e| PosecastError::Config {
            details: format!("invalid log filter '{}'", default_filter),
            source: Some(Box::new(e)),
        })?,
    };

    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().map_err(|e| {
        PosecastError::Config { details: "logging already initialised".to_string(), source: Some(e) }
    })
}
