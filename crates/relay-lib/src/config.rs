// ============================
// crates/relay-lib/src/config.rs
// ============================
//! Configuration management.
use std::net::SocketAddr;

use anyhow::Result;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

/// Relay settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address
    pub bind_addr: SocketAddr,
    /// Seconds between heartbeat sweeps; every open connection is pinged
    /// each sweep
    pub heartbeat_interval_secs: u64,
    /// Seconds of silence after which a connection is evicted. Equal to the
    /// interval by default, so a silent peer is gone within two sweeps
    pub heartbeat_timeout_secs: u64,
    /// Log level
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:6001".parse().expect("static addr"),
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 30,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from `focusrelay.toml` and `FOCUSRELAY_`-prefixed
    /// environment variables, the latter taking precedence.
    pub fn load() -> Result<Self> {
        Self::load_from("focusrelay.toml")
    }

    /// Load settings from an explicit config file path.
    pub fn load_from(path: &str) -> Result<Self> {
        let settings: Settings = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("FOCUSRELAY_"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject configurations the liveness supervisor cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_secs == 0 {
            anyhow::bail!("heartbeat_interval_secs must be at least 1");
        }
        if self.heartbeat_timeout_secs < self.heartbeat_interval_secs {
            anyhow::bail!(
                "heartbeat_timeout_secs ({}) must be >= heartbeat_interval_secs ({})",
                self.heartbeat_timeout_secs,
                self.heartbeat_interval_secs
            );
        }
        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => anyhow::bail!("invalid log_level: {other}"),
        }
    }
}
