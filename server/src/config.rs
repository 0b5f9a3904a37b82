//! Server configuration.
//!
//! Loaded from environment variables, with CLI flags (see the `cli` crate)
//! taking precedence when set.

use std::env;
use std::net::SocketAddr;

use anyhow::{Context, Result};

/// Signaling server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host, e.g. `0.0.0.0`.
    pub host: String,
    /// Bind port, e.g. `3000`.
    pub port: u16,
}

impl Config {
    /// Load from environment variables, falling back to sensible defaults.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("VOICESYNC_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("VOICESYNC_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(3000),
        })
    }

    /// Override with explicit values, e.g. from CLI flags.
    #[must_use]
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port;
        }
        self
    }

    pub fn bind_address(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("invalid bind address")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
        }
    }
}
