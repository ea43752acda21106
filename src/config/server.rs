//! Server configuration types.
//!
//! Listener address and port, worker threads, client IP trust and the
//! process-wide requests-per-second shield.
//!
//! Default values are sourced from `crate::constants`.

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_PORT, DEFAULT_THREADS};

fn default_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

// Default worker thread count
fn default_threads() -> usize {
    DEFAULT_THREADS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_address")]
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Worker threads of the HTTP service (default: 4)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Take the client IP from `X-Forwarded-For` instead of the socket peer.
    /// Only enable behind a proxy that overwrites the header.
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Process-wide requests-per-second ceiling; unset disables it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_rps: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
            threads: default_threads(),
            trust_forwarded_for: false,
            global_rps: None,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.address.is_empty() {
            return Err("server.address cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err("server.port must be greater than 0".to_string());
        }
        if self.threads == 0 {
            return Err("server.threads must be greater than 0".to_string());
        }
        if self.global_rps == Some(0) {
            return Err("server.global_rps must be greater than 0 when set".to_string());
        }
        Ok(())
    }
}
