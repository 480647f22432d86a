//! Client configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint of the marketplace backend
    pub rpc_url: String,
    /// Backend service identifier sent with every call
    pub service_id: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Identity provider the sign-in flow is pointed at
    pub identity_provider_url: String,
    /// Requested lifetime of a signed-in identity, in seconds
    pub session_ttl_secs: u64,
    /// Allow the development-only `addUserBalance` faucet
    pub enable_dev_faucet: bool,
}

impl Config {
    /// Configuration with defaults for everything but the endpoint.
    pub fn new(rpc_url: impl Into<String>, service_id: impl Into<String>) -> Self {
        Config {
            rpc_url: rpc_url.into(),
            service_id: service_id.into(),
            request_timeout_secs: 30,
            identity_provider_url: "https://identity.ic0.app".to_string(),
            session_ttl_secs: 7 * 24 * 60 * 60,
            enable_dev_faucet: false,
        }
    }

    /// Load an optional `.env` file, then read the environment.
    pub fn load() -> Result<Self> {
        // A missing .env file is fine.
        let _ = dotenvy::dotenv();
        Self::from_env()
    }

    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: env_var("LEDGER_RPC_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:4943/rpc".to_string()),
            service_id: env_var("LEDGER_SERVICE_ID").map_err(|_| {
                ClientError::Config("LEDGER_SERVICE_ID environment variable is required".to_string())
            })?,
            request_timeout_secs: env_var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ClientError::Config("Invalid REQUEST_TIMEOUT_SECS".to_string()))?,
            identity_provider_url: env_var("IDENTITY_PROVIDER_URL")
                .unwrap_or_else(|_| "https://identity.ic0.app".to_string()),
            session_ttl_secs: env_var("SESSION_TTL_SECS")
                .unwrap_or_else(|_| "604800".to_string())
                .parse()
                .map_err(|_| ClientError::Config("Invalid SESSION_TTL_SECS".to_string()))?,
            enable_dev_faucet: parse_flag(
                &env_var("ENABLE_DEV_FAUCET").unwrap_or_else(|_| "false".to_string()),
            )
            .ok_or_else(|| ClientError::Config("Invalid ENABLE_DEV_FAUCET".to_string()))?,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ClientError::Config(format!("Missing env var: {key}")))
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
