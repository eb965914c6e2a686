//! Engine configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) yields a
//! working configuration against the public mainnet endpoint.

use crate::error::GateError;
use crate::eval::NativeUnit;
use crate::social::RetryConfig;
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default JSON-RPC endpoint.
pub const DEFAULT_RPC_URL: &str = "https://rpc.mainnet.lukso.network";

/// Default follower registry (LSP26).
pub const DEFAULT_FOLLOWER_REGISTRY: &str = "0xf01103E5a9909Fc0DBe8166dA7085e0285daDDcA";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    pub rpc_url: String,
    /// Upper bound for every HTTP call, in seconds.
    pub call_timeout_secs: u64,
    pub follower_registry: Address,
    pub native_symbol: String,
    pub native_decimals: u32,
    pub social_retry: RetryConfig,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            call_timeout_secs: 12,
            follower_registry: DEFAULT_FOLLOWER_REGISTRY.parse().unwrap_or_default(),
            native_symbol: "LYX".to_string(),
            native_decimals: 18,
            social_retry: RetryConfig::default(),
        }
    }
}

impl GateConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, GateError> {
        let config: GateConfig =
            toml::from_str(s).map_err(|e| GateError::Config(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, GateError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("can't read {}: {e}", path.display())))?;
        let config = Self::from_toml_str(&raw)?;
        tracing::debug!(path = %path.display(), rpc_url = %config.rpc_url, "Loaded config");
        Ok(config)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn native_unit(&self) -> NativeUnit {
        NativeUnit {
            symbol: self.native_symbol.clone(),
            decimals: self.native_decimals,
        }
    }

    fn validate(&self) -> Result<(), GateError> {
        if self.rpc_url.trim().is_empty() {
            return Err(GateError::Config("rpc_url must not be empty".into()));
        }
        if self.call_timeout_secs == 0 {
            return Err(GateError::Config("call_timeout_secs must be positive".into()));
        }
        if self.social_retry.attempts == 0 {
            return Err(GateError::Config("social_retry.attempts must be at least 1".into()));
        }
        Ok(())
    }
}
