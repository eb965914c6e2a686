//! Follower graph lookups.
//!
//! The registry is an external read-only contract; `RegistryClient` talks
//! to it through `ChainRpc` and retries transport failures with
//! exponential backoff. Reverts are not retried: asking again will not
//! change the answer.

use crate::abi;
use crate::amount::saturating_u64;
use crate::error::{GateError, RpcError};
use crate::rpc::ChainRpc;
use async_trait::async_trait;
use ethers_core::abi::Token;
use ethers_core::types::{Address, Bytes};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait SocialGraph: Send + Sync {
    /// Number of accounts following `subject`.
    async fn follower_count(&self, subject: Address) -> Result<u64, GateError>;

    /// Number of accounts `subject` follows.
    async fn following_count(&self, subject: Address) -> Result<u64, GateError>;

    /// Whether `follower` follows `target`.
    async fn is_following(&self, follower: Address, target: Address) -> Result<bool, GateError>;
}

/// Backoff schedule for registry reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_delay_ms: 250,
            max_delay_ms: 2_000,
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay after `delay`, with up to 25% jitter, capped at `max_delay_ms`.
    fn next_delay(&self, delay: Duration) -> Duration {
        let base = delay.as_millis() as f64 * self.backoff_factor;
        let jitter_max = (delay.as_millis() as u64) / 4;
        let jitter = if jitter_max == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_max)
        };
        Duration::from_millis((base as u64 + jitter).min(self.max_delay_ms))
    }
}

/// Client for an LSP26-style follower registry contract.
pub struct RegistryClient {
    rpc: Arc<dyn ChainRpc>,
    registry: Address,
    retry: RetryConfig,
}

impl RegistryClient {
    pub fn new(rpc: Arc<dyn ChainRpc>, registry: Address, retry: RetryConfig) -> Self {
        Self { rpc, registry, retry }
    }

    pub fn registry(&self) -> Address {
        self.registry
    }

    async fn call_with_retry(&self, what: &str, data: Bytes) -> Result<Bytes, GateError> {
        let attempts = self.retry.attempts.max(1);
        let mut delay = Duration::from_millis(self.retry.initial_delay_ms);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.rpc.call(self.registry, data.clone()).await {
                Ok(out) => return Ok(out),
                Err(RpcError::Transport(msg)) if attempt < attempts => {
                    tracing::warn!(
                        registry = ?self.registry,
                        call = what,
                        error = %msg,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Follower registry unreachable, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = self.retry.next_delay(delay);
                }
                Err(e) => return Err(e.for_contract(self.registry)),
            }
        }
    }

    async fn count(&self, signature: &str, subject: Address) -> Result<u64, GateError> {
        let out = self
            .call_with_retry(signature, abi::call_data(signature, &[Token::Address(subject)]))
            .await?;
        let count = abi::decode_uint(&out).map_err(|e| e.for_contract(self.registry))?;
        Ok(saturating_u64(count))
    }
}

#[async_trait]
impl SocialGraph for RegistryClient {
    async fn follower_count(&self, subject: Address) -> Result<u64, GateError> {
        self.count(abi::FOLLOWER_COUNT, subject).await
    }

    async fn following_count(&self, subject: Address) -> Result<u64, GateError> {
        self.count(abi::FOLLOWING_COUNT, subject).await
    }

    async fn is_following(&self, follower: Address, target: Address) -> Result<bool, GateError> {
        let data = abi::call_data(
            abi::IS_FOLLOWING,
            &[Token::Address(follower), Token::Address(target)],
        );
        let out = self.call_with_retry(abi::IS_FOLLOWING, data).await?;
        abi::decode_bool(&out).map_err(|e| e.for_contract(self.registry))
    }
}
