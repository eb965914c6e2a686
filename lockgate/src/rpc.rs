//! Read-only chain access.
//!
//! `ChainRpc` is the capability the engine consumes: a contract view
//! call, a raw storage read and a native balance read. `JsonRpcClient`
//! wraps an ethers HTTP provider; `MemoryChain` (see `memory`) is the
//! in-process counterpart used by tests.

use crate::error::RpcError;
use async_trait::async_trait;
use ethers_core::types::transaction::eip2718::TypedTransaction;
use ethers_core::types::{Address, Bytes, TransactionRequest, H256, U256};
use ethers_providers::{Http, Middleware, Provider, ProviderError, RpcError as _};
use std::future::Future;
use std::time::Duration;

#[async_trait]
pub trait ChainRpc: Send + Sync {
    /// `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError>;

    /// `eth_getStorageAt` against the latest block.
    async fn storage_at(&self, address: Address, slot: H256) -> Result<H256, RpcError>;

    /// `eth_getBalance` against the latest block.
    async fn balance(&self, address: Address) -> Result<U256, RpcError>;
}

/// Ethereum JSON-RPC over HTTP.
pub struct JsonRpcClient {
    url: String,
    provider: Provider<Http>,
    timeout: Duration,
}

impl JsonRpcClient {
    /// Every request is bounded by `timeout`. There is no automatic retry.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let url = url.into();
        let provider = Provider::<Http>::try_from(url.as_str())
            .map_err(|e| RpcError::Transport(format!("invalid rpc url {url}: {e}")))?;
        Ok(Self {
            url,
            provider,
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn bounded<T>(
        &self,
        method: &str,
        request: impl Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, RpcError> {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result.map_err(|e| classify(method, e)),
            Err(_) => Err(RpcError::Transport(format!(
                "{method}: timed out after {}s",
                self.timeout.as_secs()
            ))),
        }
    }
}

/// Sort a provider failure into revert, bad payload or network failure.
fn classify(method: &str, err: ProviderError) -> RpcError {
    if let Some(resp) = err.as_error_response() {
        // Revert payloads are appended so the UI can show the reason.
        let message = match resp.data.as_ref().and_then(|d| d.as_str()) {
            Some(data) if !data.is_empty() => format!("{} ({data})", resp.message),
            _ => resp.message.clone(),
        };
        return RpcError::Rpc {
            code: resp.code,
            message,
        };
    }
    if let Some(serde_err) = err.as_serde_error() {
        return RpcError::Decode(format!("{method}: {serde_err}"));
    }
    RpcError::Transport(format!("{method}: {err}"))
}

#[async_trait]
impl ChainRpc for JsonRpcClient {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        self.bounded("eth_call", self.provider.call(&tx, None)).await
    }

    async fn storage_at(&self, address: Address, slot: H256) -> Result<H256, RpcError> {
        self.bounded(
            "eth_getStorageAt",
            self.provider.get_storage_at(address, slot, None),
        )
        .await
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcError> {
        self.bounded("eth_getBalance", self.provider.get_balance(address, None))
            .await
    }
}
