//! Token display metadata.
//!
//! Strategy order:
//! - fungible: ERC725Y name/symbol → legacy `name()`/`symbol()` → both again
//!   against the proxy implementation. Decimals from `decimals()` on the
//!   contract, then the implementation, else 18.
//! - non-fungible: ERC725Y name/symbol → legacy pair once. No decimals.

use super::proxy::ProxyFallback;
use crate::abi;
use crate::error::{GateError, RpcError};
use crate::rpc::ChainRpc;
use crate::types::TokenKind;
use ethers_core::types::{Address, H256};
use std::sync::atomic::{AtomicBool, Ordering};

pub const DEFAULT_DECIMALS: u8 = 18;

pub(crate) struct MetadataResolver<'a> {
    rpc: &'a dyn ChainRpc,
    proxy: &'a ProxyFallback,
    /// Set when any step failed because the endpoint was unreachable.
    transport_failed: AtomicBool,
}

impl<'a> MetadataResolver<'a> {
    pub fn new(rpc: &'a dyn ChainRpc, proxy: &'a ProxyFallback) -> Self {
        Self {
            rpc,
            proxy,
            transport_failed: AtomicBool::new(false),
        }
    }

    /// Whether the outcome depended on a transport failure. Such outcomes
    /// say nothing about the contract and must not be cached.
    pub fn saw_transport_failure(&self) -> bool {
        self.transport_failed.load(Ordering::Relaxed)
    }

    fn note<T>(&self, result: Result<T, RpcError>) -> Result<T, RpcError> {
        if let Err(e) = &result
            && e.is_transport()
        {
            self.transport_failed.store(true, Ordering::Relaxed);
        }
        result
    }

    /// Resolve name and symbol. Errors only when every strategy failed.
    pub async fn names(
        &self,
        contract: Address,
        kind: TokenKind,
    ) -> Result<(String, String), GateError> {
        match self.note(self.lsp4(contract).await) {
            Ok(names) => {
                tracing::debug!(contract = ?contract, path = "erc725y", "Resolved token metadata");
                return Ok(names);
            }
            Err(e) => {
                tracing::debug!(contract = ?contract, error = %e, "ERC725Y metadata lookup failed")
            }
        }

        match self.note(self.legacy(contract).await) {
            Ok(names) => {
                tracing::debug!(contract = ?contract, path = "legacy", "Resolved token metadata");
                return Ok(names);
            }
            Err(e) => tracing::debug!(
                contract = ?contract,
                error = %e,
                "Legacy name()/symbol() lookup failed"
            ),
        }

        if kind == TokenKind::Fungible
            && let Ok(Some(implementation)) =
                self.note(self.proxy.resolve_implementation(contract).await)
        {
            if let Ok(names) = self.note(self.lsp4(implementation).await) {
                tracing::debug!(
                    contract = ?contract,
                    implementation = ?implementation,
                    path = "implementation/erc725y",
                    "Resolved token metadata"
                );
                return Ok(names);
            }
            if let Ok(names) = self.note(self.legacy(implementation).await) {
                tracing::debug!(
                    contract = ?contract,
                    implementation = ?implementation,
                    path = "implementation/legacy",
                    "Resolved token metadata"
                );
                return Ok(names);
            }
        }

        Err(GateError::MetadataUnavailable {
            contract,
            cause: "no metadata strategy succeeded".into(),
        })
    }

    /// `decimals()` on the contract, then its implementation, else 18.
    pub async fn decimals(&self, contract: Address) -> u8 {
        let data = abi::call_data(abi::DECIMALS, &[]);
        let direct = self
            .proxy
            .try_direct(contract, data.clone(), abi::decode_decimals)
            .await;
        match self.note(direct) {
            Ok(decimals) => return decimals,
            Err(e) => tracing::debug!(contract = ?contract, error = %e, "decimals() failed"),
        }
        let fallback = self
            .proxy
            .try_via_implementation(contract, data, abi::decode_decimals)
            .await;
        match self.note(fallback) {
            Ok(decimals) => {
                tracing::debug!(contract = ?contract, path = "implementation", "Resolved decimals");
                decimals
            }
            Err(e) => {
                tracing::debug!(
                    contract = ?contract,
                    error = %e,
                    default = DEFAULT_DECIMALS,
                    "Falling back to default decimals"
                );
                DEFAULT_DECIMALS
            }
        }
    }

    async fn lsp4(&self, contract: Address) -> Result<(String, String), RpcError> {
        let name = self.data_string(contract, abi::token_name_key()).await?;
        let symbol = self.data_string(contract, abi::token_symbol_key()).await?;
        Ok((name, symbol))
    }

    async fn data_string(&self, contract: Address, key: H256) -> Result<String, RpcError> {
        let out = self.rpc.call(contract, abi::get_data(key)).await?;
        let raw = abi::decode_bytes(&out)?;
        let value = String::from_utf8(raw).map_err(|e| RpcError::Decode(e.to_string()))?;
        if value.trim().is_empty() {
            return Err(RpcError::Decode(format!("data key {key:?} is empty")));
        }
        Ok(value)
    }

    async fn legacy(&self, contract: Address) -> Result<(String, String), RpcError> {
        let name = self.rpc.call(contract, abi::call_data(abi::NAME, &[])).await?;
        let symbol = self.rpc.call(contract, abi::call_data(abi::SYMBOL, &[])).await?;
        let name = abi::decode_string(&name)?;
        let symbol = abi::decode_string(&symbol)?;
        if name.is_empty() && symbol.is_empty() {
            return Err(RpcError::Decode("empty name and symbol".into()));
        }
        Ok((name, symbol))
    }
}
