//! Two-step read strategy for contracts that may sit behind an EIP-1967
//! proxy: call the address directly, and if that fails for a contract-level
//! reason, resolve the implementation address from the proxy's storage and
//! call that instead.

use crate::abi;
use crate::error::{GateError, RpcError};
use crate::rpc::ChainRpc;
use ethers_core::types::{Address, Bytes};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ProxyFallback {
    rpc: Arc<dyn ChainRpc>,
    /// proxy → implementation. `None` records "not a proxy".
    implementations: RwLock<HashMap<Address, Option<Address>>>,
}

impl ProxyFallback {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            rpc,
            implementations: RwLock::new(HashMap::new()),
        }
    }

    /// Call `contract` and decode the answer. Empty return data counts as a
    /// failure: it is what an address without code answers.
    pub async fn try_direct<T>(
        &self,
        contract: Address,
        data: Bytes,
        decode: impl Fn(&[u8]) -> Result<T, RpcError>,
    ) -> Result<T, RpcError> {
        let out = self.rpc.call(contract, data).await?;
        decode(&out)
    }

    /// Read the EIP-1967 implementation slot. Results (including "not a
    /// proxy") are cached; transport failures are not.
    pub async fn resolve_implementation(
        &self,
        proxy: Address,
    ) -> Result<Option<Address>, RpcError> {
        let cached = self.implementations.read().get(&proxy).copied();
        if let Some(cached) = cached {
            return Ok(cached);
        }
        let word = self.rpc.storage_at(proxy, abi::implementation_slot()).await?;
        let implementation = abi::address_from_word(word).filter(|imp| *imp != proxy);
        match implementation {
            Some(imp) => tracing::debug!(
                proxy = ?proxy,
                implementation = ?imp,
                "Resolved proxy implementation"
            ),
            None => tracing::debug!(contract = ?proxy, "No proxy implementation slot set"),
        }
        self.implementations.write().insert(proxy, implementation);
        Ok(implementation)
    }

    /// Repeat the call against the proxy's implementation. Errors with a
    /// decode error when `proxy` is not a proxy.
    pub async fn try_via_implementation<T>(
        &self,
        proxy: Address,
        data: Bytes,
        decode: impl Fn(&[u8]) -> Result<T, RpcError>,
    ) -> Result<T, RpcError> {
        let Some(implementation) = self.resolve_implementation(proxy).await? else {
            return Err(RpcError::Decode("not a proxy".into()));
        };
        self.try_direct(implementation, data, decode).await
    }

    /// Direct call with implementation fallback.
    ///
    /// A transport failure on the direct call is returned as-is: the
    /// endpoint is down, and asking it about proxies would fail the same way.
    pub async fn call<T>(
        &self,
        contract: Address,
        data: Bytes,
        decode: impl Fn(&[u8]) -> Result<T, RpcError>,
    ) -> Result<T, GateError> {
        let direct_err = match self.try_direct(contract, data.clone(), &decode).await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transport() => return Err(GateError::Transport(e.to_string())),
            Err(e) => e,
        };

        tracing::debug!(
            contract = ?contract,
            error = %direct_err,
            "Direct call failed, trying proxy implementation"
        );
        match self.try_via_implementation(contract, data, &decode).await {
            Ok(value) => {
                tracing::debug!(contract = ?contract, "Call succeeded via proxy implementation");
                Ok(value)
            }
            Err(RpcError::Transport(msg)) => Err(GateError::Transport(msg)),
            Err(fallback_err) => Err(GateError::ChainRead {
                contract,
                cause: format!("{direct_err}; via implementation: {fallback_err}"),
            }),
        }
    }
}
