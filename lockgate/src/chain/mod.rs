//! Balance and metadata reads for token contracts.
//!
//! A `ChainDataReader` owns its caches; build one per engine (or per test)
//! rather than sharing global state.

pub mod metadata;
pub mod proxy;

use crate::abi;
use crate::error::GateError;
use crate::rpc::ChainRpc;
use crate::types::{TokenKind, TokenMetadata};
use ethers_core::types::{Address, U256};
use metadata::{MetadataResolver, DEFAULT_DECIMALS};
use parking_lot::RwLock;
use proxy::ProxyFallback;
use std::collections::HashMap;
use std::sync::Arc;

/// Cached outcome of a metadata lookup.
#[derive(Debug, Clone)]
enum MetadataEntry {
    Found(TokenMetadata),
    /// Every strategy failed. Not re-attempted for the reader's lifetime.
    Missing { decimals: Option<u8> },
}

impl MetadataEntry {
    fn to_metadata(&self) -> TokenMetadata {
        match self {
            MetadataEntry::Found(meta) => meta.clone(),
            MetadataEntry::Missing { decimals } => TokenMetadata {
                decimals: *decimals,
                ..TokenMetadata::unknown()
            },
        }
    }
}

pub struct ChainDataReader {
    rpc: Arc<dyn ChainRpc>,
    proxy: ProxyFallback,
    metadata: RwLock<HashMap<Address, MetadataEntry>>,
}

impl ChainDataReader {
    pub fn new(rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            proxy: ProxyFallback::new(Arc::clone(&rpc)),
            rpc,
            metadata: RwLock::new(HashMap::new()),
        }
    }

    pub fn proxy(&self) -> &ProxyFallback {
        &self.proxy
    }

    /// Native currency balance of `identity`, in wei.
    pub async fn native_balance(&self, identity: Address) -> Result<U256, GateError> {
        self.rpc
            .balance(identity)
            .await
            .map_err(|e| e.for_contract(identity))
    }

    /// Token balance of `identity` on `contract`, in base units (fungible)
    /// or units (non-fungible).
    ///
    /// An unreadable contract is an error, never a zero balance.
    pub async fn balance_of(
        &self,
        contract: Address,
        identity: Address,
        kind: TokenKind,
    ) -> Result<U256, GateError> {
        let balance = self
            .proxy
            .call(contract, abi::balance_of(identity), abi::decode_uint)
            .await;
        match &balance {
            Ok(value) => {
                tracing::debug!(contract = ?contract, ?kind, balance = %value, "Read token balance")
            }
            Err(e) => {
                tracing::warn!(contract = ?contract, ?kind, error = %e, "Token balance read failed")
            }
        }
        balance
    }

    /// Display metadata for `contract`. Never fails: falls back to
    /// "Unknown Token"/"UNK" when every strategy is exhausted.
    pub async fn metadata(&self, contract: Address, kind: TokenKind) -> TokenMetadata {
        let cached = self.metadata.read().get(&contract).map(MetadataEntry::to_metadata);
        if let Some(metadata) = cached {
            return metadata;
        }

        let resolver = MetadataResolver::new(self.rpc.as_ref(), &self.proxy);
        let decimals = match kind {
            TokenKind::Fungible => Some(resolver.decimals(contract).await),
            TokenKind::NonFungible => None,
        };
        let entry = match resolver.names(contract, kind).await {
            Ok((name, symbol)) => MetadataEntry::Found(TokenMetadata {
                name,
                symbol,
                decimals,
            }),
            Err(e) => {
                tracing::info!(
                    contract = ?contract,
                    error = %e,
                    "Token metadata unavailable, using placeholder"
                );
                MetadataEntry::Missing { decimals }
            }
        };

        let metadata = entry.to_metadata();
        if resolver.saw_transport_failure() {
            tracing::debug!(
                contract = ?contract,
                "Not caching metadata read during a transport failure"
            );
            return metadata;
        }
        // Concurrent lookups for the same contract may both land here;
        // whichever writes last wins.
        self.metadata.write().insert(contract, entry);
        metadata
    }

    /// Decimals used to format amounts of `contract`.
    pub async fn decimals(&self, contract: Address) -> u8 {
        self.metadata(contract, TokenKind::Fungible)
            .await
            .decimals
            .unwrap_or(DEFAULT_DECIMALS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcError;
    use crate::memory::{MemoryChain, MemoryContract};
    use ethers_core::types::{Bytes, H256};

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    fn reader() -> (Arc<MemoryChain>, ChainDataReader) {
        let chain = Arc::new(MemoryChain::new());
        let reader = ChainDataReader::new(chain.clone());
        (chain, reader)
    }

    #[tokio::test]
    async fn direct_balance() {
        let (chain, reader) = reader();
        chain.deploy(addr(0xaa), MemoryContract::token().with_balance(addr(1), U256::from(100)));
        let balance = reader.balance_of(addr(0xaa), addr(1), TokenKind::Fungible).await.unwrap();
        assert_eq!(balance, U256::from(100));
    }

    #[tokio::test]
    async fn zero_balance_is_not_an_error() {
        let (chain, reader) = reader();
        chain.deploy(addr(0xaa), MemoryContract::token());
        let balance = reader.balance_of(addr(0xaa), addr(1), TokenKind::NonFungible).await.unwrap();
        assert!(balance.is_zero());
    }

    #[tokio::test]
    async fn proxy_balance_matches_implementation() {
        let (chain, reader) = reader();
        let huge = U256::from_dec_str("123456789012345678901234567890").unwrap();
        chain.deploy(addr(0xaa), MemoryContract::reverting());
        chain.deploy(addr(0xbb), MemoryContract::token().with_balance(addr(1), huge));
        chain.set_implementation(addr(0xaa), addr(0xbb));

        let via_proxy = reader.balance_of(addr(0xaa), addr(1), TokenKind::Fungible).await.unwrap();
        let direct = reader.balance_of(addr(0xbb), addr(1), TokenKind::Fungible).await.unwrap();
        assert_eq!(via_proxy, huge);
        assert_eq!(via_proxy, direct);
    }

    #[tokio::test]
    async fn unreadable_contract_is_chain_read_error() {
        let (chain, reader) = reader();
        chain.deploy(addr(0xaa), MemoryContract::reverting());
        let err = reader.balance_of(addr(0xaa), addr(1), TokenKind::Fungible).await.unwrap_err();
        assert!(matches!(err, GateError::ChainRead { contract, .. } if contract == addr(0xaa)));
    }

    #[tokio::test]
    async fn metadata_prefers_erc725y() {
        let (chain, reader) = reader();
        chain.deploy(
            addr(0xaa),
            MemoryContract::token()
                .with_lsp4("Chill Token", "CHILL")
                .with_legacy("Legacy", "LEG")
                .with_decimals(6),
        );
        let meta = reader.metadata(addr(0xaa), TokenKind::Fungible).await;
        assert_eq!(meta.name, "Chill Token");
        assert_eq!(meta.symbol, "CHILL");
        assert_eq!(meta.decimals, Some(6));
    }

    #[tokio::test]
    async fn metadata_falls_back_to_legacy() {
        let (chain, reader) = reader();
        chain.deploy(addr(0xaa), MemoryContract::token().with_legacy("Old Coin", "OLD"));
        let meta = reader.metadata(addr(0xaa), TokenKind::Fungible).await;
        assert_eq!((meta.name.as_str(), meta.symbol.as_str()), ("Old Coin", "OLD"));
        assert_eq!(meta.decimals, Some(DEFAULT_DECIMALS));
    }

    #[tokio::test]
    async fn fungible_metadata_via_implementation() {
        let (chain, reader) = reader();
        chain.deploy(addr(0xaa), MemoryContract::reverting());
        chain.deploy(
            addr(0xbb),
            MemoryContract::token().with_lsp4("Behind Proxy", "BP").with_decimals(8),
        );
        chain.set_implementation(addr(0xaa), addr(0xbb));
        let meta = reader.metadata(addr(0xaa), TokenKind::Fungible).await;
        assert_eq!(meta.name, "Behind Proxy");
        assert_eq!(meta.decimals, Some(8));
    }

    #[tokio::test]
    async fn nft_metadata_has_no_decimals() {
        let (chain, reader) = reader();
        chain.deploy(
            addr(0xaa),
            MemoryContract::token().with_lsp4("Pass", "PASS").with_decimals(0),
        );
        let meta = reader.metadata(addr(0xaa), TokenKind::NonFungible).await;
        assert_eq!(meta.symbol, "PASS");
        assert_eq!(meta.decimals, None);
    }

    #[tokio::test]
    async fn metadata_placeholder_when_everything_fails() {
        let (chain, reader) = reader();
        chain.deploy(addr(0xaa), MemoryContract::reverting());
        let meta = reader.metadata(addr(0xaa), TokenKind::Fungible).await;
        assert_eq!(meta.name, "Unknown Token");
        assert_eq!(meta.symbol, "UNK");
        assert_eq!(meta.decimals, Some(DEFAULT_DECIMALS));

        let meta = reader.metadata(addr(0xcc), TokenKind::NonFungible).await;
        assert!(meta.is_unknown());
    }

    #[tokio::test]
    async fn metadata_placeholder_when_offline() {
        let (chain, reader) = reader();
        chain.set_offline(true);
        let meta = reader.metadata(addr(0xaa), TokenKind::Fungible).await;
        assert!(meta.is_unknown());
    }

    #[tokio::test]
    async fn metadata_read_while_offline_is_not_cached() {
        let (chain, reader) = reader();
        chain.deploy(
            addr(0xaa),
            MemoryContract::token().with_lsp4("Chill", "CHILL").with_decimals(6),
        );

        chain.set_offline(true);
        assert!(reader.metadata(addr(0xaa), TokenKind::Fungible).await.is_unknown());

        chain.set_offline(false);
        let meta = reader.metadata(addr(0xaa), TokenKind::Fungible).await;
        assert_eq!(meta.name, "Chill");
        assert_eq!(meta.decimals, Some(6));
    }

    #[tokio::test]
    async fn native_balance_decode_failure_is_chain_read() {
        struct Garbled;

        #[async_trait::async_trait]
        impl ChainRpc for Garbled {
            async fn call(&self, _to: Address, _data: Bytes) -> Result<Bytes, RpcError> {
                Err(RpcError::Decode("garbled".into()))
            }

            async fn storage_at(&self, _address: Address, _slot: H256) -> Result<H256, RpcError> {
                Err(RpcError::Decode("garbled".into()))
            }

            async fn balance(&self, _address: Address) -> Result<U256, RpcError> {
                Err(RpcError::Decode("bad quantity".into()))
            }
        }

        let reader = ChainDataReader::new(Arc::new(Garbled));
        let err = reader.native_balance(addr(1)).await.unwrap_err();
        assert!(matches!(err, GateError::ChainRead { contract, .. } if contract == addr(1)));
    }

    #[tokio::test]
    async fn native_balance_offline_is_transport() {
        let (chain, reader) = reader();
        chain.set_offline(true);
        let err = reader.native_balance(addr(1)).await.unwrap_err();
        assert!(matches!(err, GateError::Transport(_)));
    }

    #[tokio::test]
    async fn negative_metadata_is_cached() {
        let (chain, reader) = reader();
        chain.deploy(addr(0xaa), MemoryContract::reverting());
        reader.metadata(addr(0xaa), TokenKind::Fungible).await;
        let calls = chain.call_count();

        // Fixing the contract does not trigger a new lookup.
        chain.deploy(addr(0xaa), MemoryContract::token().with_lsp4("Late", "LATE"));
        let meta = reader.metadata(addr(0xaa), TokenKind::Fungible).await;
        assert!(meta.is_unknown());
        assert_eq!(chain.call_count(), calls);
    }

    #[tokio::test]
    async fn readers_do_not_share_caches() {
        let chain = Arc::new(MemoryChain::new());
        chain.deploy(addr(0xaa), MemoryContract::reverting());
        let first = ChainDataReader::new(chain.clone());
        assert!(first.metadata(addr(0xaa), TokenKind::Fungible).await.is_unknown());

        chain.deploy(addr(0xaa), MemoryContract::token().with_lsp4("Fresh", "FRSH"));
        let second = ChainDataReader::new(chain.clone());
        assert_eq!(second.metadata(addr(0xaa), TokenKind::Fungible).await.name, "Fresh");
    }
}
