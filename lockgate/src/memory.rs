//! In-memory chain and social graph.
//!
//! Useful for tests and local development: contracts are modelled just far
//! enough to answer the view functions the engine calls. Unknown functions
//! and contracts marked as reverting answer with a JSON-RPC style error,
//! exactly like a node would.

use crate::abi;
use crate::error::{GateError, RpcError};
use crate::rpc::ChainRpc;
use crate::social::SocialGraph;
use async_trait::async_trait;
use ethers_core::abi::{ParamType, Token};
use ethers_core::types::{Address, Bytes, H256, U256};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// A contract as seen through its view functions.
#[derive(Debug, Clone, Default)]
pub struct MemoryContract {
    pub balances: HashMap<Address, U256>,
    /// ERC725Y data store.
    pub data: HashMap<H256, Vec<u8>>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub decimals: Option<u8>,
    /// Every call reverts (e.g. a proxy whose fallback is broken).
    pub reverts: bool,
    /// Follower registry: (follower, followed) edges.
    pub follows: HashSet<(Address, Address)>,
    /// Artificial latency applied before answering.
    pub latency: Option<Duration>,
}

impl MemoryContract {
    pub fn token() -> Self {
        Self::default()
    }

    pub fn with_balance(mut self, owner: Address, amount: U256) -> Self {
        self.balances.insert(owner, amount);
        self
    }

    /// Store LSP4 name/symbol in the ERC725Y data store.
    pub fn with_lsp4(mut self, name: &str, symbol: &str) -> Self {
        self.data.insert(abi::token_name_key(), name.as_bytes().to_vec());
        self.data.insert(abi::token_symbol_key(), symbol.as_bytes().to_vec());
        self
    }

    /// Expose legacy `name()`/`symbol()` accessors.
    pub fn with_legacy(mut self, name: &str, symbol: &str) -> Self {
        self.name = Some(name.to_string());
        self.symbol = Some(symbol.to_string());
        self
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = Some(decimals);
        self
    }

    pub fn reverting() -> Self {
        Self {
            reverts: true,
            ..Self::default()
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn execute(&self, data: &[u8]) -> Result<Bytes, RpcError> {
        if self.reverts || data.len() < 4 {
            return Err(revert());
        }
        let (sel, args) = data.split_at(4);
        let encode =
            |tokens: &[Token]| Ok::<_, RpcError>(Bytes::from(ethers_core::abi::encode(tokens)));

        if sel == abi::selector(abi::BALANCE_OF) {
            let owner = decode_address(args)?;
            let balance = self.balances.get(&owner).copied().unwrap_or_default();
            return encode(&[Token::Uint(balance)]);
        }
        if sel == abi::selector(abi::GET_DATA) {
            let key = decode_key(args)?;
            let value = self.data.get(&key).cloned().unwrap_or_default();
            return encode(&[Token::Bytes(value)]);
        }
        if sel == abi::selector(abi::NAME)
            && let Some(name) = &self.name
        {
            return encode(&[Token::String(name.clone())]);
        }
        if sel == abi::selector(abi::SYMBOL)
            && let Some(symbol) = &self.symbol
        {
            return encode(&[Token::String(symbol.clone())]);
        }
        if sel == abi::selector(abi::DECIMALS)
            && let Some(decimals) = self.decimals
        {
            return encode(&[Token::Uint(U256::from(decimals))]);
        }
        if sel == abi::selector(abi::FOLLOWER_COUNT) {
            let subject = decode_address(args)?;
            let count = self.follows.iter().filter(|(_, to)| *to == subject).count();
            return encode(&[Token::Uint(U256::from(count))]);
        }
        if sel == abi::selector(abi::FOLLOWING_COUNT) {
            let subject = decode_address(args)?;
            let count = self.follows.iter().filter(|(from, _)| *from == subject).count();
            return encode(&[Token::Uint(U256::from(count))]);
        }
        if sel == abi::selector(abi::IS_FOLLOWING) {
            let tokens = ethers_core::abi::decode(&[ParamType::Address, ParamType::Address], args)
                .map_err(|e| RpcError::Decode(e.to_string()))?;
            let (Some(follower), Some(target)) = (
                tokens.first().cloned().and_then(Token::into_address),
                tokens.get(1).cloned().and_then(Token::into_address),
            ) else {
                return Err(revert());
            };
            return encode(&[Token::Bool(self.follows.contains(&(follower, target)))]);
        }
        Err(revert())
    }
}

fn revert() -> RpcError {
    RpcError::Rpc {
        code: 3,
        message: "execution reverted".into(),
    }
}

fn decode_address(args: &[u8]) -> Result<Address, RpcError> {
    ethers_core::abi::decode(&[ParamType::Address], args)
        .ok()
        .and_then(|t| t.into_iter().next())
        .and_then(Token::into_address)
        .ok_or_else(revert)
}

fn decode_key(args: &[u8]) -> Result<H256, RpcError> {
    ethers_core::abi::decode(&[ParamType::FixedBytes(32)], args)
        .ok()
        .and_then(|t| t.into_iter().next())
        .and_then(Token::into_fixed_bytes)
        .map(|b| H256::from_slice(&b))
        .ok_or_else(revert)
}

#[derive(Debug, Default)]
struct ChainState {
    native: HashMap<Address, U256>,
    contracts: HashMap<Address, MemoryContract>,
    storage: HashMap<(Address, H256), H256>,
}

/// An in-memory `ChainRpc`.
#[derive(Debug, Default)]
pub struct MemoryChain {
    state: RwLock<ChainState>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl MemoryChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_native_balance(&self, owner: Address, amount: U256) {
        self.state.write().native.insert(owner, amount);
    }

    pub fn deploy(&self, address: Address, contract: MemoryContract) {
        self.state.write().contracts.insert(address, contract);
    }

    /// Mutate a deployed contract in place. No-op for unknown addresses.
    pub fn update(&self, address: Address, f: impl FnOnce(&mut MemoryContract)) {
        if let Some(contract) = self.state.write().contracts.get_mut(&address) {
            f(contract);
        }
    }

    /// Make `proxy` an EIP-1967 proxy pointing at `implementation`.
    pub fn set_implementation(&self, proxy: Address, implementation: Address) {
        self.state.write().storage.insert(
            (proxy, abi::implementation_slot()),
            abi::address_to_word(implementation),
        );
    }

    pub fn follow(&self, registry: Address, follower: Address, target: Address) {
        self.state
            .write()
            .contracts
            .entry(registry)
            .or_default()
            .follows
            .insert((follower, target));
    }

    /// Simulate the RPC endpoint going away: every call fails with a
    /// transport error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Total number of RPC primitives served (including failures).
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin(&self) -> Result<(), RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(RpcError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainRpc for MemoryChain {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, RpcError> {
        self.begin()?;
        let latency = self.state.read().contracts.get(&to).and_then(|c| c.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let state = self.state.read();
        match state.contracts.get(&to) {
            Some(contract) => contract.execute(&data),
            // Calling an address without code returns empty data.
            None => Ok(Bytes::default()),
        }
    }

    async fn storage_at(&self, address: Address, slot: H256) -> Result<H256, RpcError> {
        self.begin()?;
        let state = self.state.read();
        Ok(state
            .storage
            .get(&(address, slot))
            .copied()
            .unwrap_or_default())
    }

    async fn balance(&self, address: Address) -> Result<U256, RpcError> {
        self.begin()?;
        Ok(self
            .state
            .read()
            .native
            .get(&address)
            .copied()
            .unwrap_or_default())
    }
}

/// An in-memory `SocialGraph`.
#[derive(Debug, Default)]
pub struct MemorySocialGraph {
    follows: RwLock<HashSet<(Address, Address)>>,
    follower_overrides: RwLock<HashMap<Address, u64>>,
    offline: AtomicBool,
}

impl MemorySocialGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow(&self, follower: Address, target: Address) {
        self.follows.write().insert((follower, target));
    }

    /// Report a fixed follower count for `subject` regardless of edges.
    pub fn set_follower_count(&self, subject: Address, count: u64) {
        self.follower_overrides.write().insert(subject, count);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), GateError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(GateError::Transport("follower registry unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SocialGraph for MemorySocialGraph {
    async fn follower_count(&self, subject: Address) -> Result<u64, GateError> {
        self.check_online()?;
        if let Some(count) = self.follower_overrides.read().get(&subject) {
            return Ok(*count);
        }
        Ok(self.follows.read().iter().filter(|(_, to)| *to == subject).count() as u64)
    }

    async fn following_count(&self, subject: Address) -> Result<u64, GateError> {
        self.check_online()?;
        Ok(self.follows.read().iter().filter(|(from, _)| *from == subject).count() as u64)
    }

    async fn is_following(&self, follower: Address, target: Address) -> Result<bool, GateError> {
        self.check_online()?;
        Ok(self.follows.read().contains(&(follower, target)))
    }
}
