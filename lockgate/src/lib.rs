//! Lockgate: token- and follower-gated access verification.
//!
//! Decides whether a wallet identity satisfies a set of on-chain
//! requirements (native balance, fungible and non-fungible token holdings,
//! follower-graph relations) under an ANY/ALL policy, and reports live
//! per-requirement progress while it does.
//!
//! # Architecture
//!
//! - `types`: Requirement definitions, results and verdicts
//! - `rpc`: JSON-RPC transport behind the `ChainRpc` trait
//! - `chain`: Balance and metadata reads with proxy fallback and caching
//! - `social`: Follower registry client
//! - `eval`: Per-requirement evaluation
//! - `aggregate`: ANY/ALL verdicts
//! - `session`: Concurrent verification sessions with retry
//! - `gate`: Entry point built from `GateConfig`
//! - `memory`: In-memory chain and social graph for tests and demos

pub mod abi;
pub mod aggregate;
pub mod amount;
pub mod chain;
pub mod config;
pub mod error;
pub mod eval;
pub mod gate;
pub mod memory;
pub mod rpc;
pub mod session;
pub mod social;
pub mod types;
pub mod wallet;

pub use aggregate::aggregate;
pub use chain::ChainDataReader;
pub use config::GateConfig;
pub use error::{GateError, RpcError};
pub use eval::{NativeUnit, RequirementEvaluator};
pub use gate::Gate;
pub use rpc::{ChainRpc, JsonRpcClient};
pub use session::{Progress, SessionState, VerificationSession};
pub use social::{RegistryClient, RetryConfig, SocialGraph};
pub use types::{
    FailureKind, FollowDirection, FulfillmentPolicy, Requirement, RequirementKind,
    RequirementResult, RequirementStatus, TokenKind, TokenMetadata, VerificationVerdict,
};
pub use wallet::{WalletCapability, WatchWallet};
