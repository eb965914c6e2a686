//! Error taxonomy for the verification engine.

use ethers_core::types::Address;

/// Errors produced by the gate.
///
/// Evaluation-time errors (`ChainRead`, `Transport`) never escape the
/// evaluator; they are folded into failed requirement results. The
/// remaining variants are returned to the caller because they indicate a
/// configuration or usage bug rather than a user-facing denial.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum GateError {
    /// The contract could not be read (revert, missing function, garbage
    /// return data). Distinct from a genuine zero balance.
    #[error("Could not read contract {contract:?}: {cause}")]
    ChainRead { contract: Address, cause: String },

    /// Token metadata could not be resolved. Degrades to a placeholder.
    #[error("Metadata unavailable for {contract:?}: {cause}")]
    MetadataUnavailable { contract: Address, cause: String },

    /// RPC endpoint or network failure. Retryable by the user.
    #[error("Network error: {0}")]
    Transport(String),

    /// Malformed requirement definition, rejected before evaluation.
    #[error("Invalid requirement {id:?}: {reason}")]
    InvalidRequirement { id: String, reason: String },

    #[error("Unknown requirement: {0}")]
    UnknownRequirement(String),

    #[error("No wallet connected")]
    WalletDisconnected,

    /// The session identity changed after the session started.
    #[error("Verification session is stale")]
    StaleSession,

    #[error("Verification session has not started")]
    SessionNotStarted,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GateError {
    pub(crate) fn invalid(id: &str, reason: impl Into<String>) -> Self {
        GateError::InvalidRequirement {
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error came from the network rather than the contract.
    pub fn is_transport(&self) -> bool {
        matches!(self, GateError::Transport(_))
    }
}

/// Low-level failure of a single RPC primitive.
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum RpcError {
    /// Connection refused, timeout, non-2xx HTTP status.
    #[error("transport: {0}")]
    Transport(String),

    /// The node answered with a JSON-RPC error object (typically a revert).
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered but the payload was not what we asked for.
    #[error("decode: {0}")]
    Decode(String),
}

impl RpcError {
    pub fn is_transport(&self) -> bool {
        matches!(self, RpcError::Transport(_))
    }

    /// Attach the contract being read, keeping transport failures distinct.
    pub fn for_contract(self, contract: Address) -> GateError {
        match self {
            RpcError::Transport(msg) => GateError::Transport(msg),
            other => GateError::ChainRead {
                contract,
                cause: other.to_string(),
            },
        }
    }
}
