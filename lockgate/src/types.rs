//! Core types for requirement definitions and verification results.
//!
//! Requirement sets are plain serde data so they can be stored alongside
//! the content they gate (posts, boards, communities) and handed to the
//! engine unchanged. Results and verdicts are computed, never persisted.

use chrono::{DateTime, Utc};
use ethers_core::types::Address;
use serde::{Deserialize, Serialize};

// ─── Requirement definitions ─────────────────────────────────────────────────

/// A single access requirement attached to a piece of content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Requirement {
    /// Stable identifier, unique within a requirement set.
    pub id: String,

    /// Human-readable label shown next to the requirement's badge.
    pub display_name: String,

    #[serde(flatten)]
    pub kind: RequirementKind,
}

/// What a requirement checks. Closed set: adding a kind is a compile-time
/// checked change in the evaluator's single match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequirementKind {
    /// Native currency balance, in wei (decimal string).
    NativeBalance { minimum_wei: String },

    /// Fungible token ownership. Amount in base units.
    FungibleToken {
        contract_address: Address,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum_amount: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Non-fungible token ownership. Amount in units; defaults to one.
    NonFungibleToken {
        contract_address: Address,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        minimum_amount: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        symbol: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Minimum follower (or following) count in the social graph.
    FollowerCount {
        minimum_count: u64,
        direction: FollowDirection,
    },

    /// The counterpart must follow the identity.
    FollowedBy { counterpart_address: Address },

    /// The identity must follow the counterpart.
    Following { counterpart_address: Address },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FollowDirection {
    /// Count accounts that follow the identity.
    FollowersOfSubject,
    /// Count accounts the identity follows.
    FollowingBySubject,
}

/// Token standard a contract is expected to implement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Fungible,
    NonFungible,
}

impl RequirementKind {
    pub fn label(&self) -> &'static str {
        match self {
            RequirementKind::NativeBalance { .. } => "native_balance",
            RequirementKind::FungibleToken { .. } => "fungible_token",
            RequirementKind::NonFungibleToken { .. } => "non_fungible_token",
            RequirementKind::FollowerCount { .. } => "follower_count",
            RequirementKind::FollowedBy { .. } => "followed_by",
            RequirementKind::Following { .. } => "following",
        }
    }
}

/// ANY or ALL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentPolicy {
    Any,
    #[default]
    All,
}

impl std::str::FromStr for FulfillmentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "any" => Ok(FulfillmentPolicy::Any),
            "all" => Ok(FulfillmentPolicy::All),
            other => Err(format!("unknown fulfillment policy: {other}")),
        }
    }
}

// ─── Results ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    Pending,
    InProgress,
    Satisfied,
    Failed,
}

impl RequirementStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequirementStatus::Satisfied | RequirementStatus::Failed)
    }
}

/// Why a requirement failed. The UI offers different guidance for each.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Data was read; the identity does not meet the threshold.
    Unmet,
    /// The contract could not be read.
    ChainRead,
    /// The RPC endpoint or registry could not be reached.
    Transport,
    /// The requirement definition itself is malformed.
    Invalid,
}

/// Live status of one requirement within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequirementResult {
    pub requirement_id: String,
    pub display_name: String,
    pub status: RequirementStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Last time this slot was written.
    pub updated_at: DateTime<Utc>,
}

impl RequirementResult {
    pub fn pending(requirement: &Requirement) -> Self {
        RequirementResult {
            requirement_id: requirement.id.clone(),
            display_name: requirement.display_name.clone(),
            status: RequirementStatus::Pending,
            current_value: None,
            required_value: None,
            error_message: None,
            failure: None,
            updated_at: Utc::now(),
        }
    }

    pub fn in_progress(requirement: &Requirement) -> Self {
        RequirementResult {
            status: RequirementStatus::InProgress,
            ..Self::pending(requirement)
        }
    }

    pub fn is_satisfied(&self) -> bool {
        self.status == RequirementStatus::Satisfied
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether this result failed for a reason other than an unmet threshold.
    pub fn is_error(&self) -> bool {
        matches!(
            self.failure,
            Some(FailureKind::ChainRead | FailureKind::Transport | FailureKind::Invalid)
        )
    }
}

/// Final (or provisional) access decision for a requirement set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationVerdict {
    pub is_authorized: bool,
    pub missing_requirements: Vec<String>,
    pub errors: Vec<String>,
    /// False while the decision may still change because some
    /// requirement has not settled.
    pub is_final: bool,
}

// ─── Token metadata ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    /// Present only for fungible tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
}

impl TokenMetadata {
    pub const UNKNOWN_NAME: &'static str = "Unknown Token";
    pub const UNKNOWN_SYMBOL: &'static str = "UNK";

    pub fn unknown() -> Self {
        TokenMetadata {
            name: Self::UNKNOWN_NAME.to_string(),
            symbol: Self::UNKNOWN_SYMBOL.to_string(),
            decimals: None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.name == Self::UNKNOWN_NAME && self.symbol == Self::UNKNOWN_SYMBOL
    }
}
