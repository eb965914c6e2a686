//! Requirement evaluator.
//!
//! Evaluates one requirement for one identity. Never fails: transport and
//! contract errors become failed results carrying the underlying message,
//! so a session can keep evaluating the other requirements.

use crate::amount::{format_units, parse_amount};
use crate::chain::ChainDataReader;
use crate::error::GateError;
use crate::social::SocialGraph;
use crate::types::*;
use chrono::Utc;
use ethers_core::types::{Address, U256};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::Instrument;

/// Native currency display settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeUnit {
    pub symbol: String,
    pub decimals: u32,
}

impl Default for NativeUnit {
    fn default() -> Self {
        Self {
            symbol: "LYX".into(),
            decimals: 18,
        }
    }
}

/// Validate a requirement set before any evaluation starts.
pub fn validate_requirements(requirements: &[Requirement]) -> Result<(), GateError> {
    let mut seen = HashSet::new();
    for req in requirements {
        if req.id.trim().is_empty() {
            return Err(GateError::invalid(&req.id, "requirement id is empty"));
        }
        if !seen.insert(req.id.as_str()) {
            return Err(GateError::invalid(&req.id, "duplicate requirement id"));
        }
        validate_kind(req)?;
    }
    Ok(())
}

fn validate_kind(req: &Requirement) -> Result<(), GateError> {
    match &req.kind {
        RequirementKind::NativeBalance { minimum_wei } => {
            parse_amount(&req.id, minimum_wei)?;
        }
        RequirementKind::FungibleToken {
            contract_address,
            minimum_amount,
            ..
        }
        | RequirementKind::NonFungibleToken {
            contract_address,
            minimum_amount,
            ..
        } => {
            if contract_address.is_zero() {
                return Err(GateError::invalid(&req.id, "contract address is zero"));
            }
            if let Some(amount) = minimum_amount {
                parse_amount(&req.id, amount)?;
            }
        }
        RequirementKind::FollowerCount { .. } => {}
        RequirementKind::FollowedBy { counterpart_address }
        | RequirementKind::Following { counterpart_address } => {
            if counterpart_address.is_zero() {
                return Err(GateError::invalid(&req.id, "counterpart address is zero"));
            }
        }
    }
    Ok(())
}

/// Threshold a token requirement must reach. Absent means one unit.
fn token_minimum(id: &str, minimum_amount: &Option<String>) -> Result<U256, GateError> {
    match minimum_amount {
        Some(raw) => parse_amount(id, raw),
        None => Ok(U256::one()),
    }
}

/// Outcome of a check that managed to read its data.
struct Check {
    satisfied: bool,
    current: String,
    required: String,
    /// Shown when the check is not satisfied.
    shortfall: String,
}

pub struct RequirementEvaluator {
    reader: Arc<ChainDataReader>,
    social: Arc<dyn SocialGraph>,
    native: NativeUnit,
}

impl RequirementEvaluator {
    pub fn new(
        reader: Arc<ChainDataReader>,
        social: Arc<dyn SocialGraph>,
        native: NativeUnit,
    ) -> Self {
        Self {
            reader,
            social,
            native,
        }
    }

    pub fn reader(&self) -> &Arc<ChainDataReader> {
        &self.reader
    }

    /// Evaluate `requirement` for `identity`.
    pub async fn evaluate(
        &self,
        requirement: &Requirement,
        identity: Address,
    ) -> RequirementResult {
        let span = tracing::info_span!(
            "evaluate",
            requirement = %requirement.id,
            kind = requirement.kind.label(),
        );
        async {
            let outcome = self.check(requirement, identity).await;
            let result = into_result(requirement, outcome);
            tracing::debug!(status = ?result.status, "Requirement evaluated");
            result
        }
        .instrument(span)
        .await
    }

    async fn check(&self, req: &Requirement, identity: Address) -> Result<Check, GateError> {
        match &req.kind {
            RequirementKind::NativeBalance { minimum_wei } => {
                self.check_native(&req.id, minimum_wei, identity).await
            }
            RequirementKind::FungibleToken {
                contract_address,
                minimum_amount,
                symbol,
                name,
            } => {
                let minimum = token_minimum(&req.id, minimum_amount)?;
                self.check_fungible(*contract_address, minimum, name, symbol, identity)
                    .await
            }
            RequirementKind::NonFungibleToken {
                contract_address,
                minimum_amount,
                symbol,
                name,
            } => {
                let minimum = token_minimum(&req.id, minimum_amount)?;
                self.check_non_fungible(*contract_address, minimum, name, symbol, identity)
                    .await
            }
            RequirementKind::FollowerCount {
                minimum_count,
                direction,
            } => self.check_follower_count(*minimum_count, *direction, identity).await,
            RequirementKind::FollowedBy { counterpart_address } => {
                let follows = self.social.is_following(*counterpart_address, identity).await?;
                Ok(relation(follows, format!("Must be followed by {counterpart_address:?}")))
            }
            RequirementKind::Following { counterpart_address } => {
                let follows = self.social.is_following(identity, *counterpart_address).await?;
                Ok(relation(follows, format!("Must follow {counterpart_address:?}")))
            }
        }
    }

    async fn check_native(
        &self,
        id: &str,
        minimum_wei: &str,
        identity: Address,
    ) -> Result<Check, GateError> {
        let minimum = parse_amount(id, minimum_wei)?;
        let balance = self.reader.native_balance(identity).await?;
        Ok(Check {
            satisfied: balance >= minimum,
            current: balance.to_string(),
            required: minimum.to_string(),
            shortfall: format!(
                "Minimum {} {} required",
                format_units(minimum, self.native.decimals),
                self.native.symbol
            ),
        })
    }

    async fn check_fungible(
        &self,
        contract: Address,
        minimum: U256,
        name: &Option<String>,
        symbol: &Option<String>,
        identity: Address,
    ) -> Result<Check, GateError> {
        let balance = self
            .reader
            .balance_of(contract, identity, TokenKind::Fungible)
            .await?;
        let satisfied = balance >= minimum;
        let shortfall = if satisfied {
            String::new()
        } else {
            let meta = self.reader.metadata(contract, TokenKind::Fungible).await;
            let decimals =
                u32::from(meta.decimals.unwrap_or(crate::chain::metadata::DEFAULT_DECIMALS));
            let (name, symbol) = display_names(name, symbol, &meta);
            format!(
                "Insufficient {name} ({symbol}) balance: have {}, need {}",
                format_units(balance, decimals),
                format_units(minimum, decimals)
            )
        };
        Ok(Check {
            satisfied,
            current: balance.to_string(),
            required: minimum.to_string(),
            shortfall,
        })
    }

    async fn check_non_fungible(
        &self,
        contract: Address,
        minimum: U256,
        name: &Option<String>,
        symbol: &Option<String>,
        identity: Address,
    ) -> Result<Check, GateError> {
        let owned = self
            .reader
            .balance_of(contract, identity, TokenKind::NonFungible)
            .await?;
        let satisfied = owned >= minimum;
        let shortfall = if satisfied {
            String::new()
        } else {
            let meta = self.reader.metadata(contract, TokenKind::NonFungible).await;
            let (name, symbol) = display_names(name, symbol, &meta);
            format!("{name} ({symbol}): need {minimum}, have {owned}")
        };
        Ok(Check {
            satisfied,
            current: owned.to_string(),
            required: minimum.to_string(),
            shortfall,
        })
    }

    async fn check_follower_count(
        &self,
        minimum: u64,
        direction: FollowDirection,
        identity: Address,
    ) -> Result<Check, GateError> {
        let (count, shortfall) = match direction {
            FollowDirection::FollowersOfSubject => {
                let count = self.social.follower_count(identity).await?;
                (count, format!("At least {minimum} followers required, found {count}"))
            }
            FollowDirection::FollowingBySubject => {
                let count = self.social.following_count(identity).await?;
                (
                    count,
                    format!("Following at least {minimum} accounts required, found {count}"),
                )
            }
        };
        Ok(Check {
            satisfied: count >= minimum,
            current: count.to_string(),
            required: minimum.to_string(),
            shortfall,
        })
    }
}

fn relation(holds: bool, shortfall: String) -> Check {
    Check {
        satisfied: holds,
        current: holds.to_string(),
        required: true.to_string(),
        shortfall,
    }
}

/// Names cached on the requirement win over on-chain metadata.
fn display_names(
    name: &Option<String>,
    symbol: &Option<String>,
    meta: &TokenMetadata,
) -> (String, String) {
    (
        name.clone().unwrap_or_else(|| meta.name.clone()),
        symbol.clone().unwrap_or_else(|| meta.symbol.clone()),
    )
}

fn into_result(req: &Requirement, outcome: Result<Check, GateError>) -> RequirementResult {
    let base = RequirementResult {
        updated_at: Utc::now(),
        ..RequirementResult::pending(req)
    };
    match outcome {
        Ok(check) if check.satisfied => RequirementResult {
            status: RequirementStatus::Satisfied,
            current_value: Some(check.current),
            required_value: Some(check.required),
            ..base
        },
        Ok(check) => RequirementResult {
            status: RequirementStatus::Failed,
            current_value: Some(check.current),
            required_value: Some(check.required),
            error_message: Some(check.shortfall),
            failure: Some(FailureKind::Unmet),
            ..base
        },
        Err(e) => {
            let failure = match &e {
                GateError::Transport(_) => FailureKind::Transport,
                GateError::InvalidRequirement { .. } => FailureKind::Invalid,
                _ => FailureKind::ChainRead,
            };
            tracing::warn!(requirement = %req.id, error = %e, "Requirement could not be evaluated");
            RequirementResult {
                status: RequirementStatus::Failed,
                error_message: Some(e.to_string()),
                failure: Some(failure),
                ..base
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryChain, MemoryContract, MemorySocialGraph};

    fn addr(n: u64) -> Address {
        Address::from_low_u64_be(n)
    }

    const ME: u64 = 0x1;
    const TOKEN: u64 = 0xaaa;

    struct Fixture {
        chain: Arc<MemoryChain>,
        social: Arc<MemorySocialGraph>,
        evaluator: RequirementEvaluator,
    }

    fn fixture() -> Fixture {
        let chain = Arc::new(MemoryChain::new());
        let social = Arc::new(MemorySocialGraph::new());
        let reader = Arc::new(ChainDataReader::new(chain.clone()));
        let evaluator = RequirementEvaluator::new(reader, social.clone(), NativeUnit::default());
        Fixture {
            chain,
            social,
            evaluator,
        }
    }

    fn req(id: &str, kind: RequirementKind) -> Requirement {
        Requirement {
            id: id.into(),
            display_name: id.into(),
            kind,
        }
    }

    fn native(min: &str) -> Requirement {
        req("lyx", RequirementKind::NativeBalance { minimum_wei: min.into() })
    }

    fn nft(min: Option<&str>) -> Requirement {
        req(
            "nft",
            RequirementKind::NonFungibleToken {
                contract_address: addr(TOKEN),
                minimum_amount: min.map(String::from),
                symbol: None,
                name: None,
            },
        )
    }

    #[tokio::test]
    async fn native_balance_exact_above_2_pow_53() {
        let f = fixture();
        f.chain.set_native_balance(addr(ME), U256::from_dec_str("99999999999999999999").unwrap());

        let result = f.evaluator.evaluate(&native("100000000000000000000"), addr(ME)).await;
        assert_eq!(result.status, RequirementStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::Unmet));
        assert_eq!(result.error_message.as_deref(), Some("Minimum 100 LYX required"));

        f.chain.set_native_balance(addr(ME), U256::from_dec_str("100000000000000000000").unwrap());
        let result = f.evaluator.evaluate(&native("100000000000000000000"), addr(ME)).await;
        assert_eq!(result.status, RequirementStatus::Satisfied);
        assert_eq!(result.current_value.as_deref(), Some("100000000000000000000"));
    }

    #[tokio::test]
    async fn fungible_shortfall_message() {
        let f = fixture();
        f.chain.deploy(
            addr(TOKEN),
            MemoryContract::token()
                .with_lsp4("Chill", "CHILL")
                .with_decimals(18)
                .with_balance(addr(ME), U256::from(3) * U256::exp10(18) / U256::from(2)),
        );
        let requirement = req(
            "chill",
            RequirementKind::FungibleToken {
                contract_address: addr(TOKEN),
                minimum_amount: Some((U256::from(50) * U256::exp10(18)).to_string()),
                symbol: None,
                name: None,
            },
        );
        let result = f.evaluator.evaluate(&requirement, addr(ME)).await;
        assert_eq!(result.status, RequirementStatus::Failed);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Insufficient Chill (CHILL) balance: have 1.5, need 50")
        );
    }

    #[tokio::test]
    async fn cached_names_override_metadata() {
        let f = fixture();
        f.chain.deploy(addr(TOKEN), MemoryContract::token().with_lsp4("Chain Name", "CN"));
        let requirement = req(
            "t",
            RequirementKind::FungibleToken {
                contract_address: addr(TOKEN),
                minimum_amount: Some("1".into()),
                symbol: Some("SAVED".into()),
                name: Some("Saved Name".into()),
            },
        );
        let result = f.evaluator.evaluate(&requirement, addr(ME)).await;
        let message = result.error_message.unwrap();
        assert!(message.contains("Saved Name (SAVED)"), "{message}");
    }

    #[tokio::test]
    async fn nft_defaults_to_one_unit() {
        let f = fixture();
        f.chain.deploy(addr(TOKEN), MemoryContract::token().with_lsp4("Pass", "PASS"));

        let result = f.evaluator.evaluate(&nft(None), addr(ME)).await;
        assert_eq!(result.status, RequirementStatus::Failed);
        assert_eq!(result.required_value.as_deref(), Some("1"));
        assert_eq!(result.error_message.as_deref(), Some("Pass (PASS): need 1, have 0"));

        f.chain.update(addr(TOKEN), |c| {
            c.balances.insert(addr(ME), U256::one());
        });
        let result = f.evaluator.evaluate(&nft(None), addr(ME)).await;
        assert_eq!(result.status, RequirementStatus::Satisfied);
    }

    #[tokio::test]
    async fn nft_unit_counts() {
        let f = fixture();
        f.chain.deploy(addr(TOKEN), MemoryContract::token().with_lsp4("Pass", "PASS"));
        let result = f.evaluator.evaluate(&nft(Some("2")), addr(ME)).await;
        assert!(result.error_message.unwrap().contains("need 2, have 0"));
    }

    #[tokio::test]
    async fn unreadable_contract_is_not_zero_balance() {
        let f = fixture();
        f.chain.deploy(addr(TOKEN), MemoryContract::reverting());
        let result = f.evaluator.evaluate(&nft(None), addr(ME)).await;
        assert_eq!(result.status, RequirementStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::ChainRead));
        assert!(result.current_value.is_none());
        assert!(result.error_message.unwrap().contains("Could not read contract"));
    }

    #[tokio::test]
    async fn transport_failure_is_preserved() {
        let f = fixture();
        f.chain.set_offline(true);
        let result = f.evaluator.evaluate(&native("1"), addr(ME)).await;
        assert_eq!(result.failure, Some(FailureKind::Transport));
        assert!(result.error_message.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn follower_count_message_has_both_numbers() {
        let f = fixture();
        f.social.set_follower_count(addr(ME), 7);
        let requirement = req(
            "fans",
            RequirementKind::FollowerCount {
                minimum_count: 10,
                direction: FollowDirection::FollowersOfSubject,
            },
        );
        let result = f.evaluator.evaluate(&requirement, addr(ME)).await;
        assert_eq!(result.status, RequirementStatus::Failed);
        let message = result.error_message.unwrap();
        assert!(message.contains('7') && message.contains("10"), "{message}");
    }

    #[tokio::test]
    async fn following_count_direction() {
        let f = fixture();
        f.social.follow(addr(ME), addr(2));
        f.social.follow(addr(ME), addr(3));
        let requirement = req(
            "active",
            RequirementKind::FollowerCount {
                minimum_count: 2,
                direction: FollowDirection::FollowingBySubject,
            },
        );
        let result = f.evaluator.evaluate(&requirement, addr(ME)).await;
        assert_eq!(result.status, RequirementStatus::Satisfied);
    }

    #[tokio::test]
    async fn pairwise_relations() {
        let f = fixture();
        f.social.follow(addr(9), addr(ME));

        let followed_by = req("by", RequirementKind::FollowedBy { counterpart_address: addr(9) });
        let following = req("to", RequirementKind::Following { counterpart_address: addr(9) });

        assert!(f.evaluator.evaluate(&followed_by, addr(ME)).await.is_satisfied());
        let result = f.evaluator.evaluate(&following, addr(ME)).await;
        assert_eq!(result.status, RequirementStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::Unmet));
    }

    #[tokio::test]
    async fn registry_outage_fails_softly() {
        let f = fixture();
        f.social.set_offline(true);
        let following = req("to", RequirementKind::Following { counterpart_address: addr(9) });
        let result = f.evaluator.evaluate(&following, addr(ME)).await;
        assert_eq!(result.failure, Some(FailureKind::Transport));
    }

    #[test]
    fn validation_rejects_malformed_sets() {
        assert!(validate_requirements(&[native("-5")]).is_err());
        assert!(validate_requirements(&[native("1"), native("2")]).is_err());
        let unnamed = req(
            "",
            RequirementKind::NativeBalance {
                minimum_wei: "1".into(),
            },
        );
        assert!(validate_requirements(&[unnamed]).is_err());
        assert!(validate_requirements(&[req(
            "zero",
            RequirementKind::Following { counterpart_address: Address::zero() }
        )])
        .is_err());
        assert!(validate_requirements(&[native("1"), nft(None)]).is_ok());
        assert!(validate_requirements(&[]).is_ok());
    }

    #[tokio::test]
    async fn unvalidated_garbage_is_reported_as_invalid() {
        let f = fixture();
        let result = f.evaluator.evaluate(&native("lots"), addr(ME)).await;
        assert_eq!(result.failure, Some(FailureKind::Invalid));
    }
}
