//! Top-level handle: one per chain endpoint.
//!
//! A `Gate` owns the shared chain reader (and with it the metadata and
//! proxy caches) and hands out verification sessions.

use crate::chain::ChainDataReader;
use crate::config::GateConfig;
use crate::error::GateError;
use crate::eval::{NativeUnit, RequirementEvaluator};
use crate::rpc::{ChainRpc, JsonRpcClient};
use crate::session::VerificationSession;
use crate::social::{RegistryClient, SocialGraph};
use crate::types::{FulfillmentPolicy, Requirement};
use crate::wallet::WalletCapability;
use ethers_core::types::Address;
use std::sync::Arc;

#[derive(Clone)]
pub struct Gate {
    evaluator: Arc<RequirementEvaluator>,
}

impl Gate {
    /// Connect to the JSON-RPC endpoint and follower registry in `config`.
    pub fn from_config(config: &GateConfig) -> Result<Self, GateError> {
        let rpc = JsonRpcClient::new(config.rpc_url.clone(), config.call_timeout())
            .map_err(|e| GateError::Config(format!("can't build RPC client: {e}")))?;
        let rpc: Arc<dyn ChainRpc> = Arc::new(rpc);
        let social = Arc::new(RegistryClient::new(
            rpc.clone(),
            config.follower_registry,
            config.social_retry.clone(),
        ));
        tracing::info!(
            rpc_url = %config.rpc_url,
            registry = ?config.follower_registry,
            timeout_secs = config.call_timeout_secs,
            "Gate configured"
        );
        Ok(Self::new(rpc, social, config.native_unit()))
    }

    pub fn new(rpc: Arc<dyn ChainRpc>, social: Arc<dyn SocialGraph>, native: NativeUnit) -> Self {
        let reader = Arc::new(ChainDataReader::new(rpc));
        Self {
            evaluator: Arc::new(RequirementEvaluator::new(reader, social, native)),
        }
    }

    pub fn reader(&self) -> &Arc<ChainDataReader> {
        self.evaluator.reader()
    }

    /// Open an idle session for `identity`.
    pub fn session(
        &self,
        identity: Address,
        requirements: Vec<Requirement>,
        policy: FulfillmentPolicy,
    ) -> Result<VerificationSession, GateError> {
        VerificationSession::new(identity, requirements, policy, self.evaluator.clone())
    }

    /// Open a session for the wallet's connected account. The session goes
    /// stale when the account changes.
    pub fn session_for_wallet(
        &self,
        wallet: &dyn WalletCapability,
        requirements: Vec<Requirement>,
        policy: FulfillmentPolicy,
    ) -> Result<VerificationSession, GateError> {
        let identity = wallet.connected_address().ok_or(GateError::WalletDisconnected)?;
        let session = self.session(identity, requirements, policy)?;
        session.watch_wallet(wallet.accounts_changed());
        Ok(session)
    }
}
