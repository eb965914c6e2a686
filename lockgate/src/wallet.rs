//! Wallet connection, as consumed by the engine.
//!
//! The engine never talks to a wallet extension. The host reports the
//! connected account and pushes account changes; sessions bound to a
//! wallet go stale when the account changes underneath them.

use ethers_core::types::Address;
use tokio::sync::watch;

pub trait WalletCapability: Send + Sync {
    /// Currently connected account, if any.
    fn connected_address(&self) -> Option<Address>;

    /// Stream of account changes. `None` means disconnected.
    fn accounts_changed(&self) -> watch::Receiver<Option<Address>>;
}

/// Wallet state driven by the host via [`WatchWallet::set_account`].
#[derive(Debug)]
pub struct WatchWallet {
    tx: watch::Sender<Option<Address>>,
}

impl WatchWallet {
    pub fn new(account: Option<Address>) -> Self {
        let (tx, _rx) = watch::channel(account);
        Self { tx }
    }

    pub fn set_account(&self, account: Option<Address>) {
        self.tx.send_if_modified(|current| {
            if *current == account {
                return false;
            }
            tracing::info!(from = ?current, to = ?account, "Wallet account changed");
            *current = account;
            true
        });
    }
}

impl WalletCapability for WatchWallet {
    fn connected_address(&self) -> Option<Address> {
        *self.tx.borrow()
    }

    fn accounts_changed(&self) -> watch::Receiver<Option<Address>> {
        self.tx.subscribe()
    }
}
