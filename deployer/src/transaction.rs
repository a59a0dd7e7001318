// deployer/src/transaction.rs

use dashmap::DashMap;
use ethers::types::{Address, Bytes, U256};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// A contract-creation transaction. Built once per deployment and handed to
/// the node as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentTransaction {
    pub sender: Address,
    /// Creation bytecode followed by the encoded constructor arguments.
    pub payload: Bytes,
    pub gas_limit: U256,
}

impl DeploymentTransaction {
    pub fn new(sender: Address, payload: Bytes, gas_limit: U256) -> Self {
        Self { sender, payload, gas_limit }
    }
}

/// Serializes deployments per sending account. Two transactions in flight
/// from one account would race for the same nonce, so a deployment holds the
/// account's guard from submission until its confirmation settles.
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: DashMap<Address, Arc<Mutex<()>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, account: Address) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await.
        let lock = self.locks.entry(account).or_default().value().clone();
        if lock.try_lock().is_err() {
            debug!(%account, "Another deployment from this account is in flight; waiting");
        }
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_account_is_exclusive() {
        let locks = Arc::new(AccountLocks::new());
        let account = Address::repeat_byte(0x11);

        let guard = locks.acquire(account).await;
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire(account).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn different_accounts_do_not_block() {
        let locks = AccountLocks::new();
        let _a = locks.acquire(Address::repeat_byte(0x11)).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire(Address::repeat_byte(0x22))).await;
        assert!(b.is_ok());
    }
}
