//! In-process storage
//!
//! Keeps every entity in maps guarded by `parking_lot` locks. Values are
//! cloned in and out so callers never share state with the store.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use voxrate_core::error::AppError;
use voxrate_core::models::{
    Action, ActionTiming, ActionTrigger, CallCost, Destination, RatingProfile, UserBalance,
};
use voxrate_core::traits::{AccountingStorage, DataStorage, LogStorage};

use crate::audit::AuditEntry;

/// Map-backed storage
#[derive(Default)]
pub struct MemoryStorage {
    rating_profiles: RwLock<HashMap<String, RatingProfile>>,
    destinations: RwLock<HashMap<String, Destination>>,
    actions: RwLock<HashMap<String, Vec<Action>>>,
    accounts: RwLock<HashMap<String, UserBalance>>,
    audit: RwLock<Vec<AuditEntry>>,
    fail_account_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every audit entry, oldest first
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.read().clone()
    }

    /// Make account writes fail, simulating an unreachable backend
    pub fn set_fail_account_writes(&self, fail: bool) {
        self.fail_account_writes.store(fail, Ordering::SeqCst);
    }

    fn push_audit(&self, entry: AuditEntry) {
        self.audit.write().push(entry);
    }
}

#[async_trait]
impl DataStorage for MemoryStorage {
    async fn get_rating_profile(&self, key: &str) -> Result<Option<RatingProfile>, AppError> {
        Ok(self.rating_profiles.read().get(key).cloned())
    }

    async fn set_rating_profile(&self, profile: &RatingProfile) -> Result<(), AppError> {
        self.rating_profiles
            .write()
            .insert(profile.id.clone(), profile.clone());
        Ok(())
    }

    async fn get_destination(&self, id: &str) -> Result<Option<Destination>, AppError> {
        Ok(self.destinations.read().get(id).cloned())
    }

    async fn set_destination(&self, destination: &Destination) -> Result<(), AppError> {
        self.destinations
            .write()
            .insert(destination.id.clone(), destination.clone());
        Ok(())
    }

    async fn get_actions(&self, id: &str) -> Result<Vec<Action>, AppError> {
        self.actions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::ActionsNotFound(id.to_string()))
    }

    async fn set_actions(&self, id: &str, actions: &[Action]) -> Result<(), AppError> {
        self.actions.write().insert(id.to_string(), actions.to_vec());
        Ok(())
    }
}

#[async_trait]
impl AccountingStorage for MemoryStorage {
    async fn get_account(&self, key: &str) -> Result<Option<UserBalance>, AppError> {
        Ok(self.accounts.read().get(key).cloned())
    }

    async fn set_account(&self, account: &UserBalance) -> Result<(), AppError> {
        if self.fail_account_writes.load(Ordering::SeqCst) {
            return Err(AppError::Storage(format!(
                "write refused for account {}",
                account.id
            )));
        }
        debug!("Storing account {}", account.id);
        self.accounts
            .write()
            .insert(account.id.clone(), account.clone());
        Ok(())
    }
}

#[async_trait]
impl LogStorage for MemoryStorage {
    async fn log_call_cost(&self, source: &str, cost: &CallCost) -> Result<(), AppError> {
        self.push_audit(AuditEntry::CallCost {
            source: source.to_string(),
            logged_at: Utc::now(),
            cost: cost.clone(),
        });
        Ok(())
    }

    async fn log_action_trigger(
        &self,
        account_id: &str,
        source: &str,
        trigger: &ActionTrigger,
        actions: &[Action],
    ) -> Result<(), AppError> {
        self.push_audit(AuditEntry::ActionTrigger {
            source: source.to_string(),
            logged_at: Utc::now(),
            account_id: account_id.to_string(),
            trigger: trigger.clone(),
            actions: actions.to_vec(),
        });
        Ok(())
    }

    async fn log_action_timing(
        &self,
        source: &str,
        timing: &ActionTiming,
        actions: &[Action],
    ) -> Result<(), AppError> {
        self.push_audit(AuditEntry::ActionTiming {
            source: source.to_string(),
            logged_at: Utc::now(),
            timing: timing.clone(),
            actions: actions.to_vec(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use voxrate_core::models::{AccountType, Balance, BalanceType, Direction};

    #[tokio::test]
    async fn test_account_write_failure() {
        let storage = MemoryStorage::new();
        let account = UserBalance::new("*out:vdf:rif", AccountType::Prepaid);

        storage.set_fail_account_writes(true);
        let err = storage.set_account(&account).await.unwrap_err();
        assert!(err.is_storage());

        storage.set_fail_account_writes(false);
        storage.set_account(&account).await.unwrap();
        assert!(storage.get_account("*out:vdf:rif").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_values_are_copied() {
        let storage = MemoryStorage::new();
        let mut account = UserBalance::new("*out:vdf:rif", AccountType::Prepaid);
        account.add_balance(BalanceType::Monetary, Direction::Out, Balance::new(dec!(10)));
        storage.set_account(&account).await.unwrap();

        let mut loaded = storage.get_account("*out:vdf:rif").await.unwrap().unwrap();
        loaded.zero_balances();

        let again = storage.get_account("*out:vdf:rif").await.unwrap().unwrap();
        assert_eq!(again.total(BalanceType::Monetary, Direction::Out), dec!(10));
    }

    #[tokio::test]
    async fn test_default_prefix_lookup() {
        let storage = MemoryStorage::new();
        storage
            .set_destination(&Destination::new("NAT", &["0256", "0257", "0723"]))
            .await
            .unwrap();
        assert_eq!(
            storage.destination_contains_prefix("NAT", "0256723045").await.unwrap(),
            4
        );
        assert_eq!(
            storage.destination_contains_prefix("NAT", "01234567").await.unwrap(),
            0
        );
    }
}
