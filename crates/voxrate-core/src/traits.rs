//! Storage traits consumed by the engine
//!
//! Reference data (profiles, destinations, action bundles) is read-mostly and
//! loaded by external tooling. Accounts are read and written on every debit.
//! The logging hooks record what the engine did for later auditing.

use async_trait::async_trait;

use crate::error::AppError;
use crate::models::{
    Action, ActionTiming, ActionTrigger, CallCost, Destination, RatingProfile, UserBalance,
};

/// Tariff reference data
#[async_trait]
pub trait DataStorage: Send + Sync {
    /// Fetch a rating profile by key `direction:tenant:tor:subject`
    async fn get_rating_profile(&self, key: &str) -> Result<Option<RatingProfile>, AppError>;

    /// Store a rating profile under its id
    async fn set_rating_profile(&self, profile: &RatingProfile) -> Result<(), AppError>;

    /// Fetch a destination by id
    async fn get_destination(&self, id: &str) -> Result<Option<Destination>, AppError>;

    /// Store a destination under its id
    async fn set_destination(&self, destination: &Destination) -> Result<(), AppError>;

    /// Longest prefix of `prefix` found in destination `id`, 0 when none
    async fn destination_contains_prefix(&self, id: &str, prefix: &str) -> Result<usize, AppError> {
        Ok(self
            .get_destination(id)
            .await?
            .map_or(0, |d| d.contains_prefix(prefix)))
    }

    /// Fetch an action bundle
    async fn get_actions(&self, id: &str) -> Result<Vec<Action>, AppError>;

    /// Store an action bundle
    async fn set_actions(&self, id: &str, actions: &[Action]) -> Result<(), AppError>;
}

/// Account persistence
#[async_trait]
pub trait AccountingStorage: Send + Sync {
    /// Fetch an account by key `direction:tenant:account`
    async fn get_account(&self, key: &str) -> Result<Option<UserBalance>, AppError>;

    /// Persist an account under its id
    async fn set_account(&self, account: &UserBalance) -> Result<(), AppError>;
}

/// Audit hooks
#[async_trait]
pub trait LogStorage: Send + Sync {
    /// Record a rated and debited call cost
    async fn log_call_cost(&self, source: &str, cost: &CallCost) -> Result<(), AppError>;

    /// Record a trigger execution on an account
    async fn log_action_trigger(
        &self,
        account_id: &str,
        source: &str,
        trigger: &ActionTrigger,
        actions: &[Action],
    ) -> Result<(), AppError>;

    /// Record an action timing execution
    async fn log_action_timing(
        &self,
        source: &str,
        timing: &ActionTiming,
        actions: &[Action],
    ) -> Result<(), AppError>;
}

/// Everything the engine needs from a backend
pub trait Storage: DataStorage + AccountingStorage + LogStorage + 'static {}

impl<T> Storage for T where T: DataStorage + AccountingStorage + LogStorage + 'static {}
