//! Storage selected from configuration

use async_trait::async_trait;
use tracing::info;
use voxrate_core::config::{StorageBackend, StorageConfig};
use voxrate_core::error::AppError;
use voxrate_core::models::{
    Action, ActionTiming, ActionTrigger, CallCost, Destination, RatingProfile, UserBalance,
};
use voxrate_core::traits::{AccountingStorage, DataStorage, LogStorage};

use crate::{MemoryStorage, RedisStorage};

/// The backend named by `storage.backend`
pub enum Backend {
    Redis(RedisStorage),
    Memory(MemoryStorage),
}

impl Backend {
    /// Open the configured backend
    ///
    /// # Errors
    ///
    /// Returns `AppError::StorageConnection` when Redis cannot be reached
    pub async fn from_config(config: &StorageConfig) -> Result<Self, AppError> {
        let backend = match config.backend {
            StorageBackend::Redis => Backend::Redis(RedisStorage::new(&config.redis_url).await?),
            StorageBackend::Memory => Backend::Memory(MemoryStorage::new()),
        };
        info!("Using {} storage", backend.name());
        Ok(backend)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Backend::Redis(_) => "redis",
            Backend::Memory(_) => "memory",
        }
    }
}

#[async_trait]
impl DataStorage for Backend {
    async fn get_rating_profile(&self, key: &str) -> Result<Option<RatingProfile>, AppError> {
        match self {
            Backend::Redis(s) => s.get_rating_profile(key).await,
            Backend::Memory(s) => s.get_rating_profile(key).await,
        }
    }

    async fn set_rating_profile(&self, profile: &RatingProfile) -> Result<(), AppError> {
        match self {
            Backend::Redis(s) => s.set_rating_profile(profile).await,
            Backend::Memory(s) => s.set_rating_profile(profile).await,
        }
    }

    async fn get_destination(&self, id: &str) -> Result<Option<Destination>, AppError> {
        match self {
            Backend::Redis(s) => s.get_destination(id).await,
            Backend::Memory(s) => s.get_destination(id).await,
        }
    }

    async fn set_destination(&self, destination: &Destination) -> Result<(), AppError> {
        match self {
            Backend::Redis(s) => s.set_destination(destination).await,
            Backend::Memory(s) => s.set_destination(destination).await,
        }
    }

    async fn destination_contains_prefix(&self, id: &str, prefix: &str) -> Result<usize, AppError> {
        match self {
            Backend::Redis(s) => s.destination_contains_prefix(id, prefix).await,
            Backend::Memory(s) => s.destination_contains_prefix(id, prefix).await,
        }
    }

    async fn get_actions(&self, id: &str) -> Result<Vec<Action>, AppError> {
        match self {
            Backend::Redis(s) => s.get_actions(id).await,
            Backend::Memory(s) => s.get_actions(id).await,
        }
    }

    async fn set_actions(&self, id: &str, actions: &[Action]) -> Result<(), AppError> {
        match self {
            Backend::Redis(s) => s.set_actions(id, actions).await,
            Backend::Memory(s) => s.set_actions(id, actions).await,
        }
    }
}

#[async_trait]
impl AccountingStorage for Backend {
    async fn get_account(&self, key: &str) -> Result<Option<UserBalance>, AppError> {
        match self {
            Backend::Redis(s) => s.get_account(key).await,
            Backend::Memory(s) => s.get_account(key).await,
        }
    }

    async fn set_account(&self, account: &UserBalance) -> Result<(), AppError> {
        match self {
            Backend::Redis(s) => s.set_account(account).await,
            Backend::Memory(s) => s.set_account(account).await,
        }
    }
}

#[async_trait]
impl LogStorage for Backend {
    async fn log_call_cost(&self, source: &str, cost: &CallCost) -> Result<(), AppError> {
        match self {
            Backend::Redis(s) => s.log_call_cost(source, cost).await,
            Backend::Memory(s) => s.log_call_cost(source, cost).await,
        }
    }

    async fn log_action_trigger(
        &self,
        account_id: &str,
        source: &str,
        trigger: &ActionTrigger,
        actions: &[Action],
    ) -> Result<(), AppError> {
        match self {
            Backend::Redis(s) => s.log_action_trigger(account_id, source, trigger, actions).await,
            Backend::Memory(s) => s.log_action_trigger(account_id, source, trigger, actions).await,
        }
    }

    async fn log_action_timing(
        &self,
        source: &str,
        timing: &ActionTiming,
        actions: &[Action],
    ) -> Result<(), AppError> {
        match self {
            Backend::Redis(s) => s.log_action_timing(source, timing, actions).await,
            Backend::Memory(s) => s.log_action_timing(source, timing, actions).await,
        }
    }
}
