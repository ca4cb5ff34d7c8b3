//! Storage adapters for voxrate
//!
//! Implements the storage traits from voxrate-core on top of Redis, plus an
//! in-process [`MemoryStorage`] for tests and embedded hosts. [`Backend`]
//! picks one of them from the `storage` configuration section.
//!
//! # Features
//!
//! - Connection pooling via Redis ConnectionManager
//! - JSON documents via serde_json, one key per entity
//! - Audit lists for call costs, trigger and action timing executions
//! - Comprehensive error handling with conversion to AppError
//!
//! # Example
//!
//! ```no_run
//! use voxrate_storage::RedisStorage;
//! use voxrate_core::traits::AccountingStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = RedisStorage::new("redis://127.0.0.1:6379").await?;
//!
//!     let account = storage.get_account("*out:vdf:rif").await?;
//!     println!("{:?}", account);
//!
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod backend;
pub mod keys;
pub mod memory;

pub use audit::AuditEntry;
pub use backend::Backend;
pub use memory::MemoryStorage;

use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error, warn};
use voxrate_core::error::AppError;
use voxrate_core::models::{
    Action, ActionTiming, ActionTrigger, CallCost, Destination, RatingProfile, UserBalance,
};
use voxrate_core::traits::{AccountingStorage, DataStorage, LogStorage};

/// Redis-backed storage with connection pooling
///
/// Wraps a Redis ConnectionManager to provide efficient, multiplexed access
/// to Redis. All operations are async and return Results with AppError.
#[derive(Clone)]
pub struct RedisStorage {
    manager: ConnectionManager,
}

impl RedisStorage {
    /// Create a new Redis storage instance
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    ///
    /// # Errors
    ///
    /// Returns `AppError::StorageConnection` if the connection fails
    pub async fn new(url: &str) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::StorageConnection(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to establish Redis connection: {}", e);
            AppError::StorageConnection(format!("Connection failed: {}", e))
        })?;

        debug!("Redis connection established successfully");
        Ok(Self { manager })
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Flush all keys from the current database
    #[cfg(test)]
    pub async fn flush_db(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Convert RedisError to AppError
    fn map_redis_error(err: RedisError) -> AppError {
        match err.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis I/O error: {}", err);
                AppError::StorageConnection(format!("I/O error: {}", err))
            }
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Storage(format!("Type mismatch: {}", err))
            }
            _ => {
                error!("Redis error: {}", err);
                AppError::Storage(err.to_string())
            }
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        debug!("GET {}", key);
        let mut conn = self.manager.clone();

        let result: Option<String> = conn.get(key).await.map_err(Self::map_redis_error)?;

        match result {
            Some(json) => {
                let value = serde_json::from_str::<T>(&json).map_err(|e| {
                    error!("Failed to deserialize value for key {}: {}", key, e);
                    AppError::Serialization(format!("Deserialization failed: {}", e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize + Sync>(&self, key: &str, value: &T) -> Result<(), AppError> {
        debug!("SET {}", key);
        let mut conn = self.manager.clone();

        let json = serde_json::to_string(value).map_err(|e| {
            error!("Failed to serialize value for key {}: {}", key, e);
            AppError::Serialization(format!("Serialization failed: {}", e))
        })?;

        let _: () = conn.set(key, json).await.map_err(Self::map_redis_error)?;
        Ok(())
    }

    async fn push_log(&self, key: &str, entry: &AuditEntry) -> Result<(), AppError> {
        debug!("RPUSH {}", key);
        let mut conn = self.manager.clone();

        let json = serde_json::to_string(entry)?;
        let _: i64 = conn.rpush(key, json).await.map_err(Self::map_redis_error)?;
        let _: bool = conn
            .expire(key, keys::LOG_TTL_SECS)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Read back an audit list, oldest first
    pub async fn audit_entries(&self, key: &str) -> Result<Vec<AuditEntry>, AppError> {
        let mut conn = self.manager.clone();
        let raw: Vec<String> = conn
            .lrange(key, 0, -1)
            .await
            .map_err(Self::map_redis_error)?;
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(AppError::from))
            .collect()
    }
}

#[async_trait]
impl DataStorage for RedisStorage {
    async fn get_rating_profile(&self, key: &str) -> Result<Option<RatingProfile>, AppError> {
        self.get_json(&keys::rating_profile_key(key)).await
    }

    async fn set_rating_profile(&self, profile: &RatingProfile) -> Result<(), AppError> {
        self.set_json(&keys::rating_profile_key(&profile.id), profile)
            .await
    }

    async fn get_destination(&self, id: &str) -> Result<Option<Destination>, AppError> {
        self.get_json(&keys::destination_key(id)).await
    }

    async fn set_destination(&self, destination: &Destination) -> Result<(), AppError> {
        self.set_json(&keys::destination_key(&destination.id), destination)
            .await
    }

    async fn get_actions(&self, id: &str) -> Result<Vec<Action>, AppError> {
        self.get_json::<Vec<Action>>(&keys::actions_key(id))
            .await?
            .ok_or_else(|| AppError::ActionsNotFound(id.to_string()))
    }

    async fn set_actions(&self, id: &str, actions: &[Action]) -> Result<(), AppError> {
        self.set_json(&keys::actions_key(id), &actions).await
    }
}

#[async_trait]
impl AccountingStorage for RedisStorage {
    async fn get_account(&self, key: &str) -> Result<Option<UserBalance>, AppError> {
        self.get_json(&keys::account_key(key)).await
    }

    async fn set_account(&self, account: &UserBalance) -> Result<(), AppError> {
        self.set_json(&keys::account_key(&account.id), account).await
    }
}

#[async_trait]
impl LogStorage for RedisStorage {
    async fn log_call_cost(&self, source: &str, cost: &CallCost) -> Result<(), AppError> {
        let entry = AuditEntry::CallCost {
            source: source.to_string(),
            logged_at: Utc::now(),
            cost: cost.clone(),
        };
        self.push_log(&keys::call_cost_log_key(&cost.account), &entry)
            .await
    }

    async fn log_action_trigger(
        &self,
        account_id: &str,
        source: &str,
        trigger: &ActionTrigger,
        actions: &[Action],
    ) -> Result<(), AppError> {
        let entry = AuditEntry::ActionTrigger {
            source: source.to_string(),
            logged_at: Utc::now(),
            account_id: account_id.to_string(),
            trigger: trigger.clone(),
            actions: actions.to_vec(),
        };
        self.push_log(&keys::trigger_log_key(account_id), &entry)
            .await
    }

    async fn log_action_timing(
        &self,
        source: &str,
        timing: &ActionTiming,
        actions: &[Action],
    ) -> Result<(), AppError> {
        let entry = AuditEntry::ActionTiming {
            source: source.to_string(),
            logged_at: Utc::now(),
            timing: timing.clone(),
            actions: actions.to_vec(),
        };
        self.push_log(&keys::timing_log_key(&timing.id), &entry)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use voxrate_core::models::{AccountType, Balance, BalanceType, Direction};

    async fn setup_storage() -> RedisStorage {
        let storage = RedisStorage::new("redis://127.0.0.1:6379")
            .await
            .expect("Failed to connect to Redis");
        storage.flush_db().await.expect("Failed to flush DB");
        storage
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_ping() {
        let storage = setup_storage().await;
        assert!(storage.ping().await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_destination_round_trip_and_prefix() {
        let storage = setup_storage().await;
        storage
            .set_destination(&Destination::new("NAT", &["0256", "0257", "0723"]))
            .await
            .unwrap();

        assert_eq!(
            storage
                .destination_contains_prefix("NAT", "0256723045")
                .await
                .unwrap(),
            4
        );
        assert_eq!(
            storage.destination_contains_prefix("MISSING", "0256").await.unwrap(),
            0
        );
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_account_round_trip() {
        let storage = setup_storage().await;
        let mut account = UserBalance::new("*out:vdf:rif", AccountType::Prepaid);
        account.add_balance(BalanceType::Monetary, Direction::Out, Balance::new(dec!(10.5)));
        storage.set_account(&account).await.unwrap();

        let loaded = storage.get_account("*out:vdf:rif").await.unwrap().unwrap();
        assert_eq!(loaded, account);
        assert!(storage.get_account("*out:vdf:nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore] // Requires Redis running
    async fn test_missing_actions_is_not_found() {
        let storage = setup_storage().await;
        let err = storage.get_actions("NOPE").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
