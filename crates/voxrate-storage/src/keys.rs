//! Storage key constants and builders for voxrate
//!
//! Provides standardized key naming patterns for all stored entities,
//! ensuring consistency between the Redis adapter and external loaders.
//!
//! # Key Patterns
//!
//! - `rpf:{direction:tenant:tor:subject}` - Rating profiles
//! - `dst:{destination_id}` - Destinations and their prefixes
//! - `act:{actions_id}` - Action bundles
//! - `ubl:{direction:tenant:account}` - Accounts (user balances)
//! - `log:call_cost:{account}` - Call cost audit list
//! - `log:trigger:{account}` - Executed trigger audit list
//! - `log:timing:{timing_id}` - Executed action timing audit list
//!
//! # Example
//!
//! ```
//! use voxrate_storage::keys;
//!
//! let key = keys::rating_profile_key("*out:vdf:0:rif");
//! assert_eq!(key, "rpf:*out:vdf:0:rif");
//!
//! let key = keys::account_key("*out:vdf:minu");
//! assert_eq!(key, "ubl:*out:vdf:minu");
//! ```

/// Prefix for rating profiles
///
/// Format: `rpf:{rating_key}`
pub const RATING_PROFILE_PREFIX: &str = "rpf";

/// Prefix for destinations
///
/// Format: `dst:{destination_id}`
pub const DESTINATION_PREFIX: &str = "dst";

/// Prefix for action bundles
///
/// Format: `act:{actions_id}`
pub const ACTIONS_PREFIX: &str = "act";

/// Prefix for accounts
///
/// Format: `ubl:{account_key}`
pub const ACCOUNT_PREFIX: &str = "ubl";

/// Prefix for call cost logs
pub const CALL_COST_LOG_PREFIX: &str = "log:call_cost";

/// Prefix for trigger execution logs
pub const TRIGGER_LOG_PREFIX: &str = "log:trigger";

/// Prefix for action timing execution logs
pub const TIMING_LOG_PREFIX: &str = "log:timing";

/// Retention of audit log lists (30 days)
pub const LOG_TTL_SECS: i64 = 2_592_000;

/// Build the key of a rating profile
pub fn rating_profile_key(rating_key: &str) -> String {
    format!("{}:{}", RATING_PROFILE_PREFIX, rating_key)
}

/// Build the key of a destination
///
/// # Example
///
/// ```
/// use voxrate_storage::keys::destination_key;
///
/// assert_eq!(destination_key("NAT"), "dst:NAT");
/// ```
pub fn destination_key(destination_id: &str) -> String {
    format!("{}:{}", DESTINATION_PREFIX, destination_id)
}

/// Build the key of an action bundle
pub fn actions_key(actions_id: &str) -> String {
    format!("{}:{}", ACTIONS_PREFIX, actions_id)
}

/// Build the key of an account
pub fn account_key(account_key: &str) -> String {
    format!("{}:{}", ACCOUNT_PREFIX, account_key)
}

/// Build the key of an account's call cost log
pub fn call_cost_log_key(account: &str) -> String {
    format!("{}:{}", CALL_COST_LOG_PREFIX, account)
}

/// Build the key of an account's trigger log
pub fn trigger_log_key(account: &str) -> String {
    format!("{}:{}", TRIGGER_LOG_PREFIX, account)
}

/// Build the key of an action timing's log
pub fn timing_log_key(timing_id: &str) -> String {
    format!("{}:{}", TIMING_LOG_PREFIX, timing_id)
}
