//! Per-account lock table
//!
//! Load-mutate-store sequences on one account run one at a time; different
//! accounts proceed in parallel. Entries are dropped from the table once no
//! task holds or waits for them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::trace;

type Entry = Arc<AsyncMutex<()>>;

/// Mutual exclusion keyed by account id
#[derive(Default)]
pub struct AccountLocks {
    table: Mutex<HashMap<String, Entry>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` while holding the lock of `key`
    pub async fn guard<F, T>(&self, key: &str, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let entry = self.table.lock().entry(key.to_string()).or_default().clone();
        let _release = Release {
            table: &self.table,
            key,
            entry: entry.clone(),
        };

        let _held = entry.lock().await;
        trace!("Holding account lock {}", key);
        fut.await
    }

    /// Number of accounts currently locked or awaited
    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Removes the table entry when the last user goes away, even on cancellation
struct Release<'a> {
    table: &'a Mutex<HashMap<String, Entry>>,
    key: &'a str,
    entry: Entry,
}

impl Drop for Release<'_> {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        let idle = table
            .get(self.key)
            .map_or(false, |current| Arc::ptr_eq(current, &self.entry) && Arc::strong_count(current) <= 3);
        if idle {
            table.remove(self.key);
        }
    }
}
