//! Destination matching
//!
//! Resolves a dialed number against destination groups by longest prefix.
//! Destinations are reference data, so they are cached for a while; only
//! successful lookups are cached.

use moka::future::Cache;
use std::sync::Arc;
use tracing::{debug, instrument};
use voxrate_core::config::CacheConfig;
use voxrate_core::models::Destination;
use voxrate_core::traits::DataStorage;
use voxrate_core::AppResult;

/// Longest-prefix matcher over stored destinations
pub struct DestinationMatcher<S: DataStorage> {
    storage: Arc<S>,
    cache: Cache<String, Arc<Destination>>,
}

impl<S: DataStorage> DestinationMatcher<S> {
    pub fn new(storage: Arc<S>, config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_destination_entries)
            .time_to_live(config.destination_ttl())
            .build();
        Self { storage, cache }
    }

    async fn destination(&self, id: &str) -> AppResult<Option<Arc<Destination>>> {
        if let Some(dest) = self.cache.get(id).await {
            return Ok(Some(dest));
        }
        match self.storage.get_destination(id).await? {
            Some(dest) => {
                debug!("Destination cache MISS: {}", id);
                let dest = Arc::new(dest);
                self.cache.insert(id.to_string(), dest.clone()).await;
                Ok(Some(dest))
            }
            None => Ok(None),
        }
    }

    /// Match length of `number` inside destination `destination_id`
    ///
    /// `None` when the destination is unknown or has no matching prefix.
    #[instrument(skip(self))]
    pub async fn match_prefix(&self, destination_id: &str, number: &str) -> AppResult<Option<usize>> {
        let precision = self
            .destination(destination_id)
            .await?
            .map_or(0, |d| d.contains_prefix(number));
        Ok((precision > 0).then_some(precision))
    }

    /// Match length, 0 when nothing matches
    pub async fn precision(&self, destination_id: &str, number: &str) -> AppResult<usize> {
        Ok(self.match_prefix(destination_id, number).await?.unwrap_or(0))
    }

    /// Most specific destination among `ids` for `number`
    ///
    /// Ties keep the first id seen.
    pub async fn best_match<'a, I>(&self, ids: I, number: &str) -> AppResult<Option<(&'a str, usize)>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<(&'a str, usize)> = None;
        for id in ids {
            let precision = self.precision(id, number).await?;
            if precision > best.map_or(0, |(_, p)| p) {
                best = Some((id, precision));
            }
        }
        Ok(best)
    }

    /// Drop every cached destination
    pub fn flush(&self) {
        self.cache.invalidate_all();
    }
}
