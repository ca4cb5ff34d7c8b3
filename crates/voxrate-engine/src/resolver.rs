//! Rating plan resolution
//!
//! Finds the rating plans that apply to a call: the rating profile of the
//! call's key is searched for the destination with the longest prefix match;
//! if none matches, its fallback keys are walked depth first, and finally the
//! fallback subject is tried. Results are cached for slightly longer than a
//! debit period, so a session does not hit storage on every slice.

use moka::future::Cache;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use voxrate_core::config::AppConfig;
use voxrate_core::models::{CallDescriptor, RatingPlan};
use voxrate_core::traits::DataStorage;
use voxrate_core::{AppError, AppResult};

use crate::destinations::DestinationMatcher;

/// Outcome of a successful resolution
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPlans {
    /// Rating key whose profile matched
    pub key: String,

    /// Subject part of that key
    pub subject: String,

    /// Part of the dialed number that matched a destination
    pub matched_prefix: String,

    /// Plan activations, ordered by activation time
    pub plans: Vec<RatingPlan>,
}

/// Walks rating profiles and their fallbacks
pub struct RatingPlanResolver<S: DataStorage> {
    storage: Arc<S>,
    destinations: Arc<DestinationMatcher<S>>,
    cache: Cache<String, Arc<ResolvedPlans>>,
    max_depth: usize,
    fallback_subject: String,
}

fn subject_of(key: &str) -> String {
    key.splitn(4, ':').nth(3).unwrap_or(key).to_string()
}

impl<S: DataStorage> RatingPlanResolver<S> {
    pub fn new(storage: Arc<S>, destinations: Arc<DestinationMatcher<S>>, config: &AppConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache.max_plan_entries)
            .time_to_live(config.cache.plan_ttl(&config.session))
            .build();
        Self {
            storage,
            destinations,
            cache,
            max_depth: config.rating.max_fallback_depth,
            fallback_subject: config.rating.fallback_subject.clone(),
        }
    }

    /// Resolve the plans for a descriptor
    ///
    /// # Errors
    ///
    /// - `AppError::RateNotFound` when neither the key, its fallbacks nor the
    ///   fallback subject has a plan for the destination
    /// - `AppError::RecursionLimitExceeded` on fallback chains deeper than the
    ///   configured limit (cycles included)
    #[instrument(skip(self, cd), fields(key = %cd.key(), destination = %cd.destination))]
    pub async fn resolve(&self, cd: &CallDescriptor) -> AppResult<Arc<ResolvedPlans>> {
        let key = cd.key();
        let destination = cd.destination.trim();
        let cache_key = format!("{}:{}", key, destination);

        if let Some(hit) = self.cache.get(&cache_key).await {
            debug!("Plan cache HIT for {}", cache_key);
            return Ok(hit);
        }

        let mut resolved = self.walk(&key, destination).await?;
        if resolved.is_none() {
            let fallback = cd
                .fallback_subject
                .as_deref()
                .unwrap_or(&self.fallback_subject);
            if fallback != cd.subject {
                debug!("Trying fallback subject {}", fallback);
                resolved = self.walk(&cd.key_for_subject(fallback), destination).await?;
            }
        }

        let resolved = Arc::new(resolved.ok_or_else(|| {
            warn!("No rating plan for {} to {}", key, destination);
            AppError::RateNotFound {
                key: key.clone(),
                destination: destination.to_string(),
            }
        })?);

        self.cache.insert(cache_key, resolved.clone()).await;
        Ok(resolved)
    }

    async fn walk(&self, key: &str, destination: &str) -> AppResult<Option<ResolvedPlans>> {
        let mut pending = vec![(key.to_string(), 0usize)];

        while let Some((key, depth)) = pending.pop() {
            if depth > self.max_depth {
                return Err(AppError::RecursionLimitExceeded { key, depth });
            }
            let Some(profile) = self.storage.get_rating_profile(&key).await? else {
                debug!("No rating profile for {}", key);
                continue;
            };

            let best = self
                .destinations
                .best_match(profile.destination_map.keys().map(String::as_str), destination)
                .await?
                .map(|(id, precision)| (id.to_string(), precision));

            if let Some((destination_id, precision)) = best {
                let plans = profile
                    .destination_map
                    .get(&destination_id)
                    .cloned()
                    .unwrap_or_default();
                debug!(
                    "Matched destination {} ({} digits) in profile {}",
                    destination_id, precision, key
                );
                return Ok(Some(ResolvedPlans {
                    subject: subject_of(&key),
                    matched_prefix: destination.get(..precision).unwrap_or(destination).to_string(),
                    key,
                    plans,
                }));
            }

            for fallback in profile.fallback_keys().into_iter().rev() {
                pending.push((fallback, depth + 1));
            }
        }

        Ok(None)
    }

    /// Forget every cached resolution
    pub fn flush(&self) {
        self.cache.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use voxrate_core::config::CacheConfig;
    use voxrate_core::models::{Destination, RatingProfile};
    use voxrate_storage::MemoryStorage;

    fn plan(day: u32) -> RatingPlan {
        RatingPlan::new(Utc.with_ymd_and_hms(2012, 1, day, 0, 0, 0).unwrap(), vec![])
    }

    async fn resolver(profiles: Vec<RatingProfile>) -> RatingPlanResolver<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_destination(&Destination::new("NAT", &["0256", "0257", "0723"]))
            .await
            .unwrap();
        storage
            .set_destination(&Destination::new("RET", &["0723045"]))
            .await
            .unwrap();
        for profile in profiles {
            storage.set_rating_profile(&profile).await.unwrap();
        }
        let matcher = Arc::new(DestinationMatcher::new(storage.clone(), &CacheConfig::default()));
        RatingPlanResolver::new(storage, matcher, &AppConfig::default())
    }

    fn call(subject: &str, destination: &str) -> CallDescriptor {
        let at = Utc.with_ymd_and_hms(2012, 2, 2, 17, 0, 0).unwrap();
        CallDescriptor::new("vdf", subject, destination, at, at)
    }

    #[test]
    fn test_subject_of_key() {
        assert_eq!(subject_of("*out:vdf:0:rif"), "rif");
        assert_eq!(subject_of("odd"), "odd");
    }

    #[tokio::test]
    async fn test_longest_destination_wins() {
        let mut rp = RatingProfile::new("*out:vdf:0:rif");
        rp.add_rating_plan("NAT", plan(1));
        rp.add_rating_plan("RET", plan(2));
        let resolver = resolver(vec![rp]).await;

        let resolved = resolver.resolve(&call("rif", "0723045326")).await.unwrap();
        assert_eq!(resolved.matched_prefix, "0723045");
        assert_eq!(resolved.plans, vec![plan(2)]);
        assert_eq!(resolved.subject, "rif");
    }

    #[tokio::test]
    async fn test_fallback_chain_walked_in_order() {
        let first = RatingProfile::new("*out:vdf:0:rif").with_fallback("*out:vdf:0:empty;*out:vdf:0:base");
        let empty = RatingProfile::new("*out:vdf:0:empty");
        let mut base = RatingProfile::new("*out:vdf:0:base");
        base.add_rating_plan("NAT", plan(3));
        let resolver = resolver(vec![first, empty, base]).await;

        let resolved = resolver.resolve(&call("rif", "0256123")).await.unwrap();
        assert_eq!(resolved.key, "*out:vdf:0:base");
        assert_eq!(resolved.matched_prefix, "0256");
    }

    #[tokio::test]
    async fn test_fallback_subject_any() {
        let mut any = RatingProfile::new("*out:vdf:0:*any");
        any.add_rating_plan("NAT", plan(4));
        let resolver = resolver(vec![any]).await;

        let resolved = resolver.resolve(&call("nobody", "0257")).await.unwrap();
        assert_eq!(resolved.subject, "*any");
    }

    #[tokio::test]
    async fn test_fallback_cycle_is_fatal() {
        let a = RatingProfile::new("*out:vdf:0:a").with_fallback("*out:vdf:0:b");
        let b = RatingProfile::new("*out:vdf:0:b").with_fallback("*out:vdf:0:a");
        let resolver = resolver(vec![a, b]).await;

        let err = resolver.resolve(&call("a", "0256")).await.unwrap_err();
        assert!(matches!(err, AppError::RecursionLimitExceeded { depth: 11, .. }));
    }

    #[tokio::test]
    async fn test_no_plan_is_rate_not_found() {
        let mut rp = RatingProfile::new("*out:vdf:0:rif");
        rp.add_rating_plan("NAT", plan(1));
        let resolver = resolver(vec![rp]).await;

        let err = resolver.resolve(&call("rif", "0049")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_resolution_is_cached_until_flush() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_destination(&Destination::new("NAT", &["0256"]))
            .await
            .unwrap();
        let mut rp = RatingProfile::new("*out:vdf:0:rif");
        rp.add_rating_plan("NAT", plan(1));
        storage.set_rating_profile(&rp).await.unwrap();
        let matcher = Arc::new(DestinationMatcher::new(storage.clone(), &CacheConfig::default()));
        let resolver = RatingPlanResolver::new(storage.clone(), matcher, &AppConfig::default());

        assert_eq!(resolver.resolve(&call("rif", "0256")).await.unwrap().plans, vec![plan(1)]);

        let mut reloaded = RatingProfile::new("*out:vdf:0:rif");
        reloaded.add_rating_plan("NAT", plan(5));
        storage.set_rating_profile(&reloaded).await.unwrap();
        assert_eq!(resolver.resolve(&call("rif", "0256")).await.unwrap().plans, vec![plan(1)]);

        resolver.flush();
        assert_eq!(resolver.resolve(&call("rif", "0256")).await.unwrap().plans, vec![plan(5)]);
    }
}
