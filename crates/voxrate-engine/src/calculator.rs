//! Cost calculation over split timespans

use chrono::Duration;
use rust_decimal::Decimal;
use tracing::debug;
use voxrate_core::config::RatingPolicy;
use voxrate_core::models::{CallCost, CallDescriptor, Increment, RoundingMethod, TimeSpan};
use voxrate_core::utils;

use crate::resolver::ResolvedPlans;

/// Prices timespans and totals them into a [`CallCost`]
#[derive(Debug, Clone)]
pub struct CostCalculator {
    policy: RatingPolicy,
}

impl CostCalculator {
    pub fn new(policy: RatingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RatingPolicy {
        &self.policy
    }

    /// Price every span and build the call cost
    ///
    /// The connect fee of the first span's interval is charged only on the
    /// first rating of a call (`loop_index == 0`). The total is rounded with
    /// the global rounding policy and the difference is settled on the last
    /// increments, so the cost always equals the connect fee plus the
    /// increments that get debited.
    pub fn price(&self, cd: &CallDescriptor, resolved: &ResolvedPlans, mut spans: Vec<TimeSpan>) -> CallCost {
        for span in spans.iter_mut() {
            price_span(span);
        }

        let connect_fee = if cd.loop_index == 0 {
            spans
                .first()
                .and_then(|ts| ts.rate_interval.as_ref())
                .map_or(Decimal::ZERO, |ri| ri.connect_fee)
        } else {
            Decimal::ZERO
        };

        let raw: Decimal = spans.iter().map(|ts| ts.cost).sum();
        let cost = utils::round(
            raw + connect_fee,
            self.policy.rounding_decimals,
            self.policy.rounding_method,
        );
        let unsettled = settle_rounding(&mut spans, cost - raw - connect_fee);
        // only a rounding below the connect fee itself is left over
        let connect_fee = connect_fee + unsettled;
        debug!(
            "Priced {} spans for {}: {} (connect fee {})",
            spans.len(),
            cd.key(),
            cost,
            connect_fee
        );

        CallCost {
            subject: resolved.subject.clone(),
            destination: resolved.matched_prefix.clone(),
            cost,
            connect_fee,
            timespans: spans,
            ..CallCost::for_descriptor(cd)
        }
    }
}

/// Spread a rounding difference over the increments, latest first
///
/// A positive difference lands on the last increment. A negative one is taken
/// from the latest increments without driving any below zero. Returns what
/// the increments could not absorb.
fn settle_rounding(spans: &mut [TimeSpan], difference: Decimal) -> Decimal {
    if difference.is_zero() {
        return Decimal::ZERO;
    }
    let mut left = difference;
    for span in spans.iter_mut().rev() {
        for inc in span.increments.iter_mut().rev() {
            let delta = if left > Decimal::ZERO {
                left
            } else {
                left.max(-inc.cost)
            };
            inc.cost += delta;
            span.cost += delta;
            left -= delta;
            if left.is_zero() {
                return Decimal::ZERO;
            }
        }
    }
    left
}

/// Set the span cost and cut it into increments
pub fn price_span(span: &mut TimeSpan) {
    let duration = span.duration();
    let Some(ri) = span.rate_interval.as_ref() else {
        span.cost = Decimal::ZERO;
        span.increments = split_increments(duration, Duration::zero(), Decimal::ZERO, 0);
        return;
    };

    let group_start = span.group_start();
    span.cost = ri.cost(duration, group_start);
    span.increments = split_increments(
        duration,
        ri.increment_at(group_start),
        span.cost,
        ri.rounding_decimals,
    );
}

/// Cut `duration` into increments sharing `cost`
///
/// Shares are truncated to `decimals`; the last increment takes whatever is
/// left so that the increments always add up to `cost`.
fn split_increments(duration: Duration, increment: Duration, cost: Decimal, decimals: u32) -> Vec<Increment> {
    if duration <= Duration::zero() {
        return Vec::new();
    }
    let duration_ms = duration.num_milliseconds();
    let increment_ms = increment.num_milliseconds();
    if increment_ms <= 0 || increment_ms >= duration_ms {
        return vec![Increment::new(duration, cost)];
    }

    let full = duration_ms / increment_ms;
    let rest = duration_ms % increment_ms;
    let count = full + i64::from(rest > 0);
    let share = utils::round(
        cost * Decimal::from(increment_ms) / Decimal::from(duration_ms),
        decimals,
        RoundingMethod::Down,
    );

    let mut increments: Vec<Increment> = (0..count - 1)
        .map(|_| Increment::new(increment, share))
        .collect();
    let last_duration = if rest > 0 {
        Duration::milliseconds(rest)
    } else {
        increment
    };
    increments.push(Increment::new(
        last_duration,
        cost - share * Decimal::from(count - 1),
    ));
    increments
}
