//! Tariff models
//!
//! A [`RatingProfile`] maps destinations to time-ordered [`RatingPlan`]
//! activations. Each plan is a set of [`RateInterval`]s: a schedule, a weight
//! and a tiered group of [`Rate`]s.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::timing::Timing;
use crate::utils::{self, duration_ms};

/// Rounding method applied to costs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RoundingMethod {
    #[serde(rename = "*up")]
    Up,
    #[default]
    #[serde(rename = "*middle")]
    Middle,
    #[serde(rename = "*down")]
    Down,
}

impl fmt::Display for RoundingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundingMethod::Up => write!(f, "*up"),
            RoundingMethod::Middle => write!(f, "*middle"),
            RoundingMethod::Down => write!(f, "*down"),
        }
    }
}

impl RoundingMethod {
    /// Parse from the `*name` notation
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "*up" => Some(RoundingMethod::Up),
            "*middle" => Some(RoundingMethod::Middle),
            "*down" => Some(RoundingMethod::Down),
            _ => None,
        }
    }
}

/// One price tier of a rate group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    /// Cumulative call duration at which this tier starts
    #[serde(with = "duration_ms")]
    pub group_interval_start: Duration,

    /// Price of one `rate_unit`
    pub value: Decimal,

    /// Billing unit the price refers to
    #[serde(with = "duration_ms")]
    pub rate_unit: Duration,

    /// Smallest billed slice
    #[serde(with = "duration_ms")]
    pub rate_increment: Duration,
}

impl Rate {
    pub fn new(group_interval_start: Duration, value: Decimal, rate_unit: Duration, rate_increment: Duration) -> Self {
        Self {
            group_interval_start,
            value,
            rate_unit,
            rate_increment,
        }
    }

    /// Unrounded price of `duration` at this tier
    pub fn price_for(&self, duration: Duration) -> Decimal {
        let unit_ms = self.rate_unit.num_milliseconds();
        if unit_ms <= 0 {
            return Decimal::ZERO;
        }
        self.value * Decimal::from(duration.num_milliseconds()) / Decimal::from(unit_ms)
    }
}

/// Schedule, weight and tiered rates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateInterval {
    #[serde(default)]
    pub timing: Timing,

    /// Higher weight wins when several intervals cover the same instant
    #[serde(default)]
    pub weight: f64,

    #[serde(default)]
    pub connect_fee: Decimal,

    /// Tiers, kept sorted by group interval start
    pub rates: Vec<Rate>,

    #[serde(default)]
    pub rounding_method: RoundingMethod,

    #[serde(default)]
    pub rounding_decimals: u32,
}

impl RateInterval {
    pub fn new(timing: Timing, weight: f64, mut rates: Vec<Rate>) -> Self {
        rates.sort_by(|a, b| a.group_interval_start.cmp(&b.group_interval_start));
        Self {
            timing,
            weight,
            connect_fee: Decimal::ZERO,
            rates,
            rounding_method: RoundingMethod::default(),
            rounding_decimals: 4,
        }
    }

    pub fn with_connect_fee(mut self, fee: Decimal) -> Self {
        self.connect_fee = fee;
        self
    }

    pub fn with_rounding(mut self, method: RoundingMethod, decimals: u32) -> Self {
        self.rounding_method = method;
        self.rounding_decimals = decimals;
        self
    }

    /// True when the interval's schedule covers `t`
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.timing.is_active_at(t)
    }

    /// Tier in force once `group_start` of the call has elapsed
    pub fn rate_at(&self, group_start: Duration) -> Option<&Rate> {
        self.rates
            .iter()
            .filter(|r| r.group_interval_start <= group_start)
            .max_by(|a, b| a.group_interval_start.cmp(&b.group_interval_start))
            .or_else(|| self.rates.first())
    }

    /// Price per unit in force at `group_start`, used for tie-breaks
    pub fn price_at(&self, group_start: Duration) -> Decimal {
        self.rate_at(group_start).map_or(Decimal::ZERO, |r| r.value)
    }

    /// Increment in force at `group_start`
    pub fn increment_at(&self, group_start: Duration) -> Duration {
        self.rate_at(group_start)
            .map_or(Duration::zero(), |r| r.rate_increment)
    }

    /// Rounded cost of `duration` starting at `group_start`
    pub fn cost(&self, duration: Duration, group_start: Duration) -> Decimal {
        let raw = self
            .rate_at(group_start)
            .map_or(Decimal::ZERO, |r| r.price_for(duration));
        utils::round(raw, self.rounding_decimals, self.rounding_method)
    }

    /// Tier boundaries after the first tier
    pub fn tier_starts(&self) -> impl Iterator<Item = Duration> + '_ {
        self.rates
            .iter()
            .map(|r| r.group_interval_start)
            .filter(|start| *start > Duration::zero())
    }
}

/// A set of rate intervals that becomes effective at `activation_time`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingPlan {
    pub activation_time: DateTime<Utc>,
    pub rate_intervals: Vec<RateInterval>,
}

impl RatingPlan {
    pub fn new(activation_time: DateTime<Utc>, rate_intervals: Vec<RateInterval>) -> Self {
        Self {
            activation_time,
            rate_intervals,
        }
    }

    /// Index of the interval that prices `t` at `group_start`
    ///
    /// Highest weight wins, ties go to the lowest price at `group_start`,
    /// remaining ties to the first interval listed.
    pub fn best_interval_at(&self, t: DateTime<Utc>, group_start: Duration) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (idx, interval) in self.rate_intervals.iter().enumerate() {
            if !interval.contains(t) {
                continue;
            }
            best = match best {
                None => Some(idx),
                Some(current) => {
                    let incumbent = &self.rate_intervals[current];
                    let better = interval.weight > incumbent.weight
                        || (interval.weight == incumbent.weight
                            && interval.price_at(group_start) < incumbent.price_at(group_start));
                    if better {
                        Some(idx)
                    } else {
                        Some(current)
                    }
                }
            };
        }
        best
    }

    /// Earliest instant after `t` where any interval's schedule may change
    pub fn next_boundary_after(&self, t: DateTime<Utc>) -> DateTime<Utc> {
        self.rate_intervals
            .iter()
            .map(|ri| ri.timing.next_boundary_after(t))
            .min()
            .unwrap_or_else(|| super::timing::next_midnight(t))
    }
}

/// Rating plans per destination for one rating key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingProfile {
    /// Rating key `direction:tenant:tor:subject`
    pub id: String,

    /// `;` separated keys consulted when this profile has no plan
    #[serde(default)]
    pub fallback_key: Option<String>,

    /// Destination id to plan activations
    #[serde(default)]
    pub destination_map: BTreeMap<String, Vec<RatingPlan>>,
}

impl RatingProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_fallback(mut self, fallback_key: impl Into<String>) -> Self {
        self.fallback_key = Some(fallback_key.into());
        self
    }

    /// Register a plan activation for a destination, keeping activations ordered
    pub fn add_rating_plan(&mut self, destination_id: impl Into<String>, plan: RatingPlan) {
        let plans = self.destination_map.entry(destination_id.into()).or_default();
        plans.push(plan);
        plans.sort_by(|a, b| a.activation_time.cmp(&b.activation_time));
    }

    /// Fallback keys in consultation order
    pub fn fallback_keys(&self) -> Vec<String> {
        self.fallback_key
            .as_deref()
            .map(|keys| {
                keys.split(';')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use rust_decimal_macros::dec;

    fn per_second(value: Decimal) -> Rate {
        Rate::new(Duration::zero(), value, Duration::seconds(1), Duration::seconds(1))
    }

    #[test]
    fn test_rate_price_per_minute_unit() {
        let rate = Rate::new(Duration::zero(), dec!(0.2), Duration::seconds(60), Duration::seconds(1));
        assert_eq!(rate.price_for(Duration::seconds(30)), dec!(0.1));
    }

    #[test]
    fn test_rate_at_picks_tier() {
        let ri = RateInterval::new(
            Timing::default(),
            10.0,
            vec![
                Rate::new(Duration::seconds(60), dec!(1), Duration::seconds(60), Duration::seconds(1)),
                Rate::new(Duration::zero(), dec!(2), Duration::seconds(60), Duration::seconds(60)),
            ],
        );
        assert_eq!(ri.price_at(Duration::zero()), dec!(2));
        assert_eq!(ri.price_at(Duration::seconds(59)), dec!(2));
        assert_eq!(ri.price_at(Duration::seconds(60)), dec!(1));
        assert_eq!(ri.increment_at(Duration::seconds(10)), Duration::seconds(60));
        assert_eq!(ri.tier_starts().collect::<Vec<_>>(), vec![Duration::seconds(60)]);
    }

    #[test]
    fn test_interval_cost_uses_own_rounding() {
        let ri = RateInterval::new(Timing::default(), 0.0, vec![per_second(dec!(0.333))])
            .with_rounding(RoundingMethod::Up, 2);
        assert_eq!(ri.cost(Duration::seconds(1), Duration::zero()), dec!(0.34));
    }

    #[test]
    fn test_best_interval_weight_then_price() {
        let all_day = RateInterval::new(Timing::default(), 10.0, vec![per_second(dec!(1))]);
        let evening = RateInterval::new(
            Timing::workdays(NaiveTime::from_hms_opt(18, 0, 0).unwrap()),
            10.0,
            vec![per_second(dec!(0.5))],
        );
        let heavy = RateInterval::new(
            Timing {
                years: vec![2013],
                ..Timing::default()
            },
            20.0,
            vec![per_second(dec!(5))],
        );
        let plan = RatingPlan::new(
            DateTime::parse_from_rfc3339("2012-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            vec![all_day, evening, heavy],
        );
        let at = |s: &str| DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);

        assert_eq!(plan.best_interval_at(at("2012-02-02T17:00:00Z"), Duration::zero()), Some(0));
        assert_eq!(plan.best_interval_at(at("2012-02-02T18:00:00Z"), Duration::zero()), Some(1));
        assert_eq!(plan.best_interval_at(at("2013-02-02T18:00:00Z"), Duration::zero()), Some(2));
    }

    #[test]
    fn test_fallback_keys_split() {
        let rp = RatingProfile::new("*out:vdf:0:rif").with_fallback("*out:vdf:0:one; *out:vdf:0:two;");
        assert_eq!(rp.fallback_keys(), vec!["*out:vdf:0:one", "*out:vdf:0:two"]);
        assert!(RatingProfile::new("x").fallback_keys().is_empty());
    }
}
