//! Rated sub-intervals of a call

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::rate::RateInterval;
use crate::utils::duration_ms;

/// Money taken from one balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoneyShare {
    pub uuid: String,
    pub amount: Decimal,
}

impl MoneyShare {
    pub fn new(uuid: impl Into<String>, amount: Decimal) -> Self {
        Self {
            uuid: uuid.into(),
            amount,
        }
    }
}

/// Balances that paid for an increment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IncrementBalances {
    /// Account key the balances belong to
    #[serde(default)]
    pub account: Option<String>,

    /// Duration-based balance that gave up the increment's seconds
    #[serde(default)]
    pub unit_uuid: Option<String>,

    /// Money balances that were charged, in the order they were used
    #[serde(default)]
    pub money: Vec<MoneyShare>,
}

impl IncrementBalances {
    pub fn money_total(&self) -> Decimal {
        self.money.iter().map(|share| share.amount).sum()
    }
}

/// Smallest billable slice of a timespan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Increment {
    #[serde(with = "duration_ms")]
    pub duration: Duration,

    pub cost: Decimal,

    #[serde(default)]
    pub balances: IncrementBalances,

    #[serde(default)]
    pub paid: bool,
}

impl Increment {
    pub fn new(duration: Duration, cost: Decimal) -> Self {
        Self {
            duration,
            cost,
            balances: IncrementBalances::default(),
            paid: false,
        }
    }

    /// The last `unused` of the increment, with cost and money scaled down
    ///
    /// The seconds of a duration balance follow from the shorter duration.
    pub fn tail(&self, unused: Duration) -> Increment {
        let total_ms = self.duration.num_milliseconds();
        if total_ms <= 0 || unused >= self.duration {
            return self.clone();
        }
        let ratio = Decimal::from(unused.num_milliseconds().max(0)) / Decimal::from(total_ms);
        let mut tail = self.clone();
        tail.duration = unused.max(Duration::zero());
        tail.cost = self.cost * ratio;
        for share in tail.balances.money.iter_mut() {
            share.amount *= ratio;
        }
        tail
    }
}

/// Contiguous `[time_start, time_end)` slice priced by a single rate interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSpan {
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,

    /// Call duration elapsed at `time_end`
    #[serde(with = "duration_ms")]
    pub call_duration: Duration,

    #[serde(default)]
    pub rate_interval: Option<RateInterval>,

    #[serde(default)]
    pub cost: Decimal,

    #[serde(default)]
    pub increments: Vec<Increment>,
}

impl TimeSpan {
    pub fn new(time_start: DateTime<Utc>, time_end: DateTime<Utc>, call_duration: Duration) -> Self {
        Self {
            time_start,
            time_end,
            call_duration,
            rate_interval: None,
            cost: Decimal::ZERO,
            increments: Vec::new(),
        }
    }

    pub fn duration(&self) -> Duration {
        self.time_end - self.time_start
    }

    /// Call duration elapsed at `time_start`
    pub fn group_start(&self) -> Duration {
        let start = self.call_duration - self.duration();
        if start < Duration::zero() {
            Duration::zero()
        } else {
            start
        }
    }

    /// Move `time_end`, keeping `call_duration` in step
    pub fn set_time_end(&mut self, time_end: DateTime<Utc>) {
        self.call_duration = self.call_duration + (time_end - self.time_end);
        self.time_end = time_end;
    }

    /// Cut the span at `at`, keeping the head and returning the tail
    ///
    /// Returns `None` when `at` is not strictly inside the span.
    pub fn split_at(&mut self, at: DateTime<Utc>) -> Option<TimeSpan> {
        if at <= self.time_start || at >= self.time_end {
            return None;
        }
        let tail = TimeSpan {
            time_start: at,
            time_end: self.time_end,
            call_duration: self.call_duration,
            rate_interval: self.rate_interval.clone(),
            cost: Decimal::ZERO,
            increments: Vec::new(),
        };
        self.call_duration = self.call_duration - tail.duration();
        self.time_end = at;
        Some(tail)
    }

    /// Increment length of the tier this span is priced at
    pub fn increment(&self) -> Duration {
        self.rate_interval
            .as_ref()
            .map_or(Duration::zero(), |ri| ri.increment_at(self.group_start()))
    }

    /// Start instant of the increment at `index`
    pub fn increment_start(&self, index: usize) -> DateTime<Utc> {
        self.increments
            .iter()
            .take(index)
            .fold(self.time_start, |at, inc| at + inc.duration)
    }

    pub fn is_paid(&self) -> bool {
        self.increments.iter().all(|inc| inc.paid)
    }
}
