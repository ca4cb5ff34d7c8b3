//! Call descriptor and call cost
//!
//! A [`CallDescriptor`] is what a host asks the engine to rate or debit; a
//! [`CallCost`] is the answer.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::{Validate, ValidationError};

use super::timespan::{Increment, TimeSpan};
use crate::utils::duration_ms;

/// Traffic direction, part of every rating and account key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Direction {
    #[default]
    #[serde(rename = "*out")]
    Out,
    #[serde(rename = "*in")]
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => write!(f, "*out"),
            Direction::In => write!(f, "*in"),
        }
    }
}

impl Direction {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "*out" | "OUT" | "out" => Some(Direction::Out),
            "*in" | "IN" | "in" => Some(Direction::In),
            _ => None,
        }
    }
}

/// Request to rate or debit a piece of usage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_window"))]
pub struct CallDescriptor {
    #[serde(default)]
    pub direction: Direction,

    /// Type of record (call, sms, data...)
    #[validate(length(min = 1, message = "Record type is required"))]
    pub tor: String,

    #[validate(length(min = 1, message = "Tenant is required"))]
    pub tenant: String,

    /// Rating plan lookup key
    #[validate(length(min = 1, message = "Subject is required"))]
    pub subject: String,

    /// Balance holder, defaults to the subject
    #[serde(default)]
    pub account: Option<String>,

    #[validate(length(min = 1, message = "Destination is required"))]
    pub destination: String,

    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,

    /// Call duration elapsed at `time_end`; zero means `time_end - time_start`
    #[serde(default = "Duration::zero", with = "duration_ms")]
    pub call_duration: Duration,

    /// Zero for the first rating of a call, incremented on continuations
    #[serde(default)]
    pub loop_index: u32,

    /// Seconds or money, depending on the operation
    #[serde(default)]
    pub amount: Decimal,

    /// Subject tried after the key's own fallback chain
    #[serde(default)]
    pub fallback_subject: Option<String>,
}

fn validate_window(cd: &CallDescriptor) -> Result<(), ValidationError> {
    if cd.time_end < cd.time_start {
        let mut err = ValidationError::new("time_window");
        err.message = Some("time_end precedes time_start".into());
        return Err(err);
    }
    Ok(())
}

impl CallDescriptor {
    pub fn new(
        tenant: impl Into<String>,
        subject: impl Into<String>,
        destination: impl Into<String>,
        time_start: DateTime<Utc>,
        time_end: DateTime<Utc>,
    ) -> Self {
        Self {
            direction: Direction::Out,
            tor: "0".to_string(),
            tenant: tenant.into(),
            subject: subject.into(),
            account: None,
            destination: destination.into(),
            time_start,
            time_end,
            call_duration: Duration::zero(),
            loop_index: 0,
            amount: Decimal::ZERO,
            fallback_subject: None,
        }
    }

    pub fn with_account(mut self, account: impl Into<String>) -> Self {
        self.account = Some(account.into());
        self
    }

    pub fn with_amount(mut self, amount: Decimal) -> Self {
        self.amount = amount;
        self
    }

    /// Rating key `direction:tenant:tor:subject`
    pub fn key(&self) -> String {
        self.key_for_subject(&self.subject)
    }

    /// Rating key for another subject of the same tenant and record type
    pub fn key_for_subject(&self, subject: &str) -> String {
        format!("{}:{}:{}:{}", self.direction, self.tenant, self.tor, subject)
    }

    /// Account key `direction:tenant:account`
    pub fn account_key(&self) -> String {
        let account = self
            .account
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(&self.subject);
        format!("{}:{}:{}", self.direction, self.tenant, account)
    }

    pub fn duration(&self) -> Duration {
        self.time_end - self.time_start
    }

    /// Call duration at `time_end`, never shorter than the window itself
    pub fn effective_call_duration(&self) -> Duration {
        let window = self.duration();
        if self.call_duration < window {
            window
        } else {
            self.call_duration
        }
    }

    /// Shrink or grow the window end, adjusting the cumulative duration
    pub fn set_time_end(&mut self, time_end: DateTime<Utc>) {
        if !self.call_duration.is_zero() {
            self.call_duration = self.call_duration + (time_end - self.time_end);
        }
        self.time_end = time_end;
    }
}

/// Priced result of a call descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallCost {
    pub direction: Direction,
    pub tor: String,
    pub tenant: String,

    /// Subject whose plans actually priced the call
    pub subject: String,

    pub account: String,

    /// Destination prefix that matched
    pub destination: String,

    pub cost: Decimal,

    #[serde(default)]
    pub connect_fee: Decimal,

    #[serde(default)]
    pub timespans: Vec<TimeSpan>,
}

impl CallCost {
    /// Empty cost bound to a descriptor
    pub fn for_descriptor(cd: &CallDescriptor) -> Self {
        Self {
            direction: cd.direction,
            tor: cd.tor.clone(),
            tenant: cd.tenant.clone(),
            subject: cd.subject.clone(),
            account: cd.account_key(),
            destination: cd.destination.clone(),
            cost: Decimal::ZERO,
            connect_fee: Decimal::ZERO,
            timespans: Vec::new(),
        }
    }

    /// Sentinel returned to hosts that report failures as a cost of -1
    pub fn not_computed(cd: &CallDescriptor) -> Self {
        Self {
            cost: Decimal::NEGATIVE_ONE,
            ..Self::for_descriptor(cd)
        }
    }

    pub fn is_computed(&self) -> bool {
        self.cost >= Decimal::ZERO
    }

    /// Billed duration, including increment rounding
    pub fn duration(&self) -> Duration {
        self.timespans
            .iter()
            .fold(Duration::zero(), |acc, ts| acc + ts.duration())
    }

    pub fn time_start(&self) -> Option<DateTime<Utc>> {
        self.timespans.first().map(|ts| ts.time_start)
    }

    /// Authoritative end of the billed window
    pub fn time_end(&self) -> Option<DateTime<Utc>> {
        self.timespans.last().map(|ts| ts.time_end)
    }

    pub fn increments(&self) -> impl Iterator<Item = &Increment> {
        self.timespans.iter().flat_map(|ts| ts.increments.iter())
    }

    pub fn is_paid(&self) -> bool {
        self.timespans.iter().all(TimeSpan::is_paid)
    }

    /// Append a continuation that starts where this cost ends
    ///
    /// Returns false, leaving `self` untouched, when the two do not connect.
    pub fn merge(&mut self, other: CallCost) -> bool {
        if let (Some(end), Some(start)) = (self.time_end(), other.time_start()) {
            if end != start {
                return false;
            }
        }
        self.cost += other.cost;
        self.connect_fee += other.connect_fee;
        self.timespans.extend(other.timespans);
        true
    }
}
