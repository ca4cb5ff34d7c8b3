//! Balance buckets
//!
//! An account holds one [`BalanceChain`] per balance class, the class key
//! being the balance type followed by the direction (`*minutes*out`).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

use super::call::Direction;

/// What a balance counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BalanceType {
    #[serde(rename = "*monetary")]
    Monetary,
    #[serde(rename = "*minutes")]
    Minutes,
    #[serde(rename = "*sms")]
    Sms,
    #[serde(rename = "*data")]
    Data,
}

impl fmt::Display for BalanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BalanceType::Monetary => write!(f, "*monetary"),
            BalanceType::Minutes => write!(f, "*minutes"),
            BalanceType::Sms => write!(f, "*sms"),
            BalanceType::Data => write!(f, "*data"),
        }
    }
}

impl BalanceType {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "*monetary" => Some(BalanceType::Monetary),
            "*minutes" => Some(BalanceType::Minutes),
            "*sms" => Some(BalanceType::Sms),
            "*data" => Some(BalanceType::Data),
            _ => None,
        }
    }
}

/// Key of a balance chain inside an account
pub fn balance_key(balance_type: BalanceType, direction: Direction) -> String {
    format!("{}{}", balance_type, direction)
}

/// How a balance's special price is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PriceType {
    /// Money per second of usage
    #[default]
    #[serde(rename = "*absolute")]
    Absolute,
    /// Percent of the increment's rated cost
    #[serde(rename = "*percent")]
    Percent,
}

/// One bucket of a balance chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub uuid: String,

    pub value: Decimal,

    /// Selection priority, higher first
    #[serde(default)]
    pub weight: f64,

    /// Restricts the bucket to numbers of one destination
    #[serde(default)]
    pub destination_id: Option<String>,

    /// Money charged alongside usage of a duration bucket
    #[serde(default)]
    pub special_price: Option<Decimal>,

    #[serde(default)]
    pub special_price_type: PriceType,

    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

impl Balance {
    pub fn new(value: Decimal) -> Self {
        Self {
            uuid: Uuid::new_v4().to_string(),
            value,
            weight: 0.0,
            destination_id: None,
            special_price: None,
            special_price_type: PriceType::default(),
            expiration_date: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_destination(mut self, destination_id: impl Into<String>) -> Self {
        self.destination_id = Some(destination_id.into());
        self
    }

    pub fn with_special_price(mut self, price: Decimal, price_type: PriceType) -> Self {
        self.special_price = Some(price);
        self.special_price_type = price_type;
        self
    }

    pub fn with_expiration(mut self, at: DateTime<Utc>) -> Self {
        self.expiration_date = Some(at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration_date.map_or(false, |exp| exp <= now)
    }

    /// Same bucket definition, value and uuid aside
    pub fn same_kind(&self, other: &Balance) -> bool {
        self.weight == other.weight
            && self.destination_id == other.destination_id
            && self.special_price == other.special_price
            && self.special_price_type == other.special_price_type
            && self.expiration_date == other.expiration_date
    }

    /// True when the bucket applies to `destination_id` filters
    ///
    /// An unrestricted filter matches every bucket.
    pub fn matches_destination(&self, destination_id: Option<&str>) -> bool {
        match destination_id {
            None => true,
            Some(dest) => self.destination_id.as_deref() == Some(dest),
        }
    }

    /// Copy of the template with a fresh uuid
    pub fn fresh_copy(&self) -> Balance {
        Balance {
            uuid: Uuid::new_v4().to_string(),
            ..self.clone()
        }
    }

    /// Money charged for `seconds` of usage whose rated cost is `rated_cost`
    pub fn special_charge(&self, seconds: Decimal, rated_cost: Decimal) -> Decimal {
        match (self.special_price, self.special_price_type) {
            (Some(price), PriceType::Absolute) => price * seconds,
            (Some(pct), PriceType::Percent) => rated_cost * pct / Decimal::ONE_HUNDRED,
            (None, _) => Decimal::ZERO,
        }
    }
}

/// Selection order: weight desc, destination precision desc, special price asc
pub fn selection_order(a: &Balance, a_precision: usize, b: &Balance, b_precision: usize) -> Ordering {
    b.weight
        .partial_cmp(&a.weight)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b_precision.cmp(&a_precision))
        .then_with(|| {
            let a_price = a.special_price.unwrap_or(Decimal::ZERO);
            let b_price = b.special_price.unwrap_or(Decimal::ZERO);
            a_price.cmp(&b_price)
        })
}

/// Balances of one class
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BalanceChain(pub Vec<Balance>);

impl BalanceChain {
    pub fn new(balances: Vec<Balance>) -> Self {
        Self(balances)
    }

    /// Sort without destination context (precision 0 for all)
    pub fn sort(&mut self) {
        self.0.sort_by(|a, b| selection_order(a, 0, b, 0));
    }

    pub fn total_value(&self) -> Decimal {
        self.0.iter().map(|b| b.value).sum()
    }

    pub fn get(&self, uuid: &str) -> Option<&Balance> {
        self.0.iter().find(|b| b.uuid == uuid)
    }

    pub fn get_mut(&mut self, uuid: &str) -> Option<&mut Balance> {
        self.0.iter_mut().find(|b| b.uuid == uuid)
    }

    pub fn find_same_kind_mut(&mut self, template: &Balance) -> Option<&mut Balance> {
        self.0.iter_mut().find(|b| b.same_kind(template))
    }

    pub fn push(&mut self, balance: Balance) {
        self.0.push(balance);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Balance> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Balance> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
