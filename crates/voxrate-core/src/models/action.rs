//! Actions, threshold triggers and scheduled action timings

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::balance::{Balance, BalanceType};
use super::call::Direction;
use super::timing::Timing;

/// Account mutation an action performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionKind {
    #[serde(rename = "*log")]
    Log,
    #[serde(rename = "*reset_triggers")]
    ResetTriggers,
    #[serde(rename = "*set_postpaid")]
    SetPostpaid,
    #[serde(rename = "*reset_postpaid")]
    ResetPostpaid,
    #[serde(rename = "*set_prepaid")]
    SetPrepaid,
    #[serde(rename = "*reset_prepaid")]
    ResetPrepaid,
    #[serde(rename = "*topup")]
    Topup,
    #[serde(rename = "*topup_reset")]
    TopupReset,
    #[serde(rename = "*debit")]
    Debit,
    #[serde(rename = "*reset_counter")]
    ResetCounter,
    #[serde(rename = "*reset_counters")]
    ResetCounters,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Log => "*log",
            ActionKind::ResetTriggers => "*reset_triggers",
            ActionKind::SetPostpaid => "*set_postpaid",
            ActionKind::ResetPostpaid => "*reset_postpaid",
            ActionKind::SetPrepaid => "*set_prepaid",
            ActionKind::ResetPrepaid => "*reset_prepaid",
            ActionKind::Topup => "*topup",
            ActionKind::TopupReset => "*topup_reset",
            ActionKind::Debit => "*debit",
            ActionKind::ResetCounter => "*reset_counter",
            ActionKind::ResetCounters => "*reset_counters",
        };
        write!(f, "{}", name)
    }
}

impl ActionKind {
    /// Kinds that need a balance type and a balance template
    pub fn needs_balance(&self) -> bool {
        matches!(
            self,
            ActionKind::Topup | ActionKind::TopupReset | ActionKind::Debit
        )
    }
}

/// One step of an action bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,

    pub kind: ActionKind,

    #[serde(default)]
    pub balance_type: Option<BalanceType>,

    #[serde(default)]
    pub direction: Direction,

    /// Template balance for topups and debits
    #[serde(default)]
    pub balance: Option<Balance>,

    /// Execution order inside the bundle, higher first
    #[serde(default)]
    pub weight: f64,
}

impl Action {
    pub fn new(id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: id.into(),
            kind,
            balance_type: None,
            direction: Direction::Out,
            balance: None,
            weight: 0.0,
        }
    }

    pub fn with_balance(mut self, balance_type: BalanceType, balance: Balance) -> Self {
        self.balance_type = Some(balance_type);
        self.balance = Some(balance);
        self
    }

    pub fn with_balance_type(mut self, balance_type: BalanceType) -> Self {
        self.balance_type = Some(balance_type);
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }
}

/// Sort an action bundle into execution order
pub fn sort_actions(actions: &mut [Action]) {
    actions.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// What a trigger compares against its threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdType {
    #[serde(rename = "*min_counter")]
    MinCounter,
    #[serde(rename = "*max_counter")]
    MaxCounter,
    #[serde(rename = "*min_balance")]
    MinBalance,
    #[serde(rename = "*max_balance")]
    MaxBalance,
}

impl ThresholdType {
    pub fn watches_counters(&self) -> bool {
        matches!(self, ThresholdType::MinCounter | ThresholdType::MaxCounter)
    }

    /// True when `value` is on the firing side of `threshold`
    pub fn is_crossed(&self, value: Decimal, threshold: Decimal) -> bool {
        match self {
            ThresholdType::MinCounter | ThresholdType::MinBalance => value <= threshold,
            ThresholdType::MaxCounter | ThresholdType::MaxBalance => value >= threshold,
        }
    }
}

/// Threshold watcher that runs an action bundle once
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTrigger {
    pub id: String,

    pub balance_type: BalanceType,

    #[serde(default)]
    pub direction: Direction,

    /// Only buckets of this destination are watched
    #[serde(default)]
    pub destination_id: Option<String>,

    pub threshold_type: ThresholdType,

    pub threshold_value: Decimal,

    /// Evaluation priority, higher first
    #[serde(default)]
    pub weight: f64,

    pub actions_id: String,

    #[serde(default)]
    pub executed: bool,
}

impl ActionTrigger {
    pub fn new(
        id: impl Into<String>,
        balance_type: BalanceType,
        threshold_type: ThresholdType,
        threshold_value: Decimal,
        actions_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            balance_type,
            direction: Direction::Out,
            destination_id: None,
            threshold_type,
            threshold_value,
            weight: 0.0,
            actions_id: actions_id.into(),
            executed: false,
        }
    }

    pub fn with_destination(mut self, destination_id: impl Into<String>) -> Self {
        self.destination_id = Some(destination_id.into());
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// True when an action's balance filter selects this trigger
    pub fn matches_filter(&self, balance_type: Option<BalanceType>, direction: Direction) -> bool {
        balance_type.map_or(true, |bt| bt == self.balance_type && direction == self.direction)
    }
}

/// Sort triggers into evaluation order
pub fn sort_triggers(triggers: &mut [ActionTrigger]) {
    triggers.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// When an action timing runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Schedule {
    /// Run once, as soon as possible
    #[serde(rename = "*asap")]
    Asap,
    #[serde(rename = "*timing")]
    Timing(Timing),
}

/// An action bundle bound to a schedule and a list of accounts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTiming {
    pub id: String,

    #[serde(default)]
    pub tag: String,

    pub schedule: Schedule,

    /// Ordering among timings due at the same instant, higher first
    #[serde(default)]
    pub weight: f64,

    pub actions_id: String,

    /// Account keys the bundle applies to
    #[serde(default)]
    pub account_ids: Vec<String>,
}

impl ActionTiming {
    /// Next instant after `now` at which the timing is due
    pub fn next_start_time(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.schedule {
            Schedule::Asap => Some(now),
            Schedule::Timing(timing) => timing.next_start_time(now),
        }
    }

    pub fn is_one_time_run(&self) -> bool {
        matches!(self.schedule, Schedule::Asap)
    }

    /// Drop an account from the target list, returning whether it was present
    pub fn remove_account(&mut self, account_id: &str) -> bool {
        let before = self.account_ids.len();
        self.account_ids.retain(|id| id != account_id);
        self.account_ids.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_threshold_crossing() {
        assert!(ThresholdType::MinBalance.is_crossed(dec!(2), dec!(2)));
        assert!(!ThresholdType::MinBalance.is_crossed(dec!(3), dec!(2)));
        assert!(ThresholdType::MaxCounter.is_crossed(dec!(10), dec!(10)));
        assert!(!ThresholdType::MaxCounter.is_crossed(dec!(9), dec!(10)));
        assert!(ThresholdType::MaxCounter.watches_counters());
        assert!(!ThresholdType::MaxBalance.watches_counters());
    }

    #[test]
    fn test_trigger_sort_by_weight() {
        let mut triggers = vec![
            ActionTrigger::new("a", BalanceType::Monetary, ThresholdType::MinBalance, dec!(1), "X")
                .with_weight(10.0),
            ActionTrigger::new("b", BalanceType::Monetary, ThresholdType::MinBalance, dec!(1), "X")
                .with_weight(30.0),
            ActionTrigger::new("c", BalanceType::Monetary, ThresholdType::MinBalance, dec!(1), "X")
                .with_weight(20.0),
        ];
        sort_triggers(&mut triggers);
        let ids: Vec<_> = triggers.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_trigger_filter() {
        let trigger =
            ActionTrigger::new("t", BalanceType::Monetary, ThresholdType::MinBalance, dec!(1), "X");
        assert!(trigger.matches_filter(None, Direction::Out));
        assert!(trigger.matches_filter(Some(BalanceType::Monetary), Direction::Out));
        assert!(!trigger.matches_filter(Some(BalanceType::Sms), Direction::Out));
        assert!(!trigger.matches_filter(Some(BalanceType::Monetary), Direction::In));
    }

    #[test]
    fn test_action_timing_accounts() {
        let mut timing = ActionTiming {
            id: "monthly".into(),
            tag: String::new(),
            schedule: Schedule::Asap,
            weight: 10.0,
            actions_id: "TOPUP10".into(),
            account_ids: vec!["*out:vdf:minu".into(), "*out:vdf:rif".into()],
        };
        assert!(timing.is_one_time_run());
        assert!(timing.remove_account("*out:vdf:rif"));
        assert!(!timing.remove_account("*out:vdf:rif"));
        assert_eq!(timing.account_ids, vec!["*out:vdf:minu"]);

        let now = Utc::now();
        assert_eq!(timing.next_start_time(now), Some(now));
    }

    #[test]
    fn test_action_kind_serde_names() {
        let json = serde_json::to_string(&ActionKind::TopupReset).unwrap();
        assert_eq!(json, "\"*topup_reset\"");
        let kind: ActionKind = serde_json::from_str("\"*reset_counters\"").unwrap();
        assert_eq!(kind, ActionKind::ResetCounters);
    }
}
