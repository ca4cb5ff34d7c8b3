//! Account model
//!
//! A [`UserBalance`] is the balance-holding entity: balance chains per class,
//! usage counters feeding threshold triggers, and the triggers themselves.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::action::{sort_triggers, ActionTrigger};
use super::balance::{balance_key, Balance, BalanceChain, BalanceType};
use super::call::Direction;

/// Account type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccountType {
    /// Prepaid account - usage is capped by available balance
    #[default]
    #[serde(rename = "*prepaid")]
    Prepaid,
    /// Postpaid account - balances may go negative without limit
    #[serde(rename = "*postpaid")]
    Postpaid,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountType::Prepaid => write!(f, "*prepaid"),
            AccountType::Postpaid => write!(f, "*postpaid"),
        }
    }
}

/// Usage accumulator for one balance class
///
/// The first bucket is the general one; the others count usage towards a
/// single destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitsCounter {
    pub balance_type: BalanceType,

    #[serde(default)]
    pub direction: Direction,

    pub balances: BalanceChain,
}

impl UnitsCounter {
    pub fn new(balance_type: BalanceType, direction: Direction) -> Self {
        Self {
            balance_type,
            direction,
            balances: BalanceChain::new(vec![Balance::new(Decimal::ZERO)]),
        }
    }

    /// Add a destination-restricted bucket
    pub fn with_destination(mut self, destination_id: impl Into<String>) -> Self {
        self.balances
            .push(Balance::new(Decimal::ZERO).with_destination(destination_id));
        self
    }

    /// Destination ids of the restricted buckets
    pub fn destination_ids(&self) -> impl Iterator<Item = &str> {
        self.balances
            .iter()
            .filter_map(|b| b.destination_id.as_deref())
    }

    /// Count `amount` on the bucket of `destination_id`, or on the general one
    pub fn add_units(&mut self, amount: Decimal, destination_id: Option<&str>) {
        if let Some(dest) = destination_id {
            if let Some(bucket) = self
                .balances
                .iter_mut()
                .find(|b| b.destination_id.as_deref() == Some(dest))
            {
                bucket.value += amount;
                return;
            }
        }
        if let Some(general) = self.balances.iter_mut().find(|b| b.destination_id.is_none()) {
            general.value += amount;
            return;
        }
        self.balances.push(Balance::new(amount));
    }

    pub fn reset(&mut self) {
        for bucket in self.balances.iter_mut() {
            bucket.value = Decimal::ZERO;
        }
    }
}

/// Balance-holding account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserBalance {
    /// Account key `direction:tenant:account`
    pub id: String,

    #[serde(default)]
    pub account_type: AccountType,

    /// Balance chains keyed by `{balance_type}{direction}`
    #[serde(default)]
    pub balance_map: HashMap<String, BalanceChain>,

    #[serde(default)]
    pub unit_counters: Vec<UnitsCounter>,

    #[serde(default)]
    pub action_triggers: Vec<ActionTrigger>,
}

impl UserBalance {
    pub fn new(id: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            id: id.into(),
            account_type,
            ..Self::default()
        }
    }

    pub fn is_postpaid(&self) -> bool {
        self.account_type == AccountType::Postpaid
    }

    pub fn chain(&self, balance_type: BalanceType, direction: Direction) -> Option<&BalanceChain> {
        self.balance_map.get(&balance_key(balance_type, direction))
    }

    pub fn chain_mut(&mut self, balance_type: BalanceType, direction: Direction) -> &mut BalanceChain {
        self.balance_map
            .entry(balance_key(balance_type, direction))
            .or_default()
    }

    pub fn add_balance(&mut self, balance_type: BalanceType, direction: Direction, balance: Balance) {
        self.chain_mut(balance_type, direction).push(balance);
    }

    /// Sum of every bucket of a class
    pub fn total(&self, balance_type: BalanceType, direction: Direction) -> Decimal {
        self.chain(balance_type, direction)
            .map_or(Decimal::ZERO, BalanceChain::total_value)
    }

    /// Find a bucket anywhere in the account by uuid
    pub fn balance_mut(&mut self, uuid: &str) -> Option<&mut Balance> {
        self.balance_map
            .values_mut()
            .find_map(|chain| chain.get_mut(uuid))
    }

    /// Bucket absorbing money nobody else can cover
    ///
    /// The highest priority unrestricted, unexpired money bucket, created
    /// empty when the account has none.
    pub fn default_money_balance(&mut self, direction: Direction, now: DateTime<Utc>) -> &mut Balance {
        let chain = self.chain_mut(BalanceType::Monetary, direction);
        chain.sort();
        let position = chain
            .iter()
            .position(|b| b.destination_id.is_none() && !b.is_expired(now));
        let index = match position {
            Some(index) => index,
            None => {
                chain.push(Balance::new(Decimal::ZERO));
                chain.len() - 1
            }
        };
        &mut chain.0[index]
    }

    pub fn counter_mut(&mut self, balance_type: BalanceType, direction: Direction) -> &mut UnitsCounter {
        let position = self
            .unit_counters
            .iter()
            .position(|uc| uc.balance_type == balance_type && uc.direction == direction);
        let index = match position {
            Some(index) => index,
            None => {
                self.unit_counters
                    .push(UnitsCounter::new(balance_type, direction));
                self.unit_counters.len() - 1
            }
        };
        &mut self.unit_counters[index]
    }

    pub fn counter(&self, balance_type: BalanceType, direction: Direction) -> Option<&UnitsCounter> {
        self.unit_counters
            .iter()
            .find(|uc| uc.balance_type == balance_type && uc.direction == direction)
    }

    pub fn add_trigger(&mut self, trigger: ActionTrigger) {
        self.action_triggers.push(trigger);
        sort_triggers(&mut self.action_triggers);
    }

    /// Re-arm triggers, optionally only those of one balance class
    pub fn reset_triggers(&mut self, balance_type: Option<BalanceType>, direction: Direction) {
        for trigger in self
            .action_triggers
            .iter_mut()
            .filter(|t| t.matches_filter(balance_type, direction))
        {
            trigger.executed = false;
        }
    }

    /// Zero every bucket of every class
    pub fn zero_balances(&mut self) {
        for chain in self.balance_map.values_mut() {
            for balance in chain.iter_mut() {
                balance.value = Decimal::ZERO;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::action::ThresholdType;
    use rust_decimal_macros::dec;

    #[test]
    fn test_units_counter_prefers_destination_bucket() {
        let mut uc = UnitsCounter::new(BalanceType::Minutes, Direction::Out).with_destination("NAT");
        uc.add_units(dec!(10), Some("NAT"));
        uc.add_units(dec!(5), Some("RET"));
        uc.add_units(dec!(1), None);
        assert_eq!(uc.balances.0[0].value, dec!(6));
        assert_eq!(uc.balances.0[1].value, dec!(10));
        assert_eq!(uc.destination_ids().collect::<Vec<_>>(), vec!["NAT"]);

        uc.reset();
        assert_eq!(uc.balances.total_value(), dec!(0));
    }

    #[test]
    fn test_units_counter_recreates_general_bucket() {
        let mut uc = UnitsCounter {
            balance_type: BalanceType::Sms,
            direction: Direction::Out,
            balances: BalanceChain::new(vec![Balance::new(dec!(0)).with_destination("NAT")]),
        };
        uc.add_units(dec!(2), None);
        uc.add_units(dec!(3), Some("RET"));
        assert_eq!(uc.balances.len(), 2);
        assert_eq!(uc.balances.0[1].value, dec!(5));
        assert!(uc.balances.0[1].destination_id.is_none());
    }

    #[test]
    fn test_default_money_balance_created_on_demand() {
        let mut ub = UserBalance::new("*out:vdf:rif", AccountType::Prepaid);
        let now = Utc::now();
        ub.default_money_balance(Direction::Out, now).value -= dec!(3);
        assert_eq!(ub.total(BalanceType::Monetary, Direction::Out), dec!(-3));
        assert_eq!(ub.chain(BalanceType::Monetary, Direction::Out).unwrap().len(), 1);
    }

    #[test]
    fn test_default_money_balance_skips_restricted() {
        let mut ub = UserBalance::new("*out:vdf:rif", AccountType::Prepaid);
        ub.add_balance(
            BalanceType::Monetary,
            Direction::Out,
            Balance::new(dec!(5)).with_weight(20.0).with_destination("NAT"),
        );
        ub.add_balance(BalanceType::Monetary, Direction::Out, Balance::new(dec!(7)));
        let default = ub.default_money_balance(Direction::Out, Utc::now());
        assert_eq!(default.value, dec!(7));
    }

    #[test]
    fn test_reset_triggers_filtered() {
        let mut ub = UserBalance::new("*out:vdf:rif", AccountType::Prepaid);
        let mut money =
            ActionTrigger::new("m", BalanceType::Monetary, ThresholdType::MinBalance, dec!(1), "X");
        money.executed = true;
        let mut sms = ActionTrigger::new("s", BalanceType::Sms, ThresholdType::MinBalance, dec!(1), "X");
        sms.executed = true;
        ub.add_trigger(money);
        ub.add_trigger(sms);

        ub.reset_triggers(Some(BalanceType::Sms), Direction::Out);
        let executed: Vec<_> = ub
            .action_triggers
            .iter()
            .map(|t| (t.id.as_str(), t.executed))
            .collect();
        assert!(executed.contains(&("m", true)));
        assert!(executed.contains(&("s", false)));
    }

    #[test]
    fn test_balance_lookup_by_uuid() {
        let mut ub = UserBalance::new("*out:vdf:rif", AccountType::Postpaid);
        let balance = Balance::new(dec!(100));
        let uuid = balance.uuid.clone();
        ub.add_balance(BalanceType::Minutes, Direction::Out, balance);
        ub.balance_mut(&uuid).unwrap().value += dec!(1);
        assert_eq!(ub.total(BalanceType::Minutes, Direction::Out), dec!(101));
        assert!(ub.balance_mut("missing").is_none());
        assert!(ub.is_postpaid());
    }
}
