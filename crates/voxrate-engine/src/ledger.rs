//! Balance debiting
//!
//! Applies priced calls and plain amounts to an account's balance chains,
//! keeps usage counters up to date and fires threshold triggers.
//!
//! # Balance selection
//!
//! Within a chain, eligible balances are used in one order: weight
//! descending, then destination match precision descending, then special
//! price ascending. A balance is eligible when it is not expired and, if it
//! is restricted to a destination, that destination matches the dialed
//! number. Duration-based balances are tried before money for every
//! increment.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use voxrate_core::models::{
    selection_order, sort_actions, Action, ActionTrigger, Balance, BalanceChain, BalanceType,
    CallCost, Direction, Increment, IncrementBalances, MoneyShare, PriceType, UserBalance,
};
use voxrate_core::traits::Storage;
use voxrate_core::utils;
use voxrate_core::{AppError, AppResult};

use crate::actions::ActionExecutor;
use crate::constants::RATER_SOURCE;
use crate::destinations::DestinationMatcher;

/// Which balances a debit may touch
#[derive(Debug, Clone)]
pub struct DebitScope {
    now: DateTime<Utc>,
    /// Match precision of destination-restricted balances, by uuid
    precisions: HashMap<String, usize>,
}

impl DebitScope {
    /// Scope without a dialed number: restricted balances are out
    pub fn unrestricted(now: DateTime<Utc>) -> Self {
        Self {
            now,
            precisions: HashMap::new(),
        }
    }

    fn precision(&self, balance: &Balance) -> usize {
        self.precisions.get(&balance.uuid).copied().unwrap_or(0)
    }

    fn accepts(&self, balance: &Balance) -> bool {
        !balance.is_expired(self.now)
            && (balance.destination_id.is_none() || self.precision(balance) > 0)
    }

    /// Uuids of eligible balances in selection order
    pub fn ordered(&self, chain: &BalanceChain) -> Vec<String> {
        let mut eligible: Vec<&Balance> = chain.iter().filter(|b| self.accepts(b)).collect();
        eligible.sort_by(|a, b| selection_order(a, self.precision(a), b, self.precision(b)));
        eligible.into_iter().map(|b| b.uuid.clone()).collect()
    }
}

/// Debit `amount` from a balance chain, returning what is left in it
///
/// A negative amount is a credit to the first eligible balance. Prepaid
/// accounts are refused when eligible balances do not cover the amount;
/// postpaid accounts let the last eligible balance go negative.
pub fn debit_chain(
    account: &mut UserBalance,
    balance_type: BalanceType,
    direction: Direction,
    amount: Decimal,
    scope: &DebitScope,
) -> AppResult<Decimal> {
    let postpaid = account.is_postpaid();

    if amount < Decimal::ZERO {
        let uuid = first_or_default(account, balance_type, direction, scope);
        if let Some(balance) = account.chain_mut(balance_type, direction).get_mut(&uuid) {
            balance.value -= amount;
        }
        return Ok(account.total(balance_type, direction));
    }

    let account_id = account.id.clone();
    let chain = account.chain_mut(balance_type, direction);
    let candidates: Vec<String> = scope
        .ordered(chain)
        .into_iter()
        .filter(|uuid| postpaid || chain.get(uuid).map_or(false, |b| b.value > Decimal::ZERO))
        .collect();

    if !postpaid {
        let available: Decimal = candidates
            .iter()
            .filter_map(|uuid| chain.get(uuid))
            .map(|b| b.value)
            .sum();
        if available < amount {
            warn!(
                "Insufficient {} on {}: required {}, available {}",
                balance_type, account_id, amount, available
            );
            return Err(AppError::InsufficientCredit { account: account_id });
        }
    }

    let mut left = amount;
    let last = candidates.len().saturating_sub(1);
    for (idx, uuid) in candidates.iter().enumerate() {
        if left <= Decimal::ZERO {
            break;
        }
        if let Some(balance) = chain.get_mut(uuid) {
            let take = if postpaid && idx == last {
                left
            } else {
                left.min(balance.value.max(Decimal::ZERO))
            };
            balance.value -= take;
            left -= take;
        }
    }

    if left > Decimal::ZERO {
        // postpaid account without any eligible balance
        let uuid = first_or_default(account, balance_type, direction, scope);
        if let Some(balance) = account.chain_mut(balance_type, direction).get_mut(&uuid) {
            balance.value -= left;
        }
    }

    Ok(account.total(balance_type, direction))
}

fn first_or_default(
    account: &mut UserBalance,
    balance_type: BalanceType,
    direction: Direction,
    scope: &DebitScope,
) -> String {
    let first = account
        .chain(balance_type, direction)
        .and_then(|chain| scope.ordered(chain).into_iter().next());
    match first {
        Some(uuid) => uuid,
        None if balance_type == BalanceType::Monetary => {
            account.default_money_balance(direction, scope.now).uuid.clone()
        }
        None => {
            let balance = Balance::new(Decimal::ZERO);
            let uuid = balance.uuid.clone();
            account.add_balance(balance_type, direction, balance);
            uuid
        }
    }
}

/// First eligible balance holding at least `amount`
fn first_covering(
    account: &UserBalance,
    balance_type: BalanceType,
    direction: Direction,
    scope: &DebitScope,
    amount: Decimal,
) -> Option<String> {
    let chain = account.chain(balance_type, direction)?;
    scope
        .ordered(chain)
        .into_iter()
        .find(|uuid| chain.get(uuid).map_or(false, |b| b.value > Decimal::ZERO && b.value >= amount))
}

/// Take money for a call
///
/// A single balance covering `amount` pays it all. Otherwise positive
/// eligible balances are drained in selection order and the default money
/// balance absorbs the rest, going negative if needed.
fn take_money(
    account: &mut UserBalance,
    direction: Direction,
    scope: &DebitScope,
    amount: Decimal,
) -> Vec<MoneyShare> {
    if let Some(uuid) = first_covering(account, BalanceType::Monetary, direction, scope, amount) {
        if let Some(balance) = account
            .chain_mut(BalanceType::Monetary, direction)
            .get_mut(&uuid)
        {
            balance.value -= amount;
        }
        return vec![MoneyShare::new(uuid, amount)];
    }

    let mut shares = Vec::new();
    let mut left = amount;
    let chain = account.chain_mut(BalanceType::Monetary, direction);
    for uuid in scope.ordered(chain) {
        if left <= Decimal::ZERO {
            break;
        }
        if let Some(balance) = chain.get_mut(&uuid) {
            if balance.value > Decimal::ZERO {
                let take = left.min(balance.value);
                balance.value -= take;
                left -= take;
                shares.push(MoneyShare::new(uuid, take));
            }
        }
    }

    if left > Decimal::ZERO {
        let default = account.default_money_balance(direction, scope.now);
        debug!("Default balance {} absorbs {}", default.uuid, left);
        default.value -= left;
        match shares.iter_mut().find(|share| share.uuid == default.uuid) {
            Some(share) => share.amount += left,
            None => shares.push(MoneyShare::new(default.uuid.clone(), left)),
        }
    }
    shares
}

/// What a refund gave back
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Refund {
    pub seconds: Decimal,
    pub money: Decimal,
}

/// Credit left for a session on one account
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionCredit {
    /// Seconds available on duration-based balances
    pub seconds: Decimal,
    /// Money left once special prices of those seconds are paid
    pub money: Decimal,
}

/// Debits accounts and runs their triggers
pub struct BalanceEngine<S: Storage> {
    storage: Arc<S>,
    destinations: Arc<DestinationMatcher<S>>,
    executor: Arc<dyn ActionExecutor>,
}

impl<S: Storage> BalanceEngine<S> {
    pub fn new(
        storage: Arc<S>,
        destinations: Arc<DestinationMatcher<S>>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            storage,
            destinations,
            executor,
        }
    }

    /// Eligibility of the account's balances for `number`
    pub async fn scope(&self, account: &UserBalance, number: Option<&str>) -> AppResult<DebitScope> {
        let mut scope = DebitScope::unrestricted(Utc::now());
        let Some(number) = number else {
            return Ok(scope);
        };
        for balance in account.balance_map.values().flat_map(BalanceChain::iter) {
            if let Some(destination_id) = balance.destination_id.as_deref() {
                let precision = self.destinations.precision(destination_id, number).await?;
                if precision > 0 {
                    scope.precisions.insert(balance.uuid.clone(), precision);
                }
            }
        }
        Ok(scope)
    }

    /// Pay every unpaid increment of a call cost
    ///
    /// The connect fee is paid first and is never refunded. Each increment
    /// records the balances that paid it. With `count` set, usage counters
    /// are updated and triggers evaluated afterwards.
    #[instrument(skip_all, fields(account = %account.id, cost = %cc.cost))]
    pub async fn debit_call_cost(&self, account: &mut UserBalance, cc: &mut CallCost, count: bool) -> AppResult<()> {
        let direction = cc.direction;
        let scope = self.scope(account, Some(&cc.destination)).await?;
        let account_id = account.id.clone();
        let mut seconds_used = Decimal::ZERO;
        let mut money_used = Decimal::ZERO;

        if cc.connect_fee > Decimal::ZERO {
            take_money(account, direction, &scope, cc.connect_fee);
            money_used += cc.connect_fee;
        }

        for increment in cc
            .timespans
            .iter_mut()
            .flat_map(|ts| ts.increments.iter_mut())
            .filter(|inc| !inc.paid)
        {
            let seconds = utils::seconds(increment.duration);
            let mut paid_by = IncrementBalances {
                account: Some(account_id.clone()),
                ..IncrementBalances::default()
            };

            let unit = first_covering(account, BalanceType::Minutes, direction, &scope, seconds);
            let unit_charge = unit.as_ref().and_then(|uuid| {
                let balance = account
                    .chain_mut(BalanceType::Minutes, direction)
                    .get_mut(uuid)?;
                balance.value -= seconds;
                Some(balance.special_charge(seconds, increment.cost))
            });

            match (unit, unit_charge) {
                (Some(uuid), Some(charge)) => {
                    seconds_used += seconds;
                    paid_by.unit_uuid = Some(uuid);
                    if charge > Decimal::ZERO {
                        paid_by.money = take_money(account, direction, &scope, charge);
                        money_used += charge;
                    }
                }
                _ => {
                    paid_by.money = take_money(account, direction, &scope, increment.cost);
                    money_used += increment.cost;
                }
            }

            increment.balances = paid_by;
            increment.paid = true;
        }

        debug!("Debited {}s and {} from {}", seconds_used, money_used, account_id);

        if count {
            let destination = Some(cc.destination.as_str());
            if seconds_used > Decimal::ZERO {
                self.count_units(account, BalanceType::Minutes, direction, seconds_used, destination)
                    .await?;
            }
            if money_used > Decimal::ZERO {
                self.count_units(account, BalanceType::Monetary, direction, money_used, destination)
                    .await?;
            }
            self.execute_triggers(account).await?;
        }
        Ok(())
    }

    /// Debit a plain amount from one balance class
    ///
    /// Returns the chain total after the debit.
    #[instrument(skip(self, account), fields(account = %account.id))]
    pub async fn debit_balance(
        &self,
        account: &mut UserBalance,
        balance_type: BalanceType,
        direction: Direction,
        amount: Decimal,
        destination: Option<&str>,
        count: bool,
    ) -> AppResult<Decimal> {
        let scope = self.scope(account, destination).await?;
        let total = debit_chain(account, balance_type, direction, amount, &scope)?;
        if count && amount > Decimal::ZERO {
            self.count_units(account, balance_type, direction, amount, destination)
                .await?;
            self.execute_triggers(account).await?;
        }
        Ok(total)
    }

    /// Give back what paid increments took
    ///
    /// Balances are found by the uuids recorded on each increment; a missing
    /// uuid is logged and skipped. Refunded increments are marked unpaid so a
    /// second refund of the same slice gives nothing back. Counters are
    /// decremented and triggers evaluated afterwards.
    #[instrument(skip(self, account, increments), fields(account = %account.id, increments = increments.len()))]
    pub async fn refund_increments(
        &self,
        account: &mut UserBalance,
        direction: Direction,
        destination: Option<&str>,
        increments: &mut [Increment],
    ) -> AppResult<Refund> {
        let mut refund = Refund::default();

        for increment in increments.iter_mut().filter(|inc| inc.paid) {
            increment.paid = false;
            let paid_by = &increment.balances;
            if let Some(uuid) = paid_by.unit_uuid.as_deref() {
                let seconds = utils::seconds(increment.duration);
                match account.balance_mut(uuid) {
                    Some(balance) => {
                        balance.value += seconds;
                        refund.seconds += seconds;
                    }
                    None => warn!("Refund skipped, unit balance {} not on {}", uuid, account.id),
                }
            }
            for share in &paid_by.money {
                match account.balance_mut(&share.uuid) {
                    Some(balance) => {
                        balance.value += share.amount;
                        refund.money += share.amount;
                    }
                    None => warn!("Refund skipped, money balance {} not on {}", share.uuid, account.id),
                }
            }
        }

        if refund.seconds > Decimal::ZERO {
            self.count_units(account, BalanceType::Minutes, direction, -refund.seconds, destination)
                .await?;
        }
        if refund.money > Decimal::ZERO {
            self.count_units(account, BalanceType::Monetary, direction, -refund.money, destination)
                .await?;
        }

        info!("Refunded {}s and {} to {}", refund.seconds, refund.money, account.id);
        self.execute_triggers(account).await?;
        Ok(refund)
    }

    /// Add usage to the counter bucket best matching `destination`
    pub async fn count_units(
        &self,
        account: &mut UserBalance,
        balance_type: BalanceType,
        direction: Direction,
        amount: Decimal,
        destination: Option<&str>,
    ) -> AppResult<()> {
        let bucket = match (destination, account.counter(balance_type, direction)) {
            (Some(number), Some(counter)) => self
                .destinations
                .best_match(counter.destination_ids(), number)
                .await?
                .map(|(id, _)| id.to_string()),
            _ => None,
        };
        account
            .counter_mut(balance_type, direction)
            .add_units(amount, bucket.as_deref());
        Ok(())
    }

    /// Credit available for a session towards `number`
    ///
    /// Duration balances are consumed first; an absolute special price on
    /// one of them limits its seconds to what the remaining money can pay.
    pub async fn session_credit(
        &self,
        account: &UserBalance,
        direction: Direction,
        number: &str,
    ) -> AppResult<SessionCredit> {
        let scope = self.scope(account, Some(number)).await?;
        let positive = |chain: Option<&BalanceChain>| -> Vec<Balance> {
            chain.map_or_else(Vec::new, |chain| {
                scope
                    .ordered(chain)
                    .iter()
                    .filter_map(|uuid| chain.get(uuid))
                    .filter(|b| b.value > Decimal::ZERO)
                    .cloned()
                    .collect()
            })
        };

        let mut credit = SessionCredit {
            seconds: Decimal::ZERO,
            money: positive(account.chain(BalanceType::Monetary, direction))
                .iter()
                .map(|b| b.value)
                .sum(),
        };

        for balance in positive(account.chain(BalanceType::Minutes, direction)) {
            let price = match (balance.special_price, balance.special_price_type) {
                (Some(price), PriceType::Absolute) if price > Decimal::ZERO => price,
                _ => Decimal::ZERO,
            };
            let seconds = if price > Decimal::ZERO {
                (credit.money / price).max(Decimal::ZERO).min(balance.value)
            } else {
                balance.value
            };
            credit.money -= seconds * price;
            credit.seconds += seconds;
        }

        Ok(credit)
    }

    /// Fire every armed trigger whose threshold is crossed
    ///
    /// Triggers are evaluated by weight, highest first. A fired trigger stays
    /// executed until an action re-arms it.
    pub async fn execute_triggers(&self, account: &mut UserBalance) -> AppResult<()> {
        for idx in 0..account.action_triggers.len() {
            let trigger = account.action_triggers[idx].clone();
            if trigger.executed || !is_triggered(account, &trigger) {
                continue;
            }

            let mut actions = match self.storage.get_actions(&trigger.actions_id).await {
                Ok(actions) => actions,
                Err(e) if e.is_not_found() => {
                    warn!("Trigger {} on {}: {}", trigger.id, account.id, e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            sort_actions(&mut actions);

            info!(
                "Trigger {} fired on {} at threshold {}",
                trigger.id, account.id, trigger.threshold_value
            );
            self.apply_actions(account, &actions);
            if let Some(fired) = account.action_triggers.get_mut(idx) {
                fired.executed = true;
            }

            if let Err(e) = self
                .storage
                .log_action_trigger(&account.id, RATER_SOURCE, &trigger, &actions)
                .await
            {
                warn!("Failed to log trigger {}: {}", trigger.id, e);
            }
        }
        Ok(())
    }

    /// Run a sorted action bundle; failing actions are logged and skipped
    pub fn apply_actions(&self, account: &mut UserBalance, actions: &[Action]) {
        for action in actions {
            if let Err(e) = self.executor.apply(account, action) {
                error!("Action {} on {} failed: {}", action.id, account.id, e);
            }
        }
    }
}

fn is_triggered(account: &UserBalance, trigger: &ActionTrigger) -> bool {
    let filter = trigger.destination_id.as_deref();
    let crossed = |chain: &BalanceChain| {
        chain
            .iter()
            .filter(|b| b.matches_destination(filter))
            .any(|b| trigger.threshold_type.is_crossed(b.value, trigger.threshold_value))
    };

    if trigger.threshold_type.watches_counters() {
        account
            .counter(trigger.balance_type, trigger.direction)
            .map_or(false, |counter| crossed(&counter.balances))
    } else {
        account
            .chain(trigger.balance_type, trigger.direction)
            .map_or(false, crossed)
    }
}
