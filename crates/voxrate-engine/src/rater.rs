//! Rating and debiting facade
//!
//! [`Rater`] wires the destination matcher, the plan resolver, the splitter,
//! the calculator and the balance engine together and exposes the operations
//! hosts call: cost queries, debits, session sizing and refunds. Every
//! account mutation runs under the account's lock and ends with a write back
//! to storage.

use chrono::Duration;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;
use voxrate_core::config::AppConfig;
use voxrate_core::models::{
    sort_actions, ActionTiming, BalanceType, CallCost, CallDescriptor, Direction, Increment,
    UserBalance,
};
use voxrate_core::traits::Storage;
use voxrate_core::utils;
use voxrate_core::{AppError, AppResult};

use crate::actions::{ActionExecutor, StandardActions};
use crate::calculator::CostCalculator;
use crate::constants::{RATER_SOURCE, SCHEDULER_SOURCE};
use crate::destinations::DestinationMatcher;
use crate::ledger::{BalanceEngine, Refund};
use crate::locks::AccountLocks;
use crate::resolver::{RatingPlanResolver, ResolvedPlans};
use crate::splitter::IntervalSplitter;

/// Longest session an account can pay for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxSessionTime {
    /// Postpaid accounts are never cut off
    Unlimited,
    Limited(Duration),
}

/// Rating and debiting entry point
pub struct Rater<S: Storage> {
    storage: Arc<S>,
    config: AppConfig,
    destinations: Arc<DestinationMatcher<S>>,
    resolver: RatingPlanResolver<S>,
    splitter: IntervalSplitter,
    calculator: CostCalculator,
    ledger: BalanceEngine<S>,
    locks: AccountLocks,
}

impl<S: Storage> Rater<S> {
    /// Create a rater running the built-in action semantics
    pub fn new(storage: Arc<S>, config: AppConfig) -> Self {
        Self::with_executor(storage, config, Arc::new(StandardActions))
    }

    pub fn with_executor(storage: Arc<S>, config: AppConfig, executor: Arc<dyn ActionExecutor>) -> Self {
        let destinations = Arc::new(DestinationMatcher::new(storage.clone(), &config.cache));
        let resolver = RatingPlanResolver::new(storage.clone(), destinations.clone(), &config);
        let ledger = BalanceEngine::new(storage.clone(), destinations.clone(), executor);
        Self {
            splitter: IntervalSplitter::new(&config.rating),
            calculator: CostCalculator::new(config.rating.clone()),
            storage,
            config,
            destinations,
            resolver,
            ledger,
            locks: AccountLocks::new(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn ledger(&self) -> &BalanceEngine<S> {
        &self.ledger
    }

    fn validate(cd: &CallDescriptor) -> AppResult<()> {
        cd.validate()?;
        Ok(())
    }

    fn require_amount(cd: &CallDescriptor) -> AppResult<()> {
        if cd.amount <= Decimal::ZERO {
            return Err(AppError::MalformedInput(format!(
                "amount must be positive, got {}",
                cd.amount
            )));
        }
        Ok(())
    }

    fn price(&self, cd: &CallDescriptor, resolved: &ResolvedPlans) -> AppResult<CallCost> {
        let spans = self.splitter.split(cd, &resolved.plans)?;
        Ok(self.calculator.price(cd, resolved, spans))
    }

    async fn load_account(&self, key: &str) -> AppResult<UserBalance> {
        self.storage
            .get_account(key)
            .await?
            .ok_or_else(|| AppError::AccountNotFound(key.to_string()))
    }

    async fn store_account(&self, account: &UserBalance) -> AppResult<()> {
        self.storage.set_account(account).await.map_err(|e| {
            error!("Failed to store account {}: {}", account.id, e);
            e
        })
    }

    async fn log_call_cost(&self, cc: &CallCost) {
        if let Err(e) = self.storage.log_call_cost(RATER_SOURCE, cc).await {
            warn!("Failed to log call cost for {}: {}", cc.account, e);
        }
    }

    /// Price a call without touching any balance
    #[instrument(skip(self, cd), fields(key = %cd.key(), destination = %cd.destination))]
    pub async fn get_cost(&self, cd: &CallDescriptor) -> AppResult<CallCost> {
        Self::validate(cd)?;
        let resolved = self.resolver.resolve(cd).await?;
        self.price(cd, &resolved)
    }

    /// Price a call and charge it to the account
    #[instrument(skip(self, cd), fields(account = %cd.account_key(), destination = %cd.destination))]
    pub async fn debit(&self, cd: &CallDescriptor) -> AppResult<CallCost> {
        Self::validate(cd)?;
        let resolved = self.resolver.resolve(cd).await?;
        let mut cc = self.price(cd, &resolved)?;
        let key = cd.account_key();

        self.locks
            .guard(&key, async {
                let mut account = self.load_account(&key).await?;
                self.charge(&mut account, &mut cc).await?;
                self.store_account(&account).await
            })
            .await?;

        self.log_call_cost(&cc).await;
        Ok(cc)
    }

    async fn charge(&self, account: &mut UserBalance, cc: &mut CallCost) -> AppResult<()> {
        if cc.cost.is_zero() && cc.connect_fee.is_zero() {
            debug!("Nothing to charge on {}", account.id);
            return Ok(());
        }
        self.ledger.debit_call_cost(account, cc, true).await
    }

    /// Debit as much of `cd.amount` seconds as the account can pay for
    ///
    /// The returned cost's end time is the authoritative end of what was
    /// billed; increment rounding may push it past the requested window.
    ///
    /// # Errors
    ///
    /// `AppError::InsufficientCredit` when not even the smallest step of the
    /// requested amount is affordable.
    #[instrument(skip(self, cd), fields(account = %cd.account_key(), amount = %cd.amount, loop_index = cd.loop_index))]
    pub async fn max_debit(&self, cd: &CallDescriptor) -> AppResult<CallCost> {
        Self::validate(cd)?;
        Self::require_amount(cd)?;
        let resolved = self.resolver.resolve(cd).await?;
        let key = cd.account_key();

        let cc = self
            .locks
            .guard(&key, async {
                let mut account = self.load_account(&key).await?;
                let length = match self.max_session_for(&account, cd, &resolved).await? {
                    MaxSessionTime::Unlimited => utils::from_seconds(cd.amount),
                    MaxSessionTime::Limited(length) if length > Duration::zero() => length,
                    MaxSessionTime::Limited(_) => {
                        info!("No credit left on {}", key);
                        return Err(AppError::InsufficientCredit { account: key.clone() });
                    }
                };

                let mut sized = cd.clone();
                sized.set_time_end(sized.time_start + length);
                let mut cc = self.price(&sized, &resolved)?;
                self.charge(&mut account, &mut cc).await?;
                self.store_account(&account).await?;
                Ok::<_, AppError>(cc)
            })
            .await?;

        self.log_call_cost(&cc).await;
        Ok(cc)
    }

    /// Longest session the account can pay for, up to `cd.amount` seconds
    #[instrument(skip(self, cd), fields(account = %cd.account_key(), amount = %cd.amount))]
    pub async fn get_max_session_time(&self, cd: &CallDescriptor) -> AppResult<MaxSessionTime> {
        Self::validate(cd)?;
        Self::require_amount(cd)?;
        let resolved = self.resolver.resolve(cd).await?;
        let account = self.load_account(&cd.account_key()).await?;
        self.max_session_for(&account, cd, &resolved).await
    }

    /// Cost is tried for the requested amount first, then for amounts
    /// lowered by a fixed step until one fits the money left after
    /// duration balances are used up.
    async fn max_session_for(
        &self,
        account: &UserBalance,
        cd: &CallDescriptor,
        resolved: &ResolvedPlans,
    ) -> AppResult<MaxSessionTime> {
        if account.is_postpaid() {
            return Ok(MaxSessionTime::Unlimited);
        }

        let credit = self
            .ledger
            .session_credit(account, cd.direction, &cd.destination)
            .await?;
        debug!("Available on {}: {}s, {}", account.id, credit.seconds, credit.money);
        if credit.money <= Decimal::ZERO {
            return Ok(MaxSessionTime::Limited(utils::from_seconds(credit.seconds)));
        }

        let session = &self.config.session;
        let step = cd.amount * Decimal::from(session.max_session_step_percent) / Decimal::ONE_HUNDRED;
        let prior = cd.effective_call_duration() - cd.duration();
        let mut attempt = cd.amount;

        for _ in 0..session.max_session_steps {
            if attempt <= Decimal::ZERO {
                break;
            }
            let paid = attempt - credit.seconds;
            if paid <= Decimal::ZERO {
                return Ok(MaxSessionTime::Limited(utils::from_seconds(attempt)));
            }

            let mut trial = cd.clone();
            trial.time_end = trial.time_start + utils::from_seconds(paid);
            trial.call_duration = prior + trial.duration();
            let cost = self.price(&trial, resolved)?.cost;
            if cost < credit.money {
                return Ok(MaxSessionTime::Limited(utils::from_seconds(attempt)));
            }
            debug!("{}s cost {} over {}, backing off", attempt, cost, credit.money);
            attempt -= step;
        }

        Ok(MaxSessionTime::Limited(Duration::zero()))
    }

    async fn debit_class(&self, cd: &CallDescriptor, balance_type: BalanceType) -> AppResult<Decimal> {
        Self::validate(cd)?;
        let key = cd.account_key();
        self.locks
            .guard(&key, async {
                let mut account = self.load_account(&key).await?;
                let left = self
                    .ledger
                    .debit_balance(
                        &mut account,
                        balance_type,
                        cd.direction,
                        cd.amount,
                        Some(&cd.destination),
                        true,
                    )
                    .await?;
                self.store_account(&account).await?;
                Ok(left)
            })
            .await
    }

    /// Debit `cd.amount` money; negative amounts credit
    #[instrument(skip(self, cd), fields(account = %cd.account_key(), amount = %cd.amount))]
    pub async fn debit_cents(&self, cd: &CallDescriptor) -> AppResult<Decimal> {
        self.debit_class(cd, BalanceType::Monetary).await
    }

    /// Debit `cd.amount` messages
    #[instrument(skip(self, cd), fields(account = %cd.account_key(), amount = %cd.amount))]
    pub async fn debit_sms(&self, cd: &CallDescriptor) -> AppResult<Decimal> {
        self.debit_class(cd, BalanceType::Sms).await
    }

    /// Debit `cd.amount` seconds from duration balances; negative amounts credit
    #[instrument(skip(self, cd), fields(account = %cd.account_key(), amount = %cd.amount))]
    pub async fn debit_seconds(&self, cd: &CallDescriptor) -> AppResult<Decimal> {
        self.debit_class(cd, BalanceType::Minutes).await
    }

    /// Give back increments paid by an earlier debit
    ///
    /// Increments are marked unpaid once the account is stored, so refunding
    /// the same slice twice credits it once.
    #[instrument(skip(self, cd, increments), fields(account = %cd.account_key(), increments = increments.len()))]
    pub async fn refund_increments(&self, cd: &CallDescriptor, increments: &mut [Increment]) -> AppResult<Refund> {
        Self::validate(cd)?;
        let key = cd.account_key();
        let mut settled = increments.to_vec();
        let refund = self
            .locks
            .guard(&key, async {
                let mut account = self.load_account(&key).await?;
                let refund = self
                    .ledger
                    .refund_increments(&mut account, cd.direction, Some(&cd.destination), &mut settled)
                    .await?;
                self.store_account(&account).await?;
                Ok::<_, AppError>(refund)
            })
            .await?;
        increments.clone_from_slice(&settled);
        Ok(refund)
    }

    /// Count `cd.amount` received seconds on the inbound minutes counter
    #[instrument(skip(self, cd), fields(account = %cd.account_key(), amount = %cd.amount))]
    pub async fn add_received_call_seconds(&self, cd: &CallDescriptor) -> AppResult<()> {
        Self::validate(cd)?;
        let key = cd.account_key();
        self.locks
            .guard(&key, async {
                let mut account = self.load_account(&key).await?;
                self.ledger
                    .count_units(
                        &mut account,
                        BalanceType::Minutes,
                        Direction::In,
                        cd.amount,
                        Some(&cd.destination),
                    )
                    .await?;
                self.ledger.execute_triggers(&mut account).await?;
                self.store_account(&account).await
            })
            .await
    }

    /// Apply a timing's action bundle to each of its accounts
    ///
    /// Accounts that no longer exist are skipped. Returns how many accounts
    /// were updated.
    #[instrument(skip(self, timing), fields(timing = %timing.id, actions = %timing.actions_id))]
    pub async fn execute_action_timing(&self, timing: &ActionTiming) -> AppResult<usize> {
        let mut actions = self.storage.get_actions(&timing.actions_id).await?;
        sort_actions(&mut actions);

        let mut updated = 0;
        for account_id in &timing.account_ids {
            let result = self
                .locks
                .guard(account_id, async {
                    let mut account = self.load_account(account_id).await?;
                    self.ledger.apply_actions(&mut account, &actions);
                    self.ledger.execute_triggers(&mut account).await?;
                    self.store_account(&account).await
                })
                .await;
            match result {
                Ok(()) => updated += 1,
                Err(e) if e.is_not_found() => warn!("Timing {} skips {}: {}", timing.id, account_id, e),
                Err(e) => return Err(e),
            }
        }

        if let Err(e) = self
            .storage
            .log_action_timing(SCHEDULER_SOURCE, timing, &actions)
            .await
        {
            warn!("Failed to log action timing {}: {}", timing.id, e);
        }
        info!("Action timing {} applied to {} accounts", timing.id, updated);
        Ok(updated)
    }

    /// Drop cached plans and destinations after a reference data reload
    pub fn flush_cache(&self) {
        self.resolver.flush();
        self.destinations.flush();
        info!("Rating caches flushed");
    }
}
