//! Action execution
//!
//! Every [`ActionKind`] maps to one account mutation. Triggers and action
//! timings hand their bundles to an [`ActionExecutor`]; the engine ships
//! [`StandardActions`], hosts may wrap or replace it.

use chrono::Utc;
use tracing::{debug, info};
use voxrate_core::models::{Action, ActionKind, AccountType, Balance, BalanceType, UserBalance};
use voxrate_core::{AppError, AppResult};

use crate::ledger::{debit_chain, DebitScope};

/// Applies one action to an account
pub trait ActionExecutor: Send + Sync {
    fn apply(&self, account: &mut UserBalance, action: &Action) -> AppResult<()>;
}

/// Built-in semantics for every action kind
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardActions;

impl StandardActions {
    fn template<'a>(action: &'a Action) -> AppResult<(BalanceType, &'a Balance)> {
        match (action.balance_type, action.balance.as_ref()) {
            (Some(balance_type), Some(balance)) => Ok((balance_type, balance)),
            _ => Err(AppError::MalformedInput(format!(
                "action {} ({}) needs a balance type and a balance",
                action.id, action.kind
            ))),
        }
    }

    fn reset_account(account: &mut UserBalance, account_type: AccountType, action: &Action) {
        account.account_type = account_type;
        account.zero_balances();
        for counter in account.unit_counters.iter_mut() {
            counter.reset();
        }
        account.reset_triggers(None, action.direction);
    }
}

impl ActionExecutor for StandardActions {
    fn apply(&self, account: &mut UserBalance, action: &Action) -> AppResult<()> {
        debug!("Applying {} ({}) to {}", action.id, action.kind, account.id);

        match action.kind {
            ActionKind::Log => {
                info!(
                    account = %account.id,
                    action = %action.id,
                    "Account snapshot: {}",
                    serde_json::to_string(account)?
                );
            }
            ActionKind::ResetTriggers => {
                account.reset_triggers(action.balance_type, action.direction);
            }
            ActionKind::SetPostpaid => account.account_type = AccountType::Postpaid,
            ActionKind::SetPrepaid => account.account_type = AccountType::Prepaid,
            ActionKind::ResetPostpaid => Self::reset_account(account, AccountType::Postpaid, action),
            ActionKind::ResetPrepaid => Self::reset_account(account, AccountType::Prepaid, action),
            ActionKind::Topup => {
                let (balance_type, template) = Self::template(action)?;
                let chain = account.chain_mut(balance_type, action.direction);
                match chain.find_same_kind_mut(template) {
                    Some(existing) => existing.value += template.value,
                    None => chain.push(template.fresh_copy()),
                }
            }
            ActionKind::TopupReset => {
                let (balance_type, template) = Self::template(action)?;
                let chain = account.chain_mut(balance_type, action.direction);
                chain.0 = vec![template.fresh_copy()];
            }
            ActionKind::Debit => {
                let (balance_type, template) = Self::template(action)?;
                let chain = account.chain_mut(balance_type, action.direction);
                match chain.find_same_kind_mut(template) {
                    Some(existing) => existing.value -= template.value,
                    None => {
                        let scope = DebitScope::unrestricted(Utc::now());
                        debit_chain(account, balance_type, action.direction, template.value, &scope)?;
                    }
                }
            }
            ActionKind::ResetCounter => {
                let balance_type = action.balance_type.ok_or_else(|| {
                    AppError::MalformedInput(format!("action {} needs a balance type", action.id))
                })?;
                if let Some(counter) = account
                    .unit_counters
                    .iter_mut()
                    .find(|uc| uc.balance_type == balance_type && uc.direction == action.direction)
                {
                    counter.reset();
                }
            }
            ActionKind::ResetCounters => {
                for counter in account
                    .unit_counters
                    .iter_mut()
                    .filter(|uc| action.balance_type.map_or(true, |bt| bt == uc.balance_type))
                {
                    counter.reset();
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use voxrate_core::models::{ActionTrigger, Direction, ThresholdType};

    fn account() -> UserBalance {
        let mut ub = UserBalance::new("*out:vdf:rif", AccountType::Prepaid);
        ub.add_balance(BalanceType::Monetary, Direction::Out, Balance::new(dec!(10)));
        ub.add_balance(
            BalanceType::Minutes,
            Direction::Out,
            Balance::new(dec!(100)).with_weight(20.0).with_destination("NAT"),
        );
        ub
    }

    #[test]
    fn test_topup_adds_to_same_kind() {
        let mut ub = account();
        let action = Action::new("TOPUP", ActionKind::Topup)
            .with_balance(BalanceType::Minutes, Balance::new(dec!(50)).with_weight(20.0).with_destination("NAT"));
        StandardActions.apply(&mut ub, &action).unwrap();
        let chain = ub.chain(BalanceType::Minutes, Direction::Out).unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain.total_value(), dec!(150));
    }

    #[test]
    fn test_topup_new_kind_gets_fresh_uuid() {
        let mut ub = account();
        let template = Balance::new(dec!(5)).with_weight(1.0);
        let action = Action::new("TOPUP", ActionKind::Topup).with_balance(BalanceType::Monetary, template.clone());
        StandardActions.apply(&mut ub, &action).unwrap();
        StandardActions.apply(&mut ub, &action).unwrap();
        let chain = ub.chain(BalanceType::Monetary, Direction::Out).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.total_value(), dec!(20));
        assert!(chain.get(&template.uuid).is_none());
    }

    #[test]
    fn test_topup_reset_replaces_chain() {
        let mut ub = account();
        let action = Action::new("RESET", ActionKind::TopupReset)
            .with_balance(BalanceType::Monetary, Balance::new(dec!(3)));
        StandardActions.apply(&mut ub, &action).unwrap();
        assert_eq!(ub.total(BalanceType::Monetary, Direction::Out), dec!(3));
        assert_eq!(ub.chain(BalanceType::Monetary, Direction::Out).unwrap().len(), 1);
    }

    #[test]
    fn test_debit_without_same_kind_uses_chain() {
        let mut ub = account();
        let action = Action::new("DEBIT", ActionKind::Debit)
            .with_balance(BalanceType::Monetary, Balance::new(dec!(4)).with_weight(99.0));
        StandardActions.apply(&mut ub, &action).unwrap();
        assert_eq!(ub.total(BalanceType::Monetary, Direction::Out), dec!(6));
    }

    #[test]
    fn test_prepaid_debit_over_credit_is_refused() {
        let mut ub = account();
        let action = Action::new("DEBIT", ActionKind::Debit)
            .with_balance(BalanceType::Monetary, Balance::new(dec!(40)).with_weight(99.0));
        let err = StandardActions.apply(&mut ub, &action).unwrap_err();
        assert_eq!(err.error_code(), "insufficient_credit");
        assert_eq!(ub.total(BalanceType::Monetary, Direction::Out), dec!(10));
    }

    #[test]
    fn test_balance_kinds_need_template() {
        let mut ub = account();
        let err = StandardActions
            .apply(&mut ub, &Action::new("TOPUP", ActionKind::Topup))
            .unwrap_err();
        assert_eq!(err.error_code(), "malformed_input");
    }

    #[test]
    fn test_reset_prepaid() {
        let mut ub = account();
        ub.account_type = AccountType::Postpaid;
        ub.counter_mut(BalanceType::Monetary, Direction::Out)
            .add_units(dec!(7), None);
        let mut trigger = ActionTrigger::new("t", BalanceType::Monetary, ThresholdType::MaxCounter, dec!(5), "X");
        trigger.executed = true;
        ub.add_trigger(trigger);

        StandardActions
            .apply(&mut ub, &Action::new("RP", ActionKind::ResetPrepaid))
            .unwrap();

        assert_eq!(ub.account_type, AccountType::Prepaid);
        assert_eq!(ub.total(BalanceType::Monetary, Direction::Out), dec!(0));
        assert_eq!(ub.total(BalanceType::Minutes, Direction::Out), dec!(0));
        assert_eq!(ub.unit_counters[0].balances.total_value(), dec!(0));
        assert!(!ub.action_triggers[0].executed);
    }

    #[test]
    fn test_reset_triggers_filtered_by_class() {
        let mut ub = account();
        for (id, bt) in [("money", BalanceType::Monetary), ("mins", BalanceType::Minutes)] {
            let mut trigger = ActionTrigger::new(id, bt, ThresholdType::MinBalance, dec!(1), "X");
            trigger.executed = true;
            ub.add_trigger(trigger);
        }
        let action = Action::new("RT", ActionKind::ResetTriggers).with_balance_type(BalanceType::Minutes);
        StandardActions.apply(&mut ub, &action).unwrap();

        let armed: Vec<_> = ub
            .action_triggers
            .iter()
            .filter(|t| !t.executed)
            .map(|t| t.id.as_str())
            .collect();
        assert_eq!(armed, vec!["mins"]);
    }

    #[test]
    fn test_set_postpaid_and_counters() {
        let mut ub = account();
        ub.counter_mut(BalanceType::Minutes, Direction::Out)
            .add_units(dec!(60), None);
        ub.counter_mut(BalanceType::Monetary, Direction::Out)
            .add_units(dec!(2), None);

        StandardActions
            .apply(&mut ub, &Action::new("SP", ActionKind::SetPostpaid))
            .unwrap();
        assert!(ub.is_postpaid());

        StandardActions
            .apply(
                &mut ub,
                &Action::new("RC", ActionKind::ResetCounter).with_balance_type(BalanceType::Minutes),
            )
            .unwrap();
        assert_eq!(ub.counter(BalanceType::Minutes, Direction::Out).unwrap().balances.total_value(), dec!(0));
        assert_eq!(ub.counter(BalanceType::Monetary, Direction::Out).unwrap().balances.total_value(), dec!(2));

        StandardActions
            .apply(&mut ub, &Action::new("RCS", ActionKind::ResetCounters))
            .unwrap();
        assert_eq!(ub.counter(BalanceType::Monetary, Direction::Out).unwrap().balances.total_value(), dec!(0));
    }
}
