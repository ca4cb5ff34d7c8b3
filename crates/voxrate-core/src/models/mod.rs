//! Domain models for voxrate
//!
//! This module contains all the core domain models used throughout the engine.

pub mod account;
pub mod action;
pub mod balance;
pub mod call;
pub mod destination;
pub mod rate;
pub mod timespan;
pub mod timing;

pub use account::{AccountType, UnitsCounter, UserBalance};
pub use action::{
    sort_actions, sort_triggers, Action, ActionKind, ActionTiming, ActionTrigger, Schedule,
    ThresholdType,
};
pub use balance::{balance_key, selection_order, Balance, BalanceChain, BalanceType, PriceType};
pub use call::{CallCost, CallDescriptor, Direction};
pub use destination::Destination;
pub use rate::{Rate, RateInterval, RatingPlan, RatingProfile, RoundingMethod};
pub use timespan::{Increment, IncrementBalances, MoneyShare, TimeSpan};
pub use timing::Timing;
