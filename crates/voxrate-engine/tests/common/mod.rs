//! Shared fixtures for the engine integration tests

#![allow(dead_code)]

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use voxrate_core::config::AppConfig;
use voxrate_core::models::{
    AccountType, Balance, BalanceType, CallDescriptor, Destination, Direction, Rate, RateInterval,
    RatingPlan, RatingProfile, RoundingMethod, Timing, UserBalance,
};
use voxrate_core::traits::{AccountingStorage, DataStorage};
use voxrate_engine::Rater;
use voxrate_storage::MemoryStorage;

pub const ACCOUNT: &str = "*out:vdf:rif";
pub const PROFILE: &str = "*out:vdf:0:rif";

/// Thursday 2 February 2012
pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2012, 2, 2, h, m, s).unwrap()
}

pub fn activation() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2012, 1, 1, 0, 0, 0).unwrap()
}

pub fn per_second(value: Decimal) -> Rate {
    Rate::new(Duration::zero(), value, Duration::seconds(1), Duration::seconds(1))
}

/// Peak rate all workday long, off-peak after 18:00 and on weekends
pub fn peak_offpeak_plan() -> RatingPlan {
    let peak = RateInterval::new(
        Timing::workdays(NaiveTime::from_hms_opt(0, 0, 0).unwrap()),
        10.0,
        vec![per_second(dec!(1))],
    )
    .with_connect_fee(dec!(1))
    .with_rounding(RoundingMethod::Up, 2);
    let evening = RateInterval::new(
        Timing::workdays(NaiveTime::from_hms_opt(18, 0, 0).unwrap()),
        10.0,
        vec![per_second(dec!(0.5))],
    )
    .with_rounding(RoundingMethod::Down, 2);
    let weekend = RateInterval::new(Timing::weekends(), 10.0, vec![per_second(dec!(0.5))])
        .with_rounding(RoundingMethod::Down, 2);
    RatingPlan::new(activation(), vec![peak, evening, weekend])
}

/// Flat plan charging `value` per second, no connect fee
pub fn flat_plan(value: Decimal) -> RatingPlan {
    RatingPlan::new(
        activation(),
        vec![RateInterval::new(Timing::default(), 10.0, vec![per_second(value)])],
    )
}

pub fn prepaid(money: Decimal) -> UserBalance {
    let mut ub = UserBalance::new(ACCOUNT, AccountType::Prepaid);
    ub.add_balance(BalanceType::Monetary, Direction::Out, Balance::new(money));
    ub
}

pub fn call(start: DateTime<Utc>, end: DateTime<Utc>) -> CallDescriptor {
    CallDescriptor::new("vdf", "rif", "0256", start, end)
}

/// Storage holding the NAT destination, one profile and one account
pub async fn storage_with(plan: RatingPlan, account: UserBalance) -> Arc<MemoryStorage> {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .set_destination(&Destination::new("NAT", &["0256", "0257", "0723"]))
        .await
        .unwrap();
    let mut profile = RatingProfile::new(PROFILE);
    profile.add_rating_plan("NAT", plan);
    storage.set_rating_profile(&profile).await.unwrap();
    storage.set_account(&account).await.unwrap();
    storage
}

pub async fn rater_with(plan: RatingPlan, account: UserBalance) -> (Arc<MemoryStorage>, Rater<MemoryStorage>) {
    rater_with_config(plan, account, AppConfig::default()).await
}

pub async fn rater_with_config(
    plan: RatingPlan,
    account: UserBalance,
    config: AppConfig,
) -> (Arc<MemoryStorage>, Rater<MemoryStorage>) {
    let storage = storage_with(plan, account).await;
    let rater = Rater::new(storage.clone(), config);
    (storage, rater)
}

pub async fn load(storage: &MemoryStorage) -> UserBalance {
    storage.get_account(ACCOUNT).await.unwrap().unwrap()
}
