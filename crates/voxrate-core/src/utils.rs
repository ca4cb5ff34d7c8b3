//! Rounding and duration helpers

use chrono::Duration;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::models::RoundingMethod;

/// Round a money amount to `decimals` places using `method`
pub fn round(amount: Decimal, decimals: u32, method: RoundingMethod) -> Decimal {
    let strategy = match method {
        RoundingMethod::Up => RoundingStrategy::AwayFromZero,
        RoundingMethod::Middle => RoundingStrategy::MidpointAwayFromZero,
        RoundingMethod::Down => RoundingStrategy::ToZero,
    };
    amount.round_dp_with_strategy(decimals, strategy).normalize()
}

/// Round `amount` up to the next whole multiple of `whole`
///
/// A zero or negative `whole` leaves the amount untouched.
pub fn round_to(whole: Duration, amount: Duration) -> Duration {
    let whole_ms = whole.num_milliseconds();
    if whole_ms <= 0 {
        return amount;
    }
    let amount_ms = amount.num_milliseconds();
    let rest = amount_ms % whole_ms;
    if rest == 0 {
        return amount;
    }
    Duration::milliseconds(amount_ms - rest + whole_ms)
}

/// Duration as fractional seconds
pub fn seconds(duration: Duration) -> Decimal {
    Decimal::new(duration.num_milliseconds(), 3).normalize()
}

/// Duration from fractional seconds, truncated to milliseconds
pub fn from_seconds(seconds: Decimal) -> Duration {
    let millis = (seconds * Decimal::ONE_THOUSAND).trunc();
    Duration::milliseconds(i64::try_from(millis).unwrap_or(i64::MAX))
}

/// Serde helpers storing a `chrono::Duration` as integer milliseconds
pub mod duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_milliseconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(millis))
    }
}
