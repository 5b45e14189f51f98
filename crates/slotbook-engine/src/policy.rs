//! Money and time-window arithmetic attached to lifecycle transitions.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};

/// Snapshot of the platform's cut taken when a booking is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Commission {
    pub platform_fee: Decimal,
    pub provider_earnings: Decimal,
}

impl Commission {
    /// Fee rounded to cents, midpoint away from zero; earnings take the remainder
    /// so the two always sum to `price`.
    pub fn split(price: Decimal, rate: Decimal) -> Self {
        let platform_fee =
            (price * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Self {
            platform_fee,
            provider_earnings: price - platform_fee,
        }
    }
}

/// Fractional hours from `now` until `starts_at`; negative once started.
pub fn hours_until(now: DateTime<Utc>, starts_at: DateTime<Utc>) -> f64 {
    (starts_at - now).num_seconds() as f64 / 3600.0
}

/// Share of the amount returned on cancellation: all of it more than a day out,
/// 75% more than two hours out, half otherwise.
pub fn refund_fraction(hours_until_booking: f64) -> Decimal {
    if hours_until_booking > 24.0 {
        Decimal::ONE
    } else if hours_until_booking > 2.0 {
        Decimal::new(75, 2)
    } else {
        Decimal::new(50, 2)
    }
}

pub fn refund_amount(hours_until_booking: f64, amount: Decimal) -> Decimal {
    (amount * refund_fraction(hours_until_booking))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
