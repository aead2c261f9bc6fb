//! Fee computation
//!
//! Merchant commission rates come from the catalog service as decimal
//! fractions (e.g. `0.05` for 5%); balances are integer minor units. The
//! conversion happens here, in one place, with banker's-rounding-free
//! half-up semantics so a displayed rate always matches the charged fee.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::types::{Fees, MinorUnits};

/// Fee policy applied to payments
///
/// `platform_surcharge` is an additional platform-side rate on top of the
/// merchant commission; both components are credited to the platform fee
/// account and both reduce the merchant's net credit.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeSchedule {
    /// Default merchant commission rate, used when the caller has no
    /// catalog-supplied rate
    pub default_commission_rate: Decimal,

    /// Platform surcharge rate; zero by default
    pub platform_surcharge: Decimal,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        FeeSchedule {
            default_commission_rate: Decimal::new(5, 2), // 5%
            platform_surcharge: Decimal::ZERO,
        }
    }
}

impl FeeSchedule {
    /// Commission in minor units for `amount` at `rate`
    ///
    /// Rounds half-up to the nearest minor unit and never returns more than
    /// `amount`.
    pub fn commission(amount: MinorUnits, rate: Decimal) -> MinorUnits {
        let fee = (Decimal::from(amount) * rate)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        fee.to_i64().unwrap_or(0).clamp(0, amount)
    }

    /// Commission at the schedule's default rate
    pub fn default_commission(&self, amount: MinorUnits) -> MinorUnits {
        Self::commission(amount, self.default_commission_rate)
    }

    /// Full fee breakdown for a payment of `amount` with merchant commission
    /// `merchant_fee`
    pub fn breakdown(&self, amount: MinorUnits, merchant_fee: MinorUnits) -> Fees {
        let platform_fee = Self::commission(amount, self.platform_surcharge);
        Fees {
            merchant_fee,
            platform_fee,
            total: merchant_fee + platform_fee,
        }
    }
}
