//! Money arithmetic in minor units (cents).
//!
//! Every step that produces a monetary amount rounds to the cent, half away
//! from zero. Rates are basis points: `99` bps is 0.99 %, `7000` bps is 70 %.

use crate::domain::canonical::BillingType;
use serde::{Deserialize, Serialize};

pub const BPS_SCALE: i64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("negative gateway fee {fee} for amount {amount}")]
    NegativeFee { amount: i64, fee: i64 },
    #[error("gateway fee {fee} exceeds charged amount {gross}")]
    NegativeNet { gross: i64, fee: i64 },
    #[error("split {instructor}+{platform} does not fit net amount {net}")]
    SplitExceedsNet { net: i64, instructor: i64, platform: i64 },
    #[error("revenue shares must sum to 10000 bps, got {0}")]
    InvalidShare(u32),
}

/// `numer / denom` rounded half away from zero.
pub fn round_div(numer: i64, denom: i64) -> i64 {
    let n = numer as i128;
    let d = denom as i128;
    let q = (n.abs() * 2 + d.abs()) / (d.abs() * 2);
    let negative = (n < 0) != (d < 0);
    (if negative { -q } else { q }) as i64
}

pub fn apply_bps(amount_minor: i64, bps: u32) -> i64 {
    round_div(amount_minor * bps as i64, BPS_SCALE)
}

/// Provider amounts travel as decimal reais on the wire.
pub fn to_major(amount_minor: i64) -> f64 {
    amount_minor as f64 / 100.0
}

pub fn from_major(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct GatewayFees {
    pub pix_percent_bps: u32,
    pub boleto_fixed_minor: i64,
    pub card_percent_bps: u32,
    pub card_fixed_minor: i64,
}

impl GatewayFees {
    pub fn fee_for(&self, billing_type: BillingType, amount_minor: i64) -> Result<i64, MoneyError> {
        let fee = match billing_type {
            BillingType::Pix => apply_bps(amount_minor, self.pix_percent_bps),
            BillingType::Boleto => self.boleto_fixed_minor,
            BillingType::Card => apply_bps(amount_minor, self.card_percent_bps) + self.card_fixed_minor,
        };
        if fee < 0 {
            return Err(MoneyError::NegativeFee {
                amount: amount_minor,
                fee,
            });
        }
        Ok(fee)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevenueShare {
    pub instructor_bps: u32,
    pub platform_bps: u32,
}

impl RevenueShare {
    pub fn new(instructor_bps: u32, platform_bps: u32) -> Result<Self, MoneyError> {
        let total = instructor_bps + platform_bps;
        if total as i64 != BPS_SCALE {
            return Err(MoneyError::InvalidShare(total));
        }
        Ok(Self {
            instructor_bps,
            platform_bps,
        })
    }
}

impl Default for RevenueShare {
    fn default() -> Self {
        Self {
            instructor_bps: 7000,
            platform_bps: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SplitBreakdown {
    pub gross_amount_minor: i64,
    pub gateway_fee_minor: i64,
    pub net_amount_minor: i64,
    pub instructor_bps: u32,
    pub platform_bps: u32,
    pub instructor_amount_minor: i64,
    pub platform_amount_minor: i64,
}

/// Splits what the customer was charged between instructor and platform
/// after the gateway fee.
///
/// The two shares are rounded independently, so their sum may differ from
/// the net amount by one cent (e.g. 198.02 at 70/30 gives 138.61 + 59.41).
/// Anything beyond that slack is a logic error.
pub fn compute_split(
    gross_amount_minor: i64,
    billing_type: BillingType,
    fees: &GatewayFees,
    share: RevenueShare,
) -> Result<SplitBreakdown, MoneyError> {
    let fee = fees.fee_for(billing_type, gross_amount_minor)?;
    let net = gross_amount_minor - fee;
    if net < 0 {
        return Err(MoneyError::NegativeNet {
            gross: gross_amount_minor,
            fee,
        });
    }

    let instructor = apply_bps(net, share.instructor_bps);
    let platform = apply_bps(net, share.platform_bps);
    if instructor < 0 || platform < 0 || instructor + platform > net + 1 {
        return Err(MoneyError::SplitExceedsNet {
            net,
            instructor,
            platform,
        });
    }

    Ok(SplitBreakdown {
        gross_amount_minor,
        gateway_fee_minor: fee,
        net_amount_minor: net,
        instructor_bps: share.instructor_bps,
        platform_bps: share.platform_bps,
        instructor_amount_minor: instructor,
        platform_amount_minor: platform,
    })
}
