use crate::domain::money::apply_bps;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    /// `value` is basis points of the order amount.
    Percentage,
    /// `value` is minor units.
    Fixed,
}

impl DiscountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountKind::Percentage => "percentage",
            DiscountKind::Fixed => "fixed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "fixed" => DiscountKind::Fixed,
            _ => DiscountKind::Percentage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coupon {
    pub id: Uuid,
    pub code: String,
    pub kind: DiscountKind,
    pub value: i64,
    pub max_discount_minor: Option<i64>,
    pub min_order_minor: Option<i64>,
    pub max_uses: Option<i32>,
    pub uses_count: i32,
    pub max_uses_per_user: Option<i32>,
    pub active: bool,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl Coupon {
    /// Discount this coupon grants on `order_minor` at `now`; zero when the
    /// coupon does not apply. Never exceeds the order amount.
    pub fn discount_for(&self, order_minor: i64, now: DateTime<Utc>) -> i64 {
        if !self.active {
            return 0;
        }
        if self.valid_from.is_some_and(|from| now < from) || self.valid_until.is_some_and(|until| now > until) {
            return 0;
        }
        if self.max_uses.is_some_and(|max| self.uses_count >= max) {
            return 0;
        }
        if self.min_order_minor.is_some_and(|min| order_minor < min) {
            return 0;
        }

        let raw = match self.kind {
            DiscountKind::Percentage => apply_bps(order_minor, self.value.clamp(0, 10_000) as u32),
            DiscountKind::Fixed => self.value,
        };
        let capped = match self.max_discount_minor {
            Some(cap) => raw.min(cap),
            None => raw,
        };
        capped.clamp(0, order_minor)
    }

    pub fn allows_user(&self, prior_usages: i64) -> bool {
        match self.max_uses_per_user {
            Some(cap) => prior_usages < cap as i64,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CouponUsage {
    pub id: Uuid,
    pub coupon_id: Uuid,
    pub user_id: String,
    pub enrollment_id: Uuid,
    pub discount_amount_minor: i64,
    pub created_at: DateTime<Utc>,
}
