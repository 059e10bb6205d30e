use crate::domain::coupon::{Coupon, CouponUsage};
use crate::domain::enrollment::{Enrollment, RevenueSplit};
use crate::domain::payment::{Payment, PaymentTransaction};
use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Reads and the append-only audit log run against the store directly;
/// multi-row writes go through a [`StoreTx`].
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>>;

    async fn find_enrollment(&self, id: Uuid) -> Result<Option<Enrollment>>;

    /// Enrollment created by `provider` whose legacy charge field holds
    /// `gateway_payment_id`.
    async fn find_enrollment_by_gateway_payment_id(
        &self,
        provider: &str,
        gateway_payment_id: &str,
    ) -> Result<Option<Enrollment>>;

    async fn find_payment(&self, id: Uuid) -> Result<Option<Payment>>;

    async fn find_payment_by_provider_id(&self, provider: &str, provider_payment_id: &str) -> Result<Option<Payment>>;

    async fn latest_payment_for_enrollment(&self, enrollment_id: Uuid) -> Result<Option<Payment>>;

    /// Open (pending/overdue) payments created before `older_than`, oldest
    /// first.
    async fn list_open_payments(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<Payment>>;

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>>;

    async fn count_coupon_usages(&self, coupon_id: Uuid, user_id: &str) -> Result<i64>;

    async fn find_revenue_split(&self, enrollment_id: Uuid) -> Result<Option<RevenueSplit>>;

    async fn log_transaction(&self, entry: &PaymentTransaction) -> Result<()>;
}

/// One unit of work. Dropping it without `commit` discards every write.
/// The `*_for_update` reads lock the row until the transaction ends.
#[async_trait::async_trait]
pub trait StoreTx: Send {
    async fn find_payment_for_update(&mut self, id: Uuid) -> Result<Option<Payment>>;

    async fn find_enrollment_for_update(&mut self, id: Uuid) -> Result<Option<Enrollment>>;

    async fn find_coupon_for_update(&mut self, id: Uuid) -> Result<Option<Coupon>>;

    async fn count_coupon_usages(&mut self, coupon_id: Uuid, user_id: &str) -> Result<i64>;

    async fn insert_enrollment(&mut self, enrollment: &Enrollment) -> Result<()>;

    async fn update_enrollment(&mut self, enrollment: &Enrollment) -> Result<()>;

    async fn insert_payment(&mut self, payment: &Payment) -> Result<()>;

    async fn update_payment(&mut self, payment: &Payment) -> Result<()>;

    async fn find_revenue_split(&mut self, enrollment_id: Uuid) -> Result<Option<RevenueSplit>>;

    /// Returns false when the enrollment already has a split.
    async fn insert_revenue_split(&mut self, split: &RevenueSplit) -> Result<bool>;

    async fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> Result<()>;

    async fn increment_coupon_uses(&mut self, coupon_id: Uuid) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
