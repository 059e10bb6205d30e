use crate::domain::coupon::{Coupon, CouponUsage};
use crate::domain::enrollment::{Enrollment, RevenueSplit};
use crate::domain::payment::{Payment, PaymentTransaction};
use crate::repo::store::{Store, StoreTx};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    pub enrollments: HashMap<Uuid, Enrollment>,
    pub payments: Vec<Payment>,
    pub revenue_splits: HashMap<Uuid, RevenueSplit>,
    pub coupons: HashMap<Uuid, Coupon>,
    pub coupon_usages: Vec<CouponUsage>,
    pub transactions: Vec<PaymentTransaction>,
}

/// Store kept in process memory, single writer. A transaction holds the
/// writer lock for its whole life and works on a copy that replaces the
/// state on commit, so transactions are serialized and a rollback leaves
/// nothing behind. Reads and audit appends only take the state lock for the
/// duration of the access and never wait on an open transaction.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    writer: Arc<Mutex<()>>,
    fail_audit_log: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn snapshot(&self) -> MemoryState {
        self.state.lock().await.clone()
    }

    pub async fn insert_coupon(&self, coupon: Coupon) {
        let _writer = self.writer.lock().await;
        self.state.lock().await.coupons.insert(coupon.id, coupon);
    }

    /// Makes `log_transaction` fail, to exercise best-effort audit paths.
    pub fn fail_audit_log(&self, fail: bool) {
        self.fail_audit_log.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let writer = self.writer.clone().lock_owned().await;
        let working = self.state.lock().await.clone();
        Ok(Box::new(MemoryTx {
            _writer: writer,
            state: Arc::clone(&self.state),
            working,
        }))
    }

    async fn find_enrollment(&self, id: Uuid) -> Result<Option<Enrollment>> {
        Ok(self.state.lock().await.enrollments.get(&id).cloned())
    }

    async fn find_enrollment_by_gateway_payment_id(
        &self,
        provider: &str,
        gateway_payment_id: &str,
    ) -> Result<Option<Enrollment>> {
        Ok(self
            .state
            .lock()
            .await
            .enrollments
            .values()
            .filter(|e| e.provider == provider && e.gateway_payment_id.as_deref() == Some(gateway_payment_id))
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn find_payment(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.state.lock().await.payments.iter().find(|p| p.id == id).cloned())
    }

    async fn find_payment_by_provider_id(&self, provider: &str, provider_payment_id: &str) -> Result<Option<Payment>> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .iter()
            .find(|p| p.provider == provider && p.provider_payment_id == provider_payment_id)
            .cloned())
    }

    async fn latest_payment_for_enrollment(&self, enrollment_id: Uuid) -> Result<Option<Payment>> {
        Ok(self
            .state
            .lock()
            .await
            .payments
            .iter()
            .filter(|p| p.enrollment_id == enrollment_id)
            .max_by_key(|p| p.created_at)
            .cloned())
    }

    async fn list_open_payments(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut open: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| p.status.is_open() && p.created_at < older_than)
            .cloned()
            .collect();
        open.sort_by_key(|p| p.created_at);
        open.truncate(limit.max(0) as usize);
        Ok(open)
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        Ok(self
            .state
            .lock()
            .await
            .coupons
            .values()
            .find(|c| c.code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn count_coupon_usages(&self, coupon_id: Uuid, user_id: &str) -> Result<i64> {
        Ok(self
            .state
            .lock()
            .await
            .coupon_usages
            .iter()
            .filter(|u| u.coupon_id == coupon_id && u.user_id == user_id)
            .count() as i64)
    }

    async fn find_revenue_split(&self, enrollment_id: Uuid) -> Result<Option<RevenueSplit>> {
        Ok(self.state.lock().await.revenue_splits.get(&enrollment_id).cloned())
    }

    async fn log_transaction(&self, entry: &PaymentTransaction) -> Result<()> {
        if self.fail_audit_log.load(Ordering::SeqCst) {
            return Err(anyhow!("audit log unavailable"));
        }
        self.state.lock().await.transactions.push(entry.clone());
        Ok(())
    }
}

pub struct MemoryTx {
    _writer: OwnedMutexGuard<()>,
    state: Arc<Mutex<MemoryState>>,
    working: MemoryState,
}

#[async_trait::async_trait]
impl StoreTx for MemoryTx {
    async fn find_payment_for_update(&mut self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.working.payments.iter().find(|p| p.id == id).cloned())
    }

    async fn find_enrollment_for_update(&mut self, id: Uuid) -> Result<Option<Enrollment>> {
        Ok(self.working.enrollments.get(&id).cloned())
    }

    async fn find_coupon_for_update(&mut self, id: Uuid) -> Result<Option<Coupon>> {
        Ok(self.working.coupons.get(&id).cloned())
    }

    async fn count_coupon_usages(&mut self, coupon_id: Uuid, user_id: &str) -> Result<i64> {
        Ok(self
            .working
            .coupon_usages
            .iter()
            .filter(|u| u.coupon_id == coupon_id && u.user_id == user_id)
            .count() as i64)
    }

    async fn insert_enrollment(&mut self, enrollment: &Enrollment) -> Result<()> {
        if self.working.enrollments.contains_key(&enrollment.id) {
            return Err(anyhow!("duplicate enrollment {}", enrollment.id));
        }
        self.working.enrollments.insert(enrollment.id, enrollment.clone());
        Ok(())
    }

    async fn update_enrollment(&mut self, enrollment: &Enrollment) -> Result<()> {
        match self.working.enrollments.get_mut(&enrollment.id) {
            Some(existing) => {
                *existing = enrollment.clone();
                Ok(())
            }
            None => Err(anyhow!("enrollment {} not found", enrollment.id)),
        }
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<()> {
        let duplicate = self
            .working
            .payments
            .iter()
            .any(|p| p.provider == payment.provider && p.provider_payment_id == payment.provider_payment_id);
        if duplicate {
            return Err(anyhow!(
                "duplicate payment {}/{}",
                payment.provider,
                payment.provider_payment_id
            ));
        }
        self.working.payments.push(payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<()> {
        match self.working.payments.iter_mut().find(|p| p.id == payment.id) {
            Some(existing) => {
                *existing = payment.clone();
                Ok(())
            }
            None => Err(anyhow!("payment {} not found", payment.id)),
        }
    }

    async fn find_revenue_split(&mut self, enrollment_id: Uuid) -> Result<Option<RevenueSplit>> {
        Ok(self.working.revenue_splits.get(&enrollment_id).cloned())
    }

    async fn insert_revenue_split(&mut self, split: &RevenueSplit) -> Result<bool> {
        if self.working.revenue_splits.contains_key(&split.enrollment_id) {
            return Ok(false);
        }
        self.working.revenue_splits.insert(split.enrollment_id, split.clone());
        Ok(true)
    }

    async fn insert_coupon_usage(&mut self, usage: &CouponUsage) -> Result<()> {
        self.working.coupon_usages.push(usage.clone());
        Ok(())
    }

    async fn increment_coupon_uses(&mut self, coupon_id: Uuid) -> Result<()> {
        match self.working.coupons.get_mut(&coupon_id) {
            Some(c) => {
                c.uses_count += 1;
                Ok(())
            }
            None => Err(anyhow!("coupon {} not found", coupon_id)),
        }
    }

    /// Audit rows appended while the transaction was open are kept.
    async fn commit(self: Box<Self>) -> Result<()> {
        let MemoryTx {
            _writer,
            state,
            mut working,
        } = *self;
        let mut current = state.lock().await;
        working.transactions = std::mem::take(&mut current.transactions);
        *current = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::TransactionSource;
    use std::time::Duration;

    #[tokio::test]
    async fn reads_do_not_wait_on_an_open_transaction() {
        let store = MemoryStore::new();
        let tx = store.begin().await.unwrap();

        let read = tokio::time::timeout(Duration::from_millis(200), store.find_payment(Uuid::new_v4())).await;
        assert!(matches!(read, Ok(Ok(None))));

        let entry = PaymentTransaction::new("mock", TransactionSource::Api, "created");
        let logged = tokio::time::timeout(Duration::from_millis(200), store.log_transaction(&entry)).await;
        assert!(matches!(logged, Ok(Ok(()))));

        tx.commit().await.unwrap();
        assert_eq!(store.snapshot().await.transactions.len(), 1);
    }

    #[tokio::test]
    async fn second_writer_waits_for_the_first() {
        let store = MemoryStore::new();
        let first = store.begin().await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(50), store.begin()).await;
        assert!(blocked.is_err());

        first.rollback().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(200), store.begin()).await;
        assert!(second.is_ok());
    }
}
