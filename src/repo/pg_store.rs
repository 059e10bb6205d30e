use crate::domain::canonical::{BillingType, EnrollmentStatus, PaymentStatus};
use crate::domain::coupon::{Coupon, CouponUsage, DiscountKind};
use crate::domain::enrollment::{Enrollment, RevenueSplit};
use crate::domain::payment::{Payment, PaymentTransaction};
use crate::repo::store::{Store, StoreTx};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

const ENROLLMENT_COLUMNS: &str = "id, student_id, student_name, student_email, course_id, course_title, instructor_id, status, payment_status, gross_amount_minor, discount_amount_minor, final_amount_minor, coupon_id, provider, gateway_payment_id, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, enrollment_id, provider, provider_payment_id, billing_type, status, gross_amount_minor, discount_amount_minor, amount_minor, gateway_fee_minor, net_amount_minor, refunded_amount_minor, due_date, paid_at, created_at, updated_at";

const COUPON_COLUMNS: &str = "id, code, discount_type, discount_value, max_discount_minor, min_order_minor, max_uses, uses_count, max_uses_per_user, active, valid_from, valid_until";

const SPLIT_COLUMNS: &str = "id, enrollment_id, payment_id, instructor_id, gross_amount_minor, gateway_fee_minor, net_amount_minor, instructor_bps, platform_bps, instructor_amount_minor, platform_amount_minor, created_at";

#[derive(Clone)]
pub struct PgStore {
    pub pool: PgPool,
}

fn enrollment_from_row(r: &PgRow) -> Enrollment {
    Enrollment {
        id: r.get("id"),
        student_id: r.get("student_id"),
        student_name: r.get("student_name"),
        student_email: r.get("student_email"),
        course_id: r.get("course_id"),
        course_title: r.get("course_title"),
        instructor_id: r.get("instructor_id"),
        status: EnrollmentStatus::parse(r.get("status")),
        payment_status: PaymentStatus::parse(r.get("payment_status")),
        gross_amount_minor: r.get("gross_amount_minor"),
        discount_amount_minor: r.get("discount_amount_minor"),
        final_amount_minor: r.get("final_amount_minor"),
        coupon_id: r.get("coupon_id"),
        provider: r.get("provider"),
        gateway_payment_id: r.get("gateway_payment_id"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

fn payment_from_row(r: &PgRow) -> Payment {
    let billing: String = r.get("billing_type");
    Payment {
        id: r.get("id"),
        enrollment_id: r.get("enrollment_id"),
        provider: r.get("provider"),
        provider_payment_id: r.get("provider_payment_id"),
        billing_type: BillingType::parse(&billing).unwrap_or(BillingType::Pix),
        status: PaymentStatus::parse(r.get("status")),
        gross_amount_minor: r.get("gross_amount_minor"),
        discount_amount_minor: r.get("discount_amount_minor"),
        amount_minor: r.get("amount_minor"),
        gateway_fee_minor: r.get("gateway_fee_minor"),
        net_amount_minor: r.get("net_amount_minor"),
        refunded_amount_minor: r.get("refunded_amount_minor"),
        due_date: r.get("due_date"),
        paid_at: r.get("paid_at"),
        created_at: r.get("created_at"),
        updated_at: r.get("updated_at"),
    }
}

fn split_from_row(r: &PgRow) -> RevenueSplit {
    let instructor_bps: i32 = r.get("instructor_bps");
    let platform_bps: i32 = r.get("platform_bps");
    RevenueSplit {
        id: r.get("id"),
        enrollment_id: r.get("enrollment_id"),
        payment_id: r.get("payment_id"),
        instructor_id: r.get("instructor_id"),
        gross_amount_minor: r.get("gross_amount_minor"),
        gateway_fee_minor: r.get("gateway_fee_minor"),
        net_amount_minor: r.get("net_amount_minor"),
        instructor_bps: instructor_bps as u32,
        platform_bps: platform_bps as u32,
        instructor_amount_minor: r.get("instructor_amount_minor"),
        platform_amount_minor: r.get("platform_amount_minor"),
        created_at: r.get("created_at"),
    }
}

fn coupon_from_row(r: &PgRow) -> Coupon {
    Coupon {
        id: r.get("id"),
        code: r.get("code"),
        kind: DiscountKind::parse(r.get("discount_type")),
        value: r.get("discount_value"),
        max_discount_minor: r.get("max_discount_minor"),
        min_order_minor: r.get("min_order_minor"),
        max_uses: r.get("max_uses"),
        uses_count: r.get("uses_count"),
        max_uses_per_user: r.get("max_uses_per_user"),
        active: r.get("active"),
        valid_from: r.get("valid_from"),
        valid_until: r.get("valid_until"),
    }
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn find_enrollment(&self, id: Uuid) -> Result<Option<Enrollment>> {
        let row = sqlx::query(&format!("SELECT {} FROM enrollments WHERE id = $1", ENROLLMENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(enrollment_from_row))
    }

    async fn find_enrollment_by_gateway_payment_id(
        &self,
        provider: &str,
        gateway_payment_id: &str,
    ) -> Result<Option<Enrollment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM enrollments WHERE provider = $1 AND gateway_payment_id = $2 ORDER BY created_at DESC LIMIT 1",
            ENROLLMENT_COLUMNS
        ))
        .bind(provider)
        .bind(gateway_payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(enrollment_from_row))
    }

    async fn find_payment(&self, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(payment_from_row))
    }

    async fn find_payment_by_provider_id(&self, provider: &str, provider_payment_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE provider = $1 AND provider_payment_id = $2",
            PAYMENT_COLUMNS
        ))
        .bind(provider)
        .bind(provider_payment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(payment_from_row))
    }

    async fn latest_payment_for_enrollment(&self, enrollment_id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM payments WHERE enrollment_id = $1 ORDER BY created_at DESC LIMIT 1",
            PAYMENT_COLUMNS
        ))
        .bind(enrollment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(payment_from_row))
    }

    async fn list_open_payments(&self, older_than: DateTime<Utc>, limit: i64) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM payments
            WHERE status IN ('pending', 'overdue') AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(payment_from_row).collect())
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>> {
        let row = sqlx::query(&format!("SELECT {} FROM coupons WHERE lower(code) = lower($1)", COUPON_COLUMNS))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(coupon_from_row))
    }

    async fn count_coupon_usages(&self, coupon_id: Uuid, user_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM coupon_usages WHERE coupon_id = $1 AND user_id = $2")
            .bind(coupon_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    async fn find_revenue_split(&self, enrollment_id: Uuid) -> Result<Option<RevenueSplit>> {
        let row = sqlx::query(&format!("SELECT {} FROM revenue_splits WHERE enrollment_id = $1", SPLIT_COLUMNS))
            .bind(enrollment_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(split_from_row))
    }

    async fn log_transaction(&self, entry: &PaymentTransaction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_transactions (
                id, payment_id, enrollment_id, provider, source, event_type,
                previous_status, new_status, raw_payload, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.payment_id)
        .bind(entry.enrollment_id)
        .bind(&entry.provider)
        .bind(entry.source.as_str())
        .bind(&entry.event_type)
        .bind(entry.previous_status.map(|s| s.as_str()))
        .bind(entry.new_status.map(|s| s.as_str()))
        .bind(entry.raw_payload.clone())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait::async_trait]
impl StoreTx for PgTx {
    async fn find_payment_for_update(&mut self, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!("SELECT {} FROM payments WHERE id = $1 FOR UPDATE", PAYMENT_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.as_ref().map(payment_from_row))
    }

    async fn find_enrollment_for_update(&mut self, id: Uuid) -> Result<Option<Enrollment>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM enrollments WHERE id = $1 FOR UPDATE",
            ENROLLMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.as_ref().map(enrollment_from_row))
    }

    async fn find_coupon_for_update(&mut self, id: Uuid) -> Result<Option<Coupon>> {
        let row = sqlx::query(&format!("SELECT {} FROM coupons WHERE id = $1 FOR UPDATE", COUPON_COLUMNS))
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.as_ref().map(coupon_from_row))
    }

    async fn count_coupon_usages(&mut self, coupon_id: Uuid, user_id: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM coupon_usages WHERE coupon_id = $1 AND user_id = $2")
            .bind(coupon_id)
            .bind(user_id)
            .fetch_one(&mut *self.tx)
            .await?;
        Ok(row.get("n"))
    }

    async fn insert_enrollment(&mut self, e: &Enrollment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO enrollments (
                id, student_id, student_name, student_email, course_id, course_title, instructor_id,
                status, payment_status, gross_amount_minor, discount_amount_minor, final_amount_minor,
                coupon_id, provider, gateway_payment_id, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7,
                $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17
            )
            "#,
        )
        .bind(e.id)
        .bind(&e.student_id)
        .bind(&e.student_name)
        .bind(&e.student_email)
        .bind(&e.course_id)
        .bind(&e.course_title)
        .bind(&e.instructor_id)
        .bind(e.status.as_str())
        .bind(e.payment_status.as_str())
        .bind(e.gross_amount_minor)
        .bind(e.discount_amount_minor)
        .bind(e.final_amount_minor)
        .bind(e.coupon_id)
        .bind(&e.provider)
        .bind(&e.gateway_payment_id)
        .bind(e.created_at)
        .bind(e.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_enrollment(&mut self, e: &Enrollment) -> Result<()> {
        let result = sqlx::query(
            "UPDATE enrollments SET status = $2, payment_status = $3, gateway_payment_id = $4, updated_at = $5 WHERE id = $1",
        )
        .bind(e.id)
        .bind(e.status.as_str())
        .bind(e.payment_status.as_str())
        .bind(&e.gateway_payment_id)
        .bind(e.updated_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("enrollment {} not found", e.id));
        }
        Ok(())
    }

    async fn insert_payment(&mut self, p: &Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (
                id, enrollment_id, provider, provider_payment_id, billing_type, status,
                gross_amount_minor, discount_amount_minor, amount_minor, gateway_fee_minor, net_amount_minor,
                refunded_amount_minor, due_date, paid_at, created_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6,
                $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16
            )
            "#,
        )
        .bind(p.id)
        .bind(p.enrollment_id)
        .bind(&p.provider)
        .bind(&p.provider_payment_id)
        .bind(p.billing_type.as_str())
        .bind(p.status.as_str())
        .bind(p.gross_amount_minor)
        .bind(p.discount_amount_minor)
        .bind(p.amount_minor)
        .bind(p.gateway_fee_minor)
        .bind(p.net_amount_minor)
        .bind(p.refunded_amount_minor)
        .bind(p.due_date)
        .bind(p.paid_at)
        .bind(p.created_at)
        .bind(p.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn update_payment(&mut self, p: &Payment) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2, net_amount_minor = $3, refunded_amount_minor = $4, paid_at = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(p.id)
        .bind(p.status.as_str())
        .bind(p.net_amount_minor)
        .bind(p.refunded_amount_minor)
        .bind(p.paid_at)
        .bind(p.updated_at)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(anyhow!("payment {} not found", p.id));
        }
        Ok(())
    }

    async fn find_revenue_split(&mut self, enrollment_id: Uuid) -> Result<Option<RevenueSplit>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM revenue_splits WHERE enrollment_id = $1 FOR UPDATE",
            SPLIT_COLUMNS
        ))
        .bind(enrollment_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.as_ref().map(split_from_row))
    }

    async fn insert_revenue_split(&mut self, s: &RevenueSplit) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO revenue_splits (
                id, enrollment_id, payment_id, instructor_id, gross_amount_minor, gateway_fee_minor,
                net_amount_minor, instructor_bps, platform_bps, instructor_amount_minor,
                platform_amount_minor, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (enrollment_id) DO NOTHING
            "#,
        )
        .bind(s.id)
        .bind(s.enrollment_id)
        .bind(s.payment_id)
        .bind(&s.instructor_id)
        .bind(s.gross_amount_minor)
        .bind(s.gateway_fee_minor)
        .bind(s.net_amount_minor)
        .bind(s.instructor_bps as i32)
        .bind(s.platform_bps as i32)
        .bind(s.instructor_amount_minor)
        .bind(s.platform_amount_minor)
        .bind(s.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_coupon_usage(&mut self, u: &CouponUsage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO coupon_usages (id, coupon_id, user_id, enrollment_id, discount_amount_minor, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(u.id)
        .bind(u.coupon_id)
        .bind(&u.user_id)
        .bind(u.enrollment_id)
        .bind(u.discount_amount_minor)
        .bind(u.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn increment_coupon_uses(&mut self, coupon_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE coupons SET uses_count = uses_count + 1, updated_at = now() WHERE id = $1")
            .bind(coupon_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
