use crate::domain::canonical::{BillingType, EnrollmentStatus, PaymentStatus};
use crate::domain::checkout::{CheckoutRequest, CheckoutResponse, CheckoutStatusResponse};
use crate::domain::coupon::{Coupon, CouponUsage};
use crate::domain::enrollment::Enrollment;
use crate::domain::money::{compute_split, GatewayFees, RevenueShare, SplitBreakdown};
use crate::domain::payment::{Payment, PaymentTransaction, TransactionSource};
use crate::error::AppError;
use crate::gateways::registry::GatewayRegistry;
use crate::gateways::{
    create_charge, validate_card, CanonicalPaymentResponse, ChargeRequest, CustomerInput, PaymentGateway,
};
use crate::repo::store::{Store, StoreTx};
use chrono::{Duration, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Days between checkout and the charge due date.
pub const DUE_IN_DAYS: i64 = 3;

#[derive(Clone)]
pub struct CheckoutService {
    pub store: Arc<dyn Store>,
    pub registry: Arc<GatewayRegistry>,
    pub share: RevenueShare,
}

/// Discount a coupon grants for one student's order.
#[derive(Debug, Clone)]
pub struct AppliedCoupon {
    pub coupon: Coupon,
    pub discount_minor: i64,
}

struct Recorded {
    enrollment: Enrollment,
    payment: Payment,
    charge: CanonicalPaymentResponse,
}

fn validate_request(req: &CheckoutRequest) -> Result<BillingType, AppError> {
    let billing_type = BillingType::parse(&req.payment_method.to_lowercase()).ok_or_else(|| {
        AppError::Validation(format!(
            "payment_method must be one of pix, boleto, card (got '{}')",
            req.payment_method
        ))
    })?;
    if billing_type == BillingType::Card {
        let card = req
            .card
            .as_ref()
            .ok_or_else(|| AppError::Validation("card details are required".to_string()))?;
        validate_card(card)?;
    }
    if req.amount_minor <= 0 {
        return Err(AppError::Validation("amount_minor must be > 0".to_string()));
    }
    if req.student_email.trim().is_empty() {
        return Err(AppError::Validation("student_email is required".to_string()));
    }
    if req.student_document.trim().is_empty() {
        return Err(AppError::Validation("student_document is required".to_string()));
    }
    Ok(billing_type)
}

/// Discount `coupon` grants a student with `prior_usages` on `order_minor`.
fn coupon_discount(coupon: &Coupon, prior_usages: i64, order_minor: i64) -> Result<i64, AppError> {
    if !coupon.allows_user(prior_usages) {
        return Err(AppError::Validation(format!(
            "coupon '{}' usage limit reached for this student",
            coupon.code
        )));
    }
    let discount_minor = coupon.discount_for(order_minor, Utc::now());
    if discount_minor <= 0 {
        return Err(AppError::Validation("coupon not applicable".to_string()));
    }
    Ok(discount_minor)
}

impl CheckoutService {
    /// Resolves `code` for `student_id` against an order of `order_minor`.
    pub async fn apply_coupon(
        &self,
        code: &str,
        student_id: &str,
        order_minor: i64,
    ) -> Result<AppliedCoupon, AppError> {
        let coupon = self
            .store
            .find_coupon_by_code(code)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("coupon '{}' not found", code)))?;

        let prior = self.store.count_coupon_usages(coupon.id, student_id).await?;
        let discount_minor = coupon_discount(&coupon, prior, order_minor)?;
        Ok(AppliedCoupon { coupon, discount_minor })
    }

    pub async fn create_checkout(&self, req: CheckoutRequest) -> Result<CheckoutResponse, AppError> {
        let billing_type = validate_request(&req)?;
        let gateway = self.registry.active()?;
        let fees = gateway.fees();

        let applied = match req.discount_code.as_deref().map(str::trim) {
            Some(code) if !code.is_empty() => Some(self.apply_coupon(code, &req.student_id, req.amount_minor).await?),
            _ => None,
        };
        let discount_minor = applied.as_ref().map(|a| a.discount_minor).unwrap_or(0);
        let final_minor = req.amount_minor - discount_minor;
        if final_minor <= 0 {
            return Err(AppError::Validation("final amount must be > 0".to_string()));
        }
        let fee_minor = fees.fee_for(billing_type, final_minor)?;
        if fee_minor >= final_minor {
            return Err(AppError::Validation(format!(
                "final amount {} does not cover the {} fee of {}",
                final_minor,
                billing_type.as_str(),
                fee_minor
            )));
        }
        let split_preview = compute_split(final_minor, billing_type, &fees, self.share)?;

        let mut tx = self.store.begin().await?;
        let recorded = self
            .record_checkout(
                tx.as_mut(),
                gateway.as_ref(),
                &req,
                billing_type,
                applied.as_ref(),
                final_minor,
                fee_minor,
            )
            .await;
        let recorded = match recorded {
            Ok(r) => r,
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    tracing::warn!("checkout rollback failed: {:#}", rb);
                }
                tracing::warn!(
                    provider = gateway.name(),
                    course_id = %req.course_id,
                    "checkout aborted: {}",
                    e
                );
                return Err(e);
            }
        };
        tx.commit().await?;

        let Recorded {
            enrollment,
            payment,
            charge,
        } = recorded;

        tracing::info!(
            provider = gateway.name(),
            enrollment_id = %enrollment.id,
            gateway_payment_id = %payment.provider_payment_id,
            billing_type = billing_type.as_str(),
            "checkout created"
        );

        let mut entry = PaymentTransaction::new(gateway.name(), TransactionSource::Api, "created");
        entry.payment_id = Some(payment.id);
        entry.enrollment_id = Some(enrollment.id);
        entry.new_status = Some(payment.status);
        entry.raw_payload = serde_json::to_value(&charge).ok();
        if let Err(e) = self.store.log_transaction(&entry).await {
            tracing::warn!(enrollment_id = %enrollment.id, "failed to log checkout transaction: {:#}", e);
        }

        Ok(CheckoutResponse {
            enrollment_id: enrollment.id,
            payment_id: payment.id,
            provider: payment.provider.clone(),
            gateway_payment_id: payment.provider_payment_id.clone(),
            status: payment.status,
            billing_type,
            gross_amount_minor: enrollment.gross_amount_minor,
            discount_amount_minor: enrollment.discount_amount_minor,
            final_amount_minor: enrollment.final_amount_minor,
            due_date: payment.due_date,
            invoice_url: charge.invoice_url,
            pix: charge.pix,
            boleto: charge.boleto,
            card: charge.card,
            split_preview,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_checkout(
        &self,
        tx: &mut dyn StoreTx,
        gateway: &dyn PaymentGateway,
        req: &CheckoutRequest,
        billing_type: BillingType,
        applied: Option<&AppliedCoupon>,
        final_minor: i64,
        fee_minor: i64,
    ) -> Result<Recorded, AppError> {
        if let Some(applied) = applied {
            self.reserve_coupon(tx, applied, req).await?;
        }

        let now = Utc::now();
        let customer = CustomerInput {
            name: req.student_name.clone(),
            email: req.student_email.clone(),
            document: req.student_document.clone(),
            phone: req.student_phone.clone(),
        };
        let customer_id = gateway.create_customer(&customer).await?;

        let mut enrollment = Enrollment {
            id: Uuid::new_v4(),
            student_id: req.student_id.clone(),
            student_name: req.student_name.clone(),
            student_email: req.student_email.clone(),
            course_id: req.course_id.clone(),
            course_title: req.course_title.clone(),
            instructor_id: req.instructor_id.clone(),
            status: EnrollmentStatus::Pending,
            payment_status: PaymentStatus::Pending,
            gross_amount_minor: req.amount_minor,
            discount_amount_minor: req.amount_minor - final_minor,
            final_amount_minor: final_minor,
            coupon_id: applied.map(|a| a.coupon.id),
            provider: gateway.name().to_string(),
            gateway_payment_id: None,
            created_at: now,
            updated_at: now,
        };
        tx.insert_enrollment(&enrollment).await?;

        let due_date: NaiveDate = (now + Duration::days(DUE_IN_DAYS)).date_naive();
        let charge_request = ChargeRequest {
            customer_id,
            customer,
            amount_minor: final_minor,
            description: format!("Enrollment: {}", req.course_title),
            due_date,
            external_reference: enrollment.id.to_string(),
        };
        let charge = create_charge(gateway, billing_type, &charge_request, req.card.as_ref()).await?;

        enrollment.gateway_payment_id = Some(charge.gateway_payment_id.clone());
        enrollment.updated_at = Utc::now();
        tx.update_enrollment(&enrollment).await?;

        let payment = Payment {
            id: Uuid::new_v4(),
            enrollment_id: enrollment.id,
            provider: gateway.name().to_string(),
            provider_payment_id: charge.gateway_payment_id.clone(),
            billing_type,
            status: PaymentStatus::Pending,
            gross_amount_minor: enrollment.gross_amount_minor,
            discount_amount_minor: enrollment.discount_amount_minor,
            amount_minor: final_minor,
            gateway_fee_minor: fee_minor,
            net_amount_minor: final_minor - fee_minor,
            refunded_amount_minor: None,
            due_date: charge.due_date.unwrap_or(due_date),
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        tx.insert_payment(&payment).await?;

        if let Some(applied) = applied {
            tx.insert_coupon_usage(&CouponUsage {
                id: Uuid::new_v4(),
                coupon_id: applied.coupon.id,
                user_id: req.student_id.clone(),
                enrollment_id: enrollment.id,
                discount_amount_minor: applied.discount_minor,
                created_at: now,
            })
            .await?;
            tx.increment_coupon_uses(applied.coupon.id).await?;
        }

        Ok(Recorded {
            enrollment,
            payment,
            charge,
        })
    }

    /// Re-validates the coupon with its row locked, before the provider is
    /// charged. Concurrent checkouts on the same coupon queue here.
    async fn reserve_coupon(
        &self,
        tx: &mut dyn StoreTx,
        applied: &AppliedCoupon,
        req: &CheckoutRequest,
    ) -> Result<(), AppError> {
        let coupon = tx
            .find_coupon_for_update(applied.coupon.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("coupon '{}' not found", applied.coupon.code)))?;
        let prior = tx.count_coupon_usages(coupon.id, &req.student_id).await?;
        let discount_minor = coupon_discount(&coupon, prior, req.amount_minor)?;
        if discount_minor != applied.discount_minor {
            return Err(AppError::Validation(format!(
                "coupon '{}' changed during checkout",
                coupon.code
            )));
        }
        Ok(())
    }

    /// Current state of an enrollment's charge. A live provider poll wins
    /// over the stored snapshot; a failed poll falls back to the snapshot.
    pub async fn get_checkout_status(&self, enrollment_id: Uuid) -> Result<CheckoutStatusResponse, AppError> {
        let enrollment = self
            .store
            .find_enrollment(enrollment_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("enrollment {} not found", enrollment_id)))?;
        let payment = self.store.latest_payment_for_enrollment(enrollment_id).await?;

        let provider = payment
            .as_ref()
            .map(|p| p.provider.clone())
            .unwrap_or_else(|| enrollment.provider.clone());
        let gateway_payment_id = payment
            .as_ref()
            .map(|p| p.provider_payment_id.clone())
            .or_else(|| enrollment.gateway_payment_id.clone());

        let gateway = match self.registry.get(&provider) {
            Ok(g) => Some(g),
            Err(e) => {
                tracing::warn!(enrollment_id = %enrollment_id, "status poll skipped: {}", e);
                None
            }
        };

        let mut live = None;
        if let (Some(gateway), Some(id)) = (gateway.as_ref(), gateway_payment_id.as_deref()) {
            match gateway.get_payment(id).await {
                Ok(resp) => live = Some(resp),
                Err(e) => tracing::warn!(
                    provider = %provider,
                    gateway_payment_id = id,
                    "live status poll failed, returning stored snapshot: {}",
                    e
                ),
            }
        }

        let billing_type = live
            .as_ref()
            .map(|l| l.billing_type)
            .or(payment.as_ref().map(|p| p.billing_type));
        let amount_minor = payment
            .as_ref()
            .map(|p| p.amount_minor)
            .unwrap_or(enrollment.final_amount_minor);
        let split_preview = match (gateway.as_ref(), billing_type) {
            (Some(g), Some(billing)) => self.preview(amount_minor, billing, &g.fees()),
            _ => None,
        };

        let payment_status = live
            .as_ref()
            .map(|l| l.status)
            .or(payment.as_ref().map(|p| p.status))
            .unwrap_or(enrollment.payment_status);

        Ok(CheckoutStatusResponse {
            enrollment_id,
            enrollment_status: enrollment.status,
            payment_status,
            provider,
            payment_id: payment.as_ref().map(|p| p.id),
            gateway_payment_id,
            live: live.is_some(),
            billing_type,
            final_amount_minor: enrollment.final_amount_minor,
            due_date: live.as_ref().and_then(|l| l.due_date).or(payment.as_ref().map(|p| p.due_date)),
            invoice_url: live.as_ref().and_then(|l| l.invoice_url.clone()),
            pix: live.as_ref().and_then(|l| l.pix.clone()),
            boleto: live.as_ref().and_then(|l| l.boleto.clone()),
            card: live.and_then(|l| l.card),
            split_preview,
        })
    }

    fn preview(&self, amount_minor: i64, billing_type: BillingType, fees: &GatewayFees) -> Option<SplitBreakdown> {
        match compute_split(amount_minor, billing_type, fees, self.share) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!("split preview unavailable: {}", e);
                None
            }
        }
    }
}
