use crate::domain::canonical::{EnrollmentStatus, PaymentStatus};
use crate::domain::money::SplitBreakdown;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A student's purchase of a course. Never deleted, only cancelled.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enrollment {
    pub id: Uuid,
    pub student_id: String,
    pub student_name: String,
    pub student_email: String,
    pub course_id: String,
    pub course_title: String,
    pub instructor_id: Option<String>,
    pub status: EnrollmentStatus,
    pub payment_status: PaymentStatus,
    pub gross_amount_minor: i64,
    pub discount_amount_minor: i64,
    pub final_amount_minor: i64,
    pub coupon_id: Option<Uuid>,
    pub provider: String,
    /// Last gateway payment id, kept for rows that predate `payments`.
    pub gateway_payment_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenueSplit {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    pub payment_id: Option<Uuid>,
    pub instructor_id: Option<String>,
    pub gross_amount_minor: i64,
    pub gateway_fee_minor: i64,
    pub net_amount_minor: i64,
    pub instructor_bps: u32,
    pub platform_bps: u32,
    pub instructor_amount_minor: i64,
    pub platform_amount_minor: i64,
    pub created_at: DateTime<Utc>,
}

impl RevenueSplit {
    pub fn from_breakdown(
        enrollment: &Enrollment,
        payment_id: Option<Uuid>,
        breakdown: &SplitBreakdown,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            enrollment_id: enrollment.id,
            payment_id,
            instructor_id: enrollment.instructor_id.clone(),
            gross_amount_minor: breakdown.gross_amount_minor,
            gateway_fee_minor: breakdown.gateway_fee_minor,
            net_amount_minor: breakdown.net_amount_minor,
            instructor_bps: breakdown.instructor_bps,
            platform_bps: breakdown.platform_bps,
            instructor_amount_minor: breakdown.instructor_amount_minor,
            platform_amount_minor: breakdown.platform_amount_minor,
            created_at: Utc::now(),
        }
    }
}
