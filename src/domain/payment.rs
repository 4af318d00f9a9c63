//! Payment receipts
//!
//! A receipt records one accepted payment intent and how it was split
//! across the student's records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Money, Period};

/// Share of a payment applied to one record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub record_id: Uuid,
    pub period: Period,
    pub applied: Money,
    pub balance_after: Money,
}

/// Accepted payment intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub payment_id: Uuid,
    pub tenant_id: Uuid,
    pub student_id: Uuid,
    pub session_id: Uuid,
    /// Period the payer designated
    pub period: Period,
    pub amount: Money,
    /// In application order
    pub allocations: Vec<AllocationLine>,
    pub received_by: String,
    pub received_at: DateTime<Utc>,
}

impl PaymentReceipt {
    /// Sum of the allocation lines; equals `amount` for a committed receipt
    pub fn allocated(&self) -> Money {
        self.allocations.iter().map(|l| l.applied).sum()
    }
}
