//! Command definitions
//!
//! Commands represent intentions to change ledger state; results are
//! what the handlers report back.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::{FeeRecord, FeeType, ItemFailure, Money, PaymentReceipt, Period};

// =========================================================================
// Batch options
// =========================================================================

/// Caller-supplied limits for batch commands
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Checked before each per-student step
    pub deadline: Option<Instant>,
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abort remaining steps once `budget` has elapsed from now
    pub fn with_timeout(mut self, budget: Duration) -> Self {
        self.deadline = Some(Instant::now() + budget);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn expired(&self) -> bool {
        self.deadline.map(|d| Instant::now() >= d).unwrap_or(false)
    }
}

// =========================================================================
// GenerateFeesCommand
// =========================================================================

/// Generate one period's obligations for a class (and optionally a section)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateFeesCommand {
    /// Falls back to the context session, then the tenant's current session
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub class_id: String,
    #[serde(default)]
    pub section_id: Option<String>,
    /// Period label in any accepted spelling
    pub period: String,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl GenerateFeesCommand {
    pub fn new(class_id: impl Into<String>, period: impl Into<String>) -> Self {
        Self {
            session_id: None,
            class_id: class_id.into(),
            section_id: None,
            period: period.into(),
            due_date: None,
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn with_section(mut self, section_id: impl Into<String>) -> Self {
        self.section_id = Some(section_id.into());
        self
    }

    pub fn with_due_date(mut self, due_date: NaiveDate) -> Self {
        self.due_date = Some(due_date);
        self
    }
}

/// Outcome of a generation batch
#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub session_id: Uuid,
    pub period: Period,
    pub created: usize,
    pub skipped: usize,
    pub failed: Vec<ItemFailure>,
    /// Records created or filled by this run
    pub record_ids: Vec<Uuid>,
}

// =========================================================================
// CollectPaymentsCommand
// =========================================================================

/// One payment against a student's designated period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub student_id: Uuid,
    pub period: String,
    /// Amount as a string for precise decimal
    pub amount: String,
}

impl PaymentIntent {
    pub fn new(student_id: Uuid, period: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            student_id,
            period: period.into(),
            amount: amount.into(),
        }
    }
}

/// Apply a batch of payments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectPaymentsCommand {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub payments: Vec<PaymentIntent>,
}

impl CollectPaymentsCommand {
    pub fn new(payments: Vec<PaymentIntent>) -> Self {
        Self {
            session_id: None,
            payments,
        }
    }

    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }
}

/// Outcome of a collection batch
#[derive(Debug, Clone, Serialize)]
pub struct CollectionResult {
    pub session_id: Uuid,
    pub succeeded: Vec<PaymentReceipt>,
    pub failed: Vec<ItemFailure>,
}

// =========================================================================
// Record adjustments
// =========================================================================

/// Set the manual discount on a record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyDiscountCommand {
    pub record_id: Uuid,
    /// Amount as a string for precise decimal; "0" clears it
    pub manual_discount: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ApplyDiscountCommand {
    pub fn new(record_id: Uuid, manual_discount: impl Into<String>) -> Self {
        Self {
            record_id,
            manual_discount: manual_discount.into(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Append a charge to an existing record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddChargeCommand {
    pub record_id: Uuid,
    pub amount: String,
    #[serde(default)]
    pub reason: Option<String>,
}

impl AddChargeCommand {
    pub fn new(record_id: Uuid, amount: impl Into<String>) -> Self {
        Self {
            record_id,
            amount: amount.into(),
            reason: None,
        }
    }
}

/// Create a standalone fund or other charge for a period with no record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateChargeCommand {
    pub student_id: Uuid,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub period: String,
    pub fee_type: FeeType,
    pub amount: String,
    #[serde(default)]
    pub remarks: Option<String>,
}

impl CreateChargeCommand {
    pub fn new(student_id: Uuid, period: impl Into<String>, fee_type: FeeType, amount: impl Into<String>) -> Self {
        Self {
            student_id,
            session_id: None,
            period: period.into(),
            fee_type,
            amount: amount.into(),
            remarks: None,
        }
    }
}

/// Settle a record's outstanding balance without payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaiveCommand {
    pub record_id: Uuid,
    pub reason: String,
}

impl WaiveCommand {
    pub fn new(record_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            record_id,
            reason: reason.into(),
        }
    }
}

// =========================================================================
// PromoteStudentsCommand
// =========================================================================

/// One student in a promotion batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionEntry {
    pub student_id: Uuid,
    pub final_result_status: String,
    #[serde(default)]
    pub new_roll_no: Option<String>,
}

impl PromotionEntry {
    pub fn new(student_id: Uuid, final_result_status: impl Into<String>) -> Self {
        Self {
            student_id,
            final_result_status: final_result_status.into(),
            new_roll_no: None,
        }
    }

    pub fn with_roll_no(mut self, roll_no: impl Into<String>) -> Self {
        self.new_roll_no = Some(roll_no.into());
        self
    }
}

/// Move a cohort into the next session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromoteStudentsCommand {
    pub from_session_id: Uuid,
    pub to_session_id: Uuid,
    pub target_class_id: String,
    #[serde(default)]
    pub target_section_id: Option<String>,
    pub students: Vec<PromotionEntry>,
}

impl PromoteStudentsCommand {
    pub fn new(
        from_session_id: Uuid,
        to_session_id: Uuid,
        target_class_id: impl Into<String>,
        students: Vec<PromotionEntry>,
    ) -> Self {
        Self {
            from_session_id,
            to_session_id,
            target_class_id: target_class_id.into(),
            target_section_id: None,
            students,
        }
    }

    pub fn with_section(mut self, section_id: impl Into<String>) -> Self {
        self.target_section_id = Some(section_id.into());
        self
    }
}

/// One promoted student
#[derive(Debug, Clone, Serialize)]
pub struct PromotionOutcome {
    pub student_id: Uuid,
    pub closing_balance: Money,
    /// Set when a positive balance was carried forward
    pub opening_record_id: Option<Uuid>,
}

/// Outcome of a promotion batch
#[derive(Debug, Clone, Serialize)]
pub struct PromotionResult {
    pub succeeded: Vec<PromotionOutcome>,
    pub failed: Vec<ItemFailure>,
}

// =========================================================================
// Sessions
// =========================================================================

/// Create or replace an academic session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveSessionCommand {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub is_current: bool,
}

impl SaveSessionCommand {
    pub fn new(name: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            session_id: None,
            name: name.into(),
            start_date,
            end_date,
            is_current: false,
        }
    }

    pub fn current(mut self) -> Self {
        self.is_current = true;
        self
    }
}

// =========================================================================
// Queries
// =========================================================================

/// Fee voucher for one period
#[derive(Debug, Clone, Serialize)]
pub struct VoucherView {
    pub record: FeeRecord,
    /// Outstanding non-fund balances from the student's other records
    pub arrears: Money,
    pub outstanding_funds: Vec<FeeRecord>,
    pub total_payable: Money,
}
