//! Fee Record
//!
//! The central ledger entity: one obligation per student per charge
//! period. Derived amounts are never adjusted incrementally; every
//! mutation goes through [`FeeRecord::recompute`], which rebuilds
//! `gross`, `final`, `balance` and `status` from the stored inputs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{AppliedDiscount, DiscountBreakdown, LedgerError, Money, Period};

/// Charge category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeType {
    #[default]
    Tuition,
    Fund,
    Other,
}

impl FeeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeeType::Tuition => "tuition",
            FeeType::Fund => "fund",
            FeeType::Other => "other",
        }
    }
}

impl fmt::Display for FeeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FeeType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tuition" => Ok(FeeType::Tuition),
            "fund" => Ok(FeeType::Fund),
            "other" => Ok(FeeType::Other),
            other => Err(LedgerError::validation(format!("unknown fee type: {other}"))),
        }
    }
}

/// Payment status, always derived from `(final_amount, paid_amount)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeStatus {
    Pending,
    Partial,
    Paid,
}

impl FeeStatus {
    pub fn derive(final_amount: Money, paid_amount: Money) -> Self {
        if final_amount - paid_amount <= Money::ZERO {
            FeeStatus::Paid
        } else if paid_amount.is_positive() {
            FeeStatus::Partial
        } else {
            FeeStatus::Pending
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeeStatus::Pending => "Pending",
            FeeStatus::Partial => "Partial",
            FeeStatus::Paid => "Paid",
        }
    }
}

impl fmt::Display for FeeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FeeStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(FeeStatus::Pending),
            "Partial" => Ok(FeeStatus::Partial),
            "Paid" => Ok(FeeStatus::Paid),
            other => Err(LedgerError::validation(format!("unknown fee status: {other}"))),
        }
    }
}

/// A fee obligation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub student_id: Uuid,
    pub session_id: Uuid,
    pub period: Period,
    pub fee_type: FeeType,

    pub tuition_fee: Money,
    pub other_charges: Money,
    /// Unpaid balance from other periods when this record was created.
    /// Informational, except on opening entries where it is the charge.
    pub arrears: Money,
    /// Balance carried from the prior session (opening entries only)
    pub opening_balance: Money,
    pub concession: Money,
    pub discount: DiscountBreakdown,

    pub original_amount: Money,
    pub gross_amount: Money,
    pub final_amount: Money,
    pub paid_amount: Money,
    pub balance: Money,
    pub status: FeeStatus,

    pub is_opening_entry: bool,
    /// Created by the allocator for a period with no obligation yet.
    /// Stays set until the period's tuition is billed into it.
    pub is_placeholder: bool,
    pub waived: bool,
    pub due_date: Option<NaiveDate>,
    pub remarks: Option<String>,

    /// Optimistic concurrency version
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeeRecord {
    fn blank(tenant_id: Uuid, student_id: Uuid, session_id: Uuid, period: Period, fee_type: FeeType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            student_id,
            session_id,
            period,
            fee_type,
            tuition_fee: Money::ZERO,
            other_charges: Money::ZERO,
            arrears: Money::ZERO,
            opening_balance: Money::ZERO,
            concession: Money::ZERO,
            discount: DiscountBreakdown::default(),
            original_amount: Money::ZERO,
            gross_amount: Money::ZERO,
            final_amount: Money::ZERO,
            paid_amount: Money::ZERO,
            balance: Money::ZERO,
            status: FeeStatus::Pending,
            is_opening_entry: false,
            is_placeholder: false,
            waived: false,
            due_date: None,
            remarks: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// A periodic tuition obligation
    pub fn obligation(
        tenant_id: Uuid,
        student_id: Uuid,
        session_id: Uuid,
        period: Period,
        tuition_fee: Money,
        arrears: Money,
        due_date: Option<NaiveDate>,
    ) -> Self {
        let mut record = Self::blank(tenant_id, student_id, session_id, period, FeeType::Tuition);
        record.tuition_fee = tuition_fee;
        record.arrears = arrears;
        record.due_date = due_date;
        record.recompute();
        record
    }

    /// A standalone fund or other charge
    pub fn charge(
        tenant_id: Uuid,
        student_id: Uuid,
        session_id: Uuid,
        period: Period,
        fee_type: FeeType,
        amount: Money,
        remarks: Option<String>,
    ) -> Self {
        let mut record = Self::blank(tenant_id, student_id, session_id, period, fee_type);
        record.other_charges = amount;
        record.remarks = remarks;
        record.recompute();
        record
    }

    /// Debt carried from the prior session
    pub fn opening_entry(
        tenant_id: Uuid,
        student_id: Uuid,
        session_id: Uuid,
        period: Period,
        closing_balance: Money,
        from_session_id: Uuid,
    ) -> Self {
        let mut record = Self::blank(tenant_id, student_id, session_id, period, FeeType::Tuition);
        record.arrears = closing_balance;
        record.opening_balance = closing_balance;
        record.is_opening_entry = true;
        record.remarks = Some(format!("Opening balance carried from session {from_session_id}"));
        record.recompute();
        record
    }

    /// Zero-balance marker for a payment against a period with no obligation
    pub fn placeholder(tenant_id: Uuid, student_id: Uuid, session_id: Uuid, period: Period) -> Self {
        let mut record = Self::blank(tenant_id, student_id, session_id, period, FeeType::Tuition);
        record.is_placeholder = true;
        record.recompute();
        record
    }

    /// Total charged before concession and discounts
    pub fn charges(&self) -> Money {
        let carried = if self.is_opening_entry {
            self.opening_balance
        } else {
            Money::ZERO
        };
        self.tuition_fee + self.other_charges + carried
    }

    /// Rebuild every derived field from the stored inputs.
    /// Returns the status before recomputation.
    pub fn recompute(&mut self) -> FeeStatus {
        let previous = self.status;
        self.original_amount = self.charges();
        self.gross_amount = self.original_amount - self.concession;
        self.discount.total_discount = self.discount.policy_discount + self.discount.manual_discount;
        self.final_amount = self.gross_amount - self.discount.total_discount;
        self.balance = self.final_amount - self.paid_amount;
        self.status = FeeStatus::derive(self.final_amount, self.paid_amount);
        previous
    }

    /// Replace the policy portion of the discount snapshot (generation time)
    pub fn set_policy_discounts(&mut self, applied: Vec<AppliedDiscount>, at: DateTime<Utc>) {
        let total: Money = applied.iter().map(|d| d.amount).sum();
        self.discount.policy_discount = total.min(self.gross_amount.floor_zero());
        self.discount.applied = applied;
        self.discount.applied_at = Some(at);
        if self.discount.applied_by.is_none() {
            self.discount.applied_by = Some("policy".to_string());
        }
        self.recompute();
    }

    /// Set the manually entered discount. The policy snapshot is kept.
    pub fn set_manual_discount(
        &mut self,
        manual: Money,
        reason: Option<String>,
        actor: String,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        if manual < Money::ZERO {
            return Err(LedgerError::validation("manual discount must not be negative"));
        }
        let total = self.discount.policy_discount + manual;
        if total > self.gross_amount {
            return Err(LedgerError::validation(format!(
                "total discount {} exceeds gross amount {}",
                total, self.gross_amount
            )));
        }
        if self.gross_amount - total < self.paid_amount {
            return Err(LedgerError::validation(format!(
                "discount would reduce the final amount below the {} already paid",
                self.paid_amount
            )));
        }
        self.discount.manual_discount = manual;
        self.discount.reason = reason;
        self.discount.applied_by = Some(actor);
        self.discount.applied_at = Some(at);
        self.touch();
        self.recompute();
        Ok(())
    }

    /// Apply a payment share to this record. Callers never apply more
    /// than the outstanding balance.
    pub fn record_payment(&mut self, applied: Money) {
        self.paid_amount += applied;
        self.touch();
        self.recompute();
    }

    /// Append a charge after the fact. Returns the status before the change.
    pub fn add_charge(&mut self, amount: Money) -> FeeStatus {
        self.other_charges += amount;
        self.touch();
        self.recompute()
    }

    /// Whether the period's tuition has been billed into this record.
    /// Placeholders and standalone fund or other charges have not.
    pub fn has_tuition_billed(&self) -> bool {
        !self.is_opening_entry && !self.is_placeholder && self.fee_type == FeeType::Tuition
    }

    /// Bill the period's tuition into an existing placeholder or charge
    /// record. Charges and payments already on it are kept.
    pub fn bill_tuition(&mut self, tuition_fee: Money, arrears: Money, due_date: Option<NaiveDate>) {
        self.fee_type = FeeType::Tuition;
        self.tuition_fee = tuition_fee;
        self.arrears = arrears;
        self.due_date = due_date;
        self.is_placeholder = false;
        self.touch();
        self.recompute();
    }

    /// Settle the outstanding balance with a concession
    pub fn waive(&mut self, reason: String) -> Result<Money, LedgerError> {
        if !self.balance.is_positive() {
            return Err(LedgerError::validation("record has no outstanding balance to waive"));
        }
        let waived = self.balance;
        self.concession += waived;
        self.waived = true;
        self.remarks = Some(reason);
        self.touch();
        self.recompute();
        Ok(waived)
    }

    pub fn is_outstanding(&self) -> bool {
        self.status != FeeStatus::Paid && self.balance.is_positive()
    }

    pub fn ensure_tenant(&self, tenant_id: Uuid) -> Result<(), LedgerError> {
        if self.tenant_id != tenant_id {
            return Err(LedgerError::tenant_scope("fee_record", self.id));
        }
        Ok(())
    }

    /// Balance, final amount and status agree with the stored inputs
    pub fn invariants_hold(&self) -> bool {
        self.balance == self.final_amount - self.paid_amount
            && self.final_amount == self.gross_amount - self.discount.total_discount
            && self.status == FeeStatus::derive(self.final_amount, self.paid_amount)
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
