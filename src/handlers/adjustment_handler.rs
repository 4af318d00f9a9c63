//! Record Adjustment Handler
//!
//! Single-record mutations: manual discounts, appended charges, waivers
//! and voids. Errors surface directly to the caller.

use chrono::Utc;
use std::sync::Arc;

use crate::domain::{Amount, FeeRecord, FeeStatus, LedgerError, Money, Period, TenantContext};
use crate::store::LedgerStore;

use super::scope::{ensure_enrolled, load_record, load_session, load_student, resolve_session, Access};
use super::{AddChargeCommand, ApplyDiscountCommand, CreateChargeCommand, WaiveCommand};

/// Handler for record adjustments
pub struct RecordAdjustmentHandler {
    store: Arc<dyn LedgerStore>,
}

impl RecordAdjustmentHandler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Load a record for mutation: tenant-checked, session writable and
    /// still the student's current session
    async fn load_writable(&self, ctx: &TenantContext, record_id: uuid::Uuid) -> Result<FeeRecord, LedgerError> {
        let record = load_record(self.store.as_ref(), ctx, record_id).await?;
        load_session(self.store.as_ref(), ctx, record.session_id, Access::Write).await?;
        let student = load_student(self.store.as_ref(), ctx, record.student_id).await?;
        ensure_enrolled(&student, record.session_id)?;
        Ok(record)
    }

    // =========================================================================
    // ApplyDiscount
    // =========================================================================

    /// Set the manual discount on a record. Policy discounts already
    /// frozen on the record are kept.
    pub async fn apply_discount(
        &self,
        command: ApplyDiscountCommand,
        ctx: &TenantContext,
    ) -> Result<FeeRecord, LedgerError> {
        let manual: Money = command
            .manual_discount
            .parse()
            .map_err(|e| LedgerError::validation(format!("Invalid discount: {}", e)))?;

        let mut record = self.load_writable(ctx, command.record_id).await?;
        let previous = record.status;
        record.set_manual_discount(manual, command.reason, ctx.actor_label(), Utc::now())?;
        warn_on_regression(&record, previous);

        let stored = self.store.update_record(&record).await?;

        tracing::info!(
            tenant_id = %ctx.tenant_id,
            record_id = %stored.id,
            manual_discount = %manual,
            final_amount = %stored.final_amount,
            "Manual discount applied"
        );

        Ok(stored)
    }

    // =========================================================================
    // CreateCharge
    // =========================================================================

    /// Insert a standalone charge. A period holds one regular record, so
    /// a period that already has one is rejected; use `add_charge` there.
    /// Tuition generated later for the period is billed into this record.
    pub async fn create_charge(
        &self,
        command: CreateChargeCommand,
        ctx: &TenantContext,
    ) -> Result<FeeRecord, LedgerError> {
        let period: Period = command
            .period
            .parse()
            .map_err(|e| LedgerError::validation(format!("Invalid period: {}", e)))?;
        let amount: Amount = command
            .amount
            .parse()
            .map_err(|e| LedgerError::validation(format!("Invalid amount: {}", e)))?;

        let student = load_student(self.store.as_ref(), ctx, command.student_id).await?;
        let session = resolve_session(self.store.as_ref(), ctx, command.session_id, Access::Write).await?;
        ensure_enrolled(&student, session.id)?;

        let record = FeeRecord::charge(
            ctx.tenant_id,
            student.id,
            session.id,
            period,
            command.fee_type,
            amount.as_money(),
            command.remarks,
        );
        let stored = self.store.insert_record(&record).await?;

        tracing::info!(
            tenant_id = %ctx.tenant_id,
            student_id = %student.id,
            record_id = %stored.id,
            fee_type = %stored.fee_type,
            amount = %amount,
            "Charge created"
        );

        Ok(stored)
    }

    // =========================================================================
    // AddCharge
    // =========================================================================

    /// Append a charge; may reopen a settled record
    pub async fn add_charge(&self, command: AddChargeCommand, ctx: &TenantContext) -> Result<FeeRecord, LedgerError> {
        let amount: Amount = command
            .amount
            .parse()
            .map_err(|e| LedgerError::validation(format!("Invalid amount: {}", e)))?;

        let mut record = self.load_writable(ctx, command.record_id).await?;
        let previous = record.add_charge(amount.as_money());
        if let Some(reason) = command.reason {
            record.remarks = Some(reason);
        }
        warn_on_regression(&record, previous);

        let stored = self.store.update_record(&record).await?;

        tracing::info!(
            tenant_id = %ctx.tenant_id,
            record_id = %stored.id,
            amount = %amount,
            balance = %stored.balance,
            "Charge added"
        );

        Ok(stored)
    }

    // =========================================================================
    // Waive
    // =========================================================================

    /// Grant a concession equal to the outstanding balance
    pub async fn waive(&self, command: WaiveCommand, ctx: &TenantContext) -> Result<FeeRecord, LedgerError> {
        if command.reason.trim().is_empty() {
            return Err(LedgerError::validation("a reason is required to waive a record"));
        }

        let mut record = self.load_writable(ctx, command.record_id).await?;
        let waived = record.waive(format!("{} (by {})", command.reason.trim(), ctx.actor_label()))?;
        let stored = self.store.update_record(&record).await?;

        tracing::info!(
            tenant_id = %ctx.tenant_id,
            record_id = %stored.id,
            waived = %waived,
            "Record waived"
        );

        Ok(stored)
    }

    // =========================================================================
    // Void
    // =========================================================================

    /// Remove a record that has received no money
    pub async fn void(&self, record_id: uuid::Uuid, ctx: &TenantContext) -> Result<(), LedgerError> {
        let record = self.load_writable(ctx, record_id).await?;
        if record.paid_amount.is_positive() {
            return Err(LedgerError::validation(format!(
                "record {} has payments of {}; waive it instead",
                record.id, record.paid_amount
            )));
        }

        self.store.delete_record(&record).await?;

        tracing::info!(tenant_id = %ctx.tenant_id, record_id = %record.id, "Record voided");
        Ok(())
    }
}

fn warn_on_regression(record: &FeeRecord, previous: FeeStatus) {
    if previous == FeeStatus::Paid && record.status != FeeStatus::Paid {
        tracing::warn!(
            record_id = %record.id,
            status = %record.status,
            balance = %record.balance,
            "Settled record reopened"
        );
    }
}
