//! Payment Handler
//!
//! Applies payment intents oldest debt first. Each intent is checked
//! against the student's total due, planned in memory, and committed
//! as one atomic unit; a concurrent writer makes the intent fail with a
//! version conflict rather than lose an update.

use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{
    AcademicSession, AllocationLine, Amount, FeeRecord, ItemFailure, LedgerError, Money,
    PaymentReceipt, Period, TenantContext,
};
use crate::store::{AllocationCommit, LedgerStore};

use super::scope::{ensure_enrolled, load_student, resolve_session, Access};
use super::{BatchOptions, CollectPaymentsCommand, CollectionResult, PaymentIntent};

// =========================================================================
// Allocation plan
// =========================================================================

/// Split `amount` across `others` in order, then the target.
///
/// `others` must already be sorted oldest first and contain only
/// outstanding records. Returns the allocation lines and the indices of
/// the `others` that were touched. Callers guarantee `amount` does not
/// exceed the total due.
pub fn allocate_oldest_first(
    amount: Money,
    others: &mut [FeeRecord],
    target: &mut FeeRecord,
) -> (Vec<AllocationLine>, Vec<usize>) {
    let mut remaining = amount;
    let mut lines = Vec::new();
    let mut touched = Vec::new();

    for (idx, record) in others.iter_mut().enumerate() {
        if !remaining.is_positive() {
            break;
        }
        let share = remaining.min(record.balance.floor_zero());
        if !share.is_positive() {
            continue;
        }
        record.record_payment(share);
        remaining -= share;
        touched.push(idx);
        lines.push(AllocationLine {
            record_id: record.id,
            period: record.period,
            applied: share,
            balance_after: record.balance,
        });
    }

    if remaining.is_positive() {
        target.record_payment(remaining);
        lines.push(AllocationLine {
            record_id: target.id,
            period: target.period,
            applied: remaining,
            balance_after: target.balance,
        });
    }

    (lines, touched)
}

/// Handler for payment collection
pub struct PaymentHandler {
    store: Arc<dyn LedgerStore>,
}

impl PaymentHandler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Execute a collection batch
    pub async fn execute(
        &self,
        command: CollectPaymentsCommand,
        ctx: &TenantContext,
        options: BatchOptions,
    ) -> Result<CollectionResult, LedgerError> {
        let session = resolve_session(self.store.as_ref(), ctx, command.session_id, Access::Write).await?;

        let mut result = CollectionResult {
            session_id: session.id,
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        let total = command.payments.len();
        for (idx, intent) in command.payments.iter().enumerate() {
            if options.expired() {
                tracing::warn!(
                    tenant_id = %ctx.tenant_id,
                    remaining = total - idx,
                    "Collection deadline exceeded"
                );
                result.failed.extend(
                    command.payments[idx..]
                        .iter()
                        .map(|p| ItemFailure::new(p.student_id, LedgerError::DeadlineExceeded)),
                );
                break;
            }

            match self.collect_one(intent, &session, ctx).await {
                Ok(receipt) => result.succeeded.push(receipt),
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %ctx.tenant_id,
                        student_id = %intent.student_id,
                        period = %intent.period,
                        error = %e,
                        "Payment rejected"
                    );
                    result.failed.push(ItemFailure::new(intent.student_id, e));
                }
            }
        }

        tracing::info!(
            tenant_id = %ctx.tenant_id,
            session_id = %session.id,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "Payment collection completed"
        );

        Ok(result)
    }

    /// Apply one intent
    pub async fn collect_one(
        &self,
        intent: &PaymentIntent,
        session: &AcademicSession,
        ctx: &TenantContext,
    ) -> Result<PaymentReceipt, LedgerError> {
        let period: Period = intent
            .period
            .parse()
            .map_err(|e| LedgerError::validation(format!("Invalid period: {}", e)))?;
        let amount: Amount = intent
            .amount
            .parse()
            .map_err(|e| LedgerError::validation(format!("Invalid amount: {}", e)))?;
        let amount = amount.as_money();

        let student = load_student(self.store.as_ref(), ctx, intent.student_id).await?;
        ensure_enrolled(&student, session.id)?;

        // Creation order, oldest first
        let records = self
            .store
            .list_student_records(ctx.tenant_id, student.id, Some(session.id))
            .await?;

        let (mut target, is_new) = match records
            .iter()
            .find(|r| r.period == period && !r.is_opening_entry)
        {
            Some(record) => (record.clone(), false),
            None => (
                FeeRecord::placeholder(ctx.tenant_id, student.id, session.id, period),
                true,
            ),
        };

        let mut others: Vec<FeeRecord> = records
            .into_iter()
            .filter(|r| r.id != target.id && r.is_outstanding())
            .collect();

        let arrears: Money = others.iter().map(|r| r.balance).sum();
        let total_due = target.balance.floor_zero() + arrears;
        if amount > total_due {
            return Err(LedgerError::overpayment(amount.value(), total_due.value()));
        }

        let balance_before = target.balance + arrears;
        let (lines, touched) = allocate_oldest_first(amount, &mut others, &mut target);
        let target_paid = lines.iter().any(|l| l.record_id == target.id);

        let mut updates: Vec<FeeRecord> = touched.into_iter().map(|idx| others[idx].clone()).collect();
        let balance_after = target.balance + others.iter().map(|r| r.balance).sum::<Money>();
        debug_assert_eq!(balance_before - amount, balance_after);

        let mut inserts = Vec::new();
        if is_new {
            inserts.push(target.clone());
        } else if target_paid {
            updates.push(target.clone());
        }

        let receipt = PaymentReceipt {
            payment_id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id,
            student_id: student.id,
            session_id: session.id,
            period,
            amount,
            allocations: lines,
            received_by: ctx.actor_label(),
            received_at: Utc::now(),
        };

        self.store
            .commit_allocation(AllocationCommit {
                inserts,
                updates,
                receipt: receipt.clone(),
            })
            .await?;

        tracing::debug!(
            student_id = %student.id,
            payment_id = %receipt.payment_id,
            amount = %amount,
            lines = receipt.allocations.len(),
            "Payment allocated"
        );

        Ok(receipt)
    }
}
