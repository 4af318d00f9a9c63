//! Promotion Handler
//!
//! Closes a student's session, moves them to the target session and
//! class, and carries any unpaid balance forward as one opening-balance
//! record. The closing balance and the opening record's amount are the
//! same value, so promotion neither creates nor destroys money.

use chrono::Utc;
use std::sync::Arc;

use crate::domain::{
    AcademicSession, FeeRecord, ItemFailure, LedgerError, Money, Period, SessionHistoryEntry,
    TenantContext,
};
use crate::store::{LedgerStore, PromotionCommit};

use super::scope::{load_session, load_student, Access};
use super::{BatchOptions, PromoteStudentsCommand, PromotionEntry, PromotionOutcome, PromotionResult};

/// `Σ final_amount − Σ paid_amount` over a session's records
pub fn closing_balance(records: &[FeeRecord]) -> Money {
    let billed: Money = records.iter().map(|r| r.final_amount).sum();
    let paid: Money = records.iter().map(|r| r.paid_amount).sum();
    billed - paid
}

/// Handler for session promotion
pub struct PromotionHandler {
    store: Arc<dyn LedgerStore>,
}

impl PromotionHandler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Execute a promotion batch
    pub async fn execute(
        &self,
        command: PromoteStudentsCommand,
        ctx: &TenantContext,
        options: BatchOptions,
    ) -> Result<PromotionResult, LedgerError> {
        if command.from_session_id == command.to_session_id {
            return Err(LedgerError::validation("source and target sessions must differ"));
        }
        if command.target_class_id.trim().is_empty() {
            return Err(LedgerError::validation("target_class_id is required"));
        }

        // The source session is only read; it may already be locked
        let from = load_session(self.store.as_ref(), ctx, command.from_session_id, Access::Read).await?;
        let to = load_session(self.store.as_ref(), ctx, command.to_session_id, Access::Write).await?;

        let mut result = PromotionResult {
            succeeded: Vec::new(),
            failed: Vec::new(),
        };

        for (idx, entry) in command.students.iter().enumerate() {
            if options.expired() {
                tracing::warn!(
                    tenant_id = %ctx.tenant_id,
                    remaining = command.students.len() - idx,
                    "Promotion deadline exceeded"
                );
                result.failed.extend(
                    command.students[idx..]
                        .iter()
                        .map(|e| ItemFailure::new(e.student_id, LedgerError::DeadlineExceeded)),
                );
                break;
            }

            match self.promote_one(entry, &from, &to, &command, ctx).await {
                Ok(outcome) => result.succeeded.push(outcome),
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %ctx.tenant_id,
                        student_id = %entry.student_id,
                        error = %e,
                        "Promotion failed for student"
                    );
                    result.failed.push(ItemFailure::new(entry.student_id, e));
                }
            }
        }

        tracing::info!(
            tenant_id = %ctx.tenant_id,
            from_session_id = %from.id,
            to_session_id = %to.id,
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            "Promotion completed"
        );

        Ok(result)
    }

    async fn promote_one(
        &self,
        entry: &PromotionEntry,
        from: &AcademicSession,
        to: &AcademicSession,
        command: &PromoteStudentsCommand,
        ctx: &TenantContext,
    ) -> Result<PromotionOutcome, LedgerError> {
        if entry.final_result_status.trim().is_empty() {
            return Err(LedgerError::validation("final_result_status is required"));
        }

        let mut student = load_student(self.store.as_ref(), ctx, entry.student_id).await?;
        if student.current_session_id != from.id {
            if student.has_completed_session(from.id) {
                return Err(LedgerError::AlreadyPromoted {
                    student_id: student.id,
                    session_id: from.id,
                });
            }
            return Err(LedgerError::validation(format!(
                "student {} is not enrolled in session {}",
                student.id, from.id
            )));
        }

        let records = self
            .store
            .list_student_records(ctx.tenant_id, student.id, Some(from.id))
            .await?;
        let closing = closing_balance(&records);
        let carried_in: Money = records
            .iter()
            .filter(|r| r.is_opening_entry)
            .map(|r| r.opening_balance)
            .sum();

        student.session_history.push(SessionHistoryEntry {
            session_id: from.id,
            class_id: student.class_id.clone(),
            section_id: student.section_id.clone(),
            roll_no: student.roll_no.clone(),
            closing_balance: closing,
            opening_balance: carried_in,
            final_result: Some(entry.final_result_status.trim().to_string()),
            promoted_date: Utc::now().date_naive(),
        });
        student.current_session_id = to.id;
        student.class_id = command.target_class_id.clone();
        student.section_id = command.target_section_id.clone();
        if let Some(roll_no) = &entry.new_roll_no {
            student.roll_no = Some(roll_no.clone());
        }

        // Credits are recorded in history but not carried as a record
        let opening_entry = closing.is_positive().then(|| {
            FeeRecord::opening_entry(
                ctx.tenant_id,
                student.id,
                to.id,
                Period::from_date(to.start_date),
                closing,
                from.id,
            )
        });
        let opening_record_id = opening_entry.as_ref().map(|r| r.id);
        let source_versions = records.iter().map(|r| (r.id, r.version)).collect();

        let stored = self
            .store
            .commit_promotion(PromotionCommit {
                student,
                from_session_id: from.id,
                source_versions,
                opening_entry,
            })
            .await?;

        tracing::debug!(
            student_id = %stored.id,
            closing_balance = %closing,
            carried = opening_record_id.is_some(),
            "Student promoted"
        );

        Ok(PromotionOutcome {
            student_id: stored.id,
            closing_balance: closing,
            opening_record_id,
        })
    }
}
