//! Fee Generation Handler
//!
//! Creates one period's obligations for a cohort. Safe to repeat: a
//! student whose tuition for the period is already billed is skipped.
//! A placeholder or a standalone charge already holding the period gets
//! the tuition billed into it, so the period keeps a single record.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;

use crate::discount::DiscountResolver;
use crate::domain::{
    AcademicSession, DiscountPolicy, FeeRecord, FeeType, ItemFailure, LedgerError, Money, Period,
    Student, TenantContext,
};
use crate::store::{LedgerStore, StoreError};

use super::scope::{resolve_session, Access};
use super::{BatchOptions, GenerateFeesCommand, GenerationResult};

/// Per-student outcome
enum Generated {
    Created(FeeRecord),
    Skipped,
}

/// Handler for fee generation
pub struct FeeGenerationHandler {
    store: Arc<dyn LedgerStore>,
    resolver: DiscountResolver,
}

impl FeeGenerationHandler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            resolver: DiscountResolver::new(),
        }
    }

    /// Execute the generation command
    pub async fn execute(
        &self,
        command: GenerateFeesCommand,
        ctx: &TenantContext,
        options: BatchOptions,
    ) -> Result<GenerationResult, LedgerError> {
        let period: Period = command
            .period
            .parse()
            .map_err(|e| LedgerError::validation(format!("Invalid period: {}", e)))?;
        if command.class_id.trim().is_empty() {
            return Err(LedgerError::validation("class_id is required"));
        }

        let session = resolve_session(self.store.as_ref(), ctx, command.session_id, Access::Write).await?;

        let students: Vec<Student> = self
            .store
            .list_students(ctx.tenant_id, &command.class_id, command.section_id.as_deref())
            .await?
            .into_iter()
            .filter(|s| s.is_active && s.current_session_id == session.id)
            .collect();
        let policies = self.store.list_active_policies(ctx.tenant_id).await?;

        let mut result = GenerationResult {
            session_id: session.id,
            period,
            created: 0,
            skipped: 0,
            failed: Vec::new(),
            record_ids: Vec::new(),
        };

        for (idx, student) in students.iter().enumerate() {
            if options.expired() {
                tracing::warn!(
                    tenant_id = %ctx.tenant_id,
                    remaining = students.len() - idx,
                    "Generation deadline exceeded"
                );
                result.failed.extend(
                    students[idx..]
                        .iter()
                        .map(|s| ItemFailure::new(s.id, LedgerError::DeadlineExceeded)),
                );
                break;
            }

            match self
                .generate_one(student, &session, period, command.due_date, &policies)
                .await
            {
                Ok(Generated::Created(record)) => {
                    result.created += 1;
                    result.record_ids.push(record.id);
                }
                Ok(Generated::Skipped) => result.skipped += 1,
                Err(e) => {
                    tracing::warn!(
                        tenant_id = %ctx.tenant_id,
                        student_id = %student.id,
                        period = %period,
                        error = %e,
                        "Fee generation failed for student"
                    );
                    result.failed.push(ItemFailure::new(student.id, e));
                }
            }
        }

        tracing::info!(
            tenant_id = %ctx.tenant_id,
            session_id = %session.id,
            class_id = %command.class_id,
            period = %period,
            created = result.created,
            skipped = result.skipped,
            failed = result.failed.len(),
            "Fee generation completed"
        );

        Ok(result)
    }

    async fn generate_one(
        &self,
        student: &Student,
        session: &AcademicSession,
        period: Period,
        due_date: Option<NaiveDate>,
        policies: &[DiscountPolicy],
    ) -> Result<Generated, LedgerError> {
        let records = self
            .store
            .list_student_records(student.tenant_id, student.id, Some(session.id))
            .await?;

        let existing = records
            .iter()
            .find(|r| r.period == period && !r.is_opening_entry)
            .cloned();
        if existing.as_ref().is_some_and(FeeRecord::has_tuition_billed) {
            return Ok(Generated::Skipped);
        }

        // Fund charges are reported separately from tuition arrears
        let arrears: Money = records
            .iter()
            .filter(|r| r.period != period || r.is_opening_entry)
            .filter(|r| r.fee_type != FeeType::Fund && r.is_outstanding())
            .map(|r| r.balance)
            .sum();

        let mut record = match existing {
            Some(mut unbilled) => {
                unbilled.bill_tuition(student.monthly_fee, arrears, due_date);
                unbilled
            }
            None => FeeRecord::obligation(
                student.tenant_id,
                student.id,
                session.id,
                period,
                student.monthly_fee,
                arrears,
                due_date,
            ),
        };

        // Policies discount tuition, not charges already on the record
        let resolved = self
            .resolver
            .resolve(student, policies, record.gross_amount - record.other_charges);
        if !resolved.applied.is_empty() {
            record.set_policy_discounts(resolved.applied, Utc::now());
        }

        let stored = if record.version == 0 {
            match self.store.insert_record(&record).await {
                Ok(stored) => stored,
                // Another run created it first
                Err(StoreError::Duplicate(_)) => return Ok(Generated::Skipped),
                Err(e) => return Err(e.into()),
            }
        } else {
            self.store.update_record(&record).await?
        };

        tracing::debug!(
            student_id = %student.id,
            record_id = %stored.id,
            final_amount = %stored.final_amount,
            arrears = %stored.arrears,
            "Fee record generated"
        );

        Ok(Generated::Created(stored))
    }
}
