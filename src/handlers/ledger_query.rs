//! Ledger queries
//!
//! Read-only views over a student's records.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{FeeRecord, FeeType, LedgerError, Money, PaymentReceipt, Period, TenantContext};
use crate::store::LedgerStore;

use super::scope::{load_student, resolve_session, Access};
use super::VoucherView;

/// Read-side handler
pub struct LedgerQueryHandler {
    store: Arc<dyn LedgerStore>,
}

impl LedgerQueryHandler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// All of a student's records across sessions, most recent first
    pub async fn get_ledger(&self, student_id: Uuid, ctx: &TenantContext) -> Result<Vec<FeeRecord>, LedgerError> {
        let student = load_student(self.store.as_ref(), ctx, student_id).await?;
        let mut records = self
            .store
            .list_student_records(ctx.tenant_id, student.id, None)
            .await?;
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.period.cmp(&a.period))
        });
        Ok(records)
    }

    /// Voucher for one period. The session is the explicit one, else the
    /// context session, else the tenant's current session.
    pub async fn get_voucher(
        &self,
        student_id: Uuid,
        period: &str,
        session_id: Option<Uuid>,
        ctx: &TenantContext,
    ) -> Result<VoucherView, LedgerError> {
        let period: Period = period
            .parse()
            .map_err(|e| LedgerError::validation(format!("Invalid period: {}", e)))?;
        let student = load_student(self.store.as_ref(), ctx, student_id).await?;
        let session = resolve_session(self.store.as_ref(), ctx, session_id, Access::Read).await?;

        let records = self
            .store
            .list_student_records(ctx.tenant_id, student.id, Some(session.id))
            .await?;

        let record = records
            .iter()
            .find(|r| r.period == period && !r.is_opening_entry)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("fee_record", format!("{} {}", student.id, period)))?;

        let (funds, others): (Vec<FeeRecord>, Vec<FeeRecord>) = records
            .into_iter()
            .filter(|r| r.id != record.id && r.is_outstanding())
            .partition(|r| r.fee_type == FeeType::Fund);

        let arrears: Money = others.iter().map(|r| r.balance).sum();
        let fund_total: Money = funds.iter().map(|r| r.balance).sum();
        let total_payable = record.balance.floor_zero() + arrears + fund_total;

        Ok(VoucherView {
            record,
            arrears,
            outstanding_funds: funds,
            total_payable,
        })
    }

    /// Payment receipts for a student, oldest first
    pub async fn get_payments(&self, student_id: Uuid, ctx: &TenantContext) -> Result<Vec<PaymentReceipt>, LedgerError> {
        let student = load_student(self.store.as_ref(), ctx, student_id).await?;
        Ok(self.store.list_receipts(ctx.tenant_id, student.id).await?)
    }
}
