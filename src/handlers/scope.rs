//! Tenant and session scoping shared by every handler

use uuid::Uuid;

use crate::domain::{AcademicSession, FeeRecord, LedgerError, SessionModule, Student, TenantContext};
use crate::store::LedgerStore;

/// Whether the caller intends to write fee data in the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
}

/// Resolve the session a call operates in: explicit, then the
/// context's session, then the tenant's current session.
pub(crate) async fn resolve_session(
    store: &dyn LedgerStore,
    ctx: &TenantContext,
    explicit: Option<Uuid>,
    access: Access,
) -> Result<AcademicSession, LedgerError> {
    let session = match explicit.or(ctx.session_id) {
        Some(id) => store
            .get_session(id)
            .await?
            .ok_or_else(|| LedgerError::not_found("session", id))?,
        None => store
            .current_session(ctx.tenant_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("current session", ctx.tenant_id))?,
    };
    check_session(&session, ctx, access)?;
    Ok(session)
}

/// Load a named session with the same checks as [`resolve_session`]
pub(crate) async fn load_session(
    store: &dyn LedgerStore,
    ctx: &TenantContext,
    id: Uuid,
    access: Access,
) -> Result<AcademicSession, LedgerError> {
    resolve_session(store, ctx, Some(id), access).await
}

fn check_session(session: &AcademicSession, ctx: &TenantContext, access: Access) -> Result<(), LedgerError> {
    session.ensure_tenant(ctx.tenant_id)?;
    if !session.is_active {
        return Err(LedgerError::validation(format!(
            "session {} is not active",
            session.id
        )));
    }
    if access == Access::Write {
        session.ensure_unlocked(SessionModule::Fees)?;
    }
    Ok(())
}

pub(crate) async fn load_student(
    store: &dyn LedgerStore,
    ctx: &TenantContext,
    id: Uuid,
) -> Result<Student, LedgerError> {
    let student = store
        .get_student(id)
        .await?
        .ok_or_else(|| LedgerError::not_found("student", id))?;
    student.ensure_tenant(ctx.tenant_id)?;
    Ok(student)
}

pub(crate) async fn load_record(
    store: &dyn LedgerStore,
    ctx: &TenantContext,
    id: Uuid,
) -> Result<FeeRecord, LedgerError> {
    let record = store
        .get_record(id)
        .await?
        .ok_or_else(|| LedgerError::not_found("fee_record", id))?;
    record.ensure_tenant(ctx.tenant_id)?;
    Ok(record)
}

/// Fee writes only go to the session the student is currently in. A
/// session the student was promoted out of is closed: its balance
/// already lives in the next session's opening entry.
pub(crate) fn ensure_enrolled(student: &Student, session_id: Uuid) -> Result<(), LedgerError> {
    if student.current_session_id == session_id {
        return Ok(());
    }
    if student.has_completed_session(session_id) {
        return Err(LedgerError::SessionClosed {
            student_id: student.id,
            session_id,
        });
    }
    Err(LedgerError::validation(format!(
        "student {} is not enrolled in session {}",
        student.id, session_id
    )))
}
