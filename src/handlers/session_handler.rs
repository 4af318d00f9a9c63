//! Session registry handler
//!
//! Creates sessions, marks the current one and manages locks.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{AcademicSession, LedgerError, SessionModule, TenantContext};
use crate::store::LedgerStore;

use super::SaveSessionCommand;

/// Handler for the session registry
pub struct SessionHandler {
    store: Arc<dyn LedgerStore>,
}

impl SessionHandler {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Create a session, or update name and dates of an existing one
    pub async fn save(&self, command: SaveSessionCommand, ctx: &TenantContext) -> Result<AcademicSession, LedgerError> {
        let mut session = match command.session_id {
            Some(id) => match self.store.get_session(id).await? {
                Some(existing) => {
                    existing.ensure_tenant(ctx.tenant_id)?;
                    let mut updated = existing;
                    updated.name = command.name;
                    updated.start_date = command.start_date;
                    updated.end_date = command.end_date;
                    updated
                }
                None => {
                    let mut created =
                        AcademicSession::new(ctx.tenant_id, command.name, command.start_date, command.end_date);
                    created.id = id;
                    created
                }
            },
            None => AcademicSession::new(ctx.tenant_id, command.name, command.start_date, command.end_date),
        };
        if command.is_current {
            session.is_current = true;
        }
        session.validate()?;

        self.store.save_session(&session).await?;
        tracing::info!(
            tenant_id = %ctx.tenant_id,
            session_id = %session.id,
            is_current = session.is_current,
            "Session saved"
        );
        Ok(session)
    }

    /// Make a session the tenant's default
    pub async fn set_current(&self, session_id: Uuid, ctx: &TenantContext) -> Result<AcademicSession, LedgerError> {
        let mut session = self.load(session_id, ctx).await?;
        if !session.is_active {
            return Err(LedgerError::validation(format!("session {} is not active", session.id)));
        }
        session.is_current = true;
        self.store.save_session(&session).await?;
        tracing::info!(tenant_id = %ctx.tenant_id, session_id = %session.id, "Current session changed");
        Ok(session)
    }

    /// Lock the whole session (no modules) or the named modules
    pub async fn lock(
        &self,
        session_id: Uuid,
        modules: &[String],
        ctx: &TenantContext,
    ) -> Result<AcademicSession, LedgerError> {
        let modules = parse_modules(modules)?;
        let mut session = self.load(session_id, ctx).await?;
        session.lock(&modules);
        self.store.save_session(&session).await?;
        tracing::info!(
            tenant_id = %ctx.tenant_id,
            session_id = %session.id,
            is_locked = session.is_locked,
            modules = ?session.locked_modules,
            "Session locked"
        );
        Ok(session)
    }

    /// Unlock the whole session (no modules) or the named modules
    pub async fn unlock(
        &self,
        session_id: Uuid,
        modules: &[String],
        ctx: &TenantContext,
    ) -> Result<AcademicSession, LedgerError> {
        let modules = parse_modules(modules)?;
        let mut session = self.load(session_id, ctx).await?;
        session.unlock(&modules);
        self.store.save_session(&session).await?;
        tracing::info!(tenant_id = %ctx.tenant_id, session_id = %session.id, "Session unlocked");
        Ok(session)
    }

    pub async fn list(&self, ctx: &TenantContext) -> Result<Vec<AcademicSession>, LedgerError> {
        Ok(self.store.list_sessions(ctx.tenant_id).await?)
    }

    async fn load(&self, session_id: Uuid, ctx: &TenantContext) -> Result<AcademicSession, LedgerError> {
        let session = self
            .store
            .get_session(session_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("session", session_id))?;
        session.ensure_tenant(ctx.tenant_id)?;
        Ok(session)
    }
}

fn parse_modules(modules: &[String]) -> Result<Vec<SessionModule>, LedgerError> {
    modules.iter().map(|m| m.parse()).collect()
}
