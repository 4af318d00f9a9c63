//! Tenant Context
//!
//! Identifies the school (tenant) and academic session a call operates
//! under. Passed explicitly to every handler; nothing is read from
//! ambient request state.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Context for a ledger operation, used for scoping, auditing and tracing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    /// School the call is scoped to
    pub tenant_id: Uuid,

    /// Session requested by the caller (falls back to the tenant's current session)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,

    /// User performing the operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acting_user_id: Option<Uuid>,

    /// Correlation ID for request tracing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<Uuid>,
}

impl TenantContext {
    /// Create a context for a tenant with no session or actor
    pub fn new(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            session_id: None,
            acting_user_id: None,
            correlation_id: None,
        }
    }

    /// Pin the context to a session
    pub fn with_session(mut self, session_id: Uuid) -> Self {
        self.session_id = Some(session_id);
        self
    }

    /// Record the acting user
    pub fn with_actor(mut self, user_id: Uuid) -> Self {
        self.acting_user_id = Some(user_id);
        self
    }

    /// Create context with correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Generate a new correlation ID if not present
    pub fn ensure_correlation_id(&mut self) -> Uuid {
        *self.correlation_id.get_or_insert_with(Uuid::new_v4)
    }

    /// Actor label recorded on discount breakdowns
    pub fn actor_label(&self) -> String {
        self.acting_user_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "system".to_string())
    }
}
