//! Ledger Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Ledger errors
///
/// These errors represent business rule violations and invariant failures.
/// Batch operations report them per item; single-entity operations
/// surface them to the caller directly.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LedgerError {
    /// Missing or malformed input, rejected before any write
    #[error("Validation error: {0}")]
    Validation(String),

    /// Student, session or record absent
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Payment exceeds the student's total due
    #[error("Overpayment: amount {amount} exceeds total due {total_due}")]
    Overpayment { amount: Decimal, total_due: Decimal },

    /// An obligation already exists for the student/session/period
    #[error("Duplicate obligation: {0}")]
    DuplicateObligation(String),

    /// Attempted access to another tenant's data
    #[error("Tenant scope violation: {entity} {id} does not belong to this tenant")]
    TenantScope { entity: &'static str, id: Uuid },

    /// Session or module locked against mutation
    #[error("Session {session_id} is locked for {module}")]
    LockedPeriod { session_id: Uuid, module: String },

    /// Student has been promoted out of the session; its balance now
    /// lives on the opening entry of the next session
    #[error("Student {student_id} has left session {session_id}; its balance was carried forward")]
    SessionClosed { student_id: Uuid, session_id: Uuid },

    /// Optimistic concurrency check failed
    #[error("Version conflict on {entity} {id}: expected {expected}")]
    VersionConflict {
        entity: &'static str,
        id: Uuid,
        expected: i64,
    },

    /// Student has already left the source session
    #[error("Student {student_id} already promoted out of session {session_id}")]
    AlreadyPromoted { student_id: Uuid, session_id: Uuid },

    /// Caller deadline passed before the item was processed
    #[error("Deadline exceeded before processing")]
    DeadlineExceeded,

    /// Storage failure
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn overpayment(amount: Decimal, total_due: Decimal) -> Self {
        Self::Overpayment { amount, total_due }
    }

    pub fn tenant_scope(entity: &'static str, id: Uuid) -> Self {
        Self::TenantScope { entity, id }
    }

    /// Stable machine-readable code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Overpayment { .. } => "overpayment",
            Self::DuplicateObligation(_) => "duplicate_obligation",
            Self::TenantScope { .. } => "tenant_scope",
            Self::LockedPeriod { .. } => "locked_period",
            Self::SessionClosed { .. } => "session_closed",
            Self::VersionConflict { .. } => "version_conflict",
            Self::AlreadyPromoted { .. } => "already_promoted",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Storage(_) => "storage_error",
        }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::Overpayment { .. }
                | Self::TenantScope { .. }
                | Self::LockedPeriod { .. }
                | Self::SessionClosed { .. }
                | Self::AlreadyPromoted { .. }
        )
    }

    /// Check if a caller retry of the same item may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::VersionConflict { .. } | Self::DeadlineExceeded | Self::Storage(_)
        )
    }
}

/// Per-item failure reported in batch results
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    /// Item key (student ID, or the period label for malformed input)
    pub key: String,
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip)]
    pub error: LedgerError,
}

impl ItemFailure {
    pub fn new(key: impl ToString, error: LedgerError) -> Self {
        Self {
            key: key.to_string(),
            error_code: error.error_code(),
            message: error.to_string(),
            error,
        }
    }
}
