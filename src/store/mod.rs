//! Ledger storage
//!
//! An injectable storage handle with an explicit lifecycle. Handlers
//! hold an `Arc<dyn LedgerStore>`; the binary opens a PostgreSQL-backed
//! store at startup and closes it on shutdown, tests use the in-memory
//! store.
//!
//! Every mutable entity carries a `version`. Updates are conditional on
//! the version the caller read, and multi-record commits (one payment
//! intent, one promotion) succeed or fail as a unit.

mod memory;
mod postgres;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::{
    AcademicSession, DiscountPolicy, FeeRecord, LedgerError, PaymentReceipt, Period, Student,
};

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Optimistic concurrency conflict
    #[error("Version conflict on {entity} {id}: expected version {expected}")]
    VersionConflict {
        entity: &'static str,
        id: Uuid,
        expected: i64,
    },

    /// Unique constraint violation
    #[error("Duplicate {0}")]
    Duplicate(String),

    /// Row missing
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// The student left the session between the read and the commit
    #[error("Student {student_id} is no longer enrolled in session {session_id}")]
    NotEnrolled { student_id: Uuid, session_id: Uuid },

    /// Stored data could not be mapped back to a domain value
    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_version_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { entity, id, expected } => {
                LedgerError::VersionConflict { entity, id, expected }
            }
            StoreError::Duplicate(what) => LedgerError::DuplicateObligation(what),
            StoreError::NotFound { entity, id } => LedgerError::not_found(entity, id),
            StoreError::NotEnrolled { student_id, session_id } => {
                LedgerError::SessionClosed { student_id, session_id }
            }
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

/// Unique-violation error for a record that clashes with an existing one
fn duplicate_record(record: &FeeRecord) -> StoreError {
    if record.is_opening_entry {
        StoreError::Duplicate(format!(
            "opening entry for student {} in session {}",
            record.student_id, record.session_id
        ))
    } else {
        StoreError::Duplicate(format!(
            "fee record for student {} in session {} for {}",
            record.student_id, record.session_id, record.period
        ))
    }
}

/// Writes for one payment intent, committed atomically.
///
/// The commit only lands while the receipt's student is still enrolled
/// in the receipt's session.
#[derive(Debug, Clone)]
pub struct AllocationCommit {
    /// New records (a placeholder for a front-loaded payment)
    pub inserts: Vec<FeeRecord>,
    /// Mutated records; each carries the version it was read at
    pub updates: Vec<FeeRecord>,
    pub receipt: PaymentReceipt,
}

/// Writes for one student's promotion, committed atomically
#[derive(Debug, Clone)]
pub struct PromotionCommit {
    /// Updated student; carries the version it was read at
    pub student: Student,
    pub from_session_id: Uuid,
    /// `(id, version)` of every source-session record the closing
    /// balance was summed over. Any change to that set fails the commit.
    pub source_versions: Vec<(Uuid, i64)>,
    pub opening_entry: Option<FeeRecord>,
}

/// Compare the records a promotion summed with the ones stored now
fn check_source_versions(expected: &[(Uuid, i64)], mut current: Vec<(Uuid, i64)>) -> Result<(), StoreError> {
    for &(id, version) in expected {
        let stored = current
            .iter()
            .position(|(current_id, _)| *current_id == id)
            .map(|pos| current.swap_remove(pos).1);
        if stored != Some(version) {
            return Err(StoreError::VersionConflict {
                entity: "fee_record",
                id,
                expected: version,
            });
        }
    }
    // Written after the closing balance was read
    if let Some(&(id, _)) = current.first() {
        return Err(StoreError::VersionConflict {
            entity: "fee_record",
            id,
            expected: 0,
        });
    }
    Ok(())
}

// =========================================================================
// Idempotency
// =========================================================================

/// A `processing` claim older than this is treated as abandoned
pub const IDEMPOTENCY_STALE_MINUTES: i64 = 5;

/// Idempotency key status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Processing,
    Completed,
    Failed,
}

impl IdempotencyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyStatus::Processing => "processing",
            IdempotencyStatus::Completed => "completed",
            IdempotencyStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for IdempotencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IdempotencyStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(IdempotencyStatus::Processing),
            "completed" => Ok(IdempotencyStatus::Completed),
            "failed" => Ok(IdempotencyStatus::Failed),
            other => Err(StoreError::Corrupt(format!("unknown idempotency status: {other}"))),
        }
    }
}

/// Stored state of an idempotent request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub tenant_id: Uuid,
    pub key: String,
    /// SHA-256 hex of the request body
    pub request_hash: String,
    pub status: IdempotencyStatus,
    /// Set once the request completes
    pub response_body: Option<serde_json::Value>,
    pub processing_started_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of reserving an idempotency key
#[derive(Debug, Clone, PartialEq)]
pub enum IdempotencyClaim {
    /// Reserved for this request; complete or fail it when done
    Started,
    /// Completed earlier with the same body
    Replay(serde_json::Value),
    /// Another request holding the key is still running
    InProgress,
    /// The key was used with a different body
    HashMismatch,
}

/// Decide what a request may do with a key that already exists.
/// `Started` means the caller takes the key over and must mark it
/// `processing` again.
fn claim_existing(existing: &IdempotencyRecord, request_hash: &str, now: DateTime<Utc>) -> IdempotencyClaim {
    if existing.request_hash != request_hash {
        return IdempotencyClaim::HashMismatch;
    }
    match existing.status {
        IdempotencyStatus::Completed => match &existing.response_body {
            Some(body) => IdempotencyClaim::Replay(body.clone()),
            None => IdempotencyClaim::Started,
        },
        IdempotencyStatus::Failed => IdempotencyClaim::Started,
        IdempotencyStatus::Processing => {
            let age = now - existing.processing_started_at;
            if age.num_minutes() < IDEMPOTENCY_STALE_MINUTES {
                IdempotencyClaim::InProgress
            } else {
                IdempotencyClaim::Started
            }
        }
    }
}

/// Ledger storage contract
///
/// Reads are not tenant-filtered by ID lookups; callers check the
/// returned entity's tenant. List operations are always tenant-scoped.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // =========================================================================
    // Lifecycle
    // =========================================================================

    async fn health_check(&self) -> Result<(), StoreError>;

    async fn close(&self);

    // =========================================================================
    // Sessions
    // =========================================================================

    async fn get_session(&self, id: Uuid) -> Result<Option<AcademicSession>, StoreError>;

    async fn current_session(&self, tenant_id: Uuid) -> Result<Option<AcademicSession>, StoreError>;

    async fn list_sessions(&self, tenant_id: Uuid) -> Result<Vec<AcademicSession>, StoreError>;

    /// Upsert. When `is_current` is set, every other session of the
    /// tenant is unmarked in the same write.
    async fn save_session(&self, session: &AcademicSession) -> Result<(), StoreError>;

    // =========================================================================
    // Student directory
    // =========================================================================

    async fn get_student(&self, id: Uuid) -> Result<Option<Student>, StoreError>;

    /// Students currently in the cohort, active or not
    async fn list_students(
        &self,
        tenant_id: Uuid,
        class_id: &str,
        section_id: Option<&str>,
    ) -> Result<Vec<Student>, StoreError>;

    /// Directory sync; overwrites the entry and bumps its version
    async fn save_student(&self, student: &Student) -> Result<(), StoreError>;

    // =========================================================================
    // Discount policies
    // =========================================================================

    async fn list_active_policies(&self, tenant_id: Uuid) -> Result<Vec<DiscountPolicy>, StoreError>;

    async fn save_policy(&self, policy: &DiscountPolicy) -> Result<(), StoreError>;

    // =========================================================================
    // Fee records
    // =========================================================================

    async fn get_record(&self, id: Uuid) -> Result<Option<FeeRecord>, StoreError>;

    /// The non-opening record for a (student, session, period)
    async fn find_record(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        session_id: Uuid,
        period: Period,
    ) -> Result<Option<FeeRecord>, StoreError>;

    /// A student's records, optionally limited to one session, in
    /// creation order
    async fn list_student_records(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        session_id: Option<Uuid>,
    ) -> Result<Vec<FeeRecord>, StoreError>;

    /// Insert a new record. Fails with `Duplicate` if a non-opening
    /// record already exists for the same student, session and period.
    async fn insert_record(&self, record: &FeeRecord) -> Result<FeeRecord, StoreError>;

    /// Conditional update on `record.version`; returns the stored record
    async fn update_record(&self, record: &FeeRecord) -> Result<FeeRecord, StoreError>;

    /// Conditional delete on `record.version`
    async fn delete_record(&self, record: &FeeRecord) -> Result<(), StoreError>;

    // =========================================================================
    // Atomic commits
    // =========================================================================

    /// Persist every write for one payment intent, or none of them
    async fn commit_allocation(&self, commit: AllocationCommit) -> Result<Vec<FeeRecord>, StoreError>;

    /// Persist one student's promotion, or nothing
    async fn commit_promotion(&self, commit: PromotionCommit) -> Result<Student, StoreError>;

    async fn list_receipts(&self, tenant_id: Uuid, student_id: Uuid) -> Result<Vec<PaymentReceipt>, StoreError>;

    // =========================================================================
    // Idempotency
    // =========================================================================

    async fn get_idempotency(&self, tenant_id: Uuid, key: &str) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Reserve a key before doing any work. Exactly one of several
    /// concurrent callers with the same key gets `Started`.
    async fn start_idempotent(
        &self,
        tenant_id: Uuid,
        key: &str,
        request_hash: &str,
    ) -> Result<IdempotencyClaim, StoreError>;

    /// Store the response of a reserved key
    async fn complete_idempotent(
        &self,
        tenant_id: Uuid,
        key: &str,
        response_body: &serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Release a reserved key so a retry may run
    async fn fail_idempotent(&self, tenant_id: Uuid, key: &str) -> Result<(), StoreError>;
}
