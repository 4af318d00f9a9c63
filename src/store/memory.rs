//! In-memory ledger store
//!
//! Same contract as the PostgreSQL store. All state sits behind one
//! `RwLock`, so every commit is validated and applied under a single
//! write guard and is atomic with respect to other callers.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{AcademicSession, DiscountPolicy, FeeRecord, PaymentReceipt, Period, Student};

use super::{
    check_source_versions, claim_existing, duplicate_record, AllocationCommit, IdempotencyClaim,
    IdempotencyRecord, IdempotencyStatus, LedgerStore, PromotionCommit, StoreError,
};

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<Uuid, AcademicSession>,
    students: HashMap<Uuid, Student>,
    policies: HashMap<Uuid, DiscountPolicy>,
    records: HashMap<Uuid, FeeRecord>,
    receipts: Vec<PaymentReceipt>,
    idempotency: HashMap<(Uuid, String), IdempotencyRecord>,
}

impl Inner {
    /// Enforce the per-period uniqueness rules for a record about to be inserted
    fn check_unique(&self, record: &FeeRecord) -> Result<(), StoreError> {
        let clash = self.records.values().any(|existing| {
            existing.id != record.id
                && existing.tenant_id == record.tenant_id
                && existing.student_id == record.student_id
                && existing.session_id == record.session_id
                && existing.is_opening_entry == record.is_opening_entry
                && (record.is_opening_entry || existing.period == record.period)
        });
        if clash {
            return Err(duplicate_record(record));
        }
        Ok(())
    }

    fn check_enrolled(&self, student_id: Uuid, session_id: Uuid) -> Result<(), StoreError> {
        match self.students.get(&student_id) {
            Some(student) if student.current_session_id == session_id => Ok(()),
            Some(_) => Err(StoreError::NotEnrolled { student_id, session_id }),
            None => Err(StoreError::NotFound {
                entity: "student",
                id: student_id,
            }),
        }
    }

    fn idempotency_mut(&mut self, tenant_id: Uuid, key: &str) -> Result<&mut IdempotencyRecord, StoreError> {
        self.idempotency
            .get_mut(&(tenant_id, key.to_string()))
            .ok_or_else(|| StoreError::Corrupt(format!("idempotency key {key} was never reserved")))
    }

    fn check_version(&self, record: &FeeRecord) -> Result<(), StoreError> {
        match self.records.get(&record.id) {
            Some(stored) if stored.version == record.version => Ok(()),
            Some(_) => Err(StoreError::VersionConflict {
                entity: "fee_record",
                id: record.id,
                expected: record.version,
            }),
            None => Err(StoreError::NotFound {
                entity: "fee_record",
                id: record.id,
            }),
        }
    }
}

fn sorted_by_creation(mut records: Vec<FeeRecord>) -> Vec<FeeRecord> {
    records.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.period.cmp(&b.period))
            .then_with(|| a.id.cmp(&b.id))
    });
    records
}

/// In-memory [`LedgerStore`]
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    inner: RwLock<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored fee records across all tenants
    pub async fn record_count(&self) -> usize {
        self.inner.read().await.records.len()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn close(&self) {
        tracing::debug!("In-memory ledger store closed");
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<AcademicSession>, StoreError> {
        Ok(self.inner.read().await.sessions.get(&id).cloned())
    }

    async fn current_session(&self, tenant_id: Uuid) -> Result<Option<AcademicSession>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .sessions
            .values()
            .find(|s| s.tenant_id == tenant_id && s.is_current)
            .cloned())
    }

    async fn list_sessions(&self, tenant_id: Uuid) -> Result<Vec<AcademicSession>, StoreError> {
        let inner = self.inner.read().await;
        let mut sessions: Vec<AcademicSession> = inner
            .sessions
            .values()
            .filter(|s| s.tenant_id == tenant_id)
            .cloned()
            .collect();
        sessions.sort_by_key(|s| s.start_date);
        Ok(sessions)
    }

    async fn save_session(&self, session: &AcademicSession) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if session.is_current {
            for other in inner.sessions.values_mut() {
                if other.tenant_id == session.tenant_id && other.id != session.id {
                    other.is_current = false;
                }
            }
        }
        inner.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_student(&self, id: Uuid) -> Result<Option<Student>, StoreError> {
        Ok(self.inner.read().await.students.get(&id).cloned())
    }

    async fn list_students(
        &self,
        tenant_id: Uuid,
        class_id: &str,
        section_id: Option<&str>,
    ) -> Result<Vec<Student>, StoreError> {
        let inner = self.inner.read().await;
        let mut students: Vec<Student> = inner
            .students
            .values()
            .filter(|s| s.tenant_id == tenant_id && s.in_cohort(class_id, section_id))
            .cloned()
            .collect();
        students.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(students)
    }

    async fn save_student(&self, student: &Student) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let version = inner.students.get(&student.id).map(|s| s.version + 1).unwrap_or(1);
        let mut stored = student.clone();
        stored.version = version;
        inner.students.insert(stored.id, stored);
        Ok(())
    }

    async fn list_active_policies(&self, tenant_id: Uuid) -> Result<Vec<DiscountPolicy>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .policies
            .values()
            .filter(|p| p.tenant_id == tenant_id && p.is_active)
            .cloned()
            .collect())
    }

    async fn save_policy(&self, policy: &DiscountPolicy) -> Result<(), StoreError> {
        self.inner.write().await.policies.insert(policy.id, policy.clone());
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<FeeRecord>, StoreError> {
        Ok(self.inner.read().await.records.get(&id).cloned())
    }

    async fn find_record(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        session_id: Uuid,
        period: Period,
    ) -> Result<Option<FeeRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .records
            .values()
            .find(|r| {
                r.tenant_id == tenant_id
                    && r.student_id == student_id
                    && r.session_id == session_id
                    && r.period == period
                    && !r.is_opening_entry
            })
            .cloned())
    }

    async fn list_student_records(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        session_id: Option<Uuid>,
    ) -> Result<Vec<FeeRecord>, StoreError> {
        let inner = self.inner.read().await;
        let records = inner
            .records
            .values()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.student_id == student_id
                    && session_id.map(|s| r.session_id == s).unwrap_or(true)
            })
            .cloned()
            .collect();
        Ok(sorted_by_creation(records))
    }

    async fn insert_record(&self, record: &FeeRecord) -> Result<FeeRecord, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_unique(record)?;
        let mut stored = record.clone();
        stored.version = 1;
        inner.records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update_record(&self, record: &FeeRecord) -> Result<FeeRecord, StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_version(record)?;
        let mut stored = record.clone();
        stored.version += 1;
        inner.records.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn delete_record(&self, record: &FeeRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.check_version(record)?;
        inner.records.remove(&record.id);
        Ok(())
    }

    async fn commit_allocation(&self, commit: AllocationCommit) -> Result<Vec<FeeRecord>, StoreError> {
        let mut inner = self.inner.write().await;

        // Validate everything before the first write
        inner.check_enrolled(commit.receipt.student_id, commit.receipt.session_id)?;
        for record in &commit.inserts {
            inner.check_unique(record)?;
        }
        for record in &commit.updates {
            inner.check_version(record)?;
        }

        let mut written = Vec::with_capacity(commit.inserts.len() + commit.updates.len());
        for record in commit.inserts {
            let mut stored = record;
            stored.version = 1;
            inner.records.insert(stored.id, stored.clone());
            written.push(stored);
        }
        for record in commit.updates {
            let mut stored = record;
            stored.version += 1;
            inner.records.insert(stored.id, stored.clone());
            written.push(stored);
        }
        inner.receipts.push(commit.receipt);

        Ok(written)
    }

    async fn commit_promotion(&self, commit: PromotionCommit) -> Result<Student, StoreError> {
        let mut inner = self.inner.write().await;

        let student = commit.student;
        match inner.students.get(&student.id) {
            Some(stored) if stored.version == student.version => {}
            Some(_) => {
                return Err(StoreError::VersionConflict {
                    entity: "student",
                    id: student.id,
                    expected: student.version,
                })
            }
            None => {
                return Err(StoreError::NotFound {
                    entity: "student",
                    id: student.id,
                })
            }
        }
        let current: Vec<(Uuid, i64)> = inner
            .records
            .values()
            .filter(|r| {
                r.tenant_id == student.tenant_id
                    && r.student_id == student.id
                    && r.session_id == commit.from_session_id
            })
            .map(|r| (r.id, r.version))
            .collect();
        check_source_versions(&commit.source_versions, current)?;
        if let Some(opening) = &commit.opening_entry {
            inner.check_unique(opening)?;
        }

        if let Some(opening) = commit.opening_entry {
            let mut stored = opening;
            stored.version = 1;
            inner.records.insert(stored.id, stored);
        }
        let mut stored = student;
        stored.version += 1;
        inner.students.insert(stored.id, stored.clone());

        Ok(stored)
    }

    async fn list_receipts(&self, tenant_id: Uuid, student_id: Uuid) -> Result<Vec<PaymentReceipt>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .receipts
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.student_id == student_id)
            .cloned()
            .collect())
    }

    async fn get_idempotency(&self, tenant_id: Uuid, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .idempotency
            .get(&(tenant_id, key.to_string()))
            .cloned())
    }

    async fn start_idempotent(
        &self,
        tenant_id: Uuid,
        key: &str,
        request_hash: &str,
    ) -> Result<IdempotencyClaim, StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();
        let slot = (tenant_id, key.to_string());

        if let Some(existing) = inner.idempotency.get_mut(&slot) {
            let claim = claim_existing(existing, request_hash, now);
            if claim == IdempotencyClaim::Started {
                existing.status = IdempotencyStatus::Processing;
                existing.response_body = None;
                existing.processing_started_at = now;
            }
            return Ok(claim);
        }

        inner.idempotency.insert(
            slot,
            IdempotencyRecord {
                tenant_id,
                key: key.to_string(),
                request_hash: request_hash.to_string(),
                status: IdempotencyStatus::Processing,
                response_body: None,
                processing_started_at: now,
                created_at: now,
            },
        );
        Ok(IdempotencyClaim::Started)
    }

    async fn complete_idempotent(
        &self,
        tenant_id: Uuid,
        key: &str,
        response_body: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.idempotency_mut(tenant_id, key)?;
        record.status = IdempotencyStatus::Completed;
        record.response_body = Some(response_body.clone());
        Ok(())
    }

    async fn fail_idempotent(&self, tenant_id: Uuid, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let record = inner.idempotency_mut(tenant_id, key)?;
        record.status = IdempotencyStatus::Failed;
        Ok(())
    }
}
