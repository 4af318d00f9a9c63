//! PostgreSQL ledger store
//!
//! sqlx-backed [`LedgerStore`]. Multi-row writes run inside one
//! transaction; fee-record and student updates are conditional on the
//! version the caller read (`WHERE id = $1 AND version = $2`).

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::domain::{
    AcademicSession, AllocationLine, DiscountBreakdown, DiscountPolicy, FeeRecord, Money,
    PaymentReceipt, Period, SessionHistoryEntry, Student,
};

use super::{
    check_source_versions, claim_existing, duplicate_record, AllocationCommit, IdempotencyClaim,
    IdempotencyRecord, IdempotencyStatus, LedgerStore, PromotionCommit, StoreError,
};

const SESSION_COLUMNS: &str = "id, tenant_id, name, start_date, end_date, is_active, is_current, \
     is_locked, locked_modules, created_at";

const STUDENT_COLUMNS: &str = "id, tenant_id, name, current_session_id, class_id, section_id, roll_no, \
     monthly_fee, is_active, family_id, sibling_position, is_staff_child, category_tags, \
     session_history, version, created_at";

const POLICY_COLUMNS: &str = "id, tenant_id, name, kind, mode, magnitude, min_sibling_position, \
     category_tag, priority, is_active";

const RECORD_COLUMNS: &str = "id, tenant_id, student_id, session_id, period_key, fee_type, tuition_fee, \
     other_charges, arrears, opening_balance, concession, discount, original_amount, gross_amount, \
     final_amount, paid_amount, balance, status, is_opening_entry, is_placeholder, waived, due_date, \
     remarks, version, created_at, updated_at";

/// Postgres unique_violation
const UNIQUE_VIOLATION: &str = "23505";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(UNIQUE_VIOLATION),
        _ => false,
    }
}

fn corrupt(what: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt(what.to_string())
}

// =========================================================================
// Row mappings
// =========================================================================

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    start_date: NaiveDate,
    end_date: NaiveDate,
    is_active: bool,
    is_current: bool,
    is_locked: bool,
    locked_modules: Vec<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for AcademicSession {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let locked_modules = row
            .locked_modules
            .iter()
            .map(|m| m.parse().map_err(corrupt))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(AcademicSession {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            start_date: row.start_date,
            end_date: row.end_date,
            is_active: row.is_active,
            is_current: row.is_current,
            is_locked: row.is_locked,
            locked_modules,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StudentRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    current_session_id: Uuid,
    class_id: String,
    section_id: Option<String>,
    roll_no: Option<String>,
    monthly_fee: Decimal,
    is_active: bool,
    family_id: Option<Uuid>,
    sibling_position: Option<i32>,
    is_staff_child: bool,
    category_tags: Vec<String>,
    session_history: Json<Vec<SessionHistoryEntry>>,
    version: i64,
    created_at: DateTime<Utc>,
}

impl From<StudentRow> for Student {
    fn from(row: StudentRow) -> Self {
        Student {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            current_session_id: row.current_session_id,
            class_id: row.class_id,
            section_id: row.section_id,
            roll_no: row.roll_no,
            monthly_fee: Money::new(row.monthly_fee),
            is_active: row.is_active,
            family_id: row.family_id,
            sibling_position: row.sibling_position.and_then(|p| u32::try_from(p).ok()),
            is_staff_child: row.is_staff_child,
            category_tags: row.category_tags,
            session_history: row.session_history.0,
            version: row.version,
            created_at: row.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PolicyRow {
    id: Uuid,
    tenant_id: Uuid,
    name: String,
    kind: String,
    mode: String,
    magnitude: Decimal,
    min_sibling_position: Option<i32>,
    category_tag: Option<String>,
    priority: i32,
    is_active: bool,
}

impl TryFrom<PolicyRow> for DiscountPolicy {
    type Error = StoreError;

    fn try_from(row: PolicyRow) -> Result<Self, Self::Error> {
        Ok(DiscountPolicy {
            id: row.id,
            tenant_id: row.tenant_id,
            name: row.name,
            kind: row.kind.parse().map_err(corrupt)?,
            mode: row.mode.parse().map_err(corrupt)?,
            magnitude: row.magnitude,
            min_sibling_position: row.min_sibling_position.and_then(|p| u32::try_from(p).ok()),
            category_tag: row.category_tag,
            priority: row.priority,
            is_active: row.is_active,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: Uuid,
    tenant_id: Uuid,
    student_id: Uuid,
    session_id: Uuid,
    period_key: String,
    fee_type: String,
    tuition_fee: Decimal,
    other_charges: Decimal,
    arrears: Decimal,
    opening_balance: Decimal,
    concession: Decimal,
    discount: Json<DiscountBreakdown>,
    original_amount: Decimal,
    gross_amount: Decimal,
    final_amount: Decimal,
    paid_amount: Decimal,
    balance: Decimal,
    status: String,
    is_opening_entry: bool,
    is_placeholder: bool,
    waived: bool,
    due_date: Option<NaiveDate>,
    remarks: Option<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for FeeRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        Ok(FeeRecord {
            id: row.id,
            tenant_id: row.tenant_id,
            student_id: row.student_id,
            session_id: row.session_id,
            period: row.period_key.parse::<Period>().map_err(corrupt)?,
            fee_type: row.fee_type.parse().map_err(corrupt)?,
            tuition_fee: Money::new(row.tuition_fee),
            other_charges: Money::new(row.other_charges),
            arrears: Money::new(row.arrears),
            opening_balance: Money::new(row.opening_balance),
            concession: Money::new(row.concession),
            discount: row.discount.0,
            original_amount: Money::new(row.original_amount),
            gross_amount: Money::new(row.gross_amount),
            final_amount: Money::new(row.final_amount),
            paid_amount: Money::new(row.paid_amount),
            balance: Money::new(row.balance),
            status: row.status.parse().map_err(corrupt)?,
            is_opening_entry: row.is_opening_entry,
            is_placeholder: row.is_placeholder,
            waived: row.waived,
            due_date: row.due_date,
            remarks: row.remarks,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    tenant_id: Uuid,
    student_id: Uuid,
    session_id: Uuid,
    period_key: String,
    amount: Decimal,
    received_by: String,
    received_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AllocationRow {
    payment_id: Uuid,
    record_id: Uuid,
    period_key: String,
    applied: Decimal,
    balance_after: Decimal,
}

const IDEMPOTENCY_COLUMNS: &str =
    "tenant_id, key, request_hash, status, response_body, processing_started_at, created_at";

#[derive(sqlx::FromRow)]
struct IdempotencyRow {
    tenant_id: Uuid,
    key: String,
    request_hash: String,
    status: String,
    response_body: Option<serde_json::Value>,
    processing_started_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<IdempotencyRow> for IdempotencyRecord {
    type Error = StoreError;

    fn try_from(row: IdempotencyRow) -> Result<Self, Self::Error> {
        Ok(IdempotencyRecord {
            tenant_id: row.tenant_id,
            key: row.key,
            request_hash: row.request_hash,
            status: row.status.parse()?,
            response_body: row.response_body,
            processing_started_at: row.processing_started_at,
            created_at: row.created_at,
        })
    }
}

async fn set_idempotency_status(
    conn: &mut PgConnection,
    tenant_id: Uuid,
    key: &str,
    status: IdempotencyStatus,
    response_body: Option<&serde_json::Value>,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE idempotency_keys SET status = $3, response_body = $4
        WHERE tenant_id = $1 AND key = $2
        "#,
    )
    .bind(tenant_id)
    .bind(key)
    .bind(status.as_str())
    .bind(response_body)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StoreError::Corrupt(format!("idempotency key {key} was never reserved")));
    }
    Ok(())
}

// =========================================================================
// Statement helpers shared by single writes and transactions
// =========================================================================

async fn insert_record_row(conn: &mut PgConnection, record: &FeeRecord) -> Result<FeeRecord, StoreError> {
    let mut stored = record.clone();
    stored.version = 1;

    let result = sqlx::query(
        r#"
        INSERT INTO fee_records (
            id, tenant_id, student_id, session_id, period_key, fee_type,
            tuition_fee, other_charges, arrears, opening_balance, concession, discount,
            original_amount, gross_amount, final_amount, paid_amount, balance, status,
            is_opening_entry, is_placeholder, waived, due_date, remarks,
            version, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13,
                $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24, $25, $26)
        "#,
    )
    .bind(stored.id)
    .bind(stored.tenant_id)
    .bind(stored.student_id)
    .bind(stored.session_id)
    .bind(stored.period.key())
    .bind(stored.fee_type.as_str())
    .bind(stored.tuition_fee.value())
    .bind(stored.other_charges.value())
    .bind(stored.arrears.value())
    .bind(stored.opening_balance.value())
    .bind(stored.concession.value())
    .bind(Json(&stored.discount))
    .bind(stored.original_amount.value())
    .bind(stored.gross_amount.value())
    .bind(stored.final_amount.value())
    .bind(stored.paid_amount.value())
    .bind(stored.balance.value())
    .bind(stored.status.as_str())
    .bind(stored.is_opening_entry)
    .bind(stored.is_placeholder)
    .bind(stored.waived)
    .bind(stored.due_date)
    .bind(&stored.remarks)
    .bind(stored.version)
    .bind(stored.created_at)
    .bind(stored.updated_at)
    .execute(&mut *conn)
    .await;

    match result {
        Ok(_) => Ok(stored),
        Err(e) if is_unique_violation(&e) => Err(duplicate_record(record)),
        Err(e) => Err(e.into()),
    }
}

async fn update_record_row(conn: &mut PgConnection, record: &FeeRecord) -> Result<FeeRecord, StoreError> {
    let result = sqlx::query(
        r#"
        UPDATE fee_records SET
            tuition_fee = $3, other_charges = $4, arrears = $5, opening_balance = $6,
            concession = $7, discount = $8, original_amount = $9, gross_amount = $10,
            final_amount = $11, paid_amount = $12, balance = $13, status = $14,
            is_placeholder = $15, waived = $16, due_date = $17, remarks = $18,
            updated_at = $19, version = version + 1
        WHERE id = $1 AND version = $2
        "#,
    )
    .bind(record.id)
    .bind(record.version)
    .bind(record.tuition_fee.value())
    .bind(record.other_charges.value())
    .bind(record.arrears.value())
    .bind(record.opening_balance.value())
    .bind(record.concession.value())
    .bind(Json(&record.discount))
    .bind(record.original_amount.value())
    .bind(record.gross_amount.value())
    .bind(record.final_amount.value())
    .bind(record.paid_amount.value())
    .bind(record.balance.value())
    .bind(record.status.as_str())
    .bind(record.is_placeholder)
    .bind(record.waived)
    .bind(record.due_date)
    .bind(&record.remarks)
    .bind(record.updated_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(missing_or_conflict(conn, "fee_records", "fee_record", record.id, record.version).await);
    }

    let mut stored = record.clone();
    stored.version += 1;
    Ok(stored)
}

/// Distinguish a stale version from a missing row after a conditional write
async fn missing_or_conflict(
    conn: &mut PgConnection,
    table: &'static str,
    entity: &'static str,
    id: Uuid,
    expected: i64,
) -> StoreError {
    let sql = format!("SELECT EXISTS (SELECT 1 FROM {table} WHERE id = $1)");
    match sqlx::query_scalar::<_, bool>(&sql).bind(id).fetch_one(&mut *conn).await {
        Ok(true) => StoreError::VersionConflict { entity, id, expected },
        Ok(false) => StoreError::NotFound { entity, id },
        Err(e) => e.into(),
    }
}

// =========================================================================
// PgLedgerStore
// =========================================================================

/// PostgreSQL-backed [`LedgerStore`]
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    /// Wrap an open connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }

    async fn get_session(&self, id: Uuid) -> Result<Option<AcademicSession>, StoreError> {
        let row: Option<SessionRow> =
            sqlx::query_as(&format!("SELECT {SESSION_COLUMNS} FROM academic_sessions WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(AcademicSession::try_from).transpose()
    }

    async fn current_session(&self, tenant_id: Uuid) -> Result<Option<AcademicSession>, StoreError> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM academic_sessions WHERE tenant_id = $1 AND is_current"
        ))
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(AcademicSession::try_from).transpose()
    }

    async fn list_sessions(&self, tenant_id: Uuid) -> Result<Vec<AcademicSession>, StoreError> {
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM academic_sessions WHERE tenant_id = $1 ORDER BY start_date"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AcademicSession::try_from).collect()
    }

    async fn save_session(&self, session: &AcademicSession) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        if session.is_current {
            sqlx::query("UPDATE academic_sessions SET is_current = FALSE WHERE tenant_id = $1 AND id <> $2")
                .bind(session.tenant_id)
                .bind(session.id)
                .execute(&mut *tx)
                .await?;
        }

        let modules: Vec<String> = session.locked_modules.iter().map(|m| m.as_str().to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO academic_sessions (
                id, tenant_id, name, start_date, end_date,
                is_active, is_current, is_locked, locked_modules, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                is_active = EXCLUDED.is_active,
                is_current = EXCLUDED.is_current,
                is_locked = EXCLUDED.is_locked,
                locked_modules = EXCLUDED.locked_modules
            "#,
        )
        .bind(session.id)
        .bind(session.tenant_id)
        .bind(&session.name)
        .bind(session.start_date)
        .bind(session.end_date)
        .bind(session.is_active)
        .bind(session.is_current)
        .bind(session.is_locked)
        .bind(&modules)
        .bind(session.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_student(&self, id: Uuid) -> Result<Option<Student>, StoreError> {
        let row: Option<StudentRow> =
            sqlx::query_as(&format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Student::from))
    }

    async fn list_students(
        &self,
        tenant_id: Uuid,
        class_id: &str,
        section_id: Option<&str>,
    ) -> Result<Vec<Student>, StoreError> {
        let rows: Vec<StudentRow> = sqlx::query_as(&format!(
            "SELECT {STUDENT_COLUMNS} FROM students \
             WHERE tenant_id = $1 AND class_id = $2 AND ($3::TEXT IS NULL OR section_id = $3) \
             ORDER BY name, id"
        ))
        .bind(tenant_id)
        .bind(class_id)
        .bind(section_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Student::from).collect())
    }

    async fn save_student(&self, student: &Student) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO students (
                id, tenant_id, name, current_session_id, class_id, section_id, roll_no,
                monthly_fee, is_active, family_id, sibling_position, is_staff_child,
                category_tags, session_history, version, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 1, $15)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                current_session_id = EXCLUDED.current_session_id,
                class_id = EXCLUDED.class_id,
                section_id = EXCLUDED.section_id,
                roll_no = EXCLUDED.roll_no,
                monthly_fee = EXCLUDED.monthly_fee,
                is_active = EXCLUDED.is_active,
                family_id = EXCLUDED.family_id,
                sibling_position = EXCLUDED.sibling_position,
                is_staff_child = EXCLUDED.is_staff_child,
                category_tags = EXCLUDED.category_tags,
                session_history = EXCLUDED.session_history,
                version = students.version + 1
            "#,
        )
        .bind(student.id)
        .bind(student.tenant_id)
        .bind(&student.name)
        .bind(student.current_session_id)
        .bind(&student.class_id)
        .bind(&student.section_id)
        .bind(&student.roll_no)
        .bind(student.monthly_fee.value())
        .bind(student.is_active)
        .bind(student.family_id)
        .bind(student.sibling_position.map(|p| p as i32))
        .bind(student.is_staff_child)
        .bind(&student.category_tags)
        .bind(Json(&student.session_history))
        .bind(student.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_active_policies(&self, tenant_id: Uuid) -> Result<Vec<DiscountPolicy>, StoreError> {
        let rows: Vec<PolicyRow> = sqlx::query_as(&format!(
            "SELECT {POLICY_COLUMNS} FROM discount_policies WHERE tenant_id = $1 AND is_active"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DiscountPolicy::try_from).collect()
    }

    async fn save_policy(&self, policy: &DiscountPolicy) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO discount_policies (
                id, tenant_id, name, kind, mode, magnitude,
                min_sibling_position, category_tag, priority, is_active
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                kind = EXCLUDED.kind,
                mode = EXCLUDED.mode,
                magnitude = EXCLUDED.magnitude,
                min_sibling_position = EXCLUDED.min_sibling_position,
                category_tag = EXCLUDED.category_tag,
                priority = EXCLUDED.priority,
                is_active = EXCLUDED.is_active
            "#,
        )
        .bind(policy.id)
        .bind(policy.tenant_id)
        .bind(&policy.name)
        .bind(policy.kind.as_str())
        .bind(policy.mode.as_str())
        .bind(policy.magnitude)
        .bind(policy.min_sibling_position.map(|p| p as i32))
        .bind(&policy.category_tag)
        .bind(policy.priority)
        .bind(policy.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_record(&self, id: Uuid) -> Result<Option<FeeRecord>, StoreError> {
        let row: Option<RecordRow> =
            sqlx::query_as(&format!("SELECT {RECORD_COLUMNS} FROM fee_records WHERE id = $1"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(FeeRecord::try_from).transpose()
    }

    async fn find_record(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        session_id: Uuid,
        period: Period,
    ) -> Result<Option<FeeRecord>, StoreError> {
        let row: Option<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM fee_records \
             WHERE tenant_id = $1 AND student_id = $2 AND session_id = $3 AND period_key = $4 \
             AND NOT is_opening_entry"
        ))
        .bind(tenant_id)
        .bind(student_id)
        .bind(session_id)
        .bind(period.key())
        .fetch_optional(&self.pool)
        .await?;
        row.map(FeeRecord::try_from).transpose()
    }

    async fn list_student_records(
        &self,
        tenant_id: Uuid,
        student_id: Uuid,
        session_id: Option<Uuid>,
    ) -> Result<Vec<FeeRecord>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "SELECT {RECORD_COLUMNS} FROM fee_records \
             WHERE tenant_id = $1 AND student_id = $2 AND ($3::UUID IS NULL OR session_id = $3) \
             ORDER BY created_at, period_key, id"
        ))
        .bind(tenant_id)
        .bind(student_id)
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(FeeRecord::try_from).collect()
    }

    async fn insert_record(&self, record: &FeeRecord) -> Result<FeeRecord, StoreError> {
        let mut conn = self.pool.acquire().await?;
        insert_record_row(&mut conn, record).await
    }

    async fn update_record(&self, record: &FeeRecord) -> Result<FeeRecord, StoreError> {
        let mut conn = self.pool.acquire().await?;
        update_record_row(&mut conn, record).await
    }

    async fn delete_record(&self, record: &FeeRecord) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query("DELETE FROM fee_records WHERE id = $1 AND version = $2")
            .bind(record.id)
            .bind(record.version)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(missing_or_conflict(&mut conn, "fee_records", "fee_record", record.id, record.version).await);
        }
        Ok(())
    }

    async fn commit_allocation(&self, commit: AllocationCommit) -> Result<Vec<FeeRecord>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let receipt = &commit.receipt;

        // Holds off a concurrent promotion until this commit is done
        let enrolled: Option<(Uuid,)> =
            sqlx::query_as("SELECT current_session_id FROM students WHERE id = $1 FOR SHARE")
                .bind(receipt.student_id)
                .fetch_optional(&mut *tx)
                .await?;
        match enrolled {
            None => {
                return Err(StoreError::NotFound {
                    entity: "student",
                    id: receipt.student_id,
                })
            }
            Some((current,)) if current != receipt.session_id => {
                return Err(StoreError::NotEnrolled {
                    student_id: receipt.student_id,
                    session_id: receipt.session_id,
                })
            }
            Some(_) => {}
        }

        let mut written = Vec::with_capacity(commit.inserts.len() + commit.updates.len());

        for record in &commit.inserts {
            written.push(insert_record_row(&mut tx, record).await?);
        }
        for record in &commit.updates {
            written.push(update_record_row(&mut tx, record).await?);
        }

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, tenant_id, student_id, session_id, period_key, amount, received_by, received_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(receipt.payment_id)
        .bind(receipt.tenant_id)
        .bind(receipt.student_id)
        .bind(receipt.session_id)
        .bind(receipt.period.key())
        .bind(receipt.amount.value())
        .bind(&receipt.received_by)
        .bind(receipt.received_at)
        .execute(&mut *tx)
        .await?;

        for (line_no, line) in receipt.allocations.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO payment_allocations (
                    payment_id, line_no, record_id, period_key, applied, balance_after
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(receipt.payment_id)
            .bind(line_no as i32)
            .bind(line.record_id)
            .bind(line.period.key())
            .bind(line.applied.value())
            .bind(line.balance_after.value())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn commit_promotion(&self, commit: PromotionCommit) -> Result<Student, StoreError> {
        let mut tx = self.pool.begin().await?;
        let student = commit.student;

        let result = sqlx::query(
            r#"
            UPDATE students SET
                current_session_id = $3, class_id = $4, section_id = $5, roll_no = $6,
                session_history = $7, version = version + 1
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(student.id)
        .bind(student.version)
        .bind(student.current_session_id)
        .bind(&student.class_id)
        .bind(&student.section_id)
        .bind(&student.roll_no)
        .bind(Json(&student.session_history))
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(missing_or_conflict(&mut tx, "students", "student", student.id, student.version).await);
        }

        let current: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT id, version FROM fee_records
            WHERE tenant_id = $1 AND student_id = $2 AND session_id = $3
            FOR UPDATE
            "#,
        )
        .bind(student.tenant_id)
        .bind(student.id)
        .bind(commit.from_session_id)
        .fetch_all(&mut *tx)
        .await?;
        check_source_versions(&commit.source_versions, current)?;

        if let Some(opening) = &commit.opening_entry {
            insert_record_row(&mut tx, opening).await?;
        }

        tx.commit().await?;

        let mut stored = student;
        stored.version += 1;
        Ok(stored)
    }

    async fn list_receipts(&self, tenant_id: Uuid, student_id: Uuid) -> Result<Vec<PaymentReceipt>, StoreError> {
        let payments: Vec<PaymentRow> = sqlx::query_as(
            r#"
            SELECT id, tenant_id, student_id, session_id, period_key, amount, received_by, received_at
            FROM payments
            WHERE tenant_id = $1 AND student_id = $2
            ORDER BY received_at
            "#,
        )
        .bind(tenant_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await?;

        let ids: Vec<Uuid> = payments.iter().map(|p| p.id).collect();
        let lines: Vec<AllocationRow> = sqlx::query_as(
            r#"
            SELECT payment_id, record_id, period_key, applied, balance_after
            FROM payment_allocations
            WHERE payment_id = ANY($1)
            ORDER BY payment_id, line_no
            "#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        payments
            .into_iter()
            .map(|p| -> Result<PaymentReceipt, StoreError> {
                let allocations = lines
                    .iter()
                    .filter(|l| l.payment_id == p.id)
                    .map(|l| -> Result<AllocationLine, StoreError> {
                        Ok(AllocationLine {
                            record_id: l.record_id,
                            period: l.period_key.parse().map_err(corrupt)?,
                            applied: Money::new(l.applied),
                            balance_after: Money::new(l.balance_after),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(PaymentReceipt {
                    payment_id: p.id,
                    tenant_id: p.tenant_id,
                    student_id: p.student_id,
                    session_id: p.session_id,
                    period: p.period_key.parse().map_err(corrupt)?,
                    amount: Money::new(p.amount),
                    allocations,
                    received_by: p.received_by,
                    received_at: p.received_at,
                })
            })
            .collect()
    }

    async fn get_idempotency(&self, tenant_id: Uuid, key: &str) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row: Option<IdempotencyRow> = sqlx::query_as(&format!(
            "SELECT {IDEMPOTENCY_COLUMNS} FROM idempotency_keys WHERE tenant_id = $1 AND key = $2"
        ))
        .bind(tenant_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(IdempotencyRecord::try_from).transpose()
    }

    async fn start_idempotent(
        &self,
        tenant_id: Uuid,
        key: &str,
        request_hash: &str,
    ) -> Result<IdempotencyClaim, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO idempotency_keys (tenant_id, key, request_hash, status)
            VALUES ($1, $2, $3, 'processing')
            ON CONFLICT (tenant_id, key) DO NOTHING
            "#,
        )
        .bind(tenant_id)
        .bind(key)
        .bind(request_hash)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 1 {
            tx.commit().await?;
            return Ok(IdempotencyClaim::Started);
        }

        let row: IdempotencyRow = sqlx::query_as(&format!(
            "SELECT {IDEMPOTENCY_COLUMNS} FROM idempotency_keys WHERE tenant_id = $1 AND key = $2 FOR UPDATE"
        ))
        .bind(tenant_id)
        .bind(key)
        .fetch_one(&mut *tx)
        .await?;
        let existing = IdempotencyRecord::try_from(row)?;

        let claim = claim_existing(&existing, request_hash, Utc::now());
        if claim == IdempotencyClaim::Started {
            sqlx::query(
                r#"
                UPDATE idempotency_keys
                SET status = 'processing', response_body = NULL, processing_started_at = NOW()
                WHERE tenant_id = $1 AND key = $2
                "#,
            )
            .bind(tenant_id)
            .bind(key)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(claim)
    }

    async fn complete_idempotent(
        &self,
        tenant_id: Uuid,
        key: &str,
        response_body: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        set_idempotency_status(&mut conn, tenant_id, key, IdempotencyStatus::Completed, Some(response_body)).await
    }

    async fn fail_idempotent(&self, tenant_id: Uuid, key: &str) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        set_idempotency_status(&mut conn, tenant_id, key, IdempotencyStatus::Failed, None).await
    }
}
