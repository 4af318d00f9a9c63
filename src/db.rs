//! Database module
//!
//! Schema verification and migrations for the PostgreSQL store.

use sqlx::PgPool;

/// Tables the ledger store reads and writes
const REQUIRED_TABLES: &[&str] = &[
    "academic_sessions",
    "students",
    "discount_policies",
    "fee_records",
    "payments",
    "payment_allocations",
    "idempotency_keys",
];

/// Apply the bundled migrations
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Check if required tables exist
pub async fn check_schema(pool: &PgPool) -> Result<bool, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(*table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(false);
        }
    }

    tracing::info!(tables = REQUIRED_TABLES.len(), "Schema verified");
    Ok(true)
}
