//! API Routes
//!
//! HTTP endpoint definitions. Every route runs under the caller's
//! [`TenantContext`], attached by the tenant middleware.

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::{AcademicSession, FeeRecord, FeeType, PaymentReceipt, TenantContext};
use crate::error::AppError;
use crate::handlers::{
    AddChargeCommand, ApplyDiscountCommand, CollectPaymentsCommand, CreateChargeCommand,
    FeeGenerationHandler, GenerateFeesCommand, GenerationResult, LedgerQueryHandler,
    PaymentHandler, PromoteStudentsCommand, PromotionHandler, PromotionResult,
    RecordAdjustmentHandler, SaveSessionCommand, SessionHandler, VoucherView, WaiveCommand,
};
use crate::store::IdempotencyClaim;

use super::AppState;

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

// =========================================================================
// Request types
// =========================================================================

#[derive(Debug, Deserialize)]
pub struct DiscountRequest {
    pub manual_discount: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddChargeRequest {
    pub amount: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateChargeRequest {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub period: String,
    pub fee_type: FeeType,
    pub amount: String,
    #[serde(default)]
    pub remarks: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct WaiveRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct LockRequest {
    /// Empty locks or unlocks the whole session
    #[serde(default)]
    pub modules: Vec<String>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        // Batch operations
        .route("/fees/generate", post(generate_fees))
        .route("/payments", post(collect_payments))
        .route("/promotions", post(promote_students))
        // Student views
        .route("/students/:student_id/ledger", get(get_ledger))
        .route("/students/:student_id/voucher/:period", get(get_voucher))
        .route("/students/:student_id/payments", get(get_payments))
        .route("/students/:student_id/charges", post(create_charge))
        // Record adjustments
        .route("/records/:record_id/discount", post(apply_discount))
        .route("/records/:record_id/charges", post(add_charge))
        .route("/records/:record_id/waive", post(waive_record))
        .route("/records/:record_id", delete(void_record))
        // Session registry
        .route("/sessions", get(list_sessions).post(save_session))
        .route("/sessions/:session_id/current", post(set_current_session))
        .route("/sessions/:session_id/lock", post(lock_session))
        .route("/sessions/:session_id/unlock", post(unlock_session))
}

// =========================================================================
// POST /fees/generate
// =========================================================================

async fn generate_fees(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Json(command): Json<GenerateFeesCommand>,
) -> Result<Json<GenerationResult>, AppError> {
    let handler = FeeGenerationHandler::new(state.store.clone());
    let result = handler.execute(command, &context, state.batch_options()).await?;
    Ok(Json(result))
}

// =========================================================================
// POST /payments
// =========================================================================

/// Collect a payment batch. With an `Idempotency-Key` header the key is
/// reserved before any money moves: a retry with the same body replays
/// the first result, and a duplicate arriving while the first is still
/// running gets 409 `idempotency_in_progress`.
async fn collect_payments(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let command: CollectPaymentsCommand = serde_json::from_slice(&body)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid payment batch: {}", e)))?;

    let idem_key = headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let Some(key) = idem_key else {
        return run_payment_batch(&state, command, &context).await.map(Json);
    };

    let request_hash = compute_request_hash(&body);
    match state.store.start_idempotent(context.tenant_id, &key, &request_hash).await? {
        IdempotencyClaim::Started => {}
        IdempotencyClaim::Replay(response_body) => {
            tracing::info!(tenant_id = %context.tenant_id, key = %key, "Replaying idempotent payment batch");
            return Ok(Json(response_body));
        }
        IdempotencyClaim::InProgress => return Err(AppError::IdempotencyInProgress),
        IdempotencyClaim::HashMismatch => return Err(AppError::IdempotencyConflict),
    }

    match run_payment_batch(&state, command, &context).await {
        Ok(response_body) => {
            state
                .store
                .complete_idempotent(context.tenant_id, &key, &response_body)
                .await?;
            Ok(Json(response_body))
        }
        Err(e) => {
            // Release the key so the client can retry
            if let Err(release) = state.store.fail_idempotent(context.tenant_id, &key).await {
                tracing::error!(
                    tenant_id = %context.tenant_id,
                    key = %key,
                    error = %release,
                    "Failed to release idempotency key"
                );
            }
            Err(e)
        }
    }
}

async fn run_payment_batch(
    state: &AppState,
    command: CollectPaymentsCommand,
    context: &TenantContext,
) -> Result<serde_json::Value, AppError> {
    let handler = PaymentHandler::new(state.store.clone());
    let result = handler.execute(command, context, state.batch_options()).await?;
    serde_json::to_value(&result).map_err(|e| AppError::Internal(format!("Failed to encode result: {}", e)))
}

/// SHA-256 of the request body, hex encoded
pub fn compute_request_hash(body: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

// =========================================================================
// POST /promotions
// =========================================================================

async fn promote_students(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Json(command): Json<PromoteStudentsCommand>,
) -> Result<Json<PromotionResult>, AppError> {
    let handler = PromotionHandler::new(state.store.clone());
    let result = handler.execute(command, &context, state.batch_options()).await?;
    Ok(Json(result))
}

// =========================================================================
// Student views
// =========================================================================

async fn get_ledger(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(student_id): Path<Uuid>,
) -> Result<Json<Vec<FeeRecord>>, AppError> {
    let records = LedgerQueryHandler::new(state.store.clone())
        .get_ledger(student_id, &context)
        .await?;
    Ok(Json(records))
}

#[derive(Debug, Deserialize)]
struct VoucherQuery {
    session_id: Option<Uuid>,
}

async fn get_voucher(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path((student_id, period)): Path<(Uuid, String)>,
    Query(query): Query<VoucherQuery>,
) -> Result<Json<VoucherView>, AppError> {
    let voucher = LedgerQueryHandler::new(state.store.clone())
        .get_voucher(student_id, &period, query.session_id, &context)
        .await?;
    Ok(Json(voucher))
}

async fn get_payments(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(student_id): Path<Uuid>,
) -> Result<Json<Vec<PaymentReceipt>>, AppError> {
    let receipts = LedgerQueryHandler::new(state.store.clone())
        .get_payments(student_id, &context)
        .await?;
    Ok(Json(receipts))
}

async fn create_charge(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(student_id): Path<Uuid>,
    Json(request): Json<CreateChargeRequest>,
) -> Result<(StatusCode, Json<FeeRecord>), AppError> {
    let mut command = CreateChargeCommand::new(student_id, request.period, request.fee_type, request.amount);
    command.session_id = request.session_id;
    command.remarks = request.remarks;

    let record = RecordAdjustmentHandler::new(state.store.clone())
        .create_charge(command, &context)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

// =========================================================================
// Record adjustments
// =========================================================================

async fn apply_discount(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(record_id): Path<Uuid>,
    Json(request): Json<DiscountRequest>,
) -> Result<Json<FeeRecord>, AppError> {
    let command = ApplyDiscountCommand::new(record_id, request.manual_discount);
    let command = match request.reason {
        Some(reason) => command.with_reason(reason),
        None => command,
    };

    let record = RecordAdjustmentHandler::new(state.store.clone())
        .apply_discount(command, &context)
        .await?;
    Ok(Json(record))
}

async fn add_charge(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(record_id): Path<Uuid>,
    Json(request): Json<AddChargeRequest>,
) -> Result<Json<FeeRecord>, AppError> {
    let mut command = AddChargeCommand::new(record_id, request.amount);
    command.reason = request.reason;

    let record = RecordAdjustmentHandler::new(state.store.clone())
        .add_charge(command, &context)
        .await?;
    Ok(Json(record))
}

async fn waive_record(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(record_id): Path<Uuid>,
    Json(request): Json<WaiveRequest>,
) -> Result<Json<FeeRecord>, AppError> {
    let record = RecordAdjustmentHandler::new(state.store.clone())
        .waive(WaiveCommand::new(record_id, request.reason), &context)
        .await?;
    Ok(Json(record))
}

async fn void_record(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(record_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    RecordAdjustmentHandler::new(state.store.clone())
        .void(record_id, &context)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// =========================================================================
// Session registry
// =========================================================================

async fn list_sessions(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
) -> Result<Json<Vec<AcademicSession>>, AppError> {
    let sessions = SessionHandler::new(state.store.clone()).list(&context).await?;
    Ok(Json(sessions))
}

async fn save_session(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Json(command): Json<SaveSessionCommand>,
) -> Result<(StatusCode, Json<AcademicSession>), AppError> {
    let session = SessionHandler::new(state.store.clone())
        .save(command, &context)
        .await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn set_current_session(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(session_id): Path<Uuid>,
) -> Result<Json<AcademicSession>, AppError> {
    let session = SessionHandler::new(state.store.clone())
        .set_current(session_id, &context)
        .await?;
    Ok(Json(session))
}

async fn lock_session(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<LockRequest>,
) -> Result<Json<AcademicSession>, AppError> {
    let session = SessionHandler::new(state.store.clone())
        .lock(session_id, &request.modules, &context)
        .await?;
    Ok(Json(session))
}

async fn unlock_session(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<LockRequest>,
) -> Result<Json<AcademicSession>, AppError> {
    let session = SessionHandler::new(state.store.clone())
        .unlock(session_id, &request.modules, &context)
        .await?;
    Ok(Json(session))
}
