//! REST API server example for the seller ledger.
//!
//! Run with: `cargo run --example server`
//!
//! The seller endpoints identify the caller with an `x-seller-id` header and
//! the admin endpoints with `x-admin-id`; a real deployment puts
//! authentication in front of both.
//!
//! # Example Requests
//!
//! ```bash
//! # Record a paid order (normally done by the checkout service)
//! curl -X POST http://localhost:3000/internal/sales \
//!   -H "Content-Type: application/json" \
//!   -d '{"seller_id": 1, "order_id": "order-1", "amount": "100.00"}'
//!
//! # Credit available balance directly
//! curl -X POST http://localhost:3000/admin/sellers/1/adjustments \
//!   -H "x-admin-id: 9" -H "Content-Type: application/json" \
//!   -d '{"amount": "50.00", "reason": "opening balance"}'
//!
//! # Seller balance and journal
//! curl -H "x-seller-id: 1" http://localhost:3000/seller/balance
//! curl -H "x-seller-id: 1" "http://localhost:3000/seller/transactions?limit=10&offset=0"
//!
//! # Request a withdrawal
//! curl -X POST http://localhost:3000/seller/withdrawals/request \
//!   -H "x-seller-id: 1" -H "Content-Type: application/json" \
//!   -d '{"amount": "50.00", "bank_info": {"account_type": "pix", "pix_key": "a@b.co", "pix_key_type": "email"}}'
//!
//! # Approve, skip the delay, and pay it out
//! curl -X POST -H "x-admin-id: 9" http://localhost:3000/admin/withdrawals/1/approve
//! curl -X POST http://localhost:3000/admin/withdrawals/1/anticipate \
//!   -H "x-admin-id: 9" -H "Content-Type: application/json" \
//!   -d '{"reason": "seller payroll is due today"}'
//! curl -X POST -H "x-admin-id: 9" http://localhost:3000/admin/withdrawals/1/process
//! ```

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rust_decimal::Decimal;
use seller_ledger::{
    AdminId, BalanceReleaseScheduler, BankInfo, ErrorKind, Ledger, LedgerConfig, LedgerError,
    MemoryStore, MemoryWithdrawalStore, OrderId, PaymentProvider, ProviderError, SellerBalance,
    SellerId, SystemClock, Transaction, Transfer, TransferRequest, TransferStatus, Withdrawal,
    WithdrawalError, WithdrawalId, WithdrawalReleaseScheduler, WithdrawalStatus,
    WithdrawalWorkflow,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

// === Request/Response DTOs ===

#[derive(Debug, Deserialize)]
pub struct SaleRequest {
    pub seller_id: u32,
    pub order_id: String,
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdjustmentRequest {
    pub amount: Decimal,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequest {
    pub amount: Decimal,
    pub bank_info: BankInfo,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub status: Option<WithdrawalStatus>,
}

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

// === Application State ===

/// Shared application state containing the ledger and the workflow.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub workflow: Arc<WithdrawalWorkflow>,
}

/// Pretends every transfer settled instantly.
struct DemoProvider {
    next: AtomicU64,
}

#[async_trait]
impl PaymentProvider for DemoProvider {
    async fn create_transfer(&self, request: TransferRequest) -> Result<Transfer, ProviderError> {
        let id = format!("demo-{}", self.next.fetch_add(1, Ordering::SeqCst));
        info!(transfer = %id, amount = %request.amount, "demo transfer sent");
        Ok(Transfer {
            id,
            status: TransferStatus::Succeeded,
            destination: request.bank_info.masked(),
        })
    }
}

// === Error Handling ===

/// Wrapper for converting ledger and workflow errors into HTTP responses.
pub enum AppError {
    Ledger(LedgerError),
    Withdrawal(WithdrawalError),
    MissingIdentity(&'static str),
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        AppError::Ledger(err)
    }
}

impl From<WithdrawalError> for AppError {
    fn from(err: WithdrawalError) -> Self {
        AppError::Withdrawal(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (kind, message) = match &self {
            AppError::Ledger(e) => (e.kind(), e.to_string()),
            AppError::Withdrawal(e) => (e.kind(), e.to_string()),
            AppError::MissingIdentity(header) => {
                return (
                    StatusCode::UNAUTHORIZED,
                    Json(ErrorResponse {
                        error: format!("missing or invalid {header} header"),
                        code: "UNAUTHENTICATED".to_string(),
                    }),
                )
                    .into_response();
            }
        };
        let (status, code) = match kind {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "VALIDATION"),
            ErrorKind::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ErrorKind::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };

        (
            status,
            Json(ErrorResponse {
                error: message,
                code: code.to_string(),
            }),
        )
            .into_response()
    }
}

fn seller(headers: &HeaderMap) -> Result<SellerId, AppError> {
    header_id(headers, "x-seller-id").map(SellerId).ok_or(AppError::MissingIdentity("x-seller-id"))
}

fn admin(headers: &HeaderMap) -> Result<AdminId, AppError> {
    header_id(headers, "x-admin-id").map(AdminId).ok_or(AppError::MissingIdentity("x-admin-id"))
}

fn header_id(headers: &HeaderMap, name: &str) -> Option<u32> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

// === Seller Handlers ===

/// GET /seller/balance
async fn get_balance(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SellerBalance>, AppError> {
    let seller_id = seller(&headers)?;
    Ok(Json(state.ledger.get_or_create_balance(seller_id)))
}

/// GET /seller/transactions?limit=&offset=
async fn get_transactions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<Transaction>>, AppError> {
    let seller_id = seller(&headers)?;
    Ok(Json(
        state
            .ledger
            .get_transactions(seller_id, page.limit.min(500), page.offset),
    ))
}

/// POST /seller/withdrawals/request
async fn request_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<WithdrawalRequest>,
) -> Result<(StatusCode, Json<Withdrawal>), AppError> {
    let seller_id = seller(&headers)?;
    let withdrawal = state
        .workflow
        .request_withdrawal(seller_id, request.amount, request.bank_info)?;
    Ok((StatusCode::CREATED, Json(withdrawal)))
}

/// GET /seller/withdrawals
async fn list_seller_withdrawals(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Withdrawal>>, AppError> {
    let seller_id = seller(&headers)?;
    Ok(Json(state.workflow.list_for_seller(seller_id)))
}

/// POST /seller/withdrawals/{id}/cancel
async fn cancel_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    body: Option<Json<ReasonRequest>>,
) -> Result<Json<Withdrawal>, AppError> {
    let seller_id = seller(&headers)?;
    let Json(body) = body.unwrap_or_default();
    Ok(Json(state.workflow.cancel_withdrawal(
        WithdrawalId(id),
        body.reason.as_deref(),
        seller_id,
    )?))
}

// === Admin Handlers ===

/// GET /admin/withdrawals?status=
async fn list_withdrawals(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Json<Vec<Withdrawal>> {
    Json(state.workflow.list(query.status))
}

/// POST /admin/withdrawals/{id}/approve
async fn approve_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Json<Withdrawal>, AppError> {
    let admin_id = admin(&headers)?;
    Ok(Json(state.workflow.approve_withdrawal(WithdrawalId(id), admin_id)?))
}

/// POST /admin/withdrawals/{id}/reject
async fn reject_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
    Json(body): Json<ReasonRequest>,
) -> Result<Json<Withdrawal>, AppError> {
    let admin_id = admin(&headers)?;
    let reason = body.reason.unwrap_or_default();
    Ok(Json(state.workflow.reject_withdrawal(WithdrawalId(id), admin_id, &reason)?))
}

/// POST /admin/withdrawals/{id}/anticipate
async fn anticipate_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(id): Path<u64>,
    Json(body): Json<ReasonRequest>,
) -> Result<Json<Withdrawal>, AppError> {
    let admin_id = admin(&headers)?;
    let reason = body.reason.unwrap_or_default();
    let ip = addr.ip().to_string();
    Ok(Json(state.workflow.anticipate_withdrawal(
        WithdrawalId(id),
        admin_id,
        &reason,
        Some(&ip),
    )?))
}

/// POST /admin/withdrawals/{id}/process
async fn process_withdrawal(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u64>,
) -> Result<Json<Withdrawal>, AppError> {
    let admin_id = admin(&headers)?;
    Ok(Json(
        state
            .workflow
            .process_withdrawal(WithdrawalId(id), admin_id)
            .await?,
    ))
}

/// POST /admin/sellers/{id}/adjustments
async fn manual_adjustment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<u32>,
    Json(body): Json<AdjustmentRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let admin_id = admin(&headers)?;
    let transaction =
        state
            .ledger
            .manual_adjustment(SellerId(id), body.amount, &body.reason, admin_id)?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

// === Internal Handlers ===

/// POST /internal/sales
async fn credit_sale(
    State(state): State<AppState>,
    Json(body): Json<SaleRequest>,
) -> Result<(StatusCode, Json<Transaction>), AppError> {
    let transaction = state.ledger.credit_sale(
        SellerId(body.seller_id),
        body.amount,
        OrderId(body.order_id),
        body.description.as_deref(),
    )?;
    Ok((StatusCode::CREATED, Json(transaction)))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/seller/balance", get(get_balance))
        .route("/seller/transactions", get(get_transactions))
        .route("/seller/withdrawals", get(list_seller_withdrawals))
        .route("/seller/withdrawals/request", post(request_withdrawal))
        .route("/seller/withdrawals/{id}/cancel", post(cancel_withdrawal))
        .route("/admin/withdrawals", get(list_withdrawals))
        .route("/admin/withdrawals/{id}/approve", post(approve_withdrawal))
        .route("/admin/withdrawals/{id}/reject", post(reject_withdrawal))
        .route("/admin/withdrawals/{id}/anticipate", post(anticipate_withdrawal))
        .route("/admin/withdrawals/{id}/process", post(process_withdrawal))
        .route("/admin/sellers/{id}/adjustments", post(manual_adjustment))
        .route("/internal/sales", post(credit_sale))
        .with_state(state)
}

// === Main ===

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = LedgerConfig::from_env().unwrap_or_else(|e| e.exit());
    let ledger = Arc::new(Ledger::new(
        Arc::new(MemoryStore::new()),
        Arc::new(SystemClock),
        config,
    ));
    let workflow = Arc::new(WithdrawalWorkflow::new(
        ledger.clone(),
        Arc::new(MemoryWithdrawalStore::new()),
        Arc::new(DemoProvider {
            next: AtomicU64::new(1),
        }),
    ));

    BalanceReleaseScheduler::new(ledger.clone()).spawn();
    WithdrawalReleaseScheduler::new(workflow.clone()).spawn();

    let app = create_router(AppState { ledger, workflow });

    let listener = TcpListener::bind("127.0.0.1:3000").await.unwrap();
    println!("Seller ledger API server running on http://127.0.0.1:3000");
    println!();
    println!("Endpoints:");
    println!("  GET  /seller/balance                      - Current balance");
    println!("  GET  /seller/transactions                 - Journal, newest first");
    println!("  GET  /seller/withdrawals                  - Own withdrawals");
    println!("  POST /seller/withdrawals/request          - Request a withdrawal");
    println!("  POST /seller/withdrawals/:id/cancel       - Cancel a pending withdrawal");
    println!("  GET  /admin/withdrawals                   - All withdrawals (?status=)");
    println!("  POST /admin/withdrawals/:id/approve       - Approve");
    println!("  POST /admin/withdrawals/:id/reject        - Reject");
    println!("  POST /admin/withdrawals/:id/anticipate    - Skip the delay");
    println!("  POST /admin/withdrawals/:id/process       - Pay out");
    println!("  POST /admin/sellers/:id/adjustments       - Manual adjustment");
    println!("  POST /internal/sales                      - Record a paid order");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}
