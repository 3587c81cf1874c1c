use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use shared::*;
use std::sync::Arc;
use uuid::Uuid;

use crate::availability::AvailabilityChecker;
use crate::engine::{CheckoutOutcome, ReservationEngine};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ReservationEngine>,
    pub checker: AvailabilityChecker,
}

impl AppState {
    pub fn new(engine: Arc<ReservationEngine>) -> Self {
        let checker = AvailabilityChecker::new(engine.store());
        Self { engine, checker }
    }
}

#[derive(Debug, Deserialize)]
pub struct CheckStockRequest {
    pub items: Vec<CartItemRef>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReservationRequest {
    #[serde(flatten)]
    pub target: TargetRef,
    pub quantity: i32,
    #[serde(flatten)]
    pub holder: HolderRef,
    pub expires_in_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub order_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CartReserveRequest {
    pub items: Vec<CartItemRef>,
    #[serde(flatten)]
    pub holder: HolderRef,
}

#[derive(Debug, Deserialize)]
pub struct CartCompleteRequest {
    pub reservation_ids: Vec<Uuid>,
    pub order_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CartReleaseRequest {
    pub reservation_ids: Vec<Uuid>,
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AvailableStockResponse {
    pub available: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReservationResponse {
    pub reservation_id: Uuid,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CartReservationResponse {
    pub reservation_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExpireResponse {
    pub expired: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn error_response(err: ReservationError) -> ApiError {
    let status = match &err {
        ReservationError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        ReservationError::InsufficientStock { .. } => StatusCode::CONFLICT,
        ReservationError::NotFound(_) => StatusCode::NOT_FOUND,
        ReservationError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
        ReservationError::StoreFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    }
    (
        status,
        Json(ErrorResponse {
            error: err.public_message(),
            kind: err.kind().to_string(),
        }),
    )
}

fn parse_items(items: Vec<CartItemRef>) -> Result<Vec<CartItem>, ApiError> {
    items
        .into_iter()
        .map(CartItem::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map_err(error_response)
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/stock/available", get(get_available_stock))
        .route("/stock/check", post(check_stock_availability))
        .route("/reservations", post(reserve_stock).get(get_user_reservations))
        .route("/reservations/active", get(get_all_active_reservations))
        .route("/reservations/:id", get(get_reservation))
        .route("/reservations/:id/release", post(release_reservation))
        .route("/reservations/:id/complete", post(complete_reservation))
        .route("/carts/reserve", post(reserve_cart_stock))
        .route("/carts/complete", post(complete_cart_reservations))
        .route("/carts/release", post(release_cart_reservations))
        .route("/webhooks/payment", post(payment_webhook))
        .route("/maintenance/expire", post(cleanup_expired_reservations))
        .with_state(state)
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
}

pub async fn get_available_stock(
    State(state): State<AppState>,
    Query(target): Query<TargetRef>,
) -> ApiResult<AvailableStockResponse> {
    let target = StockTarget::try_from(target).map_err(error_response)?;
    let available = state
        .checker
        .get_available_stock(target)
        .await
        .map_err(error_response)?;
    Ok(Json(AvailableStockResponse { available }))
}

pub async fn check_stock_availability(
    State(state): State<AppState>,
    Json(request): Json<CheckStockRequest>,
) -> ApiResult<AvailabilityReport> {
    let items = parse_items(request.items)?;
    let report = state
        .checker
        .check_stock_availability(&items)
        .await
        .map_err(error_response)?;
    Ok(Json(report))
}

pub async fn reserve_stock(
    State(state): State<AppState>,
    Json(request): Json<CreateReservationRequest>,
) -> Result<(StatusCode, Json<ReservationResponse>), ApiError> {
    let target = StockTarget::try_from(request.target).map_err(error_response)?;
    let holder = Holder::try_from(request.holder).map_err(error_response)?;

    let reservation_id = state
        .engine
        .reserve_stock(target, request.quantity, holder, request.expires_in_minutes)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(ReservationResponse { reservation_id })))
}

pub async fn get_user_reservations(
    State(state): State<AppState>,
    Query(holder): Query<HolderRef>,
) -> ApiResult<Vec<StockReservation>> {
    let holder = Holder::try_from(holder).map_err(error_response)?;
    let reservations = state
        .engine
        .get_user_reservations(&holder)
        .await
        .map_err(error_response)?;
    Ok(Json(reservations))
}

pub async fn get_all_active_reservations(
    State(state): State<AppState>,
) -> ApiResult<Vec<StockReservation>> {
    let reservations = state
        .engine
        .get_all_active_reservations()
        .await
        .map_err(error_response)?;
    Ok(Json(reservations))
}

pub async fn get_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StockReservation> {
    let reservation = state.engine.get_reservation(id).await.map_err(error_response)?;
    Ok(Json(reservation))
}

pub async fn release_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    request: Option<Json<ReleaseRequest>>,
) -> ApiResult<SuccessResponse> {
    let reason = request.and_then(|Json(request)| request.reason);
    state
        .engine
        .release_reservation(id, reason.as_deref())
        .await
        .map_err(error_response)?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn complete_reservation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<SuccessResponse> {
    state
        .engine
        .complete_reservation(id, request.order_id)
        .await
        .map_err(error_response)?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn reserve_cart_stock(
    State(state): State<AppState>,
    Json(request): Json<CartReserveRequest>,
) -> Result<(StatusCode, Json<CartReservationResponse>), ApiError> {
    let holder = Holder::try_from(request.holder).map_err(error_response)?;
    let items = parse_items(request.items)?;

    let reservation_ids = state
        .engine
        .reserve_cart_stock(&items, &holder)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(CartReservationResponse { reservation_ids })))
}

pub async fn complete_cart_reservations(
    State(state): State<AppState>,
    Json(request): Json<CartCompleteRequest>,
) -> ApiResult<SuccessResponse> {
    state
        .engine
        .complete_cart_reservations(&request.reservation_ids, request.order_id)
        .await
        .map_err(error_response)?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn release_cart_reservations(
    State(state): State<AppState>,
    Json(request): Json<CartReleaseRequest>,
) -> Json<ReleaseSummary> {
    let summary = state
        .engine
        .release_cart_reservations(&request.reservation_ids, request.reason.as_deref())
        .await;
    Json(summary)
}

pub async fn payment_webhook(
    State(state): State<AppState>,
    Json(webhook): Json<PaymentWebhook>,
) -> ApiResult<CheckoutOutcome> {
    let order_id = webhook.order_id();
    match state.engine.finalize_checkout(webhook).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            tracing::error!("Payment webhook for order {} not applied: {}", order_id, e);
            Err(error_response(e))
        }
    }
}

pub async fn cleanup_expired_reservations(
    State(state): State<AppState>,
) -> ApiResult<ExpireResponse> {
    let expired = state
        .engine
        .cleanup_expired_reservations()
        .await
        .map_err(error_response)?;
    Ok(Json(ExpireResponse { expired }))
}

pub async fn health_check() -> &'static str {
    "OK"
}
