//! HTTP edge layer: request auth, DTO (de)serialization, and route wiring.
//! Every handler is a thin translation from JSON/path/query into a
//! `service` call; the only real logic here is turning an [`ApiError`] into
//! the HTTP status the taxonomy mandates, which `ApiError` already does via
//! `IntoResponse`.

use std::collections::HashMap;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::instrument::Instrument;
use crate::orderbook::BookSnapshot;
use crate::orders::{Direction, Order};
use crate::service::{self, AdminService, OrderService};
use crate::state::AppState;
use crate::trade::Trade;
use crate::user::{Role, User};

/// Extracted from `Authorization: TOKEN key-<uuid>`. Any endpoint requiring
/// a logged-in user takes this as an extractor argument.
pub struct CurrentUser(pub User);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Authorization("missing Authorization header".into()))?;
        let api_key = header
            .strip_prefix("TOKEN ")
            .ok_or_else(|| ApiError::Authorization("Authorization header must be `TOKEN key-<uuid>`".into()))?;
        let user = state.ledger.authenticate(api_key).await?;
        Ok(CurrentUser(user))
    }
}

/// Same as [`CurrentUser`] but rejects non-admin accounts.
pub struct CurrentAdmin(pub User);

impl FromRequestParts<AppState> for CurrentAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(ApiError::Authorization("admin role required".into()));
        }
        Ok(CurrentAdmin(user))
    }
}

fn default_limit() -> usize {
    100
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub name: String,
}

#[derive(Serialize)]
pub struct InstrumentResponse {
    pub name: String,
    pub ticker: String,
}

impl From<Instrument> for InstrumentResponse {
    fn from(i: Instrument) -> Self {
        Self { name: i.name, ticker: i.ticker }
    }
}

#[derive(Deserialize)]
pub struct BookQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

#[derive(Deserialize)]
pub struct TradesQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub after: Option<String>,
}

#[derive(Serialize)]
pub struct TransactionView {
    pub ticker: String,
    pub amount: u64,
    pub price: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<Trade> for TransactionView {
    fn from(t: Trade) -> Self {
        Self { ticker: t.ticker, amount: t.amount, price: t.price, timestamp: t.timestamp }
    }
}

#[derive(Serialize)]
pub struct TransactionsPage {
    pub items: Vec<TransactionView>,
    pub next: Option<String>,
}

/// Either a LIMIT order (`price` present) or a MARKET order (`price` absent).
#[derive(Deserialize)]
pub struct NewOrderRequest {
    pub direction: Direction,
    pub ticker: String,
    pub qty: u64,
    pub price: Option<u64>,
}

#[derive(Serialize, Deserialize)]
pub struct OrderAck {
    pub success: bool,
    pub order_id: Uuid,
}

#[derive(Deserialize)]
pub struct AddInstrumentRequest {
    pub name: String,
    pub ticker: String,
}

#[derive(Deserialize)]
pub struct BalanceMutationRequest {
    pub user_id: Uuid,
    pub ticker: String,
    pub amount: u64,
}

// -- public -------------------------------------------------------------

async fn register(State(state): State<AppState>, Json(req): Json<RegisterRequest>) -> Result<Json<User>, ApiError> {
    let user = service::register(&state.ledger, req.name).await?;
    Ok(Json(user))
}

async fn list_instruments(State(state): State<AppState>) -> Result<Json<Vec<InstrumentResponse>>, ApiError> {
    let instruments = service::list_instruments(&state.ledger).await?;
    Ok(Json(instruments.into_iter().map(InstrumentResponse::from).collect()))
}

async fn orderbook(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(q): Query<BookQuery>,
) -> Result<Json<BookSnapshot>, ApiError> {
    let snapshot = service::orderbook_snapshot(&state.ledger, &state.engine, &ticker, q.limit.min(1000)).await?;
    Ok(Json(snapshot))
}

async fn transactions(
    State(state): State<AppState>,
    Path(ticker): Path<String>,
    Query(q): Query<TradesQuery>,
) -> Result<Json<TransactionsPage>, ApiError> {
    let (items, next) = service::transactions(&state.ledger, &ticker, q.after.as_deref(), q.limit.min(1000)).await?;
    Ok(Json(TransactionsPage { items: items.into_iter().map(TransactionView::from).collect(), next }))
}

// -- user -----------------------------------------------------------------

async fn get_balance(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<HashMap<String, u64>>, ApiError> {
    Ok(Json(service::balances(&state.ledger, &user).await?))
}

async fn create_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<NewOrderRequest>,
) -> Result<Json<OrderAck>, ApiError> {
    let orders = OrderService::new(&state.ledger, &state.engine);
    let order_id = match req.price {
        Some(price) => orders.create_limit(&user, req.ticker, req.direction, req.qty, price).await?,
        None => orders.create_market(&user, req.ticker, req.direction, req.qty).await?,
    };
    Ok(Json(OrderAck { success: true, order_id }))
}

async fn list_orders(State(state): State<AppState>, CurrentUser(user): CurrentUser) -> Result<Json<Vec<Order>>, ApiError> {
    let orders = OrderService::new(&state.ledger, &state.engine);
    Ok(Json(orders.list(&user).await?))
}

async fn get_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, ApiError> {
    let orders = OrderService::new(&state.ledger, &state.engine);
    Ok(Json(orders.get(&user, id).await?))
}

async fn cancel_order(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let orders = OrderService::new(&state.ledger, &state.engine);
    orders.cancel(&user, id).await?;
    Ok(StatusCode::OK)
}

// -- admin ------------------------------------------------------------

async fn admin_delete_user(
    State(state): State<AppState>,
    CurrentAdmin(_admin): CurrentAdmin,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    AdminService::new(&state.ledger, &state.engine).delete_user(id).await?;
    Ok(StatusCode::OK)
}

async fn admin_add_instrument(
    State(state): State<AppState>,
    CurrentAdmin(_admin): CurrentAdmin,
    Json(req): Json<AddInstrumentRequest>,
) -> Result<Json<InstrumentResponse>, ApiError> {
    let instrument = AdminService::new(&state.ledger, &state.engine)
        .add_instrument(req.ticker, req.name)
        .await?;
    Ok(Json(instrument.into()))
}

async fn admin_remove_instrument(
    State(state): State<AppState>,
    CurrentAdmin(_admin): CurrentAdmin,
    Path(ticker): Path<String>,
) -> Result<StatusCode, ApiError> {
    AdminService::new(&state.ledger, &state.engine).remove_instrument(&ticker).await?;
    Ok(StatusCode::OK)
}

async fn admin_deposit(
    State(state): State<AppState>,
    CurrentAdmin(_admin): CurrentAdmin,
    Json(req): Json<BalanceMutationRequest>,
) -> Result<Json<u64>, ApiError> {
    let total = AdminService::new(&state.ledger, &state.engine)
        .deposit(req.user_id, &req.ticker, req.amount)
        .await?;
    Ok(Json(total))
}

async fn admin_withdraw(
    State(state): State<AppState>,
    CurrentAdmin(_admin): CurrentAdmin,
    Json(req): Json<BalanceMutationRequest>,
) -> Result<Json<u64>, ApiError> {
    let total = AdminService::new(&state.ledger, &state.engine)
        .withdraw(req.user_id, &req.ticker, req.amount)
        .await?;
    Ok(Json(total))
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/public/register", post(register))
        .route("/public/instrument", get(list_instruments))
        .route("/public/orderbook/{ticker}", get(orderbook))
        .route("/public/transactions/{ticker}", get(transactions));

    let user = Router::new()
        .route("/balance", get(get_balance))
        .route("/order", post(create_order).get(list_orders))
        .route("/order/{id}", get(get_order).delete(cancel_order));

    let admin = Router::new()
        .route("/admin/user/{id}", delete(admin_delete_user))
        .route("/admin/instrument", post(admin_add_instrument))
        .route("/admin/instrument/{ticker}", delete(admin_remove_instrument))
        .route("/admin/balance/deposit", post(admin_deposit))
        .route("/admin/balance/withdraw", post(admin_withdraw));

    Router::new()
        .nest("/api/v1", public.merge(user).merge(admin))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(false).level(tracing::Level::INFO))
                .on_response(DefaultOnResponse::new().level(tracing::Level::INFO)),
        )
        .with_state(state)
}
