use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::tempdir;
use tower::ServiceExt;
use uuid::Uuid;

use exchange_core::api::{OrderAck, router};
use exchange_core::ledger::Ledger;
use exchange_core::state::AppState;

struct TestApp {
    app: Router,
    ledger: Arc<Ledger>,
    _tmp: tempfile::TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let tmp = tempdir().unwrap();
        let state = AppState::open(tmp.path()).await.unwrap();
        let ledger = state.ledger.clone();
        Self { app: router(state), ledger, _tmp: tmp }
    }

    async fn send(&self, req: Request<Body>) -> Response {
        self.app.clone().oneshot(req).await.unwrap()
    }

    async fn register(&self, name: &str) -> (Uuid, String) {
        let res = self
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/public/register")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({ "name": name }).to_string()))
                    .unwrap(),
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let v: Value = body_json(res).await;
        (v["id"].as_str().unwrap().parse().unwrap(), v["api_key"].as_str().unwrap().to_string())
    }

    /// Registers a user then grants it admin through the ledger directly:
    /// there is no HTTP route for minting the first admin, same as the
    /// source system's out-of-band bootstrap.
    async fn register_admin(&self, name: &str) -> (Uuid, String) {
        let (id, key) = self.register(name).await;
        self.ledger.promote_to_admin(id).await.unwrap();
        (id, key)
    }
}

fn auth(builder: axum::http::request::Builder, api_key: &str) -> axum::http::request::Builder {
    builder.header("Authorization", format!("TOKEN {api_key}"))
}

async fn body_json<T: serde::de::DeserializeOwned>(res: Response) -> T {
    let bytes = res.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn add_instrument(app: &TestApp, admin_key: &str, ticker: &str, name: &str) -> Response {
    app.send(
        auth(
            Request::builder()
                .method("POST")
                .uri("/api/v1/admin/instrument")
                .header("content-type", "application/json"),
            admin_key,
        )
        .body(Body::from(json!({ "name": name, "ticker": ticker }).to_string()))
        .unwrap(),
    )
    .await
}

async fn deposit(app: &TestApp, admin_key: &str, user_id: Uuid, ticker: &str, amount: u64) -> Response {
    app.send(
        auth(
            Request::builder()
                .method("POST")
                .uri("/api/v1/admin/balance/deposit")
                .header("content-type", "application/json"),
            admin_key,
        )
        .body(Body::from(json!({ "user_id": user_id, "ticker": ticker, "amount": amount }).to_string()))
        .unwrap(),
    )
    .await
}

async fn withdraw(app: &TestApp, admin_key: &str, user_id: Uuid, ticker: &str, amount: u64) -> Response {
    app.send(
        auth(
            Request::builder()
                .method("POST")
                .uri("/api/v1/admin/balance/withdraw")
                .header("content-type", "application/json"),
            admin_key,
        )
        .body(Body::from(json!({ "user_id": user_id, "ticker": ticker, "amount": amount }).to_string()))
        .unwrap(),
    )
    .await
}

async fn place_limit(app: &TestApp, api_key: &str, ticker: &str, direction: &str, qty: u64, price: u64) -> Response {
    app.send(
        auth(
            Request::builder()
                .method("POST")
                .uri("/api/v1/order")
                .header("content-type", "application/json"),
            api_key,
        )
        .body(Body::from(json!({ "direction": direction, "ticker": ticker, "qty": qty, "price": price }).to_string()))
        .unwrap(),
    )
    .await
}

async fn place_market(app: &TestApp, api_key: &str, ticker: &str, direction: &str, qty: u64) -> Response {
    app.send(
        auth(
            Request::builder()
                .method("POST")
                .uri("/api/v1/order")
                .header("content-type", "application/json"),
            api_key,
        )
        .body(Body::from(json!({ "direction": direction, "ticker": ticker, "qty": qty }).to_string()))
        .unwrap(),
    )
    .await
}

async fn cancel_order(app: &TestApp, api_key: &str, id: Uuid) -> Response {
    app.send(
        auth(Request::builder().method("DELETE").uri(format!("/api/v1/order/{id}")), api_key)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}

async fn get_order(app: &TestApp, api_key: &str, id: Uuid) -> Value {
    let res = app
        .send(auth(Request::builder().uri(format!("/api/v1/order/{id}")), api_key).body(Body::empty()).unwrap())
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

async fn balances(app: &TestApp, api_key: &str) -> Value {
    let res = app.send(auth(Request::builder().uri("/api/v1/balance"), api_key).body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

async fn orderbook(app: &TestApp, ticker: &str) -> Value {
    let res = app
        .send(Request::builder().uri(format!("/api/v1/public/orderbook/{ticker}")).body(Body::empty()).unwrap())
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

async fn order_id_of(res: Response) -> Uuid {
    assert_eq!(res.status(), StatusCode::OK);
    let ack: OrderAck = body_json(res).await;
    ack.order_id
}

/// Registers an admin, one MEMECOIN instrument, and two funded traders:
/// `buyer` holds `rub_funding` RUB, `seller` holds `coin_funding` MEMECOIN.
async fn setup_market(app: &TestApp, rub_funding: u64, coin_funding: u64) -> (Uuid, String, Uuid, String) {
    let (_admin_id, admin_key) = app.register_admin("root").await;
    assert_eq!(add_instrument(app, &admin_key, "MEMECOIN", "Meme Coin").await.status(), StatusCode::OK);

    let (buyer_id, buyer_key) = app.register("buyer").await;
    let (seller_id, seller_key) = app.register("seller").await;
    assert_eq!(deposit(app, &admin_key, buyer_id, "RUB", rub_funding).await.status(), StatusCode::OK);
    assert_eq!(deposit(app, &admin_key, seller_id, "MEMECOIN", coin_funding).await.status(), StatusCode::OK);

    (buyer_id, buyer_key, seller_id, seller_key)
}

#[tokio::test]
async fn register_rejects_empty_name() {
    let app = TestApp::new().await;
    let res = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/api/v1/public/register")
                .header("content-type", "application/json")
                .body(Body::from(json!({ "name": "  " }).to_string()))
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn balance_endpoint_requires_auth() {
    let app = TestApp::new().await;
    let res = app.send(Request::builder().uri("/api/v1/balance").body(Body::empty()).unwrap()).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_routes_reject_non_admin_user() {
    let app = TestApp::new().await;
    let (_, key) = app.register("trader").await;
    let res = add_instrument(&app, &key, "GOLD", "Gold").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn create_order_rejects_zero_qty() {
    let app = TestApp::new().await;
    let (_admin_id, admin_key) = app.register_admin("root").await;
    assert_eq!(add_instrument(&app, &admin_key, "MEMECOIN", "Meme Coin").await.status(), StatusCode::OK);
    let (_, key) = app.register("trader").await;

    let res = place_limit(&app, &key, "MEMECOIN", "BUY", 0, 50).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn create_order_rejects_nonexistent_instrument() {
    let app = TestApp::new().await;
    let (_, key) = app.register("trader").await;
    let res = place_limit(&app, &key, "NOPE", "BUY", 1, 50).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_order_rejects_deactivated_instrument() {
    let app = TestApp::new().await;
    let (_admin_id, admin_key) = app.register_admin("root").await;
    assert_eq!(add_instrument(&app, &admin_key, "MEMECOIN", "Meme Coin").await.status(), StatusCode::OK);
    let (_, key) = app.register("trader").await;

    let res = app
        .send(
            auth(Request::builder().method("DELETE").uri("/api/v1/admin/instrument/MEMECOIN"), &admin_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = place_limit(&app, &key, "MEMECOIN", "BUY", 1, 50).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

/// S1: a resting SELL limit crosses a better-priced BUY limit; the buyer is
/// refunded the price-improvement `change`, both orders settle EXECUTED, and
/// a subsequent cancel of the fully executed order is rejected.
#[tokio::test]
async fn s1_limit_match_with_price_improvement_then_cancel_of_executed_rejected() {
    let app = TestApp::new().await;
    let (buyer_id, buyer_key, seller_id, seller_key) = setup_market(&app, 10_000, 10).await;
    let _ = seller_id;

    let sell_id = order_id_of(place_limit(&app, &seller_key, "MEMECOIN", "SELL", 5, 48).await).await;
    let buy_id = order_id_of(place_limit(&app, &buyer_key, "MEMECOIN", "BUY", 5, 50).await).await;

    let buy = get_order(&app, &buyer_key, buy_id).await;
    assert_eq!(buy["status"], "EXECUTED");
    assert_eq!(buy["filled"], 5);

    let sell = get_order(&app, &seller_key, sell_id).await;
    assert_eq!(sell["status"], "EXECUTED");

    // buyer blocked 5*50=250, execution price was 48, change = 2*5=10 refunded.
    let buyer_bal = balances(&app, &buyer_key).await;
    assert_eq!(buyer_bal["RUB"], 10_000 - 5 * 48);
    assert_eq!(buyer_bal["MEMECOIN"], 5);

    let seller_bal = balances(&app, &seller_key).await;
    assert_eq!(seller_bal["RUB"], 5 * 48);
    assert_eq!(seller_bal["MEMECOIN"], 10 - 5);

    let cancel_res = cancel_order(&app, &buyer_key, buy_id).await;
    assert_eq!(cancel_res.status(), StatusCode::BAD_REQUEST);
}

/// S2: cancelling a resting, untouched limit order refunds the full
/// reservation and removes it from the book.
#[tokio::test]
async fn s2_cancel_refunds_full_reservation_and_clears_book() {
    let app = TestApp::new().await;
    let (buyer_id, buyer_key, _seller_id, _seller_key) = setup_market(&app, 10_000, 10).await;
    let _ = buyer_id;

    let order_id = order_id_of(place_limit(&app, &buyer_key, "MEMECOIN", "BUY", 10, 40).await).await;
    let book = orderbook(&app, "MEMECOIN").await;
    assert_eq!(book["bid_levels"][0]["price"], 40);

    let res = cancel_order(&app, &buyer_key, order_id).await;
    assert_eq!(res.status(), StatusCode::OK);

    let order = get_order(&app, &buyer_key, order_id).await;
    assert_eq!(order["status"], "CANCELLED");

    let bal = balances(&app, &buyer_key).await;
    assert_eq!(bal["RUB"], 10_000);

    let book = orderbook(&app, "MEMECOIN").await;
    assert!(book["bid_levels"].as_array().unwrap().is_empty());
}

/// S3: two resting sells at different prices; an incoming buy should match
/// the better (lower) price first, demonstrating price-time priority.
#[tokio::test]
async fn s3_price_priority_matches_best_price_first() {
    let app = TestApp::new().await;
    let (buyer_id, buyer_key, seller_id, seller_key) = setup_market(&app, 10_000, 20).await;
    let _ = (buyer_id, seller_id);

    let expensive = order_id_of(place_limit(&app, &seller_key, "MEMECOIN", "SELL", 5, 60).await).await;
    let cheap = order_id_of(place_limit(&app, &seller_key, "MEMECOIN", "SELL", 5, 55).await).await;

    let buy_id = order_id_of(place_limit(&app, &buyer_key, "MEMECOIN", "BUY", 5, 60).await).await;
    let buy = get_order(&app, &buyer_key, buy_id).await;
    assert_eq!(buy["status"], "EXECUTED");

    let cheap_order = get_order(&app, &seller_key, cheap).await;
    assert_eq!(cheap_order["status"], "EXECUTED");
    let expensive_order = get_order(&app, &seller_key, expensive).await;
    assert_eq!(expensive_order["status"], "NEW");
}

/// S4: a market order with no feasible counterparty liquidity is rejected as
/// a domain conflict, and leaves balances untouched.
#[tokio::test]
async fn s4_unfillable_market_order_rejected_with_no_state_change() {
    let app = TestApp::new().await;
    let (buyer_id, buyer_key, _seller_id, _seller_key) = setup_market(&app, 10_000, 0).await;
    let _ = buyer_id;

    let res = place_market(&app, &buyer_key, "MEMECOIN", "BUY", 5).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let bal = balances(&app, &buyer_key).await;
    assert_eq!(bal["RUB"], 10_000);
}

/// S5: self-trades are permitted; matching a trader's own resting order
/// against their own incoming order still conserves total funds.
#[tokio::test]
async fn s5_self_trade_is_permitted_and_conserves_funds() {
    let app = TestApp::new().await;
    let (_admin_id, admin_key) = app.register_admin("root").await;
    assert_eq!(add_instrument(&app, &admin_key, "MEMECOIN", "Meme Coin").await.status(), StatusCode::OK);
    let (trader_id, trader_key) = app.register("trader").await;
    assert_eq!(deposit(&app, &admin_key, trader_id, "RUB", 10_000).await.status(), StatusCode::OK);
    assert_eq!(deposit(&app, &admin_key, trader_id, "MEMECOIN", 10).await.status(), StatusCode::OK);

    let sell_id = order_id_of(place_limit(&app, &trader_key, "MEMECOIN", "SELL", 5, 50).await).await;
    let buy_id = order_id_of(place_limit(&app, &trader_key, "MEMECOIN", "BUY", 5, 50).await).await;

    let sell = get_order(&app, &trader_key, sell_id).await;
    let buy = get_order(&app, &trader_key, buy_id).await;
    assert_eq!(sell["status"], "EXECUTED");
    assert_eq!(buy["status"], "EXECUTED");

    let bal = balances(&app, &trader_key).await;
    assert_eq!(bal["RUB"], 10_000);
    assert_eq!(bal["MEMECOIN"], 10);
}

/// S6: at the same price, two resting orders execute in FIFO order against a
/// single larger incoming order.
#[tokio::test]
async fn s6_fifo_priority_at_equal_price() {
    let app = TestApp::new().await;
    let (buyer_id, buyer_key, seller_id, seller_key) = setup_market(&app, 10_000, 20).await;
    let _ = (buyer_id, seller_id);

    let first = order_id_of(place_limit(&app, &seller_key, "MEMECOIN", "SELL", 5, 50).await).await;
    let second = order_id_of(place_limit(&app, &seller_key, "MEMECOIN", "SELL", 5, 50).await).await;

    let buy_id = order_id_of(place_limit(&app, &buyer_key, "MEMECOIN", "BUY", 5, 50).await).await;
    let buy = get_order(&app, &buyer_key, buy_id).await;
    assert_eq!(buy["status"], "EXECUTED");

    let first_order = get_order(&app, &seller_key, first).await;
    let second_order = get_order(&app, &seller_key, second).await;
    assert_eq!(first_order["status"], "EXECUTED");
    assert_eq!(second_order["status"], "NEW");
}

#[tokio::test]
async fn transactions_endpoint_paginates_forward() {
    let app = TestApp::new().await;
    let (buyer_id, buyer_key, seller_id, seller_key) = setup_market(&app, 10_000, 10).await;
    let _ = (buyer_id, seller_id);

    order_id_of(place_limit(&app, &seller_key, "MEMECOIN", "SELL", 1, 50).await).await;
    order_id_of(place_limit(&app, &buyer_key, "MEMECOIN", "BUY", 1, 50).await).await;
    order_id_of(place_limit(&app, &seller_key, "MEMECOIN", "SELL", 1, 50).await).await;
    order_id_of(place_limit(&app, &buyer_key, "MEMECOIN", "BUY", 1, 50).await).await;

    let res = app
        .send(Request::builder().uri("/api/v1/public/transactions/MEMECOIN?limit=1").body(Body::empty()).unwrap())
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let page1: Value = body_json(res).await;
    assert_eq!(page1["items"].as_array().unwrap().len(), 1);
    let next = page1["next"].as_str().unwrap().to_string();

    let res = app
        .send(
            Request::builder()
                .uri(format!("/api/v1/public/transactions/MEMECOIN?limit=1&after={next}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let page2: Value = body_json(res).await;
    assert_eq!(page2["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn admin_withdraw_rejects_amount_over_available() {
    let app = TestApp::new().await;
    let (_admin_id, admin_key) = app.register_admin("root").await;
    let (user_id, _) = app.register("trader").await;
    assert_eq!(deposit(&app, &admin_key, user_id, "RUB", 100).await.status(), StatusCode::OK);

    let res = withdraw(&app, &admin_key, user_id, "RUB", 500).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_remove_instrument_does_not_drain_open_orders() {
    let app = TestApp::new().await;
    let (buyer_id, buyer_key, _seller_id, _seller_key) = setup_market(&app, 10_000, 10).await;
    let _ = buyer_id;

    let order_id = order_id_of(place_limit(&app, &buyer_key, "MEMECOIN", "BUY", 5, 40).await).await;

    let (_admin_id, admin_key) = app.register_admin("root2").await;
    let res = app
        .send(
            auth(Request::builder().method("DELETE").uri("/api/v1/admin/instrument/MEMECOIN"), &admin_key)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    // the order itself is untouched; only new activity against the ticker is blocked.
    let order = get_order(&app, &buyer_key, order_id).await;
    assert_eq!(order["status"], "NEW");

    let blocked = place_limit(&app, &buyer_key, "MEMECOIN", "BUY", 1, 40).await;
    assert_eq!(blocked.status(), StatusCode::BAD_REQUEST);
}
