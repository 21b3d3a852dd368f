//! User-facing operations, each one coupling a ledger mutation to an engine
//! mutation under a single logical transaction boundary. This is the layer
//! the API handlers call into; it never touches HTTP or parity-db directly.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::ApiError;
use crate::engine::MatchingEngine;
use crate::executor::TradeExecutor;
use crate::instrument::{Instrument, RUB, is_valid_ticker};
use crate::ledger::Ledger;
use crate::orderbook::MarketProbe;
use crate::orders::{Direction, Order, OrderKind, OrderStatus};
use crate::trade::Trade;
use crate::user::{Role, User};

/// Bounded retry for the cancel/book race described in §4.4: the
/// reconciliation loop may fully settle an order between our read and our
/// attempt to remove it from the book.
const CANCEL_RETRY_ATTEMPTS: u32 = 3;
const CANCEL_RETRY_BACKOFF: Duration = Duration::from_millis(5);

fn require_positive(qty: u64, field: &str) -> Result<(), ApiError> {
    if qty == 0 {
        return Err(ApiError::Validation(format!("{field} must be > 0")));
    }
    Ok(())
}

async fn require_active_instrument(ledger: &Ledger, ticker: &str) -> Result<Instrument, ApiError> {
    if !is_valid_ticker(ticker) {
        return Err(ApiError::Validation(format!("invalid ticker `{ticker}`")));
    }
    let instrument = match ledger.get_instrument(ticker).await {
        Ok(instrument) => instrument,
        Err(ApiError::NotFound(_)) => {
            return Err(ApiError::DomainConflict(format!("instrument {ticker} not found")));
        }
        Err(e) => return Err(e),
    };
    if !instrument.is_active() {
        return Err(ApiError::DomainConflict(format!("instrument {ticker} is not active")));
    }
    Ok(instrument)
}

pub struct OrderService<'a> {
    pub ledger: &'a Ledger,
    pub engine: &'a MatchingEngine,
}

impl<'a> OrderService<'a> {
    pub fn new(ledger: &'a Ledger, engine: &'a MatchingEngine) -> Self {
        Self { ledger, engine }
    }

    pub async fn create_limit(
        &self,
        user: &User,
        ticker: String,
        direction: Direction,
        qty: u64,
        price: u64,
    ) -> Result<Uuid, ApiError> {
        require_active_instrument(self.ledger, &ticker).await?;
        require_positive(qty, "qty")?;
        require_positive(price, "price")?;

        let (reserve_ticker, reserve_amount) = match direction {
            Direction::Sell => (ticker.clone(), qty),
            Direction::Buy => (RUB.to_string(), qty * price),
        };
        self.ledger.block(user.id, &reserve_ticker, reserve_amount).await?;

        let order = Order {
            id: Uuid::new_v4(),
            user_id: user.id,
            ticker: ticker.clone(),
            direction,
            kind: OrderKind::Limit { price },
            qty,
            filled: 0,
            status: OrderStatus::New,
            timestamp: Utc::now(),
        };
        if let Err(e) = self.ledger.put_order(&order).await {
            let _ = self.ledger.unblock(user.id, &reserve_ticker, reserve_amount).await;
            return Err(e);
        }

        let trades = self.engine.insert_limit(&order).await?;
        if !trades.is_empty() {
            TradeExecutor::new(self.ledger).settle_batch(trades).await?;
        }
        Ok(order.id)
    }

    pub async fn create_market(
        &self,
        user: &User,
        ticker: String,
        direction: Direction,
        qty: u64,
    ) -> Result<Uuid, ApiError> {
        require_active_instrument(self.ledger, &ticker).await?;
        require_positive(qty, "qty")?;

        let budget = match direction {
            Direction::Buy => self.ledger.get_balance(user.id, RUB).await?.available,
            Direction::Sell => self.ledger.get_balance(user.id, &ticker).await?.available,
        };

        let required_cash = match self.engine.probe_market(&ticker, direction, qty, budget).await {
            MarketProbe::Infeasible(reason) => return Err(ApiError::DomainConflict(reason.to_string())),
            MarketProbe::Feasible { required_cash } => required_cash,
        };

        let order = Order {
            id: Uuid::new_v4(),
            user_id: user.id,
            ticker: ticker.clone(),
            direction,
            kind: OrderKind::Market,
            qty,
            filled: 0,
            status: OrderStatus::New,
            timestamp: Utc::now(),
        };
        self.ledger.put_order(&order).await?;

        let (reserve_ticker, reserve_amount) = match direction {
            Direction::Buy => (RUB.to_string(), required_cash),
            Direction::Sell => (ticker.clone(), qty),
        };
        if let Err(e) = self.ledger.block(user.id, &reserve_ticker, reserve_amount).await {
            let mut cancelled = order.clone();
            cancelled.status = OrderStatus::Cancelled;
            let _ = self.ledger.put_order(&cancelled).await;
            return Err(e);
        }

        let trades = match self
            .engine
            .execute_market(&ticker, order.id, user.id, direction, qty, budget)
            .await
        {
            Ok(trades) => trades,
            Err(e) => {
                let _ = self.ledger.unblock(user.id, &reserve_ticker, reserve_amount).await;
                let mut cancelled = order.clone();
                cancelled.status = OrderStatus::Cancelled;
                let _ = self.ledger.put_order(&cancelled).await;
                return Err(e);
            }
        };

        TradeExecutor::new(self.ledger).settle_batch(trades).await?;

        let settled = self.ledger.get_order(order.id).await?;
        if settled.filled != settled.qty || settled.status != OrderStatus::Executed {
            return Err(ApiError::Consistency(format!(
                "market order {} settled with filled={} qty={} status={:?}",
                order.id, settled.filled, settled.qty, settled.status
            )));
        }
        Ok(order.id)
    }

    pub async fn cancel(&self, user: &User, order_id: Uuid) -> Result<(), ApiError> {
        let order = self.ledger.get_order(order_id).await?;
        if order.user_id != user.id {
            return Err(ApiError::Authorization("order belongs to another user".into()));
        }
        if !order.is_limit() {
            return Err(ApiError::DomainConflict("only LIMIT orders can be cancelled".into()));
        }
        if order.status.is_terminal() {
            return Err(ApiError::DomainConflict("order is already terminal".into()));
        }

        let mut removed = None;
        for attempt in 0..CANCEL_RETRY_ATTEMPTS {
            if let Some(internal) = self.engine.cancel(&order.ticker, order_id).await {
                removed = Some(internal);
                break;
            }
            let latest = self.ledger.get_order(order_id).await?;
            if !latest.status.is_open() {
                return Err(ApiError::DomainConflict("order was already filled".into()));
            }
            if attempt + 1 < CANCEL_RETRY_ATTEMPTS {
                tokio::time::sleep(CANCEL_RETRY_BACKOFF).await;
            }
        }
        let Some(removed) = removed else {
            return Err(ApiError::Consistency(format!(
                "order {order_id} still open in ledger but absent from the book after {CANCEL_RETRY_ATTEMPTS} attempts"
            )));
        };

        let (refund_ticker, refund_amount) = match order.direction {
            Direction::Sell => (order.ticker.clone(), removed.remaining()),
            Direction::Buy => (RUB.to_string(), removed.remaining() * removed.price),
        };
        if let Err(e) = self.ledger.unblock(user.id, &refund_ticker, refund_amount).await {
            self.engine.reinstate(&order.ticker, removed).await;
            return Err(e);
        }

        let mut order = order;
        order.filled = removed.filled;
        order.status = OrderStatus::Cancelled;
        self.ledger.put_order(&order).await
    }

    pub async fn get(&self, user: &User, order_id: Uuid) -> Result<Order, ApiError> {
        let order = self.ledger.get_order(order_id).await?;
        if order.user_id != user.id && user.role != Role::Admin {
            return Err(ApiError::Authorization("order belongs to another user".into()));
        }
        Ok(order)
    }

    pub async fn list(&self, user: &User) -> Result<Vec<Order>, ApiError> {
        self.ledger.list_orders_by_user(user.id).await
    }
}

pub async fn balances(ledger: &Ledger, user: &User) -> Result<HashMap<String, u64>, ApiError> {
    let rows = ledger.list_balances(user.id).await?;
    Ok(rows.into_iter().map(|(ticker, balance)| (ticker, balance.total())).collect())
}

pub struct AdminService<'a> {
    pub ledger: &'a Ledger,
    pub engine: &'a MatchingEngine,
}

impl<'a> AdminService<'a> {
    pub fn new(ledger: &'a Ledger, engine: &'a MatchingEngine) -> Self {
        Self { ledger, engine }
    }

    pub async fn delete_user(&self, id: Uuid) -> Result<(), ApiError> {
        self.ledger.delete_user(id).await
    }

    /// Creates the ledger row and the matching book together. Open Question
    /// "force-cancel on instrument delete?" is resolved in `remove_instrument`.
    pub async fn add_instrument(&self, ticker: String, name: String) -> Result<Instrument, ApiError> {
        if !is_valid_ticker(&ticker) {
            return Err(ApiError::Validation(format!("invalid ticker `{ticker}`")));
        }
        let instrument = self.ledger.add_instrument(ticker.clone(), name).await?;
        self.engine.add_instrument(&ticker).await;
        Ok(instrument)
    }

    /// Marks the instrument deleted and drops its book without draining open
    /// orders, matching the source system's observed behavior.
    pub async fn remove_instrument(&self, ticker: &str) -> Result<(), ApiError> {
        self.ledger.remove_instrument(ticker).await?;
        self.engine.remove_book(ticker).await;
        Ok(())
    }

    pub async fn deposit(&self, user_id: Uuid, ticker: &str, amount: u64) -> Result<u64, ApiError> {
        require_positive(amount, "amount")?;
        Ok(self.ledger.deposit(user_id, ticker, amount).await?.total())
    }

    pub async fn withdraw(&self, user_id: Uuid, ticker: &str, amount: u64) -> Result<u64, ApiError> {
        require_positive(amount, "amount")?;
        Ok(self.ledger.withdraw(user_id, ticker, amount).await?.total())
    }
}

pub async fn register(ledger: &Ledger, name: String) -> Result<User, ApiError> {
    if name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be empty".into()));
    }
    ledger.register_user(name).await
}

pub async fn list_instruments(ledger: &Ledger) -> Result<Vec<Instrument>, ApiError> {
    Ok(ledger.list_instruments().await?.into_iter().filter(Instrument::is_active).collect())
}

pub async fn orderbook_snapshot(
    ledger: &Ledger,
    engine: &MatchingEngine,
    ticker: &str,
    limit: usize,
) -> Result<crate::orderbook::BookSnapshot, ApiError> {
    require_active_instrument(ledger, ticker).await?;
    Ok(engine
        .get_book_snapshot(ticker, limit)
        .await
        .unwrap_or(crate::orderbook::BookSnapshot { bid_levels: vec![], ask_levels: vec![] }))
}

pub async fn transactions(
    ledger: &Ledger,
    ticker: &str,
    after: Option<&str>,
    limit: usize,
) -> Result<(Vec<Trade>, Option<String>), ApiError> {
    require_active_instrument(ledger, ticker).await?;
    ledger.page_trades(ticker, after, limit).await
}
