//! Registry of per-instrument order books.
//!
//! Mirrors the source system's single `asyncio.Lock()` over a
//! `dict[str, OrderBook]`: one [`tokio::sync::RwLock`] guards the map itself
//! (so adding/removing a book doesn't race with lookups), and each book is
//! independently guarded by its own [`tokio::sync::Mutex`] so two different
//! tickers never contend with each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::errors::ApiError;
use crate::orderbook::{BookSnapshot, InternalOrder, MarketProbe, OrderBook, TradeExecution};
use crate::orders::{Direction, Order};

pub struct MatchingEngine {
    books: RwLock<HashMap<String, Arc<Mutex<OrderBook>>>>,
}

impl MatchingEngine {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuilds every book from the ledger's open LIMIT orders. Called once
    /// at process startup, before the HTTP server starts accepting traffic.
    pub async fn startup(&self, open_orders: Vec<Order>) {
        for order in open_orders {
            self.add_instrument(&order.ticker).await;
            let book = self.book_for(&order.ticker).await;
            let mut book = book.lock().await;
            book.insert_limit(InternalOrder::from_limit_order(&order));
        }
    }

    /// Registers an empty book for `ticker` if one doesn't already exist.
    pub async fn add_instrument(&self, ticker: &str) {
        let exists = self.books.read().await.contains_key(ticker);
        if exists {
            return;
        }
        let mut books = self.books.write().await;
        books
            .entry(ticker.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new(ticker))));
    }

    /// Drops a book entirely. Matches the source system leaving resting
    /// orders as ledger rows with no live book behind them -- the book is
    /// simply gone, not drained.
    pub async fn remove_book(&self, ticker: &str) {
        self.books.write().await.remove(ticker);
    }

    async fn book_for(&self, ticker: &str) -> Arc<Mutex<OrderBook>> {
        if let Some(book) = self.books.read().await.get(ticker) {
            return book.clone();
        }
        let mut books = self.books.write().await;
        books
            .entry(ticker.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(OrderBook::new(ticker))))
            .clone()
    }

    pub async fn insert_limit(&self, order: &Order) -> Result<Vec<TradeExecution>, ApiError> {
        let book = self.book_for(&order.ticker).await;
        let mut book = book.lock().await;
        book.insert_limit(InternalOrder::from_limit_order(order));
        Ok(book.cross())
    }

    pub async fn cancel(&self, ticker: &str, order_id: Uuid) -> Option<InternalOrder> {
        let book = self.book_for(ticker).await;
        let mut book = book.lock().await;
        book.cancel(order_id)
    }

    pub async fn reinstate(&self, ticker: &str, order: InternalOrder) {
        let book = self.book_for(ticker).await;
        let mut book = book.lock().await;
        book.reinstate(order);
    }

    pub async fn probe_market(&self, ticker: &str, direction: Direction, qty: u64, budget: u64) -> MarketProbe {
        let book = self.book_for(ticker).await;
        let book = book.lock().await;
        book.probe_market(direction, qty, budget)
    }

    /// Probes and, if feasible, immediately executes -- all under the same
    /// per-book lock acquisition so no other order can slip in between the
    /// feasibility check and the fill.
    pub async fn execute_market(
        &self,
        ticker: &str,
        order_id: Uuid,
        user_id: Uuid,
        direction: Direction,
        qty: u64,
        budget: u64,
    ) -> Result<Vec<TradeExecution>, ApiError> {
        let book = self.book_for(ticker).await;
        let mut book = book.lock().await;
        match book.probe_market(direction, qty, budget) {
            MarketProbe::Infeasible(reason) => Err(ApiError::DomainConflict(reason.to_string())),
            MarketProbe::Feasible { .. } => {
                let trades = book.execute_market(order_id, user_id, direction, qty);
                let filled: u64 = trades.iter().map(|t| t.qty).sum();
                if filled != qty {
                    return Err(ApiError::Consistency(format!(
                        "market order {order_id} filled {filled} of {qty} after a feasible probe"
                    )));
                }
                Ok(trades)
            }
        }
    }

    pub async fn get_book_snapshot(&self, ticker: &str, limit: usize) -> Option<BookSnapshot> {
        let book = self.books.read().await.get(ticker)?.clone();
        let book = book.lock().await;
        Some(book.snapshot(limit))
    }

    /// Runs one crossing pass over every book that has seen activity since
    /// its last pass, returning the trades produced grouped by ticker.
    pub async fn cross_all(&self) -> Vec<(String, Vec<TradeExecution>)> {
        let tickers: Vec<String> = self.books.read().await.keys().cloned().collect();
        let mut out = Vec::new();
        for ticker in tickers {
            let Some(book) = self.books.read().await.get(&ticker).cloned() else {
                continue;
            };
            let mut book = book.lock().await;
            if !book.has_activity {
                continue;
            }
            let trades = book.cross();
            if !trades.is_empty() {
                out.push((ticker, trades));
            }
        }
        out
    }
}

impl Default for MatchingEngine {
    fn default() -> Self {
        Self::new()
    }
}
