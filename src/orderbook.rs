//! Per-instrument in-memory order book.
//!
//! `bids` and `asks` are both [`BTreeMap`]s keyed by price, each holding a
//! FIFO [`VecDeque`] of resting orders at that price (price-time priority).
//! Bids are walked in reverse (highest price first), asks forward (lowest
//! price first) -- the same iteration trick the matching code has always
//! used, just generalized to both sides.
//!
//! Only `LIMIT` orders in state `NEW` or `PARTIALLY_EXECUTED` ever rest here.
//! `MARKET` orders are matched immediately against this structure and never
//! stored in it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

use crate::orders::{Direction, Order, OrderStatus};

/// The book's own projection of a resting limit order. Its authoritative
/// state lives in the ledger; any divergence between the two is a bug the
/// executor must heal before it reaches a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalOrder {
    pub id: Uuid,
    pub user_id: Uuid,
    pub direction: Direction,
    pub ticker: String,
    pub price: u64,
    pub qty: u64,
    pub filled: u64,
    pub status: OrderStatus,
    /// Nanosecond-resolution insertion instant, logged for debugging only;
    /// priority is carried by FIFO position within a price level, which is
    /// established under the engine's per-book lock.
    pub timestamp: i64,
}

impl InternalOrder {
    pub fn remaining(&self) -> u64 {
        self.qty - self.filled
    }

    /// Builds the book projection of a freshly-placed or replayed LIMIT order.
    /// Panics if `order` is a MARKET order -- those never rest in the book.
    pub fn from_limit_order(order: &Order) -> Self {
        let price = order
            .price()
            .expect("InternalOrder::from_limit_order requires a LIMIT order");
        Self {
            id: order.id,
            user_id: order.user_id,
            direction: order.direction,
            ticker: order.ticker.clone(),
            price,
            qty: order.qty,
            filled: order.filled,
            status: order.status,
            timestamp: order.timestamp.timestamp_nanos_opt().unwrap_or_default(),
        }
    }
}

/// A single matched pair, produced by [`OrderBook::cross`] or
/// [`OrderBook::execute_market`]. Carries enough post-match state for both
/// legs that the executor never has to read the book again.
#[derive(Debug, Clone)]
pub struct TradeExecution {
    pub buyer_order_id: Uuid,
    pub buyer_id: Uuid,
    pub buyer_filled: u64,
    pub buyer_status: OrderStatus,
    pub seller_order_id: Uuid,
    pub seller_id: Uuid,
    pub seller_filled: u64,
    pub seller_status: OrderStatus,
    pub ticker: String,
    pub qty: u64,
    pub price: u64,
    /// Price improvement refunded to the buyer when a crossing bid's limit
    /// price exceeds the resting ask's price. `None` for market fills and
    /// exact-price crosses.
    pub change: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Level {
    pub price: u64,
    pub qty: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookSnapshot {
    pub bid_levels: Vec<Level>,
    pub ask_levels: Vec<Level>,
}

/// Outcome of probing a market order against the book without mutating it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketProbe {
    /// The opposite side has at least `qty` remaining and the walk's
    /// required cash/asset fits within the caller's budget.
    Feasible { required_cash: u64 },
    Infeasible(&'static str),
}

enum EitherIter<'a> {
    Fwd(std::collections::btree_map::IterMut<'a, u64, VecDeque<InternalOrder>>),
    Rev(std::iter::Rev<std::collections::btree_map::IterMut<'a, u64, VecDeque<InternalOrder>>>),
}

impl<'a> Iterator for EitherIter<'a> {
    type Item = (&'a u64, &'a mut VecDeque<InternalOrder>);
    fn next(&mut self) -> Option<Self::Item> {
        match self {
            EitherIter::Fwd(it) => it.next(),
            EitherIter::Rev(it) => it.next(),
        }
    }
}

pub struct OrderBook {
    pub ticker: String,
    /// Buy orders, keyed by price ascending; matching walks it in reverse
    /// to reach the highest bid first.
    pub bids: BTreeMap<u64, VecDeque<InternalOrder>>,
    /// Sell orders, keyed by price ascending; matching walks it forward
    /// to reach the lowest ask first.
    pub asks: BTreeMap<u64, VecDeque<InternalOrder>>,
    /// Set by any mutation, cleared once a crossing pass produces no trades.
    pub has_activity: bool,
}

impl OrderBook {
    pub fn new(ticker: impl Into<String>) -> Self {
        Self {
            ticker: ticker.into(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            has_activity: false,
        }
    }

    fn side_mut(&mut self, direction: Direction) -> &mut BTreeMap<u64, VecDeque<InternalOrder>> {
        match direction {
            Direction::Buy => &mut self.bids,
            Direction::Sell => &mut self.asks,
        }
    }

    /// Inserts a resting LIMIT order. The caller must not insert the same
    /// order id twice; the book does not deduplicate.
    pub fn insert_limit(&mut self, order: InternalOrder) {
        let side = self.side_mut(order.direction);
        side.entry(order.price).or_insert_with(VecDeque::new).push_back(order);
        self.has_activity = true;
    }

    /// Removes a resting order by id from either side. Returns the removed
    /// entry so a caller (the order service) can restore it at its original
    /// priority if a subsequent ledger unblock fails.
    pub fn cancel(&mut self, order_id: Uuid) -> Option<InternalOrder> {
        for side in [&mut self.bids, &mut self.asks] {
            let mut found_price = None;
            let mut removed = None;
            for (price, queue) in side.iter_mut() {
                if let Some(pos) = queue.iter().position(|o| o.id == order_id) {
                    removed = queue.remove(pos);
                    if queue.is_empty() {
                        found_price = Some(*price);
                    }
                    break;
                }
            }
            if let Some(price) = found_price {
                side.remove(&price);
            }
            if removed.is_some() {
                self.has_activity = true;
                return removed;
            }
        }
        None
    }

    /// Re-inserts a previously-removed order at the front of its price
    /// level, restoring its original priority. Used to roll back a
    /// cancellation whose ledger-side unblock failed.
    pub fn reinstate(&mut self, order: InternalOrder) {
        let side = self.side_mut(order.direction);
        side.entry(order.price).or_insert_with(VecDeque::new).push_front(order);
        self.has_activity = true;
    }

    fn opposite_iter_mut(&mut self, direction: Direction) -> EitherIter<'_> {
        match direction {
            // Market BUY / crossing bid matches against asks, lowest first.
            Direction::Buy => EitherIter::Fwd(self.asks.iter_mut()),
            // Market SELL matches against bids, highest first.
            Direction::Sell => EitherIter::Rev(self.bids.iter_mut().rev()),
        }
    }

    /// Walks the opposite side without mutating the book, returning whether
    /// `qty` can be filled within `budget` (max cash for BUY, max asset
    /// units for SELL -- for SELL this degenerates to `budget >= qty`).
    pub fn probe_market(&self, direction: Direction, qty: u64, budget: u64) -> MarketProbe {
        let levels: Box<dyn Iterator<Item = (&u64, &VecDeque<InternalOrder>)>> = match direction {
            Direction::Buy => Box::new(self.asks.iter()),
            Direction::Sell => Box::new(self.bids.iter().rev()),
        };

        let mut remaining = qty;
        let mut required_cash: u64 = 0;
        for (&price, queue) in levels {
            if remaining == 0 {
                break;
            }
            let level_qty: u64 = queue.iter().map(InternalOrder::remaining).sum();
            let take = level_qty.min(remaining);
            required_cash += take * price;
            remaining -= take;
        }

        if remaining > 0 {
            return MarketProbe::Infeasible("insufficient liquidity");
        }
        match direction {
            Direction::Buy if budget < required_cash => MarketProbe::Infeasible("insufficient funds"),
            Direction::Sell if budget < qty => MarketProbe::Infeasible("insufficient funds"),
            _ => MarketProbe::Feasible { required_cash },
        }
    }

    /// Consumes the opposite side to fill a market order of `total_qty`
    /// units. Assumes the caller already confirmed feasibility via
    /// `probe_market`; running out of liquidity mid-walk here is a
    /// Consistency violation one level up (the book changed between probe
    /// and execute under the same per-book lock, which must not happen).
    pub fn execute_market(
        &mut self,
        order_id: Uuid,
        user_id: Uuid,
        direction: Direction,
        total_qty: u64,
    ) -> Vec<TradeExecution> {
        let ticker = self.ticker.clone();
        let mut trades = Vec::new();
        let mut incoming_filled = 0u64;
        let mut remaining = total_qty;

        let mut levels_to_remove = Vec::new();
        'outer: for (&price, queue) in self.opposite_iter_mut(direction) {
            while let Some(resting) = queue.front_mut() {
                if remaining == 0 {
                    break 'outer;
                }
                let trade_qty = remaining.min(resting.remaining());
                resting.filled += trade_qty;
                resting.status = Order::status_after_fill(resting.qty, resting.filled);
                incoming_filled += trade_qty;
                remaining -= trade_qty;
                let incoming_status = Order::status_after_fill(total_qty, incoming_filled);

                let (buyer_order_id, buyer_id, buyer_filled, buyer_status) = match direction {
                    Direction::Buy => (order_id, user_id, incoming_filled, incoming_status),
                    Direction::Sell => (resting.id, resting.user_id, resting.filled, resting.status),
                };
                let (seller_order_id, seller_id, seller_filled, seller_status) = match direction {
                    Direction::Buy => (resting.id, resting.user_id, resting.filled, resting.status),
                    Direction::Sell => (order_id, user_id, incoming_filled, incoming_status),
                };

                trades.push(TradeExecution {
                    buyer_order_id,
                    buyer_id,
                    buyer_filled,
                    buyer_status,
                    seller_order_id,
                    seller_id,
                    seller_filled,
                    seller_status,
                    ticker: ticker.clone(),
                    qty: trade_qty,
                    price,
                    change: None,
                });

                if resting.filled == resting.qty {
                    queue.pop_front();
                } else {
                    break;
                }
            }
            if queue.is_empty() {
                levels_to_remove.push(price);
            }
        }

        let side = self.side_mut(match direction {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        });
        for price in levels_to_remove {
            side.remove(&price);
        }
        self.has_activity = true;
        trades
    }

    /// Repeatedly matches the best bid against the best ask while their
    /// prices overlap. Execution price is always the resting ask's price;
    /// a crossing bid above that price generates a `change` refund.
    pub fn cross(&mut self) -> Vec<TradeExecution> {
        let ticker = self.ticker.clone();
        let mut trades = Vec::new();

        loop {
            let (Some((&bid_price, _)), Some((&ask_price, _))) =
                (self.bids.iter().next_back(), self.asks.iter().next())
            else {
                break;
            };
            if bid_price < ask_price {
                break;
            }

            let mut bid = self.bids.get_mut(&bid_price).unwrap().pop_front().unwrap();
            if self.bids.get(&bid_price).is_some_and(VecDeque::is_empty) {
                self.bids.remove(&bid_price);
            }
            let mut ask = self.asks.get_mut(&ask_price).unwrap().pop_front().unwrap();
            if self.asks.get(&ask_price).is_some_and(VecDeque::is_empty) {
                self.asks.remove(&ask_price);
            }

            let qty = bid.remaining().min(ask.remaining());
            let execution_price = ask.price;
            let change = if bid.price > execution_price {
                Some((bid.price - execution_price) * qty)
            } else {
                None
            };

            bid.filled += qty;
            bid.status = Order::status_after_fill(bid.qty, bid.filled);
            ask.filled += qty;
            ask.status = Order::status_after_fill(ask.qty, ask.filled);

            trades.push(TradeExecution {
                buyer_order_id: bid.id,
                buyer_id: bid.user_id,
                buyer_filled: bid.filled,
                buyer_status: bid.status,
                seller_order_id: ask.id,
                seller_id: ask.user_id,
                seller_filled: ask.filled,
                seller_status: ask.status,
                ticker: ticker.clone(),
                qty,
                price: execution_price,
                change,
            });

            if bid.status.is_open() {
                self.bids.entry(bid.price).or_insert_with(VecDeque::new).push_front(bid);
            }
            if ask.status.is_open() {
                self.asks.entry(ask.price).or_insert_with(VecDeque::new).push_front(ask);
            }
        }

        self.has_activity = !trades.is_empty();
        trades
    }

    pub fn snapshot(&self, limit: usize) -> BookSnapshot {
        let bid_levels = self
            .bids
            .iter()
            .rev()
            .take(limit)
            .map(|(&price, q)| Level {
                price,
                qty: q.iter().map(InternalOrder::remaining).sum(),
            })
            .collect();
        let ask_levels = self
            .asks
            .iter()
            .take(limit)
            .map(|(&price, q)| Level {
                price,
                qty: q.iter().map(InternalOrder::remaining).sum(),
            })
            .collect();
        BookSnapshot { bid_levels, ask_levels }
    }
}
