//! Order entities and their sum-typed shape/status fields.
//!
//! `OrderKind` replaces the price-or-absent convention of the source system
//! with an explicit tagged variant: a `Limit` order always carries a price, a
//! `Market` order never does. The API layer validates an incoming payload into
//! one of these variants exactly once, at the edge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub enum OrderKind {
    Limit { price: u64 },
    Market,
}

impl OrderKind {
    pub fn price(&self) -> Option<u64> {
        match self {
            OrderKind::Limit { price } => Some(*price),
            OrderKind::Market => None,
        }
    }

    pub fn is_limit(&self) -> bool {
        matches!(self, OrderKind::Limit { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyExecuted,
    Executed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Executed)
    }

    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::New | OrderStatus::PartiallyExecuted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Order {
    #[bincode(with_serde)]
    pub id: Uuid,
    #[bincode(with_serde)]
    pub user_id: Uuid,
    pub ticker: String,
    pub direction: Direction,
    pub kind: OrderKind,
    pub qty: u64,
    pub filled: u64,
    pub status: OrderStatus,
    #[bincode(with_serde)]
    pub timestamp: DateTime<Utc>,
}

impl Order {
    pub fn remaining(&self) -> u64 {
        self.qty - self.filled
    }

    pub fn price(&self) -> Option<u64> {
        self.kind.price()
    }

    pub fn is_limit(&self) -> bool {
        self.kind.is_limit()
    }

    /// Status derived from a fill delta applied to `filled`, per the state machine:
    /// `NEW -> PARTIALLY_EXECUTED -> EXECUTED`, monotonic, no transition back.
    pub fn status_after_fill(qty: u64, filled: u64) -> OrderStatus {
        if filled == qty {
            OrderStatus::Executed
        } else if filled > 0 {
            OrderStatus::PartiallyExecuted
        } else {
            OrderStatus::New
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_monotonic() {
        assert_eq!(Order::status_after_fill(10, 0), OrderStatus::New);
        assert_eq!(Order::status_after_fill(10, 4), OrderStatus::PartiallyExecuted);
        assert_eq!(Order::status_after_fill(10, 10), OrderStatus::Executed);
    }

    #[test]
    fn remaining_is_qty_minus_filled() {
        let order = Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            ticker: "MEMECOIN".into(),
            direction: Direction::Sell,
            kind: OrderKind::Limit { price: 150 },
            qty: 3,
            filled: 1,
            status: OrderStatus::PartiallyExecuted,
            timestamp: Utc::now(),
        };
        assert_eq!(order.remaining(), 2);
    }
}
