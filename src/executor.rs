//! Turns a batch of [`TradeExecution`]s into durable state: one ledger
//! settlement and two order-row updates per match.
//!
//! Executions are sorted by `(buyer_id, seller_id)` before settlement. The
//! ledger itself only needs this for deterministic audit ordering -- its
//! single coarse lock already rules out the classic two-lock deadlock a
//! per-row-locked ledger would need the ordering to prevent -- but sorting
//! costs nothing and keeps the on-disk trade tape reproducible given the
//! same batch of crosses.

use crate::errors::ApiError;
use crate::ledger::Ledger;
use crate::orderbook::TradeExecution;
use crate::orders::OrderStatus;
use crate::trade::Trade;
use uuid::Uuid;

pub struct TradeExecutor<'a> {
    ledger: &'a Ledger,
}

impl<'a> TradeExecutor<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self { ledger }
    }

    pub async fn settle_batch(&self, mut executions: Vec<TradeExecution>) -> Result<Vec<Trade>, ApiError> {
        executions.sort_by_key(|e| (e.buyer_id, e.seller_id));

        let mut trades = Vec::with_capacity(executions.len());
        for exec in &executions {
            let trade = self.ledger.settle_trade(exec).await?;
            self.sync_order(exec.buyer_order_id, exec.buyer_filled, exec.buyer_status).await?;
            self.sync_order(exec.seller_order_id, exec.seller_filled, exec.seller_status).await?;
            trades.push(trade);
        }
        Ok(trades)
    }

    async fn sync_order(&self, order_id: Uuid, filled: u64, status: OrderStatus) -> Result<(), ApiError> {
        let mut order = self.ledger.get_order(order_id).await?;
        order.filled = filled;
        order.status = status;
        self.ledger.put_order(&order).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{Direction, OrderKind};
    use chrono::Utc;
    use tempfile::tempdir;

    async fn seeded_ledger(dir: &std::path::Path) -> (Ledger, crate::user::User, crate::user::User) {
        let ledger = Ledger::open(dir).unwrap();
        let buyer = ledger.register_user("buyer".into()).await.unwrap();
        let seller = ledger.register_user("seller".into()).await.unwrap();
        ledger.add_instrument("MEMECOIN".into(), "Meme Coin".into()).await.unwrap();
        ledger.deposit(buyer.id, crate::instrument::RUB, 10_000).await.unwrap();
        ledger.deposit(seller.id, "MEMECOIN", 100).await.unwrap();
        (ledger, buyer, seller)
    }

    #[tokio::test]
    async fn settle_batch_moves_funds_and_marks_orders_executed() {
        let dir = tempdir().unwrap();
        let (ledger, buyer, seller) = seeded_ledger(dir.path()).await;

        ledger.block(buyer.id, crate::instrument::RUB, 1000).await.unwrap();
        ledger.block(seller.id, "MEMECOIN", 10).await.unwrap();

        let buy_order = crate::orders::Order {
            id: Uuid::new_v4(),
            user_id: buyer.id,
            ticker: "MEMECOIN".into(),
            direction: Direction::Buy,
            kind: OrderKind::Limit { price: 100 },
            qty: 10,
            filled: 0,
            status: OrderStatus::New,
            timestamp: Utc::now(),
        };
        let sell_order = crate::orders::Order {
            id: Uuid::new_v4(),
            user_id: seller.id,
            ticker: "MEMECOIN".into(),
            direction: Direction::Sell,
            kind: OrderKind::Limit { price: 100 },
            qty: 10,
            filled: 0,
            status: OrderStatus::New,
            timestamp: Utc::now(),
        };
        ledger.put_order(&buy_order).await.unwrap();
        ledger.put_order(&sell_order).await.unwrap();

        let exec = TradeExecution {
            buyer_order_id: buy_order.id,
            buyer_id: buyer.id,
            buyer_filled: 10,
            buyer_status: OrderStatus::Executed,
            seller_order_id: sell_order.id,
            seller_id: seller.id,
            seller_filled: 10,
            seller_status: OrderStatus::Executed,
            ticker: "MEMECOIN".into(),
            qty: 10,
            price: 100,
            change: None,
        };

        let executor = TradeExecutor::new(&ledger);
        let trades = executor.settle_batch(vec![exec]).await.unwrap();
        assert_eq!(trades.len(), 1);

        let buyer_asset = ledger.get_balance(buyer.id, "MEMECOIN").await.unwrap();
        assert_eq!(buyer_asset.available, 10);
        let seller_cash = ledger.get_balance(seller.id, crate::instrument::RUB).await.unwrap();
        assert_eq!(seller_cash.available, 1000);

        let stored_buy = ledger.get_order(buy_order.id).await.unwrap();
        assert_eq!(stored_buy.status, OrderStatus::Executed);
    }
}
