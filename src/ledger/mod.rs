//! The ledger owns every durable entity (users, instruments, balances,
//! orders, trades) and is the only thing in the core allowed to move money.
//!
//! Concurrency model: a single [`tokio::sync::Mutex`] serializes every
//! balance-mutating sequence (block/unblock/settle/deposit/withdraw). This
//! is coarser than the fixed `(buyer_id, seller_id)` lock ordering a
//! per-row-locked ledger would need, but with one process-wide lock there is
//! only ever one lock to take, so there is no ordering to get wrong. See
//! DESIGN.md for the tradeoff.

pub mod store;

use uuid::Uuid;

use crate::balance::Balance;
use crate::errors::ApiError;
use crate::instrument::{Instrument, Visibility};
use crate::orderbook::TradeExecution;
use crate::orders::Order;
use crate::trade::Trade;
use crate::user::User;
use store::{Store, StoreError};

pub struct Ledger {
    store: Store,
    lock: tokio::sync::Mutex<()>,
}

impl Ledger {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        Ok(Self {
            store: Store::open(path)?,
            lock: tokio::sync::Mutex::new(()),
        })
    }

    // -- users -----------------------------------------------------------

    pub async fn register_user(&self, name: String) -> Result<User, ApiError> {
        let _guard = self.lock.lock().await;
        let user = User::new(name);
        self.store.put_user(&user)?;
        Ok(user)
    }

    pub async fn get_user(&self, id: Uuid) -> Result<User, ApiError> {
        self.store
            .get_user(id)?
            .ok_or_else(|| ApiError::NotFound(format!("user {id} not found")))
    }

    pub async fn authenticate(&self, api_key: &str) -> Result<User, ApiError> {
        let user = self
            .store
            .get_user_by_api_key(api_key)?
            .ok_or_else(|| ApiError::Authorization("unknown api key".into()))?;
        if !user.is_active() {
            return Err(ApiError::Authorization("account deleted".into()));
        }
        Ok(user)
    }

    pub async fn delete_user(&self, id: Uuid) -> Result<(), ApiError> {
        let _guard = self.lock.lock().await;
        let mut user = self.get_user(id).await?;
        user.visibility = Visibility::Deleted;
        self.store.put_user(&user)?;
        Ok(())
    }

    /// Grants `ADMIN` to an existing user. There is no HTTP surface for this:
    /// the first admin is always provisioned out-of-band (ops/migration),
    /// same as the source system.
    pub async fn promote_to_admin(&self, id: Uuid) -> Result<User, ApiError> {
        let _guard = self.lock.lock().await;
        let mut user = self.get_user(id).await?;
        user.role = crate::user::Role::Admin;
        self.store.put_user(&user)?;
        Ok(user)
    }

    // -- instruments -------------------------------------------------------

    pub async fn add_instrument(&self, ticker: String, name: String) -> Result<Instrument, ApiError> {
        let _guard = self.lock.lock().await;
        if self.store.get_instrument(&ticker)?.is_some() {
            return Err(ApiError::DomainConflict(format!("instrument {ticker} already exists")));
        }
        let instrument = Instrument::new(ticker, name);
        self.store.put_instrument(&instrument)?;
        Ok(instrument)
    }

    /// Marks the instrument deleted without draining its resting orders --
    /// matching the source system's behavior of leaving the book alone.
    pub async fn remove_instrument(&self, ticker: &str) -> Result<(), ApiError> {
        let _guard = self.lock.lock().await;
        let mut instrument = self
            .store
            .get_instrument(ticker)?
            .ok_or_else(|| ApiError::NotFound(format!("instrument {ticker} not found")))?;
        instrument.visibility = Visibility::Deleted;
        self.store.put_instrument(&instrument)?;
        Ok(())
    }

    pub async fn get_instrument(&self, ticker: &str) -> Result<Instrument, ApiError> {
        self.store
            .get_instrument(ticker)?
            .ok_or_else(|| ApiError::NotFound(format!("instrument {ticker} not found")))
    }

    pub async fn list_instruments(&self) -> Result<Vec<Instrument>, ApiError> {
        Ok(self.store.list_instruments()?)
    }

    // -- balances --------------------------------------------------------

    pub async fn get_balance(&self, user_id: Uuid, ticker: &str) -> Result<Balance, ApiError> {
        Ok(self
            .store
            .get_balance(user_id, ticker)?
            .unwrap_or_else(|| Balance::zero(user_id)))
    }

    pub async fn list_balances(&self, user_id: Uuid) -> Result<Vec<(String, Balance)>, ApiError> {
        Ok(self.store.list_balances(user_id)?)
    }

    /// Admin-only credit; increases `available` directly.
    pub async fn deposit(&self, user_id: Uuid, ticker: &str, amount: u64) -> Result<Balance, ApiError> {
        let _guard = self.lock.lock().await;
        let mut balance = self
            .store
            .get_balance(user_id, ticker)?
            .unwrap_or_else(|| Balance::zero(user_id));
        balance.available += amount;
        self.store.put_balance(ticker, &balance)?;
        Ok(balance)
    }

    /// Admin-only debit; only ever touches `available`, never `blocked`.
    pub async fn withdraw(&self, user_id: Uuid, ticker: &str, amount: u64) -> Result<Balance, ApiError> {
        let _guard = self.lock.lock().await;
        let mut balance = self
            .store
            .get_balance(user_id, ticker)?
            .unwrap_or_else(|| Balance::zero(user_id));
        if balance.available < amount {
            return Err(ApiError::DomainConflict("insufficient available balance".into()));
        }
        balance.available -= amount;
        self.store.put_balance(ticker, &balance)?;
        Ok(balance)
    }

    /// Moves `amount` from `available` to `blocked`, reserving it against an
    /// open order. Fails if the available balance can't cover it.
    pub async fn block(&self, user_id: Uuid, ticker: &str, amount: u64) -> Result<(), ApiError> {
        let _guard = self.lock.lock().await;
        let mut balance = self
            .store
            .get_balance(user_id, ticker)?
            .unwrap_or_else(|| Balance::zero(user_id));
        if balance.available < amount {
            return Err(ApiError::DomainConflict("insufficient funds".into()));
        }
        balance.available -= amount;
        balance.blocked += amount;
        self.store.put_balance(ticker, &balance)?;
        Ok(())
    }

    /// Moves `amount` back from `blocked` to `available`, e.g. on cancel.
    pub async fn unblock(&self, user_id: Uuid, ticker: &str, amount: u64) -> Result<(), ApiError> {
        let _guard = self.lock.lock().await;
        let mut balance = self
            .store
            .get_balance(user_id, ticker)?
            .unwrap_or_else(|| Balance::zero(user_id));
        if balance.blocked < amount {
            return Err(ApiError::Consistency(format!(
                "unblock {amount} exceeds blocked {} for user {user_id} ticker {ticker}",
                balance.blocked
            )));
        }
        balance.blocked -= amount;
        balance.available += amount;
        self.store.put_balance(ticker, &balance)?;
        Ok(())
    }

    /// Settles one matched pair: moves the asset leg from the seller's
    /// blocked balance to the buyer's available balance, moves the cash leg
    /// from the buyer's blocked RUB to the seller's available RUB, refunds
    /// any price-improvement `change` to the buyer, and appends the trade
    /// tape entry. Returns the recorded [`Trade`].
    pub async fn settle_trade(&self, exec: &TradeExecution) -> Result<Trade, ApiError> {
        let _guard = self.lock.lock().await;

        let cash_amount = exec
            .price
            .checked_mul(exec.qty)
            .ok_or_else(|| ApiError::Consistency("trade cash amount overflowed u64".into()))?;
        let buyer_cash_release = cash_amount + exec.change.unwrap_or(0);

        let mut seller_asset = self
            .store
            .get_balance(exec.seller_id, &exec.ticker)?
            .unwrap_or_else(|| Balance::zero(exec.seller_id));
        if seller_asset.blocked < exec.qty {
            return Err(ApiError::Consistency(format!(
                "seller {} has insufficient blocked {} to settle {} units",
                exec.seller_id, exec.ticker, exec.qty
            )));
        }
        seller_asset.blocked -= exec.qty;
        self.store.put_balance(&exec.ticker, &seller_asset)?;

        let mut buyer_asset = self
            .store
            .get_balance(exec.buyer_id, &exec.ticker)?
            .unwrap_or_else(|| Balance::zero(exec.buyer_id));
        buyer_asset.available += exec.qty;
        self.store.put_balance(&exec.ticker, &buyer_asset)?;

        let mut buyer_cash = self
            .store
            .get_balance(exec.buyer_id, crate::instrument::RUB)?
            .unwrap_or_else(|| Balance::zero(exec.buyer_id));
        if buyer_cash.blocked < buyer_cash_release {
            return Err(ApiError::Consistency(format!(
                "buyer {} has insufficient blocked RUB to settle trade",
                exec.buyer_id
            )));
        }
        buyer_cash.blocked -= buyer_cash_release;
        buyer_cash.available += exec.change.unwrap_or(0);
        self.store.put_balance(crate::instrument::RUB, &buyer_cash)?;

        let mut seller_cash = self
            .store
            .get_balance(exec.seller_id, crate::instrument::RUB)?
            .unwrap_or_else(|| Balance::zero(exec.seller_id));
        seller_cash.available += cash_amount;
        self.store.put_balance(crate::instrument::RUB, &seller_cash)?;

        let trade = Trade {
            id: Uuid::new_v4(),
            buyer_id: exec.buyer_id,
            seller_id: exec.seller_id,
            ticker: exec.ticker.clone(),
            amount: exec.qty,
            price: exec.price,
            timestamp: chrono::Utc::now(),
        };
        self.store.insert_trade(&trade)?;
        Ok(trade)
    }

    // -- orders ------------------------------------------------------------

    pub async fn put_order(&self, order: &Order) -> Result<(), ApiError> {
        Ok(self.store.put_order(order)?)
    }

    pub async fn get_order(&self, id: Uuid) -> Result<Order, ApiError> {
        self.store
            .get_order(id)?
            .ok_or_else(|| ApiError::NotFound(format!("order {id} not found")))
    }

    pub async fn list_orders_by_user(&self, user_id: Uuid) -> Result<Vec<Order>, ApiError> {
        Ok(self.store.list_orders_by_user(user_id)?)
    }

    /// Every still-open LIMIT order, used to rebuild in-memory books on startup.
    pub async fn list_open_orders(&self) -> Result<Vec<Order>, ApiError> {
        Ok(self.store.list_open_orders()?)
    }

    // -- trade tape ------------------------------------------------------

    pub async fn page_trades(
        &self,
        ticker: &str,
        after: Option<&str>,
        limit: usize,
    ) -> Result<(Vec<Trade>, Option<String>), ApiError> {
        Ok(self.store.page_trades_asc(ticker, after, limit)?)
    }
}
