//! ParityDB-backed persistence for every durable entity: users, instruments,
//! balances, orders and trades.
//!
//! Key layout follows the prefix-scan convention of the original book-trade
//! store: fixed-width id fields first so a column can be range-scanned by
//! prefix, composite keys big-endian so lexicographic order matches temporal
//! order.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use bincode::config::{self, standard};
use bincode::error::{DecodeError, EncodeError};
use chrono::{DateTime, Utc};
use parity_db::{BTreeIterator, ColId, Db, Options};
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

use crate::balance::Balance;
use crate::instrument::Instrument;
use crate::orders::Order;
use crate::trade::Trade;
use crate::user::User;

const COL_USERS: ColId = 0;
const COL_API_KEYS: ColId = 1;
const COL_INSTRUMENTS: ColId = 2;
const COL_BALANCES: ColId = 3;
const COL_ORDERS: ColId = 4;
const COL_ORDERS_BY_USER: ColId = 5;
const COL_TRADES: ColId = 6;
const NUM_COLUMNS: u8 = 7;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("ParityDB error: {0}")]
    Parity(#[from] parity_db::Error),
    #[error("bincode encode error: {0}")]
    BincodeEncode(#[from] EncodeError),
    #[error("bincode decode error: {0}")]
    BincodeDecode(#[from] DecodeError),
    #[error("invalid cursor")]
    BadCursor,
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Versioned, opaque trade-history cursor, encoded as URL-safe base64 JSON
/// (same shape as the original trade pagination cursor, generalized with a
/// ticker so it can reject cross-instrument reuse).
#[derive(serde::Serialize, serde::Deserialize)]
struct Cursor {
    v: u8,
    ticker: String,
    ts_nanos: i64,
    trade_id: Uuid,
}

fn encode_cursor(c: &Cursor) -> String {
    B64.encode(serde_json::to_vec(c).unwrap())
}

fn decode_cursor(s: &str) -> StoreResult<Cursor> {
    let bytes = B64.decode(s).map_err(|_| StoreError::BadCursor)?;
    let c: Cursor = serde_json::from_slice(&bytes).map_err(|_| StoreError::BadCursor)?;
    if c.v != 1 {
        return Err(StoreError::BadCursor);
    }
    Ok(c)
}

fn trade_key(ticker: &str, ts_nanos: i64, trade_id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(ticker.len() + 1 + 8 + 16);
    key.extend_from_slice(ticker.as_bytes());
    key.push(b':');
    key.extend_from_slice(&ts_nanos.to_be_bytes());
    key.extend_from_slice(trade_id.as_bytes());
    key
}

fn trade_prefix(ticker: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(ticker.len() + 1);
    key.extend_from_slice(ticker.as_bytes());
    key.push(b':');
    key
}

fn balance_key(user_id: Uuid, ticker: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(16 + ticker.len());
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(ticker.as_bytes());
    key
}

fn order_user_key(user_id: Uuid, order_id: Uuid) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(user_id.as_bytes());
    key.extend_from_slice(order_id.as_bytes());
    key
}

pub struct Store {
    db: Db,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut opts = Options::with_columns(path.as_ref(), NUM_COLUMNS);
        opts.columns[COL_BALANCES as usize].btree_index = true;
        opts.columns[COL_ORDERS_BY_USER as usize].btree_index = true;
        opts.columns[COL_TRADES as usize].btree_index = true;
        let db = Db::open_or_create(&opts)?;
        Ok(Store { db })
    }

    fn encode<T: bincode::Encode>(v: &T) -> StoreResult<Vec<u8>> {
        Ok(bincode::encode_to_vec(v, standard())?)
    }

    fn decode<T: bincode::Decode<()>>(raw: &[u8]) -> StoreResult<T> {
        let (v, _) = bincode::decode_from_slice(raw, standard())?;
        Ok(v)
    }

    // -- users -----------------------------------------------------------

    pub fn put_user(&self, user: &User) -> StoreResult<()> {
        let value = Self::encode(user)?;
        self.db.commit(vec![
            (COL_USERS, user.id.as_bytes().to_vec(), Some(value)),
            (
                COL_API_KEYS,
                user.api_key.as_bytes().to_vec(),
                Some(user.id.as_bytes().to_vec()),
            ),
        ])?;
        Ok(())
    }

    pub fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        match self.db.get(COL_USERS, id.as_bytes())? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn get_user_by_api_key(&self, api_key: &str) -> StoreResult<Option<User>> {
        let Some(id_bytes) = self.db.get(COL_API_KEYS, api_key.as_bytes())? else {
            return Ok(None);
        };
        let id = Uuid::from_slice(&id_bytes).map_err(|_| StoreError::BadCursor)?;
        self.get_user(id)
    }

    // -- instruments -------------------------------------------------------

    pub fn put_instrument(&self, instrument: &Instrument) -> StoreResult<()> {
        let value = Self::encode(instrument)?;
        self.db
            .commit(vec![(COL_INSTRUMENTS, instrument.ticker.as_bytes().to_vec(), Some(value))])?;
        Ok(())
    }

    pub fn get_instrument(&self, ticker: &str) -> StoreResult<Option<Instrument>> {
        match self.db.get(COL_INSTRUMENTS, ticker.as_bytes())? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn list_instruments(&self) -> StoreResult<Vec<Instrument>> {
        let mut iter: BTreeIterator<'_> = self.db.iter(COL_INSTRUMENTS)?;
        iter.seek_to_first()?;
        let mut out = Vec::new();
        while let Some((_, raw)) = iter.next()? {
            out.push(Self::decode(&raw)?);
        }
        Ok(out)
    }

    // -- balances ------------------------------------------------------

    pub fn get_balance(&self, user_id: Uuid, ticker: &str) -> StoreResult<Option<Balance>> {
        match self.db.get(COL_BALANCES, &balance_key(user_id, ticker))? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn put_balance(&self, ticker: &str, balance: &Balance) -> StoreResult<()> {
        let value = Self::encode(balance)?;
        self.db.commit(vec![(
            COL_BALANCES,
            balance_key(balance.user_id, ticker),
            Some(value),
        )])?;
        Ok(())
    }

    /// All balances for a user, across every instrument, keyed by ticker.
    pub fn list_balances(&self, user_id: Uuid) -> StoreResult<Vec<(String, Balance)>> {
        let mut iter: BTreeIterator<'_> = self.db.iter(COL_BALANCES)?;
        let prefix = user_id.as_bytes().to_vec();
        iter.seek(&prefix)?;
        let mut out = Vec::new();
        while let Some((key, raw)) = iter.next()? {
            if !key.starts_with(&prefix) {
                break;
            }
            let ticker = String::from_utf8_lossy(&key[16..]).into_owned();
            out.push((ticker, Self::decode(&raw)?));
        }
        Ok(out)
    }

    // -- orders ----------------------------------------------------------

    pub fn put_order(&self, order: &Order) -> StoreResult<()> {
        let value = Self::encode(order)?;
        self.db.commit(vec![
            (COL_ORDERS, order.id.as_bytes().to_vec(), Some(value)),
            (
                COL_ORDERS_BY_USER,
                order_user_key(order.user_id, order.id),
                Some(order.id.as_bytes().to_vec()),
            ),
        ])?;
        Ok(())
    }

    pub fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        match self.db.get(COL_ORDERS, id.as_bytes())? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn list_orders_by_user(&self, user_id: Uuid) -> StoreResult<Vec<Order>> {
        let mut iter: BTreeIterator<'_> = self.db.iter(COL_ORDERS_BY_USER)?;
        let prefix = user_id.as_bytes().to_vec();
        iter.seek(&prefix)?;
        let mut out = Vec::new();
        while let Some((key, order_id_bytes)) = iter.next()? {
            if !key.starts_with(&prefix) {
                break;
            }
            let order_id = Uuid::from_slice(&order_id_bytes).map_err(|_| StoreError::BadCursor)?;
            if let Some(order) = self.get_order(order_id)? {
                out.push(order);
            }
        }
        Ok(out)
    }

    /// Every LIMIT order still open, for rebuilding in-memory books at startup.
    pub fn list_open_orders(&self) -> StoreResult<Vec<Order>> {
        let mut iter: BTreeIterator<'_> = self.db.iter(COL_ORDERS)?;
        iter.seek_to_first()?;
        let mut out = Vec::new();
        while let Some((_, raw)) = iter.next()? {
            let order: Order = Self::decode(&raw)?;
            if order.is_limit() && order.status.is_open() {
                out.push(order);
            }
        }
        Ok(out)
    }

    // -- trades --------------------------------------------------------

    pub fn insert_trade(&self, trade: &Trade) -> StoreResult<()> {
        let key = trade_key(&trade.ticker, trade.timestamp.timestamp_nanos_opt().unwrap_or_default(), trade.id);
        let value = Self::encode(trade)?;
        self.db.commit(vec![(COL_TRADES, key, Some(value))])?;
        Ok(())
    }

    /// Page forward (ascending time) through a ticker's trade tape.
    pub fn page_trades_asc(
        &self,
        ticker: &str,
        after: Option<&str>,
        limit: usize,
    ) -> StoreResult<(Vec<Trade>, Option<String>)> {
        let mut iter: BTreeIterator<'_> = self.db.iter(COL_TRADES)?;
        let prefix = trade_prefix(ticker);

        match after {
            None => {
                iter.seek(&prefix)?;
            }
            Some(s) => {
                let c = decode_cursor(s)?;
                if c.ticker != ticker {
                    return Err(StoreError::BadCursor);
                }
                let full = trade_key(ticker, c.ts_nanos, c.trade_id);
                iter.seek(&full)?;
                match iter.next()? {
                    Some((k, _)) if k == full => {}
                    _ => return Err(StoreError::BadCursor),
                }
            }
        }

        let mut items = Vec::with_capacity(limit.min(256));
        let mut next_cursor = None;
        let mut read = 0usize;
        while read < limit + 1 {
            match iter.next()? {
                Some((k, v)) if k.starts_with(&prefix) => {
                    let trade: Trade = Self::decode(&v)?;
                    if items.len() < limit {
                        next_cursor = Some(encode_cursor(&Cursor {
                            v: 1,
                            ticker: ticker.to_string(),
                            ts_nanos: trade.timestamp.timestamp_nanos_opt().unwrap_or_default(),
                            trade_id: trade.id,
                        }));
                        items.push(trade);
                    }
                    read += 1;
                }
                _ => break,
            }
        }

        let next = if read > limit { next_cursor } else { None };
        Ok((items, next))
    }
}

#[allow(dead_code)]
fn _assert_types(_: DateTime<Utc>) {
    let _ = config::standard();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::{Direction, OrderKind, OrderStatus};
    use tempfile::tempdir;

    fn sample_order(ticker: &str) -> Order {
        Order {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            ticker: ticker.to_string(),
            direction: Direction::Buy,
            kind: OrderKind::Limit { price: 100 },
            qty: 5,
            filled: 0,
            status: OrderStatus::New,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn user_roundtrips_by_id_and_api_key() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let user = User::new("alice".into());
        store.put_user(&user).unwrap();

        let by_id = store.get_user(user.id).unwrap().unwrap();
        assert_eq!(by_id.name, "alice");
        let by_key = store.get_user_by_api_key(&user.api_key).unwrap().unwrap();
        assert_eq!(by_key.id, user.id);
    }

    #[test]
    fn balances_are_scoped_per_ticker() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let user_id = Uuid::new_v4();
        store
            .put_balance("RUB", &Balance { user_id, available: 1000, blocked: 0 })
            .unwrap();
        store
            .put_balance("MEMECOIN", &Balance { user_id, available: 5, blocked: 0 })
            .unwrap();

        let all = store.list_balances(user_id).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn orders_list_by_user() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let order = sample_order("MEMECOIN");
        store.put_order(&order).unwrap();

        let found = store.list_orders_by_user(order.user_id).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, order.id);
    }

    #[test]
    fn trade_pagination_rejects_cross_ticker_cursor() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path()).unwrap();
        let t1 = Trade {
            id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            ticker: "MEMECOIN".into(),
            amount: 1,
            price: 100,
            timestamp: Utc::now(),
        };
        store.insert_trade(&t1).unwrap();

        let (page, cursor) = store.page_trades_asc("MEMECOIN", None, 10).unwrap();
        assert_eq!(page.len(), 1);
        assert!(cursor.is_none());

        let bogus = encode_cursor(&Cursor {
            v: 1,
            ticker: "OTHER".into(),
            ts_nanos: 0,
            trade_id: Uuid::new_v4(),
        });
        let res = store.page_trades_asc("MEMECOIN", Some(&bogus), 10);
        assert!(matches!(res, Err(StoreError::BadCursor)));
    }
}
