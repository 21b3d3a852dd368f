//! Executed trades. Append-only: one record per (bid, ask) match for the
//! traded asset. The cash leg is implicit (`amount * price`), not separately
//! recorded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Trade {
    #[bincode(with_serde)]
    pub id: Uuid,
    #[bincode(with_serde)]
    pub buyer_id: Uuid,
    #[bincode(with_serde)]
    pub seller_id: Uuid,
    pub ticker: String,
    pub amount: u64,
    pub price: u64,
    #[bincode(with_serde)]
    pub timestamp: DateTime<Utc>,
}
