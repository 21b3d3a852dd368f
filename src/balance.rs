//! Per (user, ticker) balances. `available` is spendable; `blocked` is
//! reserved by open orders or in-flight settlement. The user-visible total is
//! always `available + blocked`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Balance {
    #[bincode(with_serde)]
    pub user_id: Uuid,
    pub available: u64,
    pub blocked: u64,
}

impl Balance {
    pub fn zero(user_id: Uuid) -> Self {
        Self {
            user_id,
            available: 0,
            blocked: 0,
        }
    }

    pub fn total(&self) -> u64 {
        // Both fields are u64 and bounded by the deposits that created them;
        // overflow here would already be a Consistency violation upstream.
        self.available + self.blocked
    }
}
