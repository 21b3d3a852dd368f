//! Tradable instruments, keyed by ticker.
//!
//! `RUB` is the mandatory cash instrument: every balance is denominated in it
//! and it is never itself listed as a tradable instrument with its own book.

use serde::{Deserialize, Serialize};

/// The cash asset. Every order price is a quantity of `RUB` per unit of the traded ticker.
pub const RUB: &str = "RUB";

/// 2-10 uppercase letters, matching `^[A-Z]{2,10}$`.
pub fn is_valid_ticker(ticker: &str) -> bool {
    let len = ticker.len();
    (2..=10).contains(&len) && ticker.bytes().all(|b| b.is_ascii_uppercase())
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub enum Visibility {
    Active,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
pub struct Instrument {
    pub ticker: String,
    pub name: String,
    pub visibility: Visibility,
}

impl Instrument {
    pub fn new(ticker: String, name: String) -> Self {
        Self {
            ticker,
            name,
            visibility: Visibility::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.visibility == Visibility::Active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_pattern() {
        assert!(is_valid_ticker("RUB"));
        assert!(is_valid_ticker("MEMECOIN"));
        assert!(!is_valid_ticker("A"));
        assert!(!is_valid_ticker("TOOLONGTICKER"));
        assert!(!is_valid_ticker("lower"));
        assert!(!is_valid_ticker("AB1"));
    }
}
