use std::path::Path;
use std::sync::Arc;

use crate::engine::MatchingEngine;
use crate::ledger::Ledger;
use crate::ledger::store::StoreError;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub engine: Arc<MatchingEngine>,
}

impl AppState {
    /// Opens the ledger at `data_dir` and rebuilds every book from its open
    /// LIMIT orders. Must complete before the HTTP server starts accepting
    /// traffic.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let ledger = Ledger::open(data_dir)?;
        let engine = MatchingEngine::new();

        let instruments = ledger.list_instruments().await.unwrap_or_default();
        for instrument in instruments {
            engine.add_instrument(&instrument.ticker).await;
        }
        let open_orders = ledger.list_open_orders().await.unwrap_or_default();
        engine.startup(open_orders).await;

        Ok(Self {
            ledger: Arc::new(ledger),
            engine: Arc::new(engine),
        })
    }
}
