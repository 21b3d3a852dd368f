//! Background reconciliation: periodically crosses every book with pending
//! activity and settles the resulting trades. Runs for the lifetime of the
//! process; a single failed pass is logged and the loop continues.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::engine::MatchingEngine;
use crate::executor::TradeExecutor;
use crate::ledger::Ledger;

pub async fn run(ledger: &Ledger, engine: &MatchingEngine, interval: Duration, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("reconciliation loop shutting down");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let batches = engine.cross_all().await;
        if batches.is_empty() {
            continue;
        }
        for (ticker, trades) in batches {
            let qty: u64 = trades.iter().map(|t| t.qty).sum();
            match TradeExecutor::new(ledger).settle_batch(trades).await {
                Ok(settled) => {
                    tracing::info!(ticker = %ticker, trades = settled.len(), qty, "reconciliation pass settled trades");
                }
                Err(e) => {
                    tracing::error!(ticker = %ticker, error = %e, "reconciliation pass failed to settle trades");
                }
            }
        }
    }
}
