//! Process configuration, loaded from `.env` (if present) and the
//! environment, parsed with `clap`'s `env` feature so every field has a
//! documented flag and a matching env var.

use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "exchange-core", version, about = "Centralized RUB-denominated exchange core")]
pub struct Config {
    /// TCP port the HTTP API listens on.
    #[arg(long, env = "EXCHANGE_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Directory the ParityDB ledger is stored in.
    #[arg(long, env = "EXCHANGE_DATA_DIR", default_value = "exchange_data")]
    pub data_dir: String,

    /// Interval between reconciliation passes, in milliseconds.
    #[arg(long, env = "EXCHANGE_RECONCILE_MS", default_value_t = 200)]
    pub reconcile_interval_ms: u64,

    /// Tracing filter, e.g. `info`, `exchange_core=debug,tower_http=info`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,
}

impl Config {
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Config::parse()
    }
}
