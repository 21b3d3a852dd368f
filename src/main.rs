#[tokio::main]
async fn main() -> anyhow::Result<()> {
    exchange_core::cli::run().await
}
