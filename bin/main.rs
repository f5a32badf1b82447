use anyhow::Result;
use rxd_stratum::cli;

#[tokio::main]
async fn main() -> Result<()> {
    cli::run().await
}
