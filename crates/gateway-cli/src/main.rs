use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    gateway_cli::run_cli().await
}
