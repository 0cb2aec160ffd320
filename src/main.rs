use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let default_filter = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.parse().unwrap_or_else(|_| "info".parse().unwrap()));
    // MCP stdio transport owns stdout; all diagnostics go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    lattice::cli::run().await
}
