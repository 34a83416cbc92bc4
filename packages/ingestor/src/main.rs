//! TokenFlow: follows the chain head and accumulates USD transfer volume per
//! ERC-20 contract.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tokenflow_ingestor::logging::init_tracing;
use tokenflow_ingestor::{
    AlloyChainClient, CoinGeckoClient, Config, EtherscanClient, IngestOptions, Ingestor, RateLimiter,
    SymbolPriceMap, TokenLedger, ValueNormalizer,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignore if missing).
    let _ = dotenvy::dotenv();

    init_tracing().context("failed to initialise tracing")?;

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        rpc_url = %config.rpc_url,
        database = %config.database_url,
        poll_interval = ?config.poll_interval,
        window = ?config.active_window,
        "tokenflow starting"
    );

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("failed to build HTTP client")?;

    // Each upstream gets its own gate; a 429 from one does not stall the other
    let abi_source = EtherscanClient::new(
        http.clone(),
        config.etherscan_api_url.clone(),
        config.etherscan_api_key.clone(),
        Arc::new(RateLimiter::new(config.rate_limit)),
    );
    let price_source = CoinGeckoClient::new(
        http,
        config.coingecko_api_url.clone(),
        Arc::new(RateLimiter::new(config.rate_limit)),
    );

    let price_map = SymbolPriceMap::load(&price_source)
        .await
        .context("failed to load price symbol list")?;

    let chain = AlloyChainClient::connect(&config.rpc_url)
        .await
        .context("failed to connect to chain node")?;

    let ledger = TokenLedger::open(&config.database_url, config.active_window)
        .await
        .context("failed to open token ledger")?;

    let mut ingestor = Ingestor::new(
        Arc::new(chain),
        abi_source,
        ValueNormalizer::new(price_source, price_map),
        ledger,
        IngestOptions::from(&config),
    );

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();
    let loop_handle = tokio::spawn(async move {
        ingestor.run(shutdown_clone).await;
    });

    info!("ingestion running, press Ctrl+C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    info!("shutdown signal received, stopping...");
    shutdown.cancel();

    if let Err(e) = loop_handle.await {
        error!(error = %e, "ingestion task panicked");
    }

    info!("tokenflow stopped");
    Ok(())
}
