// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:       Configuration structs loaded from JSON
// - environment:  Production / paper host selection
// - error:        Feed error taxonomy
// - auth:         Access token + approval key acquisition
// - connection:   One WebSocket feed session per account
// - router:       Capacity-aware symbol -> account routing
// - supervisor:   Lifecycle orchestration / control surface
// - dispatch:     Decoder + catalog collaborator seams
// - metrics:      Lock-free runtime counters
// - util:         Shared helpers (time, secret masking)
//
mod auth;
mod config;
mod connection;
mod dispatch;
mod environment;
mod error;
mod metrics;
mod router;
mod supervisor;
mod util;

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use rustls::crypto::{CryptoProvider, ring};

use log::{debug, info, warn};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use auth::TokenManager;
use config::Config;
use dispatch::{ConfigCatalog, LoggingDecoder};
use metrics::METRICS;
use supervisor::FeedSupervisor;

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// This is the main runtime for the realtime feed collector.
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Initialize logging
// - Load configuration
// - Warm the access-token cache
// - Connect the account pool and subscribe the catalog
// - Keep the process alive indefinitely
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // IMPORTANT:
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation. This must be executed exactly once and
    // as early as possible in the process lifecycle.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .expect("failed to install rustls CryptoProvider");

    env_logger::init();

    // --------------------------------------------------------
    // Load configuration from disk
    //
    // NOTE:
    // - The config file contains app keys and secrets.
    // - It must not be committed to version control.
    // --------------------------------------------------------
    let config: Config = load_config("config.json")?;
    config.validate()?;

    let environment = config.environment;
    info!("starting feed collector against {:?} with {} accounts", environment, config.accounts.len());

    // --------------------------------------------------------
    // Auth setup
    //
    // The token endpoint is account-agnostic; the first
    // configured account's credentials serve it. Approval keys
    // are fetched per account inside each connect.
    // --------------------------------------------------------
    let primary = &config.accounts[0];
    let tokens = Arc::new(TokenManager::new(
        reqwest::Client::new(),
        primary.app_key.clone(),
        primary.app_secret.clone(),
    ));

    // Warm the token cache up front. The feed itself only needs
    // approval keys, so a failure here degrades, not aborts.
    match tokens.access_token(environment).await {
        Ok(token) => info!("access token cached, expires {}", token.expires_at),
        Err(e) => warn!("access token warmup failed: {}", e),
    }

    // --------------------------------------------------------
    // Supervisor setup
    // --------------------------------------------------------
    let log_frames = config
        .debug
        .as_ref()
        .and_then(|d| d.log_frames)
        .unwrap_or(false);

    let supervisor = FeedSupervisor::new(
        config.accounts.clone(),
        environment,
        tokens,
        Arc::new(LoggingDecoder::new(log_frames)),
        Arc::new(ConfigCatalog::new(config.catalog.symbols.clone())),
        config.feed.clone(),
    );

    // --------------------------------------------------------
    // Start metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    tokio::spawn(async {
        loop {
            sleep(Duration::from_secs(10)).await;
            info!("[METRICS] {}", METRICS.report_line());
        }
    });

    // --------------------------------------------------------
    // Connect the pool and subscribe the catalog
    //
    // Both calls are best-effort: one broken account or a few
    // failed symbols must not take the process down.
    // --------------------------------------------------------
    let status = supervisor.start_all().await;
    if status.values().all(|open| !open) {
        warn!("no account came up; retry is an operator action, staying alive for the control surface");
    }

    match supervisor.load_all_from_catalog().await {
        Ok(failed) if failed.is_empty() => {
            info!("catalog fully subscribed ({} symbols live)", supervisor.total_subscriptions());
        }
        Ok(failed) => {
            warn!("{} catalog symbols failed to subscribe: {:?}", failed.len(), failed);
        }
        Err(e) => warn!("catalog load failed: {}", e),
    }
    debug!("initial routing table: {:?}", supervisor.subscription_snapshot());

    // --------------------------------------------------------
    // Run until interrupted
    //
    // The feed sessions run in background tasks. On Ctrl-C the
    // pool is torn down hard; subscriptions are not drained.
    // --------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("interrupt received, stopping all accounts");
    supervisor.stop_all().await;

    Ok(())
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads a JSON configuration file from disk and deserializes
// it into the strongly typed `Config` structure.
//
// TODO:
// - Support CLI override (e.g. --config path)
//
fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path)?;
    let cfg = serde_json::from_str(&data)?;
    Ok(cfg)
}
