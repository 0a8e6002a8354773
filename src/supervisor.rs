use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{error, info, warn};

use crate::auth::TokenManager;
use crate::config::{Account, FeedTuning};
use crate::connection::FeedConnection;
use crate::dispatch::{FrameDecoder, SymbolCatalog};
use crate::environment::Environment;
use crate::router::SubscriptionRouter;

/// Stream identifier for the realtime trade-price feed.
///
/// The only stream this subsystem subscribes to; other tr_ids
/// (orderbook, execution notices) belong to other components.
pub const TR_ID_REALTIME_TRADE: &str = "H0STCNT0";

/// ============================================================
/// FeedSupervisor
/// ============================================================
///
/// Lifecycle orchestration over the account pool. This is the
/// control surface the rest of the application drives:
///
/// - start_all / stop_all
/// - subscribe / unsubscribe
/// - load_all_from_catalog
/// - connection_status / subscription_snapshot / total_subscriptions
///
/// FAILURE POLICY:
/// - One account's auth or connect trouble is logged and never
///   aborts work on the remaining accounts
/// - Symbols that cannot be subscribed (no capacity, send error)
///   come back as a failed list instead of an error
/// - No retry or backoff lives here; callers own that policy
pub struct FeedSupervisor {
    /// Connections in configuration order (also the router's
    /// tie-break order).
    connections: Vec<Arc<FeedConnection>>,
    router: SubscriptionRouter,
    catalog: Arc<dyn SymbolCatalog>,
}

impl FeedSupervisor {
    pub fn new(
        accounts: Vec<Account>,
        environment: Environment,
        tokens: Arc<TokenManager>,
        decoder: Arc<dyn FrameDecoder>,
        catalog: Arc<dyn SymbolCatalog>,
        tuning: FeedTuning,
    ) -> Self {
        let names: Vec<String> = accounts.iter().map(|a| a.name.clone()).collect();

        let connections = accounts
            .into_iter()
            .map(|account| {
                Arc::new(FeedConnection::new(
                    account,
                    environment,
                    tokens.clone(),
                    decoder.clone(),
                    tuning.clone(),
                ))
            })
            .collect();

        Self {
            connections,
            router: SubscriptionRouter::new(names, tuning.capacity_per_account),
            catalog,
        }
    }

    /// Connects every configured account.
    ///
    /// Best effort: a failing account is logged and skipped, the
    /// rest still get their connect attempt. Returns the
    /// per-account open state after the pass.
    pub async fn start_all(&self) -> HashMap<String, bool> {
        for conn in &self.connections {
            match conn.connect().await {
                Ok(()) => info!("[SUPERVISOR] account '{}' connected", conn.account_name()),
                Err(e) => error!("[SUPERVISOR] account '{}' failed to connect: {}", conn.account_name(), e),
            }
        }

        let status = self.connection_status();
        let open = status.values().filter(|v| **v).count();
        info!("[SUPERVISOR] connected {} of {} accounts", open, self.connections.len());
        status
    }

    /// Closes every connection and wipes all routing state.
    ///
    /// Hard reset, not a graceful drain. Subscriptions do not
    /// survive; a later start must re-subscribe from scratch.
    pub async fn stop_all(&self) {
        for conn in &self.connections {
            conn.close().await;
        }
        self.router.clear_all();
        info!("[SUPERVISOR] all accounts stopped, routing state cleared");
    }

    /// Routes and subscribes a list of symbols.
    ///
    /// Per symbol:
    /// - already routed somewhere   -> silently skipped
    /// - no account under capacity  -> failed
    /// - subscribe frame send error -> failed, not recorded
    ///
    /// Returns the failed symbols; an empty list means every new
    /// symbol is now live.
    pub async fn subscribe(&self, symbols: &[String]) -> Vec<String> {
        let mut failed = Vec::new();

        for symbol in symbols {
            let Some(account) = self.router.assign(symbol) else {
                if self.router.owner_of(symbol).is_some() {
                    // Already live on some account, nothing to do.
                    continue;
                }
                warn!("[SUPERVISOR] no capacity left for {}", symbol);
                failed.push(symbol.clone());
                continue;
            };

            let Some(conn) = self.connection(&account) else {
                // Router only knows configured accounts, so this
                // cannot happen; treat defensively as a failure.
                failed.push(symbol.clone());
                continue;
            };

            match conn
                .subscribe_batch(TR_ID_REALTIME_TRADE, std::slice::from_ref(symbol))
                .await
            {
                Ok(()) => self.router.record_subscribed(&account, symbol),
                Err(e) => {
                    error!("[SUPERVISOR] subscribe {} on '{}' failed: {}", symbol, account, e);
                    failed.push(symbol.clone());
                }
            }
        }

        failed
    }

    /// Subscribes the full instrument universe from the catalog.
    ///
    /// Returns the symbols that could not be subscribed. Symbols
    /// already live are skipped silently, not counted as failed.
    pub async fn load_all_from_catalog(&self) -> anyhow::Result<Vec<String>> {
        let symbols = self.catalog.list_all_symbols().await?;
        info!("[SUPERVISOR] catalog returned {} symbols", symbols.len());
        Ok(self.subscribe(&symbols).await)
    }

    /// Drops a symbol from the routing table and, when the
    /// owning session is still open, sends the unregister frame
    /// best-effort. The bookkeeping result is authoritative.
    ///
    /// NOTE:
    /// - Driven by the HTTP control layer, which lives outside
    ///   this process; the binary itself never calls it.
    #[allow(dead_code)]
    pub async fn unsubscribe(&self, symbol: &str) -> bool {
        let owner = self.router.owner_of(symbol);
        let removed = self.router.remove(symbol);

        if removed {
            if let Some(conn) = owner.as_deref().and_then(|name| self.connection(name)) {
                if !conn.send_unsubscribe(TR_ID_REALTIME_TRADE, symbol).await {
                    warn!("[SUPERVISOR] unregister frame for {} not sent, bookkeeping updated anyway", symbol);
                }
            }
        }

        removed
    }

    pub fn connection_status(&self) -> HashMap<String, bool> {
        self.connections
            .iter()
            .map(|c| (c.account_name().to_string(), c.is_open()))
            .collect()
    }

    pub fn subscription_snapshot(&self) -> HashMap<String, HashSet<String>> {
        self.router.snapshot()
    }

    pub fn total_subscriptions(&self) -> usize {
        self.router.total_count()
    }

    fn connection(&self, account: &str) -> Option<&Arc<FeedConnection>> {
        self.connections.iter().find(|c| c.account_name() == account)
    }
}
