use std::sync::atomic::Ordering;

use log::debug;

use crate::metrics::METRICS;

// ------------------------------------------------------------
// Collaborator seams
// ------------------------------------------------------------
//
// Two external collaborators are consumed behind traits:
//
// - FrameDecoder:  receives every raw inbound text frame and
//   turns it into structured ticks downstream
// - SymbolCatalog: supplies the instrument universe subscribed
//   at startup
//
// The feed subsystem never inspects frame payloads and never
// filters the catalog. Both defaults below keep the binary
// runnable standalone.
//

/// Downstream decoder boundary.
///
/// Called once per inbound WebSocket text frame, on the session's
/// reader task.
///
/// CONTRACT:
/// - Must not block; heavy work belongs behind a channel
/// - Must never panic on malformed payloads
/// - Frame order within one session is the exchange's order
pub trait FrameDecoder: Send + Sync {
    fn on_raw_frame(&self, payload: &str);
}

/// Default decoder used by the binary.
///
/// Counts frames and optionally logs the raw payload when the
/// debug flag is set. Real deployments plug in the tick parser
/// here instead.
pub struct LoggingDecoder {
    log_frames: bool,
}

impl LoggingDecoder {
    pub fn new(log_frames: bool) -> Self {
        Self { log_frames }
    }
}

impl FrameDecoder for LoggingDecoder {
    fn on_raw_frame(&self, payload: &str) {
        METRICS.frames_received.fetch_add(1, Ordering::Relaxed);

        if self.log_frames {
            debug!("[FRAME] {}", payload);
        }
    }
}

/// Instrument catalog boundary.
///
/// The full deployment backs this with the tradable-instrument
/// table; the collector only needs the flat symbol list.
#[async_trait::async_trait]
pub trait SymbolCatalog: Send + Sync {
    async fn list_all_symbols(&self) -> anyhow::Result<Vec<String>>;
}

/// Config-backed catalog used by the binary.
pub struct ConfigCatalog {
    symbols: Vec<String>,
}

impl ConfigCatalog {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }
}

#[async_trait::async_trait]
impl SymbolCatalog for ConfigCatalog {
    async fn list_all_symbols(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.symbols.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn config_catalog_serves_configured_list() {
        let catalog = ConfigCatalog::new(vec!["005930".into(), "000660".into()]);
        let symbols = catalog.list_all_symbols().await.unwrap();
        assert_eq!(symbols, vec!["005930".to_string(), "000660".to_string()]);
    }

    #[test]
    fn logging_decoder_accepts_arbitrary_payloads() {
        let decoder = LoggingDecoder::new(false);
        decoder.on_raw_frame("0|H0STCNT0|001|005930^093015^71900");
        decoder.on_raw_frame("");
    }
}
