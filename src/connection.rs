use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use log::{debug, error, info, warn};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{Duration, sleep, timeout};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::auth::TokenManager;
use crate::config::{Account, FeedTuning};
use crate::dispatch::FrameDecoder;
use crate::environment::Environment;
use crate::error::FeedError;
use crate::metrics::METRICS;
use crate::util::now_ms;

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// The open socket half plus the approval key it was opened with.
///
/// Exists only while the session is up; torn down as a unit.
struct Session {
    write: WsWrite,
    approval_key: String,
}

/// ============================================================
/// FeedConnection
/// ============================================================
///
/// Owns **exactly one** persistent WebSocket session for one
/// broker account.
///
/// Responsibilities:
/// - Fetch a fresh approval key per connect
/// - Open the socket with a bounded handshake wait
/// - Run the reader task that hands raw frames to the decoder
/// - Send register / unregister frames, throttled
///
/// NOT responsible for:
/// - Deciding which symbols land on this account (router)
/// - Reconnecting after a drop (caller policy)
/// - Parsing frame payloads (decoder collaborator)
///
/// CONCURRENCY:
/// - `connecting` is a compare-and-swap guard: at most one
///   connect attempt is in flight per account, a losing caller
///   no-ops instead of queueing
/// - `session` is mutex-guarded; holding the lock across a
///   batch send preserves per-session frame order
pub struct FeedConnection {
    account: Account,
    environment: Environment,
    tokens: Arc<TokenManager>,
    decoder: Arc<dyn FrameDecoder>,
    tuning: FeedTuning,

    connecting: AtomicBool,
    open: Arc<AtomicBool>,
    session: Mutex<Option<Session>>,
}

impl FeedConnection {
    pub fn new(
        account: Account,
        environment: Environment,
        tokens: Arc<TokenManager>,
        decoder: Arc<dyn FrameDecoder>,
        tuning: FeedTuning,
    ) -> Self {
        Self {
            account,
            environment,
            tokens,
            decoder,
            tuning,
            connecting: AtomicBool::new(false),
            open: Arc::new(AtomicBool::new(false)),
            session: Mutex::new(None),
        }
    }

    pub fn account_name(&self) -> &str {
        &self.account.name
    }

    /// True iff a session exists and its reader is still running.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Opens the WebSocket session for this account.
    ///
    /// BEHAVIOR:
    /// - No-op when already open
    /// - No-op when another connect is already in flight
    ///   (the guard loses, it does not queue and does not error)
    /// - Blocks until the handshake completes, bounded by the
    ///   configured timeout
    ///
    /// FAILURE:
    /// - Leaves the connection not-open and clears the guard so
    ///   a later retry can proceed. No automatic retry here.
    pub async fn connect(&self) -> Result<(), FeedError> {
        if self.is_open() {
            debug!("[{}] connect skipped, session already open", self.account.name);
            return Ok(());
        }

        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("[{}] connect skipped, attempt already in flight", self.account.name);
            return Ok(());
        }

        let result = self.do_connect().await;

        // Guard must clear on every exit path, success or not.
        self.connecting.store(false, Ordering::Release);

        if result.is_err() {
            METRICS.connect_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    async fn do_connect(&self) -> Result<(), FeedError> {
        let approval_key = self.tokens.approval_key(&self.account, self.environment).await?;

        let url = self.environment.ws_url();
        let handshake_limit = Duration::from_secs(self.tuning.connect_timeout_secs);
        let started = now_ms();

        let (ws, _) = match timeout(handshake_limit, connect_async(url)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                return Err(FeedError::connect(&self.account.name, e.to_string()));
            }
            Err(_) => {
                return Err(FeedError::connect(
                    &self.account.name,
                    format!("handshake timed out after {}s", self.tuning.connect_timeout_secs),
                ));
            }
        };

        let (write, mut read) = ws.split();

        {
            let mut guard = self.session.lock().await;
            *guard = Some(Session { write, approval_key });
        }

        self.open.store(true, Ordering::Release);
        METRICS.sessions_open.fetch_add(1, Ordering::Relaxed);
        info!(
            "[{}] feed session open ({}) after {}ms",
            self.account.name,
            url,
            now_ms() - started
        );

        // ------------------------------------------------------------
        // READER TASK
        // ------------------------------------------------------------
        // Forwards every text frame to the decoder and flips the
        // open flag when the stream ends, so callers observe the
        // drop through is_open(). Subscriptions held on this
        // session are NOT resurrected automatically.
        let open = self.open.clone();
        let decoder = self.decoder.clone();
        let account = self.account.name.clone();

        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => decoder.on_raw_frame(&text),

                    // Ignore non-text frames (ping/pong/binary)
                    Ok(_) => {}

                    Err(e) => {
                        warn!("[{}] feed read error: {}", account, e);
                        break;
                    }
                }
            }

            if open.swap(false, Ordering::AcqRel) {
                METRICS.sessions_open.fetch_sub(1, Ordering::Relaxed);
            }
            info!("[{}] feed session closed", account);
        });

        Ok(())
    }

    /// Sends one register frame per symbol over the open session.
    ///
    /// Chunking groups frames per log line only; every symbol
    /// still gets its own frame. The inter-frame delay respects
    /// the provider's undocumented subscribe rate limit.
    ///
    /// ORDER:
    /// - The session lock is held for the whole batch, so frames
    ///   go out in the order submitted.
    pub async fn subscribe_batch(&self, tr_id: &str, symbols: &[String]) -> Result<(), FeedError> {
        let mut guard = self.session.lock().await;

        let session = match guard.as_mut() {
            Some(s) if self.is_open() => s,
            _ => return Err(FeedError::NotConnected(self.account.name.clone())),
        };

        let batch_size = self.tuning.subscribe_batch_size.max(1);

        for chunk in symbols.chunks(batch_size) {
            debug!(
                "[{}] sending subscribe batch of {} ({} total pending)",
                self.account.name,
                chunk.len(),
                symbols.len()
            );

            for symbol in chunk {
                let frame = subscribe_frame(&session.approval_key, tr_id, symbol, TR_TYPE_REGISTER);

                if let Err(e) = session.write.send(Message::Text(frame.to_string().into())).await {
                    METRICS.subscription_errors.fetch_add(1, Ordering::Relaxed);
                    if self.open.swap(false, Ordering::AcqRel) {
                        METRICS.sessions_open.fetch_sub(1, Ordering::Relaxed);
                    }
                    error!("[{}] subscribe send failed for {}: {}", self.account.name, symbol, e);
                    return Err(FeedError::subscribe_send(&self.account.name, e.to_string()));
                }

                METRICS.subscriptions_sent.fetch_add(1, Ordering::Relaxed);
                sleep(Duration::from_millis(self.tuning.subscribe_delay_ms)).await;
            }
        }

        Ok(())
    }

    /// Best-effort unregister frame for one symbol.
    ///
    /// Returns whether the frame went out. Failures are logged
    /// and swallowed; local bookkeeping stays authoritative.
    pub async fn send_unsubscribe(&self, tr_id: &str, symbol: &str) -> bool {
        let mut guard = self.session.lock().await;

        let session = match guard.as_mut() {
            Some(s) if self.is_open() => s,
            _ => return false,
        };

        let frame = subscribe_frame(&session.approval_key, tr_id, symbol, TR_TYPE_UNREGISTER);

        match session.write.send(Message::Text(frame.to_string().into())).await {
            Ok(()) => {
                METRICS.unsubscribes_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                warn!("[{}] unregister send failed for {}: {}", self.account.name, symbol, e);
                false
            }
        }
    }

    /// Closes the session if open. Idempotent, swallows close
    /// errors, always clears the session reference.
    pub async fn close(&self) {
        let mut guard = self.session.lock().await;

        if let Some(mut session) = guard.take() {
            let _ = session.write.send(Message::Close(None)).await;
            let _ = session.write.close().await;
        }

        if self.open.swap(false, Ordering::AcqRel) {
            METRICS.sessions_open.fetch_sub(1, Ordering::Relaxed);
        }

        debug!("[{}] close complete", self.account.name);
    }
}

/// tr_type marker: register a realtime stream.
pub const TR_TYPE_REGISTER: &str = "1";

/// tr_type marker: unregister a realtime stream.
pub const TR_TYPE_UNREGISTER: &str = "2";

/// Builds one subscribe / unsubscribe frame.
///
/// Wire format (one frame per symbol):
///
/// ```json
/// {"header":{"approval_key":"<key>","custtype":"P","tr_type":"1","content-type":"utf-8"},
///  "body":{"input":{"tr_id":"<trId>","tr_key":"<symbol>"}}}
/// ```
fn subscribe_frame(approval_key: &str, tr_id: &str, tr_key: &str, tr_type: &str) -> Value {
    json!({
        "header": {
            "approval_key": approval_key,
            "custtype": "P",
            "tr_type": tr_type,
            "content-type": "utf-8",
        },
        "body": {
            "input": {
                "tr_id": tr_id,
                "tr_key": tr_key,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::LoggingDecoder;

    fn test_connection() -> FeedConnection {
        let account = Account {
            name: "acct-a".into(),
            app_key: "key".into(),
            app_secret: "secret".into(),
        };
        let tokens = Arc::new(TokenManager::new(
            reqwest::Client::new(),
            "key".into(),
            "secret".into(),
        ));
        FeedConnection::new(
            account,
            Environment::Paper,
            tokens,
            Arc::new(LoggingDecoder::new(false)),
            FeedTuning::default(),
        )
    }

    #[test]
    fn register_frame_matches_wire_format() {
        let frame = subscribe_frame("APPROVAL", "H0STCNT0", "005930", TR_TYPE_REGISTER);
        assert_eq!(
            frame,
            json!({
                "header": {
                    "approval_key": "APPROVAL",
                    "custtype": "P",
                    "tr_type": "1",
                    "content-type": "utf-8",
                },
                "body": {"input": {"tr_id": "H0STCNT0", "tr_key": "005930"}}
            })
        );
    }

    #[test]
    fn unregister_frame_flips_tr_type() {
        let frame = subscribe_frame("APPROVAL", "H0STCNT0", "005930", TR_TYPE_UNREGISTER);
        assert_eq!(frame["header"]["tr_type"], "2");
        assert_eq!(frame["body"]["input"]["tr_key"], "005930");
    }

    #[tokio::test]
    async fn subscribe_without_session_is_not_connected() {
        let conn = test_connection();
        let err = conn
            .subscribe_batch("H0STCNT0", &["005930".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::NotConnected(name) if name == "acct-a"));
    }

    #[tokio::test]
    async fn concurrent_connect_attempt_no_ops() {
        let conn = test_connection();

        // Simulate an in-flight attempt holding the guard. The
        // losing caller must return Ok without touching the
        // network (the placeholder credentials would fail).
        conn.connecting.store(true, Ordering::Release);
        assert!(conn.connect().await.is_ok());
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn connect_on_open_session_is_a_no_op() {
        let conn = test_connection();
        conn.open.store(true, Ordering::Release);
        assert!(conn.connect().await.is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent_on_fresh_connection() {
        let conn = test_connection();
        conn.close().await;
        conn.close().await;
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn unsubscribe_without_session_reports_not_sent() {
        let conn = test_connection();
        assert!(!conn.send_unsubscribe("H0STCNT0", "005930").await);
    }
}
