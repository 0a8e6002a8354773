use thiserror::Error;

// ------------------------------------------------------------
// Feed error taxonomy
// ------------------------------------------------------------
//
// Errors are classified by the phase in which they occur:
//
// - Auth:          token / approval-key request failed or the
//                  response was malformed
// - Connect:       WebSocket handshake failed or timed out
// - NotConnected:  an operation was attempted on a closed session
// - SubscribeSend: a subscribe frame could not be transmitted
// - Config:        invalid configuration detected at startup
//
// Capacity exhaustion is intentionally NOT an error variant.
// The router reports it as an assignment outcome and the
// supervisor aggregates the affected symbols into a failed list
// returned to the caller.
//
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("feed connect failed for account '{account}': {reason}")]
    Connect { account: String, reason: String },

    #[error("account '{0}' has no open feed session")]
    NotConnected(String),

    #[error("subscribe send failed on account '{account}': {reason}")]
    SubscribeSend { account: String, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl FeedError {
    pub fn auth(msg: impl Into<String>) -> Self {
        FeedError::Auth(msg.into())
    }

    pub fn connect(account: impl Into<String>, reason: impl Into<String>) -> Self {
        FeedError::Connect {
            account: account.into(),
            reason: reason.into(),
        }
    }

    pub fn subscribe_send(account: impl Into<String>, reason: impl Into<String>) -> Self {
        FeedError::SubscribeSend {
            account: account.into(),
            reason: reason.into(),
        }
    }
}
