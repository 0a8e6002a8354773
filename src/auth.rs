use std::collections::HashMap;
use std::sync::atomic::Ordering;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use log::{debug, info, warn};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use crate::config::Account;
use crate::environment::Environment;
use crate::error::FeedError;
use crate::metrics::METRICS;
use crate::util::mask_secret;

/// Safety margin subtracted from the cached token expiry.
///
/// A token inside this window counts as stale and is re-fetched
/// before use, so a request never goes out with a token that
/// expires mid-flight.
const TOKEN_SAFETY_MARGIN_SECS: i64 = 60;

/// Fallback lifetime applied when the token endpoint omits or
/// garbles the expiry field. The provider issues 24h tokens.
const TOKEN_FALLBACK_HOURS: i64 = 24;

/// Expiry format returned by the token endpoint.
const TOKEN_EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ------------------------------------------------------------
// Access token
// ------------------------------------------------------------
//
// Cached per environment, not per account. The token endpoint
// is account-agnostic in this deployment; approval keys are the
// per-account, per-connection credential.
//
#[derive(Debug, Clone)]
pub struct Token {
    pub value: String,
    pub environment: Environment,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// A token is reusable only while `now` is comfortably
    /// before its expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at - Duration::seconds(TOKEN_SAFETY_MARGIN_SECS)
    }
}

// ------------------------------------------------------------
// TokenManager
// ------------------------------------------------------------
//
// Owns all interaction with the brokerage auth endpoints:
//
// - POST /oauth2/tokenP    -> access token (cached per env)
// - POST /oauth2/Approval  -> approval key (never cached)
//
// CONCURRENCY:
// - The token cache is a single critical section per manager.
//   Holding the lock across the refresh also suppresses
//   duplicate in-flight fetches for the same environment.
//
pub struct TokenManager {
    http: reqwest::Client,

    /// Credentials for the account-agnostic token endpoint
    /// (first configured account by convention).
    app_key: String,
    app_secret: String,

    tokens: Mutex<HashMap<Environment, Token>>,
}

impl TokenManager {
    pub fn new(http: reqwest::Client, app_key: String, app_secret: String) -> Self {
        Self {
            http,
            app_key,
            app_secret,
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a valid access token for the environment.
    ///
    /// Serves the cached token while it is outside the safety
    /// margin, otherwise refreshes from the token endpoint and
    /// caches the result.
    pub async fn access_token(&self, env: Environment) -> Result<Token, FeedError> {
        let mut cache = self.tokens.lock().await;

        if let Some(token) = cache.get(&env) {
            if token.is_valid_at(Utc::now()) {
                debug!("[AUTH] serving cached access token for {:?}", env);
                return Ok(token.clone());
            }
        }

        info!(
            "[AUTH] fetching access token for {:?} (appkey {})",
            env,
            mask_secret(&self.app_key)
        );

        let body = json!({
            "grant_type": "client_credentials",
            "appkey": self.app_key,
            "appsecret": self.app_secret,
        });

        let response = self.request_auth(env, "/oauth2/tokenP", &body).await?;

        let value = response
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                METRICS.auth_failures.fetch_add(1, Ordering::Relaxed);
                FeedError::auth("token response missing access_token")
            })?
            .to_string();

        let expires_at = parse_token_expiry(response.get("access_token_token_expired"));

        let token = Token {
            value,
            environment: env,
            expires_at,
        };

        METRICS.token_fetches.fetch_add(1, Ordering::Relaxed);
        info!(
            "[AUTH] token {} cached for {:?}, expires {}",
            mask_secret(&token.value),
            token.environment,
            token.expires_at
        );
        cache.insert(env, token.clone());
        Ok(token)
    }

    /// Fetches a fresh approval key for one account.
    ///
    /// Approval keys bind to a single WebSocket session and are
    /// re-fetched on every new connect, never cached.
    ///
    /// NOTE:
    /// - The approval endpoint names the secret field
    ///   `secretkey`, unlike the token endpoint's `appsecret`.
    pub async fn approval_key(
        &self,
        account: &Account,
        env: Environment,
    ) -> Result<String, FeedError> {
        debug!(
            "[AUTH] fetching approval key for account '{}' (appkey {})",
            account.name,
            mask_secret(&account.app_key)
        );

        let body = json!({
            "grant_type": "client_credentials",
            "appkey": account.app_key,
            "secretkey": account.app_secret,
        });

        let response = self.request_auth(env, "/oauth2/Approval", &body).await?;

        let key = response
            .get("approval_key")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                METRICS.auth_failures.fetch_add(1, Ordering::Relaxed);
                FeedError::auth(format!(
                    "approval response for account '{}' missing approval_key",
                    account.name
                ))
            })?
            .to_string();

        METRICS.approval_key_fetches.fetch_add(1, Ordering::Relaxed);
        Ok(key)
    }

    /// One POST against an auth endpoint, JSON in / JSON out.
    async fn request_auth(
        &self,
        env: Environment,
        path: &str,
        body: &Value,
    ) -> Result<Value, FeedError> {
        let url = format!("{}{}", env.rest_base_url(), path);

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                METRICS.auth_failures.fetch_add(1, Ordering::Relaxed);
                FeedError::auth(format!("POST {} failed: {}", path, e))
            })?;

        response.json::<Value>().await.map_err(|e| {
            METRICS.auth_failures.fetch_add(1, Ordering::Relaxed);
            FeedError::auth(format!("POST {} returned malformed body: {}", path, e))
        })
    }

    #[cfg(test)]
    pub(crate) async fn seed_token(&self, token: Token) {
        self.tokens.lock().await.insert(token.environment, token);
    }
}

/// Parses `access_token_token_expired` (`yyyy-MM-dd HH:mm:ss`).
///
/// Lenient by design: a missing or unparsable expiry falls back
/// to now + 24h instead of failing the whole call.
fn parse_token_expiry(field: Option<&Value>) -> DateTime<Utc> {
    let parsed = field
        .and_then(|v| v.as_str())
        .and_then(|s| NaiveDateTime::parse_from_str(s, TOKEN_EXPIRY_FORMAT).ok())
        .map(|naive| Utc.from_utc_datetime(&naive));

    match parsed {
        Some(expiry) => expiry,
        None => {
            warn!("[AUTH] token expiry missing or unparsable, assuming 24h lifetime");
            Utc::now() + Duration::hours(TOKEN_FALLBACK_HOURS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TokenManager {
        TokenManager::new(reqwest::Client::new(), "key".into(), "secret".into())
    }

    #[test]
    fn token_outside_margin_is_valid() {
        let now = Utc::now();
        let token = Token {
            value: "t".into(),
            environment: Environment::Paper,
            expires_at: now + Duration::minutes(10),
        };
        assert!(token.is_valid_at(now));
    }

    #[test]
    fn token_inside_margin_counts_as_stale() {
        let now = Utc::now();
        let token = Token {
            value: "t".into(),
            environment: Environment::Paper,
            expires_at: now + Duration::seconds(30),
        };
        assert!(!token.is_valid_at(now));
    }

    #[tokio::test]
    async fn cached_valid_token_is_served_without_a_request() {
        let mgr = manager();
        mgr.seed_token(Token {
            value: "cached-token".into(),
            environment: Environment::Paper,
            expires_at: Utc::now() + Duration::minutes(10),
        })
        .await;

        // A cache hit must return before any HTTP happens; the
        // placeholder credentials would fail on the wire.
        let token = mgr.access_token(Environment::Paper).await.unwrap();
        assert_eq!(token.value, "cached-token");
    }

    #[test]
    fn expiry_parses_provider_format() {
        let v = json!("2026-09-01 08:30:00");
        let expiry = parse_token_expiry(Some(&v));
        assert_eq!(
            expiry,
            Utc.with_ymd_and_hms(2026, 9, 1, 8, 30, 0).unwrap()
        );
    }

    #[test]
    fn unparsable_expiry_falls_back_to_24h() {
        let before = Utc::now() + Duration::hours(23);
        let expiry = parse_token_expiry(Some(&json!("not a date")));
        assert!(expiry > before);

        let missing = parse_token_expiry(None);
        assert!(missing > before);
    }
}
