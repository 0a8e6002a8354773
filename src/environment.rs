use serde::Deserialize;

// ------------------------------------------------------------
// Brokerage environment
// ------------------------------------------------------------
//
// The brokerage runs two fully separated host pairs:
//
// - Production:   real accounts, real market data
// - Paper:        virtual trading hosts for testing
//
// The environment is chosen once per process (config.json)
// and applies to every account. Accounts never mix
// environments within a single run.
//
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Paper,
}

impl Environment {
    /// Base URL of the REST authentication endpoints.
    ///
    /// NOTE:
    /// - Production and paper hosts use different ports.
    /// - Only the auth endpoints are called from this process;
    ///   the trading REST API is out of scope here.
    pub fn rest_base_url(&self) -> &'static str {
        match self {
            Environment::Production => "https://openapi.koreainvestment.com:9443",
            Environment::Paper => "https://openapivts.koreainvestment.com:29443",
        }
    }

    /// Realtime feed WebSocket endpoint.
    ///
    /// The feed host accepts plain ws:// with the approval key
    /// carried inside each subscribe frame header.
    pub fn ws_url(&self) -> &'static str {
        match self {
            Environment::Production => "ws://ops.koreainvestment.com:21000",
            Environment::Paper => "ws://ops.koreainvestment.com:31000",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_resolution_is_pure_per_tag() {
        assert_eq!(
            Environment::Production.rest_base_url(),
            "https://openapi.koreainvestment.com:9443"
        );
        assert_eq!(
            Environment::Paper.rest_base_url(),
            "https://openapivts.koreainvestment.com:29443"
        );
        assert_eq!(Environment::Production.ws_url(), "ws://ops.koreainvestment.com:21000");
        assert_eq!(Environment::Paper.ws_url(), "ws://ops.koreainvestment.com:31000");
    }

    #[test]
    fn deserializes_from_lowercase_tag() {
        let env: Environment = serde_json::from_str("\"paper\"").unwrap();
        assert_eq!(env, Environment::Paper);
        let env: Environment = serde_json::from_str("\"production\"").unwrap();
        assert_eq!(env, Environment::Production);
    }
}
