/// Shared helper utilities.
///
/// This module contains:
/// - Time helpers
/// - Log-safe credential masking
///
/// IMPORTANT:
/// - No brokerage-specific business logic should live here.
/// - This module must remain lightweight and deterministic.
///
use std::time::{SystemTime, UNIX_EPOCH};

/// Returns the current Unix timestamp in milliseconds.
///
/// Used for connection timing and frame bookkeeping.
///
/// PANIC:
/// - Panics if system time is before UNIX_EPOCH (should never happen).
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System time is before UNIX_EPOCH")
        .as_millis() as i64
}

/// Masks a credential for logging.
///
/// Keeps the first four characters so operators can tell keys
/// apart, hides the rest.
///
/// Examples:
/// - "PSabcdef1234" -> "PSab********"
/// - "abc"          -> "***"
pub fn mask_secret(secret: &str) -> String {
    if secret.len() <= 4 {
        return "*".repeat(secret.len());
    }
    let visible = &secret[..4];
    format!("{}{}", visible, "*".repeat(secret.len() - 4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_all_but_prefix() {
        assert_eq!(mask_secret("PSabcdef1234"), "PSab********");
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret(""), "");
    }

    #[test]
    fn now_ms_is_monotonic_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
    }
}
