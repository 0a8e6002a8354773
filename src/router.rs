use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use log::debug;

/// ============================================================
/// SubscriptionRouter
/// ============================================================
///
/// Maintains the global symbol -> account mapping and enforces
/// the per-account capacity bound imposed by the provider.
///
/// POLICY:
/// - Greedy least-loaded assignment, ties broken by the fixed
///   account order from configuration (first listed wins)
/// - Never reassigns an already-routed symbol
/// - Never rebalances existing subscriptions
///
/// CONCURRENCY:
/// - The map is mutex-guarded: supervisor operations and
///   status reads can run from different tasks simultaneously
/// - Capacity is checked BEFORE assignment, so assign +
///   record_subscribed can never push a set past capacity
pub struct SubscriptionRouter {
    /// Account names in configuration order (tie-break order)
    order: Vec<String>,

    /// Per-account subscription quota
    capacity: usize,

    subscriptions: Mutex<HashMap<String, HashSet<String>>>,
}

impl SubscriptionRouter {
    pub fn new(account_names: Vec<String>, capacity: usize) -> Self {
        let subscriptions = account_names
            .iter()
            .map(|name| (name.clone(), HashSet::new()))
            .collect();

        Self {
            order: account_names,
            capacity,
            subscriptions: Mutex::new(subscriptions),
        }
    }

    /// Lock helper that recovers from poisoning instead of
    /// panicking; the map stays usable after a panicked reader.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, HashSet<String>>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn count_of(subs: &HashMap<String, HashSet<String>>, name: &str) -> usize {
        subs.get(name).map_or(0, |s| s.len())
    }

    /// Picks an account for a new symbol.
    ///
    /// RETURNS:
    /// - None if the symbol is already routed anywhere
    ///   (caller treats it as handled, not as an error)
    /// - None if no account has spare capacity
    /// - Otherwise the least-loaded under-capacity account
    pub fn assign(&self, symbol: &str) -> Option<String> {
        let subs = self.lock();

        if subs.values().any(|set| set.contains(symbol)) {
            return None;
        }

        // min_by_key keeps the first minimum, which preserves
        // the configured tie-break order.
        self.order
            .iter()
            .filter(|name| Self::count_of(&subs, name) < self.capacity)
            .min_by_key(|name| Self::count_of(&subs, name))
            .cloned()
    }

    /// Records a symbol against an account.
    ///
    /// CONTRACT:
    /// - Call only after the subscribe frame actually went out
    pub fn record_subscribed(&self, account: &str, symbol: &str) {
        let mut subs = self.lock();
        subs.entry(account.to_string())
            .or_default()
            .insert(symbol.to_string());
        debug!("[ROUTER] {} recorded on {}", symbol, account);
    }

    /// Returns which account currently holds a symbol, if any.
    pub fn owner_of(&self, symbol: &str) -> Option<String> {
        let subs = self.lock();
        subs.iter()
            .find(|(_, set)| set.contains(symbol))
            .map(|(name, _)| name.clone())
    }

    /// Removes a symbol from whichever account holds it.
    pub fn remove(&self, symbol: &str) -> bool {
        let mut subs = self.lock();
        subs.values_mut().any(|set| set.remove(symbol))
    }

    /// Clears every account's set. Used on hard shutdown.
    pub fn clear_all(&self) {
        let mut subs = self.lock();
        for set in subs.values_mut() {
            set.clear();
        }
    }

    /// Defensive copy of the full routing table for reporting.
    pub fn snapshot(&self) -> HashMap<String, HashSet<String>> {
        self.lock().clone()
    }

    pub fn total_count(&self) -> usize {
        self.lock().values().map(|set| set.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_accounts(capacity: usize) -> SubscriptionRouter {
        SubscriptionRouter::new(vec!["A".into(), "B".into()], capacity)
    }

    fn assign_and_record(router: &SubscriptionRouter, symbol: &str) -> Option<String> {
        let account = router.assign(symbol)?;
        router.record_subscribed(&account, symbol);
        Some(account)
    }

    #[test]
    fn least_loaded_with_first_listed_tie_break() {
        let router = two_accounts(20);

        assert_eq!(assign_and_record(&router, "005930").as_deref(), Some("A"));
        assert_eq!(assign_and_record(&router, "000660").as_deref(), Some("B"));
        // Tie at 1/1 goes back to the first listed account.
        assert_eq!(assign_and_record(&router, "035420").as_deref(), Some("A"));

        let snap = router.snapshot();
        assert!(snap["A"].contains("005930"));
        assert!(snap["A"].contains("035420"));
        assert!(snap["B"].contains("000660"));
        assert_eq!(router.total_count(), 3);
    }

    #[test]
    fn already_routed_symbol_is_never_reassigned() {
        let router = two_accounts(20);
        assign_and_record(&router, "005930");

        assert_eq!(router.assign("005930"), None);

        // Still held by exactly one account.
        let snap = router.snapshot();
        let holders = snap.values().filter(|set| set.contains("005930")).count();
        assert_eq!(holders, 1);
    }

    #[test]
    fn capacity_is_checked_before_assignment() {
        let router = SubscriptionRouter::new(vec!["A".into()], 20);

        for i in 0..20 {
            assert_eq!(assign_and_record(&router, &format!("sym{}", i)).as_deref(), Some("A"));
        }

        // 21st symbol on a single full account: no room anywhere.
        assert_eq!(router.assign("sym21"), None);
        assert_eq!(router.total_count(), 20);
    }

    #[test]
    fn overflow_spills_to_the_under_capacity_account() {
        let router = two_accounts(2);

        for symbol in ["s1", "s2", "s3", "s4"] {
            assert!(assign_and_record(&router, symbol).is_some());
        }

        // Both accounts full now.
        assert_eq!(router.assign("s5"), None);

        let snap = router.snapshot();
        assert_eq!(snap["A"].len(), 2);
        assert_eq!(snap["B"].len(), 2);
    }

    #[test]
    fn balance_is_even_across_equal_accounts() {
        let router = two_accounts(20);

        for i in 0..15 {
            assign_and_record(&router, &format!("sym{}", i));
        }

        let snap = router.snapshot();
        let a = snap["A"].len();
        let b = snap["B"].len();
        assert_eq!(a + b, 15);
        assert!(a.abs_diff(b) <= 1, "uneven spread: A={} B={}", a, b);
    }

    #[test]
    fn remove_clears_the_owning_account_only() {
        let router = two_accounts(20);
        assign_and_record(&router, "005930");
        assign_and_record(&router, "000660");

        assert_eq!(router.owner_of("005930").as_deref(), Some("A"));
        assert!(router.remove("005930"));
        assert_eq!(router.owner_of("005930"), None);
        assert_eq!(router.total_count(), 1);

        // Unknown symbol: nothing to remove.
        assert!(!router.remove("999999"));
    }

    #[test]
    fn removed_symbol_can_be_assigned_again() {
        let router = two_accounts(20);
        assign_and_record(&router, "005930");
        router.remove("005930");

        assert!(router.assign("005930").is_some());
    }

    #[test]
    fn clear_all_resets_every_account() {
        let router = two_accounts(20);
        assign_and_record(&router, "005930");
        assign_and_record(&router, "000660");

        router.clear_all();
        assert_eq!(router.total_count(), 0);
        // Accounts remain present with empty sets.
        assert_eq!(router.snapshot().len(), 2);
    }
}
