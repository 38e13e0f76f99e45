//! Access Order Module
//!
//! Tracks key recency for LRU eviction.

use std::collections::VecDeque;

// == Access Order ==
/// Recency ordering over cache keys.
///
/// Front = most recently used, back = least recently used. Because the
/// deque preserves the order in which keys were marked, eviction is
/// deterministic even when two entries were touched within the same
/// millisecond (insertion order breaks the tie).
#[derive(Debug, Default)]
pub struct AccessOrder {
    order: VecDeque<String>,
}

impl AccessOrder {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Mark Used ==
    /// Records an access, moving the key to the most-recent position.
    pub fn mark_used(&mut self, key: &str) {
        self.forget(key);
        self.order.push_front(key.to_string());
    }

    // == Forget ==
    /// Drops a key from the ordering.
    pub fn forget(&mut self, key: &str) {
        self.order.retain(|k| k != key);
    }

    // == Pop LRU ==
    /// Removes and returns the least recently used key, if any.
    pub fn pop_lru(&mut self) -> Option<String> {
        self.order.pop_back()
    }

    /// Clears all tracked keys.
    pub fn clear(&mut self) {
        self.order.clear();
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.order.len()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_lru_returns_oldest() {
        let mut order = AccessOrder::new();
        order.mark_used("a");
        order.mark_used("b");
        order.mark_used("c");

        assert_eq!(order.pop_lru(), Some("a".to_string()));
        assert_eq!(order.pop_lru(), Some("b".to_string()));
        assert_eq!(order.pop_lru(), Some("c".to_string()));
        assert_eq!(order.pop_lru(), None);
    }

    #[test]
    fn test_mark_used_refreshes_position() {
        let mut order = AccessOrder::new();
        order.mark_used("a");
        order.mark_used("b");
        order.mark_used("c");

        // Re-touching "a" makes "b" the eviction candidate
        order.mark_used("a");

        assert_eq!(order.len(), 3);
        assert_eq!(order.pop_lru(), Some("b".to_string()));
    }

    #[test]
    fn test_mark_used_is_idempotent_on_length() {
        let mut order = AccessOrder::new();
        order.mark_used("key");
        order.mark_used("key");
        order.mark_used("key");

        assert_eq!(order.len(), 1);
    }

    #[test]
    fn test_forget_unknown_key_is_noop() {
        let mut order = AccessOrder::new();
        order.mark_used("a");

        order.forget("missing");

        assert_eq!(order.len(), 1);
        assert_eq!(order.pop_lru(), Some("a".to_string()));
    }

    #[test]
    fn test_clear() {
        let mut order = AccessOrder::new();
        order.mark_used("a");
        order.mark_used("b");

        order.clear();

        assert_eq!(order.len(), 0);
        assert_eq!(order.pop_lru(), None);
    }
}
