//! Cooperative "analysis in progress" flag
//!
//! Dispatchers check the flag before starting a style, grammar, logic or
//! chapter analysis and refuse while it is set. Nothing stops code that
//! ignores the flag from issuing requests anyway.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared blocked flag. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct BlockedFlag {
    blocked: Arc<AtomicBool>,
}

impl BlockedFlag {
    pub fn new() -> Self {
        Self {
            blocked: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if an analysis is outstanding.
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::Acquire)
    }

    /// Set the flag if it is clear. Returns false if it was already set.
    pub fn try_block(&self) -> bool {
        self.blocked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clear the flag.
    pub fn release(&self) {
        self.blocked.store(false, Ordering::Release);
    }
}

impl Default for BlockedFlag {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_starts_clear() {
        let flag = BlockedFlag::new();
        assert!(!flag.is_blocked());
    }

    #[test]
    fn second_block_is_refused() {
        let flag = BlockedFlag::new();
        assert!(flag.try_block());
        assert!(!flag.try_block());
        flag.release();
        assert!(flag.try_block());
    }

    #[test]
    fn cloned_flag_shares_state() {
        let flag = BlockedFlag::new();
        let clone = flag.clone();
        flag.try_block();
        assert!(clone.is_blocked());
        clone.release();
        assert!(!flag.is_blocked());
    }
}
