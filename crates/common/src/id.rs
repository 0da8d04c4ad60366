//! Process-local id generation.

use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Next value of a process-local monotonic counter. Used for parser ids,
/// session-space tokens, and synthesized event ids.
pub fn next_u64() -> u64 {
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A fresh correlation id for an action that awaits an echo.
pub fn echo_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_is_monotonic() {
        let a = next_u64();
        let b = next_u64();
        assert!(b > a);
    }

    #[test]
    fn echo_ids_are_unique() {
        assert_ne!(echo_id(), echo_id());
    }
}
