//! Per-thread exclusive mode
//!
//! A thread is exclusive while it holds the open write transaction. Only
//! that thread may trust state cached under the transaction; every other
//! thread runs on the slow path.

use parking_lot::Mutex;
use std::thread::{self, ThreadId};

/// Tracks the thread that currently has exclusive access
#[derive(Debug, Default)]
pub struct ExclusiveAccess {
    owner: Mutex<Option<ThreadId>>,
}

impl ExclusiveAccess {
    /// Create with no exclusive thread
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the calling thread as exclusive
    pub fn set_exclusive_mode_for_this_thread(&self) {
        *self.owner.lock() = Some(thread::current().id());
    }

    /// Drop exclusive mode for whichever thread holds it
    pub fn clear_exclusive_mode(&self) {
        *self.owner.lock() = None;
    }

    /// Whether the calling thread is exclusive
    pub fn is_exclusive_for_this_thread(&self) -> bool {
        *self.owner.lock() == Some(thread::current().id())
    }

    /// Run `f`, telling it whether the calling thread is exclusive
    pub fn run<R>(&self, f: impl FnOnce(bool) -> R) -> R {
        f(self.is_exclusive_for_this_thread())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_set_and_clear() {
        let access = ExclusiveAccess::new();
        assert!(!access.is_exclusive_for_this_thread());

        access.set_exclusive_mode_for_this_thread();
        assert!(access.is_exclusive_for_this_thread());
        assert!(access.run(|exclusive| exclusive));

        access.clear_exclusive_mode();
        assert!(!access.run(|exclusive| exclusive));
    }

    #[test]
    fn test_exclusive_mode_is_per_thread() {
        let access = Arc::new(ExclusiveAccess::new());
        access.set_exclusive_mode_for_this_thread();

        let other = Arc::clone(&access);
        let seen = thread::spawn(move || other.is_exclusive_for_this_thread())
            .join()
            .unwrap();

        assert!(!seen);
        assert!(access.is_exclusive_for_this_thread());

        let other = Arc::clone(&access);
        thread::spawn(move || other.clear_exclusive_mode()).join().unwrap();
        assert!(!access.is_exclusive_for_this_thread());
    }
}
