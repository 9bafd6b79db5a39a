//! Per-key mutual exclusion for jobs.
//!
//! Two jobs for the same change, or the same project, never run at once.
//! Taking a key never blocks: a caller that finds it held gets `None` and
//! decides what to do with its job.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct InFlight {
    held: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take `key` unless another guard holds it.
    pub fn try_acquire(&self, key: &str) -> Option<InFlightGuard> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if !held.insert(key.to_string()) {
            return None;
        }
        Some(InFlightGuard {
            key: key.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Releases its key on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn held_key_is_refused() {
        let guard = InFlight::new();
        let first = guard.try_acquire("change:X").expect("free key");
        assert!(guard.try_acquire("change:X").is_none());
        assert!(guard.is_held("change:X"));
        drop(first);
        assert!(guard.try_acquire("change:X").is_some());
    }

    #[test]
    fn distinct_keys_are_independent() {
        let guard = InFlight::new();
        let _a = guard.try_acquire("project:nova").expect("nova");
        let _b = guard.try_acquire("project:glance").expect("glance");
        assert!(guard.is_held("project:nova") && guard.is_held("project:glance"));
    }

    #[test]
    fn one_winner_across_threads() {
        let guard = InFlight::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let guard = guard.clone();
                thread::spawn(move || guard.try_acquire("change:X"))
            })
            .collect();
        // Winners stay alive until every thread has tried.
        let winners: Vec<_> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        assert_eq!(winners.len(), 1);
        drop(winners);
        assert!(!guard.is_held("change:X"));
    }
}
