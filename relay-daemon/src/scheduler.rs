//! Time-ordered deferred work.

use std::collections::BTreeMap;

use tokio::time::Instant;

/// Jobs held until their trigger instant.
///
/// Release order is non-decreasing in trigger time, and equal times come
/// out in insertion order. Owned by the daemon loop alone.
#[derive(Debug)]
pub struct Scheduler<T> {
    queue: BTreeMap<(Instant, u64), T>,
    seq: u64,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self {
            queue: BTreeMap::new(),
            seq: 0,
        }
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, at: Instant, item: T) {
        self.queue.insert((at, self.seq), item);
        self.seq += 1;
    }

    /// Remove and return the earliest item whose trigger time is `<= now`.
    pub fn due(&mut self, now: Instant) -> Option<T> {
        let (&(at, _), _) = self.queue.first_key_value()?;
        if at > now {
            return None;
        }
        self.queue.pop_first().map(|(_, item)| item)
    }

    /// Trigger time of the earliest item.
    pub fn next_at(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(at, _)| *at)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
