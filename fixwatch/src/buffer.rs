//! Bounded buffers shared by the capture agent and the error collector:
//! a capped FIFO ring and a time-bounded dedupe window.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use tokio::time::Instant;

/// Number of message characters that participate in a dedupe key.
pub const DEDUPE_MESSAGE_CHARS: usize = 100;

/// Capped FIFO. Pushing past capacity evicts the oldest item.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Creates an empty ring. A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an item, returning the evicted oldest item if the ring was full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() >= self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    /// Removes and returns up to `n` items from the front.
    pub fn drain_front(&mut self, n: usize) -> Vec<T> {
        let n = n.min(self.items.len());
        self.items.drain(..n).collect()
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Changes the capacity, evicting the oldest items if it shrank.
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    /// Current number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the ring is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Maximum number of retained items.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Iterates oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copies the contents, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

/// Remembers recently seen keys for a rolling window.
///
/// A key is admitted when it has not been seen within `window`. Expired keys
/// are removed by [`sweep`](Self::sweep), called either by a periodic task or
/// automatically once the map grows past `sweep_threshold`.
#[derive(Debug)]
pub struct DedupeWindow {
    seen: HashMap<String, Instant>,
    window: Duration,
    sweep_threshold: Option<usize>,
}

impl DedupeWindow {
    /// Window that relies on external periodic sweeping.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            window,
            sweep_threshold: None,
        }
    }

    /// Window that sweeps itself once more than `threshold` keys are held.
    #[must_use]
    pub fn with_sweep_threshold(window: Duration, threshold: usize) -> Self {
        Self {
            seen: HashMap::new(),
            window,
            sweep_threshold: Some(threshold),
        }
    }

    /// Records `key` and returns `true` if it was not seen within the window.
    pub fn admit(&mut self, key: String, now: Instant) -> bool {
        if let Some(&last) = self.seen.get(&key)
            && now.saturating_duration_since(last) < self.window
        {
            return false;
        }
        self.seen.insert(key, now);
        if let Some(threshold) = self.sweep_threshold
            && self.seen.len() > threshold
        {
            self.sweep(now);
        }
        true
    }

    /// Evicts keys older than the window, returning how many were removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.seen.len();
        let window = self.window;
        self.seen
            .retain(|_, seen_at| now.saturating_duration_since(*seen_at) < window);
        before - self.seen.len()
    }

    /// Changes the window length.
    pub const fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// Number of keys currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether no keys are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forgets every key.
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

/// Truncates to at most `max` characters on a char boundary.
#[must_use]
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
