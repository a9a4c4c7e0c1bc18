//! Property-based tests for the bounded buffers and the classifier.
//!
//! Uses proptest to verify:
//! 1. A ring never holds more than its capacity and keeps the newest items.
//! 2. `drain_front` removes exactly the requested prefix.
//! 3. A dedupe window admits each key at most once per window.
//! 4. An empty ignore list never vetoes a message.
//!
//! Verification command: `cargo test --test buffers`

#![allow(clippy::unwrap_used)]

use std::collections::HashSet;
use std::time::Duration;

use fixwatch::buffer::{DedupeWindow, RingBuffer, truncate_chars};
use fixwatch::classify::{IgnoreList, PatternClassifier, Verdict};
use proptest::prelude::*;

proptest! {
    #[test]
    fn ring_keeps_last_capacity_items(
        capacity in 1usize..64,
        items in prop::collection::vec(any::<u32>(), 0..256),
    ) {
        let mut ring = RingBuffer::new(capacity);
        for &item in &items {
            ring.push(item);
            prop_assert!(ring.len() <= capacity);
        }
        let start = items.len().saturating_sub(capacity);
        prop_assert_eq!(ring.to_vec(), items[start..].to_vec());
    }

    #[test]
    fn drain_front_takes_only_the_prefix(
        items in prop::collection::vec(any::<u8>(), 0..64),
        n in 0usize..80,
    ) {
        let mut ring = RingBuffer::new(64);
        for &item in &items {
            ring.push(item);
        }
        let taken = ring.drain_front(n);
        let split = n.min(items.len());
        prop_assert_eq!(taken, items[..split].to_vec());
        prop_assert_eq!(ring.to_vec(), items[split..].to_vec());
    }

    #[test]
    fn truncation_never_splits_a_char(s in "\\PC{0,200}", max in 0usize..150) {
        let cut = truncate_chars(&s, max);
        prop_assert!(s.starts_with(cut));
        prop_assert!(cut.chars().count() <= max);
    }

    #[test]
    fn empty_ignore_list_never_vetoes(message in "\\PC{0,200}") {
        let classifier = PatternClassifier::new(IgnoreList::default());
        prop_assert_ne!(classifier.classify(&message), Verdict::Ignored);
    }
}

proptest! {
    // Keys drawn from a small alphabet so repeats are common.
    #[test]
    fn dedupe_admits_each_key_once_per_window(
        keys in prop::collection::vec("[a-d]", 1..64),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();
        rt.block_on(async {
            let mut window = DedupeWindow::new(Duration::from_secs(5));
            let now = tokio::time::Instant::now();
            let mut seen = HashSet::new();
            for key in &keys {
                let admitted = window.admit(key.clone(), now);
                assert_eq!(admitted, seen.insert(key.clone()));
            }
            assert_eq!(window.len(), seen.len());
            // Once the window has passed, every key is admitted again.
            let later = now + Duration::from_secs(5);
            for key in &seen {
                assert!(window.admit(key.clone(), later));
            }
        });
    }
}
