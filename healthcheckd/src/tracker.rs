use std::collections::HashSet;
use parking_lot::RwLock;

/// Addresses observed during the current reconciliation window.
///
/// Workers call `mark_seen` concurrently; the reconciler is the only caller
/// of `snapshot_and_clear`, which atomically hands over the window and
/// starts the next one empty.
#[derive(Debug, Default)]
pub struct LivenessTracker {
    seen: RwLock<HashSet<String>>,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Repeat marks for an address only take the read lock.
    pub fn mark_seen(&self, address: &str) {
        if self.seen.read().contains(address) {
            return;
        }
        self.seen.write().insert(address.to_string());
    }

    /// Take the current window and reset the tracker. The returned set owns
    /// its storage; later marks go to the next window.
    pub fn snapshot_and_clear(&self) -> HashSet<String> {
        std::mem::take(&mut *self.seen.write())
    }

    pub fn len(&self) -> usize {
        self.seen.read().len()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.seen.read().contains(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_mark_is_idempotent() {
        let tracker = LivenessTracker::new();
        for _ in 0..5 {
            tracker.mark_seen("10.0.0.5");
        }
        tracker.mark_seen("10.0.0.6");

        let window = tracker.snapshot_and_clear();
        assert_eq!(window.len(), 2);
        assert!(window.contains("10.0.0.5"));
        assert!(window.contains("10.0.0.6"));
    }

    #[test]
    fn test_snapshot_resets_window() {
        let tracker = LivenessTracker::new();
        tracker.mark_seen("10.0.0.5");

        let first = tracker.snapshot_and_clear();
        assert_eq!(tracker.len(), 0);

        tracker.mark_seen("10.0.0.7");
        let second = tracker.snapshot_and_clear();

        // The first snapshot is unaffected by marks in the next window
        assert_eq!(first.len(), 1);
        assert!(first.contains("10.0.0.5"));
        assert_eq!(second.len(), 1);
        assert!(second.contains("10.0.0.7"));
    }

    #[test]
    fn test_concurrent_marks() {
        let tracker = Arc::new(LivenessTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tracker = tracker.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        tracker.mark_seen(&format!("10.0.{}.{}", t % 2, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.snapshot_and_clear().len(), 200);
    }
}
