use std::collections::HashMap;

use resources::objects::scaled_object::Fallback;

/// Consecutive-failure bookkeeping for one target, written only by the
/// target's own task; status readers get a snapshot.
#[derive(Debug, Default)]
pub struct FallbackTracker {
    counters: HashMap<usize, u32>,
}

impl FallbackTracker {
    pub fn new() -> Self {
        FallbackTracker::default()
    }

    /// Returns the new consecutive-failure count for the trigger.
    pub fn record_failure(&mut self, trigger_index: usize) -> u32 {
        let counter = self.counters.entry(trigger_index).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    pub fn record_success(&mut self, trigger_index: usize) {
        self.counters.remove(&trigger_index);
    }

    pub fn failures(&self, trigger_index: usize) -> u32 {
        self.counters.get(&trigger_index).copied().unwrap_or(0)
    }

    /// Whether the substitute replica count currently applies.
    pub fn fallback_active(&self, fallback: Option<&Fallback>) -> bool {
        match fallback {
            Some(f) => self
                .counters
                .values()
                .any(|count| *count >= f.failure_threshold),
            None => false,
        }
    }

    pub fn snapshot(&self) -> HashMap<usize, u32> {
        self.counters.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_accumulate_until_a_success() {
        let mut tracker = FallbackTracker::new();
        assert_eq!(tracker.record_failure(0), 1);
        assert_eq!(tracker.record_failure(0), 2);
        assert_eq!(tracker.failures(0), 2);
        tracker.record_success(0);
        assert_eq!(tracker.failures(0), 0);
        assert_eq!(tracker.record_failure(0), 1);
    }

    #[test]
    fn fallback_activates_at_threshold() {
        let fallback = Fallback {
            failure_threshold: 3,
            replicas: 4,
        };
        let mut tracker = FallbackTracker::new();
        tracker.record_failure(0);
        tracker.record_failure(0);
        assert!(!tracker.fallback_active(Some(&fallback)));
        tracker.record_failure(0);
        assert!(tracker.fallback_active(Some(&fallback)));
        assert!(!tracker.fallback_active(None));
    }
}
