//! Receive-activity view: who is being heard right now

use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Callsigns heard recently, with the frequency they were heard on
pub struct ActivityTracker {
    staleness: Duration,
    entries: DashMap<String, (Instant, u32)>,
}

impl ActivityTracker {
    pub fn new(staleness: Duration) -> Self {
        Self {
            staleness,
            entries: DashMap::new(),
        }
    }

    /// Note a packet; returns true when the callsign was not already active
    pub fn record(&self, callsign: &str, frequency: u32, now: Instant) -> bool {
        self.entries
            .insert(callsign.to_string(), (now, frequency))
            .is_none()
    }

    /// Remove stale entries, returning `(callsign, frequency)` for each
    pub fn sweep(&self, now: Instant) -> Vec<(String, u32)> {
        let mut ended = Vec::new();
        self.entries.retain(|callsign, (seen, frequency)| {
            if now.saturating_duration_since(*seen) > self.staleness {
                ended.push((callsign.clone(), *frequency));
                false
            } else {
                true
            }
        });
        ended
    }

    pub fn active_callsigns(&self) -> Vec<String> {
        let mut callsigns: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        callsigns.sort();
        callsigns
    }

    pub fn is_active(&self, callsign: &str) -> bool {
        self.entries.contains_key(callsign)
    }

    /// Drop everything, returning what was active
    pub fn clear(&self) -> Vec<(String, u32)> {
        let ended = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().1))
            .collect();
        self.entries.clear();
        ended
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ACTIVITY_STALENESS;

    #[test]
    fn test_record_reports_new_callsigns_once() {
        let tracker = ActivityTracker::new(ACTIVITY_STALENESS);
        let t0 = Instant::now();
        assert!(tracker.record("UAL123", 122800, t0));
        assert!(!tracker.record("UAL123", 122800, t0 + Duration::from_millis(20)));
        assert!(tracker.record("DAL456", 121500, t0));
        assert_eq!(tracker.active_callsigns(), vec!["DAL456", "UAL123"]);
    }

    #[test]
    fn test_sweep_removes_only_stale() {
        let tracker = ActivityTracker::new(ACTIVITY_STALENESS);
        let t0 = Instant::now();
        tracker.record("UAL123", 122800, t0);
        tracker.record("DAL456", 121500, t0 + Duration::from_millis(80));

        let ended = tracker.sweep(t0 + Duration::from_millis(150));
        assert_eq!(ended, vec![("UAL123".to_string(), 122800)]);
        assert!(tracker.is_active("DAL456"));
        assert!(!tracker.is_active("UAL123"));
    }

    #[test]
    fn test_clear_reports_all() {
        let tracker = ActivityTracker::new(ACTIVITY_STALENESS);
        tracker.record("UAL123", 122800, Instant::now());
        assert_eq!(tracker.clear().len(), 1);
        assert!(tracker.active_callsigns().is_empty());
    }
}
