//! Same-frequency conflict detection
//!
//! Two callsigns heard on one frequency within the window cannot both be
//! understood, so the later one is replaced by a cue tone.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// Last accepted sender per frequency
pub struct ConflictDetector {
    window: Duration,
    last_receive: DashMap<u32, (String, Instant)>,
}

impl ConflictDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_receive: DashMap::new(),
        }
    }

    /// Classify one inbound packet; accepted packets update the table
    ///
    /// `local_sending` is set when the local user is transmitting on this
    /// frequency, which always conflicts.
    pub fn check(&self, frequency: u32, callsign: &str, local_sending: bool, now: Instant) -> bool {
        if local_sending {
            return true;
        }

        match self.last_receive.entry(frequency) {
            Entry::Occupied(mut entry) => {
                let (last_callsign, last_seen) = entry.get();
                if last_callsign != callsign && now.saturating_duration_since(*last_seen) < self.window {
                    tracing::debug!(
                        "Conflict on {}: {} while {} active",
                        frequency,
                        callsign,
                        last_callsign
                    );
                    return true;
                }
                entry.insert((callsign.to_string(), now));
                false
            }
            Entry::Vacant(entry) => {
                entry.insert((callsign.to_string(), now));
                false
            }
        }
    }

    pub fn last_receive(&self, frequency: u32) -> Option<(String, Instant)> {
        self.last_receive.get(&frequency).map(|entry| entry.value().clone())
    }

    /// Drop entries that can no longer cause a conflict
    pub fn sweep(&self, now: Instant) {
        self.last_receive
            .retain(|_, (_, seen)| now.saturating_duration_since(*seen) < self.window);
    }

    pub fn clear(&self) {
        self.last_receive.clear();
    }
}
