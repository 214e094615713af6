//! Per-browser run watchdog.
//!
//! One timer per `(feature_id, run_id, browser_key)`:
//!
//! ```text
//!          reset              expire(now >= deadline)
//!   idle ─────────► armed ─────────────────────────► fired (removed)
//!     ▲               │
//!     └──── clear ────┘        reset while armed: old timer cancelled,
//!                              new deadline and generation installed
//! ```
//!
//! The supervisor does not own a clock or a thread. Callers pass `now` and
//! drive `expire` from whatever loop they run; the daemon ticks it from a
//! background thread under the same lock as event application.
//!
//! Step events (`StepStarted`, `StepDetailedInfo`, `StepFinished`) clear the
//! timer without re-arming it, so after the first step begins a stuck run is
//! only caught if a later queued/initializing/started event re-arms the
//! watchdog. This mirrors the behavior display clients were built against.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::types::{BrowserKey, FeatureId, RunId};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerKey {
    pub feature_id: FeatureId,
    pub run_id: RunId,
    pub browser_key: BrowserKey,
}

impl TimerKey {
    pub fn new(feature_id: FeatureId, run_id: RunId, browser_key: BrowserKey) -> Self {
        Self {
            feature_id,
            run_id,
            browser_key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ArmedTimer {
    deadline: DateTime<Utc>,
    generation: u64,
}

#[derive(Debug)]
pub struct TimeoutSupervisor {
    timeout: Duration,
    timers: HashMap<TimerKey, ArmedTimer>,
    next_generation: u64,
}

impl TimeoutSupervisor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            timers: HashMap::new(),
            next_generation: 1,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Cancels any timer for `key` and arms a fresh one. Returns the
    /// generation of the new timer.
    pub fn reset(&mut self, key: TimerKey, now: DateTime<Utc>) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        let previous = self.timers.insert(
            key,
            ArmedTimer {
                deadline: now + self.timeout,
                generation,
            },
        );
        if let Some(previous) = previous {
            tracing::trace!(
                cancelled_generation = previous.generation,
                generation,
                "Watchdog re-armed"
            );
        }
        generation
    }

    /// Disarms the timer for `key`. Returns whether one was armed.
    pub fn clear(&mut self, key: &TimerKey) -> bool {
        self.timers.remove(key).is_some()
    }

    pub fn clear_all(&mut self) {
        self.timers.clear();
    }

    /// Removes and returns every timer whose deadline has passed, ordered by
    /// deadline.
    pub fn expire(&mut self, now: DateTime<Utc>) -> Vec<TimerKey> {
        let mut fired: Vec<(TimerKey, ArmedTimer)> = Vec::new();
        self.timers.retain(|key, timer| {
            if timer.deadline <= now {
                fired.push((key.clone(), *timer));
                false
            } else {
                true
            }
        });
        fired.sort_by(|left, right| {
            (left.1.deadline, left.1.generation).cmp(&(right.1.deadline, right.1.generation))
        });
        fired.into_iter().map(|(key, _)| key).collect()
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.timers.contains_key(key)
    }

    pub fn deadline(&self, key: &TimerKey) -> Option<DateTime<Utc>> {
        self.timers.get(key).map(|timer| timer.deadline)
    }

    pub fn generation(&self, key: &TimerKey) -> Option<u64> {
        self.timers.get(key).map(|timer| timer.generation)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap()
    }

    fn key(feature_id: FeatureId) -> TimerKey {
        TimerKey::new(feature_id, 1, BrowserKey::from("linux||chrome|||false"))
    }

    #[test]
    fn reset_twice_leaves_one_timer() {
        let mut supervisor = TimeoutSupervisor::new(Duration::seconds(30));
        let first = supervisor.reset(key(1), t0());
        let second = supervisor.reset(key(1), t0() + Duration::seconds(10));

        assert_ne!(first, second);
        assert_eq!(supervisor.armed_count(), 1);
        assert_eq!(supervisor.generation(&key(1)), Some(second));
        assert_eq!(
            supervisor.deadline(&key(1)),
            Some(t0() + Duration::seconds(40))
        );

        // The first deadline passes without firing the replaced timer.
        assert!(supervisor.expire(t0() + Duration::seconds(35)).is_empty());
        assert_eq!(
            supervisor.expire(t0() + Duration::seconds(40)),
            vec![key(1)]
        );
        assert_eq!(supervisor.armed_count(), 0);
    }

    #[test]
    fn clear_disarms() {
        let mut supervisor = TimeoutSupervisor::new(Duration::seconds(30));
        supervisor.reset(key(1), t0());
        assert!(supervisor.clear(&key(1)));
        assert!(!supervisor.clear(&key(1)));
        assert!(supervisor.expire(t0() + Duration::hours(1)).is_empty());
    }

    #[test]
    fn expire_orders_by_deadline_and_keeps_pending() {
        let mut supervisor = TimeoutSupervisor::new(Duration::seconds(30));
        supervisor.reset(key(2), t0() + Duration::seconds(5));
        supervisor.reset(key(1), t0());
        supervisor.reset(key(3), t0() + Duration::seconds(60));

        let fired = supervisor.expire(t0() + Duration::seconds(40));
        assert_eq!(fired, vec![key(1), key(2)]);
        assert!(supervisor.is_armed(&key(3)));
    }
}
