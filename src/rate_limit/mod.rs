//! Sliding-window rate limiting for scrape admission.
//!
//! Each client key owns a list of (timestamp, units) events. A call
//! asking for `requested` units is admitted iff the units consumed in
//! the trailing window plus the request stay within the budget. State
//! is in-memory and resets on restart.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tracing::debug;

/// One admission event: when it happened and how many units it spent.
#[derive(Debug, Clone, Copy)]
struct WindowEvent {
    at_secs: f64,
    units: u32,
}

/// Admission decision for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Denied; the window has room again after `retry_after_secs`.
    Denied { retry_after_secs: u64 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Per-key sliding-window admission control.
///
/// Construct once at startup and share via `Arc`; every decision is a
/// single short critical section, so concurrent calls on the same key
/// never observe a half-applied window mutation. Stale events are
/// pruned lazily on the next access to their key.
pub struct RateLimiter {
    started: Instant,
    windows: Mutex<HashMap<String, Vec<WindowEvent>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether `key` may spend `requested` units now.
    ///
    /// Admitting records the spend; denying records nothing. A request
    /// for zero units is always admitted and never recorded.
    pub fn check(
        &self,
        key: &str,
        max_units: u32,
        window_secs: u64,
        requested: u32,
    ) -> Admission {
        let now = self.started.elapsed().as_secs_f64();
        self.check_at(now, key, max_units, window_secs, requested)
    }

    fn check_at(
        &self,
        now: f64,
        key: &str,
        max_units: u32,
        window_secs: u64,
        requested: u32,
    ) -> Admission {
        if requested == 0 {
            return Admission::Allowed;
        }

        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let events = windows.entry(key.to_string()).or_default();

        // Drop events older than the window
        let cutoff = now - window_secs as f64;
        events.retain(|e| e.at_secs > cutoff);

        let used: u64 = events.iter().map(|e| u64::from(e.units)).sum();
        if used + u64::from(requested) > u64::from(max_units) {
            let oldest = events
                .iter()
                .map(|e| e.at_secs)
                .fold(f64::INFINITY, f64::min);
            let retry_after_secs = if oldest.is_finite() {
                (window_secs as f64 - (now - oldest)) as u64 + 1
            } else {
                window_secs
            };
            debug!(
                key,
                used, requested, max_units, retry_after_secs, "admission denied"
            );
            return Admission::Denied { retry_after_secs };
        }

        events.push(WindowEvent {
            at_secs: now,
            units: requested,
        });
        Admission::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn denied_after(admission: Admission) -> u64 {
        match admission {
            Admission::Denied { retry_after_secs } => retry_after_secs,
            Admission::Allowed => panic!("expected denial"),
        }
    }

    #[test]
    fn admits_up_to_budget_then_denies() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_at(0.0, "1.2.3.4", 10, 120, 6).is_allowed());
        assert!(limiter.check_at(1.0, "1.2.3.4", 10, 120, 4).is_allowed());
        let retry = denied_after(limiter.check_at(2.0, "1.2.3.4", 10, 120, 1));
        assert!(retry > 0);
        // window_secs - (now - oldest) floored, plus one
        assert_eq!(retry, 119);
    }

    #[test]
    fn events_expire_out_of_the_window() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_at(0.0, "k", 10, 120, 10).is_allowed());
        assert!(!limiter.check_at(60.0, "k", 10, 120, 1).is_allowed());
        // The event from t=0 falls out of the window at t>120
        assert!(limiter.check_at(120.5, "k", 10, 120, 10).is_allowed());
    }

    #[test]
    fn denial_does_not_consume_budget() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_at(0.0, "k", 10, 120, 8).is_allowed());
        assert!(!limiter.check_at(1.0, "k", 10, 120, 5).is_allowed());
        // Room for 2 remains; the denied 5 was not recorded
        assert!(limiter.check_at(2.0, "k", 10, 120, 2).is_allowed());
    }

    #[test]
    fn oversized_request_on_empty_window_reports_full_window() {
        let limiter = RateLimiter::new();
        assert_eq!(denied_after(limiter.check_at(0.0, "k", 10, 120, 11)), 120);
    }

    #[test]
    fn zero_units_always_admitted_and_not_recorded() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_at(0.0, "k", 1, 120, 1).is_allowed());
        for _ in 0..5 {
            assert!(limiter.check_at(1.0, "k", 1, 120, 0).is_allowed());
        }
        // Budget is still exactly consumed by the single unit event
        assert!(!limiter.check_at(2.0, "k", 1, 120, 1).is_allowed());
    }

    #[test]
    fn keys_are_independent() {
        let limiter = RateLimiter::new();
        assert!(limiter.check_at(0.0, "a", 10, 120, 10).is_allowed());
        assert!(limiter.check_at(0.0, "b", 10, 120, 10).is_allowed());
        assert!(!limiter.check_at(1.0, "a", 10, 120, 1).is_allowed());
    }

    #[test]
    fn concurrent_callers_never_overshoot_the_budget() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let limiter = Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || {
                limiter.check("shared", 10, 120, 3).is_allowed()
            }));
        }
        let admitted = handles
            .into_iter()
            .map(|h| h.join().expect("thread panicked"))
            .filter(|&admitted| admitted)
            .count();
        // 3 admissions of 3 units fit in 10; a fourth would overshoot
        assert_eq!(admitted, 3);
    }
}
