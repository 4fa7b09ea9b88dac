//! Per-upstream circuit breaker: CLOSED → OPEN → HALF_OPEN → CLOSED.
//!
//! Grounded on the spec's §4.9 state machine. Counters are guarded by a
//! `parking_lot::Mutex` rather than atomics because a state transition reads
//! and writes several fields together (state, counts, timestamp) and must be
//! observed atomically by concurrent acquirers.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitPhase {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitThresholds {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitThresholds {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout: Duration::from_secs(30),
        }
    }
}

struct Inner {
    phase: CircuitPhase,
    failure_count: u32,
    success_count: u32,
    opened_at: Option<Instant>,
}

/// CLOSED/OPEN/HALF_OPEN gate in front of a single upstream's transport
/// acquisition path.
pub struct CircuitBreaker {
    thresholds: CircuitThresholds,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(thresholds: CircuitThresholds) -> Self {
        Self {
            thresholds,
            inner: Mutex::new(Inner {
                phase: CircuitPhase::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            }),
        }
    }

    /// Returns `true` if a new acquisition attempt is permitted right now.
    /// OPEN transitions to HALF_OPEN as a side effect once the cooldown has
    /// elapsed, so callers should call this immediately before attempting a
    /// connect, not speculatively.
    pub fn permits_attempt(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.phase {
            CircuitPhase::Closed => true,
            CircuitPhase::HalfOpen => true,
            CircuitPhase::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.thresholds.open_timeout)
                    .unwrap_or(true);
                if elapsed {
                    inner.phase = CircuitPhase::HalfOpen;
                    inner.success_count = 0;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        match inner.phase {
            CircuitPhase::Closed => {
                inner.failure_count = 0;
            }
            CircuitPhase::HalfOpen => {
                inner.success_count += 1;
                if inner.success_count >= self.thresholds.success_threshold {
                    inner.phase = CircuitPhase::Closed;
                    inner.failure_count = 0;
                    inner.success_count = 0;
                    inner.opened_at = None;
                }
            }
            CircuitPhase::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        match inner.phase {
            CircuitPhase::Closed => {
                inner.failure_count += 1;
                if inner.failure_count >= self.thresholds.failure_threshold {
                    inner.phase = CircuitPhase::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitPhase::HalfOpen => {
                inner.phase = CircuitPhase::Open;
                inner.opened_at = Some(Instant::now());
                inner.success_count = 0;
            }
            CircuitPhase::Open => {}
        }
    }

    pub fn phase(&self) -> CircuitPhase {
        self.inner.lock().phase
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn thresholds() -> CircuitThresholds {
        CircuitThresholds {
            failure_threshold: 2,
            success_threshold: 2,
            open_timeout: Duration::from_millis(20),
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(thresholds());
        assert_eq!(cb.phase(), CircuitPhase::Closed);
        cb.record_failure();
        assert_eq!(cb.phase(), CircuitPhase::Closed);
        cb.record_failure();
        assert_eq!(cb.phase(), CircuitPhase::Open);
        assert!(!cb.permits_attempt());
    }

    #[test]
    fn half_open_then_closed_on_success() {
        let cb = CircuitBreaker::new(thresholds());
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.permits_attempt());
        assert_eq!(cb.phase(), CircuitPhase::HalfOpen);
        cb.record_success();
        assert_eq!(cb.phase(), CircuitPhase::HalfOpen);
        cb.record_success();
        assert_eq!(cb.phase(), CircuitPhase::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new(thresholds());
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(25));
        assert!(cb.permits_attempt());
        cb.record_failure();
        assert_eq!(cb.phase(), CircuitPhase::Open);
    }
}
