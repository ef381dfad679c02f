//! Per-provider circuit breaker: an explicit closed/open/half-open state
//! machine rather than a pile of booleans.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

use crate::metrics;

const THRESHOLD: usize = 3;
const COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    /// Numeric encoding published on the `/metrics` gauge.
    fn as_gauge_value(self) -> f64 {
        match self {
            BreakerState::Closed => 0.0,
            BreakerState::HalfOpen => 1.0,
            BreakerState::Open => 2.0,
        }
    }
}

struct BreakerInner {
    state: BreakerState,
    failure_timestamps: Vec<Instant>,
    last_failure_time: Option<Instant>,
    half_open_attempts: u32,
}

pub struct CircuitBreaker {
    name: String,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_timestamps: Vec::new(),
                last_failure_time: None,
                half_open_attempts: 0,
            }),
        }
    }

    fn publish_state(&self, state: BreakerState) {
        metrics::set_breaker_state(&self.name, state.as_gauge_value());
    }

    /// Admission check. Pure except for the lazy open→half-open transition,
    /// which happens here (not on a background timer) the moment `cooldown`
    /// has elapsed since the last failure.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.inner.lock();

        if inner.state == BreakerState::Open {
            if let Some(last) = inner.last_failure_time {
                if last.elapsed() >= COOLDOWN {
                    inner.state = BreakerState::HalfOpen;
                    inner.half_open_attempts = 0;
                    tracing::info!(provider = %self.name, "circuit half-open, admitting probe");
                    self.publish_state(BreakerState::HalfOpen);
                }
            }
        }

        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => {
                if inner.half_open_attempts < 1 {
                    inner.half_open_attempts += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        let was_open = inner.state != BreakerState::Closed;
        inner.failure_timestamps.clear();
        inner.state = BreakerState::Closed;
        inner.half_open_attempts = 0;
        inner.last_failure_time = None;
        drop(inner);

        if was_open {
            tracing::info!(provider = %self.name, "circuit closed after successful probe");
        }
        self.publish_state(BreakerState::Closed);
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            BreakerState::Closed => {
                inner.failure_timestamps.push(now);
                inner
                    .failure_timestamps
                    .retain(|ts| now.duration_since(*ts) < COOLDOWN);
                if inner.failure_timestamps.len() >= THRESHOLD {
                    inner.state = BreakerState::Open;
                    inner.last_failure_time = Some(now);
                    tracing::warn!(provider = %self.name, failures = inner.failure_timestamps.len(), "circuit opened");
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.last_failure_time = Some(now);
                inner.failure_timestamps.clear();
                tracing::warn!(provider = %self.name, "probe failed, circuit reopened");
            }
            BreakerState::Open => {
                inner.last_failure_time = Some(now);
            }
        }

        let state = inner.state;
        drop(inner);
        self.publish_state(state);
    }

    pub fn last_failure_time(&self) -> Option<Instant> {
        self.inner.lock().last_failure_time
    }

    #[cfg(test)]
    fn state(&self) -> BreakerState {
        self.inner.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_admits_by_default() {
        let cb = CircuitBreaker::new("p");
        assert!(cb.can_attempt());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let cb = CircuitBreaker::new("p");
        cb.record_failure();
        cb.record_failure();
        assert!(cb.can_attempt());
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.can_attempt());
    }

    #[test]
    fn success_in_closed_state_is_a_no_op() {
        let cb = CircuitBreaker::new("p");
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();
        // Only 2 failures since the success cleared history; still closed.
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_admits_exactly_one_probe() {
        let cb = CircuitBreaker::new("p");
        for _ in 0..THRESHOLD {
            cb.record_failure();
        }
        assert_eq!(cb.state(), BreakerState::Open);

        // Force the cooldown to have elapsed by manipulating internal state
        // directly isn't possible from outside; instead verify the shape of
        // the half-open gate using the public transition path.
        {
            let mut inner = cb.inner.lock();
            inner.last_failure_time = Some(Instant::now() - COOLDOWN - Duration::from_secs(1));
        }

        assert!(cb.can_attempt());
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        assert!(!cb.can_attempt());
    }

    #[test]
    fn half_open_success_closes_and_clears_history() {
        let cb = CircuitBreaker::new("p");
        for _ in 0..THRESHOLD {
            cb.record_failure();
        }
        {
            let mut inner = cb.inner.lock();
            inner.last_failure_time = Some(Instant::now() - COOLDOWN - Duration::from_secs(1));
        }
        assert!(cb.can_attempt());
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.last_failure_time().is_none());
    }

    #[test]
    fn half_open_failure_reopens() {
        let cb = CircuitBreaker::new("p");
        for _ in 0..THRESHOLD {
            cb.record_failure();
        }
        {
            let mut inner = cb.inner.lock();
            inner.last_failure_time = Some(Instant::now() - COOLDOWN - Duration::from_secs(1));
        }
        assert!(cb.can_attempt());
        cb.record_failure();
        assert_eq!(cb.state(), BreakerState::Open);
    }

    #[test]
    fn failures_outside_cooldown_do_not_accumulate() {
        let cb = CircuitBreaker::new("p");
        cb.record_failure();
        {
            let mut inner = cb.inner.lock();
            // Age out the single recorded failure.
            inner.failure_timestamps[0] = Instant::now() - COOLDOWN - Duration::from_secs(1);
        }
        cb.record_failure();
        cb.record_failure();
        // The aged-out entry should have been pruned, so only 2 remain.
        assert_eq!(cb.state(), BreakerState::Closed);
    }
}
