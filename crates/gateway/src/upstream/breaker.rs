//! Per-upstream circuit breaker.
//!
//! Closed counts consecutive transport failures; at the threshold the
//! breaker opens for a cooldown window. When the window expires a single
//! probe is admitted (half-open); its outcome closes or re-opens the
//! breaker. `allow` and the `record_*` calls are a paired transition: every
//! admitted send must report back exactly once.

use std::{
    sync::Mutex,
    time::{Duration, Instant},
};

use config::CircuitBreakerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed { failures: u32 },
    Open { until: Instant },
    HalfOpen,
}

/// Mutex-guarded breaker state, owned by one upstream client.
pub(crate) struct CircuitBreaker {
    state: Mutex<State>,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub(crate) fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: Mutex::new(State::Closed { failures: 0 }),
            failure_threshold: config.failure_threshold.max(1),
            cooldown: config.cooldown,
        }
    }

    /// Whether a send may proceed. In the open state this flips to
    /// half-open once the cooldown expires, admitting exactly one probe.
    pub(crate) fn allow(&self) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return true;
        };

        match *state {
            State::Closed { .. } => true,
            State::Open { until } => {
                if Instant::now() >= until {
                    *state = State::HalfOpen;
                    true
                } else {
                    false
                }
            }
            // A probe is already in flight.
            State::HalfOpen => false,
        }
    }

    /// Report a reachable upstream (any HTTP response counts).
    pub(crate) fn record_success(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = State::Closed { failures: 0 };
        }
    }

    /// Report a transport failure.
    pub(crate) fn record_failure(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        *state = match *state {
            State::Closed { failures } => {
                let failures = failures + 1;

                if failures >= self.failure_threshold {
                    State::Open {
                        until: Instant::now() + self.cooldown,
                    }
                } else {
                    State::Closed { failures }
                }
            }
            State::HalfOpen | State::Open { .. } => State::Open {
                until: Instant::now() + self.cooldown,
            },
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(&CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown,
        })
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = breaker(3, Duration::from_secs(60));

        for _ in 0..3 {
            assert!(breaker.allow());
            breaker.record_failure();
        }

        assert!(!breaker.allow(), "breaker should be open after 3 failures");
    }

    #[test]
    fn success_resets_the_failure_count() {
        let breaker = breaker(3, Duration::from_secs(60));

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        assert!(breaker.allow(), "count restarts after a success");
    }

    #[test]
    fn cooldown_admits_a_single_probe() {
        let breaker = breaker(1, Duration::from_millis(0));

        breaker.record_failure();

        // Cooldown of zero: the next allow is the half-open probe.
        assert!(breaker.allow());
        // No second probe while the first is outstanding.
        assert!(!breaker.allow());

        breaker.record_success();
        assert!(breaker.allow());
    }

    #[test]
    fn failed_probe_reopens() {
        let probe = breaker(1, Duration::from_millis(0));

        probe.record_failure();
        assert!(probe.allow());
        probe.record_failure();

        // Zero cooldown reopens immediately into another probe; a real
        // cooldown blocks instead.
        let blocked = breaker(1, Duration::from_secs(60));
        blocked.record_failure();
        assert!(!blocked.allow());
    }
}
