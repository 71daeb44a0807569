//! Per-source circuit breaker, co-located with the source clients.
//!
//! Opens after `failure_threshold` consecutive failures. While open, calls
//! short-circuit with [`SourceError::CircuitOpen`]. After the reset timeout
//! the next call is admitted as a probe (half-open); its outcome closes or
//! re-opens the circuit.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use mangatrack_core::SourceName;

use crate::error::SourceError;
use crate::SourceResult;

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct BreakerState {
    failures: u32,
    opened_at: Option<Instant>,
    /// When the current half-open probe was admitted. A probe that never
    /// reports back stops blocking once a full reset window passes.
    probe_started: Option<Instant>,
}

impl BreakerState {
    fn new() -> Self {
        Self { failures: 0, opened_at: None, probe_started: None }
    }
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    states: Mutex<HashMap<SourceName, BreakerState>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Admission check. Errors with `CircuitOpen` while the circuit is open
    /// and the reset timeout has not lapsed; admits exactly one probe once
    /// it has.
    pub fn check(&self, source: SourceName) -> SourceResult<()> {
        let mut states = self.states.lock().expect("breaker poisoned");
        let state = states.entry(source).or_insert_with(BreakerState::new);
        let Some(opened_at) = state.opened_at else {
            return Ok(());
        };
        if opened_at.elapsed() < self.reset_timeout {
            return Err(SourceError::CircuitOpen { source });
        }
        if let Some(probe_started) = state.probe_started {
            if probe_started.elapsed() < self.reset_timeout {
                // A probe is already in flight.
                return Err(SourceError::CircuitOpen { source });
            }
        }
        state.probe_started = Some(Instant::now());
        Ok(())
    }

    /// Whether the circuit is currently open (gatekeeper view, no probe).
    pub fn is_open(&self, source: SourceName) -> bool {
        let states = self.states.lock().expect("breaker poisoned");
        match states.get(&source).and_then(|s| s.opened_at) {
            Some(opened_at) => opened_at.elapsed() < self.reset_timeout,
            None => false,
        }
    }

    pub fn record_success(&self, source: SourceName) {
        let mut states = self.states.lock().expect("breaker poisoned");
        states.insert(source, BreakerState::new());
    }

    pub fn record_failure(&self, source: SourceName) {
        let mut states = self.states.lock().expect("breaker poisoned");
        let state = states.entry(source).or_insert_with(BreakerState::new);
        state.failures += 1;
        state.probe_started = None;
        if state.failures >= self.failure_threshold {
            state.opened_at = Some(Instant::now());
        }
    }

    pub fn failure_count(&self, source: SourceName) -> u32 {
        let states = self.states.lock().expect("breaker poisoned");
        states.get(&source).map(|s| s.failures).unwrap_or(0)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new(5, Duration::from_millis(50))
    }

    #[test]
    fn test_opens_at_threshold() {
        let breaker = fast_breaker();
        let source = SourceName::MangaDex;
        for _ in 0..4 {
            breaker.record_failure(source);
            assert!(breaker.check(source).is_ok());
        }
        breaker.record_failure(source);
        assert!(breaker.is_open(source));
        assert!(matches!(
            breaker.check(source),
            Err(SourceError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn test_success_resets() {
        let breaker = fast_breaker();
        let source = SourceName::Comick;
        for _ in 0..3 {
            breaker.record_failure(source);
        }
        breaker.record_success(source);
        assert_eq!(breaker.failure_count(source), 0);
        assert!(!breaker.is_open(source));
    }

    #[test]
    fn test_probe_after_reset_timeout() {
        let breaker = fast_breaker();
        let source = SourceName::MangaDex;
        for _ in 0..5 {
            breaker.record_failure(source);
        }
        assert!(breaker.check(source).is_err());

        std::thread::sleep(Duration::from_millis(70));
        // First caller through is the probe; the next is still rejected.
        assert!(breaker.check(source).is_ok());
        assert!(breaker.check(source).is_err());

        // Probe succeeds → circuit closes.
        breaker.record_success(source);
        assert!(breaker.check(source).is_ok());
    }

    #[test]
    fn test_failed_probe_reopens() {
        let breaker = fast_breaker();
        let source = SourceName::MangaDex;
        for _ in 0..5 {
            breaker.record_failure(source);
        }
        std::thread::sleep(Duration::from_millis(70));
        assert!(breaker.check(source).is_ok());
        breaker.record_failure(source);
        assert!(breaker.is_open(source));
    }

    #[test]
    fn test_sources_are_independent() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure(SourceName::MangaDex);
        }
        assert!(breaker.is_open(SourceName::MangaDex));
        assert!(!breaker.is_open(SourceName::Comick));
        assert!(breaker.check(SourceName::Comick).is_ok());
    }
}
