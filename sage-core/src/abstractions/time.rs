//! Time abstractions for testability
//!
//! This module provides trait-based abstractions for time operations,
//! enabling deterministic testing of time-dependent code.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Instant in time (monotonic clock)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Instant(u64); // Microseconds since the clock's origin

impl Instant {
    /// Create from microseconds
    pub fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    /// Get microseconds value
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Duration since another instant
    pub fn duration_since(&self, earlier: Instant) -> Duration {
        let micros = self.0.saturating_sub(earlier.0);
        Duration::from_micros(micros)
    }

    /// Time elapsed since this instant
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.duration_since(*self)
    }
}

/// Abstraction for time operations
#[async_trait]
pub trait Clock: Send + Sync + Debug {
    /// Get current instant (monotonic)
    fn now(&self) -> Instant;

    /// Get current system time
    fn system_time(&self) -> SystemTime;

    /// Sleep for a duration
    async fn sleep(&self, duration: Duration);

    /// Milliseconds since the unix epoch according to this clock
    fn epoch_millis(&self) -> u64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Production clock backed by the OS and the tokio timer
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: std::time::Instant,
}

impl SystemClock {
    /// Create new instance
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::from_micros(self.origin.elapsed().as_micros() as u64)
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Mock clock for deterministic testing
///
/// Time only moves when [`MockClock::advance`] is called or when something
/// sleeps on it. Sleeping advances the clock by the requested duration and
/// returns immediately; every requested sleep is recorded so tests can assert
/// on the exact delays a component asked for.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    /// Current time in microseconds
    current_micros: Arc<Mutex<u64>>,
    /// Durations passed to `sleep`, in call order
    sleeps: Arc<Mutex<Vec<Duration>>>,
}

impl MockClock {
    /// Create new mock clock starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with specific starting time
    pub fn with_time(micros: u64) -> Self {
        let clock = Self::new();
        *clock.current_micros.lock() = micros;
        clock
    }

    /// Advance time by duration
    pub fn advance(&self, duration: Duration) {
        *self.current_micros.lock() += duration.as_micros() as u64;
    }

    /// Get current mock time
    pub fn current_time(&self) -> u64 {
        *self.current_micros.lock()
    }

    /// All sleeps requested so far
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

#[async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        Instant::from_micros(*self.current_micros.lock())
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_micros(*self.current_micros.lock())
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_clock_sleep_advances_and_records() {
        let clock = MockClock::new();

        clock.sleep(Duration::from_secs(5)).await;
        clock.sleep(Duration::from_millis(250)).await;

        assert_eq!(clock.current_time(), 5_250_000);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_secs(5), Duration::from_millis(250)]
        );
    }

    #[test]
    fn test_mock_clock_epoch_millis() {
        let clock = MockClock::with_time(120_000_000);
        assert_eq!(clock.epoch_millis(), 120_000);

        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.epoch_millis(), 121_000);
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(clock.epoch_millis() > 0);
    }
}
