// Monotonic time sources
//
// Every wait loop in the robot is a polling loop, so time only needs to be read,
// never slept on. The simulated clock lets tests step time deterministically.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic time source measured from an arbitrary epoch
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Shared handle used by every component that needs time
pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// Wall clock backed by `Instant`
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Manually advanced clock for simulation and tests
///
/// Clones share the same time, so a harness can hold one handle and advance it
/// while the robot reads another.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    micros: Arc<AtomicU64>,
}

impl SimClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn set(&self, at: Duration) {
        self.micros.store(at.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::Relaxed))
    }

    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        SimClock::now(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_shared_between_clones() {
        let clock = SimClock::new();
        let shared = clock.shared();
        clock.advance(Duration::from_millis(5));
        assert_eq!(shared.now(), Duration::from_millis(5));
        clock.set(Duration::from_secs(1));
        assert_eq!(shared.now(), Duration::from_secs(1));
    }

    #[test]
    fn test_sim_clock_reads_without_trait() {
        let clock = SimClock::new();
        clock.advance(Duration::from_micros(250));
        assert_eq!(SimClock::now(&clock), Duration::from_micros(250));
        assert_eq!(Clock::now(&clock), SimClock::now(&clock));
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
