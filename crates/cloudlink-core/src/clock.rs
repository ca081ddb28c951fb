//! Time source and bounded polling.
//!
//! Every blocking wait in the lifecycle (station join, time sync, token
//! issuance) is a [`PollPolicy`]: check a condition, sleep one quantum, and
//! give up after a fixed number of checks. The clock is injected so tests can
//! run the full lifecycle without real sleeps.

use std::cell::Cell;
use std::time::{Duration, Instant};

use tracing::trace;

/// Monotonic time source with a blocking sleep.
pub trait Clock {
    /// Time elapsed since boot.
    fn now(&self) -> Duration;

    /// Block the caller for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::time::Instant` and `std::thread::sleep`.
#[derive(Debug, Clone)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated clock: `sleep` advances time instantly.
///
/// Used for host simulations and tests where real delays would only slow
/// things down.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without sleeping.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// A bounded busy-wait: at most `max_attempts` checks, `interval_ms` apart.
///
/// The maximum blocking time of a wait is [`PollPolicy::ceiling`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between two checks, in milliseconds.
    pub interval_ms: u64,
    /// Number of checks before giving up.
    pub max_attempts: u32,
}

/// Result of a bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The condition held on check number `attempts`.
    Ready { attempts: u32 },
    /// The condition never held within the ceiling.
    Exhausted { attempts: u32 },
}

impl PollOutcome {
    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready { .. })
    }

    /// Number of checks performed.
    pub fn attempts(&self) -> u32 {
        match self {
            PollOutcome::Ready { attempts } | PollOutcome::Exhausted { attempts } => *attempts,
        }
    }
}

impl PollPolicy {
    pub const fn new(interval_ms: u64, max_attempts: u32) -> Self {
        Self {
            interval_ms,
            max_attempts,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Upper bound on the time a single [`PollPolicy::wait`] may block.
    pub fn ceiling(&self) -> Duration {
        self.interval() * self.max_attempts
    }

    /// Check `ready` until it returns true or the attempt budget runs out.
    ///
    /// The condition is checked before each sleep, so a condition that is
    /// already true returns after one check without sleeping.
    pub fn wait<C, F>(&self, clock: &C, label: &str, mut ready: F) -> PollOutcome
    where
        C: Clock + ?Sized,
        F: FnMut() -> bool,
    {
        for attempt in 1..=self.max_attempts {
            if ready() {
                return PollOutcome::Ready { attempts: attempt };
            }
            trace!("{}: waiting ({}/{})", label, attempt, self.max_attempts);
            clock.sleep(self.interval());
        }
        PollOutcome::Exhausted {
            attempts: self.max_attempts,
        }
    }
}
