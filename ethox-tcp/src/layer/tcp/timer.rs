//! The timer primitive shared by all connection timers.
use crate::time::{Duration, Expiration, Instant};

/// A single-shot countdown.
///
/// Polled against the clock instead of calling back, so stopping it is all that is needed for
/// cancellation. All five timers of a connection are instances of this type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Timer {
    running: bool,
    start: Instant,
    interval: Duration,
}

impl Timer {
    /// (Re-)arm the timer to expire `interval` after `now`.
    pub fn start(&mut self, now: Instant, interval: Duration) {
        self.running = true;
        self.start = now;
        self.interval = interval;
    }

    /// Disarm the timer. Stopping a stopped timer does nothing.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Check if the timer is armed.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Check if the timer is armed and its interval has passed.
    ///
    /// This has no side effects, the timer keeps running until stopped or restarted.
    pub fn elapsed(&self, now: Instant) -> bool {
        self.running && now.is_at_or_after(self.start + self.interval)
    }

    /// The interval that was given to the last `start`.
    ///
    /// This is *not* the remaining time. The retransmission back-off doubles this value.
    pub fn configured_interval(&self) -> Duration {
        self.interval
    }

    /// The instant at which the timer expires, if armed.
    pub fn expires_at(&self) -> Expiration {
        if self.running {
            Expiration::When(self.start + self.interval)
        } else {
            Expiration::Never
        }
    }
}
