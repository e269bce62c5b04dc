use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Monotonic time source for the poll loop.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock. Clones share the same reading, so a test can keep one handle
/// and give the other to the device.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, to: Duration) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CadenceStats {
    pub fired: u32,
    pub skipped: u32,
}

/// A periodic action. Fires on the first check, then again once strictly more than
/// `period` has elapsed since the last firing.
#[derive(Debug, Clone)]
pub struct Cadence {
    period: Duration,
    next_due: Option<Duration>,
    stats: CadenceStats,
}

impl Cadence {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next_due: None,
            stats: CadenceStats::default(),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Returns true and re-arms when the cadence is due at `now`.
    pub fn due(&mut self, now: Duration) -> bool {
        let ready = self.next_due.map_or(true, |next| now > next);
        if ready {
            self.next_due = Some(now + self.period);
            self.stats.fired = self.stats.fired.saturating_add(1);
        }
        ready
    }

    /// Like [`Cadence::due`], but a closed gate leaves the cadence armed so it fires
    /// as soon as the gate opens.
    pub fn due_when(&mut self, now: Duration, gate: bool) -> bool {
        if !gate {
            if self.next_due.map_or(true, |next| now > next) {
                self.stats.skipped = self.stats.skipped.saturating_add(1);
            }
            return false;
        }
        self.due(now)
    }

    pub fn reset(&mut self) {
        self.next_due = None;
    }

    pub fn stats(&self) -> CadenceStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_check_fires_immediately() {
        let mut cadence = Cadence::new(Duration::from_secs(60));
        assert!(cadence.due(Duration::ZERO));
        assert!(!cadence.due(Duration::from_secs(30)));
        assert!(!cadence.due(Duration::from_secs(60)));
        assert!(cadence.due(Duration::from_secs(61)));
        assert_eq!(cadence.stats().fired, 2);
    }

    #[test]
    fn test_gate_holds_cadence_armed() {
        let mut cadence = Cadence::new(Duration::from_secs(900));
        assert!(!cadence.due_when(Duration::from_secs(5), false));
        assert!(!cadence.due_when(Duration::from_secs(6), false));
        assert!(cadence.due_when(Duration::from_secs(7), true));
        assert!(!cadence.due_when(Duration::from_secs(8), true));
        assert_eq!(cadence.stats(), CadenceStats { fired: 1, skipped: 2 });
    }

    #[test]
    fn test_manual_clock_handles_share_time() {
        let clock = ManualClock::new();
        let device = clock.clone();
        clock.advance(Duration::from_millis(1500));
        assert_eq!(device.now(), Duration::from_millis(1500));
        clock.set(Duration::from_secs(4));
        assert_eq!(device.now(), Duration::from_secs(4));
    }
}
