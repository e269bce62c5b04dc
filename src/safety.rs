//! Liveness supervision and restart causes.
//!
//! The watchdog is the outer liveness contract for the poll loop: every code path,
//! including the bring-up sub-loop, must call [`Watchdog::feed`] at least once per
//! [`WATCHDOG_TIMEOUT`]. On hardware this is a timer peripheral; on a host the
//! [`ProcessWatchdog`] plays that role by terminating the process so a supervisor
//! starts it again.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::error;

pub const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(60);

const MONITOR_INTERVAL: Duration = Duration::from_millis(500);
const WATCHDOG_EXIT_CODE: i32 = 70;

pub trait Watchdog {
    fn feed(&mut self);
}

/// Why the device asked for a full restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetReason {
    /// `@reset` from the console.
    AdminCommand,
    /// Persisted configuration was erased.
    FactoryReset,
    /// Wireless was switched on or off and the stack must come up fresh.
    WifiToggle,
    /// An error escaped the poll loop.
    Fatal(String),
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetReason::AdminCommand => write!(f, "reset requested"),
            ResetReason::FactoryReset => write!(f, "factory reset"),
            ResetReason::WifiToggle => write!(f, "wifi toggled"),
            ResetReason::Fatal(e) => write!(f, "fatal error: {}", e),
        }
    }
}

#[derive(Debug)]
struct Shared {
    origin: Instant,
    last_feed_ms: AtomicU64,
    stopped: AtomicBool,
}

impl Shared {
    fn elapsed_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Watchdog backed by a monitor thread that exits the process on expiry.
#[derive(Debug)]
pub struct ProcessWatchdog {
    shared: Arc<Shared>,
}

impl ProcessWatchdog {
    pub fn start(timeout: Duration) -> Self {
        let shared = Arc::new(Shared {
            origin: Instant::now(),
            last_feed_ms: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        });
        let monitor = Arc::clone(&shared);
        let limit_ms = timeout.as_millis() as u64;

        thread::spawn(move || {
            while !monitor.stopped.load(Ordering::Relaxed) {
                thread::sleep(MONITOR_INTERVAL);
                let starved = monitor
                    .elapsed_ms()
                    .saturating_sub(monitor.last_feed_ms.load(Ordering::Relaxed));
                if starved > limit_ms {
                    error!(starved_ms = starved, "watchdog expired, terminating");
                    std::process::exit(WATCHDOG_EXIT_CODE);
                }
            }
        });

        Self { shared }
    }
}

impl Watchdog for ProcessWatchdog {
    fn feed(&mut self) {
        self.shared
            .last_feed_ms
            .store(self.shared.elapsed_ms(), Ordering::Relaxed);
    }
}

impl Drop for ProcessWatchdog {
    fn drop(&mut self) {
        self.shared.stopped.store(true, Ordering::Relaxed);
    }
}

/// Watchdog that only counts feeds. Clones share the count.
#[derive(Debug, Clone, Default)]
pub struct CountingWatchdog {
    feeds: Rc<Cell<u64>>,
}

impl CountingWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feeds(&self) -> u64 {
        self.feeds.get()
    }
}

impl Watchdog for CountingWatchdog {
    fn feed(&mut self) {
        self.feeds.set(self.feeds.get() + 1);
    }
}

impl<W: Watchdog + ?Sized> Watchdog for Box<W> {
    fn feed(&mut self) {
        (**self).feed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_watchdog_shares_count() {
        let probe = CountingWatchdog::new();
        let mut dog = probe.clone();
        dog.feed();
        dog.feed();
        assert_eq!(probe.feeds(), 2);
    }

    #[test]
    fn test_fed_process_watchdog_survives() {
        let mut dog = ProcessWatchdog::start(Duration::from_secs(5));
        for _ in 0..3 {
            dog.feed();
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_reset_reason_display() {
        assert_eq!(ResetReason::WifiToggle.to_string(), "wifi toggled");
        assert_eq!(
            ResetReason::Fatal("link".into()).to_string(),
            "fatal error: link"
        );
    }
}
