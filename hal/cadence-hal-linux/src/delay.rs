//! Thread-sleep delays

use std::thread;
use std::time::Duration;

use embedded_hal::delay::DelayNs;

/// Delay backed by `thread::sleep`
///
/// Sleeps last at least the requested time; the scheduler may add more.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        thread::sleep(Duration::from_nanos(ns as u64));
    }

    fn delay_us(&mut self, us: u32) {
        thread::sleep(Duration::from_micros(us as u64));
    }
}
