//! Time source for the engine's INTERACTIVE-mode pause.

use std::time::Duration;

/// Blocks the engine thread between steps.
pub trait Pacer: Send + 'static {
    fn pause(&mut self, delay: Duration);
}

/// Real wall-clock sleep.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSleep;

impl Pacer for ThreadSleep {
    fn pause(&mut self, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

/// Returns immediately, only counting the pauses it was asked for.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPacing {
    pub pauses: u64,
}

impl Pacer for NoPacing {
    fn pause(&mut self, _delay: Duration) {
        self.pauses += 1;
    }
}
