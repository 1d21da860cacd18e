//! Shared run state read by connection tasks and written by the engine.
//!
//! Everything here is a plain atomic. The engine is the only writer of the
//! counters; any task may flip the mode or clear the running flag.

use rwalk_wire::SimMode;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

/// Engine lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    NotStarted = 0,
    Running = 1,
    Finished = 2,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::NotStarted,
            1 => Self::Running,
            _ => Self::Finished,
        }
    }
}

#[derive(Debug)]
pub struct SimState {
    mode: AtomicU32,
    phase: AtomicU8,
    running: AtomicBool,
    current_replication: AtomicU32,
    total_replications: u32,
}

impl SimState {
    pub fn new(total_replications: u32) -> Self {
        Self {
            mode: AtomicU32::new(SimMode::Interactive.as_u32()),
            phase: AtomicU8::new(Phase::NotStarted as u8),
            running: AtomicBool::new(true),
            current_replication: AtomicU32::new(0),
            total_replications,
        }
    }

    pub fn mode(&self) -> SimMode {
        SimMode::from_u32(self.mode.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub fn set_mode(&self, mode: SimMode) {
        self.mode.store(mode.as_u32(), Ordering::Release);
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Single-winner `NotStarted -> Running` transition. Returns true for
    /// exactly one caller over the lifetime of the state.
    pub fn try_start(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::NotStarted as u8,
                Phase::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub fn mark_finished(&self) {
        self.phase.store(Phase::Finished as u8, Ordering::Release);
    }

    /// Cleared by STOP, a termination signal, or the end of the run.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clears the running flag. Returns whether it was still set.
    pub fn stop(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    pub fn current_replication(&self) -> u32 {
        self.current_replication.load(Ordering::Acquire)
    }

    pub fn set_current_replication(&self, replication: u32) {
        self.current_replication.store(replication, Ordering::Release);
    }

    pub fn total_replications(&self) -> u32 {
        self.total_replications
    }
}
