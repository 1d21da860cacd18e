//! Step log of the trial currently in progress.
//!
//! Only the active trajectory is kept, so a late joiner replays at most
//! `max_steps + 1` positions instead of the whole run.

use crate::error::HistoryOverflow;

/// One recorded walker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrailPoint {
    pub x: i32,
    pub y: i32,
    pub step_index: u32,
}

/// Fixed-capacity step log, indexed by step number.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    slots: Vec<TrailPoint>,

    /// Number of valid slots (last recorded step + 1), 0 before any trial
    len: usize,
}

impl HistoryBuffer {
    /// Creates a buffer for trials of at most `max_steps` moves.
    pub fn new(max_steps: u32) -> Self {
        Self {
            slots: vec![TrailPoint::default(); max_steps as usize + 1],
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Starts a new trial at the spawn cell (step 0).
    pub fn reset(&mut self, spawn_x: i32, spawn_y: i32) {
        self.slots[0] = TrailPoint {
            x: spawn_x,
            y: spawn_y,
            step_index: 0,
        };
        self.len = 1;
    }

    /// Overwrites the slot for `step_index`.
    pub fn record(&mut self, step_index: u32, x: i32, y: i32) -> Result<(), HistoryOverflow> {
        let idx = step_index as usize;
        if idx >= self.slots.len() {
            return Err(HistoryOverflow {
                step_index,
                capacity: self.slots.len(),
            });
        }
        self.slots[idx] = TrailPoint { x, y, step_index };
        self.len = idx + 1;
        Ok(())
    }

    /// Last recorded step index, if a trial has started.
    pub fn current_step(&self) -> Option<u32> {
        self.len.checked_sub(1).map(|i| i as u32)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy of steps `0..=current_step`.
    pub fn snapshot(&self) -> Vec<TrailPoint> {
        self.slots[..self.len].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_empty() {
        let history = HistoryBuffer::new(10);
        assert_eq!(history.capacity(), 11);
        assert!(history.is_empty());
        assert_eq!(history.current_step(), None);
        assert!(history.snapshot().is_empty());
    }

    #[test]
    fn test_reset_records_spawn() {
        let mut history = HistoryBuffer::new(10);
        history.reset(3, 4);

        assert_eq!(history.current_step(), Some(0));
        assert_eq!(
            history.snapshot(),
            vec![TrailPoint {
                x: 3,
                y: 4,
                step_index: 0
            }]
        );
    }

    #[test]
    fn test_snapshot_covers_current_trial_only() {
        let mut history = HistoryBuffer::new(10);
        history.reset(0, 0);
        for i in 1..=5 {
            history.record(i, i as i32, 0).unwrap();
        }

        // New trial overwrites the old trajectory.
        history.reset(9, 9);
        history.record(1, 8, 9).unwrap();

        let snap = history.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].x, 9);
        assert_eq!(snap[1].step_index, 1);
    }

    #[test]
    fn test_record_is_bounds_checked() {
        let mut history = HistoryBuffer::new(3);
        history.reset(0, 0);

        assert!(history.record(3, 1, 1).is_ok());
        let err = history.record(4, 1, 1).unwrap_err();
        assert_eq!(err.capacity, 4);
        assert_eq!(history.current_step(), Some(3));
    }
}
