//! Cross-replication statistics.
//!
//! Two integer accumulators are indexed by spawn cell:
//! - `success_count`: trials from that cell that reached the center
//! - `step_sum`: total moves those successful trials took
//!
//! The float grids handed to clients are always derived from the
//! accumulators and a replication count, never accumulated on their own.

use crate::grid::{Cell, Grid};
use crate::results::ResultsFile;

/// Per-spawn-cell success and step accumulators.
#[derive(Debug, Clone)]
pub struct StatsAggregator {
    success_count: Grid<u64>,
    step_sum: Grid<u64>,

    /// Replications already folded in from a resumed results file
    base_replications: u32,
}

/// Derived probability and average-steps grids for one point in the run.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    /// Denominator used for the probabilities (base + completed)
    pub replications: u32,

    /// `success_count / replications`
    pub prob_to_center: Grid<f32>,

    /// `step_sum / success_count`, or 0 for cells without a success
    pub avg_steps_to_center: Grid<f32>,
}

impl StatsAggregator {
    pub fn new(world_w: u32, world_h: u32) -> Self {
        Self {
            success_count: Grid::new(world_w, world_h),
            step_sum: Grid::new(world_w, world_h),
            base_replications: 0,
        }
    }

    /// Seeds the accumulators from a previous run's results so new
    /// replications merge with the old ones in proportion to their counts.
    ///
    /// Rows outside the world are ignored; the caller checks extents.
    pub fn from_results(world_w: u32, world_h: u32, results: &ResultsFile) -> Self {
        let mut agg = Self::new(world_w, world_h);
        let base = results.header.total_replications;
        agg.base_replications = base;

        for row in &results.rows {
            if row.x >= world_w || row.y >= world_h {
                continue;
            }
            let success = (row.prob as f64 * base as f64).round().max(0.0) as u64;
            let steps = (row.avg_steps as f64 * success as f64).round().max(0.0) as u64;
            agg.success_count.set(row.x, row.y, success);
            agg.step_sum.set(row.x, row.y, steps);
        }
        agg
    }

    /// Records a trial from `spawn` that reached the center after
    /// `steps_taken` moves.
    pub fn on_trial_success(&mut self, spawn: Cell, steps_taken: u32) {
        *self.success_count.get_mut(spawn.x, spawn.y) += 1;
        *self.step_sum.get_mut(spawn.x, spawn.y) += steps_taken as u64;
    }

    /// Derives both float grids for `replications_completed` replications of
    /// this run (plus any resumed base replications).
    pub fn recompute_and_snapshot(&self, replications_completed: u32) -> StatsSnapshot {
        let w = self.success_count.width();
        let h = self.success_count.height();
        let total = self.base_replications.saturating_add(replications_completed);

        let mut prob = Grid::new(w, h);
        let mut avg = Grid::new(w, h);

        for ((cell, &success), &steps) in self
            .success_count
            .iter_cells()
            .zip(self.step_sum.as_slice())
        {
            if total > 0 {
                prob.set(cell.x, cell.y, success as f32 / total as f32);
            }
            if success > 0 {
                avg.set(cell.x, cell.y, steps as f32 / success as f32);
            }
        }

        StatsSnapshot {
            replications: total,
            prob_to_center: prob,
            avg_steps_to_center: avg,
        }
    }

    pub fn success_count(&self, cell: Cell) -> u64 {
        *self.success_count.get(cell.x, cell.y)
    }

    pub fn step_sum(&self, cell: Cell) -> u64 {
        *self.step_sum.get(cell.x, cell.y)
    }

    pub fn base_replications(&self) -> u32 {
        self.base_replications
    }
}

impl StatsSnapshot {
    pub fn world_w(&self) -> u32 {
        self.prob_to_center.width()
    }

    pub fn world_h(&self) -> u32 {
        self.prob_to_center.height()
    }

    pub fn prob_at(&self, cell: Cell) -> f32 {
        *self.prob_to_center.get(cell.x, cell.y)
    }

    pub fn avg_steps_at(&self, cell: Cell) -> f32 {
        *self.avg_steps_to_center.get(cell.x, cell.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObstacleMode;
    use crate::results::{ResultsHeader, ResultsRow};
    use proptest::prelude::*;

    #[test]
    fn test_success_accumulates() {
        let mut agg = StatsAggregator::new(5, 5);
        let spawn = Cell::new(1, 3);

        agg.on_trial_success(spawn, 4);
        agg.on_trial_success(spawn, 10);

        assert_eq!(agg.success_count(spawn), 2);
        assert_eq!(agg.step_sum(spawn), 14);

        let snap = agg.recompute_and_snapshot(4);
        assert_eq!(snap.prob_at(spawn), 0.5);
        assert_eq!(snap.avg_steps_at(spawn), 7.0);
    }

    #[test]
    fn test_failed_cells_stay_zero() {
        let agg = StatsAggregator::new(4, 4);
        let snap = agg.recompute_and_snapshot(3);

        assert!(snap.prob_to_center.as_slice().iter().all(|&p| p == 0.0));
        assert!(snap.avg_steps_to_center.as_slice().iter().all(|&a| a == 0.0));
    }

    #[test]
    fn test_zero_replications_yield_zero_grid() {
        let mut agg = StatsAggregator::new(3, 3);
        agg.on_trial_success(Cell::new(0, 0), 2);

        let snap = agg.recompute_and_snapshot(0);
        assert_eq!(snap.prob_at(Cell::new(0, 0)), 0.0);
        assert_eq!(snap.avg_steps_at(Cell::new(0, 0)), 2.0);
    }

    #[test]
    fn test_resume_merges_proportionally() {
        let results = ResultsFile {
            header: ResultsHeader {
                world_w: 3,
                world_h: 3,
                p_up: 0.25,
                p_down: 0.25,
                p_left: 0.25,
                p_right: 0.25,
                max_steps: 50,
                total_replications: 4,
                obstacle_mode: ObstacleMode::None,
                obstacle_density: 0.0,
                obstacle_seed: 0,
                obstacle_file: None,
                sock_path: "/tmp/rwalk.sock".to_string(),
            },
            rows: vec![ResultsRow {
                x: 0,
                y: 0,
                prob: 0.5,
                avg_steps: 6.0,
            }],
        };

        let mut agg = StatsAggregator::from_results(3, 3, &results);
        assert_eq!(agg.base_replications(), 4);
        assert_eq!(agg.success_count(Cell::ORIGIN), 2);
        assert_eq!(agg.step_sum(Cell::ORIGIN), 12);

        // One new replication, one more success in 3 steps.
        agg.on_trial_success(Cell::ORIGIN, 3);
        let snap = agg.recompute_and_snapshot(1);

        assert_eq!(snap.replications, 5);
        assert_eq!(snap.prob_at(Cell::ORIGIN), 3.0 / 5.0);
        assert_eq!(snap.avg_steps_at(Cell::ORIGIN), 5.0);
    }

    proptest! {
        #[test]
        fn prop_probabilities_are_exact_ratios(
            successes in proptest::collection::vec((0u32..4, 0u32..4, 1u32..100), 0..40),
            extra_reps in 0u32..5,
        ) {
            let mut agg = StatsAggregator::new(4, 4);
            for &(x, y, steps) in &successes {
                agg.on_trial_success(Cell::new(x, y), steps);
            }
            // At most one success per cell per replication.
            let max_per_cell = (0..16)
                .map(|i| agg.success_count(Cell::new(i % 4, i / 4)))
                .max()
                .unwrap_or(0) as u32;
            let reps = max_per_cell.max(1) + extra_reps;

            let snap = agg.recompute_and_snapshot(reps);
            for y in 0..4 {
                for x in 0..4 {
                    let cell = Cell::new(x, y);
                    let p = snap.prob_at(cell);
                    prop_assert!((0.0..=1.0).contains(&p));
                    prop_assert_eq!(p, agg.success_count(cell) as f32 / reps as f32);
                }
            }
        }

        #[test]
        fn prop_recompute_is_idempotent(
            successes in proptest::collection::vec((0u32..5, 0u32..5, 0u32..60), 0..30),
            reps in 1u32..50,
        ) {
            let mut agg = StatsAggregator::new(5, 5);
            for &(x, y, steps) in &successes {
                agg.on_trial_success(Cell::new(x, y), steps);
            }
            let first = agg.recompute_and_snapshot(reps);
            let second = agg.recompute_and_snapshot(reps);
            prop_assert_eq!(first, second);
        }
    }
}
