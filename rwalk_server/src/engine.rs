//! Walk engine - runs every replication on its own OS thread.
//!
//! Each replication visits every spawn cell in row-major order and runs one
//! bounded random walk toward the center from it. Only the step directions
//! are random; the draws come from a ChaCha8 stream seeded by `walk_seed`,
//! so a run is reproducible from its logged seed.

use crate::error::ServerError;
use crate::hub::Hub;
use crate::pacing::Pacer;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rwalk_core::{Cell, ResultsFile, ResultsHeader, StatsAggregator, StatsSnapshot};
use rwalk_wire::{SimMode, Step};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

/// What a finished (or stopped) run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Replications of this run that ran to completion
    pub replications_completed: u32,

    /// Completed replications plus any resumed base replications
    pub total_replications: u32,

    /// Trials started, including an interrupted one
    pub trials: u64,

    /// Trials that reached the center
    pub successes: u64,

    /// True when STOP or a signal ended the run before the last replication
    pub stopped_early: bool,

    /// Statistics after the last completed replication
    pub final_stats: Option<StatsSnapshot>,

    /// Where the results were written, if anything was written
    pub results_file: Option<PathBuf>,
}

enum TrialOutcome {
    Reached,
    Exhausted,
    Interrupted,
}

pub struct WalkEngine<P: Pacer> {
    hub: Arc<Hub>,
    pacer: P,
    rng: ChaCha8Rng,
    aggregator: StatsAggregator,

    /// Results destination; `None` disables persistence
    results_path: Option<PathBuf>,

    /// Socket path recorded in the results header
    sock_label: String,

    trials: u64,
    successes: u64,
}

impl<P: Pacer> WalkEngine<P> {
    pub fn new(hub: Arc<Hub>, pacer: P) -> Self {
        let config = hub.config();
        let rng = ChaCha8Rng::seed_from_u64(config.walk_seed);
        let aggregator = StatsAggregator::new(config.world_w, config.world_h);
        Self {
            hub,
            pacer,
            rng,
            aggregator,
            results_path: None,
            sock_label: String::new(),
            trials: 0,
            successes: 0,
        }
    }

    /// Starts from accumulators seeded by a previous run.
    pub fn with_aggregator(mut self, aggregator: StatsAggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    /// Writes the results file to `path` when the run ends.
    pub fn with_results(mut self, path: PathBuf, sock_label: impl Into<String>) -> Self {
        self.results_path = Some(path);
        self.sock_label = sock_label.into();
        self
    }

    /// Runs the engine on a dedicated named thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<Result<RunSummary, ServerError>>> {
        std::thread::Builder::new()
            .name("rwalk-engine".to_string())
            .spawn(move || self.run())
    }

    /// Runs every replication, persists results and publishes the final
    /// SUMMARY mode. The hub is marked finished even if persisting fails.
    pub fn run(mut self) -> Result<RunSummary, ServerError> {
        let total = self.hub.config().replications;
        info!(
            replications = total,
            walk_seed = self.hub.config().walk_seed,
            "Simulation started"
        );

        let mut completed = 0u32;
        let mut final_stats = None;

        for replication in 1..=total {
            if !self.hub.state().is_running() {
                break;
            }
            self.hub.publish_progress(replication);

            if !self.run_replication() {
                info!(replication, "Replication interrupted");
                break;
            }

            completed = replication;
            let snapshot = self.aggregator.recompute_and_snapshot(completed);
            self.hub.publish_stats(&snapshot);
            debug!(replication, trials = self.trials, successes = self.successes, "Replication complete");
            final_stats = Some(snapshot);
        }

        let stopped_early = completed < total;
        let written = self.persist(final_stats.as_ref());

        self.hub.publish_mode(SimMode::Summary);
        self.hub.finish();
        info!(completed, total, stopped_early, "Simulation finished");

        Ok(RunSummary {
            replications_completed: completed,
            total_replications: self.aggregator.base_replications() + completed,
            trials: self.trials,
            successes: self.successes,
            stopped_early,
            final_stats,
            results_file: written?,
        })
    }

    /// One exhaustive sweep. Returns false if it was interrupted.
    fn run_replication(&mut self) -> bool {
        let hub = Arc::clone(&self.hub);
        let config = hub.config();
        let center = config.center();

        for y in 0..config.world_h {
            for x in 0..config.world_w {
                let spawn = Cell::new(x, y);
                if spawn == center || hub.obstacles().is_obstacle(spawn) {
                    continue;
                }
                if !hub.state().is_running() {
                    return false;
                }
                match self.run_trial(spawn) {
                    TrialOutcome::Reached | TrialOutcome::Exhausted => {}
                    TrialOutcome::Interrupted => return false,
                }
            }
        }
        true
    }

    fn run_trial(&mut self, spawn: Cell) -> TrialOutcome {
        let hub = Arc::clone(&self.hub);
        let config = hub.config();
        let (w, h) = (config.world_w, config.world_h);
        let center = config.center();
        let delay = Duration::from_millis(config.step_delay_ms as u64);

        self.trials += 1;
        hub.publish_step(Step::new(spawn.x as i32, spawn.y as i32, 0));

        let mut pos = spawn;
        for step in 1..=config.max_steps {
            if !hub.state().is_running() {
                return TrialOutcome::Interrupted;
            }

            let dir = config.direction_for(self.rng.gen::<f32>());
            let candidate = pos.step(dir, w, h);
            if !hub.obstacles().is_obstacle(candidate) {
                pos = candidate;
            }
            hub.publish_step(Step::new(pos.x as i32, pos.y as i32, step));

            if pos == center {
                self.aggregator.on_trial_success(spawn, step);
                self.successes += 1;
                return TrialOutcome::Reached;
            }
            if hub.state().mode() == SimMode::Interactive {
                self.pacer.pause(delay);
            }
        }
        TrialOutcome::Exhausted
    }

    fn persist(&self, snapshot: Option<&StatsSnapshot>) -> Result<Option<PathBuf>, ServerError> {
        let (Some(path), Some(snapshot)) = (&self.results_path, snapshot) else {
            return Ok(None);
        };

        let header = ResultsHeader::for_run(self.hub.config(), snapshot.replications, &self.sock_label);
        let results = ResultsFile::from_snapshot(header, snapshot);
        match results.write_to_file(path) {
            Ok(()) => {
                info!(path = %path.display(), rows = results.rows.len(), "Results written");
                Ok(Some(path.clone()))
            }
            Err(e) => {
                error!("{e}");
                Err(ServerError::Results(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pacing::NoPacing;
    use bytes::{Bytes, BytesMut};
    use futures::StreamExt;
    use rwalk_core::{ObstacleMap, ObstacleMode, RunConfig};
    use rwalk_wire::{FrameCodec, Message};
    use tokio::sync::mpsc;
    use tokio_util::codec::FramedRead;

    fn config(replications: u32, max_steps: u32) -> RunConfig {
        RunConfig {
            world_w: 5,
            world_h: 5,
            replications,
            max_steps,
            step_delay_ms: 0,
            walk_seed: 7,
            ..Default::default()
        }
    }

    fn hub(config: RunConfig) -> Arc<Hub> {
        let obstacles = ObstacleMap::empty(config.world_w, config.world_h);
        Arc::new(Hub::new(config, obstacles).with_client_queue(1 << 20))
    }

    async fn decode_all(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Message> {
        let mut raw = BytesMut::new();
        while let Ok(frame) = rx.try_recv() {
            raw.extend_from_slice(&frame);
        }
        FramedRead::new(&raw[..], FrameCodec::with_max_payload(1 << 24))
            .map(|m| m.unwrap())
            .collect()
            .await
    }

    /// Pauses until asked `limit` times, then requests STOP. Whatever the
    /// witness client had queued at that moment lands in `before_stop`.
    struct StopAfter {
        hub: Arc<Hub>,
        limit: u32,
        seen: u32,
        witness: mpsc::Receiver<Bytes>,
        before_stop: Arc<std::sync::Mutex<BytesMut>>,
    }

    impl Pacer for StopAfter {
        fn pause(&mut self, _delay: Duration) {
            self.seen += 1;
            if self.seen == self.limit {
                let mut before = self.before_stop.lock().unwrap();
                while let Ok(frame) = self.witness.try_recv() {
                    before.extend_from_slice(&frame);
                }
                self.hub.request_stop();
            }
        }
    }

    async fn steps_in(raw: &[u8]) -> Vec<Step> {
        FramedRead::new(raw, FrameCodec::with_max_payload(1 << 24))
            .filter_map(|m| async move {
                match m.unwrap() {
                    Message::Step(step) => Some(step),
                    _ => None,
                }
            })
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_end_to_end_single_replication() {
        let hub = hub(config(1, 50));
        let mut client = hub.admit();

        let summary = WalkEngine::new(hub.clone(), NoPacing::default()).run().unwrap();
        assert_eq!(summary.replications_completed, 1);
        assert!(!summary.stopped_early);
        assert_eq!(summary.trials, 24);

        let stats = summary.final_stats.unwrap();
        let center = Cell::new(2, 2);
        assert_eq!(stats.prob_at(center), 0.0);
        for y in 0..5 {
            for x in 0..5 {
                let p = stats.prob_at(Cell::new(x, y));
                assert!(p == 0.0 || p == 1.0, "one trial per cell, got {p}");
            }
        }
        let reached = stats.prob_to_center.as_slice().iter().filter(|&&p| p == 1.0).count();
        assert_eq!(reached as u64, summary.successes);

        let messages = decode_all(&mut client.frames).await;
        let spawns = messages
            .iter()
            .filter(|m| matches!(m, Message::Step(s) if s.step_index == 0))
            .count();
        assert_eq!(spawns, 24);
        assert!(messages.iter().any(|m| matches!(
            m,
            Message::Progress(p) if p.current_replication == 1 && p.total_replications == 1
        )));
        assert!(matches!(messages[messages.len() - 2], Message::Stats(_)));
        assert_eq!(messages[messages.len() - 1], Message::Mode(SimMode::Summary));

        assert_eq!(hub.state().phase(), crate::state::Phase::Finished);
        assert!(!hub.state().is_running());
    }

    #[tokio::test]
    async fn test_steps_are_contiguous_per_trial() {
        let hub = hub(config(1, 20));
        let mut client = hub.admit();
        WalkEngine::new(hub.clone(), NoPacing::default()).run().unwrap();

        let mut expected_next = 0u32;
        let mut prev: Option<Step> = None;
        for msg in decode_all(&mut client.frames).await {
            let Message::Step(step) = msg else { continue };
            if step.step_index == 0 {
                expected_next = 0;
            } else if let Some(p) = prev {
                // Moves are to a 4-neighbour on the torus.
                let dx = (step.x - p.x).rem_euclid(5);
                let dy = (step.y - p.y).rem_euclid(5);
                let moved = matches!((dx, dy), (0, 1) | (0, 4) | (1, 0) | (4, 0));
                assert!(moved, "{p:?} -> {step:?}");
            }
            assert_eq!(step.step_index, expected_next);
            assert!(step.step_index <= 20);
            expected_next += 1;
            prev = Some(step);
        }
    }

    #[test]
    fn test_same_seed_same_statistics() {
        let a = WalkEngine::new(hub(config(3, 30)), NoPacing::default()).run().unwrap();
        let b = WalkEngine::new(hub(config(3, 30)), NoPacing::default()).run().unwrap();
        assert_eq!(a.final_stats, b.final_stats);
        assert_eq!(a.successes, b.successes);
    }

    #[tokio::test]
    async fn test_obstacles_are_never_entered() {
        let config = RunConfig {
            obstacle_mode: ObstacleMode::Random,
            obstacle_density: 0.2,
            obstacle_seed: 11,
            ..config(2, 40)
        };
        let obstacles = ObstacleMap::generate_random(5, 5, 0.2, 11).unwrap();
        let blocked = obstacles.obstacle_count() as u64;
        let hub = Arc::new(Hub::new(config, obstacles.clone()).with_client_queue(1 << 20));
        let mut client = hub.admit();

        let summary = WalkEngine::new(hub.clone(), NoPacing::default()).run().unwrap();
        assert_eq!(summary.trials, 2 * (24 - blocked));

        for msg in decode_all(&mut client.frames).await {
            if let Message::Step(s) = msg {
                assert!(!obstacles.is_obstacle(Cell::new(s.x as u32, s.y as u32)));
            }
        }
    }

    #[test]
    fn test_only_interactive_mode_pauses() {
        let hub = hub(config(1, 10));
        let mut engine = WalkEngine::new(hub.clone(), NoPacing::default());

        // (0,0) is 4 moves from the center of a 5x5 torus, so at least 3
        // moves pause before the trial can end.
        engine.run_trial(Cell::ORIGIN);
        let paced = engine.pacer.pauses;
        assert!(paced >= 3, "{paced} pauses");

        hub.publish_mode(SimMode::Summary);
        engine.run_trial(Cell::ORIGIN);
        assert_eq!(engine.pacer.pauses, paced);
    }

    #[tokio::test]
    async fn test_stop_halts_step_broadcast() {
        let hub = hub(config(3, 50));
        let mut client = hub.admit();
        let witness = hub.admit();
        let before_stop = Arc::new(std::sync::Mutex::new(BytesMut::new()));
        let pacer = StopAfter {
            hub: hub.clone(),
            limit: 5,
            seen: 0,
            witness: witness.frames,
            before_stop: before_stop.clone(),
        };

        let summary = WalkEngine::new(hub.clone(), pacer).run().unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.replications_completed, 0);
        assert!(summary.final_stats.is_none());

        let raw = before_stop.lock().unwrap().clone();
        let before = steps_in(&raw).await;
        let last = *before.last().unwrap();
        assert!(last.step_index > 0, "stop fires in a pause, after a move");

        let mut all = BytesMut::new();
        while let Ok(frame) = client.frames.try_recv() {
            all.extend_from_slice(&frame);
        }
        let all = steps_in(&all).await;
        assert_eq!(&all[..before.len()], &before[..]);

        // The stop lands in the pause that follows a broadcast, so the
        // engine checks the flag before its next move.
        let after = &all[before.len()..];
        assert!(after.is_empty(), "{after:?} after stop at {last:?}");
        assert_eq!(hub.active_clients(), 2);
    }

    #[test]
    fn test_results_written_for_completed_replications() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replication_results.csv");

        let summary = WalkEngine::new(hub(config(2, 40)), NoPacing::default())
            .with_results(path.clone(), "/tmp/rwalk.sock")
            .run()
            .unwrap();
        assert_eq!(summary.results_file.as_deref(), Some(path.as_path()));

        let results = ResultsFile::load(&path).unwrap();
        assert_eq!(results.header.total_replications, 2);
        assert_eq!(results.header.sock_path, "/tmp/rwalk.sock");
        assert_eq!(results.rows.len(), summary
            .final_stats
            .unwrap()
            .prob_to_center
            .as_slice()
            .iter()
            .filter(|&&p| p > 0.0)
            .count());
    }

    #[test]
    fn test_nothing_written_when_stopped_before_first_replication() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let hub = hub(config(2, 40));
        hub.request_stop();

        let summary = WalkEngine::new(hub, NoPacing::default())
            .with_results(path.clone(), "sock")
            .run()
            .unwrap();
        assert_eq!(summary.trials, 0);
        assert!(summary.results_file.is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_resumed_run_reports_combined_total() {
        let header = ResultsHeader::for_run(&config(4, 40), 4, "s");
        let previous = ResultsFile {
            header,
            rows: vec![rwalk_core::ResultsRow {
                x: 0,
                y: 0,
                prob: 0.5,
                avg_steps: 10.0,
            }],
        };
        let resumed = StatsAggregator::from_results(5, 5, &previous);

        let summary = WalkEngine::new(hub(config(1, 40)), NoPacing::default())
            .with_aggregator(resumed)
            .run()
            .unwrap();
        assert_eq!(summary.total_replications, 5);

        let stats = summary.final_stats.unwrap();
        assert_eq!(stats.replications, 5);
        let p = stats.prob_at(Cell::ORIGIN);
        assert!(p == 2.0 / 5.0 || p == 3.0 / 5.0, "{p}");
    }
}
