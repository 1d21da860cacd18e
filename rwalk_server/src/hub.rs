//! Shared server context: run parameters, live state, history and clients.
//!
//! The engine publishes through the hub and connection tasks admit clients
//! through it. Every publish updates shared state and broadcasts while
//! holding the history lock, and a new client's catch-up is built and the
//! client registered under that same lock. A late joiner therefore sees
//! every step, progress, mode and stats update exactly once.

use crate::registry::{ClientId, ClientRegistry};
use crate::state::{Phase, SimState};
use bytes::{Bytes, BytesMut};
use rwalk_core::{HistoryBuffer, ObstacleMap, ObstacleMode, RunConfig, StatsSnapshot};
use rwalk_wire::{
    encode_message, encode_to_bytes, Message, ObstacleGrid, Progress, SimMode, StatsGrid, Step,
    Welcome,
};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tokio::sync::futures::Notified;
use tracing::{debug, info, warn};

/// Default per-client outbound queue length, in frames.
pub const DEFAULT_CLIENT_QUEUE: usize = 4096;

/// Result of admitting one connection.
#[derive(Debug)]
pub struct Admission {
    pub id: ClientId,

    /// Frames for this client, starting with its catch-up burst
    pub frames: mpsc::Receiver<Bytes>,

    /// True for the single admission that must start the engine
    pub start_engine: bool,
}

pub struct Hub {
    config: RunConfig,
    obstacles: ObstacleMap,
    state: SimState,
    history: Mutex<HistoryBuffer>,
    registry: ClientRegistry,

    /// Most recent STATS frame, replayed to late joiners
    last_stats: Mutex<Option<Bytes>>,

    /// OBSTACLES frame, encoded once when an obstacle mode is active
    obstacle_frame: Option<Bytes>,

    client_queue: usize,
    shutdown: Notify,
}

impl Hub {
    pub fn new(config: RunConfig, obstacles: ObstacleMap) -> Self {
        let obstacle_frame = (config.obstacle_mode != ObstacleMode::None).then(|| {
            encode_to_bytes(&Message::Obstacles(ObstacleGrid {
                world_w: obstacles.width(),
                world_h: obstacles.height(),
                cells: obstacles.to_bytes(),
            }))
        });

        Self {
            state: SimState::new(config.replications),
            history: Mutex::new(HistoryBuffer::new(config.max_steps)),
            registry: ClientRegistry::new(),
            last_stats: Mutex::new(None),
            obstacle_frame,
            client_queue: DEFAULT_CLIENT_QUEUE,
            shutdown: Notify::new(),
            config,
            obstacles,
        }
    }

    /// Sets the per-client queue length (at least 1).
    pub fn with_client_queue(mut self, frames: usize) -> Self {
        self.client_queue = frames.max(1);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn obstacles(&self) -> &ObstacleMap {
        &self.obstacles
    }

    pub fn state(&self) -> &SimState {
        &self.state
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn active_clients(&self) -> usize {
        self.registry.active_count()
    }

    fn history(&self) -> MutexGuard<'_, HistoryBuffer> {
        self.history.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn last_stats(&self) -> MutexGuard<'_, Option<Bytes>> {
        self.last_stats.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn welcome(&self) -> Welcome {
        let c = &self.config;
        Welcome {
            world_w: c.world_w,
            world_h: c.world_h,
            mode: self.state.mode(),
            replications: c.replications,
            max_steps: c.max_steps,
            step_delay_ms: c.step_delay_ms,
            p_up: c.p_up,
            p_down: c.p_down,
            p_left: c.p_left,
            p_right: c.p_right,
        }
    }

    fn progress(&self) -> Progress {
        Progress {
            current_replication: self.state.current_replication(),
            total_replications: self.state.total_replications(),
        }
    }

    /// Registers a new client and queues its catch-up burst:
    /// WELCOME, PROGRESS, the current trial's steps, OBSTACLES (if any) and
    /// the latest STATS (if any).
    ///
    /// A client arriving to an empty server after the engine has started is
    /// switched straight to SUMMARY and gets no step replay.
    pub fn admit(&self) -> Admission {
        let id = self.registry.allocate_id();
        let (tx, rx) = mpsc::channel(self.client_queue);

        let history = self.history();

        let late_to_empty = self.registry.is_empty() && self.state.phase() != Phase::NotStarted;
        if late_to_empty && self.state.mode() != SimMode::Summary {
            info!(%id, "Late joiner to an idle run, switching to SUMMARY");
            self.state.set_mode(SimMode::Summary);
        }

        let mut burst = BytesMut::new();
        encode_message(&Message::Welcome(self.welcome()), &mut burst);
        encode_message(&Message::Progress(self.progress()), &mut burst);

        let replayed = if late_to_empty {
            0
        } else {
            let steps = history.snapshot();
            for point in &steps {
                let step = Step::new(point.x, point.y, point.step_index);
                encode_message(&Message::Step(step), &mut burst);
            }
            steps.len()
        };

        if let Some(frame) = &self.obstacle_frame {
            burst.extend_from_slice(frame);
        }
        if let Some(frame) = self.last_stats().as_ref() {
            burst.extend_from_slice(frame);
        }

        // Fresh queue with capacity >= 1 cannot be full.
        let _ = tx.try_send(burst.freeze());
        self.registry.register(id, tx);
        drop(history);

        let start_engine = self.state.try_start();
        debug!(%id, replayed, start_engine, "Client admitted");

        Admission {
            id,
            frames: rx,
            start_engine,
        }
    }

    pub fn release(&self, id: ClientId) {
        if self.registry.unregister(id) {
            info!(%id, active = self.active_clients(), "Client disconnected");
        }
        self.shutdown.notify_waiters();
    }

    /// Records a step in the trial history and broadcasts it.
    /// Step 0 starts a new trial.
    pub fn publish_step(&self, step: Step) {
        let mut history = self.history();
        if step.step_index == 0 {
            history.reset(step.x, step.y);
        } else if let Err(e) = history.record(step.step_index, step.x, step.y) {
            warn!("{e}");
        }
        self.registry.broadcast(&Message::Step(step));
    }

    pub fn publish_progress(&self, current_replication: u32) {
        let _history = self.history();
        self.state.set_current_replication(current_replication);
        self.registry.broadcast(&Message::Progress(self.progress()));
    }

    /// Broadcasts derived statistics and keeps the frame for late joiners.
    pub fn publish_stats(&self, snapshot: &StatsSnapshot) {
        let frame = encode_to_bytes(&Message::Stats(StatsGrid {
            world_w: snapshot.world_w(),
            world_h: snapshot.world_h(),
            prob: snapshot.prob_to_center.as_slice().to_vec(),
            avg_steps: snapshot.avg_steps_to_center.as_slice().to_vec(),
        }));
        let _history = self.history();
        *self.last_stats() = Some(frame.clone());
        self.registry.broadcast_frame(frame);
    }

    /// Changes global pacing and tells every client.
    pub fn publish_mode(&self, mode: SimMode) {
        let _history = self.history();
        self.state.set_mode(mode);
        self.registry.broadcast(&Message::Mode(mode));
    }

    /// Clears the running flag and wakes the shutdown waiter.
    pub fn request_stop(&self) {
        if self.state.stop() {
            info!("Stop requested");
        }
        self.shutdown.notify_waiters();
    }

    /// Called by the engine once it has published its final state.
    pub fn finish(&self) {
        self.state.mark_finished();
        self.state.stop();
        self.shutdown.notify_waiters();
    }

    /// Future completing on the next stop, finish or client release.
    /// Call `enable()` on it before checking the condition it guards.
    pub fn notified(&self) -> Notified<'_> {
        self.shutdown.notified()
    }
}
