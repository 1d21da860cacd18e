//! Message types carried by rwalk frames.

use std::fmt;
use std::str::FromStr;

/// Identifier stored in the `type` field of every frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MsgType {
    Welcome = 1,
    Step = 2,
    Mode = 3,
    Progress = 4,
    Stop = 5,
    Error = 6,
    Stats = 7,
    Obstacles = 8,
}

impl MsgType {
    /// Parses a raw header value.
    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Welcome),
            2 => Some(Self::Step),
            3 => Some(Self::Mode),
            4 => Some(Self::Progress),
            5 => Some(Self::Stop),
            6 => Some(Self::Error),
            7 => Some(Self::Stats),
            8 => Some(Self::Obstacles),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Global pacing mode of the simulation.
///
/// INTERACTIVE sleeps `step_delay_ms` between steps so a viewer can follow
/// the walker; SUMMARY runs unthrottled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SimMode {
    #[default]
    Interactive,
    Summary,
}

impl SimMode {
    /// Wire value: 1 = INTERACTIVE, 2 = SUMMARY.
    pub fn as_u32(self) -> u32 {
        match self {
            Self::Interactive => 1,
            Self::Summary => 2,
        }
    }

    pub fn from_u32(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Interactive),
            2 => Some(Self::Summary),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Interactive => "interactive",
            Self::Summary => "summary",
        }
    }
}

impl fmt::Display for SimMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SimMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interactive" | "1" => Ok(Self::Interactive),
            "summary" | "2" => Ok(Self::Summary),
            other => Err(format!("Unknown mode: {other} (expected interactive or summary)")),
        }
    }
}

/// First frame a client receives: the full run configuration plus the
/// current mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Welcome {
    pub world_w: u32,
    pub world_h: u32,
    pub mode: SimMode,
    pub replications: u32,
    pub max_steps: u32,
    pub step_delay_ms: u32,
    pub p_up: f32,
    pub p_down: f32,
    pub p_left: f32,
    pub p_right: f32,
}

impl Welcome {
    /// Packed payload size in bytes.
    pub const LEN: usize = 6 * 4 + 4 * 4;
}

/// One walker position within the active trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Step {
    pub x: i32,
    pub y: i32,
    /// 0 is the spawn cell, n is the position after the n-th move
    pub step_index: u32,
}

impl Step {
    pub const LEN: usize = 12;

    pub fn new(x: i32, y: i32, step_index: u32) -> Self {
        Self { x, y, step_index }
    }
}

/// Replication counter (1-based; 0 before the first replication starts).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current_replication: u32,
    pub total_replications: u32,
}

impl Progress {
    pub const LEN: usize = 8;
}

/// Derived statistics grids, row-major with `index = y * world_w + x`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsGrid {
    pub world_w: u32,
    pub world_h: u32,
    /// Probability of reaching the center from each spawn cell
    pub prob: Vec<f32>,
    /// Average steps to the center over successful trials (0 when none)
    pub avg_steps: Vec<f32>,
}

impl StatsGrid {
    pub fn cell_count(&self) -> usize {
        self.world_w as usize * self.world_h as usize
    }
}

/// Obstacle layout, row-major with one byte per cell (1 = obstacle).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObstacleGrid {
    pub world_w: u32,
    pub world_h: u32,
    pub cells: Vec<u8>,
}

/// A decoded protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Welcome(Welcome),
    Step(Step),
    Mode(SimMode),
    Progress(Progress),
    /// Client → server shutdown request (no payload)
    Stop,
    /// Human-readable reason sent before the server drops a peer
    Error(String),
    Stats(StatsGrid),
    Obstacles(ObstacleGrid),
}

impl Message {
    pub fn msg_type(&self) -> MsgType {
        match self {
            Self::Welcome(_) => MsgType::Welcome,
            Self::Step(_) => MsgType::Step,
            Self::Mode(_) => MsgType::Mode,
            Self::Progress(_) => MsgType::Progress,
            Self::Stop => MsgType::Stop,
            Self::Error(_) => MsgType::Error,
            Self::Stats(_) => MsgType::Stats,
            Self::Obstacles(_) => MsgType::Obstacles,
        }
    }

    /// Number of payload bytes this message occupies on the wire.
    pub fn payload_len(&self) -> usize {
        match self {
            Self::Welcome(_) => Welcome::LEN,
            Self::Step(_) => Step::LEN,
            Self::Mode(_) => 4,
            Self::Progress(_) => Progress::LEN,
            Self::Stop => 0,
            Self::Error(text) => text.len(),
            Self::Stats(grid) => 8 + 4 * (grid.prob.len() + grid.avg_steps.len()),
            Self::Obstacles(grid) => 8 + grid.cells.len(),
        }
    }
}
