//! Error types for the rwalk domain core.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid run configuration. Always fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("World extents must both be > 2 (got {world_w}x{world_h})")]
    InvalidDimensions { world_w: u32, world_h: u32 },

    #[error("World of {world_w}x{world_h} cells is too large")]
    WorldTooLarge { world_w: u32, world_h: u32 },

    #[error("replications must be > 0")]
    ZeroReplications,

    #[error("max_steps must be > 0 and below {max}")]
    InvalidMaxSteps { max: u32 },

    #[error("Probability {name} = {value} is not in [0, 1]")]
    InvalidProbability { name: &'static str, value: f32 },

    #[error("Movement probabilities must sum to 1 (±0.001), got {0}")]
    ProbabilitySum(f32),

    #[error("Obstacle density {0} is not in [0, 0.8]")]
    DensityOutOfRange(f32),

    #[error("Unknown obstacle mode: {0} (expected none, random or file)")]
    InvalidObstacleMode(String),

    #[error("Obstacle mode 'file' requires an obstacle file path")]
    MissingObstacleFile,

    #[error("Failed to read config {path}: {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("Resume file is for a {file_w}x{file_h} world, run is {world_w}x{world_h}")]
    ResumeMismatch {
        file_w: u32,
        file_h: u32,
        world_w: u32,
        world_h: u32,
    },
}

/// Obstacle map could not be built or failed validation.
#[derive(Debug, Error)]
pub enum ObstacleError {
    #[error("Failed to read obstacle file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Obstacle file line {line}: expected 'x,y', got {content:?}")]
    Parse { line: usize, content: String },

    #[error("Obstacle ({x},{y}) is outside the {world_w}x{world_h} world")]
    OutOfRange {
        x: i64,
        y: i64,
        world_w: u32,
        world_h: u32,
    },

    #[error("Center cell ({x},{y}) cannot be an obstacle")]
    BlocksCenter { x: u32, y: u32 },

    #[error("Origin cell (0,0) cannot be an obstacle")]
    BlocksOrigin,

    #[error("{unreached} free cell(s) are unreachable from (0,0)")]
    Unreachable { unreached: usize },

    #[error("No fully reachable obstacle layout found after {attempts} attempts")]
    GenerationExhausted { attempts: u32 },
}

/// Results file could not be written or parsed.
#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("Results file I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Results file is empty")]
    Empty,

    #[error("Results file line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

impl ResultsError {
    pub(crate) fn parse(line: usize, reason: impl Into<String>) -> Self {
        Self::Parse {
            line,
            reason: reason.into(),
        }
    }
}

/// Write outside the history buffer's fixed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Step {step_index} exceeds history capacity {capacity}")]
pub struct HistoryOverflow {
    pub step_index: u32,
    pub capacity: usize,
}
