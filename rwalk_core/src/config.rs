//! Run configuration and startup validation.

use crate::error::ConfigError;
use crate::grid::{Cell, Direction};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Largest supported world, in cells (2048x2048). A STATS payload is
/// `8 + 8 * cells` bytes, so the largest world streams 32 MiB frames.
///
/// Clients decoding with the 1 MiB default payload ceiling can follow
/// worlds of up to 131071 cells, e.g. 362x362.
pub const MAX_WORLD_CELLS: u64 = 1 << 22;

/// Highest density accepted for random obstacle generation.
pub const MAX_OBSTACLE_DENSITY: f32 = 0.8;

/// How the obstacle map is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObstacleMode {
    /// Open torus
    #[default]
    None,
    /// Constrained random generation from density + seed
    Random,
    /// `x,y` coordinate list loaded from disk
    File,
}

impl ObstacleMode {
    /// Numeric code persisted in the results header (0/1/2).
    pub fn code(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Random => 1,
            Self::File => 2,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Random),
            2 => Some(Self::File),
            _ => None,
        }
    }
}

impl fmt::Display for ObstacleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Random => "random",
            Self::File => "file",
        };
        f.write_str(name)
    }
}

impl FromStr for ObstacleMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(Self::None),
            "random" | "1" => Ok(Self::Random),
            "file" | "2" => Ok(Self::File),
            other => Err(ConfigError::InvalidObstacleMode(other.to_string())),
        }
    }
}

/// Immutable parameters of one simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// World width in cells
    pub world_w: u32,

    /// World height in cells
    pub world_h: u32,

    /// Pause between steps in INTERACTIVE mode
    pub step_delay_ms: u32,

    /// Number of exhaustive sweeps over all spawn cells
    pub replications: u32,

    /// Per-trial move budget
    pub max_steps: u32,

    /// Probability of moving up (y - 1)
    pub p_up: f32,

    /// Probability of moving down (y + 1)
    pub p_down: f32,

    /// Probability of moving left (x - 1)
    pub p_left: f32,

    /// Probability of moving right (x + 1)
    pub p_right: f32,

    /// Obstacle source
    pub obstacle_mode: ObstacleMode,

    /// Fraction of cells turned into obstacles in random mode
    pub obstacle_density: f32,

    /// Obstacle generator seed (0 = derive from the clock)
    pub obstacle_seed: u32,

    /// Obstacle coordinate file for file mode
    pub obstacle_file: Option<PathBuf>,

    /// Step-direction RNG seed (0 = derive from the clock)
    pub walk_seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            world_w: 101,
            world_h: 101,
            step_delay_ms: 10,
            replications: 5,
            max_steps: 100,
            p_up: 0.25,
            p_down: 0.25,
            p_left: 0.25,
            p_right: 0.25,
            obstacle_mode: ObstacleMode::None,
            obstacle_density: 0.2,
            obstacle_seed: 0,
            obstacle_file: None,
            walk_seed: 0,
        }
    }
}

impl RunConfig {
    /// Loads a config from a JSON file. Missing fields take their defaults.
    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Load {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Checks every startup invariant. Nothing may be opened or allocated
    /// for the run until this passes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world_w <= 2 || self.world_h <= 2 {
            return Err(ConfigError::InvalidDimensions {
                world_w: self.world_w,
                world_h: self.world_h,
            });
        }
        if self.world_w as u64 * self.world_h as u64 > MAX_WORLD_CELLS {
            return Err(ConfigError::WorldTooLarge {
                world_w: self.world_w,
                world_h: self.world_h,
            });
        }
        if self.replications == 0 {
            return Err(ConfigError::ZeroReplications);
        }
        if self.max_steps == 0 || self.max_steps == u32::MAX {
            return Err(ConfigError::InvalidMaxSteps { max: u32::MAX });
        }

        for (name, value) in [
            ("pU", self.p_up),
            ("pD", self.p_down),
            ("pL", self.p_left),
            ("pR", self.p_right),
        ] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidProbability { name, value });
            }
        }
        let sum = self.probability_sum();
        if !(0.999..=1.001).contains(&sum) {
            return Err(ConfigError::ProbabilitySum(sum));
        }

        match self.obstacle_mode {
            ObstacleMode::None => {}
            ObstacleMode::Random => {
                let d = self.obstacle_density;
                if !d.is_finite() || !(0.0..=MAX_OBSTACLE_DENSITY).contains(&d) {
                    return Err(ConfigError::DensityOutOfRange(d));
                }
            }
            ObstacleMode::File => {
                if self.obstacle_file.is_none() {
                    return Err(ConfigError::MissingObstacleFile);
                }
            }
        }

        Ok(())
    }

    pub fn probability_sum(&self) -> f32 {
        self.p_up + self.p_down + self.p_left + self.p_right
    }

    /// Replaces zero seeds with clock-derived ones so the run can be
    /// reproduced from the logged values.
    pub fn resolve_seeds(&mut self) {
        if self.walk_seed == 0 {
            self.walk_seed = time_seed();
        }
        if self.obstacle_seed == 0 {
            let folded = (time_seed() ^ (time_seed() >> 32)) as u32;
            self.obstacle_seed = folded.max(1);
        }
    }

    /// The walkers' target cell.
    pub fn center(&self) -> Cell {
        Cell::new(self.world_w / 2, self.world_h / 2)
    }

    pub fn cell_count(&self) -> usize {
        self.world_w as usize * self.world_h as usize
    }

    /// Direction chosen by a uniform draw in [0, 1).
    pub fn direction_for(&self, r: f32) -> Direction {
        Direction::from_draw(r, self.p_up, self.p_down, self.p_left)
    }

    /// Number of trials one replication runs for a given obstacle count.
    pub fn trials_per_replication(&self, obstacle_count: usize) -> usize {
        self.cell_count().saturating_sub(1 + obstacle_count)
    }
}

fn time_seed() -> u64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9e3779b97f4a7c15);
    nanos.max(1)
}
