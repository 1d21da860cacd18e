//! rwalk core - exhaustive random walks on a toroidal grid
//!
//! Pure domain code with no I/O beyond reading and writing small files:
//! 1. **Run configuration**: validated parameters shared by every component
//! 2. **Obstacle maps**: seeded random or file-loaded, always fully reachable
//! 3. **Statistics**: per-spawn-cell success probability and mean path length
//! 4. **History**: the trajectory of the trial in progress, for late joiners
//! 5. **Results files**: end-of-run persistence and resume input

pub mod config;
pub mod error;
pub mod grid;
pub mod history;
pub mod obstacles;
pub mod results;
pub mod stats;

// Re-export key types for convenience
pub use config::{ObstacleMode, RunConfig, MAX_OBSTACLE_DENSITY, MAX_WORLD_CELLS};
pub use error::{ConfigError, HistoryOverflow, ObstacleError, ResultsError};
pub use grid::{Cell, Direction, Grid};
pub use history::{HistoryBuffer, TrailPoint};
pub use obstacles::{ObstacleMap, MAX_GENERATION_ATTEMPTS};
pub use results::{ResultsFile, ResultsHeader, ResultsRow};
pub use stats::{StatsAggregator, StatsSnapshot};
