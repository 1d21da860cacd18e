//! Obstacle maps: constrained random generation, file loading and the
//! reachability check both paths share.
//!
//! A map is only ever handed out after it passed validation:
//! - the center cell and (0,0) are free
//! - every free cell is reachable from (0,0) through 4-connected toroidal
//!   moves (breadth-first search)

use crate::error::ObstacleError;
use crate::grid::{Cell, Direction, Grid};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::VecDeque;
use std::path::Path;

/// Retry budget for random generation before giving up.
pub const MAX_GENERATION_ATTEMPTS: u32 = 200;

/// Boolean obstacle grid with the same extents as the world.
#[derive(Debug, Clone, PartialEq)]
pub struct ObstacleMap {
    grid: Grid<bool>,
}

impl ObstacleMap {
    /// A map without any obstacles.
    pub fn empty(world_w: u32, world_h: u32) -> Self {
        Self {
            grid: Grid::new(world_w, world_h),
        }
    }

    /// Generates a random layout where each non-special cell is an obstacle
    /// with probability `density`.
    ///
    /// The same `(world_w, world_h, density, seed)` always yields the same
    /// map. Rejected layouts are regenerated from the continuing RNG stream.
    pub fn generate_random(
        world_w: u32,
        world_h: u32,
        density: f32,
        seed: u32,
    ) -> Result<Self, ObstacleError> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
        let center = center_of(world_w, world_h);
        let mut map = Self::empty(world_w, world_h);

        for _attempt in 0..MAX_GENERATION_ATTEMPTS {
            for y in 0..world_h {
                for x in 0..world_w {
                    let cell = Cell::new(x, y);
                    let blocked = if cell == center || cell == Cell::ORIGIN {
                        false
                    } else {
                        rng.gen::<f32>() < density
                    };
                    map.grid.set(x, y, blocked);
                }
            }

            if map.unreachable_count() == 0 {
                return Ok(map);
            }
        }

        Err(ObstacleError::GenerationExhausted {
            attempts: MAX_GENERATION_ATTEMPTS,
        })
    }

    /// Loads an `x,y`-per-line obstacle list and validates it against the
    /// same invariants as generated maps.
    pub fn load_from_file(path: &Path, world_w: u32, world_h: u32) -> Result<Self, ObstacleError> {
        let text = std::fs::read_to_string(path).map_err(|source| ObstacleError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, world_w, world_h)
    }

    /// Parses obstacle coordinates. Blank lines and `#` comments are skipped.
    pub fn parse(text: &str, world_w: u32, world_h: u32) -> Result<Self, ObstacleError> {
        let mut cells = Vec::new();

        for (i, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let parse_err = || ObstacleError::Parse {
                line: i + 1,
                content: raw.to_string(),
            };
            let (xs, ys) = line.split_once(',').ok_or_else(parse_err)?;
            let x: i64 = xs.trim().parse().map_err(|_| parse_err())?;
            let y: i64 = ys.trim().parse().map_err(|_| parse_err())?;

            if x < 0 || y < 0 || x >= world_w as i64 || y >= world_h as i64 {
                return Err(ObstacleError::OutOfRange {
                    x,
                    y,
                    world_w,
                    world_h,
                });
            }
            cells.push(Cell::new(x as u32, y as u32));
        }

        Self::from_cells(world_w, world_h, cells)
    }

    /// Builds a map from explicit obstacle cells.
    pub fn from_cells(
        world_w: u32,
        world_h: u32,
        cells: impl IntoIterator<Item = Cell>,
    ) -> Result<Self, ObstacleError> {
        let center = center_of(world_w, world_h);
        let mut map = Self::empty(world_w, world_h);

        for cell in cells {
            if cell == center {
                return Err(ObstacleError::BlocksCenter {
                    x: center.x,
                    y: center.y,
                });
            }
            if cell == Cell::ORIGIN {
                return Err(ObstacleError::BlocksOrigin);
            }
            map.grid.set(cell.x, cell.y, true);
        }

        let unreached = map.unreachable_count();
        if unreached > 0 {
            return Err(ObstacleError::Unreachable { unreached });
        }
        Ok(map)
    }

    pub fn width(&self) -> u32 {
        self.grid.width()
    }

    pub fn height(&self) -> u32 {
        self.grid.height()
    }

    #[inline]
    pub fn is_obstacle(&self, cell: Cell) -> bool {
        *self.grid.get(cell.x, cell.y)
    }

    pub fn obstacle_count(&self) -> usize {
        self.grid.as_slice().iter().filter(|&&b| b).count()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacle_count() == 0
    }

    /// Row-major bytes, 1 = obstacle (the OBSTACLES payload body).
    pub fn to_bytes(&self) -> Vec<u8> {
        self.grid.as_slice().iter().map(|&b| b as u8).collect()
    }

    /// True when BFS from (0,0) reaches every free cell.
    pub fn is_fully_reachable(&self) -> bool {
        self.unreachable_count() == 0
    }

    /// Counts free cells that BFS from (0,0) cannot reach.
    fn unreachable_count(&self) -> usize {
        let (w, h) = (self.width(), self.height());
        let free = self.grid.len() - self.obstacle_count();
        if self.is_obstacle(Cell::ORIGIN) {
            return free;
        }

        let mut visited: Grid<bool> = Grid::new(w, h);
        let mut queue = VecDeque::new();
        visited.set(0, 0, true);
        queue.push_back(Cell::ORIGIN);
        let mut reached = 0usize;

        while let Some(cell) = queue.pop_front() {
            reached += 1;
            for dir in Direction::ALL {
                let next = cell.step(dir, w, h);
                if !*visited.get(next.x, next.y) && !self.is_obstacle(next) {
                    visited.set(next.x, next.y, true);
                    queue.push_back(next);
                }
            }
        }

        free - reached
    }
}

fn center_of(world_w: u32, world_h: u32) -> Cell {
    Cell::new(world_w / 2, world_h / 2)
}
