//! Flat row-major grids and toroidal movement.

use serde::{Deserialize, Serialize};

/// A cell coordinate on the torus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub x: u32,
    pub y: u32,
}

impl Cell {
    pub const ORIGIN: Cell = Cell { x: 0, y: 0 };

    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Moves one cell in `dir`, wrapping modulo the world extents.
    pub fn step(self, dir: Direction, world_w: u32, world_h: u32) -> Cell {
        match dir {
            Direction::Up => Cell::new(self.x, (self.y + world_h - 1) % world_h),
            Direction::Down => Cell::new(self.x, (self.y + 1) % world_h),
            Direction::Left => Cell::new((self.x + world_w - 1) % world_w, self.y),
            Direction::Right => Cell::new((self.x + 1) % world_w, self.y),
        }
    }
}

/// One of the four axis-aligned moves. There is no diagonal option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// y - 1
    Up,
    /// y + 1
    Down,
    /// x - 1
    Left,
    /// x + 1
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Maps a uniform draw `r` in [0, 1) onto a direction using cumulative
    /// thresholds `p_up`, `p_up + p_down`, `p_up + p_down + p_left`.
    pub fn from_draw(r: f32, p_up: f32, p_down: f32, p_left: f32) -> Direction {
        if r < p_up {
            Direction::Up
        } else if r < p_up + p_down {
            Direction::Down
        } else if r < p_up + p_down + p_left {
            Direction::Left
        } else {
            Direction::Right
        }
    }
}

/// A `width * height` grid stored in one flat buffer, addressed by
/// `y * width + x`.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    width: u32,
    height: u32,
    cells: Vec<T>,
}

impl<T: Clone + Default> Grid<T> {
    /// Creates a grid filled with `T::default()`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            cells: vec![T::default(); width as usize * height as usize],
        }
    }

    /// Resets every cell to `T::default()`.
    pub fn clear(&mut self) {
        self.cells.fill(T::default());
    }
}

impl<T> Grid<T> {
    /// Wraps an existing row-major buffer. Returns `None` on a size mismatch.
    pub fn from_vec(width: u32, height: u32, cells: Vec<T>) -> Option<Self> {
        if cells.len() != width as usize * height as usize {
            return None;
        }
        Some(Self {
            width,
            height,
            cells,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        debug_assert!(x < self.width && y < self.height);
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> &T {
        &self.cells[self.index(x, y)]
    }

    #[inline]
    pub fn get_mut(&mut self, x: u32, y: u32) -> &mut T {
        let idx = self.index(x, y);
        &mut self.cells[idx]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let idx = self.index(x, y);
        self.cells[idx] = value;
    }

    pub fn as_slice(&self) -> &[T] {
        &self.cells
    }

    pub fn into_vec(self) -> Vec<T> {
        self.cells
    }

    /// Iterates cells in row-major order.
    pub fn iter_cells(&self) -> impl Iterator<Item = (Cell, &T)> + '_ {
        let width = self.width.max(1);
        self.cells
            .iter()
            .enumerate()
            .map(move |(i, v)| (Cell::new(i as u32 % width, i as u32 / width), v))
    }
}
