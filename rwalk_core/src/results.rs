//! Results file: the one piece of state that outlives a run.
//!
//! ```text
//! world_w,world_h,pU,pD,pL,pR,max_steps,total_replications,obstacle_mode,obstacle_density,obstacle_seed,obstacle_file_or_dash,sock_path
//! x,y,prob,avg_steps        (one row per cell with prob > 0)
//! ```
//!
//! Floats are written with six decimals. The same file can seed the
//! statistics of a later run (see [`crate::StatsAggregator::from_results`]).

use crate::config::{ObstacleMode, RunConfig};
use crate::error::ResultsError;
use crate::grid::Cell;
use crate::stats::StatsSnapshot;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// First line of a results file.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsHeader {
    pub world_w: u32,
    pub world_h: u32,
    pub p_up: f32,
    pub p_down: f32,
    pub p_left: f32,
    pub p_right: f32,
    pub max_steps: u32,
    pub total_replications: u32,
    pub obstacle_mode: ObstacleMode,
    pub obstacle_density: f32,
    pub obstacle_seed: u32,
    /// `None` is persisted as `-`
    pub obstacle_file: Option<PathBuf>,
    pub sock_path: String,
}

/// One spawn cell with a nonzero probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultsRow {
    pub x: u32,
    pub y: u32,
    pub prob: f32,
    pub avg_steps: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultsFile {
    pub header: ResultsHeader,
    pub rows: Vec<ResultsRow>,
}

impl ResultsHeader {
    pub fn for_run(config: &RunConfig, total_replications: u32, sock_path: &str) -> Self {
        Self {
            world_w: config.world_w,
            world_h: config.world_h,
            p_up: config.p_up,
            p_down: config.p_down,
            p_left: config.p_left,
            p_right: config.p_right,
            max_steps: config.max_steps,
            total_replications,
            obstacle_mode: config.obstacle_mode,
            obstacle_density: config.obstacle_density,
            obstacle_seed: config.obstacle_seed,
            obstacle_file: config.obstacle_file.clone(),
            sock_path: sock_path.to_string(),
        }
    }

    fn write_line<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let file = self
            .obstacle_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            out,
            "{},{},{:.6},{:.6},{:.6},{:.6},{},{},{},{:.6},{},{},{}",
            self.world_w,
            self.world_h,
            self.p_up,
            self.p_down,
            self.p_left,
            self.p_right,
            self.max_steps,
            self.total_replications,
            self.obstacle_mode.code(),
            self.obstacle_density,
            self.obstacle_seed,
            file,
            self.sock_path,
        )
    }

    /// Parses a header line. Older files that stop after `max_steps`,
    /// `total_replications` or a trailing socket path are accepted too; the
    /// missing fields take neutral values.
    fn parse_line(line: &str) -> Result<Self, ResultsError> {
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        if fields.len() < 7 {
            return Err(ResultsError::parse(
                1,
                format!("header has {} fields, expected at least 7", fields.len()),
            ));
        }

        let mut header = Self {
            world_w: field(&fields, 0, 1)?,
            world_h: field(&fields, 1, 1)?,
            p_up: field(&fields, 2, 1)?,
            p_down: field(&fields, 3, 1)?,
            p_left: field(&fields, 4, 1)?,
            p_right: field(&fields, 5, 1)?,
            max_steps: field(&fields, 6, 1)?,
            total_replications: 0,
            obstacle_mode: ObstacleMode::None,
            obstacle_density: 0.0,
            obstacle_seed: 0,
            obstacle_file: None,
            sock_path: String::new(),
        };
        if header.world_w == 0 || header.world_h == 0 {
            return Err(ResultsError::parse(1, "world extents must be positive"));
        }

        if fields.len() >= 8 {
            header.total_replications = field(&fields, 7, 1)?;
        }

        if fields.len() >= 13 {
            let code: u32 = field(&fields, 8, 1)?;
            header.obstacle_mode = ObstacleMode::from_code(code)
                .ok_or_else(|| ResultsError::parse(1, format!("unknown obstacle mode {code}")))?;
            header.obstacle_density = field(&fields, 9, 1)?;
            header.obstacle_seed = field(&fields, 10, 1)?;
            header.obstacle_file = match fields[11].trim() {
                "-" | "" => None,
                path => Some(PathBuf::from(path)),
            };
            header.sock_path = fields[12..].join(",");
        } else if fields.len() >= 9 {
            header.sock_path = fields[8..].join(",");
        }

        Ok(header)
    }
}

impl ResultsRow {
    fn parse_line(line: &str, line_no: usize) -> Result<Self, ResultsError> {
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        if fields.len() != 4 {
            return Err(ResultsError::parse(
                line_no,
                format!("expected 4 fields, got {}", fields.len()),
            ));
        }
        Ok(Self {
            x: field(&fields, 0, line_no)?,
            y: field(&fields, 1, line_no)?,
            prob: field(&fields, 2, line_no)?,
            avg_steps: field(&fields, 3, line_no)?,
        })
    }
}

impl ResultsFile {
    /// Collects every cell of `snapshot` with a nonzero probability.
    pub fn from_snapshot(header: ResultsHeader, snapshot: &StatsSnapshot) -> Self {
        let rows = snapshot
            .prob_to_center
            .iter_cells()
            .filter(|(_, prob)| **prob > 0.0)
            .map(|(cell, &prob)| ResultsRow {
                x: cell.x,
                y: cell.y,
                prob,
                avg_steps: snapshot.avg_steps_at(cell),
            })
            .collect();
        Self { header, rows }
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        self.header.write_line(out)?;
        for row in &self.rows {
            writeln!(out, "{},{},{:.6},{:.6}", row.x, row.y, row.prob, row.avg_steps)?;
        }
        out.flush()
    }

    /// Creates (or truncates) `path` and writes the whole file.
    pub fn write_to_file(&self, path: &Path) -> Result<(), ResultsError> {
        let io_err = |source| ResultsError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = std::fs::File::create(path).map_err(io_err)?;
        let mut out = BufWriter::new(file);
        self.write_to(&mut out).map_err(io_err)
    }

    /// Parses a results file. Blank lines are skipped.
    pub fn parse(text: &str) -> Result<Self, ResultsError> {
        let mut lines = text.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());
        let (_, first) = lines.next().ok_or(ResultsError::Empty)?;
        let header = ResultsHeader::parse_line(first)?;

        let mut rows = Vec::new();
        for (i, line) in lines {
            let row = ResultsRow::parse_line(line, i + 1)?;
            if row.x >= header.world_w || row.y >= header.world_h {
                return Err(ResultsError::parse(
                    i + 1,
                    format!("cell ({},{}) outside the world", row.x, row.y),
                ));
            }
            rows.push(row);
        }

        Ok(Self { header, rows })
    }

    pub fn load(path: &Path) -> Result<Self, ResultsError> {
        let text = std::fs::read_to_string(path).map_err(|source| ResultsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Row for `cell`, if it was persisted.
    pub fn row_at(&self, cell: Cell) -> Option<&ResultsRow> {
        self.rows.iter().find(|r| r.x == cell.x && r.y == cell.y)
    }
}

fn field<T: std::str::FromStr>(fields: &[&str], idx: usize, line: usize) -> Result<T, ResultsError> {
    let raw = fields[idx].trim();
    raw.parse()
        .map_err(|_| ResultsError::parse(line, format!("field {} is not valid: {raw:?}", idx + 1)))
}
