//! Worker-side reduction tasks
//!
//! A task is an explicit record: a job (array, mode, inner strategy) shared
//! by all items, plus one item (a range or a detector tile). Both serialize
//! to JSON, so nothing a worker needs is inherited implicitly.

use super::centroid::Centroid;
use super::operations::{zero_unselected, ReduceMode, SlabReduction};
use crate::errors::{ReduceError, Result};
use crate::mask::{DirectMask, InnerStrategy};
use crate::parallel::WorkItem;
use crate::partition::{IndexRange, WorkUnit};
use crate::source::OnDiskArray;
use ndarray::{Array1, ArrayD, Axis};
use serde::{Deserialize, Serialize};

/// One worker's output for one work item
#[derive(Debug, Clone, PartialEq)]
pub enum PartialResult {
    /// One value per position of the range (excluded positions hold 0.0)
    Positions(Array1<f64>),
    /// Frame summed over the range's positions
    Frame(ArrayD<f64>),
    /// Centroid of one position
    Centroid(Centroid),
}

/// Context shared by every range of a reduction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceJob {
    pub array: OnDiskArray,
    pub mode: ReduceMode,
    pub strategy: InnerStrategy,
}

impl ReduceJob {
    pub fn new(array: OnDiskArray, mode: ReduceMode, strategy: InnerStrategy) -> Self {
        Self {
            array,
            mode,
            strategy,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A range of positions, optionally restricted to an explicit index list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeTask {
    pub range: IndexRange,
    /// Sorted, unique absolute positions inside `range`; `None` = all
    pub rows: Option<Vec<usize>>,
}

impl RangeTask {
    #[must_use]
    pub fn new(range: IndexRange) -> Self {
        Self { range, rows: None }
    }

    /// Only the positions of `range` the mask includes
    #[must_use]
    pub fn masked(range: IndexRange, mask: &DirectMask) -> Self {
        Self {
            range,
            rows: Some(mask.included_in(range)),
        }
    }
}

impl WorkItem for RangeTask {
    fn unit(&self) -> WorkUnit {
        WorkUnit::Range(self.range)
    }
}

/// Reduce one range of positions.
///
/// Reads only the strategy's box for the listed positions, never more than
/// one range at a time.
///
/// # Errors
///
/// Propagates storage errors; no retry is attempted.
pub fn reduce_range(job: &ReduceJob, task: &RangeTask) -> Result<PartialResult> {
    let handle = job.array.open()?;
    let inner = &job.strategy.read_box().axes;

    let slab = match &task.rows {
        Some(rows) => {
            if let Some(&bad) = rows.iter().find(|&&r| !task.range.contains(r)) {
                return Err(ReduceError::config(format!(
                    "position {} lies outside {}",
                    bad, task.range
                )));
            }
            handle.read_rows(rows, inner)?
        }
        None => {
            let mut ranges = Vec::with_capacity(inner.len() + 1);
            ranges.push(task.range);
            ranges.extend_from_slice(inner);
            handle.read_block(&ranges)?
        }
    };
    log::debug!(
        "{} {}: read slab {:?}",
        job.mode.as_str(),
        task.range,
        slab.shape()
    );

    match job.mode {
        ReduceMode::PositionSum => {
            let sums = slab.sum_positions(&job.strategy)?;
            match &task.rows {
                None => Ok(PartialResult::Positions(sums)),
                Some(rows) => {
                    let mut full = Array1::zeros(task.range.len());
                    for (&row, &value) in rows.iter().zip(sums.iter()) {
                        full[row - task.range.start] = value;
                    }
                    Ok(PartialResult::Positions(full))
                }
            }
        }
        ReduceMode::FrameSum => Ok(PartialResult::Frame(slab.sum_frames(&job.strategy)?)),
    }
}

/// Context for a frame sum split over detector tiles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileJob {
    pub array: OnDiskArray,
    pub strategy: InnerStrategy,
    /// Positions contributing to the frame; `None` = all
    pub positions: Option<Vec<usize>>,
}

/// A rectangle over the first two inner axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileTask {
    pub rows: IndexRange,
    pub cols: IndexRange,
}

impl WorkItem for TileTask {
    fn unit(&self) -> WorkUnit {
        WorkUnit::Tile(self.rows, self.cols)
    }
}

/// Sum every contributing position over one detector tile
///
/// # Errors
///
/// Propagates storage errors.
pub fn reduce_tile(job: &TileJob, tile: &TileTask) -> Result<ArrayD<f64>> {
    let handle = job.array.open()?;
    let bbox = job.strategy.read_box();
    if bbox.axes.len() < 2 {
        return Err(ReduceError::config(
            "tiling needs at least two inner dimensions",
        ));
    }

    let mut inner = bbox.axes.clone();
    inner[0] = tile.rows;
    inner[1] = tile.cols;

    let slab = match &job.positions {
        Some(rows) => handle.read_rows(rows, &inner)?,
        None => {
            let mut ranges = Vec::with_capacity(inner.len() + 1);
            ranges.push(IndexRange::full(handle.shape()[0]));
            ranges.extend_from_slice(&inner);
            handle.read_block(&ranges)?
        }
    };

    let mut frame = slab.sum_axis(Axis(0));
    let origin: Vec<usize> = inner
        .iter()
        .zip(&bbox.axes)
        .map(|(r, b)| r.start - b.start)
        .collect();
    zero_unselected(&mut frame, &job.strategy, &origin);
    Ok(frame)
}
