//! Top-level reductions: validate, partition, dispatch, assemble
//!
//! Every entry point takes the array by reference and one [`ReductionConfig`].
//! Validation and strategy resolution happen here, in the calling thread,
//! before any worker is started.

use crate::assemble::{assemble, assemble_centroids, assemble_tiles, ReductionResult};
use crate::config::ReductionConfig;
use crate::errors::{ReduceError, Result};
use crate::mask::{InnerStrategy, Roi};
use crate::parallel::WorkerPool;
use crate::partition::{partition, partition_inner, IndexRange};
use crate::reduction::{
    reduce_centroid, reduce_range, reduce_tile, Centroid, CentroidJob, CoordinateGrids,
    PartialResult, ReduceJob, ReduceMode, RangeTask, TileJob, TileTask,
};
use crate::source::OnDiskArray;
use ndarray::{ArrayD, IxDyn, Slice};
use std::time::Instant;

/// Shape check and strategy resolution shared by all entry points
fn prepare(array: &OnDiskArray, config: &ReductionConfig) -> Result<(Vec<usize>, InnerStrategy)> {
    let shape = array.shape()?;
    let strategy = config.resolve(&shape)?;
    log::debug!(
        "{}:{} shape {:?}, reading box {:?} ({} of {} inner elements selected)",
        array.path.display(),
        array.key,
        shape,
        strategy.read_box().shape(),
        strategy.selected_len(),
        shape[1..].iter().product::<usize>()
    );
    Ok((shape, strategy))
}

/// One task per outer range, restricted to included positions when masked
fn range_tasks(n: usize, config: &ReductionConfig) -> Vec<RangeTask> {
    partition(n, config.work_item_count())
        .into_iter()
        .map(|range| match &config.direct_mask {
            Some(mask) => RangeTask::masked(range, mask),
            None => RangeTask::new(range),
        })
        .collect()
}

/// Sum the selected inner elements of every outer position.
///
/// Returns a length-`N` vector. With a direct mask, excluded positions are
/// not read and are flagged invalid in the result.
pub fn sum_positions(array: &OnDiskArray, config: &ReductionConfig) -> Result<ReductionResult> {
    let start = Instant::now();
    let (shape, strategy) = prepare(array, config)?;
    let tasks = range_tasks(shape[0], config);
    let job = ReduceJob::new(array.clone(), ReduceMode::PositionSum, strategy);

    let pool = WorkerPool::new(&config.parallel)?;
    let parts = pool.run(ReduceMode::PositionSum.as_str(), &job, &tasks, reduce_range)?;
    let result = assemble(parts, config.direct_mask.as_ref())?;

    log::info!(
        "✅ position sum of {} positions done in {:.2?}",
        shape[0],
        start.elapsed()
    );
    Ok(result)
}

/// Sum over the outer axis into one frame.
///
/// The frame covers the ROI (the whole inner extent without one); elements
/// dropped by the detector mask are zero. With a direct mask only the
/// included positions contribute.
pub fn sum_frames(array: &OnDiskArray, config: &ReductionConfig) -> Result<ArrayD<f64>> {
    let start = Instant::now();
    let (shape, strategy) = prepare(array, config)?;
    let tasks = range_tasks(shape[0], config);
    let frame_box = output_box(&shape[1..], config);
    let job = ReduceJob::new(array.clone(), ReduceMode::FrameSum, strategy);

    let pool = WorkerPool::new(&config.parallel)?;
    let parts = pool.run(ReduceMode::FrameSum.as_str(), &job, &tasks, reduce_range)?;
    let frame = assemble(parts, None)?.into_data();
    let frame = embed(frame, job.strategy.read_box(), &frame_box)?;

    log::info!(
        "✅ frame sum over {} positions done in {:.2?}",
        shape[0],
        start.elapsed()
    );
    Ok(frame)
}

/// Frame sum parallelized over detector tiles instead of positions.
///
/// The two leading inner axes of the read box are each split into
/// `work_item_count` spans; every tile reads all contributing positions.
/// Gives the same frame as [`sum_frames`].
pub fn sum_frames_tiled(array: &OnDiskArray, config: &ReductionConfig) -> Result<ArrayD<f64>> {
    let start = Instant::now();
    let (shape, strategy) = prepare(array, config)?;
    if shape.len() < 3 {
        return Err(ReduceError::shape(format!(
            "tiling needs two inner dimensions, got shape {:?}",
            shape
        )));
    }

    let bbox = strategy.read_box().clone();
    let (rows, cols) = partition_inner(&shape[1..], config.work_item_count(), Some(&bbox.axes));
    let tiles: Vec<TileTask> = rows
        .iter()
        .flat_map(|&r| cols.iter().map(move |&c| TileTask { rows: r, cols: c }))
        .collect();

    let job = TileJob {
        array: array.clone(),
        strategy,
        positions: config
            .direct_mask
            .as_ref()
            .map(|mask| mask.included_in(IndexRange::full(shape[0]))),
    };

    let pool = WorkerPool::new(&config.parallel)?;
    let parts = pool.run("tiled frame sum", &job, &tiles, reduce_tile)?;
    let frame = assemble_tiles(&bbox, &tiles, parts)?;
    let frame = embed(frame, &bbox, &output_box(&shape[1..], config))?;

    log::info!(
        "✅ tiled frame sum ({} tiles) done in {:.2?}",
        tiles.len(),
        start.elapsed()
    );
    Ok(frame)
}

/// Intensity-weighted centroid of every outer position.
///
/// Returns an `(N, 3)` array, or `(N, 6)` with `with_std`. Positions excluded
/// by the direct mask are not read; their rows are NaN and flagged invalid.
pub fn centroids(
    array: &OnDiskArray,
    grids: &CoordinateGrids,
    config: &ReductionConfig,
) -> Result<ReductionResult> {
    let start = Instant::now();
    let (shape, strategy) = prepare(array, config)?;
    let n = shape[0];
    let job = CentroidJob::new(array.clone(), strategy, grids, &shape[1..], config)?;

    let indices: Vec<usize> = match &config.direct_mask {
        Some(mask) => mask.included_in(IndexRange::full(n)),
        None => (0..n).collect(),
    };

    let pool = WorkerPool::new(&config.parallel)?;
    let parts = pool.run("centroids", &job, &indices, |job, index| {
        reduce_centroid(job, index).map(PartialResult::Centroid)
    })?;
    let mask = config.direct_mask.as_ref();
    let result = if parts.is_empty() {
        assemble_centroids(&[], config.with_std, mask)?
    } else {
        assemble(parts, mask)?
    };

    log::info!(
        "✅ {} centroids done in {:.2?}",
        result.valid_count(),
        start.elapsed()
    );
    Ok(result)
}

/// Centroid of the single position `index`, computed in the calling thread
pub fn centroid_at(
    array: &OnDiskArray,
    index: usize,
    grids: &CoordinateGrids,
    config: &ReductionConfig,
) -> Result<Centroid> {
    let (shape, strategy) = prepare(array, config)?;
    if index >= shape[0] {
        return Err(ReduceError::config(format!(
            "position {} is out of range for {} positions",
            index, shape[0]
        )));
    }
    let job = CentroidJob::new(array.clone(), strategy, grids, &shape[1..], config)?;
    reduce_centroid(&job, &index)
}

/// The region a frame result covers
fn output_box(inner_shape: &[usize], config: &ReductionConfig) -> Roi {
    config
        .roi
        .clone()
        .unwrap_or_else(|| Roi::full(inner_shape))
}

/// Place a frame read over `bbox` into a zero frame covering `target`
fn embed(frame: ArrayD<f64>, bbox: &Roi, target: &Roi) -> Result<ArrayD<f64>> {
    if bbox == target {
        return Ok(frame);
    }
    let mut out = ArrayD::zeros(IxDyn(&target.shape()));
    let mut window = out.slice_each_axis_mut(|ax| {
        let d = ax.axis.index();
        let offset = target.axes[d].start;
        Slice::from(bbox.axes[d].start - offset..bbox.axes[d].stop - offset)
    });
    if window.shape() != frame.shape() {
        return Err(ReduceError::shape(format!(
            "frame {:?} does not fit its read box {:?}",
            frame.shape(),
            window.shape()
        )));
    }
    window.assign(&frame);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_places_box_inside_target() {
        let target = Roi::full(&[4, 4]);
        let bbox = Roi::from_bounds_2d([1, 3, 2, 4]);
        let frame = ArrayD::from_elem(IxDyn(&[2, 2]), 5.0);
        let out = embed(frame, &bbox, &target).unwrap();
        assert_eq!(out.shape(), &[4, 4]);
        assert_eq!(out[[1, 2]], 5.0);
        assert_eq!(out[[2, 3]], 5.0);
        assert_eq!(out[[0, 0]], 0.0);
        assert_eq!(out.sum(), 20.0);
    }

    #[test]
    fn test_range_tasks_follow_work_items() {
        let config = ReductionConfig::new().with_workers(2).with_work_items(4);
        let tasks = range_tasks(10, &config);
        assert_eq!(tasks.len(), 4);
        assert_eq!(tasks[3].range, IndexRange::new(6, 10));
        assert!(tasks.iter().all(|t| t.rows.is_none()));
    }
}
