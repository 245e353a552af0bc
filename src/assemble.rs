//! Merging ordered partial results into the final array
//!
//! Partials are combined purely by position: the n-th partial belongs to the
//! n-th submitted work item. When a direct-space mask was applied, excluded
//! positions are flagged invalid instead of silently reading as zero.

use crate::errors::{ReduceError, Result};
use crate::mask::{DirectMask, Roi};
use crate::partition::IndexRange;
use crate::reduction::{Centroid, PartialResult, TileTask};
use ndarray::{concatenate, Array1, Array2, ArrayD, ArrayView1, ArrayView2, Axis, Ix1, Ix2, IxDyn, Slice};

/// Final output of a reduction, optionally masked along the outer axis
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionResult {
    data: ArrayD<f64>,
    valid: Option<Array1<bool>>,
}

impl ReductionResult {
    /// Dense result, every entry valid
    #[must_use]
    pub fn dense(data: ArrayD<f64>) -> Self {
        Self { data, valid: None }
    }

    /// Result whose first axis is flagged by `valid`
    pub fn masked(data: ArrayD<f64>, valid: Array1<bool>) -> Result<Self> {
        if data.ndim() == 0 || data.shape()[0] != valid.len() {
            return Err(ReduceError::MaskShapeMismatch {
                mask: "direct",
                expected: data.shape().iter().take(1).copied().collect(),
                found: vec![valid.len()],
            });
        }
        Ok(Self {
            data,
            valid: Some(valid),
        })
    }

    #[must_use]
    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> ArrayD<f64> {
        self.data
    }

    #[must_use]
    pub fn is_masked(&self) -> bool {
        self.valid.is_some()
    }

    #[must_use]
    pub fn valid(&self) -> Option<&Array1<bool>> {
        self.valid.as_ref()
    }

    /// Whether outer position `index` was measured
    #[must_use]
    pub fn is_valid(&self, index: usize) -> bool {
        match &self.valid {
            Some(valid) => valid.get(index).copied().unwrap_or(false),
            None => self.data.ndim() > 0 && index < self.data.shape()[0],
        }
    }

    #[must_use]
    pub fn valid_count(&self) -> usize {
        match &self.valid {
            Some(valid) => valid.iter().filter(|&&v| v).count(),
            None => self.data.shape().first().copied().unwrap_or(1),
        }
    }

    #[must_use]
    pub fn invalid_count(&self) -> usize {
        self.valid
            .as_ref()
            .map_or(0, |valid| valid.iter().filter(|&&v| !v).count())
    }

    /// Copy of the data with invalid positions replaced by `fill`
    #[must_use]
    pub fn filled(&self, fill: f64) -> ArrayD<f64> {
        let mut out = self.data.clone();
        if let Some(valid) = &self.valid {
            for (mut row, &ok) in out.axis_iter_mut(Axis(0)).zip(valid.iter()) {
                if !ok {
                    row.fill(fill);
                }
            }
        }
        out
    }

    /// Only the valid positions, in order
    #[must_use]
    pub fn compressed(&self) -> ArrayD<f64> {
        match &self.valid {
            None => self.data.clone(),
            Some(valid) => {
                let keep: Vec<usize> = valid
                    .iter()
                    .enumerate()
                    .filter_map(|(i, &ok)| ok.then_some(i))
                    .collect();
                self.data.select(Axis(0), &keep)
            }
        }
    }

    /// View as one value per position
    pub fn positions(&self) -> Result<ArrayView1<'_, f64>> {
        Ok(self.data.view().into_dimensionality::<Ix1>()?)
    }

    /// View as one centroid row per position
    pub fn centroids(&self) -> Result<ArrayView2<'_, f64>> {
        Ok(self.data.view().into_dimensionality::<Ix2>()?)
    }
}

/// Combine partials in submission order.
///
/// Position sums are concatenated, frames are added, centroids are stacked.
/// With `mask`, position sums and centroids are flagged invalid where the
/// mask excludes a position.
pub fn assemble(parts: Vec<PartialResult>, mask: Option<&DirectMask>) -> Result<ReductionResult> {
    match parts.first() {
        None => Err(ReduceError::config("no partial results to assemble")),
        Some(PartialResult::Positions(_)) => {
            let rows = parts
                .into_iter()
                .map(|p| match p {
                    PartialResult::Positions(rows) => Ok(rows),
                    other => Err(mixed(&other)),
                })
                .collect::<Result<Vec<_>>>()?;
            let views: Vec<_> = rows.iter().map(Array1::view).collect();
            let data = concatenate(Axis(0), &views)?.into_dyn();
            with_mask(data, mask)
        }
        Some(PartialResult::Frame(_)) => {
            let mut total: Option<ArrayD<f64>> = None;
            for part in parts {
                let frame = match part {
                    PartialResult::Frame(frame) => frame,
                    other => return Err(mixed(&other)),
                };
                total = Some(match total.take() {
                    None => frame,
                    Some(mut acc) => {
                        if acc.shape() != frame.shape() {
                            return Err(ReduceError::shape(format!(
                                "partial frames disagree in shape: {:?} vs {:?}",
                                acc.shape(),
                                frame.shape()
                            )));
                        }
                        acc += &frame;
                        acc
                    }
                });
            }
            Ok(ReductionResult::dense(
                total.unwrap_or_else(|| ArrayD::zeros(IxDyn(&[0]))),
            ))
        }
        Some(PartialResult::Centroid(first)) => {
            let with_std = first.std.is_some();
            let centroids = parts
                .into_iter()
                .map(|p| match p {
                    PartialResult::Centroid(c) => Ok(c),
                    other => Err(mixed(&other)),
                })
                .collect::<Result<Vec<_>>>()?;
            assemble_centroids(&centroids, with_std, mask)
        }
    }
}

/// Stack centroids into an `(N, 3)` or `(N, 6)` array.
///
/// With `mask`, `centroids` holds one entry per included position, in order;
/// excluded rows are NaN and flagged invalid.
pub fn assemble_centroids(
    centroids: &[Centroid],
    with_std: bool,
    mask: Option<&DirectMask>,
) -> Result<ReductionResult> {
    let width = Centroid::width(with_std);
    let n = mask.map_or(centroids.len(), DirectMask::len);
    let mut data = Array2::from_elem((n, width), f64::NAN);

    let rows: Vec<usize> = match mask {
        Some(mask) => (0..n).filter(|&i| mask.is_included(i)).collect(),
        None => (0..n).collect(),
    };
    let mut placed = 0;
    for (&row, centroid) in rows.iter().zip(centroids) {
        let values = centroid.to_vec();
        if values.len() != width {
            return Err(ReduceError::shape(format!(
                "centroid with {} values in a {}-wide result",
                values.len(),
                width
            )));
        }
        data.row_mut(row).assign(&Array1::from(values));
        placed += 1;
    }
    if placed != centroids.len() || mask.map_or(false, |m| m.included_count() != placed) {
        return Err(ReduceError::shape(format!(
            "{} centroids do not match the {} included positions",
            centroids.len(),
            mask.map_or(n, DirectMask::included_count)
        )));
    }

    with_mask(data.into_dyn(), mask)
}

/// Place detector tiles into one frame shaped like `bbox`
pub fn assemble_tiles(bbox: &Roi, tiles: &[TileTask], parts: Vec<ArrayD<f64>>) -> Result<ArrayD<f64>> {
    if tiles.len() != parts.len() {
        return Err(ReduceError::shape(format!(
            "{} tiles but {} partial frames",
            tiles.len(),
            parts.len()
        )));
    }
    if bbox.axes.len() < 2 {
        return Err(ReduceError::shape(format!(
            "tiles need a box with at least two axes, got {}",
            bbox.axes.len()
        )));
    }
    let (box_rows, box_cols) = (bbox.axes[0], bbox.axes[1]);
    let mut frame = ArrayD::zeros(IxDyn(&bbox.shape()));
    for (tile, part) in tiles.iter().zip(parts) {
        let inside =
            |r: IndexRange, b: IndexRange| b.start <= r.start && r.start <= r.stop && r.stop <= b.stop;
        if !inside(tile.rows, box_rows) || !inside(tile.cols, box_cols) {
            return Err(ReduceError::shape(format!(
                "tile rows {} cols {} lies outside box rows {} cols {}",
                tile.rows, tile.cols, box_rows, box_cols
            )));
        }
        let origin = [box_rows.start, box_cols.start];
        let mut window = frame.slice_each_axis_mut(|ax| match ax.axis.index() {
            0 => Slice::from(tile.rows.start - origin[0]..tile.rows.stop - origin[0]),
            1 => Slice::from(tile.cols.start - origin[1]..tile.cols.stop - origin[1]),
            _ => Slice::from(..),
        });
        if window.shape() != part.shape() {
            return Err(ReduceError::shape(format!(
                "tile {:?} does not fit window {:?}",
                part.shape(),
                window.shape()
            )));
        }
        window.assign(&part);
    }
    Ok(frame)
}

fn with_mask(data: ArrayD<f64>, mask: Option<&DirectMask>) -> Result<ReductionResult> {
    match mask {
        None => Ok(ReductionResult::dense(data)),
        Some(mask) => ReductionResult::masked(data, Array1::from(mask.as_slice().to_vec())),
    }
}

fn mixed(part: &PartialResult) -> ReduceError {
    ReduceError::config(format!("mixed partial result kinds, unexpected {:?}", part))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_positions_concatenate_in_order() {
        let parts = vec![
            PartialResult::Positions(array![1.0, 2.0]),
            PartialResult::Positions(array![3.0]),
        ];
        let result = assemble(parts, None).unwrap();
        assert!(!result.is_masked());
        assert_eq!(result.positions().unwrap().to_vec(), vec![1.0, 2.0, 3.0]);
        assert_eq!(result.valid_count(), 3);
    }

    #[test]
    fn test_masked_positions_keep_invalid_flags() {
        let mask = DirectMask::excluding(3, [1]);
        let parts = vec![PartialResult::Positions(array![4.0, 0.0, 6.0])];
        let result = assemble(parts, Some(&mask)).unwrap();
        assert_eq!(result.invalid_count(), 1);
        assert!(!result.is_valid(1));
        assert!(result.filled(f64::NAN)[[1]].is_nan());
        assert_eq!(result.compressed().iter().copied().collect::<Vec<_>>(), vec![4.0, 6.0]);
    }

    #[test]
    fn test_frames_are_summed() {
        let parts = vec![
            PartialResult::Frame(ArrayD::from_elem(IxDyn(&[2, 2]), 1.0)),
            PartialResult::Frame(ArrayD::from_elem(IxDyn(&[2, 2]), 2.5)),
        ];
        let frame = assemble(parts, None).unwrap().into_data();
        assert!(frame.iter().all(|&v| v == 3.5));
    }

    #[test]
    fn test_mixed_partials_are_rejected() {
        let parts = vec![
            PartialResult::Positions(array![1.0]),
            PartialResult::Frame(ArrayD::zeros(IxDyn(&[1]))),
        ];
        assert!(assemble(parts, None).is_err());
        assert!(assemble(Vec::new(), None).is_err());
    }

    #[test]
    fn test_centroids_scatter_around_excluded_rows() {
        let mask = DirectMask::excluding(3, [0]);
        let c = |v: f64| Centroid {
            com: [v; 3],
            std: None,
        };
        let result = assemble_centroids(&[c(1.0), c(2.0)], false, Some(&mask)).unwrap();
        let view = result.centroids().unwrap();
        assert_eq!(view.shape(), &[3, 3]);
        assert!(view[[0, 0]].is_nan());
        assert_eq!(view[[2, 1]], 2.0);
        assert!(assemble_centroids(&[c(1.0)], false, Some(&mask)).is_err());
    }

    #[test]
    fn test_tiles_are_placed_by_position() {
        let bbox = Roi::new(vec![IndexRange::new(2, 4), IndexRange::new(0, 3)]);
        let tiles = [
            TileTask {
                rows: IndexRange::new(2, 4),
                cols: IndexRange::new(0, 1),
            },
            TileTask {
                rows: IndexRange::new(2, 4),
                cols: IndexRange::new(1, 3),
            },
        ];
        let parts = vec![
            ArrayD::from_elem(IxDyn(&[2, 1]), 1.0),
            ArrayD::from_elem(IxDyn(&[2, 2]), 2.0),
        ];
        let frame = assemble_tiles(&bbox, &tiles, parts).unwrap();
        assert_eq!(frame.shape(), &[2, 3]);
        assert_eq!(frame[[1, 0]], 1.0);
        assert_eq!(frame[[0, 2]], 2.0);
    }

    #[test]
    fn test_tiles_outside_the_box_are_rejected() {
        let bbox = Roi::new(vec![IndexRange::new(2, 4), IndexRange::new(0, 3)]);
        let above = TileTask {
            rows: IndexRange::new(0, 2),
            cols: IndexRange::new(0, 3),
        };
        let err = assemble_tiles(&bbox, &[above], vec![ArrayD::zeros(IxDyn(&[2, 3]))]).unwrap_err();
        assert!(matches!(err, ReduceError::InvalidShape { .. }));

        let flat = Roi::new(vec![IndexRange::new(0, 3)]);
        assert!(assemble_tiles(&flat, &[], Vec::new()).is_err());
    }

    #[test]
    fn test_centroid_partials_are_scattered_by_mask() {
        let mask = DirectMask::excluding(4, [1, 2]);
        let c = |v: f64| Centroid {
            com: [v; 3],
            std: Some([0.5; 3]),
        };
        let parts = vec![PartialResult::Centroid(c(1.0)), PartialResult::Centroid(c(4.0))];
        let result = assemble(parts, Some(&mask)).unwrap();
        let view = result.centroids().unwrap();
        assert_eq!(view.shape(), &[4, 6]);
        assert_eq!(view[[0, 0]], 1.0);
        assert_eq!(view[[3, 2]], 4.0);
        assert_eq!(view[[3, 5]], 0.5);
        assert!(view.row(1).iter().all(|v| v.is_nan()));
        assert_eq!(result.invalid_count(), 2);

        let unmasked = assemble(vec![PartialResult::Centroid(c(2.0))], None).unwrap();
        assert_eq!(unmasked.centroids().unwrap().shape(), &[1, 6]);
    }
}
