//! Direct-space masks, detector masks, ROIs and the inner selection strategy
//!
//! All masks are stored with INCLUDE polarity: `true` marks an element that
//! takes part in the reduction. Callers holding exclusion masks convert once,
//! through the `exclude` constructors, and nowhere else.

use crate::errors::{ReduceError, Result};
use crate::partition::IndexRange;
use ndarray::{ArrayD, ArrayViewD, Slice};
use serde::{Deserialize, Serialize};

/// Boolean mask over the outer (scan position) axis
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectMask {
    include: Vec<bool>,
}

impl DirectMask {
    /// `true` = position is reduced
    #[must_use]
    pub fn include(bits: Vec<bool>) -> Self {
        Self { include: bits }
    }

    /// `true` = position is skipped
    #[must_use]
    pub fn exclude(bits: Vec<bool>) -> Self {
        Self {
            include: bits.into_iter().map(|b| !b).collect(),
        }
    }

    /// Include-polarity mask built from a list of excluded positions
    #[must_use]
    pub fn excluding(len: usize, excluded: impl IntoIterator<Item = usize>) -> Self {
        let mut include = vec![true; len];
        for i in excluded {
            if let Some(bit) = include.get_mut(i) {
                *bit = false;
            }
        }
        Self { include }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.include.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
    }

    #[must_use]
    pub fn is_included(&self, index: usize) -> bool {
        self.include.get(index).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[bool] {
        &self.include
    }

    #[must_use]
    pub fn included_count(&self) -> usize {
        self.include.iter().filter(|&&b| b).count()
    }

    /// Sorted, unique included positions inside `range`
    #[must_use]
    pub fn included_in(&self, range: IndexRange) -> Vec<usize> {
        range
            .as_range()
            .filter(|&i| self.is_included(i))
            .collect()
    }

    pub(crate) fn check_len(&self, n: usize) -> Result<()> {
        if self.include.len() != n {
            return Err(ReduceError::MaskShapeMismatch {
                mask: "direct",
                expected: vec![n],
                found: vec![self.include.len()],
            });
        }
        Ok(())
    }
}

/// Boolean mask over the inner (detector / reciprocal) axes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectorMask {
    include: ArrayD<bool>,
}

impl DetectorMask {
    #[must_use]
    pub fn include(bits: ArrayD<bool>) -> Self {
        Self { include: bits }
    }

    #[must_use]
    pub fn exclude(bits: ArrayD<bool>) -> Self {
        Self {
            include: bits.mapv(|b| !b),
        }
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.include.shape()
    }

    #[must_use]
    pub fn view(&self) -> ArrayViewD<'_, bool> {
        self.include.view()
    }
}

/// Axis-aligned region of interest, one range per inner axis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roi {
    pub axes: Vec<IndexRange>,
}

impl Roi {
    #[must_use]
    pub fn new(axes: Vec<IndexRange>) -> Self {
        Self { axes }
    }

    /// 2-D ROI from `[row_min, row_max, col_min, col_max]`
    #[must_use]
    pub fn from_bounds_2d(bounds: [usize; 4]) -> Self {
        Self {
            axes: vec![
                IndexRange::new(bounds[0], bounds[1]),
                IndexRange::new(bounds[2], bounds[3]),
            ],
        }
    }

    /// The whole inner extent
    #[must_use]
    pub fn full(inner_shape: &[usize]) -> Self {
        Self {
            axes: inner_shape.iter().map(|&len| IndexRange::full(len)).collect(),
        }
    }

    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(IndexRange::len).collect()
    }

    #[must_use]
    pub fn volume(&self) -> usize {
        self.axes.iter().map(IndexRange::len).product()
    }

    /// Checks rank and bounds against the inner shape of an array
    pub fn validate(&self, inner_shape: &[usize]) -> Result<()> {
        if self.axes.len() != inner_shape.len() {
            return Err(ReduceError::config(format!(
                "ROI has {} axes but the array has {} inner dimensions",
                self.axes.len(),
                inner_shape.len()
            )));
        }
        for (axis, (range, &len)) in self.axes.iter().zip(inner_shape).enumerate() {
            if range.is_empty() || range.stop > len {
                return Err(ReduceError::RoiOutOfBounds {
                    axis,
                    start: range.start,
                    stop: range.stop,
                    len,
                });
            }
        }
        Ok(())
    }

    fn slice<'a, A>(&self, view: ArrayViewD<'a, A>) -> ArrayViewD<'a, A> {
        let mut view = view;
        view.slice_each_axis_inplace(|ax| {
            let r = self.axes[ax.axis.index()];
            Slice::from(r.start..r.stop)
        });
        view
    }
}

/// How the inner axes of each row are selected.
///
/// Resolved once per call and shipped to every worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InnerStrategy {
    /// Read a contiguous box and use every element
    BoundingBox(Roi),
    /// Read the mask's bounding box and keep flagged elements (row-major)
    Elementwise { bbox: Roi, keep: Vec<bool> },
}

impl InnerStrategy {
    /// Choose the strategy for an inner shape, optional ROI and optional mask.
    ///
    /// A mask whose selected region fills its own bounding box is reduced to
    /// a plain box read.
    pub fn resolve(
        inner_shape: &[usize],
        roi: Option<&Roi>,
        mask: Option<&DetectorMask>,
    ) -> Result<Self> {
        let roi = match roi {
            Some(roi) => {
                roi.validate(inner_shape)?;
                roi.clone()
            }
            None => Roi::full(inner_shape),
        };

        let Some(mask) = mask else {
            return Ok(InnerStrategy::BoundingBox(roi));
        };
        if mask.shape() != inner_shape {
            return Err(ReduceError::MaskShapeMismatch {
                mask: "detector",
                expected: inner_shape.to_vec(),
                found: mask.shape().to_vec(),
            });
        }

        let ndim = inner_shape.len();
        let windowed = roi.slice(mask.view());
        let mut lo = vec![usize::MAX; ndim];
        let mut hi = vec![0usize; ndim];
        let mut count = 0usize;
        for (idx, &keep) in windowed.indexed_iter() {
            if keep {
                count += 1;
                for d in 0..ndim {
                    lo[d] = lo[d].min(idx[d]);
                    hi[d] = hi[d].max(idx[d] + 1);
                }
            }
        }
        if count == 0 {
            return Err(ReduceError::config(
                "detector mask selects no element inside the ROI",
            ));
        }

        let bbox = Roi::new(
            (0..ndim)
                .map(|d| IndexRange::new(roi.axes[d].start + lo[d], roi.axes[d].start + hi[d]))
                .collect(),
        );
        if count == bbox.volume() {
            log::debug!("detector mask is box-shaped, reading {:?} directly", bbox.shape());
            Ok(InnerStrategy::BoundingBox(bbox))
        } else {
            log::debug!(
                "irregular detector mask: {} of {} elements kept in box {:?}",
                count,
                bbox.volume(),
                bbox.shape()
            );
            let keep = bbox.slice(mask.view()).iter().copied().collect();
            Ok(InnerStrategy::Elementwise { bbox, keep })
        }
    }

    /// The box that is read from disk for every row
    #[must_use]
    pub fn read_box(&self) -> &Roi {
        match self {
            InnerStrategy::BoundingBox(bbox) | InnerStrategy::Elementwise { bbox, .. } => bbox,
        }
    }

    /// Number of inner elements taking part in the reduction
    #[must_use]
    pub fn selected_len(&self) -> usize {
        match self {
            InnerStrategy::BoundingBox(bbox) => bbox.volume(),
            InnerStrategy::Elementwise { keep, .. } => keep.iter().filter(|&&k| k).count(),
        }
    }

    /// Selected elements of one box-shaped frame, in row-major order
    pub fn select<'a>(&'a self, frame: &'a ArrayViewD<'_, f64>) -> Box<dyn Iterator<Item = f64> + 'a> {
        match self {
            InnerStrategy::BoundingBox(_) => Box::new(frame.iter().copied()),
            InnerStrategy::Elementwise { keep, .. } => Box::new(
                frame
                    .iter()
                    .zip(keep.iter())
                    .filter_map(|(&v, &k)| k.then_some(v)),
            ),
        }
    }

    /// Selected elements of an inner-shaped coordinate grid
    pub(crate) fn select_full(&self, grid: ArrayViewD<'_, f64>) -> Vec<f64> {
        let cropped = self.read_box().slice(grid);
        self.select(&cropped).collect()
    }
}
