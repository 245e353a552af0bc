//! Core reduction operations on an in-memory slab
//!
//! A slab is what one worker reads for one work item: shape
//! `(rows, ...read box)`, where the read box comes from the [`InnerStrategy`].

use crate::errors::{ReduceError, Result};
use crate::mask::InnerStrategy;
use ndarray::{Array1, ArrayD, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Supported reductions over the outer/inner split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceMode {
    /// One scalar per position: sum over the selected inner elements
    PositionSum,
    /// One inner-shaped frame: sum over positions
    FrameSum,
}

impl ReduceMode {
    /// Get the string representation of the mode
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PositionSum => "position sum",
            Self::FrameSum => "frame sum",
        }
    }
}

/// Reductions a slab supports
pub trait SlabReduction {
    /// Sum the selected inner elements of every row
    ///
    /// # Errors
    ///
    /// Returns an error if the slab has no outer axis.
    fn sum_positions(&self, strategy: &InnerStrategy) -> Result<Array1<f64>>;

    /// Sum all rows into one frame shaped like the read box; elements the
    /// strategy does not select are zero
    ///
    /// # Errors
    ///
    /// Returns an error if the slab has no outer axis.
    fn sum_frames(&self, strategy: &InnerStrategy) -> Result<ArrayD<f64>>;
}

impl SlabReduction for ArrayD<f64> {
    fn sum_positions(&self, strategy: &InnerStrategy) -> Result<Array1<f64>> {
        if self.ndim() < 2 {
            return Err(ReduceError::shape(format!(
                "slab needs an outer axis and inner axes, got {} dimensions",
                self.ndim()
            )));
        }
        // each row is summed sequentially so the result does not depend on
        // how positions were split between workers
        let sums: Vec<f64> = self
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| strategy.select(&row).sum::<f64>())
            .collect();
        Ok(Array1::from(sums))
    }

    fn sum_frames(&self, strategy: &InnerStrategy) -> Result<ArrayD<f64>> {
        if self.ndim() < 2 {
            return Err(ReduceError::shape(format!(
                "slab needs an outer axis and inner axes, got {} dimensions",
                self.ndim()
            )));
        }
        let mut frame = self.sum_axis(Axis(0));
        let origin = vec![0; frame.ndim()];
        zero_unselected(&mut frame, strategy, &origin);
        Ok(frame)
    }
}

/// Zero the elements of `frame` the strategy drops.
///
/// `origin` is the offset of `frame` inside the strategy's read box.
pub(crate) fn zero_unselected(frame: &mut ArrayD<f64>, strategy: &InnerStrategy, origin: &[usize]) {
    let InnerStrategy::Elementwise { bbox, keep } = strategy else {
        return;
    };
    let box_shape = bbox.shape();
    for (idx, value) in frame.indexed_iter_mut() {
        let mut flat = 0;
        for (d, &len) in box_shape.iter().enumerate() {
            flat = flat * len + origin[d] + idx[d];
        }
        if !keep.get(flat).copied().unwrap_or(false) {
            *value = 0.0;
        }
    }
}
