//! Per-call reduction configuration
//!
//! Everything a reduction depends on travels in one [`ReductionConfig`] value;
//! there is no ambient or module-level state.

use crate::errors::{ReduceError, Result};
use crate::mask::{DetectorMask, DirectMask, InnerStrategy, Roi};
use crate::parallel::ParallelConfig;
use serde::{Deserialize, Serialize};

/// What a centroid reports for a position with zero total intensity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ZeroIntensity {
    /// Fill the centroid (and spread) with NaN
    #[default]
    Nan,
    /// Fill with 0.0
    Zero,
    /// Fail the whole reduction with [`ReduceError::ZeroIntensity`]
    Error,
}

/// Configuration shared by all reduction entry points
#[derive(Debug, Clone, Default)]
pub struct ReductionConfig {
    pub parallel: ParallelConfig,
    /// Number of outer ranges to split the array into (default: worker count)
    pub work_items: Option<usize>,
    pub roi: Option<Roi>,
    pub direct_mask: Option<DirectMask>,
    pub detector_mask: Option<DetectorMask>,
    /// Restrict centroids to the `top_n` most intense voxels
    pub top_n: Option<usize>,
    pub with_std: bool,
    pub zero_intensity: ZeroIntensity,
}

impl ReductionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.parallel.num_threads = Some(workers);
        self
    }

    #[must_use]
    pub fn with_work_items(mut self, items: usize) -> Self {
        self.work_items = Some(items);
        self
    }

    #[must_use]
    pub fn with_progress(mut self, show: bool) -> Self {
        self.parallel.show_progress = show;
        self
    }

    #[must_use]
    pub fn with_roi(mut self, roi: Roi) -> Self {
        self.roi = Some(roi);
        self
    }

    #[must_use]
    pub fn with_direct_mask(mut self, mask: DirectMask) -> Self {
        self.direct_mask = Some(mask);
        self
    }

    #[must_use]
    pub fn with_detector_mask(mut self, mask: DetectorMask) -> Self {
        self.detector_mask = Some(mask);
        self
    }

    #[must_use]
    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = Some(top_n);
        self
    }

    #[must_use]
    pub fn with_std(mut self, with_std: bool) -> Self {
        self.with_std = with_std;
        self
    }

    #[must_use]
    pub fn with_zero_intensity(mut self, policy: ZeroIntensity) -> Self {
        self.zero_intensity = policy;
        self
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.parallel.resolved_threads()
    }

    #[must_use]
    pub fn work_item_count(&self) -> usize {
        self.work_items.unwrap_or_else(|| self.worker_count())
    }

    /// Reject anything that cannot work with an array of `shape`.
    ///
    /// Runs before any worker is started.
    pub fn validate(&self, shape: &[usize]) -> Result<()> {
        if !(2..=4).contains(&shape.len()) {
            return Err(ReduceError::shape(format!(
                "expected (positions, ...inner) with 1 to 3 inner dimensions, got shape {:?}",
                shape
            )));
        }
        if shape[0] == 0 {
            return Err(ReduceError::shape("outer (position) dimension is empty"));
        }
        if let Some(zero) = shape[1..].iter().position(|&len| len == 0) {
            return Err(ReduceError::shape(format!("inner dimension {} is empty", zero)));
        }
        if self.parallel.num_threads == Some(0) {
            return Err(ReduceError::config("worker count must be at least 1"));
        }
        if self.work_items == Some(0) {
            return Err(ReduceError::config("work item count must be at least 1"));
        }
        if self.top_n == Some(0) {
            return Err(ReduceError::config("top_n must be at least 1"));
        }
        if let Some(mask) = &self.direct_mask {
            mask.check_len(shape[0])?;
        }
        if let Some(roi) = &self.roi {
            roi.validate(&shape[1..])?;
        }
        Ok(())
    }

    /// Validate and resolve the inner selection for `shape`
    pub fn resolve(&self, shape: &[usize]) -> Result<InnerStrategy> {
        self.validate(shape)?;
        InnerStrategy::resolve(&shape[1..], self.roi.as_ref(), self.detector_mask.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::IndexRange;

    #[test]
    fn test_builder_and_defaults() {
        let config = ReductionConfig::new()
            .with_workers(3)
            .with_top_n(10)
            .with_std(true)
            .with_progress(false);
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.work_item_count(), 3);
        assert_eq!(config.with_work_items(12).work_item_count(), 12);
        assert_eq!(ReductionConfig::new().zero_intensity, ZeroIntensity::Nan);
    }

    #[test]
    fn test_validate_rejects_bad_parameters() {
        let shape = [10, 4, 4];
        assert!(ReductionConfig::new().validate(&shape).is_ok());
        assert!(ReductionConfig::new().with_workers(0).validate(&shape).is_err());
        assert!(ReductionConfig::new().with_top_n(0).validate(&shape).is_err());
        assert!(ReductionConfig::new().validate(&[10]).is_err());
        assert!(ReductionConfig::new().validate(&[0, 4, 4]).is_err());

        let err = ReductionConfig::new()
            .with_direct_mask(DirectMask::include(vec![true; 9]))
            .validate(&shape)
            .unwrap_err();
        match err {
            ReduceError::MaskShapeMismatch { expected, found, .. } => {
                assert_eq!(expected, vec![10]);
                assert_eq!(found, vec![9]);
            }
            other => panic!("unexpected error {:?}", other),
        }

        let roi = Roi::new(vec![IndexRange::new(0, 2), IndexRange::new(3, 6)]);
        let err = ReductionConfig::new().with_roi(roi).validate(&shape).unwrap_err();
        assert!(matches!(err, ReduceError::RoiOutOfBounds { axis: 1, stop: 6, .. }));
    }
}
