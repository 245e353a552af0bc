//! sxdm-reduce: out-of-core reductions of scanning X-ray diffraction arrays
//!
//! Scanning diffraction experiments produce arrays shaped
//! `(positions, ...detector or q-space)`, far larger than memory. This crate
//! computes per-position sums, frame sums and intensity-weighted centroids
//! over such arrays while holding at most one slab per worker in memory.
//!
//! ## Key Features
//!
//! - **Balanced partitioning**: the outer axis is split into contiguous ranges
//! - **Parallel Processing**: one Rayon worker pool per call, results kept in submission order
//! - **Masks and ROIs**: direct-space and detector masks with a single include polarity
//! - **Centroids**: intensity-weighted centre of mass and spread, optional `top_n` restriction
//! - **Masked results**: excluded positions are flagged invalid, never silently zero
//!
//! ## Module Organization
//!
//! - [`partition`]: index ranges and the partitioner
//! - [`source`]: read-only access to NetCDF-4 / HDF5 arrays
//! - [`mask`]: direct masks, detector masks, ROIs and the inner selection strategy
//! - [`config`]: per-call [`ReductionConfig`]
//! - [`reduction`]: worker-side reductions and centroid math
//! - [`parallel`]: worker pool and ordered dispatch
//! - [`assemble`]: merging partial results
//! - [`pipeline`]: top-level entry points
//! - [`errors`]: centralized error handling
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sxdm_reduce::prelude::*;
//!
//! let qspace = OnDiskArray::new("qspace.h5", "Data/qspace");
//! let config = ReductionConfig::new()
//!     .with_workers(8)
//!     .with_direct_mask(DirectMask::excluding(10_000, 100..200));
//!
//! let sums = sum_positions(&qspace, &config).unwrap();
//! println!("{} positions valid", sums.valid_count());
//!
//! let grids = CoordinateGrids::from_file_axes("qspace.h5", ["Data/qx", "Data/qy", "Data/qz"]).unwrap();
//! let coms = centroids(&qspace, &grids, &config.with_std(true)).unwrap();
//! println!("centroids: {:?}", coms.centroids().unwrap().shape());
//! ```

pub mod assemble;
pub mod config;
pub mod errors;
pub mod mask;
pub mod parallel;
pub mod partition;
pub mod pipeline;
pub mod reduction;
pub mod source;

pub use assemble::{assemble, assemble_centroids, assemble_tiles, ReductionResult};
pub use config::{ReductionConfig, ZeroIntensity};
pub use errors::{ReduceError, Result};
pub use mask::{DetectorMask, DirectMask, InnerStrategy, Roi};
pub use parallel::{parallel_info, ParallelConfig, ParallelInfo, WorkItem, WorkerPool};
pub use partition::{partition, partition_inner, partition_span, IndexRange, WorkUnit};
pub use pipeline::{centroid_at, centroids, sum_frames, sum_frames_tiled, sum_positions};
pub use source::{ArrayHandle, OnDiskArray};

pub mod prelude {
    //! Commonly used imports for convenience
    pub use crate::assemble::ReductionResult;
    pub use crate::config::{ReductionConfig, ZeroIntensity};
    pub use crate::errors::{ReduceError, Result};
    pub use crate::mask::{DetectorMask, DirectMask, Roi};
    pub use crate::parallel::ParallelConfig;
    pub use crate::partition::IndexRange;
    pub use crate::pipeline::{centroid_at, centroids, sum_frames, sum_frames_tiled, sum_positions};
    pub use crate::reduction::{Centroid, CoordinateGrids};
    pub use crate::source::OnDiskArray;
}
