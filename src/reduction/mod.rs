//! Masked reductions and centroid estimation over on-disk slabs
//!
//! # Organization
//!
//! - [`operations`]: in-memory reductions of one slab, and the reduction modes
//! - [`reducer`]: per-range and per-tile worker tasks reading from disk
//! - [`centroid`]: intensity-weighted centroids and their spread

pub mod centroid;
pub mod operations;
pub mod reducer;

pub use centroid::{reduce_centroid, weighted_centroid, Centroid, CentroidJob, CoordinateGrids};
pub use operations::{ReduceMode, SlabReduction};
pub use reducer::{reduce_range, reduce_tile, PartialResult, RangeTask, ReduceJob, TileJob, TileTask};
