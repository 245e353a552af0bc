//! Read-only access to chunked on-disk arrays
//!
//! Arrays live in NetCDF-4 files (HDF5 containers). An [`OnDiskArray`] is just
//! a path plus a variable key, so it can be copied into every worker task;
//! each task opens its own [`ArrayHandle`] and drops it when done. No file
//! handle is ever shared between workers.

use crate::errors::{ReduceError, Result};
use crate::partition::IndexRange;
use ndarray::{concatenate, ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A named array inside a file, e.g. `("qspace.h5", "Data/qspace")`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnDiskArray {
    pub path: PathBuf,
    pub key: String,
}

impl OnDiskArray {
    pub fn new(path: impl Into<PathBuf>, key: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            key: key.into(),
        }
    }

    /// Open the file read-only
    pub fn open(&self) -> Result<ArrayHandle> {
        ArrayHandle::open(&self.path, &self.key)
    }

    /// Shape of the array; only metadata is touched
    pub fn shape(&self) -> Result<Vec<usize>> {
        Ok(self.open()?.shape().to_vec())
    }

    /// Read a whole 1-D variable, e.g. a coordinate axis
    pub fn read_vector(&self) -> Result<Vec<f64>> {
        let handle = self.open()?;
        if handle.shape().len() != 1 {
            return Err(ReduceError::shape(format!(
                "'{}' has {} dimensions, expected a 1-D axis",
                self.key,
                handle.shape().len()
            )));
        }
        let var = handle.variable()?;
        Ok(var.get_values::<f64, _>(..)?)
    }
}

/// An open, read-only view of one array
pub struct ArrayHandle {
    file: netcdf::File,
    path: PathBuf,
    key: String,
    shape: Vec<usize>,
}

impl ArrayHandle {
    fn open(path: &Path, key: &str) -> Result<Self> {
        let file = netcdf::open(path)?;
        let shape = {
            let var = file.variable(key).ok_or_else(|| ReduceError::ArrayNotFound {
                path: path.display().to_string(),
                key: key.to_string(),
            })?;
            var.dimensions().iter().map(netcdf::Dimension::len).collect()
        };
        Ok(Self {
            file,
            path: path.to_path_buf(),
            key: key.to_string(),
            shape,
        })
    }

    fn variable(&self) -> Result<netcdf::Variable<'_>> {
        self.file
            .variable(&self.key)
            .ok_or_else(|| ReduceError::ArrayNotFound {
                path: self.path.display().to_string(),
                key: self.key.clone(),
            })
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Read the hyperslab given by one range per dimension
    pub fn read_block(&self, ranges: &[IndexRange]) -> Result<ArrayD<f64>> {
        if ranges.len() != self.shape.len() {
            return Err(ReduceError::shape(format!(
                "block has {} ranges for a {}-dimensional array",
                ranges.len(),
                self.shape.len()
            )));
        }
        for (axis, (range, &len)) in ranges.iter().zip(&self.shape).enumerate() {
            if range.stop > len || range.start > range.stop {
                return Err(ReduceError::shape(format!(
                    "range {} on axis {} exceeds length {}",
                    range, axis, len
                )));
            }
        }

        let block_shape: Vec<usize> = ranges.iter().map(IndexRange::len).collect();
        if block_shape.iter().any(|&len| len == 0) {
            return Ok(ArrayD::zeros(IxDyn(&block_shape)));
        }

        let var = self.variable()?;
        let r = |i: usize| ranges[i].as_range();
        let values: Vec<f64> = match ranges.len() {
            1 => var.get_values::<f64, _>(r(0))?,
            2 => var.get_values::<f64, _>((r(0), r(1)))?,
            3 => var.get_values::<f64, _>((r(0), r(1), r(2)))?,
            4 => var.get_values::<f64, _>((r(0), r(1), r(2), r(3)))?,
            n => {
                return Err(ReduceError::shape(format!(
                    "unsupported number of dimensions for slab reads: {} (max 4)",
                    n
                )))
            }
        };

        Ok(ArrayD::from_shape_vec(IxDyn(&block_shape), values)?)
    }

    /// Read the listed outer positions (sorted, unique) over the inner box.
    ///
    /// Consecutive positions are read as one contiguous run.
    pub fn read_rows(&self, rows: &[usize], inner: &[IndexRange]) -> Result<ArrayD<f64>> {
        let runs = coalesce(rows);
        let mut blocks = Vec::with_capacity(runs.len());
        for run in runs {
            let mut ranges = Vec::with_capacity(inner.len() + 1);
            ranges.push(run);
            ranges.extend_from_slice(inner);
            blocks.push(self.read_block(&ranges)?);
        }

        match blocks.len() {
            0 => {
                let mut shape = vec![0];
                shape.extend(inner.iter().map(IndexRange::len));
                Ok(ArrayD::zeros(IxDyn(&shape)))
            }
            1 => Ok(blocks.remove(0)),
            _ => {
                let views: Vec<_> = blocks.iter().map(ArrayD::view).collect();
                Ok(concatenate(Axis(0), &views)?)
            }
        }
    }
}

/// Group a sorted index list into contiguous ranges
fn coalesce(rows: &[usize]) -> Vec<IndexRange> {
    let mut runs: Vec<IndexRange> = Vec::new();
    for &row in rows {
        match runs.last_mut() {
            Some(last) if last.stop == row => last.stop += 1,
            _ => runs.push(IndexRange::new(row, row + 1)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coalesce_runs() {
        assert_eq!(
            coalesce(&[0, 1, 2, 5, 7, 8]),
            vec![
                IndexRange::new(0, 3),
                IndexRange::new(5, 6),
                IndexRange::new(7, 9)
            ]
        );
        assert!(coalesce(&[]).is_empty());
    }
}
