//! Intensity-weighted centroids of reciprocal-space volumes
//!
//! For the selected voxels with intensities `I_i` and coordinates `q_i`:
//!
//! - `p_i = I_i / Σ I`
//! - `com_d = Σ p_i q_d[i]`
//! - `std_d = sqrt(Σ p_i (q_d[i] - com_d)²)` (intensity-weighted second moment)

use crate::config::{ReductionConfig, ZeroIntensity};
use crate::errors::{ReduceError, Result};
use crate::mask::InnerStrategy;
use crate::partition::IndexRange;
use crate::source::OnDiskArray;
use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Centre of mass (x, y, z) and, optionally, its spread per axis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub com: [f64; 3],
    pub std: Option<[f64; 3]>,
}

impl Centroid {
    fn filled(value: f64, with_std: bool) -> Self {
        Self {
            com: [value; 3],
            std: with_std.then_some([value; 3]),
        }
    }

    /// Output width: 3 without spread, 6 with
    #[must_use]
    pub const fn width(with_std: bool) -> usize {
        if with_std {
            6
        } else {
            3
        }
    }

    /// `[x, y, z]` or `[x, y, z, std_x, std_y, std_z]`
    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        let mut out = self.com.to_vec();
        if let Some(std) = self.std {
            out.extend_from_slice(&std);
        }
        out
    }
}

/// Coordinates of every inner element along x, y and z
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateGrids {
    pub x: ArrayD<f64>,
    pub y: ArrayD<f64>,
    pub z: ArrayD<f64>,
}

impl CoordinateGrids {
    /// Grids from three 1-D axes of a gridded q-space volume (`ij` indexing)
    #[must_use]
    pub fn from_axes(x: &[f64], y: &[f64], z: &[f64]) -> Self {
        let shape = IxDyn(&[x.len(), y.len(), z.len()]);
        Self {
            x: ArrayD::from_shape_fn(shape.clone(), |i| x[i[0]]),
            y: ArrayD::from_shape_fn(shape.clone(), |i| y[i[1]]),
            z: ArrayD::from_shape_fn(shape, |i| z[i[2]]),
        }
    }

    /// Per-element coordinates, e.g. the q value of every detector pixel
    pub fn from_grids(x: ArrayD<f64>, y: ArrayD<f64>, z: ArrayD<f64>) -> Result<Self> {
        if x.shape() != y.shape() || x.shape() != z.shape() {
            return Err(ReduceError::config(format!(
                "coordinate grids disagree in shape: {:?}, {:?}, {:?}",
                x.shape(),
                y.shape(),
                z.shape()
            )));
        }
        Ok(Self { x, y, z })
    }

    /// Element indices as coordinates; axes beyond the inner rank are zero
    #[must_use]
    pub fn pixel_indices(inner_shape: &[usize]) -> Self {
        let shape = IxDyn(inner_shape);
        let rank = inner_shape.len();
        let axis = |d: usize| {
            ArrayD::from_shape_fn(shape.clone(), |i| {
                if d < rank {
                    i[d] as f64
                } else {
                    0.0
                }
            })
        };
        Self {
            x: axis(0),
            y: axis(1),
            z: axis(2),
        }
    }

    /// Read three 1-D axes (e.g. `Data/qx`, `Data/qy`, `Data/qz`) from a file
    pub fn from_file_axes(path: impl AsRef<Path>, keys: [&str; 3]) -> Result<Self> {
        let path = path.as_ref();
        let [x, y, z] = keys.map(|key| OnDiskArray::new(path, key).read_vector());
        Ok(Self::from_axes(&x?, &y?, &z?))
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.x.shape()
    }
}

/// Centroid of the selected voxels.
///
/// With `top_n`, only the `top_n` most intense voxels are used. Voxels are
/// ranked with a stable descending sort, so among equal intensities the one
/// with the lower flat index wins; this is an ordering convention, not a
/// physical tie-break.
///
/// Returns `Ok(None)` when the selected intensities sum to exactly zero.
/// A NaN or infinite voxel is not treated as empty: it propagates into a
/// NaN centroid.
///
/// # Errors
///
/// Fails when a coordinate slice is shorter than `intensity`.
pub fn weighted_centroid(
    intensity: &[f64],
    coords: [&[f64]; 3],
    top_n: Option<usize>,
    with_std: bool,
) -> Result<Option<Centroid>> {
    if let Some(short) = coords.iter().position(|q| q.len() < intensity.len()) {
        return Err(ReduceError::shape(format!(
            "coordinate axis {} has {} values for {} voxels",
            short,
            coords[short].len(),
            intensity.len()
        )));
    }

    let selected: Vec<usize> = match top_n {
        Some(n) if n < intensity.len() => {
            let mut order: Vec<usize> = (0..intensity.len()).collect();
            order.sort_by(|&a, &b| intensity[b].total_cmp(&intensity[a]));
            order.truncate(n);
            order
        }
        _ => (0..intensity.len()).collect(),
    };

    let total: f64 = selected.iter().map(|&i| intensity[i]).sum();
    if total == 0.0 {
        return Ok(None);
    }

    let mut com = [0.0; 3];
    for (d, q) in coords.iter().enumerate() {
        com[d] = selected
            .iter()
            .map(|&i| intensity[i] / total * q[i])
            .sum();
    }

    let std = with_std.then(|| {
        let mut std = [0.0; 3];
        for (d, q) in coords.iter().enumerate() {
            let second: f64 = selected
                .iter()
                .map(|&i| intensity[i] / total * (q[i] - com[d]).powi(2))
                .sum();
            std[d] = second.sqrt();
        }
        std
    });

    Ok(Some(Centroid { com, std }))
}

/// Context shared by every centroid task of one call.
///
/// Coordinates are already cropped to the selection, in the same order as
/// the selected voxels of each volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CentroidJob {
    pub array: OnDiskArray,
    pub strategy: InnerStrategy,
    pub coords: [Vec<f64>; 3],
    pub top_n: Option<usize>,
    pub with_std: bool,
    pub zero_intensity: ZeroIntensity,
}

impl CentroidJob {
    /// Build the job for an array with inner shape `inner_shape`
    pub fn new(
        array: OnDiskArray,
        strategy: InnerStrategy,
        grids: &CoordinateGrids,
        inner_shape: &[usize],
        config: &ReductionConfig,
    ) -> Result<Self> {
        if grids.shape() != inner_shape {
            return Err(ReduceError::config(format!(
                "coordinate grids have shape {:?}, array inner shape is {:?}",
                grids.shape(),
                inner_shape
            )));
        }
        let coords = [&grids.x, &grids.y, &grids.z].map(|g| strategy.select_full(g.view()));
        Ok(Self {
            array,
            strategy,
            coords,
            top_n: config.top_n,
            with_std: config.with_std,
            zero_intensity: config.zero_intensity,
        })
    }
}

/// Centroid of the volume at position `index`
///
/// # Errors
///
/// Propagates storage errors, and fails with [`ReduceError::ZeroIntensity`]
/// when the volume is empty and the policy is [`ZeroIntensity::Error`].
pub fn reduce_centroid(job: &CentroidJob, index: &usize) -> Result<Centroid> {
    let index = *index;
    let handle = job.array.open()?;
    let mut ranges = Vec::with_capacity(job.strategy.read_box().axes.len() + 1);
    ranges.push(IndexRange::new(index, index + 1));
    ranges.extend_from_slice(&job.strategy.read_box().axes);
    let block = handle.read_block(&ranges)?;

    let volume = block.index_axis(Axis(0), 0);
    let intensity: Vec<f64> = job.strategy.select(&volume).collect();
    let coords = [
        job.coords[0].as_slice(),
        job.coords[1].as_slice(),
        job.coords[2].as_slice(),
    ];

    match weighted_centroid(&intensity, coords, job.top_n, job.with_std)? {
        Some(centroid) => Ok(centroid),
        None => match job.zero_intensity {
            ZeroIntensity::Nan => Ok(Centroid::filled(f64::NAN, job.with_std)),
            ZeroIntensity::Zero => Ok(Centroid::filled(0.0, job.with_std)),
            ZeroIntensity::Error => Err(ReduceError::ZeroIntensity { index }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_single_voxel_centroid_is_exact() {
        let grids = CoordinateGrids::from_axes(&[0.1, 0.2, 0.3], &[1.0, 2.0], &[-5.0, 7.5]);
        let mut intensity = vec![0.0; 12];
        // voxel (2, 1, 0) -> flat 2*4 + 1*2 + 0
        intensity[10] = 42.0;

        let c = weighted_centroid(
            &intensity,
            [
                grids.x.as_slice().unwrap(),
                grids.y.as_slice().unwrap(),
                grids.z.as_slice().unwrap(),
            ],
            None,
            true,
        )
        .unwrap()
        .unwrap();
        assert_eq!(c.com, [0.3, 2.0, -5.0]);
        assert_eq!(c.std, Some([0.0, 0.0, 0.0]));
        assert_eq!(c.to_vec().len(), 6);
    }

    #[test]
    fn test_two_voxel_mean_and_spread() {
        let x = [0.0, 2.0];
        let zeros = [0.0, 0.0];
        let c = weighted_centroid(&[1.0, 3.0], [&x, &zeros, &zeros], None, true)
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(c.com[0], 1.5, epsilon = 1e-12);
        // sqrt(0.25 * 1.5^2 + 0.75 * 0.5^2)
        assert_abs_diff_eq!(c.std.unwrap()[0], 0.75_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_top_n_keeps_strongest_voxels() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let zeros = [0.0; 4];
        let c = weighted_centroid(&[1.0, 10.0, 1.0, 10.0], [&x, &zeros, &zeros], Some(2), false)
            .unwrap()
            .unwrap();
        assert_abs_diff_eq!(c.com[0], 2.0, epsilon = 1e-12);
        assert!(c.std.is_none());

        // ties resolved towards the lower flat index
        let c = weighted_centroid(&[5.0, 5.0, 5.0], [&x[..3], &zeros[..3], &zeros[..3]], Some(1), false)
            .unwrap()
            .unwrap();
        assert_eq!(c.com[0], 0.0);
    }

    #[test]
    fn test_zero_volume_has_no_centroid() {
        let x = [1.0, 2.0];
        assert!(weighted_centroid(&[0.0, 0.0], [&x, &x, &x], None, false)
            .unwrap()
            .is_none());
        assert!(Centroid::filled(f64::NAN, false).com[0].is_nan());
    }

    #[test]
    fn test_non_finite_voxels_propagate_instead_of_reading_as_empty() {
        let x = [1.0, 2.0, 3.0];
        let c = weighted_centroid(&[5.0, f64::NAN, 7.0], [&x, &x, &x], None, true)
            .unwrap()
            .unwrap();
        assert!(c.com.iter().all(|v| v.is_nan()));
        assert!(c.std.unwrap().iter().all(|v| v.is_nan()));

        let c = weighted_centroid(&[f64::INFINITY, 1.0], [&x[..2], &x[..2], &x[..2]], None, false)
            .unwrap()
            .unwrap();
        assert!(c.com[0].is_nan());
    }

    #[test]
    fn test_short_coordinates_are_rejected() {
        let x = [1.0, 2.0, 3.0];
        let short = [1.0, 2.0];
        let err = weighted_centroid(&[1.0, 1.0, 1.0], [&x[..], &short[..], &x[..]], None, false)
            .unwrap_err();
        assert!(matches!(err, ReduceError::InvalidShape { .. }));
    }

    #[test]
    fn test_pixel_indices_for_detector_frames() {
        let grids = CoordinateGrids::pixel_indices(&[2, 3]);
        assert_eq!(grids.x[[1, 2]], 1.0);
        assert_eq!(grids.y[[1, 2]], 2.0);
        assert!(grids.z.iter().all(|&v| v == 0.0));
        assert!(CoordinateGrids::from_grids(
            grids.x.clone(),
            grids.y.clone(),
            ArrayD::zeros(IxDyn(&[3, 2]))
        )
        .is_err());
    }
}
