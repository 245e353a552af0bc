#![allow(dead_code)]

use ndarray::{ArrayD, IxDyn};
use netcdf::create;
use std::path::Path;
use sxdm_reduce::OnDiskArray;

/// Write `data` as a f64 variable, optionally inside a group, and return its handle
pub fn write_array(
    path: &Path,
    group: Option<&str>,
    name: &str,
    data: &ArrayD<f64>,
) -> Result<OnDiskArray, Box<dyn std::error::Error>> {
    let dims: Vec<String> = (0..data.ndim()).map(|d| format!("{}_dim{}", name, d)).collect();
    let dim_refs: Vec<&str> = dims.iter().map(String::as_str).collect();
    {
        let mut file = create(path)?;
        match group {
            Some(group) => {
                let mut g = file.add_group(group)?;
                for (dim, &len) in dims.iter().zip(data.shape()) {
                    g.add_dimension(dim, len)?;
                }
                let mut var = g.add_variable::<f64>(name, &dim_refs)?;
                var.put(data.view(), ..)?;
            }
            None => {
                for (dim, &len) in dims.iter().zip(data.shape()) {
                    file.add_dimension(dim, len)?;
                }
                let mut var = file.add_variable::<f64>(name, &dim_refs)?;
                var.put(data.view(), ..)?;
            }
        }
    }
    let key = match group {
        Some(group) => format!("{}/{}", group, name),
        None => name.to_string(),
    };
    Ok(OnDiskArray::new(path, key))
}

/// Integer-valued test data so sums are exact regardless of order
pub fn ramp(shape: &[usize]) -> ArrayD<f64> {
    let rank = shape.len();
    ArrayD::from_shape_fn(IxDyn(shape), |idx| {
        (0..rank)
            .map(|d| ((d + 1) * (idx[d] + 1)) as f64)
            .product::<f64>()
            % 97.0
    })
}
