//! Region-of-interest mask: which voxels feed the per-volume statistic,
//! optionally with per-voxel weights taken from the mask intensities.

use std::path::Path;

use ndarray::{Array3, ArrayView3, Zip};

use crate::prelude::{ScanError, ScanResult};

#[derive(Debug)]
pub struct RoiMask {
    mask: Array3<bool>,
    weights: Option<Array3<f64>>,
    shape: [usize; 3],
}

impl RoiMask {
    /// Load a mask volume from a NIfTI file. Voxels > 0 are in the ROI;
    /// when `weighted`, the raw intensities double as weights.
    pub fn from_file(path: &Path, weighted: bool) -> ScanResult<Self> {
        let (data, _affine) = crate::io::nifti::read_volume(path)?;
        Self::from_array(data, weighted)
    }

    pub fn from_array(data: Array3<f64>, weighted: bool) -> ScanResult<Self> {
        let mask = data.mapv(|value| value > 0.0);
        if !mask.iter().any(|&inside| inside) {
            return Err(ScanError::Mask("mask selects no voxels".into()));
        }
        let (x, y, z) = mask.dim();
        let weights = weighted.then(|| data);
        Ok(Self {
            mask,
            weights,
            shape: [x, y, z],
        })
    }

    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn is_weighted(&self) -> bool {
        self.weights.is_some()
    }

    pub fn num_voxels(&self) -> usize {
        self.mask.iter().filter(|&&inside| inside).count()
    }

    fn ensure_matches(&self, vol: &ArrayView3<'_, f64>) -> ScanResult<()> {
        let (x, y, z) = vol.dim();
        if [x, y, z] != self.shape {
            return Err(ScanError::Mask(format!(
                "mask shape {:?} does not match volume shape {:?}",
                self.shape,
                [x, y, z]
            )));
        }
        Ok(())
    }

    /// Pull the in-mask voxel values (and weights, when weighted) out of a
    /// volume.
    pub fn select(&self, vol: &ArrayView3<'_, f64>) -> ScanResult<(Vec<f64>, Option<Vec<f64>>)> {
        self.ensure_matches(vol)?;
        let mut values = Vec::with_capacity(self.num_voxels());
        match &self.weights {
            Some(weights) => {
                let mut selected_weights = Vec::with_capacity(values.capacity());
                Zip::from(&self.mask)
                    .and(vol)
                    .and(weights)
                    .for_each(|&inside, &value, &weight| {
                        if inside {
                            values.push(value);
                            selected_weights.push(weight);
                        }
                    });
                Ok((values, Some(selected_weights)))
            }
            None => {
                Zip::from(&self.mask).and(vol).for_each(|&inside, &value| {
                    if inside {
                        values.push(value);
                    }
                });
                Ok((values, None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn checkerboard(n: usize) -> Array3<f64> {
        Array::from_shape_fn((n, n, n), |(x, y, z)| ((x + y + z) % 2) as f64)
    }

    #[test]
    fn empty_mask_is_rejected() {
        let data = Array3::zeros((2, 2, 2));
        assert!(matches!(
            RoiMask::from_array(data, false).unwrap_err(),
            ScanError::Mask(_)
        ));
    }

    #[test]
    fn select_pulls_only_in_mask_voxels() {
        let mask = RoiMask::from_array(checkerboard(2), false).unwrap();
        assert_eq!(mask.num_voxels(), 4);

        let vol = Array::from_shape_fn((2, 2, 2), |(x, y, z)| (x * 4 + y * 2 + z) as f64);
        let (values, weights) = mask.select(&vol.view()).unwrap();
        assert!(weights.is_none());
        // in-mask voxels are those with odd x+y+z
        assert_eq!(values.len(), 4);
        assert!(values.iter().all(|v| [1.0, 2.0, 4.0, 7.0].contains(v)));
    }

    #[test]
    fn weighted_mask_carries_intensities() {
        let mut data = Array3::zeros((2, 2, 2));
        data[[0, 0, 0]] = 2.0;
        data[[1, 1, 1]] = 0.5;
        let mask = RoiMask::from_array(data, true).unwrap();
        assert!(mask.is_weighted());

        let vol = Array3::from_elem((2, 2, 2), 10.0);
        let (values, weights) = mask.select(&vol.view()).unwrap();
        assert_eq!(values, vec![10.0, 10.0]);
        let weights = weights.unwrap();
        assert_eq!(weights.len(), 2);
        assert!(weights.contains(&2.0) && weights.contains(&0.5));
    }

    #[test]
    fn shape_mismatch_is_rejected() {
        let mask = RoiMask::from_array(checkerboard(2), false).unwrap();
        let vol = Array3::zeros((3, 3, 3));
        assert!(mask.select(&vol.view()).is_err());
    }
}
