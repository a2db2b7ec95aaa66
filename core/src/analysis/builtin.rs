//! Built-in per-volume statistics: ROI mean and median, with weighted
//! variants when the mask carries weights. Result keys follow the names
//! the legacy results clients expect (`average`, `weightedAverage`,
//! `median`, `weightedMedian`), rounded to two decimals.

use ndarray::ArrayView3;
use serde_json::json;

use crate::analysis::roi::RoiMask;
use crate::math::StatsHelper;
use crate::prelude::{AnalysisResult, ScanResult, VolumeAnalysis};

#[derive(Debug)]
pub struct AverageAnalysis {
    roi: RoiMask,
}

impl AverageAnalysis {
    pub fn new(roi: RoiMask) -> Self {
        Self { roi }
    }
}

impl VolumeAnalysis for AverageAnalysis {
    fn compute(&mut self, vol: ArrayView3<'_, f64>, _vol_idx: usize) -> ScanResult<AnalysisResult> {
        let (values, weights) = self.roi.select(&vol)?;
        let (key, value) = match weights {
            Some(weights) => (
                "weightedAverage",
                StatsHelper::weighted_mean(&values, &weights),
            ),
            None => ("average", StatsHelper::mean(&values)),
        };
        let mut result = AnalysisResult::new();
        result.insert(key.into(), json!(StatsHelper::round2(value)));
        Ok(result)
    }
}

#[derive(Debug)]
pub struct MedianAnalysis {
    roi: RoiMask,
}

impl MedianAnalysis {
    pub fn new(roi: RoiMask) -> Self {
        Self { roi }
    }
}

impl VolumeAnalysis for MedianAnalysis {
    fn compute(&mut self, vol: ArrayView3<'_, f64>, _vol_idx: usize) -> ScanResult<AnalysisResult> {
        let (values, weights) = self.roi.select(&vol)?;
        let (key, value) = match weights {
            Some(weights) => (
                "weightedMedian",
                StatsHelper::weighted_median(&values, &weights),
            ),
            None => ("median", StatsHelper::median(&values)),
        };
        let mut result = AnalysisResult::new();
        result.insert(key.into(), json!(StatsHelper::round2(value)));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array3};

    fn full_mask(n: usize) -> RoiMask {
        RoiMask::from_array(Array3::from_elem((n, n, n), 1.0), false).unwrap()
    }

    #[test]
    fn average_over_a_full_mask() {
        let mut analysis = AverageAnalysis::new(full_mask(2));
        let vol = Array::from_shape_fn((2, 2, 2), |(x, y, z)| (x * 4 + y * 2 + z) as f64);
        let result = analysis.compute(vol.view(), 0).unwrap();
        assert_eq!(result["average"], serde_json::json!(3.5));
    }

    #[test]
    fn median_over_a_full_mask() {
        let mut analysis = MedianAnalysis::new(full_mask(2));
        let vol = Array::from_shape_fn((2, 2, 2), |(x, y, z)| (x * 4 + y * 2 + z) as f64);
        let result = analysis.compute(vol.view(), 0).unwrap();
        assert_eq!(result["median"], serde_json::json!(3.5));
    }

    #[test]
    fn weighted_average_uses_mask_intensities() {
        let mut weights = Array3::zeros((2, 2, 2));
        weights[[0, 0, 0]] = 3.0;
        weights[[1, 1, 1]] = 1.0;
        let roi = RoiMask::from_array(weights, true).unwrap();
        let mut analysis = AverageAnalysis::new(roi);

        let mut vol = Array3::zeros((2, 2, 2));
        vol[[0, 0, 0]] = 10.0;
        vol[[1, 1, 1]] = 20.0;
        let result = analysis.compute(vol.view(), 0).unwrap();
        assert_eq!(result["weightedAverage"], serde_json::json!(12.5));
    }

    #[test]
    fn weighted_median_uses_mask_intensities() {
        let mut weights = Array3::zeros((1, 1, 3));
        weights[[0, 0, 0]] = 0.1;
        weights[[0, 0, 1]] = 0.1;
        weights[[0, 0, 2]] = 5.0;
        let roi = RoiMask::from_array(weights, true).unwrap();
        let mut analysis = MedianAnalysis::new(roi);

        let mut vol = Array3::zeros((1, 1, 3));
        vol[[0, 0, 0]] = 1.0;
        vol[[0, 0, 1]] = 2.0;
        vol[[0, 0, 2]] = 9.0;
        let result = analysis.compute(vol.view(), 0).unwrap();
        assert_eq!(result["weightedMedian"], serde_json::json!(9.0));
    }
}
