//! Per-volume preprocessing hook, invoked between receipt and analysis.
//! The built-in stage leaves voxel data untouched and reports motion
//! metrics against the first processed volume; voxel dimensions come from
//! the series affine once the orchestrator supplies it.

pub mod motion;

use ndarray::ArrayView3;

use crate::math::AffineHelper;
use crate::telemetry::LogManager;

pub use motion::{center_of_mass, MotionMetrics};

pub struct Preprocessor {
    voxel_dims: Option<[f64; 3]>,
    reference: Option<[f64; 3]>,
    logger: LogManager,
}

impl Preprocessor {
    pub fn new() -> Self {
        Self {
            voxel_dims: None,
            reference: None,
            logger: LogManager::new("preprocessor"),
        }
    }

    /// Fix the voxel-to-mm scaling. Called once the first volume's affine
    /// is known; motion metrics are withheld until then.
    pub fn set_affine(&mut self, affine: &[[f64; 4]; 4]) {
        let dims = AffineHelper::voxel_dims(affine);
        self.logger
            .record_debug(&format!("voxel dims fixed at {:?} mm", dims));
        self.voxel_dims = Some(dims);
    }

    /// Process one volume. The volume itself passes through unmodified;
    /// the return value carries motion metrics when the affine is known.
    pub fn run(&mut self, vol: &ArrayView3<'_, f64>, vol_idx: usize) -> Option<MotionMetrics> {
        let dims = self.voxel_dims?;
        let centroid = center_of_mass(vol);
        let position = [
            centroid[0] * dims[0],
            centroid[1] * dims[1],
            centroid[2] * dims[2],
        ];
        let reference = *self.reference.get_or_insert(position);
        let metrics = MotionMetrics::between(vol_idx, position, reference);
        self.logger.record_debug(&format!(
            "volIdx {} displacement {:.3} mm",
            vol_idx, metrics.displacement
        ));
        Some(metrics)
    }
}

impl Default for Preprocessor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array3;

    #[test]
    fn no_metrics_until_the_affine_is_set() {
        let mut preprocessor = Preprocessor::new();
        let vol = Array3::from_elem((2, 2, 2), 1.0);
        assert!(preprocessor.run(&vol.view(), 0).is_none());
    }

    #[test]
    fn first_volume_fixes_the_reference() {
        let mut preprocessor = Preprocessor::new();
        preprocessor.set_affine(&AffineHelper::identity());

        let mut first = Array3::zeros((6, 6, 6));
        first[[2, 2, 2]] = 5.0;
        let metrics = preprocessor.run(&first.view(), 0).unwrap();
        assert_eq!(metrics.displacement, 0.0);

        let mut shifted = Array3::zeros((6, 6, 6));
        shifted[[3, 2, 2]] = 5.0;
        let metrics = preprocessor.run(&shifted.view(), 1).unwrap();
        assert_relative_eq!(metrics.dx, 1.0);
        assert_relative_eq!(metrics.displacement, 1.0);
    }

    #[test]
    fn voxel_dims_scale_the_displacement() {
        let mut affine = AffineHelper::identity();
        affine[0][0] = 3.0;
        let mut preprocessor = Preprocessor::new();
        preprocessor.set_affine(&affine);

        let mut first = Array3::zeros((6, 6, 6));
        first[[1, 1, 1]] = 1.0;
        preprocessor.run(&first.view(), 0).unwrap();

        let mut shifted = Array3::zeros((6, 6, 6));
        shifted[[2, 1, 1]] = 1.0;
        let metrics = preprocessor.run(&shifted.view(), 1).unwrap();
        assert_relative_eq!(metrics.dx, 3.0);
    }
}
