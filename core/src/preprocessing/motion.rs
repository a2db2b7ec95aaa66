//! Intensity-weighted center-of-mass motion estimation. Cheap enough to
//! run inside the per-volume TR budget; reported in mm relative to the
//! first processed volume.

use ndarray::ArrayView3;
use serde::Serialize;

/// Millimeter displacement of one volume's centroid from the reference.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MotionMetrics {
    #[serde(rename = "volIdx")]
    pub vol_idx: usize,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
    pub displacement: f64,
}

impl MotionMetrics {
    pub fn between(vol_idx: usize, position: [f64; 3], reference: [f64; 3]) -> Self {
        let dx = position[0] - reference[0];
        let dy = position[1] - reference[1];
        let dz = position[2] - reference[2];
        Self {
            vol_idx,
            dx,
            dy,
            dz,
            displacement: (dx * dx + dy * dy + dz * dz).sqrt(),
        }
    }
}

/// Intensity-weighted centroid in voxel coordinates. An all-zero volume
/// pins the centroid to the grid center rather than dividing by zero.
pub fn center_of_mass(vol: &ArrayView3<'_, f64>) -> [f64; 3] {
    let (nx, ny, nz) = vol.dim();
    let mut weighted = [0.0f64; 3];
    let mut total = 0.0f64;
    for ((x, y, z), &value) in vol.indexed_iter() {
        weighted[0] += x as f64 * value;
        weighted[1] += y as f64 * value;
        weighted[2] += z as f64 * value;
        total += value;
    }
    if total == 0.0 {
        return [
            (nx as f64 - 1.0) / 2.0,
            (ny as f64 - 1.0) / 2.0,
            (nz as f64 - 1.0) / 2.0,
        ];
    }
    [
        weighted[0] / total,
        weighted[1] / total,
        weighted[2] / total,
    ]
}
