/// Helpers for the 4x4 voxel-to-mm affine carried by each series.
pub struct AffineHelper;

impl AffineHelper {
    pub fn identity() -> [[f64; 4]; 4] {
        let mut affine = [[0.0; 4]; 4];
        for (row, cells) in affine.iter_mut().enumerate() {
            cells[row] = 1.0;
        }
        affine
    }

    /// Voxel dimensions in mm, as the column norms of the 3x3 rotation/zoom
    /// block. Valid for any RAS+ affine regardless of axis flips.
    pub fn voxel_dims(affine: &[[f64; 4]; 4]) -> [f64; 3] {
        let mut dims = [0.0; 3];
        for (col, dim) in dims.iter_mut().enumerate() {
            let mut sum_sq = 0.0;
            for row in affine.iter().take(3) {
                sum_sq += row[col] * row[col];
            }
            *dim = sum_sq.sqrt();
        }
        dims
    }
}
