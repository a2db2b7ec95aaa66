pub mod affine;
pub mod stats;

pub use affine::AffineHelper;
pub use stats::StatsHelper;
