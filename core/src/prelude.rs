use ndarray::ArrayView3;
use serde_json::{Map, Value};

/// Key-value output of the analysis stage for a single volume.
///
/// Values are arbitrary JSON scalars; built-in analyses emit one numeric
/// entry (e.g. `average`), custom analyses may emit anything.
pub type AnalysisResult = Map<String, Value>;

/// Common error type shared across the crate.
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("volume file error: {0}")]
    Nifti(String),
    #[error("mask error: {0}")]
    Mask(String),
    #[error("analysis failure: {0}")]
    Analysis(String),
    #[error("unknown analysis choice: {0}")]
    UnknownAnalysis(String),
    #[error("series unavailable: {0}")]
    SeriesUnavailable(String),
}

pub type ScanResult<T> = Result<T, ScanError>;

/// Per-volume statistic computed over incoming data.
///
/// Implementations receive each preprocessed volume together with its
/// 0-based time index and return the result mapping published to the
/// results server. Built-in variants cover ROI mean and median; external
/// implementations register through `analysis::AnalysisRegistry`.
pub trait VolumeAnalysis: Send + std::fmt::Debug {
    fn compute(&mut self, vol: ArrayView3<'_, f64>, vol_idx: usize) -> ScanResult<AnalysisResult>;
}
