//! Synthetic series generation and streaming: stands in for the
//! scanner-side sender during offline simulation and integration tests.
//! Seeded generation keeps runs reproducible.

use anyhow::Context;
use ndarray::Array3;
use rand::{rngs::StdRng, Rng, SeedableRng};
use scancore::io::nifti;
use scancore::math::AffineHelper;
use scancore::series::{VolumeHeader, VoxelDtype};
use scancore::transport::VolumeSender;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::thread;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const GREETING: &str = "synthetic scanner ready";

/// Configuration for generating a synthetic scan series.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub shape: [usize; 3],
    pub num_timepts: usize,
    pub dtype: VoxelDtype,
    pub tr_ms: f64,
    pub seed: u64,
    pub baseline: f64,
    pub noise: f64,
    /// Sleep one TR between volumes, approximating a live scanner.
    pub pace: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            shape: [64, 64, 18],
            num_timepts: 5,
            dtype: VoxelDtype::Int16,
            tr_ms: 1000.0,
            seed: 0,
            baseline: 1000.0,
            noise: 50.0,
            pace: false,
        }
    }
}

/// Build the full series up front. Values are rounded to integers so every
/// sample survives the integer wire dtypes exactly.
pub fn build_series(config: &GeneratorConfig) -> anyhow::Result<Vec<Array3<f64>>> {
    let [x, y, z] = config.shape;
    let voxels = x
        .checked_mul(y)
        .and_then(|xy| xy.checked_mul(z))
        .context("overflow computing voxel count for generator")?;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut series = Vec::with_capacity(config.num_timepts);
    for _ in 0..config.num_timepts {
        let mut samples = Vec::with_capacity(voxels);
        for _ in 0..voxels {
            let jitter = if config.noise > 0.0 {
                rng.gen_range(-config.noise..config.noise)
            } else {
                0.0
            };
            samples.push((config.baseline + jitter).round());
        }
        let volume = Array3::from_shape_vec((x, y, z), samples)
            .context("shaping generated volume")?;
        series.push(volume);
    }
    Ok(series)
}

/// Connect to a scan receiver and stream the generated series through the
/// lockstep volume transport. Returns the number of confirmed volumes.
pub fn stream_series(addr: SocketAddr, config: &GeneratorConfig) -> anyhow::Result<usize> {
    let series = build_series(config)?;
    let mut sender = VolumeSender::connect_with_retry(addr, CONNECT_TIMEOUT)
        .with_context(|| format!("connecting to scan receiver at {}", addr))?;
    sender
        .handshake(GREETING)
        .context("scanner handshake rejected")?;

    let mut confirmed = 0;
    for (vol_idx, volume) in series.iter().enumerate() {
        let header = VolumeHeader {
            vol_idx,
            dtype: config.dtype,
            shape: config.shape,
            affine: AffineHelper::identity(),
            tr: config.tr_ms,
        };
        let samples: Vec<f64> = volume.iter().copied().collect();
        let payload = config.dtype.encode(&samples);
        sender
            .send_volume(&header, &payload)
            .with_context(|| format!("streaming volIdx {}", vol_idx))?;
        confirmed += 1;
        if config.pace {
            thread::sleep(Duration::from_millis(config.tr_ms.max(0.0) as u64));
        }
    }
    Ok(confirmed)
}

/// Write a whole-volume ROI mask for simulation runs without a real mask.
pub fn write_uniform_mask(path: &Path, shape: [usize; 3]) -> anyhow::Result<()> {
    let [x, y, z] = shape;
    let mask = Array3::from_elem((x, y, z), 1.0);
    nifti::write_volume(path, &mask, &AffineHelper::identity())
        .context("writing simulation mask")
}
