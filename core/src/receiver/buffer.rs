//! The 4D series buffer: `shape x num_timepts`, time on the last axis,
//! allocated once when the first volume header fixes the series format.

use ndarray::{Array3, Array4, Axis};

use crate::prelude::{ScanError, ScanResult};
use crate::series::SeriesFormat;

pub struct SeriesBuffer {
    format: SeriesFormat,
    data: Array4<f64>,
}

impl SeriesBuffer {
    pub fn new(format: SeriesFormat, num_timepts: usize) -> Self {
        let [x, y, z] = format.shape;
        Self {
            format,
            data: Array4::zeros((x, y, z, num_timepts)),
        }
    }

    pub fn format(&self) -> &SeriesFormat {
        &self.format
    }

    pub fn num_timepts(&self) -> usize {
        self.data.len_of(Axis(3))
    }

    pub fn data(&self) -> &Array4<f64> {
        &self.data
    }

    /// Store one decoded volume. Samples arrive in C order (z fastest), the
    /// layout the scanner-side senders emit.
    pub fn write_volume(&mut self, vol_idx: usize, samples: &[f64]) -> ScanResult<()> {
        if vol_idx >= self.num_timepts() {
            return Err(ScanError::Protocol(format!(
                "volIdx {} outside the expected {} timepoints",
                vol_idx,
                self.num_timepts()
            )));
        }
        let [x, y, z] = self.format.shape;
        let volume = Array3::from_shape_vec((x, y, z), samples.to_vec()).map_err(|err| {
            ScanError::Protocol(format!(
                "payload of {} samples does not fill shape {:?}: {}",
                samples.len(),
                self.format.shape,
                err
            ))
        })?;
        self.data.index_axis_mut(Axis(3), vol_idx).assign(&volume);
        Ok(())
    }

    /// Copy one volume out of the series. The caller is responsible for
    /// gating on the completion table.
    pub fn volume(&self, vol_idx: usize) -> Option<Array3<f64>> {
        if vol_idx >= self.num_timepts() {
            return None;
        }
        Some(self.data.index_axis(Axis(3), vol_idx).to_owned())
    }
}
