//! Domain types shared between the transport, receiver, and file I/O layers:
//! the element datatypes the scanner side emits, the per-volume wire header,
//! and the per-series format fixed by the first header.

use serde::{Deserialize, Deserializer, Serialize};

use crate::prelude::{ScanError, ScanResult};

/// Fixed-width element types supported on the wire, named with the type
/// strings the scanner-side senders put in their headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoxelDtype {
    Uint8,
    Int16,
    Uint16,
    Int32,
    Float32,
    Float64,
}

impl VoxelDtype {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            VoxelDtype::Uint8 => 1,
            VoxelDtype::Int16 | VoxelDtype::Uint16 => 2,
            VoxelDtype::Int32 | VoxelDtype::Float32 => 4,
            VoxelDtype::Float64 => 8,
        }
    }

    /// Decode a little-endian payload into f64 samples. The conversion is
    /// exact for every supported type except `float64` round-trips, which
    /// are identity.
    pub fn decode(&self, payload: &[u8]) -> ScanResult<Vec<f64>> {
        if payload.len() % self.size() != 0 {
            return Err(ScanError::Protocol(format!(
                "payload length {} is not a multiple of {} element size {}",
                payload.len(),
                self,
                self.size()
            )));
        }
        let samples = match self {
            VoxelDtype::Uint8 => payload.iter().map(|&b| f64::from(b)).collect(),
            VoxelDtype::Int16 => payload
                .chunks_exact(2)
                .map(|c| f64::from(i16::from_le_bytes([c[0], c[1]])))
                .collect(),
            VoxelDtype::Uint16 => payload
                .chunks_exact(2)
                .map(|c| f64::from(u16::from_le_bytes([c[0], c[1]])))
                .collect(),
            VoxelDtype::Int32 => payload
                .chunks_exact(4)
                .map(|c| f64::from(i32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                .collect(),
            VoxelDtype::Float32 => payload
                .chunks_exact(4)
                .map(|c| f64::from(f32::from_le_bytes([c[0], c[1], c[2], c[3]])))
                .collect(),
            VoxelDtype::Float64 => payload
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect(),
        };
        Ok(samples)
    }

    /// Encode f64 samples as a little-endian payload (sender side). Values
    /// are cast with saturation semantics left to the caller; the built-in
    /// generator only produces in-range values.
    pub fn encode(&self, samples: &[f64]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(samples.len() * self.size());
        for &value in samples {
            match self {
                VoxelDtype::Uint8 => payload.push(value as u8),
                VoxelDtype::Int16 => payload.extend_from_slice(&(value as i16).to_le_bytes()),
                VoxelDtype::Uint16 => payload.extend_from_slice(&(value as u16).to_le_bytes()),
                VoxelDtype::Int32 => payload.extend_from_slice(&(value as i32).to_le_bytes()),
                VoxelDtype::Float32 => payload.extend_from_slice(&(value as f32).to_le_bytes()),
                VoxelDtype::Float64 => payload.extend_from_slice(&value.to_le_bytes()),
            }
        }
        payload
    }
}

impl std::fmt::Display for VoxelDtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VoxelDtype::Uint8 => "uint8",
            VoxelDtype::Int16 => "int16",
            VoxelDtype::Uint16 => "uint16",
            VoxelDtype::Int32 => "int32",
            VoxelDtype::Float32 => "float32",
            VoxelDtype::Float64 => "float64",
        };
        f.write_str(name)
    }
}

/// Self-describing header preceding each volume payload on the wire.
///
/// The affine and TR fields tolerate the legacy sender encodings (a
/// JSON-string-wrapped nested list, a numeric string) in addition to the
/// plain forms.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeHeader {
    #[serde(rename = "volIdx")]
    pub vol_idx: usize,
    pub dtype: VoxelDtype,
    pub shape: [usize; 3],
    #[serde(deserialize_with = "de_affine")]
    pub affine: [[f64; 4]; 4],
    #[serde(rename = "TR", deserialize_with = "de_tr")]
    pub tr: f64,
}

impl VolumeHeader {
    /// Decode a header from its JSON frame. Any missing or ill-typed
    /// required key is a protocol violation.
    pub fn from_json(bytes: &[u8]) -> ScanResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| ScanError::Protocol(format!("invalid volume header: {}", err)))
    }

    pub fn to_json(&self) -> ScanResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Number of payload bytes this header commits the sender to.
    pub fn expected_payload_len(&self) -> usize {
        self.shape.iter().product::<usize>() * self.dtype.size()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum AffineField {
    Matrix([[f64; 4]; 4]),
    Encoded(String),
}

fn de_affine<'de, D>(deserializer: D) -> Result<[[f64; 4]; 4], D::Error>
where
    D: Deserializer<'de>,
{
    match AffineField::deserialize(deserializer)? {
        AffineField::Matrix(matrix) => Ok(matrix),
        AffineField::Encoded(text) => serde_json::from_str(&text).map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TrField {
    Number(f64),
    Text(String),
}

fn de_tr<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match TrField::deserialize(deserializer)? {
        TrField::Number(value) => Ok(value),
        TrField::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Per-series format captured from the first volume header; immutable for
/// the rest of the scan.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesFormat {
    pub shape: [usize; 3],
    pub dtype: VoxelDtype,
    pub affine: [[f64; 4]; 4],
    pub tr: f64,
}

impl SeriesFormat {
    pub fn from_header(header: &VolumeHeader) -> Self {
        Self {
            shape: header.shape,
            dtype: header.dtype,
            affine: header.affine,
            tr: header.tr,
        }
    }

    /// Later headers may not change the shape or datatype of the series.
    pub fn ensure_matches(&self, header: &VolumeHeader) -> ScanResult<()> {
        if header.shape != self.shape {
            return Err(ScanError::Protocol(format!(
                "volIdx {} header shape {:?} differs from series shape {:?}",
                header.vol_idx, header.shape, self.shape
            )));
        }
        if header.dtype != self.dtype {
            return Err(ScanError::Protocol(format!(
                "volIdx {} header dtype {} differs from series dtype {}",
                header.vol_idx, header.dtype, self.dtype
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::AffineHelper;

    fn sample_header() -> VolumeHeader {
        VolumeHeader {
            vol_idx: 3,
            dtype: VoxelDtype::Uint16,
            shape: [4, 4, 2],
            affine: AffineHelper::identity(),
            tr: 1000.0,
        }
    }

    #[test]
    fn dtype_names_round_trip() {
        for dtype in [
            VoxelDtype::Uint8,
            VoxelDtype::Int16,
            VoxelDtype::Uint16,
            VoxelDtype::Int32,
            VoxelDtype::Float32,
            VoxelDtype::Float64,
        ] {
            let name = serde_json::to_string(&dtype).unwrap();
            let back: VoxelDtype = serde_json::from_str(&name).unwrap();
            assert_eq!(back, dtype);
            assert_eq!(name.trim_matches('"'), dtype.to_string());
        }
    }

    #[test]
    fn decode_is_exact_for_integer_samples() {
        let samples = vec![0.0, 1.0, 1000.0, 65535.0];
        let payload = VoxelDtype::Uint16.encode(&samples);
        assert_eq!(payload.len(), 8);
        assert_eq!(VoxelDtype::Uint16.decode(&payload).unwrap(), samples);
    }

    #[test]
    fn decode_rejects_ragged_payload() {
        let err = VoxelDtype::Int16.decode(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ScanError::Protocol(_)));
    }

    #[test]
    fn header_round_trips_through_json() {
        let header = sample_header();
        let bytes = header.to_json().unwrap();
        let back = VolumeHeader::from_json(&bytes).unwrap();
        assert_eq!(back.vol_idx, 3);
        assert_eq!(back.dtype, VoxelDtype::Uint16);
        assert_eq!(back.shape, [4, 4, 2]);
        assert_eq!(back.tr, 1000.0);
        assert_eq!(back.expected_payload_len(), 4 * 4 * 2 * 2);
    }

    #[test]
    fn header_accepts_legacy_sender_encodings() {
        // Legacy senders wrap the affine in a JSON string and send the TR
        // as a decimal string.
        let raw = r#"{
            "volIdx": 0,
            "dtype": "int16",
            "shape": [64, 64, 18],
            "affine": "[[1.0,0.0,0.0,0.0],[0.0,1.0,0.0,0.0],[0.0,0.0,1.0,0.0],[0.0,0.0,0.0,1.0]]",
            "TR": "1000"
        }"#;
        let header = VolumeHeader::from_json(raw.as_bytes()).unwrap();
        assert_eq!(header.affine, AffineHelper::identity());
        assert_eq!(header.tr, 1000.0);
    }

    #[test]
    fn header_missing_field_is_a_protocol_violation() {
        let raw = r#"{"volIdx": 0, "dtype": "int16", "shape": [2, 2, 2]}"#;
        let err = VolumeHeader::from_json(raw.as_bytes()).unwrap_err();
        assert!(matches!(err, ScanError::Protocol(_)));
    }

    #[test]
    fn format_rejects_shape_and_dtype_changes() {
        let format = SeriesFormat::from_header(&sample_header());
        let mut changed = sample_header();
        changed.shape = [4, 4, 3];
        assert!(format.ensure_matches(&changed).is_err());

        let mut changed = sample_header();
        changed.dtype = VoxelDtype::Float32;
        assert!(format.ensure_matches(&changed).is_err());

        assert!(format.ensure_matches(&sample_header()).is_ok());
    }
}
