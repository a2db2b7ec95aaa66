//! Minimal NIfTI-1 reader/writer covering what the pipeline needs: loading
//! a 3D ROI mask and archiving the received 4D series. Little-endian files
//! are written; both endians are read. Paths ending in `.nii.gz` are
//! gzip-compressed (autodetected on read).

use std::fs;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use byteordered::{ByteOrdered, Endianness};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array3, Array4, ShapeBuilder};

use crate::math::AffineHelper;
use crate::prelude::{ScanError, ScanResult};

const HEADER_SIZE: usize = 348;
const VOX_OFFSET: usize = 352;
const MAGIC_SINGLE: &[u8; 4] = b"n+1\0";
const MAGIC_PAIR: &[u8; 4] = b"ni1\0";

// NIfTI-1 datatype codes
const DT_UINT8: i16 = 2;
const DT_INT16: i16 = 4;
const DT_INT32: i16 = 8;
const DT_FLOAT32: i16 = 16;
const DT_FLOAT64: i16 = 64;
const DT_UINT16: i16 = 512;

/// Archive a full 4D series. Data is written as float32 in column-major
/// voxel order (x fastest), with the affine in the sform rows and the TR
/// (converted to seconds) in pixdim[4].
pub fn write_series(
    path: &Path,
    data: &Array4<f64>,
    affine: &[[f64; 4]; 4],
    tr_ms: f64,
) -> ScanResult<()> {
    let (nx, ny, nz, nt) = data.dim();
    let dims = [4i16, nx as i16, ny as i16, nz as i16, nt as i16, 1, 1, 1];
    let mut bytes = Vec::with_capacity(VOX_OFFSET + data.len() * 4);
    bytes.extend_from_slice(&build_header(dims, affine, tr_ms / 1000.0));
    bytes.extend_from_slice(&[0u8; 4]); // no header extensions
    for t in 0..nt {
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    bytes.extend_from_slice(&(data[[x, y, z, t]] as f32).to_le_bytes());
                }
            }
        }
    }
    write_maybe_gz(path, &bytes)
}

/// Write a single 3D volume (mask fixtures, generated ROIs).
pub fn write_volume(path: &Path, data: &Array3<f64>, affine: &[[f64; 4]; 4]) -> ScanResult<()> {
    let (nx, ny, nz) = data.dim();
    let dims = [3i16, nx as i16, ny as i16, nz as i16, 1, 1, 1, 1];
    let mut bytes = Vec::with_capacity(VOX_OFFSET + data.len() * 4);
    bytes.extend_from_slice(&build_header(dims, affine, 0.0));
    bytes.extend_from_slice(&[0u8; 4]);
    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                bytes.extend_from_slice(&(data[[x, y, z]] as f32).to_le_bytes());
            }
        }
    }
    write_maybe_gz(path, &bytes)
}

/// Load a 3D volume and its affine. Trailing singleton dimensions are
/// accepted; anything else is rejected as not being a 3D image.
pub fn read_volume(path: &Path) -> ScanResult<(Array3<f64>, [[f64; 4]; 4])> {
    let raw = fs::read(path).map_err(ScanError::Io)?;
    let bytes = if raw.starts_with(&[0x1f, 0x8b]) {
        let mut decoded = Vec::new();
        GzDecoder::new(Cursor::new(raw))
            .read_to_end(&mut decoded)
            .map_err(|err| ScanError::Nifti(format!("gzip decode failed: {}", err)))?;
        decoded
    } else {
        raw
    };
    if bytes.len() < HEADER_SIZE {
        return Err(ScanError::Nifti(format!(
            "file is {} bytes, smaller than a NIfTI-1 header",
            bytes.len()
        )));
    }

    let endianness = detect_endianness(&bytes)?;
    let magic = &bytes[344..348];
    if magic != MAGIC_SINGLE && magic != MAGIC_PAIR {
        return Err(ScanError::Nifti(format!(
            "unrecognized magic bytes {:?}",
            magic
        )));
    }

    let mut dim_reader = ByteOrdered::runtime(&bytes[40..], endianness);
    let mut dim = [0i16; 8];
    for value in dim.iter_mut() {
        *value = dim_reader.read_i16().map_err(read_err)?;
    }
    let rank = dim[0];
    if !(3..=7).contains(&rank) {
        return Err(ScanError::Nifti(format!("expected a 3D image, rank {}", rank)));
    }
    for extra in dim.iter().take(rank as usize + 1).skip(4) {
        if *extra > 1 {
            return Err(ScanError::Nifti(format!(
                "expected a 3D image, found trailing dimension {}",
                extra
            )));
        }
    }
    let (nx, ny, nz) = (dim[1] as usize, dim[2] as usize, dim[3] as usize);
    if nx == 0 || ny == 0 || nz == 0 {
        return Err(ScanError::Nifti("image has a zero-length axis".into()));
    }

    let datatype = ByteOrdered::runtime(&bytes[70..], endianness)
        .read_i16()
        .map_err(read_err)?;

    let mut pixdim_reader = ByteOrdered::runtime(&bytes[76..], endianness);
    let mut pixdim = [0f32; 8];
    for value in pixdim.iter_mut() {
        *value = pixdim_reader.read_f32().map_err(read_err)?;
    }

    let mut scale_reader = ByteOrdered::runtime(&bytes[108..], endianness);
    let vox_offset = scale_reader.read_f32().map_err(read_err)? as usize;
    let scl_slope = scale_reader.read_f32().map_err(read_err)?;
    let scl_inter = scale_reader.read_f32().map_err(read_err)?;
    let slope = if scl_slope == 0.0 {
        1.0
    } else {
        f64::from(scl_slope)
    };
    let inter = f64::from(scl_inter);

    let sform_code = ByteOrdered::runtime(&bytes[254..], endianness)
        .read_i16()
        .map_err(read_err)?;
    let affine = if sform_code > 0 {
        let mut srow_reader = ByteOrdered::runtime(&bytes[280..], endianness);
        let mut affine = [[0.0f64; 4]; 4];
        for row in affine.iter_mut().take(3) {
            for cell in row.iter_mut() {
                *cell = f64::from(srow_reader.read_f32().map_err(read_err)?);
            }
        }
        affine[3][3] = 1.0;
        affine
    } else {
        // fall back to a scaling affine from the voxel dims
        let mut affine = AffineHelper::identity();
        for axis in 0..3 {
            affine[axis][axis] = f64::from(pixdim[axis + 1]);
        }
        affine
    };

    let count = nx * ny * nz;
    let element_size = element_size(datatype)?;
    let data_end = vox_offset + count * element_size;
    if vox_offset < HEADER_SIZE || bytes.len() < data_end {
        return Err(ScanError::Nifti(format!(
            "file truncated: need {} bytes, have {}",
            data_end,
            bytes.len()
        )));
    }
    let mut values = decode_elements(&bytes[vox_offset..data_end], datatype, endianness, count)?;
    if slope != 1.0 || inter != 0.0 {
        for value in values.iter_mut() {
            *value = *value * slope + inter;
        }
    }

    // NIfTI data is stored column-major (x fastest)
    let data = Array3::from_shape_vec((nx, ny, nz).f(), values)
        .map_err(|err| ScanError::Nifti(format!("shape mismatch: {}", err)))?;
    Ok((data, affine))
}

fn detect_endianness(bytes: &[u8]) -> ScanResult<Endianness> {
    let le = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if le == HEADER_SIZE as i32 {
        return Ok(Endianness::Little);
    }
    let be = i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if be == HEADER_SIZE as i32 {
        return Ok(Endianness::Big);
    }
    Err(ScanError::Nifti(format!(
        "sizeof_hdr is {} in either byte order, expected 348",
        le
    )))
}

fn element_size(datatype: i16) -> ScanResult<usize> {
    match datatype {
        DT_UINT8 => Ok(1),
        DT_INT16 | DT_UINT16 => Ok(2),
        DT_INT32 | DT_FLOAT32 => Ok(4),
        DT_FLOAT64 => Ok(8),
        other => Err(ScanError::Nifti(format!(
            "unsupported NIfTI datatype code {}",
            other
        ))),
    }
}

fn decode_elements(
    bytes: &[u8],
    datatype: i16,
    endianness: Endianness,
    count: usize,
) -> ScanResult<Vec<f64>> {
    let mut reader = ByteOrdered::runtime(bytes, endianness);
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let value = match datatype {
            DT_UINT8 => f64::from(reader.read_u8().map_err(read_err)?),
            DT_INT16 => f64::from(reader.read_i16().map_err(read_err)?),
            DT_UINT16 => f64::from(reader.read_u16().map_err(read_err)?),
            DT_INT32 => f64::from(reader.read_i32().map_err(read_err)?),
            DT_FLOAT32 => f64::from(reader.read_f32().map_err(read_err)?),
            DT_FLOAT64 => reader.read_f64().map_err(read_err)?,
            other => {
                return Err(ScanError::Nifti(format!(
                    "unsupported NIfTI datatype code {}",
                    other
                )))
            }
        };
        values.push(value);
    }
    Ok(values)
}

fn read_err(err: std::io::Error) -> ScanError {
    ScanError::Nifti(format!("header read failed: {}", err))
}

fn build_header(dim: [i16; 8], affine: &[[f64; 4]; 4], t_step_s: f64) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&(HEADER_SIZE as i32).to_le_bytes());

    for (index, value) in dim.iter().enumerate() {
        let offset = 40 + index * 2;
        header[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    header[70..72].copy_from_slice(&DT_FLOAT32.to_le_bytes());
    header[72..74].copy_from_slice(&32i16.to_le_bytes()); // bitpix

    let voxel_dims = AffineHelper::voxel_dims(affine);
    let pixdim: [f32; 8] = [
        1.0,
        voxel_dims[0] as f32,
        voxel_dims[1] as f32,
        voxel_dims[2] as f32,
        t_step_s as f32,
        1.0,
        1.0,
        1.0,
    ];
    for (index, value) in pixdim.iter().enumerate() {
        let offset = 76 + index * 4;
        header[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    header[108..112].copy_from_slice(&(VOX_OFFSET as f32).to_le_bytes());
    header[112..116].copy_from_slice(&1.0f32.to_le_bytes()); // scl_slope
    header[116..120].copy_from_slice(&0.0f32.to_le_bytes()); // scl_inter
    header[123] = 2 | 8; // spatial mm, temporal sec

    header[254..256].copy_from_slice(&1i16.to_le_bytes()); // sform_code: scanner
    for (row, offset) in [(0usize, 280usize), (1, 296), (2, 312)] {
        for col in 0..4 {
            let cell_offset = offset + col * 4;
            header[cell_offset..cell_offset + 4]
                .copy_from_slice(&(affine[row][col] as f32).to_le_bytes());
        }
    }

    header[344..348].copy_from_slice(MAGIC_SINGLE);
    header
}

fn write_maybe_gz(path: &Path, bytes: &[u8]) -> ScanResult<()> {
    let is_gz = path
        .to_string_lossy()
        .to_ascii_lowercase()
        .ends_with(".nii.gz");
    if is_gz {
        let file = fs::File::create(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(bytes)?;
        encoder
            .finish()
            .map_err(|err| ScanError::Nifti(format!("gzip encode failed: {}", err)))?;
        Ok(())
    } else {
        fs::write(path, bytes)?;
        Ok(())
    }
}
