//! NIfTI-1 volume reader and writer
//!
//! Supports single-file volumes (`.nii`) and their gzip-compressed form
//! (`.nii.gz`, detected by magic bytes), either byte order, and the integer
//! and float datatypes that Decathlon images and labels use. Intensity
//! scaling (`scl_slope`/`scl_inter`) is applied on read.
//!
//! Volumes are returned as `[channel, x, y, z]`. On disk the x index varies
//! fastest; 3-D files load with one channel and 4-D files with `dim[4]`
//! channels.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use ndarray::{Array4, ArrayView4};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

use crate::error::{Error, Result};

/// Size of a NIfTI-1 header in bytes.
pub const HEADER_SIZE: usize = 348;

/// Data offset written for single-file volumes (header + empty extension flag).
const VOX_OFFSET: usize = 352;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// Header field offsets
const OFF_DIM: usize = 40;
const OFF_DATATYPE: usize = 70;
const OFF_BITPIX: usize = 72;
const OFF_PIXDIM: usize = 76;
const OFF_VOX_OFFSET: usize = 108;
const OFF_SCL_SLOPE: usize = 112;
const OFF_SCL_INTER: usize = 116;
const OFF_MAGIC: usize = 344;

/// Volume decoding failures
#[derive(Debug, Error)]
pub enum NiftiError {
    #[error("file is truncated")]
    Truncated,

    #[error("not a NIfTI-1 file (sizeof_hdr = {0})")]
    BadHeaderSize(i32),

    #[error("unrecognised magic {0:?} (expected \"n+1\" or \"ni1\")")]
    BadMagic([u8; 4]),

    #[error("paired .hdr/.img volumes are not supported")]
    PairedFile,

    #[error("unsupported datatype code {0}")]
    UnsupportedDatatype(i16),

    #[error("unsupported dimensions {0:?} (expected 3-D or 4-D)")]
    UnsupportedDims([i16; 8]),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// On-disk sample type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NiftiDType {
    U8,
    I8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl NiftiDType {
    fn from_code(code: i16) -> Option<Self> {
        Some(match code {
            2 => Self::U8,
            4 => Self::I16,
            8 => Self::I32,
            16 => Self::F32,
            64 => Self::F64,
            256 => Self::I8,
            512 => Self::U16,
            768 => Self::U32,
            _ => return None,
        })
    }

    /// NIfTI datatype code.
    pub fn code(self) -> i16 {
        match self {
            Self::U8 => 2,
            Self::I16 => 4,
            Self::I32 => 8,
            Self::F32 => 16,
            Self::F64 => 64,
            Self::I8 => 256,
            Self::U16 => 512,
            Self::U32 => 768,
        }
    }

    /// Bytes per sample.
    pub fn size(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

/// A decoded volume
#[derive(Clone, Debug, PartialEq)]
pub struct Volume {
    /// Samples as `[channel, x, y, z]`
    pub data: Array4<f32>,
    /// Voxel spacing along x, y, z
    pub spacing: [f32; 3],
}

impl Volume {
    /// Volume with unit spacing.
    pub fn new(data: Array4<f32>) -> Self {
        Self {
            data,
            spacing: [1.0; 3],
        }
    }

    /// Spatial shape `[x, y, z]`.
    pub fn spatial_shape(&self) -> [usize; 3] {
        let s = self.data.shape();
        [s[1], s[2], s[3]]
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.data.shape()[0]
    }
}

/// Endian-aware field reader over the raw file bytes
struct Fields<'a> {
    bytes: &'a [u8],
    big_endian: bool,
}

impl Fields<'_> {
    fn take<const N: usize>(&self, pos: usize) -> std::result::Result<[u8; N], NiftiError> {
        self.bytes
            .get(pos..pos + N)
            .and_then(|s| s.try_into().ok())
            .ok_or(NiftiError::Truncated)
    }

    fn i16(&self, pos: usize) -> std::result::Result<i16, NiftiError> {
        let b = self.take::<2>(pos)?;
        Ok(if self.big_endian { i16::from_be_bytes(b) } else { i16::from_le_bytes(b) })
    }

    fn f32(&self, pos: usize) -> std::result::Result<f32, NiftiError> {
        let b = self.take::<4>(pos)?;
        Ok(if self.big_endian { f32::from_be_bytes(b) } else { f32::from_le_bytes(b) })
    }
}

macro_rules! convert_samples {
    ($raw:expr, $big:expr, $t:ty, $n:literal) => {
        $raw.chunks_exact($n)
            .map(|chunk| {
                let mut b = [0u8; $n];
                b.copy_from_slice(chunk);
                let v = if $big { <$t>::from_be_bytes(b) } else { <$t>::from_le_bytes(b) };
                v as f32
            })
            .collect::<Vec<f32>>()
    };
}

fn decode_samples(raw: &[u8], dtype: NiftiDType, big_endian: bool) -> Vec<f32> {
    match dtype {
        NiftiDType::U8 => raw.iter().map(|&b| f32::from(b)).collect(),
        NiftiDType::I8 => raw.iter().map(|&b| f32::from(b as i8)).collect(),
        NiftiDType::I16 => convert_samples!(raw, big_endian, i16, 2),
        NiftiDType::U16 => convert_samples!(raw, big_endian, u16, 2),
        NiftiDType::I32 => convert_samples!(raw, big_endian, i32, 4),
        NiftiDType::U32 => convert_samples!(raw, big_endian, u32, 4),
        NiftiDType::F32 => convert_samples!(raw, big_endian, f32, 4),
        NiftiDType::F64 => convert_samples!(raw, big_endian, f64, 8),
    }
}

fn inflate_if_gzipped(bytes: Vec<u8>) -> std::result::Result<Vec<u8>, NiftiError> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes);
    }
    let mut out = Vec::with_capacity(bytes.len() * 4);
    GzDecoder::new(bytes.as_slice()).read_to_end(&mut out)?;
    Ok(out)
}

/// Decode a NIfTI-1 file already in memory (gzip or raw).
pub fn decode(bytes: Vec<u8>) -> std::result::Result<Volume, NiftiError> {
    let bytes = inflate_if_gzipped(bytes)?;
    if bytes.len() < HEADER_SIZE {
        return Err(NiftiError::Truncated);
    }

    let le = Fields { bytes: &bytes, big_endian: false };
    let sizeof_hdr = i32::from_le_bytes(le.take::<4>(0)?);
    let big_endian = match sizeof_hdr {
        348 => false,
        _ if i32::from_be_bytes(le.take::<4>(0)?) == 348 => true,
        other => return Err(NiftiError::BadHeaderSize(other)),
    };
    let fields = Fields { bytes: &bytes, big_endian };

    let magic = fields.take::<4>(OFF_MAGIC)?;
    match &magic {
        b"n+1\0" => {}
        b"ni1\0" => return Err(NiftiError::PairedFile),
        _ => return Err(NiftiError::BadMagic(magic)),
    }

    let mut dim = [0i16; 8];
    for (i, d) in dim.iter_mut().enumerate() {
        *d = fields.i16(OFF_DIM + 2 * i)?;
    }
    let ndim = dim[0];
    if !(3..=4).contains(&ndim) || dim[1..=ndim as usize].iter().any(|&d| d < 1) {
        return Err(NiftiError::UnsupportedDims(dim));
    }
    let [nx, ny, nz] = [dim[1], dim[2], dim[3]].map(|d| d as usize);
    let nc = if ndim == 4 { dim[4] as usize } else { 1 };

    let datatype = fields.i16(OFF_DATATYPE)?;
    let dtype = NiftiDType::from_code(datatype).ok_or(NiftiError::UnsupportedDatatype(datatype))?;

    let mut spacing = [1.0f32; 3];
    for (i, s) in spacing.iter_mut().enumerate() {
        *s = fields.f32(OFF_PIXDIM + 4 * (i + 1))?.abs();
    }

    // saturating cast: a corrupt offset must not wrap the range below
    let vox_offset = fields.f32(OFF_VOX_OFFSET)?.max(VOX_OFFSET as f32) as usize;
    let count = nx * ny * nz * nc;
    let end = count
        .checked_mul(dtype.size())
        .and_then(|n| vox_offset.checked_add(n))
        .ok_or(NiftiError::Truncated)?;
    let raw = bytes.get(vox_offset..end).ok_or(NiftiError::Truncated)?;
    let mut samples = decode_samples(raw, dtype, big_endian);

    let slope = fields.f32(OFF_SCL_SLOPE)?;
    let inter = fields.f32(OFF_SCL_INTER)?;
    if slope != 0.0 && slope.is_finite() && inter.is_finite() && (slope != 1.0 || inter != 0.0) {
        for v in &mut samples {
            *v = *v * slope + inter;
        }
    }

    // file order is [c][z][y][x]; reorder to [c, x, y, z]
    let data = Array4::from_shape_vec((nc, nz, ny, nx), samples)
        .map_err(|_| NiftiError::Truncated)?
        .permuted_axes([0, 3, 2, 1])
        .as_standard_layout()
        .into_owned();

    Ok(Volume { data, spacing })
}

/// Read a volume from disk.
pub fn read_volume(path: &Path) -> Result<Volume> {
    let wrap = |source: NiftiError| Error::Nifti {
        path: path.to_path_buf(),
        source,
    };
    let bytes = fs::read(path).map_err(|e| wrap(NiftiError::Io(e)))?;
    decode(bytes).map_err(wrap)
}

fn encode_samples(data: ArrayView4<'_, f32>, dtype: NiftiDType, out: &mut Vec<u8>) {
    // [c, x, y, z] -> file order with x fastest
    let file_order = data.permuted_axes([0, 3, 2, 1]);
    for &v in file_order.iter() {
        match dtype {
            NiftiDType::U8 => out.push(v as u8),
            NiftiDType::I8 => out.extend_from_slice(&(v as i8).to_le_bytes()),
            NiftiDType::I16 => out.extend_from_slice(&(v as i16).to_le_bytes()),
            NiftiDType::U16 => out.extend_from_slice(&(v as u16).to_le_bytes()),
            NiftiDType::I32 => out.extend_from_slice(&(v as i32).to_le_bytes()),
            NiftiDType::U32 => out.extend_from_slice(&(v as u32).to_le_bytes()),
            NiftiDType::F32 => out.extend_from_slice(&v.to_le_bytes()),
            NiftiDType::F64 => out.extend_from_slice(&f64::from(v).to_le_bytes()),
        }
    }
}

/// Encode a volume as an uncompressed little-endian single-file NIfTI-1.
pub fn encode(volume: &Volume, dtype: NiftiDType) -> Vec<u8> {
    let [nx, ny, nz] = volume.spatial_shape();
    let nc = volume.channels();
    let mut out = vec![0u8; VOX_OFFSET];

    let mut put = |pos: usize, bytes: &[u8]| out[pos..pos + bytes.len()].copy_from_slice(bytes);
    put(0, &(HEADER_SIZE as i32).to_le_bytes());
    let ndim: i16 = if nc > 1 { 4 } else { 3 };
    let dims = [ndim, nx as i16, ny as i16, nz as i16, nc as i16, 1, 1, 1];
    for (i, d) in dims.iter().enumerate() {
        put(OFF_DIM + 2 * i, &d.to_le_bytes());
    }
    put(OFF_DATATYPE, &dtype.code().to_le_bytes());
    put(OFF_BITPIX, &((dtype.size() * 8) as i16).to_le_bytes());
    let pixdim = [1.0, volume.spacing[0], volume.spacing[1], volume.spacing[2], 1.0, 1.0, 1.0, 1.0];
    for (i, p) in pixdim.iter().enumerate() {
        put(OFF_PIXDIM + 4 * i, &f32::to_le_bytes(*p));
    }
    put(OFF_VOX_OFFSET, &(VOX_OFFSET as f32).to_le_bytes());
    put(OFF_SCL_SLOPE, &1.0f32.to_le_bytes());
    put(OFF_MAGIC, b"n+1\0");

    out.reserve(volume.data.len() * dtype.size());
    encode_samples(volume.data.view(), dtype, &mut out);
    out
}

/// Write a volume; paths ending in `.gz` are gzip-compressed.
pub fn write_volume(path: &Path, volume: &Volume, dtype: NiftiDType) -> Result<()> {
    let bytes = encode(volume, dtype);
    let gzip = path.extension().is_some_and(|e| e == "gz");
    let io_err = |e| Error::io(format!("writing volume {}", path.display()), e);

    if gzip {
        let file = fs::File::create(path).map_err(io_err)?;
        let mut encoder = GzEncoder::new(file, Compression::fast());
        encoder.write_all(&bytes).map_err(io_err)?;
        encoder.finish().map_err(io_err)?;
    } else {
        fs::write(path, bytes).map_err(io_err)?;
    }
    Ok(())
}
