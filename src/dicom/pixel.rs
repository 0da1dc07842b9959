//! Native pixel buffers and their descriptive attributes.
//!
//! Only single-frame, single-sample, uncompressed pixel data is decoded.
//! The attributes describing the buffer (rows, columns, samples per pixel,
//! photometric interpretation, bit depths, pixel representation) are always
//! derived from the buffer itself and written together, so a record never
//! declares a shape or depth its pixel bytes do not have.

use std::path::Path;

use ndarray::Array2;
use serde::Serialize;

use super::record::{DataSet, Element, Record, Value};
use super::tag::{tags, Tag};
use super::vr::Vr;
use crate::error::ScrubError;

/// Element type of a native pixel buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelElement {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
}

impl PixelElement {
    /// Derives the element type from BitsAllocated and PixelRepresentation.
    pub fn from_attributes(bits_allocated: i64, pixel_representation: i64) -> Option<Self> {
        let signed = pixel_representation == 1;
        match (bits_allocated, signed) {
            (8, false) => Some(Self::U8),
            (8, true) => Some(Self::I8),
            (16, false) => Some(Self::U16),
            (16, true) => Some(Self::I16),
            (32, false) => Some(Self::U32),
            (32, true) => Some(Self::I32),
            _ => None,
        }
    }

    /// Width of one sample in bytes.
    pub fn bytes(&self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 => 4,
        }
    }

    /// Returns true for two's complement samples.
    pub fn is_signed(&self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32)
    }
}

/// A single-channel native pixel buffer, shaped (rows, columns).
#[derive(Clone, Debug, PartialEq)]
pub enum NativePixels {
    U8(Array2<u8>),
    I8(Array2<i8>),
    U16(Array2<u16>),
    I16(Array2<i16>),
    U32(Array2<u32>),
    I32(Array2<i32>),
}

/// Applies the same expression to whichever array a [`NativePixels`] holds.
macro_rules! each_array {
    ($pixels:expr, $arr:ident => $body:expr) => {
        match $pixels {
            NativePixels::U8($arr) => $body,
            NativePixels::I8($arr) => $body,
            NativePixels::U16($arr) => $body,
            NativePixels::I16($arr) => $body,
            NativePixels::U32($arr) => $body,
            NativePixels::I32($arr) => $body,
        }
    };
}

impl NativePixels {
    /// The element type of the buffer.
    pub fn element(&self) -> PixelElement {
        match self {
            Self::U8(_) => PixelElement::U8,
            Self::I8(_) => PixelElement::I8,
            Self::U16(_) => PixelElement::U16,
            Self::I16(_) => PixelElement::I16,
            Self::U32(_) => PixelElement::U32,
            Self::I32(_) => PixelElement::I32,
        }
    }

    /// (rows, columns).
    pub fn shape(&self) -> (usize, usize) {
        each_array!(self, a => a.dim())
    }

    /// Samples widened to f64 in row-major order.
    pub fn values(&self) -> Vec<f64> {
        each_array!(self, a => a.iter().map(|&v| v as f64).collect())
    }

    /// Minimum and maximum sample value, or `None` for an empty buffer.
    pub fn value_range(&self) -> Option<(f64, f64)> {
        each_array!(self, a => {
            let mut iter = a.iter().map(|&v| v as f64);
            let first = iter.next()?;
            Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
        })
    }

    /// Little-endian sample bytes in row-major order.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        each_array!(self, a => a.iter().flat_map(|v| v.to_le_bytes()).collect())
    }

    /// Builds a buffer of the given element type from row-major samples,
    /// converting each with `as` cast semantics.
    pub fn from_samples(
        element: PixelElement,
        rows: usize,
        columns: usize,
        samples: impl Iterator<Item = i64>,
    ) -> Result<Self, ScrubError> {
        let pixels = match element {
            PixelElement::U8 => Self::U8(shaped(rows, columns, samples.map(|v| v as u8))?),
            PixelElement::I8 => Self::I8(shaped(rows, columns, samples.map(|v| v as i8))?),
            PixelElement::U16 => Self::U16(shaped(rows, columns, samples.map(|v| v as u16))?),
            PixelElement::I16 => Self::I16(shaped(rows, columns, samples.map(|v| v as i16))?),
            PixelElement::U32 => Self::U32(shaped(rows, columns, samples.map(|v| v as u32))?),
            PixelElement::I32 => Self::I32(shaped(rows, columns, samples.map(|v| v as i32))?),
        };
        Ok(pixels)
    }
}

fn shaped<T>(
    rows: usize,
    columns: usize,
    samples: impl Iterator<Item = T>,
) -> Result<Array2<T>, ScrubError> {
    Array2::from_shape_vec((rows, columns), samples.collect())
        .map_err(|e| ScrubError::Reconstruction(format!("pixel buffer shape: {}", e)))
}

/// Decodes the native pixel buffer of a record.
///
/// # Errors
/// - `MissingPixelData` if the record has no (7FE0,0010) element
/// - `UnsupportedPixelFormat` for encapsulated data, multiple frames,
///   multiple samples per pixel, or unsupported bit depths
/// - `UnreadableFile` if the pixel bytes are shorter than declared
pub fn decode_pixels(record: &Record, path: &Path) -> Result<NativePixels, ScrubError> {
    let unsupported = |message: String| ScrubError::UnsupportedPixelFormat {
        path: path.to_path_buf(),
        message,
    };
    let ds = &record.dataset;

    let element = ds.get(tags::PIXEL_DATA).ok_or_else(|| ScrubError::MissingPixelData {
        path: path.to_path_buf(),
    })?;
    let bytes = match &element.value {
        Value::Bytes(bytes) => bytes,
        Value::Fragments(_) => {
            return Err(unsupported(format!(
                "encapsulated pixel data (transfer syntax {})",
                record.transfer_syntax.uid()
            )))
        }
        Value::Sequence(_) => return Err(unsupported("pixel data encoded as a sequence".into())),
    };

    let samples = ds.get_int(tags::SAMPLES_PER_PIXEL).unwrap_or(1);
    if samples != 1 {
        return Err(unsupported(format!("{} samples per pixel", samples)));
    }
    let frames = ds.get_int(tags::NUMBER_OF_FRAMES).unwrap_or(1);
    if frames > 1 {
        return Err(unsupported(format!("{} frames", frames)));
    }

    let rows = required_int(ds, tags::ROWS, "Rows", path)?;
    let columns = required_int(ds, tags::COLUMNS, "Columns", path)?;
    let bits_allocated = required_int(ds, tags::BITS_ALLOCATED, "BitsAllocated", path)?;
    let representation = ds.get_int(tags::PIXEL_REPRESENTATION).unwrap_or(0);
    let bits_stored = ds
        .get_int(tags::BITS_STORED)
        .unwrap_or(bits_allocated)
        .clamp(1, bits_allocated.max(1));

    let pixel_element = PixelElement::from_attributes(bits_allocated, representation)
        .ok_or_else(|| {
            unsupported(format!(
                "BitsAllocated {} with PixelRepresentation {}",
                bits_allocated, representation
            ))
        })?;

    for (name, value) in [("Rows", rows), ("Columns", columns)] {
        if value > i64::from(u16::MAX) {
            return Err(unsupported(format!("{} {} exceeds {}", name, value, u16::MAX)));
        }
    }

    let rows = rows as usize;
    let columns = columns as usize;
    let width = pixel_element.bytes();
    let needed = rows
        .checked_mul(columns)
        .and_then(|n| n.checked_mul(width))
        .ok_or_else(|| unsupported(format!("{}x{} pixels overflow", rows, columns)))?;
    if bytes.len() < needed {
        return Err(ScrubError::UnreadableFile {
            path: path.to_path_buf(),
            message: format!(
                "pixel data has {} bytes, {}x{} at {} bits needs {}",
                bytes.len(),
                rows,
                columns,
                bits_allocated,
                needed
            ),
        });
    }

    let stored = bits_stored as u32;
    let allocated = bits_allocated as u32;
    let signed = pixel_element.is_signed();
    let samples = bytes[..needed].chunks_exact(width).map(|chunk| {
        let mut raw = [0u8; 8];
        raw[..width].copy_from_slice(chunk);
        let raw = u64::from_le_bytes(raw);
        stored_value(raw, stored, allocated, signed)
    });

    NativePixels::from_samples(pixel_element, rows, columns, samples)
}

/// Keeps the low `stored` bits of a sample, sign-extending when signed.
fn stored_value(raw: u64, stored: u32, allocated: u32, signed: bool) -> i64 {
    let bits = stored.min(allocated);
    let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
    let value = raw & mask;
    if signed && bits < 64 && value & (1u64 << (bits - 1)) != 0 {
        (value | !mask) as i64
    } else {
        value as i64
    }
}

fn required_int(ds: &DataSet, tag: Tag, name: &str, path: &Path) -> Result<i64, ScrubError> {
    match ds.get_int(tag) {
        Some(v) if v > 0 => Ok(v),
        Some(v) => Err(ScrubError::UnsupportedPixelFormat {
            path: path.to_path_buf(),
            message: format!("{} is {}", name, v),
        }),
        None => Err(ScrubError::UnreadableFile {
            path: path.to_path_buf(),
            message: format!("{} {} is missing", name, tag),
        }),
    }
}

/// The descriptive attributes that must agree with a pixel buffer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PixelAttributes {
    pub rows: u16,
    pub columns: u16,
    pub samples_per_pixel: u16,
    pub photometric_interpretation: String,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub high_bit: u16,
    pub pixel_representation: u16,
}

impl PixelAttributes {
    /// Derives every attribute from the buffer.
    pub fn from_pixels(pixels: &NativePixels) -> Result<Self, ScrubError> {
        let (rows, columns) = pixels.shape();
        let dim = |v: usize, name: &str| {
            u16::try_from(v).map_err(|_| ScrubError::InconsistentPixelAttributes {
                message: format!("{} {} exceeds the 16-bit attribute range", name, v),
            })
        };
        let bits = (pixels.element().bytes() * 8) as u16;
        Ok(Self {
            rows: dim(rows, "rows")?,
            columns: dim(columns, "columns")?,
            samples_per_pixel: 1,
            photometric_interpretation: "MONOCHROME2".to_string(),
            bits_allocated: bits,
            bits_stored: bits,
            high_bit: bits - 1,
            pixel_representation: pixels.element().is_signed() as u16,
        })
    }

    /// Reads the attributes a data set currently declares.
    pub fn declared(ds: &DataSet) -> Self {
        let get = |tag| ds.get_int(tag).unwrap_or(0) as u16;
        Self {
            rows: get(tags::ROWS),
            columns: get(tags::COLUMNS),
            samples_per_pixel: ds.get_int(tags::SAMPLES_PER_PIXEL).unwrap_or(1) as u16,
            photometric_interpretation: ds
                .get_str(tags::PHOTOMETRIC_INTERPRETATION)
                .unwrap_or_default(),
            bits_allocated: get(tags::BITS_ALLOCATED),
            bits_stored: get(tags::BITS_STORED),
            high_bit: get(tags::HIGH_BIT),
            pixel_representation: get(tags::PIXEL_REPRESENTATION),
        }
    }

    /// Expected pixel data length in bytes.
    pub fn expected_len(&self) -> usize {
        self.rows as usize
            * self.columns as usize
            * self.samples_per_pixel as usize
            * (self.bits_allocated as usize).div_ceil(8)
    }
}

impl Record {
    /// Replaces the pixel data and every attribute that describes it.
    ///
    /// All values are computed before the data set is touched, so an error
    /// leaves the record unchanged.
    pub fn replace_pixels(&mut self, pixels: &NativePixels) -> Result<PixelAttributes, ScrubError> {
        let attrs = PixelAttributes::from_pixels(pixels)?;
        let bytes = pixels.to_le_bytes();
        let vr = if attrs.bits_allocated == 8 { Vr::OB } else { Vr::OW };

        let ds = &mut self.dataset;
        ds.put_u16(tags::ROWS, attrs.rows);
        ds.put_u16(tags::COLUMNS, attrs.columns);
        ds.put_u16(tags::SAMPLES_PER_PIXEL, attrs.samples_per_pixel);
        ds.put_str(
            tags::PHOTOMETRIC_INTERPRETATION,
            Vr::CS,
            &attrs.photometric_interpretation,
        );
        ds.put_u16(tags::BITS_ALLOCATED, attrs.bits_allocated);
        ds.put_u16(tags::BITS_STORED, attrs.bits_stored);
        ds.put_u16(tags::HIGH_BIT, attrs.high_bit);
        ds.put_u16(tags::PIXEL_REPRESENTATION, attrs.pixel_representation);
        ds.remove(tags::PLANAR_CONFIGURATION);
        ds.remove(tags::NUMBER_OF_FRAMES);
        ds.put(Element::new(tags::PIXEL_DATA, vr, bytes));

        Ok(attrs)
    }
}

/// Verifies that declared attributes match the pixel data length.
///
/// A single trailing pad byte is accepted, since odd-length values are
/// padded to an even length on disk.
pub fn check_pixel_consistency(record: &Record) -> Result<PixelAttributes, ScrubError> {
    let attrs = PixelAttributes::declared(&record.dataset);
    let actual = record
        .dataset
        .get(tags::PIXEL_DATA)
        .map(Element::value_len)
        .ok_or_else(|| ScrubError::InconsistentPixelAttributes {
            message: "pixel data is missing".to_string(),
        })?;
    let expected = attrs.expected_len();
    let padded = expected + expected % 2;
    if actual != expected && actual != padded {
        return Err(ScrubError::InconsistentPixelAttributes {
            message: format!(
                "{}x{} at {} bits needs {} bytes, pixel data has {}",
                attrs.rows, attrs.columns, attrs.bits_allocated, expected, actual
            ),
        });
    }
    if attrs.bits_stored > attrs.bits_allocated
        || attrs.high_bit as u32 + 1 != attrs.bits_stored as u32
    {
        return Err(ScrubError::InconsistentPixelAttributes {
            message: format!(
                "BitsAllocated {}, BitsStored {}, HighBit {} disagree",
                attrs.bits_allocated, attrs.bits_stored, attrs.high_bit
            ),
        });
    }
    Ok(attrs)
}
