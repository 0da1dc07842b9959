//! DICOM file model for dcmscrub.
//!
//! This module is the structured-file layer the redaction pipeline works
//! through: it reads Part 10 files into a [`Record`], offers lookup and
//! overwrite by [`Tag`], decodes the native pixel buffer, and serializes
//! records back out with a fixed, uncompressed encoding.
//!
//! # Scope
//!
//! Only what de-identification needs is modelled. Values are kept as raw
//! bytes (sequences as nested data sets), so attributes that are never
//! touched survive a read/write cycle unchanged. Pixel decoding covers
//! single-frame, single-sample, uncompressed data at 8, 16 or 32 bits.
//!
//! # Example
//!
//! ```
//! use dcmscrub::dicom::{io_part10, tags, Record, Vr};
//!
//! let mut record = Record::new();
//! record.dataset.put_str(tags::PATIENT_NAME, Vr::PN, "DOE^JANE");
//!
//! let bytes = io_part10::to_part10_vec(&record)?;
//! let parsed = io_part10::from_part10_slice(&bytes)?;
//! assert_eq!(parsed.dataset.get_str(tags::PATIENT_NAME).as_deref(), Some("DOE^JANE"));
//! # Ok::<(), dcmscrub::ScrubError>(())
//! ```

pub mod io_part10;
mod pixel;
mod record;
mod tag;
mod vr;

pub use pixel::{check_pixel_consistency, decode_pixels, NativePixels, PixelAttributes, PixelElement};
pub use record::{
    DataSet, Element, Record, TransferSyntax, Value, EXPLICIT_VR_LITTLE_ENDIAN,
    IMPLICIT_VR_LITTLE_ENDIAN,
};
pub use tag::{tags, Tag};
pub use vr::{implicit_vr, Vr};
