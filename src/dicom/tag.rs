//! Two-part element identifiers.

use serde::{Serialize, Serializer};
use std::fmt;

/// A DICOM attribute tag: (group, element).
///
/// Tags order by group first, then element, which is also the order
/// elements must appear in a serialized dataset.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(pub u16, pub u16);

impl Tag {
    /// Creates a new tag.
    #[inline]
    pub const fn new(group: u16, element: u16) -> Self {
        Self(group, element)
    }

    /// Returns the group number.
    #[inline]
    pub fn group(&self) -> u16 {
        self.0
    }

    /// Returns the element number.
    #[inline]
    pub fn element(&self) -> u16 {
        self.1
    }

    /// Returns true for file meta information tags (group 0002).
    #[inline]
    pub fn is_meta(&self) -> bool {
        self.0 == 0x0002
    }

    /// Returns true for group length tags (gggg,0000).
    #[inline]
    pub fn is_group_length(&self) -> bool {
        self.1 == 0x0000
    }

    /// Returns true for the attributes that describe the pixel data
    /// and are rewritten whenever pixels are replaced.
    pub fn is_pixel_descriptive(&self) -> bool {
        matches!(
            *self,
            tags::SAMPLES_PER_PIXEL
                | tags::PHOTOMETRIC_INTERPRETATION
                | tags::PLANAR_CONFIGURATION
                | tags::NUMBER_OF_FRAMES
                | tags::ROWS
                | tags::COLUMNS
                | tags::BITS_ALLOCATED
                | tags::BITS_STORED
                | tags::HIGH_BIT
                | tags::PIXEL_REPRESENTATION
                | tags::PIXEL_DATA
        )
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({:04X},{:04X})", self.0, self.1)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.0, self.1)
    }
}

impl From<(u16, u16)> for Tag {
    fn from((group, element): (u16, u16)) -> Self {
        Self(group, element)
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Well-known tags used by the redaction pipeline.
pub mod tags {
    use super::Tag;

    pub const FILE_META_GROUP_LENGTH: Tag = Tag::new(0x0002, 0x0000);
    pub const FILE_META_VERSION: Tag = Tag::new(0x0002, 0x0001);
    pub const MEDIA_STORAGE_SOP_CLASS_UID: Tag = Tag::new(0x0002, 0x0002);
    pub const MEDIA_STORAGE_SOP_INSTANCE_UID: Tag = Tag::new(0x0002, 0x0003);
    pub const TRANSFER_SYNTAX_UID: Tag = Tag::new(0x0002, 0x0010);
    pub const IMPLEMENTATION_CLASS_UID: Tag = Tag::new(0x0002, 0x0012);

    pub const SOP_CLASS_UID: Tag = Tag::new(0x0008, 0x0016);
    pub const SOP_INSTANCE_UID: Tag = Tag::new(0x0008, 0x0018);
    pub const STUDY_DATE: Tag = Tag::new(0x0008, 0x0020);
    pub const MODALITY: Tag = Tag::new(0x0008, 0x0060);
    pub const INSTITUTION_NAME: Tag = Tag::new(0x0008, 0x0080);
    pub const REFERRING_PHYSICIAN_NAME: Tag = Tag::new(0x0008, 0x0090);

    pub const PATIENT_NAME: Tag = Tag::new(0x0010, 0x0010);
    pub const PATIENT_ID: Tag = Tag::new(0x0010, 0x0020);
    pub const PATIENT_BIRTH_DATE: Tag = Tag::new(0x0010, 0x0030);
    pub const PATIENT_SEX: Tag = Tag::new(0x0010, 0x0040);

    pub const SAMPLES_PER_PIXEL: Tag = Tag::new(0x0028, 0x0002);
    pub const PHOTOMETRIC_INTERPRETATION: Tag = Tag::new(0x0028, 0x0004);
    pub const PLANAR_CONFIGURATION: Tag = Tag::new(0x0028, 0x0006);
    pub const NUMBER_OF_FRAMES: Tag = Tag::new(0x0028, 0x0008);
    pub const ROWS: Tag = Tag::new(0x0028, 0x0010);
    pub const COLUMNS: Tag = Tag::new(0x0028, 0x0011);
    pub const BITS_ALLOCATED: Tag = Tag::new(0x0028, 0x0100);
    pub const BITS_STORED: Tag = Tag::new(0x0028, 0x0101);
    pub const HIGH_BIT: Tag = Tag::new(0x0028, 0x0102);
    pub const PIXEL_REPRESENTATION: Tag = Tag::new(0x0028, 0x0103);

    pub const PIXEL_DATA: Tag = Tag::new(0x7FE0, 0x0010);

    pub const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
    pub const ITEM_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE00D);
    pub const SEQUENCE_DELIMITATION: Tag = Tag::new(0xFFFE, 0xE0DD);
}
