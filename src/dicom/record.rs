//! In-memory data set model.
//!
//! A [`Record`] is one parsed file: the file meta group, the main data set
//! and the transfer syntax the data set was read with. Values are kept as
//! raw little-endian bytes so that attributes this tool never touches are
//! written back exactly as they were read.

use std::collections::BTreeMap;

use super::tag::{tags, Tag};
use super::vr::Vr;

/// Transfer syntax UID for Implicit VR Little Endian.
pub const IMPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2";
/// Transfer syntax UID for Explicit VR Little Endian.
pub const EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1";
/// Transfer syntax UID for Deflated Explicit VR Little Endian.
pub const DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN: &str = "1.2.840.10008.1.2.1.99";
/// Transfer syntax UID for Explicit VR Big Endian (retired).
pub const EXPLICIT_VR_BIG_ENDIAN: &str = "1.2.840.10008.1.2.2";

/// The encoding a data set was read with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransferSyntax {
    ImplicitVrLittleEndian,
    ExplicitVrLittleEndian,
    /// Explicit VR little endian with encapsulated (compressed) pixel data.
    Encapsulated(String),
}

impl TransferSyntax {
    /// Classifies a transfer syntax UID.
    ///
    /// Returns `None` for encodings whose data set cannot be parsed as
    /// little-endian elements (big endian, deflated).
    pub fn from_uid(uid: &str) -> Option<Self> {
        match uid {
            IMPLICIT_VR_LITTLE_ENDIAN => Some(Self::ImplicitVrLittleEndian),
            EXPLICIT_VR_LITTLE_ENDIAN => Some(Self::ExplicitVrLittleEndian),
            DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN | EXPLICIT_VR_BIG_ENDIAN => None,
            other => Some(Self::Encapsulated(other.to_string())),
        }
    }

    /// Returns the UID string.
    pub fn uid(&self) -> &str {
        match self {
            Self::ImplicitVrLittleEndian => IMPLICIT_VR_LITTLE_ENDIAN,
            Self::ExplicitVrLittleEndian => EXPLICIT_VR_LITTLE_ENDIAN,
            Self::Encapsulated(uid) => uid,
        }
    }

    /// Returns true if elements carry their VR in the stream.
    pub fn is_explicit_vr(&self) -> bool {
        !matches!(self, Self::ImplicitVrLittleEndian)
    }

    /// Returns true if pixel data is stored as uncompressed native samples.
    pub fn is_native(&self) -> bool {
        !matches!(self, Self::Encapsulated(_))
    }
}

/// An element value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Raw value bytes, without trailing padding added by the writer.
    Bytes(Vec<u8>),
    /// Sequence items, each a nested data set.
    Sequence(Vec<DataSet>),
    /// Encapsulated pixel data fragments (the first is the offset table).
    Fragments(Vec<Vec<u8>>),
}

/// A single data element.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    pub tag: Tag,
    pub vr: Vr,
    pub value: Value,
}

impl Element {
    /// Creates an element holding raw bytes.
    pub fn new(tag: Tag, vr: Vr, bytes: Vec<u8>) -> Self {
        Self {
            tag,
            vr,
            value: Value::Bytes(bytes),
        }
    }

    /// Creates a character string element.
    pub fn text(tag: Tag, vr: Vr, value: &str) -> Self {
        Self::new(tag, vr, value.as_bytes().to_vec())
    }

    /// Creates an unsigned short element.
    pub fn u16(tag: Tag, value: u16) -> Self {
        Self::new(tag, Vr::US, value.to_le_bytes().to_vec())
    }

    /// Creates a sequence element.
    pub fn sequence(tag: Tag, items: Vec<DataSet>) -> Self {
        Self {
            tag,
            vr: Vr::SQ,
            value: Value::Sequence(items),
        }
    }

    /// Returns the raw bytes of a non-sequence value.
    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.value {
            Value::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Decodes the value as a string, trimming trailing padding.
    pub fn as_str(&self) -> Option<String> {
        let bytes = self.bytes()?;
        let text = String::from_utf8_lossy(bytes);
        Some(
            text.trim_end_matches(|c: char| c == ' ' || c == '\0')
                .to_string(),
        )
    }

    /// Decodes the first value as an integer.
    ///
    /// Binary integer VRs are read little-endian; IS/DS strings are parsed.
    /// `UN` values (implicit data sets with unknown attributes) are read as
    /// an unsigned short when they are exactly two bytes long.
    pub fn as_int(&self) -> Option<i64> {
        let bytes = self.bytes()?;
        match self.vr {
            Vr::US => bytes
                .get(..2)
                .map(|b| u16::from_le_bytes([b[0], b[1]]) as i64),
            Vr::SS => bytes
                .get(..2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]) as i64),
            Vr::UL => bytes
                .get(..4)
                .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64),
            Vr::SL => bytes
                .get(..4)
                .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64),
            Vr::IS | Vr::DS => {
                let text = self.as_str()?;
                let first = text.split('\\').next()?.trim();
                first
                    .parse::<i64>()
                    .ok()
                    .or_else(|| first.parse::<f64>().ok().map(|v| v as i64))
            }
            Vr::UN if bytes.len() == 2 => Some(u16::from_le_bytes([bytes[0], bytes[1]]) as i64),
            _ => None,
        }
    }

    /// Length in bytes of a non-sequence value (before padding).
    pub fn value_len(&self) -> usize {
        match &self.value {
            Value::Bytes(bytes) => bytes.len(),
            Value::Sequence(_) | Value::Fragments(_) => 0,
        }
    }
}

/// An ordered set of elements keyed by tag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataSet {
    elements: BTreeMap<Tag, Element>,
}

impl DataSet {
    /// Creates an empty data set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an element, returning the previous one.
    pub fn put(&mut self, element: Element) -> Option<Element> {
        self.elements.insert(element.tag, element)
    }

    /// Looks up an element.
    pub fn get(&self, tag: Tag) -> Option<&Element> {
        self.elements.get(&tag)
    }

    /// Looks up an element for modification.
    pub fn get_mut(&mut self, tag: Tag) -> Option<&mut Element> {
        self.elements.get_mut(&tag)
    }

    /// Returns true if the tag is present.
    pub fn contains(&self, tag: Tag) -> bool {
        self.elements.contains_key(&tag)
    }

    /// Removes an element.
    pub fn remove(&mut self, tag: Tag) -> Option<Element> {
        self.elements.remove(&tag)
    }

    /// Iterates over elements in tag order.
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    /// Returns true if the data set has no elements.
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Convenience: string value of a tag.
    pub fn get_str(&self, tag: Tag) -> Option<String> {
        self.get(tag).and_then(Element::as_str)
    }

    /// Convenience: integer value of a tag.
    pub fn get_int(&self, tag: Tag) -> Option<i64> {
        self.get(tag).and_then(Element::as_int)
    }

    /// Convenience: sets a string value.
    pub fn put_str(&mut self, tag: Tag, vr: Vr, value: &str) {
        self.put(Element::text(tag, vr, value));
    }

    /// Convenience: sets an unsigned short value.
    pub fn put_u16(&mut self, tag: Tag, value: u16) {
        self.put(Element::u16(tag, value));
    }
}

/// A parsed file: meta group, main data set and its transfer syntax.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// File meta information (group 0002).
    pub meta: DataSet,
    /// The main data set.
    pub dataset: DataSet,
    /// Encoding the data set was read with.
    pub transfer_syntax: TransferSyntax,
}

impl Record {
    /// Creates an empty record that will be written as explicit VR little endian.
    pub fn new() -> Self {
        let mut meta = DataSet::new();
        meta.put_str(tags::TRANSFER_SYNTAX_UID, Vr::UI, EXPLICIT_VR_LITTLE_ENDIAN);
        Self {
            meta,
            dataset: DataSet::new(),
            transfer_syntax: TransferSyntax::ExplicitVrLittleEndian,
        }
    }

    /// Returns true if the record carries a pixel data element.
    pub fn has_pixel_data(&self) -> bool {
        self.dataset.contains(tags::PIXEL_DATA)
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}
