//! DICOM Part 10 file reader and writer.
//!
//! Reading accepts Implicit VR Little Endian and Explicit VR Little Endian
//! data sets, plus explicit little-endian data sets with encapsulated pixel
//! data (kept as opaque fragments). Writing always produces Explicit VR
//! Little Endian, regardless of how the record was read.
//!
//! # File Layout
//!
//! - 128-byte preamble followed by the `DICM` magic
//! - File meta group (0002,xxxx), always explicit VR little endian
//! - The data set, encoded per the meta group's transfer syntax
//!
//! Malformed or truncated input produces an error, never a panic; this is
//! exercised by the `part10_parse` fuzz target.

use std::fs;
use std::path::Path;

use super::record::{
    DataSet, Element, Record, TransferSyntax, Value, EXPLICIT_VR_LITTLE_ENDIAN,
    IMPLICIT_VR_LITTLE_ENDIAN,
};
use super::tag::{tags, Tag};
use super::vr::{implicit_vr, Vr};
use crate::error::ScrubError;

const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";
const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const MAX_NESTING: usize = 32;

/// Implementation class UID written into the meta group when absent.
const IMPLEMENTATION_CLASS_UID: &str = "2.25.302113836534582215466843574926185349105";

// ============================================================================
// Public API
// ============================================================================

/// Reads a record from a Part 10 file.
///
/// # Errors
/// Returns `UnreadableFile` for I/O failures and malformed content, and
/// `UnsupportedPixelFormat` for transfer syntaxes whose data set cannot be
/// decoded (big endian, deflated).
pub fn read_part10(path: &Path) -> Result<Record, ScrubError> {
    let bytes = fs::read(path).map_err(|e| ScrubError::UnreadableFile {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse(&bytes, path)
}

/// Writes a record to a Part 10 file as Explicit VR Little Endian.
pub fn write_part10(path: &Path, record: &Record) -> Result<(), ScrubError> {
    let bytes = encode(record, path)?;
    fs::write(path, bytes).map_err(|e| ScrubError::Serialization {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Reads a record from Part 10 bytes.
///
/// Useful for testing and fuzzing without file I/O.
pub fn from_part10_slice(bytes: &[u8]) -> Result<Record, ScrubError> {
    parse(bytes, Path::new("<bytes>"))
}

/// Encodes a record as Part 10 bytes (Explicit VR Little Endian).
pub fn to_part10_vec(record: &Record) -> Result<Vec<u8>, ScrubError> {
    encode(record, Path::new("<bytes>"))
}

// ============================================================================
// Reading
// ============================================================================

enum ReadFailure {
    Malformed(String),
    Unsupported(String),
}

impl From<String> for ReadFailure {
    fn from(message: String) -> Self {
        ReadFailure::Malformed(message)
    }
}

fn parse(bytes: &[u8], path: &Path) -> Result<Record, ScrubError> {
    parse_record(bytes).map_err(|failure| match failure {
        ReadFailure::Malformed(message) => ScrubError::UnreadableFile {
            path: path.to_path_buf(),
            message,
        },
        ReadFailure::Unsupported(message) => ScrubError::UnsupportedPixelFormat {
            path: path.to_path_buf(),
            message,
        },
    })
}

fn parse_record(bytes: &[u8]) -> Result<Record, ReadFailure> {
    if !has_part10_prefix(bytes) {
        return Err(ReadFailure::Malformed(
            "missing 128-byte preamble and DICM prefix".to_string(),
        ));
    }

    let mut cursor = Cursor::new(bytes, PREAMBLE_LEN + MAGIC.len());

    // The meta group is always explicit VR little endian.
    let mut meta = DataSet::new();
    while cursor.remaining() >= 4 && cursor.peek_tag()?.is_meta() {
        let element = read_element(&mut cursor, true, 0)?;
        meta.put(element);
    }

    let transfer_syntax = match meta.get_str(tags::TRANSFER_SYNTAX_UID) {
        Some(uid) => TransferSyntax::from_uid(uid.trim())
            .ok_or_else(|| ReadFailure::Unsupported(format!("transfer syntax {}", uid.trim())))?,
        None => TransferSyntax::ImplicitVrLittleEndian,
    };

    let dataset = read_dataset(
        &mut cursor,
        transfer_syntax.is_explicit_vr(),
        DataSetEnd::EndOfInput,
        0,
    )?;

    Ok(Record {
        meta,
        dataset,
        transfer_syntax,
    })
}

/// Fuzz-only entrypoint for parsing a bare data set (no preamble or meta group).
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_dataset(bytes: &[u8], explicit: bool) -> Result<(), String> {
    let mut cursor = Cursor::new(bytes, 0);
    read_dataset(&mut cursor, explicit, DataSetEnd::EndOfInput, 0).map_err(|e| match e {
        ReadFailure::Malformed(m) | ReadFailure::Unsupported(m) => m,
    })?;
    Ok(())
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        if len > self.remaining() {
            return Err(format!(
                "unexpected end of data at offset {} (wanted {} bytes, {} left)",
                self.pos,
                len,
                self.remaining()
            ));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u16(&mut self) -> Result<u16, String> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, String> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_tag(&mut self) -> Result<Tag, String> {
        let group = self.read_u16()?;
        let element = self.read_u16()?;
        Ok(Tag::new(group, element))
    }

    fn peek_tag(&self) -> Result<Tag, String> {
        let mut probe = Cursor::new(self.bytes, self.pos);
        probe.read_tag()
    }
}

#[derive(Clone, Copy)]
enum DataSetEnd {
    /// Top-level data set: runs to the end of the input.
    EndOfInput,
    /// Item with a defined length: runs to this absolute offset.
    Offset(usize),
    /// Item with undefined length: runs to an item delimitation tag.
    Delimited,
}

fn read_dataset(
    cursor: &mut Cursor<'_>,
    explicit: bool,
    end: DataSetEnd,
    depth: usize,
) -> Result<DataSet, ReadFailure> {
    let mut dataset = DataSet::new();
    loop {
        match end {
            DataSetEnd::EndOfInput if cursor.remaining() == 0 => break,
            DataSetEnd::Offset(limit) if cursor.pos >= limit => break,
            _ => {}
        }

        let tag = cursor.peek_tag()?;
        if tag == tags::ITEM_DELIMITATION {
            cursor.read_tag()?;
            cursor.read_u32()?;
            if matches!(end, DataSetEnd::Delimited) {
                break;
            }
            return Err(ReadFailure::Malformed(format!(
                "unexpected item delimitation at offset {}",
                cursor.pos
            )));
        }

        let element = read_element(cursor, explicit, depth)?;
        dataset.put(element);
    }
    Ok(dataset)
}

fn read_element(
    cursor: &mut Cursor<'_>,
    explicit: bool,
    depth: usize,
) -> Result<Element, ReadFailure> {
    let tag = cursor.read_tag()?;
    if tag.group() == 0xFFFE {
        return Err(ReadFailure::Malformed(format!(
            "unexpected delimiter {} outside a sequence",
            tag
        )));
    }

    let (mut vr, len) = if explicit {
        let code = cursor.take(2)?;
        let vr = Vr::from_code([code[0], code[1]]).ok_or_else(|| {
            format!(
                "unknown VR {:?} for {}",
                String::from_utf8_lossy(code),
                tag
            )
        })?;
        let len = if vr.has_long_length() {
            cursor.take(2)?;
            cursor.read_u32()?
        } else {
            cursor.read_u16()? as u32
        };
        (vr, len)
    } else {
        (implicit_vr(tag), cursor.read_u32()?)
    };

    if tag == tags::PIXEL_DATA && len == UNDEFINED_LENGTH {
        let fragments = read_fragments(cursor)?;
        return Ok(Element {
            tag,
            vr: Vr::OB,
            value: Value::Fragments(fragments),
        });
    }

    // An undefined length on anything but pixel data can only be a sequence;
    // UN with undefined length carries implicit VR items.
    let mut item_explicit = explicit;
    if len == UNDEFINED_LENGTH && vr != Vr::SQ {
        if vr == Vr::UN {
            item_explicit = false;
        }
        vr = Vr::SQ;
    }

    if vr == Vr::SQ {
        if depth >= MAX_NESTING {
            return Err(ReadFailure::Malformed(format!(
                "sequences nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        let items = read_sequence(cursor, item_explicit, len, depth + 1)?;
        return Ok(Element::sequence(tag, items));
    }

    let value = cursor.take(len as usize)?.to_vec();
    Ok(Element::new(tag, vr, value))
}

fn read_sequence(
    cursor: &mut Cursor<'_>,
    explicit: bool,
    len: u32,
    depth: usize,
) -> Result<Vec<DataSet>, ReadFailure> {
    let limit = if len == UNDEFINED_LENGTH {
        None
    } else {
        let limit = cursor.pos + len as usize;
        if limit > cursor.bytes.len() {
            return Err(ReadFailure::Malformed(format!(
                "sequence length {} runs past end of data",
                len
            )));
        }
        Some(limit)
    };

    let mut items = Vec::new();
    loop {
        if let Some(limit) = limit {
            if cursor.pos >= limit {
                break;
            }
        }

        let tag = cursor.read_tag()?;
        let item_len = cursor.read_u32()?;
        if tag == tags::SEQUENCE_DELIMITATION {
            if limit.is_none() {
                break;
            }
            continue;
        }
        if tag != tags::ITEM {
            return Err(ReadFailure::Malformed(format!(
                "expected sequence item, found {}",
                tag
            )));
        }

        let end = if item_len == UNDEFINED_LENGTH {
            DataSetEnd::Delimited
        } else {
            let item_end = cursor.pos + item_len as usize;
            if item_end > cursor.bytes.len() {
                return Err(ReadFailure::Malformed(format!(
                    "item length {} runs past end of data",
                    item_len
                )));
            }
            DataSetEnd::Offset(item_end)
        };
        items.push(read_dataset(cursor, explicit, end, depth)?);
    }
    Ok(items)
}

fn read_fragments(cursor: &mut Cursor<'_>) -> Result<Vec<Vec<u8>>, ReadFailure> {
    let mut fragments = Vec::new();
    loop {
        let tag = cursor.read_tag()?;
        let len = cursor.read_u32()?;
        if tag == tags::SEQUENCE_DELIMITATION {
            break;
        }
        if tag != tags::ITEM || len == UNDEFINED_LENGTH {
            return Err(ReadFailure::Malformed(format!(
                "malformed pixel data fragment {}",
                tag
            )));
        }
        fragments.push(cursor.take(len as usize)?.to_vec());
    }
    Ok(fragments)
}

// ============================================================================
// Writing
// ============================================================================

fn encode(record: &Record, path: &Path) -> Result<Vec<u8>, ScrubError> {
    let fail = |message: String| ScrubError::Serialization {
        path: path.to_path_buf(),
        message,
    };

    let meta = output_meta(record);

    let mut meta_body = Vec::new();
    for element in meta.iter().filter(|e| !e.tag.is_group_length()) {
        write_element(&mut meta_body, element).map_err(fail)?;
    }

    let mut out = Vec::with_capacity(PREAMBLE_LEN + 4 + meta_body.len() + 1024);
    out.extend_from_slice(&[0u8; PREAMBLE_LEN]);
    out.extend_from_slice(MAGIC);
    let group_length = Element::new(
        tags::FILE_META_GROUP_LENGTH,
        Vr::UL,
        (meta_body.len() as u32).to_le_bytes().to_vec(),
    );
    write_element(&mut out, &group_length).map_err(fail)?;
    out.extend_from_slice(&meta_body);

    // Group lengths are optional and would be stale after any edit.
    for element in record
        .dataset
        .iter()
        .filter(|e| !e.tag.is_group_length() && !e.tag.is_meta())
    {
        write_element(&mut out, element).map_err(fail)?;
    }

    Ok(out)
}

/// Builds the meta group for output: explicit VR little endian, with the
/// mandatory attributes filled in from the data set where missing.
fn output_meta(record: &Record) -> DataSet {
    let mut meta = record.meta.clone();
    meta.put_str(tags::TRANSFER_SYNTAX_UID, Vr::UI, EXPLICIT_VR_LITTLE_ENDIAN);

    if !meta.contains(tags::FILE_META_VERSION) {
        meta.put(Element::new(tags::FILE_META_VERSION, Vr::OB, vec![0x00, 0x01]));
    }
    if !meta.contains(tags::MEDIA_STORAGE_SOP_CLASS_UID) {
        if let Some(uid) = record.dataset.get_str(tags::SOP_CLASS_UID) {
            meta.put_str(tags::MEDIA_STORAGE_SOP_CLASS_UID, Vr::UI, &uid);
        }
    }
    if !meta.contains(tags::MEDIA_STORAGE_SOP_INSTANCE_UID) {
        if let Some(uid) = record.dataset.get_str(tags::SOP_INSTANCE_UID) {
            meta.put_str(tags::MEDIA_STORAGE_SOP_INSTANCE_UID, Vr::UI, &uid);
        }
    }
    if !meta.contains(tags::IMPLEMENTATION_CLASS_UID) {
        meta.put_str(tags::IMPLEMENTATION_CLASS_UID, Vr::UI, IMPLEMENTATION_CLASS_UID);
    }
    meta
}

fn write_element(out: &mut Vec<u8>, element: &Element) -> Result<(), String> {
    match &element.value {
        Value::Bytes(bytes) => {
            let padded_len = bytes.len() + bytes.len() % 2;
            write_header(out, element.tag, element.vr, padded_len as u32)?;
            out.extend_from_slice(bytes);
            if bytes.len() % 2 == 1 {
                out.push(element.vr.padding());
            }
        }
        Value::Sequence(items) => {
            write_header(out, element.tag, Vr::SQ, UNDEFINED_LENGTH)?;
            for item in items {
                write_tag(out, tags::ITEM);
                out.extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());
                for nested in item.iter() {
                    write_element(out, nested)?;
                }
                write_tag(out, tags::ITEM_DELIMITATION);
                out.extend_from_slice(&0u32.to_le_bytes());
            }
            write_tag(out, tags::SEQUENCE_DELIMITATION);
            out.extend_from_slice(&0u32.to_le_bytes());
        }
        Value::Fragments(fragments) => {
            write_header(out, element.tag, Vr::OB, UNDEFINED_LENGTH)?;
            for fragment in fragments {
                write_tag(out, tags::ITEM);
                let padded_len = fragment.len() + fragment.len() % 2;
                out.extend_from_slice(&(padded_len as u32).to_le_bytes());
                out.extend_from_slice(fragment);
                if fragment.len() % 2 == 1 {
                    out.push(0);
                }
            }
            write_tag(out, tags::SEQUENCE_DELIMITATION);
            out.extend_from_slice(&0u32.to_le_bytes());
        }
    }
    Ok(())
}

fn write_tag(out: &mut Vec<u8>, tag: Tag) {
    out.extend_from_slice(&tag.group().to_le_bytes());
    out.extend_from_slice(&tag.element().to_le_bytes());
}

fn write_header(out: &mut Vec<u8>, tag: Tag, vr: Vr, len: u32) -> Result<(), String> {
    write_tag(out, tag);
    out.extend_from_slice(vr.code().as_bytes());
    if vr.has_long_length() {
        out.extend_from_slice(&[0, 0]);
        out.extend_from_slice(&len.to_le_bytes());
    } else {
        let short = u16::try_from(len)
            .map_err(|_| format!("{} value of {} bytes does not fit VR {}", tag, len, vr))?;
        out.extend_from_slice(&short.to_le_bytes());
    }
    Ok(())
}

/// Returns true if the bytes look like a Part 10 file.
pub fn has_part10_prefix(bytes: &[u8]) -> bool {
    bytes.len() >= PREAMBLE_LEN + 4 && &bytes[PREAMBLE_LEN..PREAMBLE_LEN + 4] == MAGIC
}

/// Encodes a data set as Implicit VR Little Endian Part 10 bytes.
///
/// Only used to produce inputs in the implicit encoding; redacted output
/// always goes through [`to_part10_vec`].
pub fn to_implicit_part10_vec(record: &Record) -> Result<Vec<u8>, ScrubError> {
    let mut implicit = record.clone();
    implicit
        .meta
        .put_str(tags::TRANSFER_SYNTAX_UID, Vr::UI, IMPLICIT_VR_LITTLE_ENDIAN);

    let mut meta_body = Vec::new();
    for element in implicit.meta.iter().filter(|e| !e.tag.is_group_length()) {
        write_element(&mut meta_body, element).map_err(|message| ScrubError::Serialization {
            path: Path::new("<bytes>").to_path_buf(),
            message,
        })?;
    }

    let mut out = Vec::new();
    out.extend_from_slice(&[0u8; PREAMBLE_LEN]);
    out.extend_from_slice(MAGIC);
    write_element(
        &mut out,
        &Element::new(
            tags::FILE_META_GROUP_LENGTH,
            Vr::UL,
            (meta_body.len() as u32).to_le_bytes().to_vec(),
        ),
    )
    .map_err(|message| ScrubError::Serialization {
        path: Path::new("<bytes>").to_path_buf(),
        message,
    })?;
    out.extend_from_slice(&meta_body);

    for element in implicit.dataset.iter() {
        write_implicit_element(&mut out, element);
    }
    Ok(out)
}

fn write_implicit_element(out: &mut Vec<u8>, element: &Element) {
    write_tag(out, element.tag);
    match &element.value {
        Value::Bytes(bytes) => {
            let padded_len = bytes.len() + bytes.len() % 2;
            out.extend_from_slice(&(padded_len as u32).to_le_bytes());
            out.extend_from_slice(bytes);
            if bytes.len() % 2 == 1 {
                out.push(element.vr.padding());
            }
        }
        Value::Sequence(items) => {
            out.extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());
            for item in items {
                write_tag(out, tags::ITEM);
                out.extend_from_slice(&UNDEFINED_LENGTH.to_le_bytes());
                for nested in item.iter() {
                    write_implicit_element(out, nested);
                }
                write_tag(out, tags::ITEM_DELIMITATION);
                out.extend_from_slice(&0u32.to_le_bytes());
            }
            write_tag(out, tags::SEQUENCE_DELIMITATION);
            out.extend_from_slice(&0u32.to_le_bytes());
        }
        Value::Fragments(_) => {
            // Encapsulated pixel data has no implicit VR encoding.
            out.extend_from_slice(&0u32.to_le_bytes());
        }
    }
}
