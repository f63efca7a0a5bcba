//! Part-10 tag stream decoder.
//!
//! Turns a complete file buffer into a flat [`Dataset`]. Every read goes
//! through a bounds-checked cursor, so truncated or lying length fields end
//! in a typed [`DecodeError`] instead of a panic.

use std::path::Path;

use dicom::core::dictionary::DataDictionary;
use dicom::core::{Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom_dictionary_std::{tags, uids};
use thiserror::Error;
use tracing::{debug, trace};

use crate::dataset::{Dataset, Element};

/// Size of the fixed preamble preceding the magic code
pub const PREAMBLE_LENGTH: usize = 128;

/// The magic code at offset 128 of every Part-10 file
pub const MAGIC: &[u8; 4] = b"DICM";

/// Default ceiling for a single declared element length (1 GiB)
pub const DEFAULT_MAX_ELEMENT_LENGTH: u32 = 1 << 30;

const UNDEFINED_LENGTH: u32 = 0xFFFF_FFFF;
const META_GROUP: u16 = 0x0002;
const ITEM_GROUP: u16 = 0xFFFE;
const ITEM: Tag = Tag(0xFFFE, 0xE000);
const ITEM_DELIMITATION_ITEM: Tag = Tag(0xFFFE, 0xE00D);
const SEQUENCE_DELIMITATION_ITEM: Tag = Tag(0xFFFE, 0xE0DD);
const MAX_NESTING: usize = 64;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Not a DICOM file: missing preamble or magic code")]
    InvalidFormat,

    #[error("Unexpected end of input at byte {offset}")]
    UnexpectedEndOfInput { offset: usize },

    #[error("Corrupted data at byte {offset}: {reason}")]
    CorruptedData { offset: usize, reason: String },

    #[error("Unsupported transfer syntax {0}")]
    UnsupportedTransferSyntax(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How element headers following the meta group are laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodingMode {
    /// No VR on the wire, 4-byte lengths
    #[default]
    ImplicitVrLittleEndian,
    /// 2-byte VR code followed by a 2- or 4-byte length
    ExplicitVrLittleEndian,
}

impl DecodingMode {
    /// Select the mode for a transfer syntax UID. An empty UID means the
    /// meta group carried none and falls back to implicit VR.
    pub fn from_transfer_syntax(uid: &str) -> Result<Self, DecodeError> {
        match uid {
            "" | uids::IMPLICIT_VR_LITTLE_ENDIAN => Ok(DecodingMode::ImplicitVrLittleEndian),
            uids::EXPLICIT_VR_BIG_ENDIAN | uids::DEFLATED_EXPLICIT_VR_LITTLE_ENDIAN => {
                Err(DecodeError::UnsupportedTransferSyntax(uid.to_string()))
            }
            // explicit VR little endian, and every encapsulated syntax
            _ => Ok(DecodingMode::ExplicitVrLittleEndian),
        }
    }
}

/// Limits applied while decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    max_element_length: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            max_element_length: DEFAULT_MAX_ELEMENT_LENGTH,
        }
    }
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any element declaring more than `length` bytes.
    pub fn with_max_element_length(mut self, length: u32) -> Self {
        self.max_element_length = length;
        self
    }

    pub fn max_element_length(&self) -> u32 {
        self.max_element_length
    }
}

/// Decode a complete Part-10 buffer with default options.
pub fn decode(bytes: &[u8]) -> Result<Dataset, DecodeError> {
    decode_with_options(bytes, &DecodeOptions::default())
}

/// Read and decode the file at `path`.
pub fn decode_file(path: impl AsRef<Path>) -> Result<Dataset, DecodeError> {
    let bytes = std::fs::read(path.as_ref())?;
    decode(&bytes)
}

pub fn decode_with_options(bytes: &[u8], options: &DecodeOptions) -> Result<Dataset, DecodeError> {
    if bytes.len() < PREAMBLE_LENGTH + MAGIC.len()
        || &bytes[PREAMBLE_LENGTH..PREAMBLE_LENGTH + MAGIC.len()] != MAGIC
    {
        return Err(DecodeError::InvalidFormat);
    }

    let mut reader = ElementReader::new(bytes, PREAMBLE_LENGTH + MAGIC.len(), options);

    let mut meta = Vec::new();
    while let Some(tag) = reader.peek_tag()? {
        if tag.group() != META_GROUP {
            break;
        }
        meta.push(reader.read_element(DecodingMode::ExplicitVrLittleEndian)?);
    }

    let transfer_syntax = meta
        .iter()
        .rev()
        .find(|e| e.tag() == tags::TRANSFER_SYNTAX_UID)
        .map(Element::to_str)
        .unwrap_or_default();
    let mode = DecodingMode::from_transfer_syntax(&transfer_syntax)?;
    debug!(
        "Meta group has {} elements, transfer syntax `{}` ({:?})",
        meta.len(),
        transfer_syntax,
        mode
    );

    let mut dataset = Dataset::new(transfer_syntax, mode, *options);
    for element in meta {
        dataset.insert(element);
    }
    while !reader.is_at_end() {
        let element = reader.read_element(mode)?;
        trace!(
            "{} {} ({} bytes)",
            element.tag(),
            element.vr(),
            element.length()
        );
        dataset.insert(element);
    }

    Ok(dataset)
}

/// Decode the payload of a defined-length sequence into its item datasets,
/// under the same limits as the enclosing dataset.
pub(crate) fn decode_items(
    bytes: &[u8],
    mode: DecodingMode,
    transfer_syntax: &str,
    options: &DecodeOptions,
) -> Result<Vec<Dataset>, DecodeError> {
    let mut reader = ElementReader::new(bytes, 0, options);
    let mut items = Vec::new();

    while !reader.is_at_end() {
        let offset = reader.pos;
        let tag = reader.read_tag()?;
        let length = reader.read_u32()?;
        let mut item = Dataset::new(transfer_syntax.to_string(), mode, *options);

        match tag {
            SEQUENCE_DELIMITATION_ITEM => break,
            ITEM if length == UNDEFINED_LENGTH => loop {
                match reader.peek_tag()? {
                    Some(ITEM_DELIMITATION_ITEM) => {
                        reader.read_tag()?;
                        reader.read_u32()?;
                        break;
                    }
                    Some(_) => item.insert(reader.read_element(mode)?),
                    None => return Err(DecodeError::UnexpectedEndOfInput { offset: reader.pos }),
                }
            },
            ITEM => {
                let body = reader.take(length)?;
                let mut inner = ElementReader::new(body, 0, options);
                while !inner.is_at_end() {
                    item.insert(inner.read_element(mode)?);
                }
            }
            other => {
                return Err(DecodeError::CorruptedData {
                    offset,
                    reason: format!("expected an item, found {other}"),
                });
            }
        }
        items.push(item);
    }

    Ok(items)
}

/// Bounds-checked cursor over the element stream.
struct ElementReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    max_element_length: u32,
}

impl<'a> ElementReader<'a> {
    fn new(bytes: &'a [u8], pos: usize, options: &DecodeOptions) -> Self {
        Self {
            bytes,
            pos,
            max_element_length: options.max_element_length(),
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn remaining(&self) -> usize {
        self.bytes.len().saturating_sub(self.pos)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + N)
            .ok_or(DecodeError::UnexpectedEndOfInput { offset: self.pos })?;
        let mut out = [0; N];
        out.copy_from_slice(slice);
        self.pos += N;
        Ok(out)
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.read_array().map(u16::from_le_bytes)
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.read_array().map(u32::from_le_bytes)
    }

    fn read_tag(&mut self) -> Result<Tag, DecodeError> {
        let group = self.read_u16()?;
        let element = self.read_u16()?;
        Ok(Tag(group, element))
    }

    /// The next tag without consuming it, `None` at the end of the buffer.
    fn peek_tag(&mut self) -> Result<Option<Tag>, DecodeError> {
        if self.is_at_end() {
            return Ok(None);
        }
        let start = self.pos;
        let tag = self.read_tag()?;
        self.pos = start;
        Ok(Some(tag))
    }

    /// Consume `length` bytes after checking them against the sanity
    /// ceiling and the remaining buffer.
    fn take(&mut self, length: u32) -> Result<&'a [u8], DecodeError> {
        if length > self.max_element_length {
            return Err(DecodeError::CorruptedData {
                offset: self.pos,
                reason: format!(
                    "declared length {length} exceeds the limit of {}",
                    self.max_element_length
                ),
            });
        }
        let length = length as usize;
        if length > self.remaining() {
            return Err(DecodeError::CorruptedData {
                offset: self.pos,
                reason: format!(
                    "declared length {length} exceeds the {} remaining bytes",
                    self.remaining()
                ),
            });
        }
        let bytes: &'a [u8] = self.bytes;
        let value = &bytes[self.pos..self.pos + length];
        self.pos += length;
        Ok(value)
    }

    fn read_header(&mut self, mode: DecodingMode) -> Result<(Tag, VR, u32), DecodeError> {
        let offset = self.pos;
        let tag = self.read_tag()?;

        if tag.group() == ITEM_GROUP {
            // items and delimiters never carry a VR
            let length = self.read_u32()?;
            return Ok((tag, VR::UN, length));
        }

        match mode {
            DecodingMode::ImplicitVrLittleEndian => {
                let length = self.read_u32()?;
                Ok((tag, implicit_vr(tag), length))
            }
            DecodingMode::ExplicitVrLittleEndian => {
                let code: [u8; 2] = self.read_array()?;
                let vr = VR::from_binary(code).ok_or_else(|| DecodeError::CorruptedData {
                    offset,
                    reason: format!(
                        "unknown value representation {:?} in {tag}",
                        String::from_utf8_lossy(&code)
                    ),
                })?;
                let length = if has_long_length(vr) {
                    self.read_u16()?;
                    self.read_u32()?
                } else {
                    u32::from(self.read_u16()?)
                };
                Ok((tag, vr, length))
            }
        }
    }

    fn read_element(&mut self, mode: DecodingMode) -> Result<Element, DecodeError> {
        let offset = self.pos;
        let (tag, vr, length) = self.read_header(mode)?;

        if tag.group() == ITEM_GROUP {
            return Err(DecodeError::CorruptedData {
                offset,
                reason: format!("unexpected item tag {tag} outside of a sequence"),
            });
        }

        if length == UNDEFINED_LENGTH {
            debug!("Skipping undefined-length content of {tag} ({vr})");
            self.skip_sequence(mode, 0)?;
            return Ok(Element::undefined(tag, vr));
        }

        let bytes = self.take(length)?;
        Ok(Element::new(tag, vr, bytes.to_vec()))
    }

    /// Move past the items of an undefined-length element up to and
    /// including its sequence delimiter.
    fn skip_sequence(&mut self, mode: DecodingMode, depth: usize) -> Result<(), DecodeError> {
        self.check_depth(depth)?;
        loop {
            let offset = self.pos;
            let tag = self.read_tag()?;
            let length = self.read_u32()?;
            match tag {
                SEQUENCE_DELIMITATION_ITEM => return Ok(()),
                ITEM if length == UNDEFINED_LENGTH => self.skip_item(mode, depth + 1)?,
                ITEM => {
                    self.take(length)?;
                }
                other => {
                    return Err(DecodeError::CorruptedData {
                        offset,
                        reason: format!("expected an item, found {other}"),
                    });
                }
            }
        }
    }

    /// Move past the elements of an undefined-length item up to and
    /// including its item delimiter.
    fn skip_item(&mut self, mode: DecodingMode, depth: usize) -> Result<(), DecodeError> {
        self.check_depth(depth)?;
        loop {
            let (tag, _, length) = self.read_header(mode)?;
            if tag == ITEM_DELIMITATION_ITEM {
                return Ok(());
            }
            if length == UNDEFINED_LENGTH {
                self.skip_sequence(mode, depth + 1)?;
            } else {
                self.take(length)?;
            }
        }
    }

    fn check_depth(&self, depth: usize) -> Result<(), DecodeError> {
        if depth > MAX_NESTING {
            return Err(DecodeError::CorruptedData {
                offset: self.pos,
                reason: format!("sequences nested deeper than {MAX_NESTING} levels"),
            });
        }
        Ok(())
    }
}

fn has_long_length(vr: VR) -> bool {
    matches!(
        vr,
        VR::OB
            | VR::OD
            | VR::OF
            | VR::OL
            | VR::OV
            | VR::OW
            | VR::SQ
            | VR::SV
            | VR::UC
            | VR::UN
            | VR::UR
            | VR::UT
            | VR::UV
    )
}

fn implicit_vr(tag: Tag) -> VR {
    if tag == tags::PIXEL_DATA {
        return VR::OW;
    }
    StandardDataDictionary
        .by_tag(tag)
        .map(|entry| entry.vr.relaxed())
        .unwrap_or(VR::UN)
}
