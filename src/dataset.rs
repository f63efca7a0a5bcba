//! Flat, immutable representation of a decoded tag stream.

use std::collections::BTreeMap;

use dicom::core::{Tag, VR};
use thiserror::Error;

use crate::decoder::{DecodeError, DecodeOptions, DecodingMode, decode_items};

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("Missing required tag {0}")]
    MissingRequiredTag(Tag),

    #[error("Unexpected value in {tag}: {reason}")]
    TypeMismatch { tag: Tag, reason: String },

    #[error("Undefined-length content in {0} is not supported")]
    UnsupportedConstruct(Tag),

    #[error("Could not decode nested items: {0}")]
    Decode(#[from] DecodeError),
}

impl ExtractionError {
    pub(crate) fn mismatch(tag: Tag, reason: impl Into<String>) -> Self {
        ExtractionError::TypeMismatch {
            tag,
            reason: reason.into(),
        }
    }
}

/// A single data element as read from the stream.
///
/// Elements whose declared length was undefined (`0xFFFFFFFF`) are kept as
/// zero-length placeholders flagged by [`Element::is_undefined_length`].
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    tag: Tag,
    vr: VR,
    bytes: Vec<u8>,
    undefined_length: bool,
}

impl Element {
    pub fn new(tag: Tag, vr: VR, bytes: Vec<u8>) -> Self {
        Self {
            tag,
            vr,
            bytes,
            undefined_length: false,
        }
    }

    pub(crate) fn undefined(tag: Tag, vr: VR) -> Self {
        Self {
            tag,
            vr,
            bytes: Vec::new(),
            undefined_length: true,
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn vr(&self) -> VR {
        self.vr
    }

    /// Number of payload bytes held by this element
    pub fn length(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_undefined_length(&self) -> bool {
        self.undefined_length
    }

    /// The value as text, without trailing padding.
    pub fn to_str(&self) -> String {
        String::from_utf8_lossy(&self.bytes)
            .trim_end_matches(['\0', ' '])
            .trim_start()
            .to_string()
    }

    /// The value split on the multi-value delimiter.
    pub fn to_strs(&self) -> Vec<String> {
        self.to_str()
            .split('\\')
            .map(|s| s.trim().to_string())
            .collect()
    }

    /// All numeric values of this element.
    ///
    /// Text VRs (`DS`, `IS`) are parsed, binary VRs are read little endian.
    pub fn to_multi_f64(&self) -> Result<Vec<f64>, ExtractionError> {
        match self.vr {
            VR::FD => Ok(self
                .bytes
                .chunks_exact(8)
                .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                .collect()),
            VR::FL => Ok(self
                .bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
                .collect()),
            VR::US => Ok(self.le_u16s().map(f64::from).collect()),
            VR::SS => Ok(self.le_u16s().map(|v| v as i16 as f64).collect()),
            VR::UL => Ok(self.le_u32s().map(f64::from).collect()),
            VR::SL => Ok(self.le_u32s().map(|v| v as i32 as f64).collect()),
            _ => self
                .to_strs()
                .iter()
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<f64>().map_err(|e| {
                        ExtractionError::mismatch(self.tag, format!("`{s}` is not a number ({e})"))
                    })
                })
                .collect(),
        }
    }

    pub fn to_f64(&self) -> Result<f64, ExtractionError> {
        self.to_multi_f64()?
            .first()
            .copied()
            .ok_or_else(|| ExtractionError::mismatch(self.tag, "empty value"))
    }

    pub fn to_int(&self) -> Result<i64, ExtractionError> {
        let value = self.to_f64()?;
        if value.fract() != 0.0 || !value.is_finite() {
            return Err(ExtractionError::mismatch(
                self.tag,
                format!("{value} is not an integer"),
            ));
        }
        Ok(value as i64)
    }

    pub fn to_u16(&self) -> Result<u16, ExtractionError> {
        let value = self.to_int()?;
        u16::try_from(value)
            .map_err(|_| ExtractionError::mismatch(self.tag, format!("{value} out of range")))
    }

    fn le_u16s(&self) -> impl Iterator<Item = u16> + '_ {
        self.bytes
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
    }

    fn le_u32s(&self) -> impl Iterator<Item = u32> + '_ {
        self.bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
    }
}

/// Mapping from tag to element; the last element read for a tag wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    elements: BTreeMap<Tag, Element>,
    transfer_syntax: String,
    mode: DecodingMode,
    options: DecodeOptions,
}

impl Dataset {
    pub(crate) fn new(transfer_syntax: String, mode: DecodingMode, options: DecodeOptions) -> Self {
        Self {
            elements: BTreeMap::new(),
            transfer_syntax,
            mode,
            options,
        }
    }

    pub(crate) fn insert(&mut self, element: Element) {
        self.elements.insert(element.tag(), element);
    }

    pub fn get(&self, tag: Tag) -> Option<&Element> {
        self.elements.get(&tag)
    }

    /// Like [`Dataset::get`], failing with `MissingRequiredTag`.
    pub fn element(&self, tag: Tag) -> Result<&Element, ExtractionError> {
        self.get(tag).ok_or(ExtractionError::MissingRequiredTag(tag))
    }

    pub fn contains(&self, tag: Tag) -> bool {
        self.elements.contains_key(&tag)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Elements in ascending tag order
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.values()
    }

    /// Transfer syntax UID found in the meta group, empty if none was present
    pub fn transfer_syntax(&self) -> &str {
        &self.transfer_syntax
    }

    pub fn mode(&self) -> DecodingMode {
        self.mode
    }

    /// Limits the dataset was decoded under, reused when opening sequences
    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Open a sequence element as a list of nested item datasets.
    ///
    /// Only sequences with a defined length can be opened; a placeholder
    /// left by an undefined-length sequence fails with `UnsupportedConstruct`.
    pub fn items(&self, tag: Tag) -> Result<Vec<Dataset>, ExtractionError> {
        let element = self.element(tag)?;
        if element.is_undefined_length() {
            return Err(ExtractionError::UnsupportedConstruct(tag));
        }
        if element.vr() != VR::SQ && element.vr() != VR::UN {
            return Err(ExtractionError::mismatch(
                tag,
                format!("expected a sequence, found {}", element.vr()),
            ));
        }
        Ok(decode_items(
            element.bytes(),
            self.mode,
            &self.transfer_syntax,
            &self.options,
        )?)
    }
}
