//! Synthetic Part-10 streams for integration tests.
#![allow(dead_code)]

use dicom::core::Tag;
use dicom_dictionary_std::{tags, uids};

pub const ITEM: Tag = Tag(0xFFFE, 0xE000);
pub const SEQUENCE_DELIMITATION_ITEM: Tag = Tag(0xFFFE, 0xE0DD);

/// Builder of implicit VR little endian files.
#[derive(Default)]
pub struct FileBuilder {
    elements: Vec<(Tag, Vec<u8>)>,
}

impl FileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bytes(mut self, tag: Tag, value: Vec<u8>) -> Self {
        self.elements.push((tag, value));
        self
    }

    /// Text value, space padded to even length
    pub fn text(self, tag: Tag, value: &str) -> Self {
        self.bytes(tag, text(value))
    }

    pub fn us(self, tag: Tag, value: u16) -> Self {
        self.bytes(tag, value.to_le_bytes().to_vec())
    }

    /// Defined-length sequence of the given item bodies
    pub fn sequence(self, tag: Tag, items: Vec<Vec<u8>>) -> Self {
        let mut payload = Vec::new();
        for item in items {
            element(&mut payload, ITEM, &item);
        }
        self.bytes(tag, payload)
    }

    /// Encoded elements without preamble, for use as an item body
    pub fn body(mut self) -> Vec<u8> {
        self.elements.sort_by_key(|(tag, _)| *tag);
        let mut out = Vec::new();
        for (tag, value) in &self.elements {
            element(&mut out, *tag, value);
        }
        out
    }

    /// Complete file: preamble, magic, explicit meta group and body
    pub fn build(self) -> Vec<u8> {
        let mut out = vec![0; 128];
        out.extend_from_slice(b"DICM");
        let mut ts = uids::IMPLICIT_VR_LITTLE_ENDIAN.as_bytes().to_vec();
        if ts.len() % 2 == 1 {
            ts.push(0);
        }
        out.extend_from_slice(&tags::TRANSFER_SYNTAX_UID.group().to_le_bytes());
        out.extend_from_slice(&tags::TRANSFER_SYNTAX_UID.element().to_le_bytes());
        out.extend_from_slice(b"UI");
        out.extend_from_slice(&(ts.len() as u16).to_le_bytes());
        out.extend_from_slice(&ts);
        out.extend_from_slice(&self.body());
        out
    }
}

fn element(out: &mut Vec<u8>, tag: Tag, value: &[u8]) {
    out.extend_from_slice(&tag.group().to_le_bytes());
    out.extend_from_slice(&tag.element().to_le_bytes());
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value);
}

pub fn text(value: &str) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    if bytes.len() % 2 == 1 {
        bytes.push(b' ');
    }
    bytes
}

/// A signed 16-bit CT slice of `rows x columns` filled with `value`, at
/// height `z`, 1mm pixel spacing.
pub fn ct_slice(rows: u16, columns: u16, z: f64, instance_number: i64, value: i16) -> Vec<u8> {
    let pixels: Vec<u8> = std::iter::repeat_n(value, usize::from(rows) * usize::from(columns))
        .flat_map(i16::to_le_bytes)
        .collect();
    FileBuilder::new()
        .text(tags::MODALITY, "CT")
        .text(tags::INSTANCE_NUMBER, &instance_number.to_string())
        .text(tags::IMAGE_POSITION_PATIENT, &format!("-10\\-20\\{z}"))
        .text(tags::IMAGE_ORIENTATION_PATIENT, "1\\0\\0\\0\\1\\0")
        .us(tags::SAMPLES_PER_PIXEL, 1)
        .us(tags::ROWS, rows)
        .us(tags::COLUMNS, columns)
        .text(tags::PIXEL_SPACING, "1\\1")
        .us(tags::BITS_ALLOCATED, 16)
        .us(tags::BITS_STORED, 16)
        .us(tags::PIXEL_REPRESENTATION, 1)
        .text(tags::RESCALE_INTERCEPT, "0")
        .text(tags::RESCALE_SLOPE, "1")
        .bytes(tags::PIXEL_DATA, pixels)
        .build()
}

/// A structure set with one closed square contour per entry of `zs`.
pub fn structure_set(name: &str, zs: &[f64]) -> Vec<u8> {
    let roi = FileBuilder::new()
        .text(tags::ROI_NUMBER, "1")
        .text(tags::ROI_NAME, name)
        .body();
    let contours = zs
        .iter()
        .map(|z| {
            FileBuilder::new()
                .text(tags::CONTOUR_GEOMETRIC_TYPE, "CLOSED_PLANAR")
                .text(tags::NUMBER_OF_CONTOUR_POINTS, "4")
                .text(
                    tags::CONTOUR_DATA,
                    &format!("-9\\-19\\{z}\\-7\\-19\\{z}\\-7\\-17\\{z}\\-9\\-17\\{z}"),
                )
                .body()
        })
        .collect();
    let roi_contour = FileBuilder::new()
        .text(tags::ROI_DISPLAY_COLOR, "0\\255\\0")
        .sequence(tags::CONTOUR_SEQUENCE, contours)
        .text(tags::REFERENCED_ROI_NUMBER, "1")
        .body();
    FileBuilder::new()
        .text(tags::MODALITY, "RTSTRUCT")
        .sequence(tags::STRUCTURE_SET_ROI_SEQUENCE, vec![roi])
        .sequence(tags::ROI_CONTOUR_SEQUENCE, vec![roi_contour])
        .build()
}
