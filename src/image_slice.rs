//! Typed 2D image records extracted from decoded datasets.

use dicom::core::Tag;
use dicom_dictionary_std::tags;

use crate::dataset::{Dataset, ExtractionError};

/// Raw stored samples, before any modality rescale.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
}

impl SampleBuffer {
    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::U8(v) => v.len(),
            SampleBuffer::I8(v) => v.len(),
            SampleBuffer::U16(v) => v.len(),
            SampleBuffer::I16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored value at `index` widened to `f64`
    #[inline]
    pub fn get(&self, index: usize) -> Option<f64> {
        match self {
            SampleBuffer::U8(v) => v.get(index).map(|&s| f64::from(s)),
            SampleBuffer::I8(v) => v.get(index).map(|&s| f64::from(s)),
            SampleBuffer::U16(v) => v.get(index).map(|&s| f64::from(s)),
            SampleBuffer::I16(v) => v.get(index).map(|&s| f64::from(s)),
        }
    }

    /// Apply the modality rescale and saturate into the signed 16-bit range.
    pub fn to_hu(&self, slope: f64, intercept: f64) -> Vec<i16> {
        (0..self.len())
            .filter_map(|i| self.get(i))
            .map(|s| {
                s.mul_add(slope, intercept)
                    .round()
                    .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16
            })
            .collect()
    }
}

/// One decoded cross-section with its acquisition geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSlice {
    pub rows: u16,
    pub columns: u16,
    pub bits_allocated: u16,
    pub bits_stored: u16,
    pub signed: bool,
    pub samples: SampleBuffer,
    /// Image Position (Patient) of the first transmitted pixel
    pub position_mm: [f64; 3],
    /// Physical distance between (rows, columns)
    pub spacing_mm: [f64; 2],
    /// Row and column direction cosines
    pub orientation: [[f64; 3]; 2],
    pub rescale_slope: f64,
    pub rescale_intercept: f64,
    pub instance_number: Option<i64>,
    pub slice_thickness: Option<f64>,
    /// Default window (center, width) suggested by the modality
    pub window: Option<(f64, f64)>,
}

impl ImageSlice {
    /// Unit normal of the acquisition plane (row × column cosines).
    pub fn normal(&self) -> [f64; 3] {
        let [r, c] = self.orientation;
        let n = [
            r[1] * c[2] - r[2] * c[1],
            r[2] * c[0] - r[0] * c[2],
            r[0] * c[1] - r[1] * c[0],
        ];
        let norm = (n[0] * n[0] + n[1] * n[1] + n[2] * n[2]).sqrt();
        if norm > f64::EPSILON {
            [n[0] / norm, n[1] / norm, n[2] / norm]
        } else {
            [0.0, 0.0, 1.0]
        }
    }

    /// Samples after the modality rescale, in row-major order
    pub fn hu_samples(&self) -> Vec<i16> {
        self.samples
            .to_hu(self.rescale_slope, self.rescale_intercept)
    }
}

const AXIAL_COSINES: [[f64; 3]; 2] = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

/// Extract the image of a dataset, or `None` if it holds no usable image.
pub fn extract_image(dataset: &Dataset) -> Option<ImageSlice> {
    try_extract_image(dataset).ok()
}

pub fn try_extract_image(dataset: &Dataset) -> Result<ImageSlice, ExtractionError> {
    let rows = dataset.element(tags::ROWS)?.to_u16()?;
    let columns = dataset.element(tags::COLUMNS)?.to_u16()?;
    for (tag, extent) in [(tags::ROWS, rows), (tags::COLUMNS, columns)] {
        if extent == 0 {
            return Err(ExtractionError::mismatch(tag, "image has no pixels along this axis"));
        }
    }
    let bits_allocated = dataset.element(tags::BITS_ALLOCATED)?.to_u16()?;
    let bits_stored =
        optional(dataset, tags::BITS_STORED, |e| e.to_u16())?.unwrap_or(bits_allocated);
    let signed = optional(dataset, tags::PIXEL_REPRESENTATION, |e| e.to_u16())?.unwrap_or(0) == 1;

    if let Some(samples_per_pixel) = optional(dataset, tags::SAMPLES_PER_PIXEL, |e| e.to_u16())? {
        if samples_per_pixel != 1 {
            return Err(ExtractionError::mismatch(
                tags::SAMPLES_PER_PIXEL,
                format!("{samples_per_pixel} samples per pixel, only 1 is supported"),
            ));
        }
    }
    if bits_stored == 0 || bits_stored > bits_allocated {
        return Err(ExtractionError::mismatch(
            tags::BITS_STORED,
            format!("{bits_stored} bits stored in {bits_allocated} allocated"),
        ));
    }

    let pixel_data = dataset.element(tags::PIXEL_DATA)?;
    if pixel_data.is_undefined_length() {
        return Err(ExtractionError::UnsupportedConstruct(tags::PIXEL_DATA));
    }

    let count = usize::from(rows) * usize::from(columns);
    let samples = reinterpret(pixel_data.bytes(), count, bits_allocated, bits_stored, signed)?;

    let position_mm = optional(dataset, tags::IMAGE_POSITION_PATIENT, |e| {
        triplet(e.tag(), e.to_multi_f64()?)
    })?
    .unwrap_or([0.0; 3]);
    let spacing_mm = optional(dataset, tags::PIXEL_SPACING, |e| {
        match e.to_multi_f64()?.as_slice() {
            [row, column, ..] if *row > 0.0 && *column > 0.0 => Ok([*row, *column]),
            other => Err(ExtractionError::mismatch(
                e.tag(),
                format!("invalid pixel spacing {other:?}"),
            )),
        }
    })?
    .unwrap_or([1.0, 1.0]);
    let orientation = optional(dataset, tags::IMAGE_ORIENTATION_PATIENT, |e| {
        match e.to_multi_f64()?.as_slice() {
            [a, b, c, d, f, g, ..] => Ok([[*a, *b, *c], [*d, *f, *g]]),
            other => Err(ExtractionError::mismatch(
                e.tag(),
                format!("expected 6 direction cosines, found {}", other.len()),
            )),
        }
    })?
    .unwrap_or(AXIAL_COSINES);

    let window = match (
        optional(dataset, tags::WINDOW_CENTER, |e| e.to_f64())?,
        optional(dataset, tags::WINDOW_WIDTH, |e| e.to_f64())?,
    ) {
        (Some(center), Some(width)) => Some((center, width)),
        _ => None,
    };

    Ok(ImageSlice {
        rows,
        columns,
        bits_allocated,
        bits_stored,
        signed,
        samples,
        position_mm,
        spacing_mm,
        orientation,
        rescale_slope: optional(dataset, tags::RESCALE_SLOPE, |e| e.to_f64())?.unwrap_or(1.0),
        rescale_intercept: optional(dataset, tags::RESCALE_INTERCEPT, |e| e.to_f64())?
            .unwrap_or(0.0),
        instance_number: optional(dataset, tags::INSTANCE_NUMBER, |e| e.to_int())?,
        slice_thickness: optional(dataset, tags::SLICE_THICKNESS, |e| e.to_f64())?,
        window,
    })
}

/// Read an optional attribute; absent or empty elements yield `None`,
/// present but malformed ones an error.
fn optional<T>(
    dataset: &Dataset,
    tag: Tag,
    read: impl FnOnce(&crate::dataset::Element) -> Result<T, ExtractionError>,
) -> Result<Option<T>, ExtractionError> {
    match dataset.get(tag) {
        Some(element) if element.length() > 0 => read(element).map(Some),
        _ => Ok(None),
    }
}

fn triplet(tag: Tag, values: Vec<f64>) -> Result<[f64; 3], ExtractionError> {
    match values.as_slice() {
        [x, y, z, ..] => Ok([*x, *y, *z]),
        other => Err(ExtractionError::mismatch(
            tag,
            format!("expected 3 values, found {}", other.len()),
        )),
    }
}

/// Sign-extend a value stored in the low `bits` bits of its container.
#[inline]
fn sign_extend(raw: u16, bits: u16) -> i16 {
    let shift = 16 - bits;
    ((raw << shift) as i16) >> shift
}

fn reinterpret(
    bytes: &[u8],
    count: usize,
    bits_allocated: u16,
    bits_stored: u16,
    signed: bool,
) -> Result<SampleBuffer, ExtractionError> {
    let bytes_per_sample = match bits_allocated {
        8 => 1,
        16 => 2,
        other => {
            return Err(ExtractionError::mismatch(
                tags::BITS_ALLOCATED,
                format!("{other} bits allocated, only 8 and 16 are supported"),
            ));
        }
    };
    let needed = count * bytes_per_sample;
    if bytes.len() < needed {
        return Err(ExtractionError::mismatch(
            tags::PIXEL_DATA,
            format!("{} bytes of pixel data, {needed} needed", bytes.len()),
        ));
    }
    let bytes = &bytes[..needed];

    let buffer = match (bits_allocated, signed) {
        (8, false) => SampleBuffer::U8(bytes.to_vec()),
        (8, true) => SampleBuffer::I8(
            bytes
                .iter()
                .map(|&b| sign_extend(u16::from(b), bits_stored) as i8)
                .collect(),
        ),
        (_, false) => {
            let mask = if bits_stored >= 16 { u16::MAX } else { (1 << bits_stored) - 1 };
            SampleBuffer::U16(
                bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]) & mask)
                    .collect(),
            )
        }
        (_, true) => SampleBuffer::I16(
            bytes
                .chunks_exact(2)
                .map(|c| sign_extend(u16::from_le_bytes([c[0], c[1]]), bits_stored))
                .collect(),
        ),
    };
    Ok(buffer)
}
