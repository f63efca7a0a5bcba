//! Named 3D contour sets read from RT structure set datasets.

use std::fmt;

use dicom::core::Tag;
use dicom_dictionary_std::tags;
use thiserror::Error;
use tracing::warn;

use crate::dataset::{Dataset, ExtractionError};
use crate::plane::Z;

const STRUCTURE_SET_MODALITY: &str = "RTSTRUCT";
const CLOSED_PLANAR: &str = "CLOSED_PLANAR";
const DEFAULT_COLOR: [u8; 3] = [255, 0, 0];

/// Tolerance below which a contour is considered flat along an axis
const PLANAR_TOLERANCE_MM: f64 = 1e-3;

/// A polygon authored on one plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    /// Coordinate along the contour's native plane normal
    pub slice_position_mm: f64,
    /// Points in patient millimeters
    pub points: Vec<[f64; 3]>,
    pub closed: bool,
}

impl Contour {
    /// Build a contour, deriving its slice position from the points.
    pub fn new(points: Vec<[f64; 3]>, closed: bool) -> Self {
        let axis = normal_axis(&points);
        let slice_position_mm = if points.is_empty() {
            0.0
        } else {
            points.iter().map(|p| p[axis]).sum::<f64>() / points.len() as f64
        };
        Self {
            slice_position_mm,
            points,
            closed,
        }
    }

    /// Axis along which the contour is flat; `z` for degenerate contours.
    pub fn normal_axis(&self) -> usize {
        normal_axis(&self.points)
    }
}

fn normal_axis(points: &[[f64; 3]]) -> usize {
    if points.len() < 3 {
        return Z;
    }
    let mut extent = [0.0f64; 3];
    for (axis, e) in extent.iter_mut().enumerate() {
        let (min, max) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p[axis]), hi.max(p[axis]))
        });
        *e = max - min;
    }
    if extent[Z] <= PLANAR_TOLERANCE_MM {
        return Z;
    }
    (0..3)
        .min_by(|&a, &b| extent[a].total_cmp(&extent[b]))
        .unwrap_or(Z)
}

/// A named anatomical structure.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiStructure {
    pub number: i64,
    pub name: String,
    pub display_color: [u8; 3],
    pub contours: Vec<Contour>,
}

impl RoiStructure {
    /// Normal axis shared by most of the structure's contours.
    pub fn native_axis(&self) -> usize {
        let mut votes = [0usize; 3];
        for contour in self.contours.iter().filter(|c| c.points.len() >= 3) {
            votes[contour.normal_axis()] += 1;
        }
        if votes == [0; 3] {
            return Z;
        }
        // ties resolve towards z
        [Z, 0, 1]
            .into_iter()
            .max_by_key(|&axis| (votes[axis], axis == Z))
            .unwrap_or(Z)
    }
}

/// A problem found while checking a structure set. Issues never cause
/// otherwise valid data to be discarded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationIssue {
    #[error("Modality is `{0}`, expected RTSTRUCT")]
    WrongModality(String),

    #[error("Modality is missing")]
    MissingModality,

    #[error("Required sequence {0} is missing")]
    MissingSequence(Tag),

    #[error("Sequence {0} has undefined length and cannot be read")]
    UnsupportedSequence(Tag),

    #[error("Sequence {tag} could not be read: {reason}")]
    UnreadableSequence { tag: Tag, reason: String },

    #[error("Item {index} of the structure set ROI sequence has no ROI number")]
    MissingRoiNumber { index: usize },

    #[error("Contours reference ROI {0}, which is not declared")]
    UnknownRoiReference(i64),

    #[error("Contour {index} of ROI {roi} is malformed: {reason}")]
    MalformedContour {
        roi: i64,
        index: usize,
        reason: String,
    },
}

/// Issues collected while walking a structure set.
#[derive(Debug, Default)]
struct Report {
    issues: Vec<ValidationIssue>,
}

impl Report {
    fn push(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for issue in &self.issues {
            writeln!(f, "{issue}")?;
        }
        Ok(())
    }
}

/// Extract the structures of a structure set dataset, `None` if it has none.
pub fn extract_structures(dataset: &Dataset) -> Option<Vec<RoiStructure>> {
    match try_extract_structures(dataset) {
        Ok(structures) => Some(structures),
        Err(e) => {
            warn!("No structures extracted: {e}");
            None
        }
    }
}

pub fn try_extract_structures(dataset: &Dataset) -> Result<Vec<RoiStructure>, ExtractionError> {
    let mut report = Report::default();
    let structures = walk(dataset, &mut report)?;
    if !report.issues.is_empty() {
        warn!("Structure set has {} issue(s):\n{report}", report.issues.len());
    }
    Ok(structures)
}

/// Check a dataset for the parts of a structure set this crate relies on.
pub fn validate_structure_set(dataset: &Dataset) -> Vec<ValidationIssue> {
    let mut report = Report::default();
    match dataset.get(tags::MODALITY).map(|e| e.to_str()) {
        Some(modality) if modality == STRUCTURE_SET_MODALITY => {}
        Some(modality) if !modality.is_empty() => {
            report.push(ValidationIssue::WrongModality(modality))
        }
        _ => report.push(ValidationIssue::MissingModality),
    }
    if let Err(e) = walk(dataset, &mut report) {
        report.push(sequence_issue(e));
    }
    report.issues
}

/// Whether a dataset looks like a structure set rather than an image.
pub fn is_structure_set(dataset: &Dataset) -> bool {
    dataset.contains(tags::ROI_CONTOUR_SEQUENCE)
        || dataset
            .get(tags::MODALITY)
            .is_some_and(|e| e.to_str() == STRUCTURE_SET_MODALITY)
}

fn sequence_issue(error: ExtractionError) -> ValidationIssue {
    match error {
        ExtractionError::MissingRequiredTag(tag) => ValidationIssue::MissingSequence(tag),
        ExtractionError::UnsupportedConstruct(tag) => ValidationIssue::UnsupportedSequence(tag),
        ExtractionError::TypeMismatch { tag, reason } => {
            ValidationIssue::UnreadableSequence { tag, reason }
        }
        ExtractionError::Decode(e) => ValidationIssue::UnreadableSequence {
            tag: tags::ROI_CONTOUR_SEQUENCE,
            reason: e.to_string(),
        },
    }
}

fn walk(dataset: &Dataset, report: &mut Report) -> Result<Vec<RoiStructure>, ExtractionError> {
    let mut structures = Vec::new();

    match dataset.items(tags::STRUCTURE_SET_ROI_SEQUENCE) {
        Ok(items) => {
            for (index, item) in items.iter().enumerate() {
                let Some(number) = item.get(tags::ROI_NUMBER).and_then(|e| e.to_int().ok()) else {
                    report.push(ValidationIssue::MissingRoiNumber { index });
                    continue;
                };
                let name = item
                    .get(tags::ROI_NAME)
                    .map(|e| e.to_str())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("ROI {number}"));
                structures.push(RoiStructure {
                    number,
                    name,
                    display_color: DEFAULT_COLOR,
                    contours: Vec::new(),
                });
            }
        }
        // names are optional, the contours are not
        Err(e) => report.push(sequence_issue(e)),
    }

    for item in dataset.items(tags::ROI_CONTOUR_SEQUENCE)? {
        let number = item
            .element(tags::REFERENCED_ROI_NUMBER)
            .and_then(|e| e.to_int())?;
        let index = match structures.iter().position(|s| s.number == number) {
            Some(index) => index,
            None => {
                report.push(ValidationIssue::UnknownRoiReference(number));
                structures.push(RoiStructure {
                    number,
                    name: format!("ROI {number}"),
                    display_color: DEFAULT_COLOR,
                    contours: Vec::new(),
                });
                structures.len() - 1
            }
        };
        let structure = &mut structures[index];

        if let Some(color) = item.get(tags::ROI_DISPLAY_COLOR) {
            match color.to_multi_f64().as_deref() {
                Ok([r, g, b, ..]) => {
                    structure.display_color = [*r, *g, *b].map(|c| c.clamp(0.0, 255.0) as u8)
                }
                _ => report.push(ValidationIssue::MalformedContour {
                    roi: number,
                    index: 0,
                    reason: "display color is not an RGB triplet".to_string(),
                }),
            }
        }

        let contours = match item.items(tags::CONTOUR_SEQUENCE) {
            Ok(contours) => contours,
            Err(ExtractionError::MissingRequiredTag(_)) => Vec::new(),
            Err(e) => {
                report.push(sequence_issue(e));
                Vec::new()
            }
        };
        for (index, contour) in contours.iter().enumerate() {
            match read_contour(contour) {
                Ok(contour) => structure.contours.push(contour),
                Err(reason) => report.push(ValidationIssue::MalformedContour {
                    roi: number,
                    index,
                    reason,
                }),
            }
        }
    }

    Ok(structures)
}

fn read_contour(item: &Dataset) -> Result<Contour, String> {
    let data = item
        .get(tags::CONTOUR_DATA)
        .ok_or_else(|| "no contour data".to_string())?;
    let values = data.to_multi_f64().map_err(|e| e.to_string())?;
    if values.len() % 3 != 0 {
        return Err(format!("{} coordinates is not a multiple of 3", values.len()));
    }
    if let Some(declared) = item
        .get(tags::NUMBER_OF_CONTOUR_POINTS)
        .and_then(|e| e.to_int().ok())
    {
        if declared as usize != values.len() / 3 {
            warn!(
                "Contour declares {declared} points but holds {}",
                values.len() / 3
            );
        }
    }
    let closed = item
        .get(tags::CONTOUR_GEOMETRIC_TYPE)
        .is_some_and(|e| e.to_str() == CLOSED_PLANAR);
    let points = values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();
    Ok(Contour::new(points, closed))
}
