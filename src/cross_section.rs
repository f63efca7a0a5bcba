//! Where an annotated structure meets a plane it was not drawn on.
//!
//! All positions are in patient millimeters, the frame contour points are
//! stored in.

use tracing::trace;

use crate::coordinates::{CoordinateAuthority, Viewport};
use crate::enums::Orientation;
use crate::structure_set::{Contour, RoiStructure};

/// Tuning for cross-section synthesis.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrossSectionOptions {
    dedup_threshold_mm: f64,
    native_tolerance_mm: f64,
}

impl Default for CrossSectionOptions {
    fn default() -> Self {
        Self {
            dedup_threshold_mm: 1.0,
            native_tolerance_mm: 0.5,
        }
    }
}

impl CrossSectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crossings closer than this are merged. Depends on the resolution of
    /// the dataset.
    pub fn with_dedup_threshold(mut self, threshold_mm: f64) -> Self {
        self.dedup_threshold_mm = threshold_mm;
        self
    }

    /// How far a native contour may lie from the requested depth and still
    /// be returned for it.
    pub fn with_native_tolerance(mut self, tolerance_mm: f64) -> Self {
        self.native_tolerance_mm = tolerance_mm;
        self
    }

    pub fn dedup_threshold(&self) -> f64 {
        self.dedup_threshold_mm
    }
}

/// Outline of `structure` on the plane `orientation` at `depth_mm` along
/// the plane's fixed axis.
///
/// On the structure's native plane this is the authored contour closest to
/// `depth_mm`. On any other plane the outline is synthesized from the edge
/// crossings of every contour. `None` means the plane does not cut the
/// structure in at least 3 distinct points.
pub fn cross_section(
    structure: &RoiStructure,
    orientation: Orientation,
    depth_mm: f64,
    options: &CrossSectionOptions,
) -> Option<Contour> {
    if !depth_mm.is_finite() {
        return None;
    }
    let axes = orientation.axes();
    if axes.fixed == structure.native_axis() {
        return native_contour(structure, depth_mm, options);
    }

    let fixed = axes.fixed;
    let mut crossings = Vec::new();
    for contour in &structure.contours {
        let n = contour.points.len();
        if n < 2 {
            continue;
        }
        for i in 0..n {
            let p1 = contour.points[i];
            let p2 = contour.points[(i + 1) % n];
            let (lo, hi) = if p1[fixed] <= p2[fixed] {
                (p1[fixed], p2[fixed])
            } else {
                (p2[fixed], p1[fixed])
            };
            if depth_mm < lo || depth_mm > hi {
                continue;
            }
            let delta = p2[fixed] - p1[fixed];
            // an edge lying in the plane contributes its first point
            let t = if delta.abs() > f64::EPSILON {
                ((depth_mm - p1[fixed]) / delta).clamp(0.0, 1.0)
            } else {
                0.0
            };
            let mut crossing = [0.0; 3];
            for axis in 0..3 {
                crossing[axis] = p1[axis] + t * (p2[axis] - p1[axis]);
            }
            crossing[fixed] = depth_mm;
            crossings.push(crossing);
        }
    }

    let mut points = dedup(crossings, options.dedup_threshold_mm);
    trace!(
        "{}: {} distinct crossings on {orientation:?} at {depth_mm}",
        structure.name,
        points.len()
    );
    if points.len() < 3 {
        return None;
    }
    sort_by_angle(&mut points, orientation);

    Some(Contour {
        slice_position_mm: depth_mm,
        points,
        closed: true,
    })
}

fn native_contour(
    structure: &RoiStructure,
    depth_mm: f64,
    options: &CrossSectionOptions,
) -> Option<Contour> {
    structure
        .contours
        .iter()
        .map(|c| ((c.slice_position_mm - depth_mm).abs(), c))
        .filter(|(distance, _)| *distance <= options.native_tolerance_mm)
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, c)| c.clone())
}

/// Keep the first of every group of points closer than `threshold` to a
/// point already kept.
fn dedup(points: Vec<[f64; 3]>, threshold: f64) -> Vec<[f64; 3]> {
    let threshold_sq = threshold * threshold;
    let mut kept: Vec<[f64; 3]> = Vec::with_capacity(points.len());
    for p in points {
        let duplicate = kept.iter().any(|q| {
            let d = [p[0] - q[0], p[1] - q[1], p[2] - q[2]];
            d[0] * d[0] + d[1] * d[1] + d[2] * d[2] < threshold_sq
        });
        if !duplicate {
            kept.push(p);
        }
    }
    kept
}

/// Order points by ascending angle around their centroid in the plane.
/// Equal angles keep their collection order.
fn sort_by_angle(points: &mut [[f64; 3]], orientation: Orientation) {
    let axes = orientation.axes();
    let n = points.len() as f64;
    let (sum_u, sum_v) = points.iter().fold((0.0, 0.0), |(su, sv), p| {
        let [u, v] = axes.project(*p);
        (su + u, sv + v)
    });
    let (cu, cv) = (sum_u / n, sum_v / n);
    points.sort_by(|a, b| {
        let [au, av] = axes.project(*a);
        let [bu, bv] = axes.project(*b);
        (av - cv).atan2(au - cu).total_cmp(&(bv - cv).atan2(bu - cu))
    });
}

/// Map a contour onto viewport pixels through the coordinate authority.
pub fn project_contour(
    contour: &Contour,
    orientation: Orientation,
    authority: &CoordinateAuthority,
    viewport: Viewport,
) -> Vec<[f64; 2]> {
    contour
        .points
        .iter()
        .filter_map(|p| {
            authority.world_to_screen(authority.from_patient(*p), orientation, viewport)
        })
        .collect()
}
