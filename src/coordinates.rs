//! Mapping between volume-relative world millimeters, plane coordinates and
//! viewport pixels, and ownership of the current focus position.
//!
//! World positions handled here are relative to the first voxel center, so
//! valid positions along each axis lie in `[0, (dim - 1) * spacing]`. Use
//! [`CoordinateAuthority::to_patient`] to obtain patient coordinates (the
//! frame RT contours are authored in).

use std::sync::{PoisonError, RwLock};

use tracing::trace;

use crate::enums::Orientation;
use crate::volume::Volume;

/// Size of the drawable area in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// The centered sub-rectangle of a viewport that shows the image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Letterbox {
    /// Largest centered rectangle in `viewport` with the aspect ratio of a
    /// plane measuring `size_mm` (horizontal, vertical).
    pub fn fit(viewport: Viewport, size_mm: [f64; 2]) -> Option<Self> {
        let [width_mm, height_mm] = size_mm;
        if !(width_mm > 0.0 && height_mm > 0.0 && viewport.width > 0.0 && viewport.height > 0.0) {
            return None;
        }
        let scale = (viewport.width / width_mm).min(viewport.height / height_mm);
        let width = width_mm * scale;
        let height = height_mm * scale;
        if !(width.is_finite() && height.is_finite()) {
            return None;
        }
        Some(Self {
            x: (viewport.width - width) / 2.0,
            y: (viewport.height - height) / 2.0,
            width,
            height,
        })
    }

    pub fn contains(&self, point: [f64; 2]) -> bool {
        let [px, py] = point;
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }

    /// Pixels per millimeter
    pub fn scale(&self, size_mm: [f64; 2]) -> f64 {
        self.width / size_mm[0]
    }
}

/// The current 3D point of interest.
///
/// Writers replace the whole vector under one lock, so readers always
/// observe a position that was stored as a unit.
#[derive(Debug, Default)]
pub struct FocusPosition {
    position: RwLock<[f64; 3]>,
}

impl FocusPosition {
    pub fn new(position: [f64; 3]) -> Self {
        Self {
            position: RwLock::new(position),
        }
    }

    /// Consistent snapshot of the position
    pub fn get(&self) -> [f64; 3] {
        *self.position.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read-modify-write under the lock; returns the stored value.
    pub fn update(&self, f: impl FnOnce([f64; 3]) -> [f64; 3]) -> [f64; 3] {
        let mut guard = self.position.write().unwrap_or_else(PoisonError::into_inner);
        *guard = f(*guard);
        *guard
    }
}

/// Single source of truth for screen ↔ world mapping of one loaded volume.
#[derive(Debug)]
pub struct CoordinateAuthority {
    dimensions: [usize; 3],
    spacing: [f64; 3],
    origin: [f64; 3],
    focus: FocusPosition,
    active: RwLock<Orientation>,
}

impl CoordinateAuthority {
    /// Authority for `volume`, focused on its physical center.
    pub fn new(volume: &Volume) -> Self {
        Self::from_geometry(volume.dimensions(), volume.spacing(), volume.origin())
    }

    pub fn from_geometry(dimensions: [usize; 3], spacing: [f64; 3], origin: [f64; 3]) -> Self {
        let center = [0, 1, 2].map(|a| dimensions[a].saturating_sub(1) as f64 * spacing[a] / 2.0);
        Self {
            dimensions,
            spacing,
            origin,
            focus: FocusPosition::new(center),
            active: RwLock::new(Orientation::Axial),
        }
    }

    pub fn dimensions(&self) -> [usize; 3] {
        self.dimensions
    }

    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    pub fn focus(&self) -> [f64; 3] {
        self.focus.get()
    }

    /// Plane the focus was last placed from, axial until a click
    pub fn active_plane(&self) -> Orientation {
        *self.active.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_active_plane(&self, orientation: Orientation) {
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = orientation;
    }

    /// Clamp `world` into the volume, keeping the current focus on axes
    /// where `world` is not finite.
    fn clamp(&self, world: [f64; 3], current: [f64; 3]) -> [f64; 3] {
        [0, 1, 2].map(|axis| {
            let max = self.dimensions[axis].saturating_sub(1) as f64 * self.spacing[axis];
            if world[axis].is_finite() {
                world[axis].clamp(0.0, max.max(0.0))
            } else {
                current[axis]
            }
        })
    }

    /// Move the focus to `world`, clamped to the volume. Returns the stored
    /// position.
    pub fn update_focus(&self, world: [f64; 3]) -> [f64; 3] {
        let stored = self.focus.update(|current| self.clamp(world, current));
        trace!("Focus moved to {stored:?}");
        stored
    }

    /// Physical size of the plane (pixel count × spacing per axis).
    pub fn plane_size_mm(&self, orientation: Orientation) -> [f64; 2] {
        let axes = orientation.axes();
        [
            self.dimensions[axes.horizontal] as f64 * self.spacing[axes.horizontal],
            self.dimensions[axes.vertical] as f64 * self.spacing[axes.vertical],
        ]
    }

    pub fn letterbox(&self, orientation: Orientation, viewport: Viewport) -> Option<Letterbox> {
        Letterbox::fit(viewport, self.plane_size_mm(orientation))
    }

    /// World position under a viewport pixel; the fixed coordinate comes from
    /// the focus. `None` outside the letterboxed image.
    pub fn screen_to_world(
        &self,
        screen: [f64; 2],
        orientation: Orientation,
        viewport: Viewport,
    ) -> Option<[f64; 3]> {
        let rect = self.letterbox(orientation, viewport)?;
        if !rect.contains(screen) {
            return None;
        }
        let axes = orientation.axes();
        let [count_h, count_v] = axes.in_plane(self.dimensions);
        let [spacing_h, spacing_v] = axes.in_plane(self.spacing);

        let fu = (screen[0] - rect.x) / rect.width;
        let fv = (screen[1] - rect.y) / rect.height;
        let u = fu * count_h as f64 - 0.5;
        let v = axes.orient_vertical(fv * count_v as f64 - 0.5, count_v);

        Some(axes.compose(
            u * spacing_h,
            v * spacing_v,
            self.focus()[axes.fixed],
        ))
    }

    /// Viewport pixel showing `world`. The result may lie outside the
    /// letterbox for positions outside the volume; `None` only when the
    /// viewport or plane is degenerate.
    pub fn world_to_screen(
        &self,
        world: [f64; 3],
        orientation: Orientation,
        viewport: Viewport,
    ) -> Option<[f64; 2]> {
        let rect = self.letterbox(orientation, viewport)?;
        let axes = orientation.axes();
        let [count_h, count_v] = axes.in_plane(self.dimensions);
        let [spacing_h, spacing_v] = axes.in_plane(self.spacing);

        let u = world[axes.horizontal] / spacing_h;
        let v = axes.orient_vertical(world[axes.vertical] / spacing_v, count_v);
        let fu = (u + 0.5) / count_h as f64;
        let fv = (v + 0.5) / count_v as f64;

        Some([rect.x + fu * rect.width, rect.y + fv * rect.height])
    }

    /// Move the in-plane focus to the position under a viewport pixel and
    /// make `orientation` the active plane.
    pub fn focus_at_screen(
        &self,
        screen: [f64; 2],
        orientation: Orientation,
        viewport: Viewport,
    ) -> Option<[f64; 3]> {
        let world = self.screen_to_world(screen, orientation, viewport)?;
        self.set_active_plane(orientation);
        Some(self.update_focus(world))
    }

    /// Focus coordinate along the plane's fixed axis, in world millimeters
    pub fn depth_mm(&self, orientation: Orientation) -> f64 {
        self.focus()[orientation.axes().fixed]
    }

    /// Focus position along the plane's fixed axis as a fraction of the
    /// volume's extent (0.5 for single-layer volumes).
    pub fn depth_fraction(&self, orientation: Orientation) -> f64 {
        let axis = orientation.axes().fixed;
        let extent = self.dimensions[axis].saturating_sub(1) as f64 * self.spacing[axis];
        if extent > 0.0 {
            (self.focus()[axis] / extent).clamp(0.0, 1.0)
        } else {
            0.5
        }
    }

    /// Voxel layer closest to the focus along the plane's fixed axis
    pub fn slice_index(&self, orientation: Orientation) -> usize {
        let axis = orientation.axes().fixed;
        self.index_on_axis(self.focus()[axis], axis)
    }

    fn index_on_axis(&self, position: f64, axis: usize) -> usize {
        if self.spacing[axis] <= 0.0 {
            return 0;
        }
        let index = (position / self.spacing[axis]).round().max(0.0) as usize;
        index.min(self.dimensions[axis].saturating_sub(1))
    }

    /// Move the focus to voxel layer `index` (clamped) of the plane.
    pub fn set_slice_index(&self, orientation: Orientation, index: usize) -> usize {
        let axis = orientation.axes().fixed;
        let index = index.min(self.dimensions[axis].saturating_sub(1));
        self.focus.update(|mut current| {
            current[axis] = index as f64 * self.spacing[axis];
            current
        });
        index
    }

    /// Move the focus by `delta` voxel layers along the plane's fixed axis.
    pub fn step_slice(&self, orientation: Orientation, delta: i64) -> usize {
        let axis = orientation.axes().fixed;
        let last = self.dimensions[axis].saturating_sub(1) as i64;
        let stored = self.focus.update(|mut current| {
            let index = self.index_on_axis(current[axis], axis) as i64;
            current[axis] = (index + delta).clamp(0, last) as f64 * self.spacing[axis];
            current
        });
        self.index_on_axis(stored[axis], axis)
    }

    /// Convert a volume-relative world position to patient coordinates.
    pub fn to_patient(&self, world: [f64; 3]) -> [f64; 3] {
        [0, 1, 2].map(|a| world[a] + self.origin[a])
    }

    /// Convert patient coordinates to a volume-relative world position.
    pub fn from_patient(&self, patient: [f64; 3]) -> [f64; 3] {
        [0, 1, 2].map(|a| patient[a] - self.origin[a])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::Arc;

    fn authority() -> CoordinateAuthority {
        // 512 x 512 x 40, 0.5mm in-plane, 2.5mm between slices
        CoordinateAuthority::from_geometry([512, 512, 40], [0.5, 0.5, 2.5], [-180.0, -180.0, 50.0])
    }

    fn close(a: [f64; 2], b: [f64; 2]) -> bool {
        (a[0] - b[0]).abs() < 1e-6 && (a[1] - b[1]).abs() < 1e-6
    }

    #[test]
    fn letterbox_pads_the_narrow_dimension() {
        let rect = Letterbox::fit(Viewport::new(800.0, 600.0), [100.0, 100.0]).unwrap();
        assert_eq!(
            rect,
            Letterbox {
                x: 100.0,
                y: 0.0,
                width: 600.0,
                height: 600.0
            }
        );

        let rect = Letterbox::fit(Viewport::new(400.0, 400.0), [200.0, 100.0]).unwrap();
        assert_eq!(
            rect,
            Letterbox {
                x: 0.0,
                y: 100.0,
                width: 400.0,
                height: 200.0
            }
        );
        assert_eq!(rect.scale([200.0, 100.0]), 2.0);

        assert!(Letterbox::fit(Viewport::new(0.0, 400.0), [200.0, 100.0]).is_none());
        assert!(Letterbox::fit(Viewport::new(400.0, 400.0), [0.0, 100.0]).is_none());
    }

    #[test]
    fn sagittal_letterbox_keeps_millimeter_aspect() {
        let authority = authority();
        // 256mm wide, 100mm tall
        let rect = authority
            .letterbox(Orientation::Sagittal, Viewport::new(512.0, 512.0))
            .unwrap();
        assert!((rect.width / rect.height - 256.0 / 100.0).abs() < 1e-9);
        assert_eq!(rect.x, 0.0);
    }

    #[rstest]
    #[case(Orientation::Axial)]
    #[case(Orientation::Coronal)]
    #[case(Orientation::Sagittal)]
    fn screen_world_round_trip(#[case] orientation: Orientation) {
        let authority = authority();
        let viewport = Viewport::new(800.0, 600.0);
        let rect = authority.letterbox(orientation, viewport).unwrap();
        for i in 1..20 {
            for j in 1..20 {
                let screen = [
                    rect.x + rect.width * i as f64 / 20.0,
                    rect.y + rect.height * j as f64 / 20.0,
                ];
                let world = authority.screen_to_world(screen, orientation, viewport).unwrap();
                let back = authority.world_to_screen(world, orientation, viewport).unwrap();
                assert!(close(screen, back), "{screen:?} -> {world:?} -> {back:?}");
            }
        }
    }

    #[test]
    fn outside_letterbox_has_no_mapping() {
        let authority = authority();
        let viewport = Viewport::new(800.0, 600.0);
        assert!(authority.screen_to_world([50.0, 300.0], Orientation::Axial, viewport).is_none());
        assert!(authority.screen_to_world([750.0, 300.0], Orientation::Axial, viewport).is_none());
        assert!(authority.screen_to_world([400.0, 300.0], Orientation::Axial, viewport).is_some());
    }

    #[test]
    fn voxel_centers_land_on_pixel_centers() {
        let authority = CoordinateAuthority::from_geometry([4, 4, 4], [1.0; 3], [0.0; 3]);
        let viewport = Viewport::new(4.0, 4.0);
        let screen = authority
            .world_to_screen([0.0, 0.0, 0.0], Orientation::Axial, viewport)
            .unwrap();
        assert!(close(screen, [0.5, 0.5]));
        // coronal rows are flipped: z = 3 is the top row
        let screen = authority
            .world_to_screen([0.0, 0.0, 3.0], Orientation::Coronal, viewport)
            .unwrap();
        assert!(close(screen, [0.5, 0.5]));
    }

    #[test]
    fn focus_starts_at_center_and_is_clamped() {
        let authority = authority();
        assert_eq!(authority.focus(), [127.75, 127.75, 48.75]);
        assert_eq!(
            authority.update_focus([-5.0, 1000.0, 10.0]),
            [0.0, 255.5, 10.0]
        );
        assert_eq!(
            authority.update_focus([f64::NAN, 1.0, f64::INFINITY]),
            [0.0, 1.0, 10.0]
        );
    }

    #[test]
    fn slice_navigation() {
        let authority = authority();
        assert_eq!(authority.slice_index(Orientation::Axial), 20);
        assert_eq!(authority.set_slice_index(Orientation::Axial, 100), 39);
        assert_eq!(authority.depth_fraction(Orientation::Axial), 1.0);
        assert_eq!(authority.step_slice(Orientation::Axial, -5), 34);
        assert_eq!(authority.depth_mm(Orientation::Axial), 85.0);
        assert_eq!(authority.step_slice(Orientation::Axial, -100), 0);
        assert_eq!(authority.depth_fraction(Orientation::Axial), 0.0);
    }

    #[test]
    fn clicking_moves_the_in_plane_focus() {
        let authority = CoordinateAuthority::from_geometry([4, 4, 4], [1.0; 3], [0.0; 3]);
        let viewport = Viewport::new(4.0, 4.0);
        assert_eq!(authority.active_plane(), Orientation::Axial);
        let focus = authority
            .focus_at_screen([3.5, 0.5], Orientation::Sagittal, viewport)
            .unwrap();
        // x keeps the sagittal depth, y from the column, z from the flipped row
        assert_eq!(focus, [1.5, 3.0, 3.0]);
        assert_eq!(authority.active_plane(), Orientation::Sagittal);

        // a click outside the image leaves focus and plane alone
        assert!(
            authority
                .focus_at_screen([9.0, 9.0], Orientation::Coronal, viewport)
                .is_none()
        );
        assert_eq!(authority.active_plane(), Orientation::Sagittal);
        authority.set_active_plane(Orientation::Coronal);
        assert_eq!(authority.active_plane(), Orientation::Coronal);
        assert_eq!(authority.focus(), [1.5, 3.0, 3.0]);
    }

    #[test]
    fn patient_frame() {
        let authority = authority();
        let patient = authority.to_patient([10.0, 20.0, 30.0]);
        assert_eq!(patient, [-170.0, -160.0, 80.0]);
        assert_eq!(authority.from_patient(patient), [10.0, 20.0, 30.0]);
    }

    #[test]
    fn readers_never_observe_torn_focus() {
        let authority = Arc::new(CoordinateAuthority::from_geometry(
            [100, 100, 100],
            [1.0; 3],
            [0.0; 3],
        ));
        let writer = {
            let authority = Arc::clone(&authority);
            std::thread::spawn(move || {
                for i in 0..2000 {
                    let v = (i % 100) as f64;
                    authority.update_focus([v, v, v]);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let authority = Arc::clone(&authority);
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let [x, y, z] = authority.focus();
                        assert!(x == y && y == z);
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
