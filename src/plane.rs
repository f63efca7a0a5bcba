//! Axis assignment table shared by every plane-dependent computation.
//!
//! Each plane fixes one volume axis and spans the other two. The horizontal
//! axis runs left to right on screen, the vertical axis top to bottom. For
//! sagittal and coronal planes the vertical axis is flipped so that the
//! highest slice index (superior) is drawn at the top. Axial planes are not
//! flipped. Plane-dependent code reads this table instead of matching on
//! the orientation itself.

use crate::enums::Orientation;

/// Index of the x axis in `[x, y, z]` vectors
pub const X: usize = 0;
/// Index of the y axis in `[x, y, z]` vectors
pub const Y: usize = 1;
/// Index of the z axis in `[x, y, z]` vectors
pub const Z: usize = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaneAxes {
    /// Axis held constant by the plane
    pub fixed: usize,
    /// Axis mapped to screen columns
    pub horizontal: usize,
    /// Axis mapped to screen rows
    pub vertical: usize,
    /// Whether screen rows run against the vertical axis
    pub flip_vertical: bool,
}

const AXIAL: PlaneAxes = PlaneAxes {
    fixed: Z,
    horizontal: X,
    vertical: Y,
    flip_vertical: false,
};

const CORONAL: PlaneAxes = PlaneAxes {
    fixed: Y,
    horizontal: X,
    vertical: Z,
    flip_vertical: true,
};

const SAGITTAL: PlaneAxes = PlaneAxes {
    fixed: X,
    horizontal: Y,
    vertical: Z,
    flip_vertical: true,
};

impl Orientation {
    #[inline]
    pub const fn axes(self) -> PlaneAxes {
        match self {
            Orientation::Axial => AXIAL,
            Orientation::Coronal => CORONAL,
            Orientation::Sagittal => SAGITTAL,
        }
    }

    /// The plane whose fixed axis is `axis`
    pub fn from_normal_axis(axis: usize) -> Option<Self> {
        Self::ALL.into_iter().find(|o| o.axes().fixed == axis)
    }
}

impl PlaneAxes {
    /// Project a 3D vector onto the plane's `(horizontal, vertical)` axes.
    #[inline]
    pub fn project(&self, p: [f64; 3]) -> [f64; 2] {
        [p[self.horizontal], p[self.vertical]]
    }

    /// Rebuild a 3D vector from in-plane components and the fixed component.
    #[inline]
    pub fn compose(&self, horizontal: f64, vertical: f64, fixed: f64) -> [f64; 3] {
        let mut p = [0.0; 3];
        p[self.horizontal] = horizontal;
        p[self.vertical] = vertical;
        p[self.fixed] = fixed;
        p
    }

    /// Pick the `(horizontal, vertical)` entries of a per-axis quantity.
    #[inline]
    pub fn in_plane<T: Copy>(&self, v: [T; 3]) -> [T; 2] {
        [v[self.horizontal], v[self.vertical]]
    }

    /// Convert a vertical voxel index from screen order to volume order
    /// (the mapping is its own inverse).
    #[inline]
    pub fn orient_vertical(&self, index: f64, count: usize) -> f64 {
        if self.flip_vertical {
            (count as f64 - 1.0) - index
        } else {
            index
        }
    }
}
