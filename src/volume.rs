use ndarray::{Array3, ArrayView2, s};

use crate::enums::Orientation;
use crate::interpolator::Interpolator;

/// An immutable 3D grid of rescaled samples with its physical geometry.
///
/// Samples are stored as `(depth, height, width)`, i.e. `(z, y, x)`, while
/// every public vector in this crate is ordered `[x, y, z]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<i16>,
    spacing: [f64; 3],
    origin: [f64; 3],
}

impl Volume {
    pub fn new(data: Array3<i16>, spacing: [f64; 3], origin: [f64; 3]) -> Self {
        Self {
            data,
            spacing,
            origin,
        }
    }

    /// Number of voxels along x, y and z
    pub fn dimensions(&self) -> [usize; 3] {
        let (depth, height, width) = self.data.dim();
        [width, height, depth]
    }

    /// True when any axis holds no voxels
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Distance in millimeters between voxel centers along x, y and z
    pub fn spacing(&self) -> [f64; 3] {
        self.spacing
    }

    /// Patient position of the first voxel center
    pub fn origin(&self) -> [f64; 3] {
        self.origin
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &Array3<i16> {
        &self.data
    }

    /// Sample at integer voxel coordinates
    #[inline]
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> Option<i16> {
        self.data.get([z, y, x]).copied()
    }

    /// Largest valid volume-relative coordinate per axis, `(dim - 1) * spacing`
    pub fn extent_mm(&self) -> [f64; 3] {
        let dims = self.dimensions();
        [0, 1, 2].map(|axis| dims[axis].saturating_sub(1) as f64 * self.spacing[axis])
    }

    /// Volume-relative position of the geometric center
    pub fn center_mm(&self) -> [f64; 3] {
        self.extent_mm().map(|e| e / 2.0)
    }

    /// Physical size of a plane in millimeters (pixel count × spacing)
    /// along its (horizontal, vertical) axes.
    pub fn plane_size_mm(&self, orientation: Orientation) -> [f64; 2] {
        let axes = orientation.axes();
        let dims = self.dimensions();
        [
            dims[axes.horizontal] as f64 * self.spacing[axes.horizontal],
            dims[axes.vertical] as f64 * self.spacing[axes.vertical],
        ]
    }

    /// Voxel counts along x, y, z after resampling every axis to the
    /// smallest spacing.
    pub fn isotropic_dimensions(&self) -> [usize; 3] {
        Interpolator::get_isotropic_dimensions(self.spacing, self.dimensions())
    }

    /// Native voxel slice perpendicular to `orientation`, without resampling.
    pub fn get_slice_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
    ) -> Option<ArrayView2<'_, i16>> {
        if !self.is_valid_index(index, orientation) {
            return None;
        }
        let slice = match orientation {
            Orientation::Axial => self.data.slice(s![index, .., ..]),
            Orientation::Coronal => self.data.slice(s![.., index, ..]),
            Orientation::Sagittal => self.data.slice(s![.., .., index]),
        };
        Some(slice)
    }

    /// Smallest and largest sample
    pub fn value_range(&self) -> (i16, i16) {
        self.data
            .iter()
            .fold((i16::MAX, i16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    fn is_valid_index(&self, index: usize, orientation: Orientation) -> bool {
        index < self.dimensions()[orientation.axes().fixed]
    }
}
