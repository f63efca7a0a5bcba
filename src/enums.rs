/// The three canonical cross-sections of a volume.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Orientation {
    Axial,
    Coronal,
    Sagittal,
}

impl Orientation {
    pub const ALL: [Orientation; 3] = [
        Orientation::Axial,
        Orientation::Coronal,
        Orientation::Sagittal,
    ];

    /// Resolve a plane selector coming from the interaction layer.
    ///
    /// Selectors follow the declaration order (`0` axial, `1` coronal,
    /// `2` sagittal). Anything else yields `None`.
    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Interpolation {
    /// Round to the closest voxel
    Nearest,
    /// Blend the 8 surrounding voxels along x, then y, then z
    #[default]
    Trilinear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortBy {
    /// Projection of Image Position (Patient) onto the acquisition normal
    #[default]
    ImagePositionPatient,
    InstanceNumber,
    /// Keep the order in which the slices were given
    None,
}
