/// A linear contrast window over Hounsfield units.
///
/// Maps `center ± width / 2` onto `[0, 1]`; everything below the window is
/// black, everything above it white.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Window {
    center: f32,
    width: f32,
}

impl Window {
    pub const fn new(center: f32, width: f32) -> Self {
        Self { center, width }
    }

    /// Abdomen soft tissue (40 / 400)
    pub const fn soft_tissue() -> Self {
        Self::new(40.0, 400.0)
    }

    /// Lung parenchyma (-600 / 1500)
    pub const fn lung() -> Self {
        Self::new(-600.0, 1500.0)
    }

    /// Bone (400 / 1800)
    pub const fn bone() -> Self {
        Self::new(400.0, 1800.0)
    }

    #[inline]
    pub fn center(&self) -> f32 {
        self.center
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.width
    }

    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.center - self.width / 2.0
    }

    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.center + self.width / 2.0
    }

    /// Windowed intensity in `[0, 1]`.
    ///
    /// A non-positive width degenerates to a threshold at the center and a
    /// NaN sample maps to 0.
    #[inline]
    pub fn apply(&self, hu: f32) -> f32 {
        if hu.is_nan() {
            return 0.0;
        }
        if self.width <= 0.0 || !self.width.is_finite() {
            return if hu >= self.center { 1.0 } else { 0.0 };
        }
        ((hu - self.lower_bound()) / self.width).clamp(0.0, 1.0)
    }

    /// Windowed intensity as an 8-bit gray level.
    #[inline]
    pub fn apply_u8(&self, hu: f32) -> u8 {
        (self.apply(hu) * 255.0).round() as u8
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::soft_tissue()
    }
}
