//! Orthographic volume rendering by front-to-back compositing.
//!
//! The camera looks at the volume center from the anterior side and orbits
//! about the volume's z axis. Superior is always up.

use image::RgbaImage;
use rayon::prelude::*;

use crate::enums::Interpolation;
use crate::interpolator::Interpolator;
use crate::volume::Volume;
use crate::window::Window;

/// Opacity at which a ray stops accumulating.
pub const DEFAULT_TERMINATION: f32 = 0.95;

#[derive(Clone, Debug, PartialEq)]
pub struct RayCastOptions {
    width: usize,
    height: usize,
    angle: f64,
    window: Window,
    step_mm: Option<f64>,
    termination: f32,
    transfer: TransferFunction,
}

impl Default for RayCastOptions {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            angle: 0.0,
            window: Window::default(),
            step_mm: None,
            termination: DEFAULT_TERMINATION,
            transfer: TransferFunction::default(),
        }
    }
}

impl RayCastOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_size(mut self, width: usize, height: usize) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Orbit angle about the z axis, in radians
    pub fn with_angle(mut self, angle: f64) -> Self {
        self.angle = angle;
        self
    }

    pub fn with_window(mut self, window: Window) -> Self {
        self.window = window;
        self
    }

    /// Distance between samples along a ray. Defaults to half the smallest
    /// voxel spacing.
    pub fn with_step(mut self, step_mm: f64) -> Self {
        self.step_mm = Some(step_mm);
        self
    }

    pub fn with_termination(mut self, termination: f32) -> Self {
        self.termination = termination;
        self
    }

    pub fn with_transfer_function(mut self, transfer: TransferFunction) -> Self {
        self.transfer = transfer;
        self
    }

    fn step_for(&self, volume: &Volume) -> f64 {
        match self.step_mm {
            Some(step) if step.is_finite() && step > 0.0 => step,
            _ => {
                let spacing = volume.spacing();
                let smallest = spacing[0].min(spacing[1]).min(spacing[2]);
                if smallest.is_finite() && smallest > 0.0 {
                    smallest / 2.0
                } else {
                    0.5
                }
            }
        }
    }
}

/// Color and base opacity assigned to a range of raw intensities.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TissueBand {
    pub lower_hu: f32,
    pub upper_hu: f32,
    pub color: [f32; 3],
    pub opacity: f32,
}

impl TissueBand {
    pub const fn new(lower_hu: f32, upper_hu: f32, color: [f32; 3], opacity: f32) -> Self {
        Self {
            lower_hu,
            upper_hu,
            color,
            opacity,
        }
    }

    fn contains(&self, hu: f32) -> bool {
        hu >= self.lower_hu && hu < self.upper_hu
    }
}

/// Piecewise mapping from a sample to color and opacity.
///
/// The band is picked by raw intensity, its opacity scaled by the windowed
/// value. Intensities outside every band (air) are transparent.
#[derive(Clone, Debug, PartialEq)]
pub struct TransferFunction {
    bands: Vec<TissueBand>,
}

impl Default for TransferFunction {
    fn default() -> Self {
        Self::new(vec![
            // fat
            TissueBand::new(-200.0, -30.0, [0.93, 0.80, 0.50], 0.01),
            // soft tissue
            TissueBand::new(-30.0, 150.0, [0.80, 0.35, 0.30], 0.04),
            // contrast-enhanced vessels
            TissueBand::new(150.0, 300.0, [0.95, 0.25, 0.20], 0.15),
            // bone
            TissueBand::new(300.0, f32::INFINITY, [0.98, 0.96, 0.90], 0.50),
        ])
    }
}

impl TransferFunction {
    pub fn new(bands: Vec<TissueBand>) -> Self {
        Self { bands }
    }

    pub fn bands(&self) -> &[TissueBand] {
        &self.bands
    }

    /// `(color, opacity)` of a sample with windowed value `windowed` and raw
    /// intensity `hu`.
    pub fn classify(&self, windowed: f32, hu: f32) -> ([f32; 3], f32) {
        match self.bands.iter().find(|band| band.contains(hu)) {
            Some(band) => {
                let shade = 0.25 + 0.75 * windowed;
                (
                    band.color.map(|c| c * shade),
                    (band.opacity * windowed).clamp(0.0, 1.0),
                )
            }
            None => ([0.0; 3], 0.0),
        }
    }
}

/// Straight (non-premultiplied) RGBA values in `[0, 1]`, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct ColorField {
    width: usize,
    height: usize,
    pixels: Vec<[f32; 4]>,
}

impl ColorField {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[[f32; 4]] {
        &self.pixels
    }

    pub fn get(&self, column: usize, row: usize) -> Option<[f32; 4]> {
        if column >= self.width {
            return None;
        }
        self.pixels.get(row * self.width + column).copied()
    }

    pub fn to_image(&self) -> Option<RgbaImage> {
        let rgba: Vec<[u8; 4]> = self
            .pixels
            .iter()
            .map(|p| p.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
            .collect();
        RgbaImage::from_raw(
            self.width as u32,
            self.height as u32,
            bytemuck::cast_slice(&rgba).to_vec(),
        )
    }
}

/// Camera basis in world millimeters.
struct Camera {
    right: [f64; 3],
    up: [f64; 3],
    forward: [f64; 3],
}

impl Camera {
    fn orbit(angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self {
            right: [cos, sin, 0.0],
            up: [0.0, 0.0, 1.0],
            forward: [-sin, cos, 0.0],
        }
    }
}

/// Render `volume` into a `width × height` color field.
pub fn render(volume: &Volume, options: &RayCastOptions) -> ColorField {
    let (width, height) = (options.width, options.height);
    let extent = volume.extent_mm();
    let center = volume.center_mm();
    let spacing = volume.spacing();
    let dims = volume.dimensions();
    let data = volume.data();

    let camera = Camera::orbit(options.angle);
    let step = options.step_for(volume);

    // the image plane covers the volume seen from any orbit angle
    let radius =
        (extent[0] * extent[0] + extent[1] * extent[1] + extent[2] * extent[2]).sqrt() / 2.0;
    let span_h = (extent[0] * extent[0] + extent[1] * extent[1]).sqrt().max(f64::EPSILON);
    let span_v = extent[2].max(f64::EPSILON);
    let pixel_mm = (span_h / width.max(1) as f64).max(span_v / height.max(1) as f64);
    let steps = ((2.0 * radius) / step).ceil() as usize + 1;

    let pixels: Vec<[f32; 4]> = (0..height)
        .into_par_iter()
        .flat_map_iter(|row| {
            let v = (height as f64 / 2.0 - (row as f64 + 0.5)) * pixel_mm;
            let camera = &camera;
            (0..width).map(move |column| {
                let u = (column as f64 + 0.5 - width as f64 / 2.0) * pixel_mm;
                let start = [0, 1, 2].map(|a| {
                    center[a] + u * camera.right[a] + v * camera.up[a] - radius * camera.forward[a]
                });
                let mut color = [0.0f32; 3];
                let mut alpha = 0.0f32;
                for i in 0..steps {
                    let t = i as f64 * step;
                    let voxel = [0, 1, 2].map(|a| (start[a] + t * camera.forward[a]) / spacing[a]);
                    if !inside(voxel, dims) {
                        continue;
                    }
                    let hu = Interpolator::sample(data, voxel, Interpolation::Trilinear);
                    let (sample_color, sample_alpha) =
                        options.transfer.classify(options.window.apply(hu), hu);
                    let weight = sample_alpha * (1.0 - alpha);
                    for c in 0..3 {
                        color[c] += sample_color[c] * weight;
                    }
                    alpha += weight;
                    if alpha >= options.termination {
                        break;
                    }
                }
                [color[0], color[1], color[2], alpha]
            })
        })
        .collect();

    ColorField {
        width,
        height,
        pixels,
    }
}

#[inline]
fn inside(voxel: [f64; 3], dims: [usize; 3]) -> bool {
    (0..3).all(|a| dims[a] > 0 && voxel[a] >= 0.0 && voxel[a] <= (dims[a] - 1) as f64)
}
