//! Multiplanar reconstruction: windowed 2D fields resampled from a volume.

use image::{GrayImage, ImageBuffer, Luma};
use ndarray::Array2;
use rayon::prelude::*;

use crate::enums::{Interpolation, Orientation};
use crate::interpolator::Interpolator;
use crate::volume::Volume;
use crate::window::Window;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerOptions {
    interpolation: Interpolation,
    isotropic: bool,
}

impl SamplerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interpolation(mut self, interpolation: Interpolation) -> Self {
        self.interpolation = interpolation;
        self
    }

    /// Resample so that both in-plane axes use the smallest voxel spacing,
    /// preserving the physical aspect ratio in the output grid.
    pub fn isotropic(mut self, isotropic: bool) -> Self {
        self.isotropic = isotropic;
        self
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }
}

/// A windowed grayscale field, values in `[0, 1]`, indexed `[row, column]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GrayField {
    pub values: Array2<f32>,
}

impl GrayField {
    pub fn width(&self) -> usize {
        self.values.dim().1
    }

    pub fn height(&self) -> usize {
        self.values.dim().0
    }

    #[inline]
    pub fn get(&self, column: usize, row: usize) -> Option<f32> {
        self.values.get([row, column]).copied()
    }

    pub fn to_image(&self) -> Option<GrayImage> {
        let pixel_data: Vec<u8> = self
            .values
            .iter()
            .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();
        ImageBuffer::<Luma<u8>, _>::from_raw(self.width() as u32, self.height() as u32, pixel_data)
    }
}

/// Output (width, height) of a plane in pixels.
pub fn output_dimensions(
    volume: &Volume,
    orientation: Orientation,
    options: &SamplerOptions,
) -> (usize, usize) {
    let dims = if options.isotropic {
        volume.isotropic_dimensions()
    } else {
        volume.dimensions()
    };
    let axes = orientation.axes();
    (dims[axes.horizontal], dims[axes.vertical])
}

/// Resample the plane `orientation` at `depth_fraction` (0 = first voxel
/// layer, 1 = last) under `window`.
///
/// A depth outside `[0, 1]` or non-finite falls back to the volume's
/// geometric center. This never fails.
pub fn sample_slice(
    volume: &Volume,
    orientation: Orientation,
    depth_fraction: f64,
    window: Window,
    options: &SamplerOptions,
) -> GrayField {
    let depth_fraction = if (0.0..=1.0).contains(&depth_fraction) {
        depth_fraction
    } else {
        0.5
    };

    let axes = orientation.axes();
    let dims = volume.dimensions();
    let (width, height) = output_dimensions(volume, orientation, options);
    let (source_width, source_height) = (dims[axes.horizontal], dims[axes.vertical]);
    let fixed = depth_fraction * dims[axes.fixed].saturating_sub(1) as f64;
    let data = volume.data();
    let interpolation = options.interpolation;

    let values: Vec<f32> = (0..height)
        .into_par_iter()
        .flat_map_iter(|row| {
            // half-pixel centers, mapped back onto the source grid
            let v = (row as f64 + 0.5) * source_height as f64 / height as f64 - 0.5;
            let v = axes.orient_vertical(v, source_height);
            (0..width).map(move |column| {
                let u = (column as f64 + 0.5) * source_width as f64 / width as f64 - 0.5;
                let hu = Interpolator::sample(data, axes.compose(u, v, fixed), interpolation);
                window.apply(hu)
            })
        })
        .collect();

    let values = Array2::from_shape_vec((height, width), values)
        .unwrap_or_else(|_| Array2::zeros((height, width)));
    GrayField { values }
}

/// Like [`sample_slice`], with the plane given as a raw selector.
///
/// An unknown selector samples the axial plane through the geometric center.
pub fn sample_slice_by_selector(
    volume: &Volume,
    selector: u32,
    depth_fraction: f64,
    window: Window,
    options: &SamplerOptions,
) -> GrayField {
    match Orientation::from_index(selector) {
        Some(orientation) => sample_slice(volume, orientation, depth_fraction, window, options),
        None => sample_slice(volume, Orientation::Axial, 0.5, window, options),
    }
}

impl Volume {
    /// Windowed 8-bit image of the plane `orientation` at voxel layer `index`.
    pub fn get_image_from_axis(
        &self,
        index: usize,
        orientation: Orientation,
        window: Window,
        options: &SamplerOptions,
    ) -> Option<GrayImage> {
        let count = self.dimensions()[orientation.axes().fixed];
        if index >= count {
            return None;
        }
        let depth_fraction = if count > 1 {
            index as f64 / (count - 1) as f64
        } else {
            0.5
        };
        sample_slice(self, orientation, depth_fraction, window, options).to_image()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn ramp() -> Volume {
        let data = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (100 * z + 10 * y + x) as i16);
        Volume::new(data, [1.0, 1.0, 2.0], [0.0; 3])
    }

    /// Identity window over [0, 1000] so field values are hu / 1000
    fn identity() -> Window {
        Window::new(500.0, 1000.0)
    }

    fn hu(field: &GrayField, column: usize, row: usize) -> f32 {
        (field.get(column, row).unwrap() * 1000.0).round()
    }

    #[test]
    fn axial_slice_is_not_flipped() {
        let field = sample_slice(
            &ramp(),
            Orientation::Axial,
            1.0,
            identity(),
            &SamplerOptions::new().with_interpolation(Interpolation::Nearest),
        );
        assert_eq!((field.width(), field.height()), (5, 4));
        assert_eq!(hu(&field, 0, 0), 200.0);
        assert_eq!(hu(&field, 4, 3), 234.0);
    }

    #[test]
    fn sagittal_slice_puts_superior_on_top() {
        let field = sample_slice(
            &ramp(),
            Orientation::Sagittal,
            0.0,
            identity(),
            &SamplerOptions::new(),
        );
        assert_eq!((field.width(), field.height()), (4, 3));
        // top row is the last z layer
        assert_eq!(hu(&field, 0, 0), 200.0);
        assert_eq!(hu(&field, 3, 2), 30.0);
    }

    #[test]
    fn coronal_depth_selects_y() {
        let field = sample_slice(
            &ramp(),
            Orientation::Coronal,
            1.0,
            identity(),
            &SamplerOptions::new(),
        );
        assert_eq!((field.width(), field.height()), (5, 3));
        assert_eq!(hu(&field, 2, 2), 32.0);
    }

    #[test]
    fn trilinear_equals_nearest_on_native_grid() {
        let volume = ramp();
        for orientation in Orientation::ALL {
            let nearest = sample_slice(
                &volume,
                orientation,
                1.0,
                identity(),
                &SamplerOptions::new().with_interpolation(Interpolation::Nearest),
            );
            let trilinear = sample_slice(
                &volume,
                orientation,
                1.0,
                identity(),
                &SamplerOptions::new().with_interpolation(Interpolation::Trilinear),
            );
            assert_eq!(nearest, trilinear, "{orientation:?}");
        }
    }

    #[test]
    fn invalid_depth_and_selector_fall_back_to_center() {
        let volume = ramp();
        let options = SamplerOptions::new();
        let center = sample_slice(&volume, Orientation::Axial, 0.5, identity(), &options);
        assert_eq!(
            sample_slice(&volume, Orientation::Axial, f64::NAN, identity(), &options),
            center
        );
        assert_eq!(
            sample_slice(&volume, Orientation::Axial, 7.0, identity(), &options),
            center
        );
        assert_eq!(
            sample_slice_by_selector(&volume, 42, 0.0, identity(), &options),
            center
        );
        assert_eq!(hu(&center, 0, 0), 100.0);
    }

    #[test]
    fn isotropic_output_preserves_aspect() {
        let volume = ramp();
        let options = SamplerOptions::new().isotropic(true);
        assert_eq!(
            output_dimensions(&volume, Orientation::Sagittal, &options),
            (4, 6)
        );
        let field = sample_slice(&volume, Orientation::Sagittal, 0.0, identity(), &options);
        assert_eq!((field.width(), field.height()), (4, 6));
        for value in field.values.iter() {
            assert!((0.0..=1.0).contains(value));
        }
    }

    #[test]
    fn empty_axis_samples_without_panicking() {
        let volume = Volume::new(Array3::zeros((2, 0, 4)), [1.0; 3], [0.0; 3]);
        assert!(volume.is_empty());
        for orientation in Orientation::ALL {
            for interpolation in [Interpolation::Nearest, Interpolation::Trilinear] {
                for isotropic in [false, true] {
                    let options = SamplerOptions::new()
                        .with_interpolation(interpolation)
                        .isotropic(isotropic);
                    let field = sample_slice(&volume, orientation, 0.5, identity(), &options);
                    assert_eq!(
                        (field.width(), field.height()),
                        output_dimensions(&volume, orientation, &options)
                    );
                    assert!(field.values.iter().all(|v| *v == 0.0));
                }
            }
        }
    }

    #[test]
    fn image_matches_field() {
        let volume = ramp();
        let image = volume
            .get_image_from_axis(
                0,
                Orientation::Axial,
                Window::new(0.0, 0.0),
                &SamplerOptions::new(),
            )
            .unwrap();
        assert_eq!(image.dimensions(), (5, 4));
        assert!(image.pixels().all(|p| p.0[0] == 255));
        assert!(
            volume
                .get_image_from_axis(3, Orientation::Axial, identity(), &SamplerOptions::new())
                .is_none()
        );
    }
}
