use ndarray::Array3;

use crate::enums::Interpolation;

pub(crate) struct Interpolator;

impl Interpolator {
    pub(crate) fn get_isotropic_dimensions(
        spacing: [f64; 3],
        original_dim: [usize; 3],
    ) -> [usize; 3] {
        let min_spacing = spacing[0].min(spacing[1]).min(spacing[2]);
        let inv_min_spacing = 1.0 / min_spacing; // Multiply instead of divide

        [0, 1, 2].map(|axis| {
            ((original_dim[axis] as f64 * spacing[axis] * inv_min_spacing).round() as usize).max(1)
        })
    }

    /// Sample `data` (stored `(z, y, x)`) at voxel coordinates `p = [x, y, z]`.
    ///
    /// Coordinates are clamped to `[0, dim - 1]` first, so no lookup can
    /// leave the buffer. An empty buffer samples as 0.
    #[inline]
    pub(crate) fn sample(data: &Array3<i16>, p: [f64; 3], interpolation: Interpolation) -> f32 {
        if data.is_empty() {
            return 0.0;
        }
        let (depth, height, width) = data.dim();
        let p = [
            clamp_coordinate(p[0], width),
            clamp_coordinate(p[1], height),
            clamp_coordinate(p[2], depth),
        ];
        match interpolation {
            Interpolation::Nearest => Self::nearest(data, p),
            Interpolation::Trilinear => Self::trilinear(data, p),
        }
    }

    #[inline]
    fn nearest(data: &Array3<i16>, p: [f64; 3]) -> f32 {
        let [x, y, z] = p.map(|c| c.round() as usize);
        f32::from(data[[z, y, x]])
    }

    /// Blend along x, then y, then z.
    #[inline]
    fn trilinear(data: &Array3<i16>, p: [f64; 3]) -> f32 {
        let (depth, height, width) = data.dim();

        let x0 = p[0].floor() as usize;
        let y0 = p[1].floor() as usize;
        let z0 = p[2].floor() as usize;
        let x1 = (x0 + 1).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let z1 = (z0 + 1).min(depth - 1);

        let dx = (p[0] - x0 as f64) as f32;
        let dy = (p[1] - y0 as f64) as f32;
        let dz = (p[2] - z0 as f64) as f32;

        let v = |x: usize, y: usize, z: usize| f32::from(data[[z, y, x]]);

        let c00 = lerp(v(x0, y0, z0), v(x1, y0, z0), dx);
        let c10 = lerp(v(x0, y1, z0), v(x1, y1, z0), dx);
        let c01 = lerp(v(x0, y0, z1), v(x1, y0, z1), dx);
        let c11 = lerp(v(x0, y1, z1), v(x1, y1, z1), dx);

        let c0 = lerp(c00, c10, dy);
        let c1 = lerp(c01, c11, dy);

        lerp(c0, c1, dz)
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a.mul_add(1.0 - t, b * t)
}

#[inline]
fn clamp_coordinate(c: f64, count: usize) -> f64 {
    if c.is_nan() {
        return 0.0;
    }
    c.clamp(0.0, count.saturating_sub(1) as f64)
}
