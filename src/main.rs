//! A CLI tool for reslicing a directory of DICOM slices
//! into a PNG image, optionally with structure set outlines,
//! or for rendering the volume by ray casting.
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use dicom_mpr::{
    CoordinateAuthority, CrossSectionOptions, Interpolation, Orientation, RayCastOptions,
    SamplerOptions, SortBy, Viewport, VolumeLoader, Window, cross_section, decoder,
    project_contour, render, sample_slice, structure_set,
};
use image::{DynamicImage, Rgb, RgbImage};
use tracing::{Level, error, info, warn};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Plane {
    Axial,
    Coronal,
    Sagittal,
}

impl From<Plane> for Orientation {
    fn from(plane: Plane) -> Self {
        match plane {
            Plane::Axial => Orientation::Axial,
            Plane::Coronal => Orientation::Coronal,
            Plane::Sagittal => Orientation::Sagittal,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Sampling {
    Nearest,
    Trilinear,
}

impl From<Sampling> for Interpolation {
    fn from(sampling: Sampling) -> Self {
        match sampling {
            Sampling::Nearest => Interpolation::Nearest,
            Sampling::Trilinear => Interpolation::Trilinear,
        }
    }
}

/// Reslice a DICOM series into an image
#[derive(Debug, Parser)]
struct App {
    /// Directory holding the DICOM slices of one series
    dir: PathBuf,

    /// Plane to reslice
    #[arg(long = "plane", value_enum, default_value = "axial")]
    plane: Plane,

    /// Position of the plane between the first (0) and last (1) voxel layer
    #[arg(long = "depth", default_value = "0.5")]
    depth: f64,

    /// Window center in Hounsfield units
    #[arg(long = "center", default_value = "40", allow_negative_numbers = true)]
    center: f32,

    /// Window width in Hounsfield units
    #[arg(long = "width", default_value = "400")]
    width: f32,

    /// Interpolation between voxels
    #[arg(long = "interpolation", value_enum, default_value = "trilinear")]
    interpolation: Sampling,

    /// Resample so that pixels are square in millimeters
    #[arg(long = "isotropic")]
    isotropic: bool,

    /// Ray-cast the whole volume instead of reslicing it
    #[arg(long = "render", conflicts_with = "structures")]
    render: bool,

    /// Orbit angle of the ray-cast camera in degrees
    #[arg(long = "angle", default_value = "0", allow_negative_numbers = true)]
    angle: f64,

    /// RT structure set whose outlines are drawn onto the slice
    #[arg(long = "structures")]
    structures: Option<PathBuf>,

    /// Path to the output image
    /// (default is `mpr.png`, or `render.png` with `--render`)
    #[arg(short = 'o', long = "out")]
    output: Option<PathBuf>,

    /// Print more information about the volume and the output file
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let App {
        dir,
        plane,
        depth,
        center,
        width,
        interpolation,
        isotropic,
        render: ray_cast,
        angle,
        structures,
        output,
        verbose,
    } = App::parse();

    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(if verbose { Level::DEBUG } else { Level::INFO })
            .finish(),
    )
    .unwrap_or_else(|e| {
        eprintln!("[ERROR] Could not set up global logging subscriber: {e}");
    });

    let loaded = VolumeLoader::load_from_directory_async(&dir, SortBy::ImagePositionPatient)
        .await
        .unwrap_or_else(|e| {
            error!("{e}");
            std::process::exit(-1);
        });
    let volume = loaded.volume;
    let window = Window::new(center, width);

    if verbose {
        println!(
            "{:?} volume, {:?} mm spacing, values {:?}",
            volume.dimensions(),
            volume.spacing(),
            volume.value_range()
        );
    }

    let output = output.unwrap_or_else(|| {
        PathBuf::from(if ray_cast { "render.png" } else { "mpr.png" })
    });

    if ray_cast {
        let options = RayCastOptions::new()
            .with_window(window)
            .with_angle(angle.to_radians());
        let image = render(&volume, &options).to_image().unwrap_or_else(|| {
            error!("Rendered field does not fit an image");
            std::process::exit(-2);
        });
        image.save(&output).unwrap_or_else(|e| {
            error!("{e}");
            std::process::exit(-4);
        });
        if verbose {
            println!("Image saved to {}", output.display());
        }
        return;
    }

    let orientation = Orientation::from(plane);
    // outlines are projected into a letterbox with millimeter aspect
    let isotropic = isotropic || structures.is_some();
    let options = SamplerOptions::new()
        .with_interpolation(interpolation.into())
        .isotropic(isotropic);

    let field = sample_slice(&volume, orientation, depth, window, &options);
    let gray = field.to_image().unwrap_or_else(|| {
        error!("Sampled field does not fit an image");
        std::process::exit(-2);
    });
    let mut image = DynamicImage::ImageLuma8(gray).to_rgb8();

    if let Some(path) = structures {
        let dataset = decoder::decode_file(&path).unwrap_or_else(|e| {
            error!("{}: {e}", path.display());
            std::process::exit(-3);
        });
        for issue in structure_set::validate_structure_set(&dataset) {
            warn!("{}: {issue}", path.display());
        }
        let rois = structure_set::extract_structures(&dataset).unwrap_or_default();

        let authority = CoordinateAuthority::new(&volume);
        let fixed = orientation.axes().fixed;
        let extent = volume.extent_mm()[fixed];
        let depth = if (0.0..=1.0).contains(&depth) { depth } else { 0.5 };
        authority.update_focus({
            let mut focus = authority.focus();
            focus[fixed] = depth * extent;
            focus
        });
        let depth_mm = authority.to_patient(authority.focus())[fixed];
        let viewport = Viewport::new(f64::from(image.width()), f64::from(image.height()));

        for roi in &rois {
            let Some(contour) =
                cross_section(roi, orientation, depth_mm, &CrossSectionOptions::default())
            else {
                continue;
            };
            let polygon = project_contour(&contour, orientation, &authority, viewport);
            info!("{}: {} outline points", roi.name, polygon.len());
            draw_polygon(&mut image, &polygon, contour.closed, Rgb(roi.display_color));
        }
    }

    image.save(&output).unwrap_or_else(|e| {
        error!("{e}");
        std::process::exit(-4);
    });

    if verbose {
        println!("Image saved to {}", output.display());
    }
}

fn draw_polygon(image: &mut RgbImage, points: &[[f64; 2]], closed: bool, color: Rgb<u8>) {
    let closing = if closed && points.len() > 2 {
        points.first().zip(points.last())
    } else {
        None
    };
    let edges = points
        .windows(2)
        .map(|pair| (&pair[0], &pair[1]))
        .chain(closing.map(|(first, last)| (last, first)));
    for (from, to) in edges {
        draw_line(image, *from, *to, color);
    }
}

fn draw_line(image: &mut RgbImage, from: [f64; 2], to: [f64; 2], color: Rgb<u8>) {
    let steps = (to[0] - from[0]).abs().max((to[1] - from[1]).abs()).ceil().max(1.0) as usize;
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = (from[0] + t * (to[0] - from[0])).floor();
        let y = (from[1] + t * (to[1] - from[1])).floor();
        if x >= 0.0 && y >= 0.0 && (x as u32) < image.width() && (y as u32) < image.height() {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}
