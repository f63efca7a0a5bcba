//! # DICOM-MPR library
//!
//! This crate turns a directory of DICOM slices into a volume that can be
//! resliced along the three medical axes, overlaid with RT structure set
//! contours and ray-cast.
//!
//! Part-10 files are decoded by a small bounds-checked tag stream decoder
//! that uses the dicom-rs data dictionary for implicit VR lookups. If the
//! environment supports it the files are decoded in parallel using rayon.
//! The volume can be sliced in the three different medical axes:
//!  - Axial
//!  - Coronal
//!  - Sagittal
//!
//!  Library consumers can chose whether the Coronal and Sagittal slices
//!  should be resampled isotropically to preserve the aspect ratios of the
//!  images. Sagittal and Coronal slices are always shown with superior up.
//!  DICOM files are assumed to have the following attributes:
//!   - Uncompressed, little endian transfer syntax
//!   - No multiframe, one sample per pixel
//!   - Images from the same series (Series Instance UID) and acquisition
//!     (Acquisition Number)
//!
//! All screen ↔ world conversions go through a [`CoordinateAuthority`],
//! which also owns the current focus position.
//!
//! # Examples
//!
//! ## Reading multiple DICOM files into a volume
//!
//! To read all DICOM files from the dicom/ directory, sort them by their
//! position along the acquisition normal. Then get the image at the center
//! of the volume in the Sagittal axis.
//!
//! ```no_run
//! # use dicom_mpr::{VolumeLoader, Orientation, SamplerOptions, SortBy, Window};
//! let loaded = VolumeLoader::load_from_directory("dicom", SortBy::ImagePositionPatient)
//!     .expect("should have loaded files from directory");
//! let volume = loaded.volume;
//! let image = volume
//!     .get_image_from_axis(
//!         volume.dimensions()[0] / 2,
//!         Orientation::Sagittal,
//!         Window::soft_tissue(),
//!         &SamplerOptions::new().isotropic(true),
//!     )
//!     .expect("should have returned image at center of volume");
//! image.save("result.png").expect("should have written image");
//! ```
//!
//! ## Cross-sectioning a structure
//!
//! ```no_run
//! # use dicom_mpr::{decoder, structure_set, CoordinateAuthority, CrossSectionOptions};
//! # use dicom_mpr::{Orientation, SortBy, Viewport, VolumeLoader, cross_section, project_contour};
//! let volume = VolumeLoader::load_from_directory("dicom", SortBy::default())
//!     .expect("should have loaded files from directory")
//!     .volume;
//! let dataset = decoder::decode_file("dicom/rtstruct.dcm").expect("should decode");
//! let structures = structure_set::extract_structures(&dataset).unwrap_or_default();
//! let authority = CoordinateAuthority::new(&volume);
//! let depth = authority.to_patient(authority.focus())[0];
//! for structure in &structures {
//!     if let Some(contour) =
//!         cross_section(structure, Orientation::Sagittal, depth, &CrossSectionOptions::default())
//!     {
//!         let viewport = Viewport::new(512.0, 512.0);
//!         let polygon = project_contour(&contour, Orientation::Sagittal, &authority, viewport);
//!         println!("{}: {} points", structure.name, polygon.len());
//!     }
//! }
//! ```

pub mod coordinates;
pub mod cross_section;
pub mod dataset;
pub mod decoder;
pub mod enums;
pub mod image_slice;
mod interpolator;
pub mod plane;
pub mod raycaster;
pub mod sampler;
pub mod structure_set;
pub mod volume;
pub mod volume_loader;
pub mod window;

pub use coordinates::{CoordinateAuthority, FocusPosition, Letterbox, Viewport};
pub use cross_section::{CrossSectionOptions, cross_section, project_contour};
pub use dataset::{Dataset, Element, ExtractionError};
pub use decoder::{DecodeError, DecodeOptions, DecodingMode, decode, decode_file};
pub use enums::{Interpolation, Orientation, SortBy};
pub use image_slice::{ImageSlice, SampleBuffer, extract_image};
pub use plane::PlaneAxes;
pub use raycaster::{ColorField, RayCastOptions, TissueBand, TransferFunction, render};
pub use sampler::{GrayField, SamplerOptions, sample_slice};
pub use structure_set::{Contour, RoiStructure, extract_structures};
pub use volume::Volume;
pub use volume_loader::{AssemblyError, LoadReport, LoadedVolume, VolumeLoader, VolumeLoaderError};
pub use window::Window;
