use crate::{
    dataset::Dataset,
    decoder::{self, DecodeError},
    enums::SortBy,
    image_slice::{ImageSlice, try_extract_image},
    structure_set::{RoiStructure, extract_structures, is_structure_set},
    volume::Volume,
};

use futures::{StreamExt, TryStreamExt, stream};
use ndarray::{Array2, Array3, s};
use rayon::prelude::*;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use web_time::Instant;

/// Files read concurrently by the async loader
const CONCURRENT_READS: usize = 16;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("No slices to assemble")]
    EmptyInput,

    #[error("Inconsistent geometry: {0}")]
    InconsistentGeometry(String),
}

#[derive(Debug, Error)]
pub enum VolumeLoaderError {
    #[error("No valid DICOM images found")]
    NoValidImages,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    #[error("Loader task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// A file that did not contribute to the volume.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// What a load made of the files it was given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    /// Number of image slices stacked into the volume
    pub images: usize,
    /// Structures of every structure set file encountered
    pub structures: Vec<RoiStructure>,
    pub skipped: Vec<SkippedFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadedVolume {
    pub volume: Volume,
    pub report: LoadReport,
}

/// Result of decoding a single file
enum FileContent {
    Image(Box<ImageSlice>),
    Structures(Vec<RoiStructure>),
    Unusable(String),
}

impl FileContent {
    fn from_decoded(decoded: Result<Dataset, DecodeError>) -> Self {
        match decoded {
            Ok(dataset) => Self::from_dataset(&dataset),
            Err(e) => Self::Unusable(e.to_string()),
        }
    }

    fn from_dataset(dataset: &Dataset) -> Self {
        if is_structure_set(dataset) {
            return match extract_structures(dataset) {
                Some(structures) => Self::Structures(structures),
                None => Self::Unusable("structure set without readable structures".to_string()),
            };
        }
        match try_extract_image(dataset) {
            Ok(slice) => Self::Image(Box::new(slice)),
            Err(e) => Self::Unusable(e.to_string()),
        }
    }
}

pub struct VolumeLoader;

impl VolumeLoader {
    /// Stack extracted slices into a volume.
    ///
    /// # Arguments
    ///
    /// * `slices` - Slices of one series, in any order
    /// * `sort_by` - Method to sort the slices
    ///
    /// # Errors
    ///
    /// Returns error if `slices` is empty, the slices differ in size, or
    /// their positions do not yield a usable spacing between slices.
    pub fn assemble(mut slices: Vec<ImageSlice>, sort_by: SortBy) -> Result<Volume, AssemblyError> {
        let first = slices.first().ok_or(AssemblyError::EmptyInput)?;
        let (rows, columns, bits) = (first.rows, first.columns, first.bits_allocated);
        let normal = first.normal();

        if rows == 0 || columns == 0 {
            return Err(AssemblyError::InconsistentGeometry(format!(
                "empty {rows}x{columns} image plane"
            )));
        }
        if let Some(other) = slices.iter().find(|slice| {
            (slice.rows, slice.columns, slice.bits_allocated) != (rows, columns, bits)
        }) {
            return Err(AssemblyError::InconsistentGeometry(format!(
                "{}x{} slice of {} bits in a stack of {rows}x{columns} with {bits} bits",
                other.rows, other.columns, other.bits_allocated
            )));
        }
        let [row_spacing, column_spacing] = first.spacing_mm;
        if !(row_spacing > 0.0 && column_spacing > 0.0) {
            return Err(AssemblyError::InconsistentGeometry(format!(
                "pixel spacing {:?}",
                first.spacing_mm
            )));
        }

        Self::sort_slices(&mut slices, sort_by, normal);
        let depth_spacing = Self::depth_spacing(&slices, normal)?;

        let origin = slices[0].position_mm;
        let data = Self::build_volume_array(&slices)?;
        Ok(Volume::new(
            data,
            [column_spacing, row_spacing, depth_spacing],
            origin,
        ))
    }

    /// Load a volume from already decoded datasets.
    ///
    /// Datasets without a usable image are ignored.
    pub fn load_from_datasets(
        datasets: &[Dataset],
        sort_by: SortBy,
    ) -> Result<Volume, VolumeLoaderError> {
        let slices: Vec<_> = datasets
            .iter()
            .filter_map(|dataset| try_extract_image(dataset).ok())
            .collect();

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }

        Ok(Self::assemble(slices, sort_by)?)
    }

    /// Load a volume from file paths, decoding in parallel.
    ///
    /// Files that cannot be decoded are skipped and listed in the report.
    pub fn load_from_file_paths(
        paths: &[impl AsRef<Path> + Sync],
        sort_by: SortBy,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        let start = Instant::now();
        let contents: Vec<_> = paths
            .par_iter()
            .map(|path| {
                let path = path.as_ref();
                (
                    path.to_path_buf(),
                    FileContent::from_decoded(decoder::decode_file(path)),
                )
            })
            .collect();

        Self::finish(contents, sort_by, start)
    }

    /// Load a volume from a directory of DICOM files.
    ///
    /// Files with a `.dcm` extension or no extension at all are read.
    pub fn load_from_directory(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        let mut paths: Vec<_> = fs::read_dir(path.as_ref())?
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
            .map(|entry| entry.path())
            .filter(|path| is_candidate(path))
            .collect();

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        paths.sort();

        Self::load_from_file_paths(&paths, sort_by)
    }

    /// Like [`VolumeLoader::load_from_directory`], reading files concurrently
    /// on the tokio runtime and decoding them on blocking workers.
    pub async fn load_from_directory_async(
        path: impl AsRef<Path>,
        sort_by: SortBy,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        let start = Instant::now();
        let mut entries = tokio::fs::read_dir(path.as_ref()).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() && is_candidate(&entry.path()) {
                paths.push(entry.path());
            }
        }

        if paths.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        paths.sort();

        let contents: Vec<_> = stream::iter(paths)
            .map(|path| async move {
                let content = match tokio::fs::read(&path).await {
                    Ok(bytes) => {
                        tokio::task::spawn_blocking(move || {
                            FileContent::from_decoded(decoder::decode(&bytes))
                        })
                        .await?
                    }
                    Err(e) => FileContent::Unusable(e.to_string()),
                };
                Ok::<_, VolumeLoaderError>((path, content))
            })
            .buffered(CONCURRENT_READS)
            .try_collect()
            .await?;

        Self::finish(contents, sort_by, start)
    }

    fn finish(
        contents: Vec<(PathBuf, FileContent)>,
        sort_by: SortBy,
        start: Instant,
    ) -> Result<LoadedVolume, VolumeLoaderError> {
        let mut report = LoadReport::default();
        let mut slices = Vec::new();

        for (path, content) in contents {
            match content {
                FileContent::Image(slice) => {
                    debug!("Image slice from {}", path.display());
                    slices.push(*slice);
                }
                FileContent::Structures(structures) => {
                    debug!(
                        "{} structures from {}",
                        structures.len(),
                        path.display()
                    );
                    report.structures.extend(structures);
                }
                FileContent::Unusable(reason) => {
                    warn!("Skipping {}: {reason}", path.display());
                    report.skipped.push(SkippedFile { path, reason });
                }
            }
        }

        if slices.is_empty() {
            return Err(VolumeLoaderError::NoValidImages);
        }
        report.images = slices.len();

        let volume = Self::assemble(slices, sort_by)?;
        info!(
            "Loaded volume {:?} with spacing {:?} from {} files in {:?} ({} skipped)",
            volume.dimensions(),
            volume.spacing(),
            report.images,
            start.elapsed(),
            report.skipped.len()
        );

        Ok(LoadedVolume { volume, report })
    }

    fn sort_slices(slices: &mut [ImageSlice], sort_by: SortBy, normal: [f64; 3]) {
        match sort_by {
            SortBy::ImagePositionPatient => slices.sort_by(|a, b| {
                project(a.position_mm, normal).total_cmp(&project(b.position_mm, normal))
            }),
            // slices without a number go last
            SortBy::InstanceNumber => slices.sort_by_key(|slice| {
                (slice.instance_number.is_none(), slice.instance_number)
            }),
            SortBy::None => {}
        }
    }

    /// Median distance between neighboring slices along `normal`.
    fn depth_spacing(slices: &[ImageSlice], normal: [f64; 3]) -> Result<f64, AssemblyError> {
        if let [single] = slices {
            let [row_spacing, _] = single.spacing_mm;
            return Ok(single
                .slice_thickness
                .filter(|t| t.is_finite() && *t > 0.0)
                .unwrap_or(row_spacing));
        }

        let mut deltas: Vec<f64> = slices
            .windows(2)
            .map(|pair| {
                (project(pair[1].position_mm, normal) - project(pair[0].position_mm, normal)).abs()
            })
            .collect();
        deltas.sort_by(f64::total_cmp);
        let middle = deltas.len() / 2;
        let median = if deltas.len() % 2 == 0 {
            (deltas[middle - 1] + deltas[middle]) / 2.0
        } else {
            deltas[middle]
        };

        if !(median.is_finite() && median > 0.0) {
            return Err(AssemblyError::InconsistentGeometry(format!(
                "{} slices share one position",
                slices.len()
            )));
        }
        Ok(median)
    }

    fn build_volume_array(slices: &[ImageSlice]) -> Result<Array3<i16>, AssemblyError> {
        let height = usize::from(slices[0].rows);
        let width = usize::from(slices[0].columns);
        let depth = slices.len();
        let mut volume = Array3::<i16>::zeros((depth, height, width));

        for (i, slice) in slices.iter().enumerate() {
            let image = Array2::from_shape_vec((height, width), slice.hu_samples())
                .map_err(|e| AssemblyError::InconsistentGeometry(format!("slice {i}: {e}")))?;
            volume.slice_mut(s![i, .., ..]).assign(&image);
        }

        Ok(volume)
    }
}

#[inline]
fn project(position: [f64; 3], normal: [f64; 3]) -> f64 {
    position[0] * normal[0] + position[1] * normal[1] + position[2] * normal[2]
}

fn is_candidate(path: &Path) -> bool {
    match path.extension().and_then(|s| s.to_str()) {
        Some(ext) => ext.eq_ignore_ascii_case("dcm"),
        None => true,
    }
}
