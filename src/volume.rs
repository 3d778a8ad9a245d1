//! Volume extraction: loading the MRI template and the segmentation
//! annotation from the fetched NIfTI files.
//!
//! The template is the mean MRI of the subjects, kept as `f32`. The
//! annotation assigns each voxel a structure id; the dataset stores these as
//! floats in the NIfTI, so they are rounded back to integer labels on load.

use std::collections::BTreeSet;
use std::path::Path;

use log::{info, warn};
use ndarray::{Array3, ArrayD, Ix3};
use ndarray_stats::QuantileExt;
use nifti::{IntoNdArray, NiftiObject, ReaderOptions};

use crate::error::{AtlasGenError, Result};

/// Largest deviation from an integer that is still accepted as a label value.
const LABEL_ROUNDING_TOLERANCE: f32 = 1e-3;

/// The two volumetric arrays of the atlas.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasVolumes {
    pub template: Array3<f32>,
    pub annotation: Array3<u32>,
}

impl AtlasVolumes {
    /// Load the template and annotation volumes from the given NIfTI files.
    pub fn load(template_path: &Path, annotation_path: &Path) -> Result<AtlasVolumes> {
        let template = load_volume_f32(template_path)?;
        let (min, max) = intensity_range(&template);
        info!(
            "Loaded template volume {:?}, intensity range [{}, {}]",
            template.dim(),
            min,
            max
        );

        let annotation_raw = load_volume_f32(annotation_path)?;
        let annotation = labels_from_float(&annotation_raw)?;
        info!(
            "Loaded annotation volume {:?}, {} distinct structure labels",
            annotation.dim(),
            unique_labels(&annotation).len()
        );

        if template.dim() != annotation.dim() {
            warn!(
                "Template shape {:?} does not match annotation shape {:?}",
                template.dim(),
                annotation.dim()
            );
        }

        Ok(AtlasVolumes {
            template,
            annotation,
        })
    }

    /// The shape of the template volume, as stored in the package metadata.
    pub fn shape(&self) -> [usize; 3] {
        let (x, y, z) = self.template.dim();
        [x, y, z]
    }
}

/// Read a NIfTI file into a 3-D `f32` array.
pub fn load_volume_f32(path: &Path) -> Result<Array3<f32>> {
    let object = ReaderOptions::new().read_file(path)?;
    let data: ArrayD<f32> = object.into_volume().into_ndarray::<f32>()?;
    let ndim = data.ndim();
    data.into_dimensionality::<Ix3>().map_err(|_| {
        AtlasGenError::UnexpectedVolumeDimensionality(
            path.to_string_lossy().into_owned(),
            ndim,
        )
    })
}

/// Round a float-stored annotation back to integer structure labels.
///
/// Values must be non-negative and within [`LABEL_ROUNDING_TOLERANCE`] of an
/// integer; anything else means the file is not a label image.
pub fn labels_from_float(raw: &Array3<f32>) -> Result<Array3<u32>> {
    for &value in raw.iter() {
        if !value.is_finite() || value < 0.0 {
            return Err(AtlasGenError::InvalidAnnotationVolume(format!(
                "voxel value {} is not a valid structure label",
                value
            )));
        }
        if (value - value.round()).abs() > LABEL_ROUNDING_TOLERANCE {
            return Err(AtlasGenError::InvalidAnnotationVolume(format!(
                "voxel value {} is not close to an integer label",
                value
            )));
        }
    }
    Ok(raw.mapv(|v| v.round() as u32))
}

/// The sorted set of non-zero labels present in the annotation volume.
pub fn unique_labels(annotation: &Array3<u32>) -> Vec<u32> {
    let labels: BTreeSet<u32> = annotation.iter().copied().filter(|&v| v != 0).collect();
    labels.into_iter().collect()
}

/// Minimum and maximum intensity of a volume, NaN voxels ignored.
pub fn intensity_range(volume: &Array3<f32>) -> (f32, f32) {
    (*volume.min_skipnan(), *volume.max_skipnan())
}
