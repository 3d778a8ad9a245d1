//! Packaging: laying out the atlas package directory and compressing it into
//! the distributable archive.
//!
//! The package is a directory with `metadata.json`, `structures.json`, the
//! reference and annotation volumes as gzipped NIfTI, and one OBJ mesh per
//! structure, wrapped into a `.tar.gz`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::structures::{StructureTable, ROOT_ID};
use crate::util::is_gz_file;

pub const ATLAS_NAME: &str = "catlas";
pub const ATLAS_VERSION: u32 = 1;
pub const CITATION: &str = "Stolzberg, Daniel et al 2017. https://doi.org/10.1002/cne.24271";
pub const SPECIES: &str = "Felis catus";
pub const ATLAS_LINK: &str = "https://github.com/CerebralSystemsLab/CATLAS";
pub const ORIENTATION: &str = "lps";
pub const RESOLUTION_MICRONS: f64 = 500.0;
pub const ATLAS_PACKAGER: &str = "Henry Crosswell";

/// The descriptive metadata written to `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtlasMetadata {
    pub name: String,
    pub version: String,
    pub citation: String,
    pub atlas_link: String,
    pub species: String,
    pub orientation: String,
    /// Voxel size in micrometers per axis.
    pub resolution: [f64; 3],
    /// Shape of the template volume in voxels.
    pub shape: [usize; 3],
    pub root_id: i64,
    pub packager: String,
}

impl AtlasMetadata {
    /// Metadata for this dataset, with the shape filled in from the loaded
    /// template volume.
    pub fn catlas(shape: [usize; 3]) -> AtlasMetadata {
        AtlasMetadata {
            name: String::from(ATLAS_NAME),
            version: ATLAS_VERSION.to_string(),
            citation: String::from(CITATION),
            atlas_link: String::from(ATLAS_LINK),
            species: String::from(SPECIES),
            orientation: String::from(ORIENTATION),
            resolution: [RESOLUTION_MICRONS; 3],
            shape,
            root_id: ROOT_ID,
            packager: String::from(ATLAS_PACKAGER),
        }
    }

    /// Directory and archive base name, e.g. `catlas_v1`.
    pub fn package_name(&self) -> String {
        format!("{}_v{}", self.name, self.version)
    }
}

/// Assemble the package directory and compress it into
/// `<working_dir>/<name>_v<version>.tar.gz`. Returns the archive path.
pub fn wrapup_atlas(
    metadata: &AtlasMetadata,
    template_path: &Path,
    annotation_path: &Path,
    table: &StructureTable,
    meshes: &BTreeMap<i64, PathBuf>,
    working_dir: &Path,
) -> Result<PathBuf> {
    let package_name = metadata.package_name();
    let package_dir = working_dir.join(&package_name);
    if package_dir.exists() {
        fs::remove_dir_all(&package_dir)?;
    }
    fs::create_dir_all(&package_dir)?;

    let metadata_file = File::create(package_dir.join("metadata.json"))?;
    serde_json::to_writer_pretty(BufWriter::new(metadata_file), metadata)?;

    let structures_file = File::create(package_dir.join("structures.json"))?;
    serde_json::to_writer_pretty(BufWriter::new(structures_file), &table.structures)?;

    copy_volume(template_path, &package_dir.join("reference.nii.gz"))?;
    copy_volume(annotation_path, &package_dir.join("annotation.nii.gz"))?;

    if !meshes.is_empty() {
        let meshes_dir = package_dir.join("meshes");
        fs::create_dir_all(&meshes_dir)?;
        for (id, mesh_path) in meshes {
            fs::copy(mesh_path, meshes_dir.join(format!("{}.obj", id)))?;
        }
        info!("Packaged {} meshes", meshes.len());
    }

    let archive_path = working_dir.join(format!("{}.tar.gz", package_name));
    let archive = File::create(&archive_path)?;
    let encoder = GzEncoder::new(BufWriter::new(archive), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(&package_name, &package_dir)?;
    let encoder = builder.into_inner()?;
    encoder.finish()?;

    info!("Wrote atlas package '{}'", archive_path.display());
    Ok(archive_path)
}

/// Copy a volume file into the package, gzipping it unless it already is.
fn copy_volume(source: &Path, dest: &Path) -> Result<()> {
    let mut input = BufReader::new(File::open(source)?);
    if is_gz_file(source) {
        let mut output = File::create(dest)?;
        io::copy(&mut input, &mut output)?;
    } else {
        let output = File::create(dest)?;
        let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()?;
    }
    Ok(())
}
