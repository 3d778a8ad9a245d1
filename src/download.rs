//! Resource acquisition: fetching the CATLAS source files into the working
//! directory, verified by MD5 checksum.
//!
//! The dataset is a fixed list of five files served raw from the CATLAS
//! repository. A file already present in the download directory is kept if
//! its checksum still matches, so re-runs of the pipeline are cheap.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{info, warn};

use crate::error::{AtlasGenError, Result};
use crate::util::{check_internet_connection, file_md5};

/// Base URL of the raw Slicer files in the CATLAS repository.
pub const ATLAS_FILE_URL: &str =
    "https://raw.githubusercontent.com/CerebralSystemsLab/CATLAS/main/SlicerFiles/";

/// A remote source file together with its known MD5 checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteResource {
    pub filename: &'static str,
    pub md5: &'static str,
}

/// The fixed set of source files: MRI template, segmentation annotation,
/// label color table, and the split-hemisphere variants of the latter two.
pub const SOURCE_FILES: [RemoteResource; 5] = [
    RemoteResource {
        filename: "meanBrain.nii",
        md5: "84e0d950474bd6c2a4bcebecd0e02ce7",
    },
    RemoteResource {
        filename: "CorticalAtlas.nii",
        md5: "942bbe2483c1d272434b4fd8f8df606f",
    },
    RemoteResource {
        filename: "CATLAS_COLORS.txt",
        md5: "5a48c961ebc1bbc2adb821be173b03e4",
    },
    RemoteResource {
        filename: "CorticalAtlas-Split.nii",
        md5: "7e883fefb60a289c70c4e5553c2c1f6a",
    },
    RemoteResource {
        filename: "CATLAS_COLORS-SPLIT.txt",
        md5: "ff80025b82b51c263ac2d1bfa3b8ae6b",
    },
];

/// Local paths of the fetched source files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFiles {
    pub template: PathBuf,
    pub annotation: PathBuf,
    pub colors: PathBuf,
    pub annotation_split: PathBuf,
    pub colors_split: PathBuf,
}

impl SourceFiles {
    /// The annotation volume to use, split-hemisphere variant or not.
    pub fn annotation_for(&self, split: bool) -> &Path {
        if split {
            &self.annotation_split
        } else {
            &self.annotation
        }
    }

    /// The label color table to use, split-hemisphere variant or not.
    pub fn colors_for(&self, split: bool) -> &Path {
        if split {
            &self.colors_split
        } else {
            &self.colors
        }
    }
}

/// Download all source files into `<working_dir>/download_dir/atlas_dir`,
/// skipping files whose cached copy still verifies.
pub fn download_resources(working_dir: &Path) -> Result<SourceFiles> {
    let download_dir = working_dir.join("download_dir").join("atlas_dir");
    fs::create_dir_all(&download_dir)?;

    check_internet_connection()?;

    let agent = ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(120))
        .build();

    let mut paths: Vec<PathBuf> = Vec::with_capacity(SOURCE_FILES.len());
    for resource in SOURCE_FILES.iter() {
        paths.push(retrieve(&agent, resource, &download_dir)?);
    }

    Ok(SourceFiles {
        template: paths[0].clone(),
        annotation: paths[1].clone(),
        colors: paths[2].clone(),
        annotation_split: paths[3].clone(),
        colors_split: paths[4].clone(),
    })
}

/// Fetch a single resource unless a verified copy is already present.
///
/// The body is streamed to a `.part` file first and only renamed into place
/// after the checksum verifies, so an interrupted download never leaves a
/// plausible-looking file behind.
fn retrieve(agent: &ureq::Agent, resource: &RemoteResource, dir: &Path) -> Result<PathBuf> {
    let dest = dir.join(resource.filename);

    if dest.is_file() {
        if cached_copy_is_valid(&dest, resource.md5)? {
            info!("Using cached copy of '{}'", resource.filename);
            return Ok(dest);
        }
        warn!(
            "Cached copy of '{}' failed checksum verification, fetching again",
            resource.filename
        );
    }

    let url = format!("{}{}", ATLAS_FILE_URL, resource.filename);
    info!("Fetching {}", url);

    let response = agent.get(&url).call()?;
    let mut body = response.into_reader();

    let partial = dir.join(format!("{}.part", resource.filename));
    let mut out = File::create(&partial)?;
    io::copy(&mut body, &mut out)?;
    drop(out);

    let actual = file_md5(&partial)?;
    if actual != resource.md5 {
        fs::remove_file(&partial).ok();
        return Err(AtlasGenError::ChecksumMismatch(
            resource.filename.to_string(),
            resource.md5.to_string(),
            actual,
        ));
    }

    fs::rename(&partial, &dest)?;
    Ok(dest)
}

/// Whether an existing file matches the expected MD5 checksum.
fn cached_copy_is_valid(path: &Path, expected_md5: &str) -> Result<bool> {
    Ok(file_md5(path)? == expected_md5)
}
