//! Packaging pipeline for the CATLAS domestic cat brain atlas.
//!
//! Converts the published dataset (volumetric MRI template, segmentation
//! annotation, label color tables, and Slicer mesh exports) into a
//! standardized atlas package: downloads the source files with checksum
//! verification, builds the hierarchical structure table from the color
//! table and a hand-authored full-name CSV, normalizes the meshes, and
//! wraps everything into a distributable archive.

pub mod download;
pub mod error;
pub mod mesh;
pub mod package;
pub mod structures;
pub mod util;
pub mod volume;

pub use download::{download_resources, SourceFiles};
pub use error::{AtlasGenError, Result};
pub use mesh::{extract_meshes, Mesh};
pub use package::{wrapup_atlas, AtlasMetadata};
pub use structures::{Structure, StructureTable, StructureTree, ROOT_ID};
pub use volume::AtlasVolumes;
