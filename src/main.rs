//! Command line entry point: runs the five pipeline stages in order and
//! writes the atlas archive into the working directory.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::{info, warn};

use catlas_atlasgen::download::download_resources;
use catlas_atlasgen::error::Result;
use catlas_atlasgen::mesh::extract_meshes;
use catlas_atlasgen::package::{wrapup_atlas, AtlasMetadata, RESOLUTION_MICRONS};
use catlas_atlasgen::structures::{StructureTable, StructureTree};
use catlas_atlasgen::volume::{unique_labels, AtlasVolumes};

/// Package the CATLAS domestic cat brain atlas into a standardized atlas archive.
#[derive(Parser, Debug)]
#[command(name = "catlas-atlasgen", version, about)]
struct Args {
    /// Working directory for downloads, intermediate files and the package.
    #[arg(long, default_value = "catlas_workingdir")]
    working_dir: PathBuf,

    /// Hand-authored CSV mapping region acronyms to full names
    /// (transcribed from table 1 of the paper, cerebellum added).
    #[arg(long)]
    names_csv: PathBuf,

    /// Directory of Slicer model exports (OBJ or binary VTK).
    /// Mesh extraction is skipped when not given.
    #[arg(long)]
    mesh_dir: Option<PathBuf>,

    /// Use the split-hemisphere annotation volume and color table.
    #[arg(long)]
    split: bool,

    /// Print the structure hierarchy after building it.
    #[arg(long)]
    print_tree: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(err) = run(&args) {
        eprintln!("error: {}", err);
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    fs::create_dir_all(&args.working_dir)?;

    info!("Downloading source files");
    let sources = download_resources(&args.working_dir)?;

    info!("Loading template and annotation volumes");
    let volumes = AtlasVolumes::load(&sources.template, sources.annotation_for(args.split))?;

    info!("Building the structure table");
    let table = StructureTable::from_files(sources.colors_for(args.split), &args.names_csv)?;
    info!("{}", table);

    let tree = StructureTree::from_table(&table)?;
    if args.print_tree {
        print!("{}", tree);
    }

    cross_check_labels(&volumes, &table);

    let meshes = match &args.mesh_dir {
        Some(mesh_dir) => {
            info!("Extracting meshes from '{}'", mesh_dir.display());
            extract_meshes(
                mesh_dir,
                &table,
                &args.working_dir.join("meshes"),
                [RESOLUTION_MICRONS; 3],
            )?
        }
        None => {
            warn!("No mesh directory given, packaging without meshes");
            BTreeMap::new()
        }
    };

    info!("Packaging the atlas");
    let metadata = AtlasMetadata::catlas(volumes.shape());
    let archive = wrapup_atlas(
        &metadata,
        &sources.template,
        sources.annotation_for(args.split),
        &table,
        &meshes,
        &args.working_dir,
    )?;

    info!("Done: '{}'", archive.display());
    Ok(())
}

/// Warn about disagreements between the annotation labels and the table.
fn cross_check_labels(volumes: &AtlasVolumes, table: &StructureTable) {
    let labels = unique_labels(&volumes.annotation);
    for &label in &labels {
        if table.get(label as i64).is_none() {
            warn!(
                "Annotation label {} has no row in the structure table",
                label
            );
        }
    }
    for id in table.leaf_ids() {
        if !labels.contains(&(id as u32)) {
            warn!("Structure {} has no voxels in the annotation", id);
        }
    }
}
