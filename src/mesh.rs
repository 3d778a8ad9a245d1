//! Mesh extraction: converting the directory of Slicer model exports into
//! normalized OBJ meshes keyed by structure id.
//!
//! Slicer writes one model file per region, named by the region acronym,
//! either as Wavefront OBJ or as legacy binary VTK polydata. Re-exports left
//! behind in the model directory carry a copy suffix on the stem and are
//! skipped. The root structure gets the merge of all region meshes.

use byteordered::ByteOrdered;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::{AtlasGenError, Result};
use crate::structures::{StructureTable, ROOT_ID};

/// A triangular surface mesh. Vertices are stored as a flat x,y,z sequence,
/// faces as a flat sequence of vertex-index triples.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh {
    pub vertices: Vec<f32>,
    pub faces: Vec<u32>,
}

impl Mesh {
    pub fn new() -> Mesh {
        Mesh {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn num_faces(&self) -> usize {
        self.faces.len() / 3
    }

    /// Read a mesh file, dispatching on the extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Mesh> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        match extension.as_str() {
            "obj" => {
                let file = BufReader::new(File::open(path)?);
                Mesh::obj_from_reader(file)
            }
            "vtk" => {
                let file = BufReader::new(File::open(path)?);
                Mesh::vtk_from_reader(file)
            }
            _ => Err(AtlasGenError::InvalidMeshFormat(format!(
                "unsupported mesh file extension in '{}'",
                path.display()
            ))),
        }
    }

    /// Parse a Wavefront OBJ mesh. Only `v` and `f` records contribute;
    /// polygonal faces are fan-triangulated.
    pub fn obj_from_reader<R: BufRead>(input: R) -> Result<Mesh> {
        let mut mesh = Mesh::new();

        for (line_idx, line) in input.lines().enumerate() {
            let line = line?;
            let line_no = line_idx + 1;
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("v") => {
                    for _ in 0..3 {
                        let field = fields.next().ok_or_else(|| {
                            AtlasGenError::InvalidMeshFormat(format!(
                                "OBJ line {}: vertex with fewer than 3 coordinates",
                                line_no
                            ))
                        })?;
                        let coord: f32 = field.parse().map_err(|_| {
                            AtlasGenError::InvalidMeshFormat(format!(
                                "OBJ line {}: invalid coordinate '{}'",
                                line_no, field
                            ))
                        })?;
                        mesh.vertices.push(coord);
                    }
                }
                Some("f") => {
                    let mut indices: Vec<u32> = Vec::new();
                    for field in fields {
                        indices.push(parse_obj_index(field, mesh.num_vertices(), line_no)?);
                    }
                    if indices.len() < 3 {
                        return Err(AtlasGenError::InvalidMeshFormat(format!(
                            "OBJ line {}: face with fewer than 3 vertices",
                            line_no
                        )));
                    }
                    for i in 1..indices.len() - 1 {
                        mesh.faces.push(indices[0]);
                        mesh.faces.push(indices[i]);
                        mesh.faces.push(indices[i + 1]);
                    }
                }
                // vn, vt, comments, groups and materials are irrelevant here.
                _ => {}
            }
        }

        Ok(mesh)
    }

    /// Parse a legacy VTK polydata file in BINARY encoding, as written by
    /// Slicer model exports. Point coordinates and polygon connectivity are
    /// stored big-endian after their ASCII section headers.
    pub fn vtk_from_reader<R: BufRead>(mut input: R) -> Result<Mesh> {
        let magic = read_text_line(&mut input)?;
        if !magic.starts_with("# vtk DataFile") {
            return Err(AtlasGenError::InvalidMeshFormat(String::from(
                "missing VTK header magic",
            )));
        }
        let _title = read_text_line(&mut input)?;

        let encoding = read_nonblank_line(&mut input)?;
        if !encoding.trim().eq_ignore_ascii_case("BINARY") {
            return Err(AtlasGenError::InvalidMeshFormat(format!(
                "unsupported VTK encoding '{}', expected BINARY",
                encoding.trim()
            )));
        }

        let dataset = read_nonblank_line(&mut input)?;
        if !dataset.trim().eq_ignore_ascii_case("DATASET POLYDATA") {
            return Err(AtlasGenError::InvalidMeshFormat(format!(
                "unsupported VTK dataset '{}', expected POLYDATA",
                dataset.trim()
            )));
        }

        let points_line = read_nonblank_line(&mut input)?;
        let num_points = parse_vtk_points_header(&points_line)?;

        let mut vertices: Vec<f32> = Vec::with_capacity(num_points * 3);
        {
            let mut binary = ByteOrdered::be(&mut input);
            for _ in 0..num_points * 3 {
                vertices.push(binary.read_f32()?);
            }
        }

        // The binary block is followed by a newline, then the POLYGONS header.
        let mut polygons_header = read_nonblank_line(&mut input)?;
        while !polygons_header.trim_start().starts_with("POLYGONS") {
            polygons_header = read_nonblank_line(&mut input)?;
        }
        let num_polygons = parse_vtk_polygons_header(&polygons_header)?;

        let mut faces: Vec<u32> = Vec::with_capacity(num_polygons * 3);
        {
            let mut binary = ByteOrdered::be(&mut input);
            for _ in 0..num_polygons {
                let polygon_size = binary.read_i32()?;
                if polygon_size < 3 {
                    return Err(AtlasGenError::InvalidMeshFormat(format!(
                        "VTK polygon with {} vertices",
                        polygon_size
                    )));
                }
                let mut indices: Vec<u32> = Vec::with_capacity(polygon_size as usize);
                for _ in 0..polygon_size {
                    let index = binary.read_i32()?;
                    if index < 0 || index as usize >= num_points {
                        return Err(AtlasGenError::InvalidMeshFormat(format!(
                            "VTK polygon references vertex {} of {}",
                            index, num_points
                        )));
                    }
                    indices.push(index as u32);
                }
                for i in 1..indices.len() - 1 {
                    faces.push(indices[0]);
                    faces.push(indices[i]);
                    faces.push(indices[i + 1]);
                }
            }
        }

        Ok(Mesh { vertices, faces })
    }

    /// Merge this mesh with another one into a new mesh. Face indices of
    /// `other` are shifted past this mesh's vertices.
    pub fn merge(&self, other: &Mesh) -> Mesh {
        let offset = self.num_vertices() as u32;
        let mut merged = self.clone();
        merged.vertices.extend_from_slice(&other.vertices);
        merged
            .faces
            .extend(other.faces.iter().map(|&idx| idx + offset));
        merged
    }

    /// The mean of all vertex coordinates, or `None` for an empty mesh.
    pub fn center(&self) -> Option<[f32; 3]> {
        let n = self.num_vertices();
        if n == 0 {
            return None;
        }
        let mut sums = [0.0f64; 3];
        for vertex in self.vertices.chunks_exact(3) {
            for axis in 0..3 {
                sums[axis] += vertex[axis] as f64;
            }
        }
        Some([
            (sums[0] / n as f64) as f32,
            (sums[1] / n as f64) as f32,
            (sums[2] / n as f64) as f32,
        ])
    }

    /// Translate all vertices by the given offset.
    pub fn translate(&mut self, offset: [f32; 3]) {
        for vertex in self.vertices.chunks_exact_mut(3) {
            for axis in 0..3 {
                vertex[axis] += offset[axis];
            }
        }
    }

    /// Scale all vertices by per-axis factors. Used to bring meshes from
    /// voxel units into micrometers via the atlas resolution.
    pub fn scale(&mut self, factors: [f32; 3]) {
        for vertex in self.vertices.chunks_exact_mut(3) {
            for axis in 0..3 {
                vertex[axis] *= factors[axis];
            }
        }
    }

    /// Serialize the mesh in Wavefront OBJ format, 1-based face indices.
    pub fn to_obj(&self) -> String {
        let mut obj = String::new();
        for vertex in self.vertices.chunks_exact(3) {
            obj.push_str(&format!("v {} {} {}\n", vertex[0], vertex[1], vertex[2]));
        }
        for face in self.faces.chunks_exact(3) {
            obj.push_str(&format!("f {} {} {}\n", face[0] + 1, face[1] + 1, face[2] + 1));
        }
        obj
    }
}

impl Default for Mesh {
    fn default() -> Mesh {
        Mesh::new()
    }
}

/// Parse a single OBJ face index, which may carry `/texture/normal` parts.
fn parse_obj_index(field: &str, num_vertices: usize, line_no: usize) -> Result<u32> {
    let vertex_part = field.split('/').next().unwrap_or(field);
    let index: i64 = vertex_part.parse().map_err(|_| {
        AtlasGenError::InvalidMeshFormat(format!(
            "OBJ line {}: invalid face index '{}'",
            line_no, field
        ))
    })?;
    if index < 1 || index as usize > num_vertices {
        return Err(AtlasGenError::InvalidMeshFormat(format!(
            "OBJ line {}: face index {} out of range (mesh has {} vertices)",
            line_no, index, num_vertices
        )));
    }
    Ok((index - 1) as u32)
}

fn read_text_line<R: BufRead>(input: &mut R) -> Result<String> {
    let mut line = String::new();
    let bytes = input.read_line(&mut line)?;
    if bytes == 0 {
        return Err(AtlasGenError::InvalidMeshFormat(String::from(
            "unexpected end of VTK file",
        )));
    }
    Ok(line)
}

fn read_nonblank_line<R: BufRead>(input: &mut R) -> Result<String> {
    loop {
        let line = read_text_line(input)?;
        if !line.trim().is_empty() {
            return Ok(line);
        }
    }
}

/// Parse "POINTS <n> float".
fn parse_vtk_points_header(line: &str) -> Result<usize> {
    let mut fields = line.split_whitespace();
    if fields.next() != Some("POINTS") {
        return Err(AtlasGenError::InvalidMeshFormat(format!(
            "expected POINTS section, got '{}'",
            line.trim()
        )));
    }
    let count: usize = fields
        .next()
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| {
            AtlasGenError::InvalidMeshFormat(String::from("missing point count in POINTS header"))
        })?;
    match fields.next() {
        Some("float") => Ok(count),
        other => Err(AtlasGenError::InvalidMeshFormat(format!(
            "unsupported VTK point type {:?}, expected float",
            other
        ))),
    }
}

/// Parse "POLYGONS <n> <total ints>".
fn parse_vtk_polygons_header(line: &str) -> Result<usize> {
    let mut fields = line.split_whitespace();
    if fields.next() != Some("POLYGONS") {
        return Err(AtlasGenError::InvalidMeshFormat(format!(
            "expected POLYGONS section, got '{}'",
            line.trim()
        )));
    }
    fields.next().and_then(|f| f.parse().ok()).ok_or_else(|| {
        AtlasGenError::InvalidMeshFormat(String::from("missing polygon count in POLYGONS header"))
    })
}

/// Whether a model file stem looks like a Slicer re-export of another file.
/// The model directory of the dataset contains a handful of these.
pub fn is_duplicate_export(stem: &str) -> bool {
    let lowered = stem.to_ascii_lowercase();
    stem.ends_with(" 2") || stem.ends_with("_2") || lowered.ends_with(" copy")
}

/// Convert all model files in `mesh_dir` into per-structure OBJ files under
/// `out_dir`, keyed by structure id. Vertices are scaled from voxel units to
/// micrometers by `resolution`. Returns the id-to-path map, including the
/// merged root mesh when any region mesh was found.
pub fn extract_meshes(
    mesh_dir: &Path,
    table: &StructureTable,
    out_dir: &Path,
    resolution: [f64; 3],
) -> Result<BTreeMap<i64, PathBuf>> {
    fs::create_dir_all(out_dir)?;

    let mut model_files: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(mesh_dir)? {
        let path = entry?.path();
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if path.is_file() && (extension == "obj" || extension == "vtk") {
            model_files.push(path);
        }
    }
    model_files.sort();

    let scale_factors = [
        resolution[0] as f32,
        resolution[1] as f32,
        resolution[2] as f32,
    ];

    let mut meshes: BTreeMap<i64, PathBuf> = BTreeMap::new();
    let mut root_mesh = Mesh::new();

    for path in &model_files {
        let stem = match path.file_stem() {
            Some(stem) => stem.to_string_lossy().into_owned(),
            None => continue,
        };

        if is_duplicate_export(&stem) {
            info!("Skipping duplicate model export '{}'", path.display());
            continue;
        }

        let id = match table.id_for_acronym(stem.trim()) {
            Some(id) => id,
            None => {
                warn!(
                    "Model file '{}' matches no acronym in the structure table",
                    path.display()
                );
                continue;
            }
        };

        if meshes.contains_key(&id) {
            warn!(
                "Structure {} already has a mesh, skipping '{}'",
                id,
                path.display()
            );
            continue;
        }

        let mut mesh = Mesh::from_file(path)?;
        mesh.scale(scale_factors);

        let out_path = out_dir.join(format!("{}.obj", id));
        fs::write(&out_path, mesh.to_obj())?;
        info!(
            "Converted '{}' ({} vertices, {} faces) -> '{}'",
            path.display(),
            mesh.num_vertices(),
            mesh.num_faces(),
            out_path.display()
        );

        root_mesh = root_mesh.merge(&mesh);
        meshes.insert(id, out_path);
    }

    if !meshes.is_empty() {
        let root_path = out_dir.join(format!("{}.obj", ROOT_ID));
        fs::write(&root_path, root_mesh.to_obj())?;
        meshes.insert(ROOT_ID, root_path);
    }

    Ok(meshes)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::structures::StructureTable;
    use approx::assert_abs_diff_eq;
    use byteordered::byteorder::{BigEndian, WriteBytesExt};
    use std::io::Cursor;

    const TETRA_OBJ: &str = "\
# a tetrahedron
v 0 0 0
v 1 0 0
v 0 1 0
v 0 0 1
f 1 2 3
f 1/4/1 2/5/2 4/6/3
f 1 3 4
f 2 3 4
";

    fn fixture_table() -> StructureTable {
        let colors = "h1\nh2\n1 A1 255 0 0 255\n2 A2 0 255 0 255\n";
        let names = "A1,primary auditory cortex\nA2,secondary auditory cortex\n";
        StructureTable::from_readers(Cursor::new(colors), Cursor::new(names)).unwrap()
    }

    #[test]
    fn an_obj_mesh_can_be_read() {
        let mesh = Mesh::obj_from_reader(Cursor::new(TETRA_OBJ)).unwrap();
        assert_eq!(4, mesh.num_vertices());
        assert_eq!(4, mesh.num_faces());
        // Slash-separated face references keep only the vertex index.
        assert_eq!(&[0, 1, 3], &mesh.faces[3..6]);
    }

    #[test]
    fn polygonal_obj_faces_are_fan_triangulated() {
        let quad = "v 0 0 0\nv 1 0 0\nv 1 1 0\nv 0 1 0\nf 1 2 3 4\n";
        let mesh = Mesh::obj_from_reader(Cursor::new(quad)).unwrap();
        assert_eq!(2, mesh.num_faces());
        assert_eq!(vec![0, 1, 2, 0, 2, 3], mesh.faces);
    }

    #[test]
    fn an_out_of_range_face_index_is_rejected() {
        let broken = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 5\n";
        assert!(Mesh::obj_from_reader(Cursor::new(broken)).is_err());
    }

    #[test]
    fn a_binary_vtk_polydata_mesh_can_be_read() {
        let mut bytes: Vec<u8> = Vec::new();
        bytes.extend_from_slice(b"# vtk DataFile Version 3.0\n");
        bytes.extend_from_slice(b"vtk output\n");
        bytes.extend_from_slice(b"BINARY\n");
        bytes.extend_from_slice(b"DATASET POLYDATA\n");
        bytes.extend_from_slice(b"POINTS 3 float\n");
        for coord in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            bytes.write_f32::<BigEndian>(coord).unwrap();
        }
        bytes.extend_from_slice(b"\nPOLYGONS 1 4\n");
        for value in [3i32, 0, 1, 2] {
            bytes.write_i32::<BigEndian>(value).unwrap();
        }

        let mesh = Mesh::vtk_from_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(3, mesh.num_vertices());
        assert_eq!(1, mesh.num_faces());
        assert_eq!(vec![0, 1, 2], mesh.faces);
        assert_abs_diff_eq!(mesh.vertices[3], 1.0);
    }

    #[test]
    fn an_ascii_vtk_file_is_rejected() {
        let ascii = b"# vtk DataFile Version 3.0\nvtk output\nASCII\nDATASET POLYDATA\n";
        assert!(Mesh::vtk_from_reader(Cursor::new(&ascii[..])).is_err());
    }

    #[test]
    fn merging_shifts_the_face_indices() {
        let a = Mesh::obj_from_reader(Cursor::new("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n")).unwrap();
        let merged = a.merge(&a);
        assert_eq!(6, merged.num_vertices());
        assert_eq!(2, merged.num_faces());
        assert_eq!(vec![0, 1, 2, 3, 4, 5], merged.faces);
    }

    #[test]
    fn center_translate_and_scale_move_the_vertices() {
        let mut mesh =
            Mesh::obj_from_reader(Cursor::new("v 0 0 0\nv 2 0 0\nv 0 2 0\nv 0 0 2\n")).unwrap();

        let center = mesh.center().unwrap();
        assert_abs_diff_eq!(center[0], 0.5);
        assert_abs_diff_eq!(center[1], 0.5);
        assert_abs_diff_eq!(center[2], 0.5);

        mesh.translate([-0.5, -0.5, -0.5]);
        let center = mesh.center().unwrap();
        assert_abs_diff_eq!(center[0], 0.0);

        mesh.scale([500.0, 500.0, 500.0]);
        assert_abs_diff_eq!(mesh.vertices[3], 750.0);

        assert_eq!(None, Mesh::new().center());
    }

    #[test]
    fn obj_output_is_one_based() {
        let mesh = Mesh {
            vertices: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            faces: vec![0, 1, 2],
        };
        assert_eq!("v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n", mesh.to_obj());
    }

    #[test]
    fn duplicate_exports_are_recognized_by_their_stem() {
        assert!(is_duplicate_export("A1 2"));
        assert!(is_duplicate_export("A1_2"));
        assert!(is_duplicate_export("A1 Copy"));
        assert!(!is_duplicate_export("A1"));
        assert!(!is_duplicate_export("S2"));
    }

    #[test]
    fn the_model_directory_is_converted_and_keyed_by_id() {
        let mesh_dir = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();

        let triangle = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
        fs::write(mesh_dir.path().join("A1.obj"), triangle).unwrap();
        fs::write(mesh_dir.path().join("A1 2.obj"), triangle).unwrap();
        fs::write(mesh_dir.path().join("UNKNOWN.obj"), triangle).unwrap();
        fs::write(mesh_dir.path().join("notes.txt"), "not a mesh").unwrap();

        let meshes = extract_meshes(
            mesh_dir.path(),
            &fixture_table(),
            out_dir.path(),
            [500.0, 500.0, 500.0],
        )
        .unwrap();

        // A1 plus the merged root; the duplicate and the unknown stem are skipped.
        assert_eq!(2, meshes.len());
        assert!(meshes.contains_key(&1));
        assert!(meshes.contains_key(&ROOT_ID));
        assert!(meshes[&1].is_file());

        let converted = Mesh::from_file(&meshes[&1]).unwrap();
        assert_abs_diff_eq!(converted.vertices[3], 500.0);

        let root = Mesh::from_file(&meshes[&ROOT_ID]).unwrap();
        assert_eq!(3, root.num_vertices());
        assert_eq!(1, root.num_faces());
    }
}
