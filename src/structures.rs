//! Structure-table construction: joining the label color table with the
//! hand-authored full-name CSV into a hierarchical table of brain regions.
//!
//! The color table is a whitespace-delimited Slicer export with two header
//! lines and one row per region (id, acronym, r, g, b, alpha). The full-name
//! CSV was transcribed from table 1 of the atlas paper and maps acronyms to
//! region names. The dataset has no deeper hierarchy, so every region hangs
//! directly off a synthetic root node.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{AtlasGenError, Result};

/// Id of the synthetic root structure. The dataset itself has no hierarchy,
/// so the root is a placeholder that parents every region.
pub const ROOT_ID: i64 = 999;

/// Number of header lines in the Slicer color table before the data rows.
const COLOR_TABLE_HEADER_LINES: usize = 2;

/// One anatomical region of the atlas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub id: i64,
    pub name: String,
    pub acronym: String,
    /// Ids from the root down to this structure, ending with its own id.
    /// Empty for the root itself.
    pub structure_id_path: Vec<i64>,
    pub rgb_triplet: [u8; 3],
}

impl Structure {
    /// The synthetic root row: white, empty ancestor path.
    pub fn root() -> Structure {
        Structure {
            id: ROOT_ID,
            name: String::from("root"),
            acronym: String::from("root"),
            structure_id_path: Vec::new(),
            rgb_triplet: [255, 255, 255],
        }
    }

    /// Id of the direct parent, `None` for the root.
    pub fn parent_id(&self) -> Option<i64> {
        if self.structure_id_path.len() >= 2 {
            Some(self.structure_id_path[self.structure_id_path.len() - 2])
        } else {
            None
        }
    }
}

/// One data row of the whitespace-delimited color table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRow {
    pub id: i64,
    pub acronym: String,
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub alpha: u8,
}

/// Parse the Slicer color table. The first two lines are headers and are
/// skipped, blank lines are ignored, every other line must have exactly the
/// six columns id, acronym, r, g, b, alpha.
pub fn read_label_rows<R: BufRead>(reader: R) -> Result<Vec<LabelRow>> {
    let mut rows: Vec<LabelRow> = Vec::new();
    let mut seen_ids: HashSet<i64> = HashSet::new();

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line_idx < COLOR_TABLE_HEADER_LINES {
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let line_no = line_idx + 1;
        let fields: Vec<&str> = trimmed.split_whitespace().collect();
        if fields.len() != 6 {
            return Err(AtlasGenError::InvalidLabelTable(format!(
                "line {}: expected 6 columns, got {}",
                line_no,
                fields.len()
            )));
        }

        let row = LabelRow {
            id: parse_column(fields[0], "id", line_no)?,
            acronym: fields[1].to_string(),
            r: parse_column(fields[2], "r", line_no)?,
            g: parse_column(fields[3], "g", line_no)?,
            b: parse_column(fields[4], "b", line_no)?,
            alpha: parse_column(fields[5], "alpha", line_no)?,
        };

        if row.id == ROOT_ID {
            return Err(AtlasGenError::InvalidLabelTable(format!(
                "line {}: id {} collides with the root id",
                line_no, ROOT_ID
            )));
        }
        if !seen_ids.insert(row.id) {
            return Err(AtlasGenError::InvalidLabelTable(format!(
                "line {}: duplicate id {}",
                line_no, row.id
            )));
        }

        rows.push(row);
    }

    Ok(rows)
}

fn parse_column<T: FromStr>(field: &str, column: &str, line_no: usize) -> Result<T> {
    field.parse().map_err(|_| {
        AtlasGenError::InvalidLabelTable(format!(
            "line {}: invalid {} value '{}'",
            line_no, column, field
        ))
    })
}

/// Parse the hand-authored acronym-to-name CSV.
///
/// The file has no header. Rows with fewer than two fields are skipped with
/// a warning rather than rejected, the table was typed up by hand.
pub fn read_full_names<R: Read>(reader: R) -> Result<HashMap<String, String>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut names: HashMap<String, String> = HashMap::new();
    for (row_idx, record) in csv_reader.records().enumerate() {
        let record = record?;
        if record.len() < 2 || record[0].is_empty() {
            warn!("Skipping malformed name CSV row {}", row_idx + 1);
            continue;
        }
        names.insert(record[0].to_string(), record[1].to_string());
    }
    Ok(names)
}

/// The flat, ordered structure table: root first, then the label rows in
/// file order.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureTable {
    pub structures: Vec<Structure>,
}

impl StructureTable {
    /// Build the table from the color table and name CSV files.
    pub fn from_files(colors_path: &Path, names_path: &Path) -> Result<StructureTable> {
        let colors = BufReader::new(File::open(colors_path)?);
        let names = BufReader::new(File::open(names_path)?);
        StructureTable::from_readers(colors, names)
    }

    /// Build the table from readers positioned at the start of each input.
    pub fn from_readers<L: BufRead, N: Read>(colors: L, names: N) -> Result<StructureTable> {
        let rows = read_label_rows(colors)?;
        let full_names = read_full_names(names)?;
        Ok(StructureTable {
            structures: assemble_structures(rows, full_names),
        })
    }

    pub fn len(&self) -> usize {
        self.structures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.structures.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&Structure> {
        self.structures.iter().find(|s| s.id == id)
    }

    /// Map an acronym to its structure id. Used to key mesh files, which are
    /// named by acronym, to structures.
    pub fn id_for_acronym(&self, acronym: &str) -> Option<i64> {
        self.structures
            .iter()
            .find(|s| s.acronym == acronym)
            .map(|s| s.id)
    }

    /// Ids of all structures except the root, in table order.
    pub fn leaf_ids(&self) -> Vec<i64> {
        self.structures
            .iter()
            .filter(|s| s.id != ROOT_ID)
            .map(|s| s.id)
            .collect()
    }
}

impl fmt::Display for StructureTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Structure table with {} anatomical regions.",
            self.structures.len()
        )
    }
}

/// Left-join the full names onto the label rows, attach the ancestor path
/// and RGB triplet, and prepend the root row.
fn assemble_structures(rows: Vec<LabelRow>, full_names: HashMap<String, String>) -> Vec<Structure> {
    let acronyms: HashSet<&str> = rows.iter().map(|r| r.acronym.as_str()).collect();
    for acronym in full_names.keys() {
        if !acronyms.contains(acronym.as_str()) {
            debug!(
                "Full-name entry '{}' matches no row in the color table",
                acronym
            );
        }
    }

    let mut structures: Vec<Structure> = Vec::with_capacity(rows.len() + 1);
    structures.push(Structure::root());

    for row in rows {
        let name = match full_names.get(&row.acronym) {
            Some(name) => name.clone(),
            None => {
                // ALv and ALd are in the atlas but not in table 1 of the paper.
                warn!(
                    "No full name for acronym '{}', falling back to the acronym",
                    row.acronym
                );
                row.acronym.clone()
            }
        };

        structures.push(Structure {
            id: row.id,
            name,
            acronym: row.acronym,
            structure_id_path: vec![ROOT_ID, row.id],
            rgb_triplet: [row.r, row.g, row.b],
        });
    }

    structures
}

/// The structure hierarchy as a tree keyed by structure id.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureTree {
    nodes: BTreeMap<i64, Structure>,
    children: BTreeMap<i64, Vec<i64>>,
    root_id: i64,
}

impl StructureTree {
    /// Build the tree from the table, validating the ancestor paths: every
    /// non-root path must end with the structure's own id, and its parent
    /// must be present in the table.
    pub fn from_table(table: &StructureTable) -> Result<StructureTree> {
        let mut root_id: Option<i64> = None;
        let mut nodes: BTreeMap<i64, Structure> = BTreeMap::new();
        let mut children: BTreeMap<i64, Vec<i64>> = BTreeMap::new();

        for structure in &table.structures {
            nodes.insert(structure.id, structure.clone());
            children.entry(structure.id).or_insert_with(Vec::new);
            if structure.structure_id_path.is_empty() {
                root_id = Some(structure.id);
            }
        }

        let root_id = root_id.ok_or_else(|| {
            AtlasGenError::InvalidLabelTable(String::from("no root row with an empty path"))
        })?;

        for structure in &table.structures {
            if structure.id == root_id {
                continue;
            }
            let path = &structure.structure_id_path;
            if path.last() != Some(&structure.id) {
                return Err(AtlasGenError::InvalidLabelTable(format!(
                    "structure {} has a path that does not end in its own id",
                    structure.id
                )));
            }
            let parent = match structure.parent_id() {
                Some(parent) => parent,
                None => {
                    return Err(AtlasGenError::InvalidLabelTable(format!(
                        "structure {} has no parent in its path",
                        structure.id
                    )))
                }
            };
            if !nodes.contains_key(&parent) {
                return Err(AtlasGenError::MissingParentStructure(structure.id, parent));
            }
            children
                .entry(parent)
                .or_insert_with(Vec::new)
                .push(structure.id);
        }

        Ok(StructureTree {
            nodes,
            children,
            root_id,
        })
    }

    pub fn root(&self) -> &Structure {
        &self.nodes[&self.root_id]
    }

    pub fn get(&self, id: i64) -> Option<&Structure> {
        self.nodes.get(&id)
    }

    pub fn children_of(&self, id: i64) -> &[i64] {
        self.children.get(&id).map(|c| c.as_slice()).unwrap_or(&[])
    }

    pub fn parent_of(&self, id: i64) -> Option<i64> {
        self.nodes.get(&id).and_then(|s| s.parent_id())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids in depth-first order starting at the root, children in table order.
    pub fn depth_first_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<i64> = vec![self.root_id];
        while let Some(id) = stack.pop() {
            ids.push(id);
            for &child in self.children_of(id).iter().rev() {
                stack.push(child);
            }
        }
        ids
    }

    fn render_node(&self, id: i64, depth: usize, out: &mut String) {
        let structure = &self.nodes[&id];
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!(
            "{} ({}) [{}]\n",
            structure.acronym, structure.name, structure.id
        ));
        for &child in self.children_of(id) {
            self.render_node(child, depth + 1, out);
        }
    }
}

impl fmt::Display for StructureTree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut rendered = String::new();
        self.render_node(self.root_id, 0, &mut rendered);
        write!(f, "{}", rendered)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;

    const COLORS_FIXTURE: &str = "\
# Slicer color table
# id acronym r g b alpha
1 A1 255 0 0 255
2 A2 0 255 0 255

7 ALv 12 34 56 255
";

    const NAMES_FIXTURE: &str = "\
A1,primary auditory cortex
A2,secondary auditory cortex
CB,cerebellum
";

    fn fixture_table() -> StructureTable {
        StructureTable::from_readers(
            Cursor::new(COLORS_FIXTURE),
            Cursor::new(NAMES_FIXTURE),
        )
        .unwrap()
    }

    #[test]
    fn label_rows_skip_headers_and_blank_lines() {
        let rows = read_label_rows(Cursor::new(COLORS_FIXTURE)).unwrap();
        assert_eq!(3, rows.len());
        assert_eq!(1, rows[0].id);
        assert_eq!("A1", rows[0].acronym);
        assert_eq!(255, rows[0].r);
        assert_eq!(0, rows[0].g);
        assert_eq!(0, rows[0].b);
        assert_eq!(255, rows[0].alpha);
    }

    #[test]
    fn a_row_with_the_wrong_column_count_is_rejected() {
        let input = "h1\nh2\n1 A1 255 0 0\n";
        assert!(read_label_rows(Cursor::new(input)).is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let input = "h1\nh2\n1 A1 255 0 0 255\n1 A2 0 255 0 255\n";
        assert!(read_label_rows(Cursor::new(input)).is_err());
    }

    #[test]
    fn a_row_colliding_with_the_root_id_is_rejected() {
        let input = "h1\nh2\n999 A1 255 0 0 255\n";
        assert!(read_label_rows(Cursor::new(input)).is_err());
    }

    #[test]
    fn full_names_are_joined_by_acronym() {
        let table = fixture_table();
        assert_eq!(4, table.len());

        let a1 = table.get(1).unwrap();
        assert_eq!("primary auditory cortex", a1.name);
        assert_eq!("A1", a1.acronym);
        assert_eq!(vec![ROOT_ID, 1], a1.structure_id_path);
        assert_eq!([255, 0, 0], a1.rgb_triplet);
    }

    #[test]
    fn a_missing_full_name_falls_back_to_the_acronym() {
        let table = fixture_table();
        let alv = table.get(7).unwrap();
        assert_eq!("ALv", alv.name);
        assert_eq!("ALv", alv.acronym);
    }

    #[test]
    fn the_root_row_comes_first() {
        let table = fixture_table();
        let root = &table.structures[0];
        assert_eq!(ROOT_ID, root.id);
        assert_eq!("root", root.name);
        assert_eq!("root", root.acronym);
        assert!(root.structure_id_path.is_empty());
        assert_eq!([255, 255, 255], root.rgb_triplet);
    }

    #[test]
    fn acronyms_map_to_structure_ids() {
        let table = fixture_table();
        assert_eq!(Some(2), table.id_for_acronym("A2"));
        assert_eq!(Some(ROOT_ID), table.id_for_acronym("root"));
        assert_eq!(None, table.id_for_acronym("nope"));
        assert_eq!(vec![1, 2, 7], table.leaf_ids());
    }

    #[test]
    fn the_tree_parents_every_region_to_the_root() {
        let table = fixture_table();
        let tree = StructureTree::from_table(&table).unwrap();

        assert_eq!(4, tree.len());
        assert_eq!(ROOT_ID, tree.root().id);
        assert_eq!(vec![1, 2, 7], tree.children_of(ROOT_ID).to_vec());
        assert_eq!(Some(ROOT_ID), tree.parent_of(1));
        assert_eq!(None, tree.parent_of(ROOT_ID));
        assert_eq!(vec![ROOT_ID, 1, 2, 7], tree.depth_first_ids());
    }

    #[test]
    fn a_dangling_parent_reference_is_rejected() {
        let mut table = fixture_table();
        table.structures[1].structure_id_path = vec![123, 1];
        let err = StructureTree::from_table(&table).unwrap_err();
        assert!(matches!(
            err,
            AtlasGenError::MissingParentStructure(1, 123)
        ));
    }

    #[test]
    fn the_tree_renders_one_region_per_line() {
        let table = fixture_table();
        let tree = StructureTree::from_table(&table).unwrap();
        let rendered = format!("{}", tree);

        assert!(rendered.starts_with("root (root) [999]\n"));
        assert!(rendered.contains("  A1 (primary auditory cortex) [1]\n"));
        assert_eq!(4, rendered.lines().count());
    }

    #[test]
    fn malformed_name_rows_are_skipped() {
        let names = read_full_names(Cursor::new("A1,primary auditory cortex\njunk\n")).unwrap();
        assert_eq!(1, names.len());
        assert_eq!("primary auditory cortex", names["A1"]);
    }
}
