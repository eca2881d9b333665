// container.rs
//
// Delimited-text stand-ins for the annotated single-cell containers. A single
// matrix file plays the role of a one-modality object, a directory of
// `<modality>.tsv` files (plus an optional `obs.tsv`) the multi-modal one.

use log::{debug, info, warn};
use ndarray::{Array2, Axis};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use crate::error::{GrnError, GrnResult};

/// Modality keys recognised as RNA, in lookup order.
pub const RNA_MODALITY_KEYS: [&str; 2] = ["rna", "RNA"];
pub const OBS_FILE_STEM: &str = "obs";

// --- Annotated Matrix ---

/// Observations (cells) by variables (features) with their names.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedMatrix {
    pub x: Array2<f64>,
    pub obs_names: Vec<String>,
    pub var_names: Vec<String>,
}

impl AnnotatedMatrix {
    pub fn new(x: Array2<f64>, obs_names: Vec<String>, var_names: Vec<String>) -> GrnResult<Self> {
        if x.nrows() != obs_names.len() || x.ncols() != var_names.len() {
            return Err(GrnError::DataExtraction(format!(
                "Matrix shape {}x{} does not match {} cell names and {} feature names",
                x.nrows(),
                x.ncols(),
                obs_names.len(),
                var_names.len()
            )));
        }
        Ok(Self { x, obs_names, var_names })
    }

    pub fn n_obs(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_vars(&self) -> usize {
        self.x.ncols()
    }

    pub fn select_obs(&self, indices: &[usize]) -> Self {
        Self {
            x: self.x.select(Axis(0), indices),
            obs_names: indices.iter().map(|&i| self.obs_names[i].clone()).collect(),
            var_names: self.var_names.clone(),
        }
    }

    pub fn select_vars(&self, indices: &[usize]) -> Self {
        Self {
            x: self.x.select(Axis(1), indices),
            obs_names: self.obs_names.clone(),
            var_names: indices.iter().map(|&i| self.var_names[i].clone()).collect(),
        }
    }

    /// Rows in `names` order; names absent from this matrix are dropped.
    pub fn select_obs_by_name(&self, names: &[String]) -> Self {
        let positions: HashMap<&str, usize> = self
            .obs_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect();
        let indices: Vec<usize> = names
            .iter()
            .filter_map(|n| positions.get(n.as_str()).copied())
            .collect();
        self.select_obs(&indices)
    }
}

// --- Per-cell Annotations ---

/// Per-cell string annotations keyed by cell name, columns kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObsTable {
    pub index: Vec<String>,
    columns: Vec<(String, Vec<String>)>,
}

impl ObsTable {
    pub fn with_index(index: Vec<String>) -> Self {
        Self { index, columns: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, values)| values.as_slice())
    }

    /// Replaces an existing column or appends a new one.
    pub fn set_column(&mut self, name: &str, values: Vec<String>) -> GrnResult<()> {
        if values.len() != self.index.len() {
            return Err(GrnError::DataExtraction(format!(
                "Column '{}' has {} values for {} cells",
                name,
                values.len(),
                self.index.len()
            )));
        }
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((name.to_string(), values)),
        }
        Ok(())
    }

    pub fn fill_column(&mut self, name: &str, value: &str) {
        let values = vec![value.to_string(); self.index.len()];
        match self.columns.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((name.to_string(), values)),
        }
    }

    pub fn position_map(&self) -> HashMap<&str, usize> {
        self.index
            .iter()
            .enumerate()
            .map(|(i, n)| (n.as_str(), i))
            .collect()
    }

    pub fn select(&self, indices: &[usize]) -> Self {
        Self {
            index: indices.iter().map(|&i| self.index[i].clone()).collect(),
            columns: self
                .columns
                .iter()
                .map(|(name, values)| {
                    (name.clone(), indices.iter().map(|&i| values[i].clone()).collect())
                })
                .collect(),
        }
    }

    pub fn select_by_name(&self, names: &[String]) -> Self {
        let positions = self.position_map();
        let indices: Vec<usize> = names
            .iter()
            .filter_map(|n| positions.get(n.as_str()).copied())
            .collect();
        self.select(&indices)
    }

    pub fn rename_index<F: Fn(&str) -> String>(&mut self, f: F) {
        for name in self.index.iter_mut() {
            *name = f(name);
        }
    }
}

// --- Containers ---

/// One top-level matrix, the single-modality case.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleMatrixContainer {
    pub matrix: AnnotatedMatrix,
}

/// Named modalities sharing one set of per-cell annotations.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiModalContainer {
    pub obs: ObsTable,
    pub modalities: BTreeMap<String, AnnotatedMatrix>,
}

impl MultiModalContainer {
    /// Builds the container; without explicit annotations the cell index is the
    /// union of modality cells in first-seen order.
    pub fn new(modalities: BTreeMap<String, AnnotatedMatrix>, obs: Option<ObsTable>) -> Self {
        let obs = obs.unwrap_or_else(|| {
            let mut seen = HashSet::new();
            let mut index = Vec::new();
            for matrix in modalities.values() {
                for name in &matrix.obs_names {
                    if seen.insert(name.as_str()) {
                        index.push(name.clone());
                    }
                }
            }
            ObsTable::with_index(index)
        });
        Self { obs, modalities }
    }

    pub fn modality(&self, key: &str) -> Option<&AnnotatedMatrix> {
        self.modalities.get(key)
    }

    pub fn modality_names(&self) -> Vec<&str> {
        self.modalities.keys().map(String::as_str).collect()
    }

    fn rna(&self) -> GrnResult<&AnnotatedMatrix> {
        RNA_MODALITY_KEYS
            .iter()
            .find_map(|key| self.modalities.get(*key))
            .ok_or_else(|| {
                GrnError::DataExtraction(format!(
                    "No RNA modality found (looked for {:?}); available modalities: {:?}",
                    RNA_MODALITY_KEYS,
                    self.modality_names()
                ))
            })
    }

    /// Renames `RNA`/`ATAC` to lowercase when both are present. Returns whether a
    /// rename happened.
    pub fn standardize_modality_names(&mut self) -> bool {
        if !(self.modalities.contains_key("RNA") && self.modalities.contains_key("ATAC")) {
            return false;
        }
        for (upper, lower) in [("RNA", "rna"), ("ATAC", "atac")] {
            if let Some(matrix) = self.modalities.remove(upper) {
                self.modalities.insert(lower.to_string(), matrix);
            }
        }
        info!("Renamed modalities RNA/ATAC to lowercase rna/atac.");
        true
    }

    pub fn rename_cells<F: Fn(&str) -> String>(&mut self, f: F) {
        self.obs.rename_index(&f);
        for matrix in self.modalities.values_mut() {
            for name in matrix.obs_names.iter_mut() {
                *name = f(name);
            }
        }
    }
}

/// Either container shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Multiome {
    MultiModal(MultiModalContainer),
    SingleMatrix(SingleMatrixContainer),
}

// --- Expression Capability ---

/// Access to the RNA expression matrix of a container.
pub trait ExpressionSource {
    fn expression_matrix(&self) -> GrnResult<&Array2<f64>>;
    fn gene_names(&self) -> GrnResult<&[String]>;
    fn cell_names(&self) -> GrnResult<&[String]>;
}

impl ExpressionSource for SingleMatrixContainer {
    fn expression_matrix(&self) -> GrnResult<&Array2<f64>> {
        Ok(&self.matrix.x)
    }

    fn gene_names(&self) -> GrnResult<&[String]> {
        Ok(&self.matrix.var_names)
    }

    fn cell_names(&self) -> GrnResult<&[String]> {
        Ok(&self.matrix.obs_names)
    }
}

impl ExpressionSource for MultiModalContainer {
    fn expression_matrix(&self) -> GrnResult<&Array2<f64>> {
        Ok(&self.rna()?.x)
    }

    fn gene_names(&self) -> GrnResult<&[String]> {
        Ok(&self.rna()?.var_names)
    }

    fn cell_names(&self) -> GrnResult<&[String]> {
        Ok(&self.rna()?.obs_names)
    }
}

impl ExpressionSource for Multiome {
    fn expression_matrix(&self) -> GrnResult<&Array2<f64>> {
        match self {
            Multiome::MultiModal(c) => c.expression_matrix(),
            Multiome::SingleMatrix(c) => c.expression_matrix(),
        }
    }

    fn gene_names(&self) -> GrnResult<&[String]> {
        match self {
            Multiome::MultiModal(c) => c.gene_names(),
            Multiome::SingleMatrix(c) => c.gene_names(),
        }
    }

    fn cell_names(&self) -> GrnResult<&[String]> {
        match self {
            Multiome::MultiModal(c) => c.cell_names(),
            Multiome::SingleMatrix(c) => c.cell_names(),
        }
    }
}

/// Dense copy of the expression matrix with its axis names.
#[derive(Debug, Clone)]
pub struct ExpressionData {
    pub matrix: Array2<f64>,
    pub gene_names: Vec<String>,
    pub cell_names: Vec<String>,
}

pub fn extract_expression_data<S: ExpressionSource + ?Sized>(source: &S) -> GrnResult<ExpressionData> {
    let matrix = source.expression_matrix()?.clone();
    let gene_names = source.gene_names()?.to_vec();
    let cell_names = source.cell_names()?.to_vec();
    if matrix.ncols() != gene_names.len() || matrix.nrows() != cell_names.len() {
        return Err(GrnError::DataExtraction(format!(
            "Expression matrix is {}x{} but has {} cell names and {} gene names",
            matrix.nrows(),
            matrix.ncols(),
            cell_names.len(),
            gene_names.len()
        )));
    }
    Ok(ExpressionData {
        matrix,
        gene_names,
        cell_names,
    })
}

// --- Reading ---

/// `.csv` is comma-separated, everything else tab-separated.
pub fn delimiter_for(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => b',',
        _ => b'\t',
    }
}

fn is_table_file(path: &Path) -> bool {
    path.is_file()
        && matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("tsv") | Some("csv") | Some("txt")
        )
}

pub(crate) fn parse_error(path: &Path, line: usize, reason: impl Into<String>) -> GrnError {
    GrnError::Parse {
        path: path.to_path_buf(),
        line,
        reason: reason.into(),
    }
}

/// Keeps I/O failures as I/O errors and pins everything else to a line.
pub(crate) fn csv_read_error(path: &Path, e: csv::Error) -> GrnError {
    let line = e.position().map(|p| p.line() as usize).unwrap_or(0);
    let reason = e.to_string();
    match e.into_kind() {
        csv::ErrorKind::Io(io) => GrnError::Io(io),
        _ => parse_error(path, line, reason),
    }
}

pub(crate) fn table_reader(path: &Path) -> GrnResult<csv::Reader<File>> {
    let file = File::open(path)?;
    Ok(csv::ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .has_headers(true)
        .flexible(false)
        .from_reader(file))
}

pub(crate) fn table_writer(path: &Path) -> GrnResult<csv::Writer<BufWriter<File>>> {
    let file = File::create(path)?;
    Ok(csv::WriterBuilder::new()
        .delimiter(delimiter_for(path))
        .from_writer(BufWriter::new(file)))
}

/// Reads header + rows of a delimited table. The first column of every row is
/// the row name. Quoted fields follow the usual CSV rules.
fn read_table(path: &Path) -> GrnResult<(Vec<String>, Vec<(String, Vec<String>)>)> {
    let mut reader = table_reader(path)?;
    let header_record = reader.headers().map_err(|e| csv_read_error(path, e))?.clone();
    if header_record.is_empty() {
        return Err(parse_error(path, 1, "file is empty"));
    }
    let header: Vec<String> = header_record.iter().skip(1).map(str::to_string).collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_read_error(path, e))?;
        let mut fields = record.iter();
        let name = fields.next().unwrap_or_default().to_string();
        rows.push((name, fields.map(str::to_string).collect()));
    }
    Ok((header, rows))
}

pub fn read_matrix(path: &Path) -> GrnResult<AnnotatedMatrix> {
    let (var_names, rows) = read_table(path)?;
    let n_obs = rows.len();
    let n_vars = var_names.len();
    let mut x = Array2::<f64>::zeros((n_obs, n_vars));
    let mut obs_names = Vec::with_capacity(n_obs);
    for (row_idx, (name, values)) in rows.into_iter().enumerate() {
        for (col_idx, value) in values.iter().enumerate() {
            x[[row_idx, col_idx]] = value.trim().parse::<f64>().map_err(|e| {
                parse_error(path, row_idx + 2, format!("value '{}' in column {}: {}", value, col_idx + 2, e))
            })?;
        }
        obs_names.push(name);
    }
    debug!("Read {} cells x {} features from {}", n_obs, n_vars, path.display());
    AnnotatedMatrix::new(x, obs_names, var_names)
}

pub fn read_obs_table(path: &Path) -> GrnResult<ObsTable> {
    let (column_names, rows) = read_table(path)?;
    let mut obs = ObsTable::with_index(rows.iter().map(|(name, _)| name.clone()).collect());
    for (col_idx, column) in column_names.iter().enumerate() {
        let values = rows.iter().map(|(_, values)| values[col_idx].clone()).collect();
        obs.set_column(column, values)?;
    }
    Ok(obs)
}

fn read_multimodal_dir(dir: &Path) -> GrnResult<MultiModalContainer> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| is_table_file(path))
        .collect();
    paths.sort();

    let mut modalities = BTreeMap::new();
    let mut obs = None;
    for path in paths {
        let stem = match path.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_string(),
            None => continue,
        };
        if stem == OBS_FILE_STEM {
            obs = Some(read_obs_table(&path)?);
        } else {
            let matrix = read_matrix(&path)?;
            info!("Modality '{}': {} cells x {} features", stem, matrix.n_obs(), matrix.n_vars());
            modalities.insert(stem, matrix);
        }
    }
    if modalities.is_empty() {
        return Err(GrnError::InputLoad {
            path: dir.to_path_buf(),
            reason: "directory holds no modality tables".to_string(),
        });
    }
    Ok(MultiModalContainer::new(modalities, obs))
}

/// Opens a directory as a multi-modal container or a file as a single matrix.
/// Every failure is reported as an input-load error.
pub fn load_container(path: &Path) -> GrnResult<Multiome> {
    let loaded = if path.is_dir() {
        read_multimodal_dir(path).map(Multiome::MultiModal)
    } else if path.is_file() {
        read_matrix(path).map(|matrix| Multiome::SingleMatrix(SingleMatrixContainer { matrix }))
    } else {
        Err(GrnError::InputLoad {
            path: path.to_path_buf(),
            reason: "path does not exist".to_string(),
        })
    };
    loaded.map_err(|e| match e {
        GrnError::InputLoad { .. } => e,
        other => {
            warn!("Loading {} failed: {}", path.display(), other);
            GrnError::InputLoad {
                path: path.to_path_buf(),
                reason: other.to_string(),
            }
        }
    })
}

/// Loads a container that must be multi-modal.
pub fn load_multimodal(path: &Path) -> GrnResult<MultiModalContainer> {
    match load_container(path)? {
        Multiome::MultiModal(container) => Ok(container),
        Multiome::SingleMatrix(_) => Err(GrnError::InputLoad {
            path: path.to_path_buf(),
            reason: "expected a multi-modal directory, found a single matrix file".to_string(),
        }),
    }
}

// --- Writing ---

pub fn write_matrix(path: &Path, matrix: &AnnotatedMatrix) -> GrnResult<()> {
    let mut writer = table_writer(path)?;
    writer.write_record(std::iter::once("cell").chain(matrix.var_names.iter().map(String::as_str)))?;
    for (row, name) in matrix.x.axis_iter(Axis(0)).zip(&matrix.obs_names) {
        writer.write_record(std::iter::once(name.clone()).chain(row.iter().map(|v| v.to_string())))?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_obs_table(path: &Path, obs: &ObsTable) -> GrnResult<()> {
    let mut writer = table_writer(path)?;
    writer.write_record(std::iter::once("cell").chain(obs.column_names()))?;
    for (row_idx, cell) in obs.index.iter().enumerate() {
        writer.write_record(
            std::iter::once(cell.as_str()).chain(obs.columns.iter().map(|(_, values)| values[row_idx].as_str())),
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes `obs.tsv` and one `<modality>.tsv` per modality into `dir`.
pub fn write_multimodal(dir: &Path, container: &MultiModalContainer) -> GrnResult<()> {
    fs::create_dir_all(dir)?;
    write_obs_table(&dir.join(format!("{}.tsv", OBS_FILE_STEM)), &container.obs)?;
    for (name, matrix) in &container.modalities {
        write_matrix(&dir.join(format!("{}.tsv", name)), matrix)?;
    }
    info!(
        "Wrote container with modalities {:?} ({} cells) to {}",
        container.modality_names(),
        container.obs.len(),
        dir.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("multiome_grn_container_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn matrix(cells: &[&str], genes: &[&str], x: Array2<f64>) -> AnnotatedMatrix {
        AnnotatedMatrix::new(
            x,
            cells.iter().map(|s| s.to_string()).collect(),
            genes.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_single_matrix_file_loads_as_single_container() {
        let dir = temp_dir("single");
        let path = dir.join("expr.csv");
        fs::write(&path, "cell,MYC,ACTB\nc1,1.0,2.5\nc2,0,3\n").unwrap();

        let loaded = load_container(&path).unwrap();
        let data = extract_expression_data(&loaded).unwrap();
        assert_eq!(data.gene_names, vec!["MYC", "ACTB"]);
        assert_eq!(data.cell_names, vec!["c1", "c2"]);
        assert_eq!(data.matrix, array![[1.0, 2.5], [0.0, 3.0]]);
    }

    #[test]
    fn test_multimodal_without_rna_is_extraction_error() {
        let mut modalities = BTreeMap::new();
        modalities.insert("atac".to_string(), matrix(&["c1"], &["chr1:1-100"], array![[1.0]]));
        let container = Multiome::MultiModal(MultiModalContainer::new(modalities, None));
        let err = extract_expression_data(&container).unwrap_err();
        assert!(matches!(err, GrnError::DataExtraction(_)), "got {:?}", err);
    }

    #[test]
    fn test_uppercase_rna_is_recognised() {
        let mut modalities = BTreeMap::new();
        modalities.insert("RNA".to_string(), matrix(&["c1"], &["MYC"], array![[4.0]]));
        let container = MultiModalContainer::new(modalities, None);
        assert_eq!(container.gene_names().unwrap(), &["MYC".to_string()]);
    }

    #[test]
    fn test_missing_path_is_input_load_error() {
        let err = load_container(Path::new("/definitely/not/here.h5mu")).unwrap_err();
        assert!(matches!(err, GrnError::InputLoad { .. }));
    }

    #[test]
    fn test_malformed_value_is_input_load_error() {
        let dir = temp_dir("malformed");
        let path = dir.join("bad.tsv");
        fs::write(&path, "cell\tMYC\nc1\tnot-a-number\n").unwrap();
        let err = load_container(&path).unwrap_err();
        assert!(matches!(err, GrnError::InputLoad { .. }));
    }

    #[test]
    fn test_standardize_requires_both_uppercase_modalities() {
        let mut modalities = BTreeMap::new();
        modalities.insert("RNA".to_string(), matrix(&["c1"], &["MYC"], array![[1.0]]));
        let mut only_rna = MultiModalContainer::new(modalities.clone(), None);
        assert!(!only_rna.standardize_modality_names());
        assert!(only_rna.modality("RNA").is_some());

        modalities.insert("ATAC".to_string(), matrix(&["c1"], &["chr1:1-10"], array![[1.0]]));
        let mut both = MultiModalContainer::new(modalities, None);
        assert!(both.standardize_modality_names());
        assert_eq!(both.modality_names(), vec!["atac", "rna"]);
    }

    #[test]
    fn test_multimodal_dir_roundtrip_keeps_obs_columns() {
        let dir = temp_dir("roundtrip");
        let mut modalities = BTreeMap::new();
        modalities.insert("rna".to_string(), matrix(&["c1", "c2"], &["MYC"], array![[1.0], [2.0]]));
        let mut container = MultiModalContainer::new(modalities, None);
        container
            .obs
            .set_column("celltype", vec!["B".to_string(), "T".to_string()])
            .unwrap();
        write_multimodal(&dir, &container).unwrap();

        let reloaded = load_multimodal(&dir).unwrap();
        assert_eq!(reloaded.obs.index, vec!["c1", "c2"]);
        assert_eq!(reloaded.obs.column("celltype").unwrap(), &["B".to_string(), "T".to_string()]);
        assert_eq!(reloaded.modality("rna").unwrap().x, array![[1.0], [2.0]]);
    }

    #[test]
    fn test_obs_table_reads_quoted_fields() {
        let dir = temp_dir("quoted");
        let path = dir.join("annotations.csv");
        fs::write(&path, "barcode,donor,celltype\nAAA,d1,\"CD4 T, naive\"\nCCC,d2,B\n").unwrap();
        let obs = read_obs_table(&path).unwrap();
        assert_eq!(obs.index, vec!["AAA", "CCC"]);
        assert_eq!(obs.column("celltype").unwrap(), &["CD4 T, naive".to_string(), "B".to_string()]);
    }

    #[test]
    fn test_short_row_is_parse_error_with_line() {
        let dir = temp_dir("short_row");
        let path = dir.join("expr.tsv");
        fs::write(&path, "cell\tMYC\tACTB\nc1\t1\t2\nc2\t3\n").unwrap();
        match read_matrix(&path) {
            Err(GrnError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_written_tables_quote_embedded_delimiters() {
        let dir = temp_dir("quote_write");
        let mut obs = ObsTable::with_index(vec!["AAA".to_string()]);
        obs.set_column("celltype", vec!["CD4 T, naive".to_string()]).unwrap();
        let path = dir.join("obs.csv");
        write_obs_table(&path, &obs).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "cell,celltype\nAAA,\"CD4 T, naive\"\n");
        assert_eq!(read_obs_table(&path).unwrap(), obs);
    }
}

