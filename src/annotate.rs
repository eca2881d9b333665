// annotate.rs
//
// Per-cell annotation merge. A failed load leaves a placeholder text file at
// the output path so the surrounding workflow keeps going.

use log::{info, warn};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::container::{load_multimodal, read_obs_table, write_multimodal, MultiModalContainer, ObsTable};
use crate::error::GrnResult;
use crate::preprocess::{require_modality, BATCH_COLUMN, CELLTYPE_COLUMN};

/// Annotation columns copied onto the cells; everything else is ignored.
pub const ANNOTATION_COLUMNS: [&str; 3] = ["donor", "batch", "Majority_Celltype"];
pub const MAJORITY_CELLTYPE_COLUMN: &str = "Majority_Celltype";
pub const UNKNOWN_LABEL: &str = "Unknown";
pub const DEFAULT_BATCH_LABEL: &str = "Batch1";
/// File name used when the output path is already a directory.
pub const PLACEHOLDER_FILE_NAME: &str = "PLACEHOLDER";
const SUMMARY_SUFFIX: &str = "_annotation_summary.txt";

#[derive(Debug, Clone)]
pub struct AnnotateConfig {
    pub input: PathBuf,
    pub annotations: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnnotateOutcome {
    Annotated {
        output: PathBuf,
        n_cells: usize,
        /// Written only when the annotation table could be read.
        summary: Option<PathBuf>,
    },
    Placeholder {
        path: PathBuf,
        reason: String,
    },
}

/// Reads a barcode-indexed annotation table (first column is the barcode).
pub fn read_annotations(path: &Path) -> GrnResult<ObsTable> {
    let annotations = read_obs_table(path)?;
    info!(
        "Found {} annotations with columns: {:?}",
        annotations.len(),
        annotations.column_names().collect::<Vec<_>>()
    );
    Ok(annotations)
}

/// Copies the recognised annotation columns onto `container.obs`. Cells
/// without an annotation row get `Unknown`.
pub fn annotate_cells(container: &mut MultiModalContainer, annotations: &ObsTable) -> GrnResult<()> {
    let annotated_rows = annotations.position_map();
    let cell_rows: Vec<Option<usize>> = container
        .obs
        .index
        .iter()
        .map(|cell| annotated_rows.get(cell.as_str()).copied())
        .collect();
    let matched = cell_rows.iter().filter(|row| row.is_some()).count();
    info!("{} of {} cells have annotations", matched, cell_rows.len());

    for column in ANNOTATION_COLUMNS {
        let Some(source) = annotations.column(column) else {
            continue;
        };
        info!("Adding column: {}", column);
        let values: Vec<String> = cell_rows
            .iter()
            .map(|row| match row {
                Some(i) => source[*i].clone(),
                None => UNKNOWN_LABEL.to_string(),
            })
            .collect();
        if column == MAJORITY_CELLTYPE_COLUMN {
            container.obs.set_column(CELLTYPE_COLUMN, values.clone())?;
        }
        container.obs.set_column(column, values)?;
    }

    if !container.obs.has_column(BATCH_COLUMN) {
        info!("Adding '{}' column with default value '{}'", BATCH_COLUMN, DEFAULT_BATCH_LABEL);
        container.obs.fill_column(BATCH_COLUMN, DEFAULT_BATCH_LABEL);
    }
    Ok(())
}

/// Writes a short text file in place of the annotated container and returns
/// its path. When `output` is an existing directory the file goes inside it.
pub fn write_placeholder(output: &Path, input: &Path, reason: &str) -> GrnResult<PathBuf> {
    let path = if output.is_dir() {
        output.join(PLACEHOLDER_FILE_NAME)
    } else {
        output.to_path_buf()
    };
    warn!("Creating placeholder file at {}: {}", path.display(), reason);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let created = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut writer = BufWriter::new(File::create(&path)?);
    writeln!(writer, "# Placeholder multiome file created by annotation step")?;
    writeln!(writer, "# Original file: {}", input.display())?;
    writeln!(writer, "# Reason: {}", reason)?;
    writeln!(writer, "# Created (unix seconds): {}", created)?;
    writer.flush()?;
    Ok(path)
}

/// `<output without .h5mu>_annotation_summary.txt`, next to `output`.
pub fn summary_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.strip_suffix(".h5mu").unwrap_or(name.as_str());
    output.with_file_name(format!("{}{}", stem, SUMMARY_SUFFIX))
}

/// Cell count, column names and the distinct cell types of an annotation
/// table, as plain text.
pub fn write_annotation_summary(path: &Path, annotations: &ObsTable) -> GrnResult<()> {
    let celltypes: Vec<&str> = match annotations
        .column(MAJORITY_CELLTYPE_COLUMN)
        .or_else(|| annotations.column(CELLTYPE_COLUMN))
    {
        Some(values) => {
            let mut seen = Vec::new();
            for value in values {
                if !seen.contains(&value.as_str()) {
                    seen.push(value.as_str());
                }
            }
            seen
        }
        None => vec![UNKNOWN_LABEL],
    };
    let columns: Vec<&str> = annotations.column_names().collect();

    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "Annotation Summary:")?;
    writeln!(writer, "Number of cells: {}", annotations.len())?;
    writeln!(writer, "Columns: {}", columns.join(", "))?;
    writeln!(writer, "Cell types: {}", celltypes.join(", "))?;
    writer.flush()?;
    info!("Annotation summary saved to: {}", path.display());
    Ok(())
}

fn load_paired(input: &Path) -> GrnResult<MultiModalContainer> {
    let mut container = load_multimodal(input)?;
    container.standardize_modality_names();
    for key in ["rna", "atac"] {
        let matrix = require_modality(&container, key)?;
        info!("{} data shape: {} x {}", key.to_uppercase(), matrix.n_obs(), matrix.n_vars());
    }
    Ok(container)
}

/// Annotation table and, when it could be read, the summary written for it.
fn load_annotations(config: &AnnotateConfig) -> (ObsTable, Option<PathBuf>) {
    if !config.annotations.exists() {
        warn!(
            "Annotation file {} not found. Proceeding without annotations.",
            config.annotations.display()
        );
        return (ObsTable::default(), None);
    }
    let annotations = match read_annotations(&config.annotations) {
        Ok(annotations) => annotations,
        Err(e) => {
            warn!("Could not process annotations: {}", e);
            return (ObsTable::default(), None);
        }
    };
    let summary = summary_path(&config.output);
    if let Some(parent) = summary.parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!("Could not write annotation summary: {}", e);
                return (annotations, None);
            }
        }
    }
    match write_annotation_summary(&summary, &annotations) {
        Ok(()) => (annotations, Some(summary)),
        Err(e) => {
            warn!("Could not write annotation summary: {}", e);
            (annotations, None)
        }
    }
}

fn annotate_and_write(config: &AnnotateConfig) -> GrnResult<(usize, Option<PathBuf>)> {
    let mut container = load_paired(&config.input)?;
    let (annotations, summary) = load_annotations(config);
    annotate_cells(&mut container, &annotations)?;

    let stale = config.output.join(PLACEHOLDER_FILE_NAME);
    if config.output.is_file() {
        info!("Replacing previous placeholder at {}", config.output.display());
        fs::remove_file(&config.output)?;
    } else if stale.is_file() {
        fs::remove_file(&stale)?;
    }
    write_multimodal(&config.output, &container)?;
    Ok((container.obs.len(), summary))
}

/// Loads the container, merges annotations and writes the result. Any failure
/// leaves a placeholder instead; only a failure to write that placeholder is
/// returned as an error.
pub fn run_annotate(config: &AnnotateConfig) -> GrnResult<AnnotateOutcome> {
    match annotate_and_write(config) {
        Ok((n_cells, summary)) => {
            info!("Annotated data saved to {}", config.output.display());
            Ok(AnnotateOutcome::Annotated {
                output: config.output.clone(),
                n_cells,
                summary,
            })
        }
        Err(e) => {
            warn!("Annotation of {} failed: {}", config.input.display(), e);
            let reason = e.to_string();
            let path = write_placeholder(&config.output, &config.input, &reason)?;
            Ok(AnnotateOutcome::Placeholder { path, reason })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::AnnotatedMatrix;
    use ndarray::array;
    use std::collections::BTreeMap;

    fn container() -> MultiModalContainer {
        let cells: Vec<String> = ["AAA", "CCC", "GGG"].iter().map(|s| s.to_string()).collect();
        let mut modalities = BTreeMap::new();
        modalities.insert(
            "rna".to_string(),
            AnnotatedMatrix::new(array![[1.0], [2.0], [3.0]], cells, vec!["MYC".to_string()]).unwrap(),
        );
        MultiModalContainer::new(modalities, None)
    }

    fn annotations() -> ObsTable {
        let mut table = ObsTable::with_index(vec!["CCC".to_string(), "AAA".to_string(), "TTT".to_string()]);
        table
            .set_column("Majority_Celltype", vec!["NK".into(), "B".into(), "T".into()])
            .unwrap();
        table
            .set_column("donor", vec!["d2".into(), "d1".into(), "d3".into()])
            .unwrap();
        table
            .set_column("ignored", vec!["x".into(), "y".into(), "z".into()])
            .unwrap();
        table
    }

    #[test]
    fn test_annotations_are_matched_by_barcode() {
        let mut c = container();
        annotate_cells(&mut c, &annotations()).unwrap();
        assert_eq!(c.obs.column("donor").unwrap(), &["d1".to_string(), "d2".to_string(), "Unknown".to_string()]);
        assert_eq!(c.obs.column("celltype").unwrap(), &["B".to_string(), "NK".to_string(), "Unknown".to_string()]);
        assert!(!c.obs.has_column("ignored"));
        assert_eq!(c.obs.column("batch").unwrap()[0], "Batch1");
    }

    #[test]
    fn test_placeholder_records_source() {
        let dir = std::env::temp_dir().join(format!("multiome_grn_annotate_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let output = dir.join("nested").join("annotated.h5mu");
        let written = write_placeholder(&output, Path::new("in.h5mu"), "missing").unwrap();
        assert_eq!(written, output);
        let text = fs::read_to_string(&output).unwrap();
        assert!(text.starts_with("# Placeholder"));
        assert!(text.contains("# Original file: in.h5mu"));
    }

    #[test]
    fn test_placeholder_goes_inside_existing_output_directory() {
        let dir = std::env::temp_dir().join(format!("multiome_grn_annotate_dir_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        let output = dir.join("annotated.h5mu");
        fs::create_dir_all(&output).unwrap();
        fs::write(output.join("obs.tsv"), "cell\tbatch\nAAA\tb1\n").unwrap();

        let written = write_placeholder(&output, Path::new("in.h5mu"), "missing").unwrap();
        assert_eq!(written, output.join(PLACEHOLDER_FILE_NAME));
        assert!(fs::read_to_string(&written).unwrap().starts_with("# Placeholder"));
        assert!(output.join("obs.tsv").is_file());
    }

    #[test]
    fn test_summary_path_replaces_h5mu_extension() {
        assert_eq!(
            summary_path(Path::new("out/annotated.h5mu")),
            Path::new("out/annotated_annotation_summary.txt")
        );
        assert_eq!(summary_path(Path::new("out/annotated")), Path::new("out/annotated_annotation_summary.txt"));
    }

    #[test]
    fn test_annotation_summary_lists_distinct_celltypes() {
        let dir = std::env::temp_dir().join(format!("multiome_grn_annotate_summary_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("summary.txt");
        let mut table = annotations();
        table
            .set_column("Majority_Celltype", vec!["NK".into(), "B".into(), "NK".into()])
            .unwrap();
        write_annotation_summary(&path, &table).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "Annotation Summary:\nNumber of cells: 3\nColumns: Majority_Celltype, donor, ignored\nCell types: NK, B\n"
        );

        write_annotation_summary(&path, &ObsTable::with_index(vec!["AAA".to_string()])).unwrap();
        assert!(fs::read_to_string(&path).unwrap().ends_with("Cell types: Unknown\n"));
    }

    #[test]
    fn test_annotation_csv_with_quoted_labels() {
        let dir = std::env::temp_dir().join(format!("multiome_grn_annotate_csv_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("annot.csv");
        fs::write(&path, "barcode,donor,Majority_Celltype\nAAA,d1,\"CD4 T, naive\"\n").unwrap();
        let table = read_annotations(&path).unwrap();
        assert_eq!(table.column("Majority_Celltype").unwrap(), &["CD4 T, naive".to_string()]);

        let mut c = container();
        annotate_cells(&mut c, &table).unwrap();
        assert_eq!(c.obs.column("celltype").unwrap()[0], "CD4 T, naive");
    }
}
