// preprocess.rs
//
// Cell-type selection, feature/cell filtering, normalization and variable
// feature selection for paired RNA + ATAC containers.

use log::{debug, info, warn};
use ndarray::Axis;
use rand::seq::index;
use std::collections::HashSet;

use crate::container::{AnnotatedMatrix, MultiModalContainer, ObsTable};
use crate::error::{GrnError, GrnResult};
use crate::synthetic::make_rng;

pub const CELLTYPE_COLUMN: &str = "celltype";
pub const BATCH_COLUMN: &str = "batch";
pub const TIME_COLUMN: &str = "time";

/// Which cell types survive `extract_case`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellTypeSelection {
    All,
    Only(Vec<String>),
}

impl CellTypeSelection {
    /// `all`, or a `;`-separated list of cell types.
    pub fn parse(selection: &str) -> Self {
        if selection == "all" {
            CellTypeSelection::All
        } else {
            CellTypeSelection::Only(selection.split(';').map(str::to_string).collect())
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaseConfig {
    pub celltypes: CellTypeSelection,
    pub n_hvg: usize,
    pub n_hvr: usize,
    /// Features must be non-zero in more than this many cells.
    pub min_cells_per_feature: usize,
    /// Cells must have more than this many non-zero features.
    pub min_features_per_cell: usize,
    pub target_sum: f64,
    pub default_batch: String,
    /// Keep only cells whose `time` annotation equals this value.
    pub time_point: Option<String>,
    /// Randomly keep this many cells; 0 keeps all.
    pub downsample: usize,
    pub seed: u64,
}

impl Default for CaseConfig {
    fn default() -> Self {
        Self {
            celltypes: CellTypeSelection::All,
            n_hvg: 16384,
            n_hvr: 65536,
            min_cells_per_feature: 3,
            min_features_per_cell: 3,
            target_sum: 1e4,
            default_batch: "batch1".to_string(),
            time_point: None,
            downsample: 0,
            seed: 0,
        }
    }
}

pub fn filter_features(matrix: &AnnotatedMatrix, min_cells: usize) -> AnnotatedMatrix {
    let keep: Vec<usize> = matrix
        .x
        .axis_iter(Axis(1))
        .enumerate()
        .filter(|(_, column)| column.iter().filter(|v| **v != 0.0).count() > min_cells)
        .map(|(i, _)| i)
        .collect();
    matrix.select_vars(&keep)
}

pub fn filter_cells(matrix: &AnnotatedMatrix, min_features: usize) -> AnnotatedMatrix {
    let keep: Vec<usize> = matrix
        .x
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().filter(|v| **v != 0.0).count() > min_features)
        .map(|(i, _)| i)
        .collect();
    matrix.select_obs(&keep)
}

/// Scales every cell to `target_sum` total counts. Empty cells stay zero.
pub fn normalize_total(matrix: &mut AnnotatedMatrix, target_sum: f64) {
    for mut row in matrix.x.axis_iter_mut(Axis(0)) {
        let total = row.sum();
        if total > 0.0 {
            row.mapv_inplace(|v| v * target_sum / total);
        }
    }
}

pub fn log1p(matrix: &mut AnnotatedMatrix) {
    matrix.x.mapv_inplace(f64::ln_1p);
}

/// Number of equal-width mean bins used to normalise dispersions.
pub const N_DISPERSION_BINS: usize = 20;

/// Per-feature log dispersion normalised within bins of log mean, computed
/// on the cells listed in `rows`. Features with zero dispersion are NaN.
fn normalized_dispersions(matrix: &AnnotatedMatrix, rows: &[usize]) -> Vec<f64> {
    let n = rows.len() as f64;
    let mut log_means = Vec::with_capacity(matrix.n_vars());
    let mut log_disps = Vec::with_capacity(matrix.n_vars());
    for column in matrix.x.axis_iter(Axis(1)) {
        let values: Vec<f64> = rows.iter().map(|&i| column[i].exp_m1()).collect();
        let mut mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        if mean == 0.0 {
            mean = 1e-12;
        }
        let dispersion = var / mean;
        log_disps.push(if dispersion == 0.0 { f64::NAN } else { dispersion.ln() });
        log_means.push(mean.ln_1p());
    }

    let lo = log_means.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = log_means.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = (hi - lo) / N_DISPERSION_BINS as f64;
    let bin_of = |m: f64| -> usize {
        if width > 0.0 {
            (((m - lo) / width) as usize).min(N_DISPERSION_BINS - 1)
        } else {
            0
        }
    };

    let mut bins: Vec<Vec<usize>> = vec![Vec::new(); N_DISPERSION_BINS];
    for (j, (&m, d)) in log_means.iter().zip(&log_disps).enumerate() {
        if d.is_finite() {
            bins[bin_of(m)].push(j);
        }
    }

    let mut normalized = vec![f64::NAN; log_disps.len()];
    for members in bins.iter().filter(|b| !b.is_empty()) {
        if members.len() == 1 {
            normalized[members[0]] = 1.0;
            continue;
        }
        let k = members.len() as f64;
        let mean = members.iter().map(|&j| log_disps[j]).sum::<f64>() / k;
        let std = (members.iter().map(|&j| (log_disps[j] - mean).powi(2)).sum::<f64>() / (k - 1.0)).sqrt();
        for &j in members {
            normalized[j] = if std > 0.0 { (log_disps[j] - mean) / std } else { 0.0 };
        }
    }
    normalized
}

/// Indices of the `n_top` most variable features, returned in their original
/// order. `matrix` holds log1p-normalised values.
///
/// Dispersions are normalised within mean bins separately for each batch.
/// Features are ranked by how many batches place them in their own top
/// `n_top`, then by the mean normalised dispersion across batches. Batches
/// with fewer than two cells do not vote. `batches`, when given, holds one
/// label per cell.
pub fn highly_variable_features(matrix: &AnnotatedMatrix, n_top: usize, batches: Option<&[String]>) -> Vec<usize> {
    let n_vars = matrix.n_vars();
    let mut groups: Vec<(&str, Vec<usize>)> = Vec::new();
    for cell in 0..matrix.n_obs() {
        let label = batches.and_then(|b| b.get(cell)).map(String::as_str).unwrap_or("");
        match groups.iter_mut().find(|(l, _)| *l == label) {
            Some((_, rows)) => rows.push(cell),
            None => groups.push((label, vec![cell])),
        }
    }

    let mut n_batches = vec![0usize; n_vars];
    let mut sums = vec![0.0f64; n_vars];
    let mut counts = vec![0usize; n_vars];
    for (label, rows) in &groups {
        if rows.len() < 2 {
            debug!("Batch '{}' has {} cell(s); skipped for variable features", label, rows.len());
            continue;
        }
        let normalized = normalized_dispersions(matrix, rows);
        let mut finite: Vec<usize> = (0..n_vars).filter(|&j| normalized[j].is_finite()).collect();
        finite.sort_by(|&a, &b| normalized[b].total_cmp(&normalized[a]));
        for &j in finite.iter().take(n_top) {
            n_batches[j] += 1;
        }
        for &j in &finite {
            sums[j] += normalized[j];
            counts[j] += 1;
        }
    }
    let mean_normalized: Vec<f64> = (0..n_vars)
        .map(|j| if counts[j] > 0 { sums[j] / counts[j] as f64 } else { f64::NEG_INFINITY })
        .collect();

    let mut order: Vec<usize> = (0..n_vars).collect();
    order.sort_by(|&a, &b| {
        n_batches[b]
            .cmp(&n_batches[a])
            .then(mean_normalized[b].total_cmp(&mean_normalized[a]))
    });
    order.truncate(n_top);
    order.sort_unstable();
    order
}

/// Batch label of every cell of `matrix`, looked up by name in `obs`.
fn batch_labels(matrix: &AnnotatedMatrix, obs: &ObsTable, default_batch: &str) -> Option<Vec<String>> {
    let column = obs.column(BATCH_COLUMN)?;
    let rows = obs.position_map();
    Some(
        matrix
            .obs_names
            .iter()
            .map(|cell| match rows.get(cell.as_str()) {
                Some(&i) => column[i].clone(),
                None => default_batch.to_string(),
            })
            .collect(),
    )
}

pub fn require_modality<'a>(container: &'a MultiModalContainer, key: &str) -> GrnResult<&'a AnnotatedMatrix> {
    container.modality(key).ok_or_else(|| {
        GrnError::DataExtraction(format!(
            "Modality '{}' not found; available modalities: {:?}",
            key,
            container.modality_names()
        ))
    })
}

/// Restricts the container (annotations and every modality) to `cells`, in
/// that order.
fn subset_cells(container: &mut MultiModalContainer, cells: &[String]) {
    container.obs = container.obs.select_by_name(cells);
    for matrix in container.modalities.values_mut() {
        *matrix = matrix.select_obs_by_name(cells);
    }
}

pub fn select_cell_types(container: &mut MultiModalContainer, selection: &CellTypeSelection) -> GrnResult<()> {
    let wanted: HashSet<&str> = match selection {
        CellTypeSelection::All => return Ok(()),
        CellTypeSelection::Only(types) => types.iter().map(String::as_str).collect(),
    };
    info!("Filtering cell types: {:?}", selection);
    let celltypes = container.obs.column(CELLTYPE_COLUMN).ok_or_else(|| {
        GrnError::DataExtraction(format!("obs has no '{}' column to filter on", CELLTYPE_COLUMN))
    })?;
    let keep: Vec<String> = container
        .obs
        .index
        .iter()
        .zip(celltypes)
        .filter(|(_, celltype)| wanted.contains(celltype.as_str()))
        .map(|(cell, _)| cell.clone())
        .collect();
    subset_cells(container, &keep);
    info!("After filtering: {} cells", container.obs.len());
    Ok(())
}

/// Keeps cells annotated with `time_point`. A container without a `time`
/// column is left as is.
pub fn select_time_point(container: &mut MultiModalContainer, time_point: &str) {
    let Some(times) = container.obs.column(TIME_COLUMN) else {
        warn!("Time column '{}' not found in data", TIME_COLUMN);
        return;
    };
    info!("Extracting time point {}", time_point);
    let keep: Vec<String> = container
        .obs
        .index
        .iter()
        .zip(times)
        .filter(|(_, time)| time.as_str() == time_point)
        .map(|(cell, _)| cell.clone())
        .collect();
    subset_cells(container, &keep);
    info!("After time extraction: {} cells", container.obs.len());
}

/// Keeps `n_cells` cells drawn without replacement, in draw order. Smaller
/// containers are left untouched.
pub fn downsample_cells(container: &mut MultiModalContainer, n_cells: usize, seed: u64) {
    let total = container.obs.len();
    if n_cells == 0 || total <= n_cells {
        return;
    }
    info!("Downsampling to {} cells", n_cells);
    let mut rng = make_rng(Some(seed));
    let keep: Vec<String> = index::sample(&mut rng, total, n_cells)
        .into_iter()
        .map(|i| container.obs.index[i].clone())
        .collect();
    subset_cells(container, &keep);
    info!("After downsampling: {} cells", container.obs.len());
}

fn process_modality(matrix: &AnnotatedMatrix, obs: &ObsTable, n_top: usize, config: &CaseConfig) -> AnnotatedMatrix {
    let mut filtered = filter_features(matrix, config.min_cells_per_feature);
    normalize_total(&mut filtered, config.target_sum);
    log1p(&mut filtered);
    let batches = batch_labels(&filtered, obs, &config.default_batch);
    let keep = highly_variable_features(&filtered, n_top, batches.as_deref());
    let selected = filtered.select_vars(&keep);
    filter_cells(&selected, config.min_features_per_cell)
}

/// Runs the whole case extraction and returns the reduced container.
pub fn extract_case(mut container: MultiModalContainer, config: &CaseConfig) -> GrnResult<MultiModalContainer> {
    container.standardize_modality_names();
    for key in ["rna", "atac"] {
        let matrix = require_modality(&container, key)?;
        info!("{} data shape: {} x {}", key.to_uppercase(), matrix.n_obs(), matrix.n_vars());
    }

    select_cell_types(&mut container, &config.celltypes)?;
    if let Some(time_point) = &config.time_point {
        select_time_point(&mut container, time_point);
    }
    downsample_cells(&mut container, config.downsample, config.seed);

    if !container.obs.has_column(BATCH_COLUMN) {
        info!("Adding default batch label");
        container.obs.fill_column(BATCH_COLUMN, &config.default_batch);
    }

    info!(
        "Finding highly variable features (genes: {}, regions: {})",
        config.n_hvg, config.n_hvr
    );
    let rna = process_modality(require_modality(&container, "rna")?, &container.obs, config.n_hvg, config);
    let atac = process_modality(require_modality(&container, "atac")?, &container.obs, config.n_hvr, config);
    info!(
        "Selected {} highly variable genes and {} highly variable regions",
        rna.n_vars(),
        atac.n_vars()
    );

    let rna_cells: HashSet<&str> = rna.obs_names.iter().map(String::as_str).collect();
    let common: Vec<String> = atac
        .obs_names
        .iter()
        .filter(|cell| rna_cells.contains(cell.as_str()))
        .cloned()
        .collect();
    info!("Common cells between modalities: {}", common.len());
    if common.is_empty() {
        warn!("No cells are shared between RNA and ATAC after filtering.");
    }

    subset_cells(&mut container, &common);
    container.modalities.insert("rna".to_string(), rna.select_obs_by_name(&common));
    container.modalities.insert("atac".to_string(), atac.select_obs_by_name(&common));
    Ok(container)
}
