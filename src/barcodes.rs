// barcodes.rs
//
// Cell-barcode prefixing across the container, the exported annotation CSV and
// the fragments file, so barcodes from several samples cannot collide.

use csv::WriterBuilder;
use log::{debug, info, warn};
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use crate::container::MultiModalContainer;
use crate::error::{GrnError, GrnResult};
use crate::preprocess::{BATCH_COLUMN, CELLTYPE_COLUMN};

pub const DEFAULT_BARCODE_PREFIX: &str = "c0h_";
/// Zero-based column of the barcode in a fragments file.
pub const FRAGMENT_BARCODE_FIELD: usize = 3;

pub fn ensure_celltype(container: &mut MultiModalContainer) {
    if !container.obs.has_column(CELLTYPE_COLUMN) {
        warn!("'{}' column not found. Adding a default 'unknown' column.", CELLTYPE_COLUMN);
        container.obs.fill_column(CELLTYPE_COLUMN, "unknown");
    }
}

fn obs_column<'a>(container: &'a MultiModalContainer, name: &str) -> GrnResult<&'a [String]> {
    container
        .obs
        .column(name)
        .ok_or_else(|| GrnError::DataExtraction(format!("obs has no '{}' column", name)))
}

/// Writes `,batch,celltype` rows keyed by prefixed barcode.
pub fn write_prefixed_annotation(path: &Path, container: &MultiModalContainer, prefix: &str) -> GrnResult<()> {
    let batch = obs_column(container, BATCH_COLUMN)?;
    let celltype = obs_column(container, CELLTYPE_COLUMN)?;

    let mut writer = WriterBuilder::new()
        .delimiter(b',')
        .from_writer(BufWriter::new(File::create(path)?));
    writer.write_record(["", BATCH_COLUMN, CELLTYPE_COLUMN])?;
    for ((cell, b), t) in container.obs.index.iter().zip(batch).zip(celltype) {
        let barcode = format!("{}{}", prefix, cell);
        writer.write_record([barcode.as_str(), b.as_str(), t.as_str()])?;
    }
    writer.flush()?;
    info!("Annotation written to {}", path.display());
    Ok(())
}

pub fn prefix_cells(container: &mut MultiModalContainer, prefix: &str) {
    container.rename_cells(|cell| format!("{}{}", prefix, cell));
    for name in container.modality_names() {
        debug!("Updated modality {} index", name);
    }
}

/// Copies fragment lines from `reader` to `writer`, prefixing the barcode
/// field of every line with at least four tab-separated fields. Returns the
/// number of lines written.
pub fn prefix_fragments<R: BufRead, W: Write>(reader: R, mut writer: W, prefix: &str) -> GrnResult<usize> {
    let mut n_lines = 0;
    for line in reader.lines() {
        let line = line?;
        let mut fields: Vec<String> = line.trim().split('\t').map(str::to_string).collect();
        if fields.len() > FRAGMENT_BARCODE_FIELD {
            fields[FRAGMENT_BARCODE_FIELD] = format!("{}{}", prefix, fields[FRAGMENT_BARCODE_FIELD]);
        }
        writeln!(writer, "{}", fields.join("\t"))?;
        n_lines += 1;
    }
    writer.flush()?;
    Ok(n_lines)
}

pub fn prefix_fragments_file(input: &Path, output: &Path, prefix: &str) -> GrnResult<usize> {
    let reader = BufReader::new(File::open(input)?);
    let writer = BufWriter::new(File::create(output)?);
    let n_lines = prefix_fragments(reader, writer, prefix)?;
    info!("Fragments written to {} ({} lines)", output.display(), n_lines);
    Ok(n_lines)
}
