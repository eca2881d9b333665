// output.rs

use csv::WriterBuilder;
use log::info;
use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use crate::container::{csv_read_error, parse_error, table_reader, table_writer};
use crate::error::GrnResult;
use crate::grn::GrnEdge;
use crate::synthetic::{PeakGeneLink, TfBinding};

/// File names of the four artifacts for one method label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub grn: PathBuf,
    pub ranking: PathBuf,
    pub peak_gene: PathBuf,
    pub tf_binding: PathBuf,
}

impl ArtifactPaths {
    /// Downstream rules expect the method token repeated exactly like this.
    pub fn new(output_dir: &Path, method: &str) -> Self {
        let m = method;
        Self {
            grn: output_dir.join(format!("{m}.{m}.{m}.{m}.grn.csv")),
            ranking: output_dir.join(format!("{m}.{m}.{m}.{m}.rnk.tsv")),
            peak_gene: output_dir.join(format!("{m}.p2g.csv")),
            tf_binding: output_dir.join(format!("{m}.{m}.tfb.csv")),
        }
    }
}

/// Rows for all four tables.
#[derive(Debug, Clone, Copy)]
pub struct GrnArtifacts<'a> {
    pub edges: &'a [GrnEdge],
    pub peak_gene_links: &'a [PeakGeneLink],
    pub tf_binding: &'a [TfBinding],
}

pub fn write_grn_table(path: &Path, edges: &[GrnEdge]) -> GrnResult<()> {
    let mut writer = table_writer(path)?;
    writer.write_record(["source", "target", "score", "pval"])?;
    for edge in edges {
        writer.write_record([
            edge.source.clone(),
            edge.target.clone(),
            edge.score.to_string(),
            edge.pval.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Tab-separated regardless of extension.
pub fn write_ranking_table(path: &Path, edges: &[GrnEdge]) -> GrnResult<()> {
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(BufWriter::new(File::create(path)?));
    writer.write_record(["source", "target", "score"])?;
    for edge in edges {
        writer.write_record([edge.source.clone(), edge.target.clone(), edge.score.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_peak_gene_table(path: &Path, links: &[PeakGeneLink]) -> GrnResult<()> {
    let mut writer = table_writer(path)?;
    writer.write_record(["cre", "gene", "score", "pval"])?;
    for link in links {
        writer.write_record([
            link.cre.clone(),
            link.gene.clone(),
            link.score.to_string(),
            link.pval.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_tf_binding_table(path: &Path, binding: &[TfBinding]) -> GrnResult<()> {
    let mut writer = table_writer(path)?;
    writer.write_record(["cre", "tf", "score"])?;
    for site in binding {
        writer.write_record([site.cre.clone(), site.tf.clone(), site.score.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Creates `output_dir` if needed and writes the GRN, ranking, peak-to-gene
/// and TF-binding tables.
pub fn write_artifacts(output_dir: &Path, method: &str, artifacts: &GrnArtifacts<'_>) -> GrnResult<ArtifactPaths> {
    fs::create_dir_all(output_dir)?;
    let paths = ArtifactPaths::new(output_dir, method);

    write_grn_table(&paths.grn, artifacts.edges)?;
    info!("Created GRN file: {} with {} interactions", paths.grn.display(), artifacts.edges.len());
    write_ranking_table(&paths.ranking, artifacts.edges)?;
    info!("Created ranking file: {}", paths.ranking.display());
    write_peak_gene_table(&paths.peak_gene, artifacts.peak_gene_links)?;
    info!(
        "Created P2G file: {} with {} links",
        paths.peak_gene.display(),
        artifacts.peak_gene_links.len()
    );
    write_tf_binding_table(&paths.tf_binding, artifacts.tf_binding)?;
    info!(
        "Created TFB file: {} with {} binding sites",
        paths.tf_binding.display(),
        artifacts.tf_binding.len()
    );
    Ok(paths)
}

/// Three fixed peak-to-gene rows written next to a real correlation network.
pub fn placeholder_peak_gene_links() -> Vec<PeakGeneLink> {
    [
        ("chr1:1000-2000", "GENE1", 0.8, 0.001),
        ("chr2:5000-6000", "GENE2", 0.7, 0.01),
        ("chr3:10000-11000", "GENE3", 0.6, 0.05),
    ]
    .into_iter()
    .map(|(cre, gene, score, pval)| PeakGeneLink {
        cre: cre.to_string(),
        gene: gene.to_string(),
        score,
        pval,
    })
    .collect()
}

/// Three fixed TF-binding rows written next to a real correlation network.
pub fn placeholder_tf_binding() -> Vec<TfBinding> {
    [
        ("chr1:1000-2000", "TF1", 10.5),
        ("chr2:5000-6000", "TF2", 8.2),
        ("chr3:10000-11000", "TF3", 6.1),
    ]
    .into_iter()
    .map(|(cre, tf, score)| TfBinding {
        cre: cre.to_string(),
        tf: tf.to_string(),
        score,
    })
    .collect()
}

/// Reads a table written by [`write_grn_table`].
pub fn read_grn_table(path: &Path) -> GrnResult<Vec<GrnEdge>> {
    let mut reader = table_reader(path)?;
    let header = reader.headers().map_err(|e| csv_read_error(path, e))?;
    if header.is_empty() {
        return Err(parse_error(path, 1, "file is empty"));
    }
    if header.iter().collect::<Vec<_>>() != ["source", "target", "score", "pval"] {
        return Err(parse_error(path, 1, format!("unexpected header {:?}", header)));
    }

    let mut edges = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| csv_read_error(path, e))?;
        let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
        let number = |idx: usize, label: &str| -> GrnResult<f64> {
            record[idx]
                .trim()
                .parse::<f64>()
                .map_err(|e| parse_error(path, line, format!("{}: {}", label, e)))
        };
        let score = number(2, "score")?;
        let pval = number(3, "pval")?;
        edges.push(GrnEdge::new(&record[0], &record[1], score, pval));
    }
    Ok(edges)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GrnError;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("multiome_grn_output_{}_{}", tag, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_artifact_names_repeat_method_token() {
        let paths = ArtifactPaths::new(Path::new("out"), "corr");
        assert_eq!(paths.grn, Path::new("out/corr.corr.corr.corr.grn.csv"));
        assert_eq!(paths.ranking, Path::new("out/corr.corr.corr.corr.rnk.tsv"));
        assert_eq!(paths.peak_gene, Path::new("out/corr.p2g.csv"));
        assert_eq!(paths.tf_binding, Path::new("out/corr.corr.tfb.csv"));
    }

    #[test]
    fn test_grn_table_roundtrip_keeps_rows_and_columns() {
        let dir = temp_dir("roundtrip");
        let edges = vec![
            GrnEdge::new("MYC", "ACTB", 0.91, 0.0001),
            GrnEdge::new("JUN", "FOS", 0.5, 0.04),
            GrnEdge::new("TP53", "MDM2", 0.33, 1e-12),
        ];
        let links = placeholder_peak_gene_links();
        let binding = placeholder_tf_binding();
        let paths = write_artifacts(
            &dir,
            "correlation",
            &GrnArtifacts {
                edges: &edges,
                peak_gene_links: &links,
                tf_binding: &binding,
            },
        )
        .unwrap();

        let header = fs::read_to_string(&paths.grn).unwrap();
        assert!(header.starts_with("source,target,score,pval\n"));
        assert_eq!(read_grn_table(&paths.grn).unwrap(), edges);

        let ranking = fs::read_to_string(&paths.ranking).unwrap();
        let ranking_lines: Vec<&str> = ranking.lines().collect();
        assert_eq!(ranking_lines[0], "source\ttarget\tscore");
        assert_eq!(ranking_lines[1], "MYC\tACTB\t0.91");
        assert_eq!(ranking_lines.len(), edges.len() + 1);

        let p2g = fs::read_to_string(&paths.peak_gene).unwrap();
        assert_eq!(p2g.lines().next(), Some("cre,gene,score,pval"));
        assert_eq!(p2g.lines().count(), 4);
        let tfb = fs::read_to_string(&paths.tf_binding).unwrap();
        assert_eq!(tfb.lines().nth(1), Some("chr1:1000-2000,TF1,10.5"));
    }

    #[test]
    fn test_grn_table_quotes_names_containing_commas() {
        let dir = temp_dir("quoted");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("m.grn.csv");
        let edges = vec![GrnEdge::new("NR2F1,NR2F2", "ACTB", 0.7, 0.001)];
        write_grn_table(&path, &edges).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().nth(1), Some("\"NR2F1,NR2F2\",ACTB,0.7,0.001"));
        assert_eq!(read_grn_table(&path).unwrap(), edges);
    }

    #[test]
    fn test_grn_table_with_wrong_header_is_rejected() {
        let dir = temp_dir("bad_header");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("m.grn.csv");
        fs::write(&path, "tf,gene,weight,p\nMYC,ACTB,0.5,0.1\n").unwrap();
        assert!(matches!(read_grn_table(&path), Err(GrnError::Parse { line: 1, .. })));
    }

    #[test]
    fn test_write_artifacts_is_idempotent_on_existing_dir() {
        let dir = temp_dir("idempotent");
        let edges = vec![GrnEdge::new("TF1", "Gene1", 0.5, 0.01)];
        let artifacts = GrnArtifacts {
            edges: &edges,
            peak_gene_links: &[],
            tf_binding: &[],
        };
        write_artifacts(&dir, "m", &artifacts).unwrap();
        write_artifacts(&dir, "m", &artifacts).unwrap();
        assert_eq!(read_grn_table(&dir.join("m.m.m.m.grn.csv")).unwrap().len(), 1);
    }
}
