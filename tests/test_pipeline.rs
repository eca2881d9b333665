use anyhow;
use multiome_grn::container::{load_multimodal, write_multimodal};
use multiome_grn::grn::GrnConfig;
use multiome_grn::output::read_grn_table;
use multiome_grn::pipeline::{run_extract_grn, run_fallback_grn, ExtractGrnConfig, FallbackGrnConfig};
use multiome_grn::preprocess::{extract_case, CaseConfig};
use multiome_grn::synthetic::SyntheticConfig;
use multiome_grn::{GrnError, GrnProvenance};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

fn scratch_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("multiome_grn_it_{}_{}", tag, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// 100 cells; G1 tracks MYC, the rest are periodic noise.
fn write_expression_csv(path: &PathBuf) {
    let mut file = fs::File::create(path).unwrap();
    writeln!(file, "cell,MYC,G1,G2,G3,G4").unwrap();
    for i in 0..100usize {
        let myc = i as f64;
        let g1 = 2.0 * myc + ((i * 7) % 5) as f64;
        let g2 = ((i * 37) % 11) as f64;
        let g3 = ((i * 13) % 7) as f64;
        let g4 = ((i * 5) % 3) as f64;
        writeln!(file, "cell{},{},{},{},{},{}", i, myc, g1, g2, g3, g4).unwrap();
    }
}

#[test]
fn test_extract_grn_on_single_matrix() -> anyhow::Result<()> {
    let dir = scratch_dir("extract");
    let input = dir.join("expression.csv");
    write_expression_csv(&input);

    let config = ExtractGrnConfig {
        input,
        output_dir: dir.join("out"),
        method: "correlation".to_string(),
        grn: GrnConfig {
            correlation_threshold: 0.5,
            ..GrnConfig::default()
        },
    };
    let report = run_extract_grn(&config)?;
    assert_eq!(report.provenance, GrnProvenance::Correlation);

    let edges = read_grn_table(&report.paths.grn)?;
    assert_eq!(edges.len(), report.n_edges);
    assert!(edges.iter().all(|e| e.source == "MYC" && e.target != "MYC"));
    let g1 = edges.iter().find(|e| e.target == "G1").expect("MYC -> G1 edge");
    assert!(g1.score > 0.9);
    assert!(g1.pval < 0.05);

    for path in [&report.paths.ranking, &report.paths.peak_gene, &report.paths.tf_binding] {
        assert!(path.is_file(), "{} missing", path.display());
    }
    assert!(report
        .paths
        .grn
        .ends_with("correlation.correlation.correlation.correlation.grn.csv"));
    Ok(())
}

#[test]
fn test_extract_grn_without_rna_writes_two_edge_placeholder() -> anyhow::Result<()> {
    let dir = scratch_dir("no_rna");
    let input = dir.join("multiome");
    fs::create_dir_all(&input)?;
    fs::write(input.join("atac.tsv"), "cell\tchr1:1-100\nAAA\t1\nCCC\t0\n")?;

    let config = ExtractGrnConfig {
        input,
        output_dir: dir.join("out"),
        method: "m".to_string(),
        grn: GrnConfig::default(),
    };
    let report = run_extract_grn(&config)?;
    assert_eq!(report.provenance, GrnProvenance::ExtractionFailurePlaceholder);

    let edges = read_grn_table(&report.paths.grn)?;
    assert_eq!(edges.len(), 2);
    assert_eq!((edges[0].source.as_str(), edges[0].target.as_str()), ("TF1", "Gene1"));
    assert_eq!((edges[1].source.as_str(), edges[1].target.as_str()), ("TF2", "Gene2"));
    Ok(())
}

#[test]
fn test_extract_grn_missing_input_is_an_error() {
    let dir = scratch_dir("missing");
    let config = ExtractGrnConfig {
        input: dir.join("does_not_exist.h5mu"),
        output_dir: dir.join("out"),
        method: "correlation".to_string(),
        grn: GrnConfig::default(),
    };
    let result = run_extract_grn(&config);
    assert!(matches!(result, Err(GrnError::InputLoad { .. })));
    assert!(!dir.join("out").exists());
}

#[test]
fn test_fallback_grn_is_reproducible_with_seed() -> anyhow::Result<()> {
    let dir = scratch_dir("fallback");
    let make_config = |out: &str| FallbackGrnConfig {
        input: dir.join("ignored.h5mu"),
        output_dir: dir.join(out),
        method: "fallback".to_string(),
        synthetic: SyntheticConfig {
            n_interactions: 200,
            seed: Some(7),
            ..SyntheticConfig::default()
        },
    };

    let first = run_fallback_grn(&make_config("a"))?;
    let second = run_fallback_grn(&make_config("b"))?;
    assert_eq!(first.provenance, GrnProvenance::Synthetic);
    assert!(first.n_edges <= 200);
    assert_eq!(fs::read_to_string(&first.paths.grn)?, fs::read_to_string(&second.paths.grn)?);
    assert_eq!(
        fs::read_to_string(&first.paths.peak_gene)?,
        fs::read_to_string(&second.paths.peak_gene)?
    );

    let edges = read_grn_table(&first.paths.grn)?;
    assert!(edges.windows(2).all(|w| w[0].score >= w[1].score));
    Ok(())
}

#[test]
fn test_extract_case_roundtrip_through_directory() -> anyhow::Result<()> {
    let dir = scratch_dir("case");
    let input = dir.join("multiome");
    fs::create_dir_all(&input)?;

    let mut rna = String::from("cell\tA\tB\tC\tD\tE\tF\n");
    let mut atac = String::from("cell\tr1\tr2\tr3\tr4\tr5\tr6\n");
    let mut obs = String::from("cell\tcelltype\n");
    for i in 0..8 {
        rna.push_str(&format!(
            "c{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            i,
            i + 1,
            2 * i + 1,
            (i % 3) + 1,
            5,
            (i * i) % 7 + 1,
            8 - i
        ));
        atac.push_str(&format!(
            "c{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
            i,
            (i % 2) + 1,
            i + 1,
            3,
            (i % 4) + 2,
            1,
            9 - i
        ));
        obs.push_str(&format!("c{}\t{}\n", i, if i < 6 { "T" } else { "B" }));
    }
    fs::write(input.join("RNA.tsv"), rna)?;
    fs::write(input.join("ATAC.tsv"), atac)?;
    fs::write(input.join("obs.tsv"), obs)?;

    let config = CaseConfig {
        celltypes: multiome_grn::preprocess::CellTypeSelection::parse("T"),
        n_hvg: 4,
        n_hvr: 4,
        ..CaseConfig::default()
    };
    let case = extract_case(load_multimodal(&input)?, &config)?;
    let output = dir.join("case");
    write_multimodal(&output, &case)?;

    let reloaded = load_multimodal(&output)?;
    let rna = reloaded.modality("rna").expect("rna modality");
    let atac = reloaded.modality("atac").expect("atac modality");
    assert_eq!(rna.n_vars(), 4);
    assert_eq!(atac.n_vars(), 4);
    assert_eq!(rna.obs_names, atac.obs_names);
    assert_eq!(rna.n_obs(), 6);
    assert_eq!(reloaded.obs.column("celltype").unwrap(), vec!["T".to_string(); 6].as_slice());
    assert_eq!(reloaded.obs.column("batch").unwrap()[0], "batch1");
    Ok(())
}
