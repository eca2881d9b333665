// main.rs

// --- External Crate Imports ---
use anyhow::{anyhow, Context, Error, Result};
use clap::Parser;
use log::{info, warn};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use multiome_grn::annotate::{self, AnnotateConfig, AnnotateOutcome};
use multiome_grn::barcodes;
use multiome_grn::container::{load_multimodal, write_multimodal};
use multiome_grn::grn::GrnConfig;
use multiome_grn::pipeline::{self, ExtractGrnConfig, FallbackGrnConfig, PipelineReport};
use multiome_grn::preprocess::{self, CaseConfig, CellTypeSelection};
use multiome_grn::synthetic::SyntheticConfig;

use cli::{CliArgs, Command};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting multiome_grn with args: {:?}", cli_args);

    match cli_args.command {
        Command::ExtractGrn(args) => run_extract_grn(args)?,
        Command::FallbackGrn(args) => run_fallback_grn(args)?,
        Command::ExtractCase(args) => run_extract_case(args)?,
        Command::Annotate(args) => run_annotate(args)?,
        Command::PrefixBarcodes(args) => run_prefix_barcodes(args)?,
    }

    info!(
        "Finished in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}

// --- Subcommand Runners ---

fn log_report(report: &PipelineReport) {
    info!("GRN saved to {}", report.paths.grn.display());
    info!("Ranking saved to {}", report.paths.ranking.display());
    info!("Peak-gene links saved to {}", report.paths.peak_gene.display());
    info!("TF binding saved to {}", report.paths.tf_binding.display());
    info!(
        "Network has {} interactions ({:?}).",
        report.n_edges, report.provenance
    );
}

fn run_extract_grn(args: cli::ExtractGrnArgs) -> Result<()> {
    let config = ExtractGrnConfig {
        input: args.input,
        output_dir: args.output_dir,
        method: args.method,
        grn: GrnConfig {
            max_genes: args.n_genes,
            correlation_threshold: args.corr_threshold,
            max_regulators: args.n_tfs,
            ..GrnConfig::default()
        },
    };
    let report = pipeline::run_extract_grn(&config)
        .with_context(|| format!("GRN extraction failed for {}", config.input.display()))?;
    log_report(&report);
    Ok(())
}

fn run_fallback_grn(args: cli::FallbackGrnArgs) -> Result<()> {
    let config = FallbackGrnConfig {
        input: args.input,
        output_dir: args.output_dir,
        method: args.method,
        synthetic: SyntheticConfig {
            n_tfs: args.n_tfs,
            n_genes: args.n_genes,
            n_interactions: args.n_interactions,
            n_links: args.n_links,
            n_binding: args.n_binding,
            seed: args.seed,
        },
    };
    let report = pipeline::run_fallback_grn(&config).context("Synthetic GRN generation failed")?;
    log_report(&report);
    Ok(())
}

fn run_extract_case(args: cli::ExtractCaseArgs) -> Result<()> {
    if args.n_hvg == 0 || args.n_hvr == 0 {
        return Err(anyhow!(
            "--n_hvg and --n_hvr must be positive (got {} and {}).",
            args.n_hvg,
            args.n_hvr
        ));
    }
    let config = CaseConfig {
        celltypes: CellTypeSelection::parse(&args.celltypes),
        n_hvg: args.n_hvg,
        n_hvr: args.n_hvr,
        time_point: args.time,
        downsample: args.downsample,
        seed: args.seed,
        ..CaseConfig::default()
    };

    info!("Loading data from {}", args.input.display());
    let container = load_multimodal(&args.input)
        .with_context(|| format!("Failed to load container {}", args.input.display()))?;
    let case = preprocess::extract_case(container, &config)?;

    write_multimodal(&args.output, &case)
        .with_context(|| format!("Failed to write container {}", args.output.display()))?;
    info!("Saved processed data to {}", args.output.display());
    Ok(())
}

fn run_annotate(args: cli::AnnotateArgs) -> Result<()> {
    let config = AnnotateConfig {
        input: args.input,
        annotations: args.annotations,
        output: args.output,
    };
    match annotate::run_annotate(&config)
        .with_context(|| format!("Failed to write placeholder {}", config.output.display()))?
    {
        AnnotateOutcome::Annotated { n_cells, summary, .. } => {
            info!("Annotated {} cells.", n_cells);
            if let Some(summary) = summary {
                info!("Annotation summary at {}", summary.display());
            }
        }
        AnnotateOutcome::Placeholder { path, reason } => {
            warn!("Wrote placeholder {} ({})", path.display(), reason);
        }
    }
    Ok(())
}

fn run_prefix_barcodes(args: cli::PrefixBarcodesArgs) -> Result<()> {
    info!("Reading multiome data from {}", args.multiome.display());
    let mut container = load_multimodal(&args.multiome)
        .with_context(|| format!("Failed to load container {}", args.multiome.display()))?;
    info!(
        "Ignoring annotation input {} (cell types are taken from the container).",
        args.annotation.display()
    );

    barcodes::ensure_celltype(&mut container);
    create_parent_dir(&args.celltype_csv)?;
    barcodes::write_prefixed_annotation(&args.celltype_csv, &container, &args.prefix)?;

    barcodes::prefix_cells(&mut container, &args.prefix);
    write_multimodal(&args.output, &container)
        .with_context(|| format!("Failed to write container {}", args.output.display()))?;
    info!("Modified multiome written to {}", args.output.display());

    create_parent_dir(&args.fragments_out)?;
    barcodes::prefix_fragments_file(&args.fragments, &args.fragments_out, &args.prefix)
        .with_context(|| format!("Failed to rewrite fragments {}", args.fragments.display()))?;
    Ok(())
}

fn create_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    Ok(())
}

// --- Module for Command Line Interface (CLI) ---
mod cli {
    use super::PathBuf;
    use clap::{Args, Parser, Subcommand};

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Gene regulatory network extraction for single-cell multiome data.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        #[command(subcommand)]
        pub(crate) command: Command,

        #[arg(long, default_value = "Info", global = true)]
        pub(crate) log_level: String,
    }

    #[derive(Subcommand, Debug)]
    pub(crate) enum Command {
        /// Correlation-based GRN from an expression container.
        ExtractGrn(ExtractGrnArgs),
        /// Synthetic GRN used when the real pipeline is unavailable.
        FallbackGrn(FallbackGrnArgs),
        /// Cell-type selection, filtering and variable feature selection.
        ExtractCase(ExtractCaseArgs),
        /// Merge per-cell annotations into a container.
        Annotate(AnnotateArgs),
        /// Prefix cell barcodes in a container and its fragments file.
        PrefixBarcodes(PrefixBarcodesArgs),
    }

    #[derive(Args, Debug)]
    pub(crate) struct ExtractGrnArgs {
        #[arg(short, long, required = true)]
        pub(crate) input: PathBuf,

        #[arg(short, long = "output_dir", required = true)]
        pub(crate) output_dir: PathBuf,

        #[arg(long, default_value = "correlation")]
        pub(crate) method: String,

        /// Cap on the regulator pool; 0 keeps every regulator.
        #[arg(long = "n_tfs", default_value_t = 100)]
        pub(crate) n_tfs: usize,

        #[arg(long = "n_genes", default_value_t = 1000)]
        pub(crate) n_genes: usize,

        #[arg(long = "corr_threshold", default_value_t = 0.3)]
        pub(crate) corr_threshold: f64,
    }

    #[derive(Args, Debug)]
    pub(crate) struct FallbackGrnArgs {
        #[arg(short, long, required = true)]
        pub(crate) input: PathBuf,

        #[arg(short, long = "output_dir", required = true)]
        pub(crate) output_dir: PathBuf,

        #[arg(long, default_value = "correlation")]
        pub(crate) method: String,

        #[arg(long = "n_tfs", default_value_t = 50)]
        pub(crate) n_tfs: usize,

        #[arg(long = "n_genes", default_value_t = 500)]
        pub(crate) n_genes: usize,

        #[arg(long = "n_interactions", default_value_t = 1000)]
        pub(crate) n_interactions: usize,

        #[arg(long = "n_links", default_value_t = 500)]
        pub(crate) n_links: usize,

        #[arg(long = "n_binding", default_value_t = 300)]
        pub(crate) n_binding: usize,

        #[arg(long)]
        pub(crate) seed: Option<u64>,
    }

    #[derive(Args, Debug)]
    pub(crate) struct ExtractCaseArgs {
        #[arg(short, long, required = true)]
        pub(crate) input: PathBuf,

        /// `all`, or cell types separated by `;`.
        #[arg(short, long, required = true)]
        pub(crate) celltypes: String,

        #[arg(short = 'g', long = "n_hvg", required = true)]
        pub(crate) n_hvg: usize,

        #[arg(short = 'r', long = "n_hvr", required = true)]
        pub(crate) n_hvr: usize,

        /// Keep only cells whose `time` annotation matches.
        #[arg(short, long)]
        pub(crate) time: Option<String>,

        /// Randomly keep this many cells; 0 keeps all.
        #[arg(short, long, default_value_t = 0)]
        pub(crate) downsample: usize,

        #[arg(short, long, default_value_t = 0)]
        pub(crate) seed: u64,

        #[arg(short, long, required = true)]
        pub(crate) output: PathBuf,
    }

    #[derive(Args, Debug)]
    pub(crate) struct AnnotateArgs {
        #[arg(short, long, required = true)]
        pub(crate) input: PathBuf,

        #[arg(short, long, required = true)]
        pub(crate) annotations: PathBuf,

        #[arg(short, long, required = true)]
        pub(crate) output: PathBuf,
    }

    #[derive(Args, Debug)]
    pub(crate) struct PrefixBarcodesArgs {
        #[arg(short, long, required = true)]
        pub(crate) multiome: PathBuf,

        #[arg(short, long, required = true)]
        pub(crate) fragments: PathBuf,

        #[arg(short, long, required = true)]
        pub(crate) annotation: PathBuf,

        #[arg(short, long, required = true)]
        pub(crate) output: PathBuf,

        #[arg(short = 'c', long = "celltype", required = true)]
        pub(crate) celltype_csv: PathBuf,

        #[arg(short = 'F', long = "fragments_out", required = true)]
        pub(crate) fragments_out: PathBuf,

        #[arg(long, default_value = multiome_grn::barcodes::DEFAULT_BARCODE_PREFIX)]
        pub(crate) prefix: String,
    }
}
