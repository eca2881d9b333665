// synthetic.rs
//
// Stand-in network, peak-gene links and TF binding sites for runs where the
// real pipeline cannot execute. No input data is read.

use log::{debug, info};
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Bernoulli, Distribution, Uniform};
use std::collections::HashSet;
use std::fmt;

use crate::error::{GrnError, GrnResult};
use crate::grn::GrnEdge;
use crate::regulators::{
    SYNTHETIC_BASE_GENES, SYNTHETIC_EXTRA_GENES, SYNTHETIC_GENE_PREFIXES, SYNTHETIC_TFS,
};

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub n_tfs: usize,
    pub n_genes: usize,
    pub n_interactions: usize,
    pub n_links: usize,
    pub n_binding: usize,
    /// Fixes the generator; `None` draws a fresh seed per run.
    pub seed: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            n_tfs: 50,
            n_genes: 500,
            n_interactions: 1000,
            n_links: 500,
            n_binding: 300,
            seed: None,
        }
    }
}

impl SyntheticConfig {
    pub fn validate(&self) -> GrnResult<()> {
        if self.n_tfs == 0 {
            return Err(GrnError::InvalidConfig("n_tfs must be > 0".to_string()));
        }
        if self.n_genes == 0 {
            return Err(GrnError::InvalidConfig("n_genes must be > 0".to_string()));
        }
        Ok(())
    }
}

/// `chrom:start-end`, the CRE notation used in every output table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenomicInterval {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl fmt::Display for GenomicInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeakGeneLink {
    pub cre: String,
    pub gene: String,
    pub score: f64,
    pub pval: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TfBinding {
    pub cre: String,
    pub tf: String,
    /// -log10(p)-style statistic.
    pub score: f64,
}

/// Everything the four output tables need.
#[derive(Debug, Clone)]
pub struct SyntheticNetwork {
    pub edges: Vec<GrnEdge>,
    pub peak_gene_links: Vec<PeakGeneLink>,
    pub tf_binding: Vec<TfBinding>,
}

pub fn make_rng(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_rng(&mut rand::rng()),
    }
}

fn chromosomes() -> Vec<String> {
    (1..=22)
        .map(|i| format!("chr{}", i))
        .chain(["chrX".to_string(), "chrY".to_string()])
        .collect()
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn uniform_error(e: impl fmt::Display) -> GrnError {
    GrnError::InvalidConfig(format!("invalid sampling range: {}", e))
}

/// Sampling distributions, built once per run.
struct Draws {
    moderate_tier: Bernoulli,
    moderate_score: Uniform<f64>,
    high_score: Uniform<f64>,
    strong_pval: Uniform<f64>,
    mid_pval: Uniform<f64>,
    weak_pval: Uniform<f64>,
    peak_start: Uniform<u64>,
    peak_length: Uniform<u64>,
    link_score: Uniform<f64>,
    link_pval: Uniform<f64>,
    binding_score: Uniform<f64>,
    gene_suffix: Uniform<u32>,
}

impl Draws {
    fn new() -> GrnResult<Self> {
        Ok(Self {
            moderate_tier: Bernoulli::new(0.7).map_err(uniform_error)?,
            moderate_score: Uniform::new(0.3, 0.7).map_err(uniform_error)?,
            high_score: Uniform::new_inclusive(0.7, 0.95).map_err(uniform_error)?,
            strong_pval: Uniform::new(0.001, 0.01).map_err(uniform_error)?,
            mid_pval: Uniform::new(0.01, 0.05).map_err(uniform_error)?,
            weak_pval: Uniform::new(0.05, 0.1).map_err(uniform_error)?,
            peak_start: Uniform::new_inclusive(1_000_000, 200_000_000).map_err(uniform_error)?,
            peak_length: Uniform::new_inclusive(500, 2000).map_err(uniform_error)?,
            link_score: Uniform::new_inclusive(0.1, 1.0).map_err(uniform_error)?,
            link_pval: Uniform::new_inclusive(0.001, 0.1).map_err(uniform_error)?,
            binding_score: Uniform::new_inclusive(1.0, 15.0).map_err(uniform_error)?,
            gene_suffix: Uniform::new_inclusive(10_000, 99_999).map_err(uniform_error)?,
        })
    }

    fn interval<R: Rng + ?Sized>(&self, chroms: &[String], rng: &mut R) -> GenomicInterval {
        let chrom = chroms.choose(rng).cloned().unwrap_or_else(|| "chr1".to_string());
        let start = self.peak_start.sample(rng);
        let end = start + self.peak_length.sample(rng);
        GenomicInterval { chrom, start, end }
    }
}

/// Fixed TF list and the fixed gene list extended with generated identifiers.
fn tf_gene_pools<R: Rng + ?Sized>(draws: &Draws, rng: &mut R) -> (Vec<String>, Vec<String>) {
    let tfs = SYNTHETIC_TFS.iter().map(|s| s.to_string()).collect();
    let mut genes: Vec<String> = SYNTHETIC_BASE_GENES.iter().map(|s| s.to_string()).collect();
    for _ in 0..SYNTHETIC_EXTRA_GENES {
        let prefix = SYNTHETIC_GENE_PREFIXES.choose(rng).copied().unwrap_or("LOC");
        genes.push(format!("{}{}", prefix, draws.gene_suffix.sample(rng)));
    }
    (tfs, genes)
}

fn generate_interactions<R: Rng + ?Sized>(
    tfs: &[String],
    genes: &[String],
    n_interactions: usize,
    draws: &Draws,
    rng: &mut R,
) -> Vec<GrnEdge> {
    let mut interactions = Vec::with_capacity(n_interactions);
    for _ in 0..n_interactions {
        let (Some(tf), Some(gene)) = (tfs.choose(rng), genes.choose(rng)) else {
            break;
        };
        let score = if draws.moderate_tier.sample(rng) {
            draws.moderate_score.sample(rng)
        } else {
            draws.high_score.sample(rng)
        };
        let pval = if score > 0.6 {
            draws.strong_pval.sample(rng)
        } else if score > 0.4 {
            draws.mid_pval.sample(rng)
        } else {
            draws.weak_pval.sample(rng)
        };
        interactions.push(GrnEdge::new(tf.clone(), gene.clone(), round_to(score, 3), pval));
    }

    // Highest-scoring occurrence of each pair wins.
    interactions.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut unique: Vec<GrnEdge> = interactions
        .into_iter()
        .filter(|edge| seen.insert((edge.source.clone(), edge.target.clone())))
        .collect();
    unique.truncate(n_interactions);
    unique
}

fn generate_peak_gene_links<R: Rng + ?Sized>(
    genes: &[String],
    n_links: usize,
    draws: &Draws,
    rng: &mut R,
) -> Vec<PeakGeneLink> {
    let chroms = chromosomes();
    let mut links = Vec::with_capacity(n_links);
    for _ in 0..n_links {
        let cre = draws.interval(&chroms, rng).to_string();
        let Some(gene) = genes.choose(rng) else {
            break;
        };
        links.push(PeakGeneLink {
            cre,
            gene: gene.clone(),
            score: round_to(draws.link_score.sample(rng), 3),
            pval: draws.link_pval.sample(rng),
        });
    }
    links
}

fn generate_tf_binding<R: Rng + ?Sized>(
    tfs: &[String],
    n_binding: usize,
    draws: &Draws,
    rng: &mut R,
) -> Vec<TfBinding> {
    let chroms = chromosomes();
    let mut binding = Vec::with_capacity(n_binding);
    for _ in 0..n_binding {
        let cre = draws.interval(&chroms, rng).to_string();
        let Some(tf) = tfs.choose(rng) else {
            break;
        };
        binding.push(TfBinding {
            cre,
            tf: tf.clone(),
            score: round_to(draws.binding_score.sample(rng), 2),
        });
    }
    binding
}

pub fn generate_synthetic_network<R: Rng + ?Sized>(
    config: &SyntheticConfig,
    rng: &mut R,
) -> GrnResult<SyntheticNetwork> {
    config.validate()?;
    let draws = Draws::new()?;

    let (mut tfs, mut genes) = tf_gene_pools(&draws, rng);
    tfs.truncate(config.n_tfs);
    genes.truncate(config.n_genes);
    info!("Generating interactions for {} TFs and {} genes", tfs.len(), genes.len());

    let edges = generate_interactions(&tfs, &genes, config.n_interactions, &draws, rng);
    debug!("{} unique interactions after deduplication", edges.len());
    let peak_gene_links = generate_peak_gene_links(&genes, config.n_links, &draws, rng);
    let tf_binding = generate_tf_binding(&tfs, config.n_binding, &draws, rng);

    Ok(SyntheticNetwork {
        edges,
        peak_gene_links,
        tf_binding,
    })
}
