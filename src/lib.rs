//! Preprocessing and gene regulatory network extraction for single-cell
//! multiome (paired RNA + ATAC) datasets.
//!
//! The real pipeline scores regulator/target pairs by Pearson correlation
//! ([`grn::compute_correlation_grn`]); the fallback pipeline draws a synthetic
//! network ([`synthetic::generate_synthetic_network`]). Both write the same
//! four tables ([`output::write_artifacts`]).

pub mod annotate;
pub mod barcodes;
pub mod container;
pub mod correlation;
pub mod error;
pub mod grn;
pub mod output;
pub mod pipeline;
pub mod preprocess;
pub mod regulators;
pub mod synthetic;

pub use container::{ExpressionSource, Multiome};
pub use error::{GrnError, GrnResult};
pub use grn::{Grn, GrnConfig, GrnEdge, GrnProvenance};
