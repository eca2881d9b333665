// regulators.rs
//
// Fixed regulator and gene symbol pools. Order matters: placeholder tables and
// truncation both take entries from the front.

/// Candidate regulators tested by the correlation builder.
pub const CORRELATION_TFS: [&str; 40] = [
    "MYC", "TP53", "JUN", "FOS", "ATF3", "EGR1", "CEBPB", "STAT3",
    "IRF1", "NFKB1", "REL", "SP1", "KLF4", "SOX2", "NANOG", "POU5F1",
    "GATA1", "GATA2", "RUNX1", "TAL1", "SPI1", "CEBPA", "PAX5", "EBF1",
    "TCF7", "LEF1", "FOXP3", "TBX21", "GATA3", "RORC", "BCL6", "IRF4",
    "PPARG", "NR1H3", "SREBF1", "HNF4A", "FOXA1", "FOXA2", "CDX2", "MSX1",
];

/// Regulators used by the synthetic generator: the correlation set plus
/// cell-cycle and nuclear-receptor factors.
pub const SYNTHETIC_TFS: [&str; 56] = [
    "MYC", "TP53", "JUN", "FOS", "ATF3", "EGR1", "CEBPB", "STAT3",
    "IRF1", "NFKB1", "REL", "SP1", "KLF4", "SOX2", "NANOG", "POU5F1",
    "GATA1", "GATA2", "RUNX1", "TAL1", "SPI1", "CEBPA", "PAX5", "EBF1",
    "TCF7", "LEF1", "FOXP3", "TBX21", "GATA3", "RORC", "BCL6", "IRF4",
    "PPARG", "NR1H3", "SREBF1", "HNF4A", "FOXA1", "FOXA2", "CDX2", "MSX1",
    "SMAD3", "SMAD4", "E2F1", "E2F3", "RB1", "CDKN1A", "CDKN2A", "BRCA1",
    "ESR1", "ESR2", "AR", "RARA", "RXRA", "VDR", "PPARA", "NR3C1",
];

/// Housekeeping, signalling and disease genes seeding the synthetic gene pool.
pub const SYNTHETIC_BASE_GENES: [&str; 56] = [
    "ACTB", "GAPDH", "TUBB", "RPL13", "RPS18", "HPRT1", "TBP", "GUSB",
    "HMBS", "SDHA", "UBC", "YWHAZ", "B2M", "PPIA", "RPL32", "RPLP0",
    "APOE", "ALB", "INS", "IGF1", "VEGFA", "PDGFA", "TNF", "IL6",
    "IL1B", "IFNG", "IL2", "IL4", "IL10", "TGF1", "EGFR", "ERBB2",
    "MET", "FGFR1", "PDGFRA", "VEGFR1", "KIT", "FLT3", "RET", "ALK",
    "BCL2", "BAX", "TP53", "MDM2", "CDKN1A", "RB1", "E2F1", "MYC",
    "CCND1", "CDK4", "CDK6", "CCNE1", "CDK2", "PCNA", "MCM2", "MCM7",
];

/// Prefixes for generated gene identifiers.
pub const SYNTHETIC_GENE_PREFIXES: [&str; 7] = ["ENSG", "LOC", "FAM", "KIAA", "C1orf", "C2orf", "C3orf"];

pub const SYNTHETIC_EXTRA_GENES: usize = 200;

pub fn tf_list() -> Vec<String> {
    CORRELATION_TFS.iter().map(|s| s.to_string()).collect()
}
