// error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions raised by the analysis library.
///
/// Per-gene degenerate statistics are not errors; they travel inside the
/// results (see `diffexpr::TTestOutcome` and `matrix_ops::Standardized`).
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Failed to read input table {}: {source}", path.display())]
    InputRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Parse error at data row {row}, column '{column}': cannot read '{value}' as {expected}.")]
    Parse {
        row: usize,
        column: String,
        value: String,
        expected: &'static str,
    },

    #[error("Input shape error: {0}")]
    Shape(String),

    #[error("Duplicate gene identifier '{0}' in expression matrix.")]
    DuplicateGene(String),

    #[error("Negative expression value {value} for gene '{gene}' in sample '{sample}'.")]
    NegativeValue {
        gene: String,
        sample: String,
        value: f64,
    },

    #[error("Invalid sample-type code {code} for sample '{sample}' (expected 0 = normal or 1 = cancer).")]
    InvalidLabel { sample: String, code: i64 },

    #[error("Group '{group}' has {size} sample(s); the two-sample t-test needs at least 2 per group.")]
    GroupTooSmall { group: &'static str, size: usize },

    #[error("All {0} genes have zero variance across samples; nothing to standardize.")]
    AllZeroVariance(usize),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Eigendecomposition did not converge for a {0}x{0} matrix.")]
    EigenNoConvergence(usize),
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
