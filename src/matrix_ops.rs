// matrix_ops.rs

use crate::error::{AnalysisError, Result};
use log::{debug, warn};
use ndarray::{Array2, Axis};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Categorical sample annotation carried by the trailing label column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SampleType {
    Normal,
    Cancer,
}

impl SampleType {
    pub fn from_code(code: i64, sample: &str) -> Result<Self> {
        match code {
            0 => Ok(SampleType::Normal),
            1 => Ok(SampleType::Cancer),
            _ => Err(AnalysisError::InvalidLabel {
                sample: sample.to_string(),
                code,
            }),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            SampleType::Normal => 0,
            SampleType::Cancer => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleType::Normal => "Normal",
            SampleType::Cancer => "Cancer",
        }
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Genes x samples expression values with their identities.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionMatrix {
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
    values: Array2<f64>,
}

impl ExpressionMatrix {
    /// Builds the matrix from gene-major rows, rejecting shapes and values the
    /// downstream statistics cannot handle.
    pub fn from_gene_rows(
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let num_genes = gene_ids.len();
        let num_samples = sample_ids.len();
        if num_genes == 0 {
            return Err(AnalysisError::Shape(
                "expression matrix has no genes".to_string(),
            ));
        }
        if num_samples == 0 {
            return Err(AnalysisError::Shape(
                "expression matrix has no samples".to_string(),
            ));
        }
        if rows.len() != num_genes {
            return Err(AnalysisError::Shape(format!(
                "{} gene identifiers but {} value rows",
                num_genes,
                rows.len()
            )));
        }

        let mut seen = HashSet::with_capacity(num_genes);
        for gene in &gene_ids {
            if !seen.insert(gene.as_str()) {
                return Err(AnalysisError::DuplicateGene(gene.clone()));
            }
        }

        let mut values = Array2::<f64>::zeros((num_genes, num_samples));
        for (gene_idx, row) in rows.iter().enumerate() {
            if row.len() != num_samples {
                return Err(AnalysisError::Shape(format!(
                    "value count mismatch for gene '{}': expected {}, found {}",
                    gene_ids[gene_idx],
                    num_samples,
                    row.len()
                )));
            }
            for (sample_idx, &value) in row.iter().enumerate() {
                if !value.is_finite() || value < 0.0 {
                    return Err(AnalysisError::NegativeValue {
                        gene: gene_ids[gene_idx].clone(),
                        sample: sample_ids[sample_idx].clone(),
                        value,
                    });
                }
                values[[gene_idx, sample_idx]] = value;
            }
        }

        Ok(Self {
            gene_ids,
            sample_ids,
            values,
        })
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Genes as rows, samples as columns.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    pub fn num_genes(&self) -> usize {
        self.gene_ids.len()
    }

    pub fn num_samples(&self) -> usize {
        self.sample_ids.len()
    }
}

/// Per-gene z-scores across samples.
#[derive(Debug, Clone)]
pub struct Standardized {
    /// Genes as rows, samples as columns. Zero-variance genes are all zeros.
    pub values: Array2<f64>,
    /// Indices of genes whose variance across samples is zero.
    pub zero_variance: Vec<usize>,
}

impl Standardized {
    /// Samples as rows, genes as columns: the point cloud for PCA and k-means.
    pub fn samples_by_genes(&self) -> Array2<f64> {
        self.values.t().to_owned()
    }
}

/// Centres each gene on its mean and scales it by its population standard
/// deviation (ddof = 0).
pub fn standardize(matrix: &ExpressionMatrix) -> Result<Standardized> {
    let values = matrix.values();
    let mut standardized = values.clone();
    let mut zero_variance = Vec::new();

    for (gene_idx, mut row) in standardized.axis_iter_mut(Axis(0)).enumerate() {
        let mean = row.mean().unwrap_or(0.0);
        let std_dev = row.std(0.0);
        let scale = mean.abs().max(f64::MIN_POSITIVE);
        if std_dev <= f64::EPSILON * scale {
            debug!(
                "Gene '{}' has zero variance across samples.",
                matrix.gene_ids()[gene_idx]
            );
            row.fill(0.0);
            zero_variance.push(gene_idx);
        } else {
            row.mapv_inplace(|v| (v - mean) / std_dev);
        }
    }

    if zero_variance.len() == matrix.num_genes() {
        return Err(AnalysisError::AllZeroVariance(matrix.num_genes()));
    }
    if !zero_variance.is_empty() {
        warn!(
            "{} of {} genes have zero variance across samples and were left at 0 after scaling (first: '{}').",
            zero_variance.len(),
            matrix.num_genes(),
            matrix.gene_ids()[zero_variance[0]]
        );
    }

    Ok(Standardized {
        values: standardized,
        zero_variance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn sample_type_codes() {
        assert_eq!(SampleType::from_code(0, "s").unwrap(), SampleType::Normal);
        assert_eq!(SampleType::from_code(1, "s").unwrap(), SampleType::Cancer);
        assert!(matches!(
            SampleType::from_code(2, "s"),
            Err(AnalysisError::InvalidLabel { code: 2, .. })
        ));
    }

    #[test]
    fn rejects_duplicate_genes() {
        let err = ExpressionMatrix::from_gene_rows(
            vec!["TP53".into(), "TP53".into()],
            ids("s", 2),
            vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        )
        .unwrap_err();
        assert!(matches!(err, AnalysisError::DuplicateGene(g) if g == "TP53"));
    }

    #[test]
    fn rejects_negative_values_and_ragged_rows() {
        assert!(matches!(
            ExpressionMatrix::from_gene_rows(ids("g", 1), ids("s", 2), vec![vec![1.0, -0.5]]),
            Err(AnalysisError::NegativeValue { .. })
        ));
        assert!(matches!(
            ExpressionMatrix::from_gene_rows(ids("g", 1), ids("s", 3), vec![vec![1.0, 2.0]]),
            Err(AnalysisError::Shape(_))
        ));
        assert!(matches!(
            ExpressionMatrix::from_gene_rows(vec![], ids("s", 3), vec![]),
            Err(AnalysisError::Shape(_))
        ));
    }

    #[test]
    fn standardized_genes_have_zero_mean_unit_sd() {
        let matrix = ExpressionMatrix::from_gene_rows(
            ids("g", 3),
            ids("s", 5),
            vec![
                vec![1.0, 2.0, 3.0, 4.0, 10.0],
                vec![0.0, 0.0, 5.0, 5.0, 1.0],
                vec![100.0, 80.0, 60.0, 90.0, 70.0],
            ],
        )
        .unwrap();
        let z = standardize(&matrix).unwrap();
        assert!(z.zero_variance.is_empty());
        for row in z.values.axis_iter(Axis(0)) {
            assert_abs_diff_eq!(row.mean().unwrap(), 0.0, epsilon = 1e-12);
            assert_abs_diff_eq!(row.std(0.0), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn zero_variance_genes_are_flagged_not_nan() {
        let matrix = ExpressionMatrix::from_gene_rows(
            ids("g", 2),
            ids("s", 4),
            vec![vec![7.0, 7.0, 7.0, 7.0], vec![1.0, 2.0, 3.0, 4.0]],
        )
        .unwrap();
        let z = standardize(&matrix).unwrap();
        assert_eq!(z.zero_variance, vec![0]);
        assert!(z.values.row(0).iter().all(|&v| v == 0.0));
        assert!(z.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn tiny_but_varying_genes_are_standardized() {
        let matrix = ExpressionMatrix::from_gene_rows(
            ids("g", 2),
            ids("s", 4),
            vec![vec![1e-16, 2e-16, 3e-16, 4e-16], vec![0.0, 0.0, 0.0, 0.0]],
        )
        .unwrap();
        let z = standardize(&matrix).unwrap();
        assert_eq!(z.zero_variance, vec![1]);
        assert_abs_diff_eq!(z.values.row(0).std(0.0), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn all_zero_variance_is_fatal() {
        let matrix =
            ExpressionMatrix::from_gene_rows(ids("g", 1), ids("s", 3), vec![vec![2.0, 2.0, 2.0]])
                .unwrap();
        assert!(matches!(
            standardize(&matrix),
            Err(AnalysisError::AllZeroVariance(1))
        ));
    }
}
