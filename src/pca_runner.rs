// pca_runner.rs

use crate::error::{AnalysisError, Result};
use log::{debug, info};
use nalgebra::DMatrix;
use ndarray::{Array2, Axis};

const EIGEN_EPS: f64 = 1e-12;
const EIGEN_MAX_ITER: usize = 10_000;

/// Per-sample principal component scores.
#[derive(Debug, Clone)]
pub struct PcaEmbedding {
    /// Samples as rows, components as columns.
    pub coordinates: Array2<f64>,
    /// Variance of each component (ddof = 1), descending.
    pub explained_variance: Vec<f64>,
    pub explained_variance_ratio: Vec<f64>,
}

impl PcaEmbedding {
    pub fn num_components(&self) -> usize {
        self.coordinates.ncols()
    }

    pub fn component_names(&self) -> Vec<String> {
        (1..=self.num_components()).map(|i| format!("PC{}", i)).collect()
    }
}

/// Indices of `values` in descending order; equal values keep index order.
fn argsort_desc(values: &[f64]) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[b].total_cmp(&values[a]));
    idx
}

fn to_dmatrix(m: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[[i, j]])
}

/// Projects samples onto their leading principal components.
///
/// `samples` holds one sample per row (features already standardized).
/// The smaller of the sample Gram matrix (n x n) and the feature covariance
/// matrix (p x p) is decomposed; both yield the same scores.
pub fn run_pca(samples: &Array2<f64>, n_components: usize) -> Result<PcaEmbedding> {
    let num_samples = samples.nrows();
    let num_features = samples.ncols();

    if n_components == 0 {
        return Err(AnalysisError::Config(
            "number of components must be > 0".to_string(),
        ));
    }
    if num_samples < 2 {
        return Err(AnalysisError::Shape(format!(
            "PCA requires at least 2 samples, found {}",
            num_samples
        )));
    }
    let max_possible_k = num_samples.min(num_features);
    if n_components > max_possible_k {
        return Err(AnalysisError::Shape(format!(
            "requested {} components but a {} x {} matrix supports at most {}",
            n_components, num_samples, num_features, max_possible_k
        )));
    }

    let means = samples
        .mean_axis(Axis(0))
        .ok_or_else(|| AnalysisError::Shape("empty sample matrix".to_string()))?;
    let centered = samples - &means;
    let denom = (num_samples - 1) as f64;

    let (eigenvalues, scores) = if num_samples <= num_features {
        debug!("PCA via {}x{} sample Gram matrix.", num_samples, num_samples);
        let gram = centered.dot(&centered.t()) / denom;
        let eig = to_dmatrix(&gram)
            .try_symmetric_eigen(EIGEN_EPS, EIGEN_MAX_ITER)
            .ok_or(AnalysisError::EigenNoConvergence(num_samples))?;
        let values: Vec<f64> = eig.eigenvalues.iter().copied().collect();
        let order = argsort_desc(&values);
        let mut scores = Array2::<f64>::zeros((num_samples, n_components));
        let mut kept = Vec::with_capacity(n_components);
        for (k, &i) in order.iter().take(n_components).enumerate() {
            let lambda = values[i].max(0.0);
            let scale = (lambda * denom).sqrt();
            for s in 0..num_samples {
                scores[[s, k]] = eig.eigenvectors[(s, i)] * scale;
            }
            kept.push(lambda);
        }
        (kept, scores)
    } else {
        debug!("PCA via {}x{} feature covariance matrix.", num_features, num_features);
        let cov = centered.t().dot(&centered) / denom;
        let eig = to_dmatrix(&cov)
            .try_symmetric_eigen(EIGEN_EPS, EIGEN_MAX_ITER)
            .ok_or(AnalysisError::EigenNoConvergence(num_features))?;
        let values: Vec<f64> = eig.eigenvalues.iter().copied().collect();
        let order = argsort_desc(&values);
        let mut scores = Array2::<f64>::zeros((num_samples, n_components));
        let mut kept = Vec::with_capacity(n_components);
        for (k, &i) in order.iter().take(n_components).enumerate() {
            for s in 0..num_samples {
                let mut acc = 0.0;
                for f in 0..num_features {
                    acc += centered[[s, f]] * eig.eigenvectors[(f, i)];
                }
                scores[[s, k]] = acc;
            }
            kept.push(values[i].max(0.0));
        }
        (kept, scores)
    };

    let mut coordinates = scores;
    for mut column in coordinates.axis_iter_mut(Axis(1)) {
        // Largest-magnitude score positive, so reruns agree on orientation.
        let pivot = column
            .iter()
            .copied()
            .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
        if pivot < 0.0 {
            column.mapv_inplace(|v| -v);
        }
    }

    let total_variance: f64 = centered
        .axis_iter(Axis(1))
        .map(|col| col.iter().map(|v| v * v).sum::<f64>() / denom)
        .sum();
    let explained_variance_ratio = eigenvalues
        .iter()
        .map(|&v| if total_variance > 0.0 { v / total_variance } else { 0.0 })
        .collect::<Vec<_>>();

    info!(
        "PCA ({} components): explained variance ratio {:?}",
        n_components,
        explained_variance_ratio
            .iter()
            .map(|r| format!("{:.4}", r))
            .collect::<Vec<_>>()
    );

    Ok(PcaEmbedding {
        coordinates,
        explained_variance: eigenvalues,
        explained_variance_ratio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn toy_samples() -> Array2<f64> {
        // 6 samples x 4 features, two obvious groups along the first features.
        array![
            [2.0, 1.9, 0.1, -0.3],
            [2.1, 2.2, -0.2, 0.1],
            [1.8, 2.0, 0.3, 0.2],
            [-2.0, -1.8, 0.0, 0.4],
            [-1.9, -2.2, -0.1, -0.2],
            [-2.0, -2.1, 0.2, -0.1],
        ]
    }

    #[test]
    fn embedding_width_matches_request() {
        for k in [2, 3] {
            let emb = run_pca(&toy_samples(), k).unwrap();
            assert_eq!(emb.coordinates.dim(), (6, k));
            assert_eq!(emb.explained_variance.len(), k);
            assert_eq!(emb.component_names().last().unwrap(), &format!("PC{}", k));
        }
    }

    #[test]
    fn explained_variance_is_descending() {
        let emb = run_pca(&toy_samples(), 3).unwrap();
        let v = &emb.explained_variance;
        assert!(v[0] >= v[1] && v[1] >= v[2]);
        assert!(emb.explained_variance_ratio.iter().sum::<f64>() <= 1.0 + 1e-9);
        assert!(emb.explained_variance_ratio[0] > 0.9);
    }

    #[test]
    fn first_component_separates_groups() {
        let emb = run_pca(&toy_samples(), 2).unwrap();
        let pc1 = emb.coordinates.column(0);
        assert!(pc1.iter().take(3).all(|&v| v * pc1[0] > 0.0));
        assert!(pc1.iter().skip(3).all(|&v| v * pc1[0] < 0.0));
    }

    #[test]
    fn score_variance_matches_eigenvalues_on_both_paths() {
        // 6 x 4 goes through the covariance matrix, 3 x 4 through the Gram matrix.
        let tall = toy_samples();
        let wide = toy_samples().slice(ndarray::s![0..3, ..]).to_owned();
        for samples in [&tall, &wide] {
            let emb = run_pca(samples, 2).unwrap();
            for k in 0..2 {
                let var = emb.coordinates.column(k).var(1.0);
                assert_abs_diff_eq!(var, emb.explained_variance[k], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn deterministic_across_runs() {
        let a = run_pca(&toy_samples(), 3).unwrap();
        let b = run_pca(&toy_samples(), 3).unwrap();
        assert_eq!(a.coordinates, b.coordinates);
    }

    #[test]
    fn rejects_too_many_components() {
        let two_samples = array![[1.0, 2.0, 3.0], [3.0, 2.0, 1.0]];
        assert!(matches!(
            run_pca(&two_samples, 3),
            Err(AnalysisError::Shape(_))
        ));
    }
}
