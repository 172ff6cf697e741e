// cluster.rs

use crate::error::{AnalysisError, Result};
use crate::matrix_ops::SampleType;
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView1, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq)]
pub struct KMeansConfig {
    pub n_clusters: usize,
    pub max_iter: usize,
    pub n_init: usize,
    /// Relative to the mean per-dimension variance of the data.
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            n_clusters: 2,
            max_iter: 300,
            n_init: 10,
            tolerance: 1e-4,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KMeansResult {
    /// Cluster id per point, aligned with the input rows.
    pub labels: Vec<usize>,
    pub centroids: Array2<f64>,
    pub inertia: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl KMeansResult {
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.centroids.nrows()];
        for &label in &self.labels {
            sizes[label] += 1;
        }
        sizes
    }
}

fn sq_dist(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// k-means++ seeding: first centre uniformly, the rest proportional to the
/// squared distance to the nearest chosen centre.
fn init_plus_plus(points: &Array2<f64>, k: usize, rng: &mut ChaCha8Rng) -> Array2<f64> {
    let n = points.nrows();
    let mut centroids = Array2::<f64>::zeros((k, points.ncols()));
    let first = rng.random_range(0..n);
    centroids.row_mut(0).assign(&points.row(first));

    let mut nearest: Vec<f64> = (0..n)
        .map(|i| sq_dist(points.row(i), centroids.row(0)))
        .collect();
    for c in 1..k {
        let total: f64 = nearest.iter().sum();
        let chosen = if total <= 0.0 {
            // Every point coincides with a centre already.
            c % n
        } else {
            let threshold = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            let mut pick = n - 1;
            for (i, d) in nearest.iter().enumerate() {
                cumulative += d;
                if cumulative >= threshold && *d > 0.0 {
                    pick = i;
                    break;
                }
            }
            pick
        };
        centroids.row_mut(c).assign(&points.row(chosen));
        for (i, d) in nearest.iter_mut().enumerate() {
            *d = d.min(sq_dist(points.row(i), centroids.row(c)));
        }
    }
    centroids
}

fn assign(points: &Array2<f64>, centroids: &Array2<f64>, labels: &mut [usize]) -> f64 {
    let mut inertia = 0.0;
    for (i, point) in points.axis_iter(Axis(0)).enumerate() {
        let mut best = 0;
        let mut best_d = f64::INFINITY;
        for (c, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
            let d = sq_dist(point, centroid);
            if d < best_d {
                best_d = d;
                best = c;
            }
        }
        labels[i] = best;
        inertia += best_d;
    }
    inertia
}

/// Recomputes centroids as cluster means. An empty cluster takes the point
/// farthest from its current centroid.
fn update_centroids(points: &Array2<f64>, labels: &mut [usize], k: usize) -> Array2<f64> {
    let dim = points.ncols();
    loop {
        let mut sums = Array2::<f64>::zeros((k, dim));
        let mut counts = vec![0usize; k];
        for (i, &label) in labels.iter().enumerate() {
            let mut row = sums.row_mut(label);
            row += &points.row(i);
            counts[label] += 1;
        }
        for (c, &count) in counts.iter().enumerate() {
            if count > 0 {
                sums.row_mut(c).mapv_inplace(|v| v / count as f64);
            }
        }

        let Some(empty) = counts.iter().position(|&c| c == 0) else {
            return sums;
        };
        let donor = (0..points.nrows())
            .filter(|&i| counts[labels[i]] > 1)
            .max_by(|&a, &b| {
                let da = sq_dist(points.row(a), sums.row(labels[a]));
                let db = sq_dist(points.row(b), sums.row(labels[b]));
                da.total_cmp(&db).then(b.cmp(&a))
            });
        match donor {
            Some(i) => {
                debug!("Re-seeding empty cluster {} with point {}.", empty, i);
                labels[i] = empty;
            }
            // Fewer points than clusters; callers rule this out.
            None => return sums,
        }
    }
}

fn single_run(
    points: &Array2<f64>,
    config: &KMeansConfig,
    shift_threshold: f64,
    rng: &mut ChaCha8Rng,
) -> KMeansResult {
    let n = points.nrows();
    let k = config.n_clusters;
    let mut centroids = init_plus_plus(points, k, rng);
    let mut labels = vec![0usize; n];
    let mut inertia = assign(points, &centroids, &mut labels);
    let mut converged = false;
    let mut iterations = 0;

    for iter in 1..=config.max_iter {
        iterations = iter;
        let previous = labels.clone();
        let updated = update_centroids(points, &mut labels, k);
        let shift: f64 = updated
            .axis_iter(Axis(0))
            .zip(centroids.axis_iter(Axis(0)))
            .map(|(a, b)| sq_dist(a, b))
            .sum();
        centroids = updated;
        inertia = assign(points, &centroids, &mut labels);
        if labels == previous || shift <= shift_threshold {
            converged = true;
            break;
        }
    }

    // The final assignment may have emptied a cluster; repair and re-score.
    let counts = labels.iter().fold(vec![0usize; k], |mut acc, &l| {
        acc[l] += 1;
        acc
    });
    if counts.iter().any(|&c| c == 0) {
        centroids = update_centroids(points, &mut labels, k);
        inertia = labels
            .iter()
            .enumerate()
            .map(|(i, &l)| sq_dist(points.row(i), centroids.row(l)))
            .sum();
    }

    KMeansResult {
        labels,
        centroids,
        inertia,
        iterations,
        converged,
    }
}

/// Lloyd's k-means over the rows of `points`, restarted `n_init` times from
/// a seeded ChaCha stream; the run with the lowest inertia wins.
pub fn kmeans(points: &Array2<f64>, config: &KMeansConfig) -> Result<KMeansResult> {
    let n = points.nrows();
    let k = config.n_clusters;
    if n == 0 || points.ncols() == 0 {
        return Err(AnalysisError::Shape("k-means needs a non-empty matrix".to_string()));
    }
    if k == 0 || k > n {
        return Err(AnalysisError::Config(format!(
            "cluster_count must be between 1 and the number of samples ({}), got {}",
            n, k
        )));
    }

    let mean_var = points
        .var_axis(Axis(0), 0.0)
        .mean()
        .unwrap_or(0.0);
    let shift_threshold = config.tolerance * mean_var;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut best: Option<KMeansResult> = None;
    for run in 0..config.n_init.max(1) {
        let result = single_run(points, config, shift_threshold, &mut rng);
        debug!(
            "k-means run {}: inertia {:.6}, {} iterations, converged = {}",
            run, result.inertia, result.iterations, result.converged
        );
        let better = best
            .as_ref()
            .map_or(true, |b| result.inertia < b.inertia);
        if better {
            best = Some(result);
        }
    }
    let best = best.ok_or_else(|| AnalysisError::Config("kmeans_n_init must be > 0".to_string()))?;

    if !best.converged {
        warn!(
            "k-means did not converge within {} iterations; keeping the last assignment.",
            config.max_iter
        );
    }
    info!(
        "k-means (k={}, seed={}): cluster sizes {:?}, inertia {:.4}",
        k,
        config.seed,
        best.cluster_sizes(),
        best.inertia
    );
    Ok(best)
}

/// Cluster x sample-type counts. Column 0 counts normal samples, column 1 cancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Concordance {
    pub counts: Vec<[usize; 2]>,
}

pub fn concordance(labels: &[usize], n_clusters: usize, sample_types: &[SampleType]) -> Concordance {
    let mut counts = vec![[0usize; 2]; n_clusters];
    for (&cluster, sample_type) in labels.iter().zip(sample_types) {
        let col = match sample_type {
            SampleType::Normal => 0,
            SampleType::Cancer => 1,
        };
        counts[cluster][col] += 1;
    }
    Concordance { counts }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_blobs() -> Array2<f64> {
        array![
            [0.0, 0.0],
            [0.1, 0.1],
            [0.2, 0.0],
            [10.0, 10.0],
            [10.1, 10.1],
            [10.2, 10.0],
        ]
    }

    #[test]
    fn separates_two_blobs() {
        let result = kmeans(&two_blobs(), &KMeansConfig::default()).unwrap();
        assert_eq!(result.labels.len(), 6);
        assert_eq!(result.labels[0], result.labels[1]);
        assert_eq!(result.labels[1], result.labels[2]);
        assert_eq!(result.labels[3], result.labels[4]);
        assert_eq!(result.labels[4], result.labels[5]);
        assert_ne!(result.labels[0], result.labels[3]);
        assert!(result.converged);
        assert_eq!(result.cluster_sizes(), vec![3, 3]);
    }

    #[test]
    fn same_seed_same_labels() {
        let config = KMeansConfig {
            seed: 7,
            ..Default::default()
        };
        let a = kmeans(&two_blobs(), &config).unwrap();
        let b = kmeans(&two_blobs(), &config).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.inertia, b.inertia);
    }

    #[test]
    fn identical_points_still_fill_every_cluster() {
        let points = Array2::<f64>::from_elem((5, 3), 1.5);
        let result = kmeans(&points, &KMeansConfig::default()).unwrap();
        let sizes = result.cluster_sizes();
        assert_eq!(sizes.len(), 2);
        assert!(sizes.iter().all(|&s| s > 0));
        assert_eq!(sizes.iter().sum::<usize>(), 5);
    }

    #[test]
    fn rejects_more_clusters_than_points() {
        let config = KMeansConfig {
            n_clusters: 7,
            ..Default::default()
        };
        assert!(matches!(
            kmeans(&two_blobs(), &config),
            Err(AnalysisError::Config(_))
        ));
    }

    #[test]
    fn concordance_counts_by_type() {
        let types = vec![
            SampleType::Cancer,
            SampleType::Cancer,
            SampleType::Normal,
            SampleType::Normal,
        ];
        let table = concordance(&[1, 1, 0, 1], 2, &types);
        assert_eq!(table.counts, vec![[1, 0], [1, 2]]);
    }
}
