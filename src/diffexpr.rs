// diffexpr.rs

use crate::config::GroupingPolicy;
use crate::error::{AnalysisError, Result};
use crate::matrix_ops::{ExpressionMatrix, SampleType};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Genes processed between progress bar refreshes.
const PROGRESS_CHUNK: usize = 1_000;

/// How far a positional split disagrees with the label column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GroupingAudit {
    /// Samples whose group contradicts their label (A is expected to be Cancer).
    pub label_disagreements: usize,
    pub samples: usize,
}

/// Sample indices of the two groups compared by the differential test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupPartition {
    pub policy: GroupingPolicy,
    pub group_a: Vec<usize>,
    pub group_b: Vec<usize>,
    pub audit: GroupingAudit,
}

/// Splits samples according to `policy`. Both groups need at least two
/// samples for the t-test to be defined.
pub fn partition_samples(
    sample_types: &[SampleType],
    policy: GroupingPolicy,
    group_sizes: Option<[usize; 2]>,
) -> Result<GroupPartition> {
    let n = sample_types.len();
    let (group_a, group_b): (Vec<usize>, Vec<usize>) = match policy {
        GroupingPolicy::PositionalHalves => {
            let split = match group_sizes {
                Some([a, b]) => {
                    if a + b != n {
                        return Err(AnalysisError::Shape(format!(
                            "group sizes {} + {} do not add up to the {} samples",
                            a, b, n
                        )));
                    }
                    a
                }
                None => n / 2,
            };
            ((0..split).collect(), (split..n).collect())
        }
        GroupingPolicy::ByLabel => (0..n).partition(|&i| sample_types[i] == SampleType::Cancer),
    };

    if group_a.len() < 2 {
        return Err(AnalysisError::GroupTooSmall {
            group: "A",
            size: group_a.len(),
        });
    }
    if group_b.len() < 2 {
        return Err(AnalysisError::GroupTooSmall {
            group: "B",
            size: group_b.len(),
        });
    }

    let label_disagreements = group_a
        .iter()
        .filter(|&&i| sample_types[i] != SampleType::Cancer)
        .count()
        + group_b
            .iter()
            .filter(|&&i| sample_types[i] != SampleType::Normal)
            .count();
    let audit = GroupingAudit {
        label_disagreements,
        samples: n,
    };
    if label_disagreements > 0 {
        warn!(
            "Grouping {:?} disagrees with the sample-type labels for {} of {} samples (group A is treated as cancer).",
            policy, label_disagreements, n
        );
    }
    info!(
        "Differential groups ({:?}): A = {} samples, B = {} samples.",
        policy,
        group_a.len(),
        group_b.len()
    );

    Ok(GroupPartition {
        policy,
        group_a,
        group_b,
        audit,
    })
}

/// Result of the pooled-variance two-sample t-test for one gene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TTestOutcome {
    Tested { t_statistic: f64, p_value: f64 },
    /// Zero pooled variance: the statistic is undefined.
    Degenerate,
}

impl TTestOutcome {
    pub fn p_value(&self) -> Option<f64> {
        match self {
            TTestOutcome::Tested { p_value, .. } => Some(*p_value),
            TTestOutcome::Degenerate => None,
        }
    }

    pub fn t_statistic(&self) -> Option<f64> {
        match self {
            TTestOutcome::Tested { t_statistic, .. } => Some(*t_statistic),
            TTestOutcome::Degenerate => None,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        matches!(self, TTestOutcome::Degenerate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneStatistic {
    pub gene: String,
    /// Row of the gene in the expression matrix.
    pub gene_index: usize,
    pub mean_a: f64,
    pub mean_b: f64,
    pub log2_fc: f64,
    pub test: TTestOutcome,
}

impl GeneStatistic {
    /// Ranking key.
    pub fn abs_log2_fc(&self) -> f64 {
        self.log2_fc.abs()
    }
}

/// `log2(mean_a + 1) - log2(mean_b + 1)`.
pub fn log2_fold_change(mean_a: f64, mean_b: f64) -> f64 {
    (mean_a + 1.0).log2() - (mean_b + 1.0).log2()
}

fn mean_and_var(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>();
    (mean, ss / (n - 1.0))
}

/// Two-sided independent two-sample t-test assuming equal variances.
/// Both slices must hold at least two values.
pub fn two_sample_t_test(a: &[f64], b: &[f64]) -> TTestOutcome {
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let (mean_a, var_a) = mean_and_var(a);
    let (mean_b, var_b) = mean_and_var(b);
    let df = na + nb - 2.0;
    let pooled = ((na - 1.0) * var_a + (nb - 1.0) * var_b) / df;

    let scale = mean_a.abs().max(mean_b.abs()).max(f64::MIN_POSITIVE);
    if !pooled.is_finite() || pooled.sqrt() <= f64::EPSILON * scale {
        return TTestOutcome::Degenerate;
    }

    let t_statistic = (mean_a - mean_b) / (pooled * (1.0 / na + 1.0 / nb)).sqrt();
    let p_value = match StudentsT::new(0.0, 1.0, df) {
        Ok(dist) => (2.0 * dist.sf(t_statistic.abs())).clamp(0.0, 1.0),
        Err(_) => return TTestOutcome::Degenerate,
    };
    TTestOutcome::Tested {
        t_statistic,
        p_value,
    }
}

/// Fold change and t-test for every gene, in matrix order.
pub fn differential_expression(
    matrix: &ExpressionMatrix,
    partition: &GroupPartition,
) -> Vec<GeneStatistic> {
    let values = matrix.values();
    let num_genes = matrix.num_genes();

    let pb = ProgressBar::new(num_genes as u64);
    match ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} genes ({percent}%)")
    {
        Ok(style) => pb.set_style(style.progress_chars("=> ")),
        Err(e) => debug!("Progress bar style rejected: {}", e),
    }

    let mut group_a = Vec::with_capacity(partition.group_a.len());
    let mut group_b = Vec::with_capacity(partition.group_b.len());
    let mut stats = Vec::with_capacity(num_genes);
    for (gene_index, gene) in matrix.gene_ids().iter().enumerate() {
        let row = values.row(gene_index);
        group_a.clear();
        group_a.extend(partition.group_a.iter().map(|&s| row[s]));
        group_b.clear();
        group_b.extend(partition.group_b.iter().map(|&s| row[s]));

        let mean_a = group_a.iter().sum::<f64>() / group_a.len() as f64;
        let mean_b = group_b.iter().sum::<f64>() / group_b.len() as f64;
        let test = two_sample_t_test(&group_a, &group_b);
        if test.is_degenerate() {
            debug!("Gene '{}': zero pooled variance, t-test undefined.", gene);
        }
        stats.push(GeneStatistic {
            gene: gene.clone(),
            gene_index,
            mean_a,
            mean_b,
            log2_fc: log2_fold_change(mean_a, mean_b),
            test,
        });
        if (gene_index + 1) % PROGRESS_CHUNK == 0 {
            pb.set_position((gene_index + 1) as u64);
        }
    }
    pb.finish_and_clear();

    let degenerate = stats.iter().filter(|s| s.test.is_degenerate()).count();
    if degenerate > 0 {
        warn!(
            "{} of {} genes have zero variance within both groups; their t-test is reported as degenerate.",
            degenerate, num_genes
        );
    }
    info!("Computed fold changes and t-tests for {} genes.", num_genes);
    stats
}

/// Orders genes by descending |log2FC|; equal keys keep matrix order.
pub fn rank_genes(mut stats: Vec<GeneStatistic>) -> Vec<GeneStatistic> {
    stats.sort_by(|x, y| {
        y.abs_log2_fc()
            .total_cmp(&x.abs_log2_fc())
            .then(x.gene_index.cmp(&y.gene_index))
    });
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn types(codes: &[i64]) -> Vec<SampleType> {
        codes
            .iter()
            .map(|&c| SampleType::from_code(c, "s").unwrap())
            .collect()
    }

    fn stat(gene: &str, gene_index: usize, log2_fc: f64) -> GeneStatistic {
        GeneStatistic {
            gene: gene.to_string(),
            gene_index,
            mean_a: 0.0,
            mean_b: 0.0,
            log2_fc,
            test: TTestOutcome::Degenerate,
        }
    }

    #[test]
    fn positional_halves_use_floor() {
        let p = partition_samples(&types(&[1, 1, 0, 0, 0]), GroupingPolicy::PositionalHalves, None)
            .unwrap();
        assert_eq!(p.group_a, vec![0, 1]);
        assert_eq!(p.group_b, vec![2, 3, 4]);
        assert_eq!(p.audit.label_disagreements, 0);
    }

    #[test]
    fn explicit_group_sizes_must_cover_all_samples() {
        let labels = types(&[1, 1, 1, 0, 0, 0]);
        let p = partition_samples(&labels, GroupingPolicy::PositionalHalves, Some([4, 2])).unwrap();
        assert_eq!(p.group_a.len(), 4);
        assert_eq!(p.audit.label_disagreements, 1);
        assert!(matches!(
            partition_samples(&labels, GroupingPolicy::PositionalHalves, Some([3, 2])),
            Err(AnalysisError::Shape(_))
        ));
    }

    #[test]
    fn label_grouping_follows_labels() {
        let p = partition_samples(&types(&[0, 1, 0, 1, 1]), GroupingPolicy::ByLabel, None).unwrap();
        assert_eq!(p.group_a, vec![1, 3, 4]);
        assert_eq!(p.group_b, vec![0, 2]);
        assert_eq!(p.audit.label_disagreements, 0);
    }

    #[test]
    fn positional_audit_flags_label_mismatch() {
        let p = partition_samples(&types(&[0, 0, 1, 1]), GroupingPolicy::PositionalHalves, None)
            .unwrap();
        assert_eq!(p.audit.label_disagreements, 4);
    }

    #[test]
    fn groups_smaller_than_two_are_rejected() {
        assert!(matches!(
            partition_samples(&types(&[1, 0, 0]), GroupingPolicy::PositionalHalves, None),
            Err(AnalysisError::GroupTooSmall { group: "A", size: 1 })
        ));
        assert!(matches!(
            partition_samples(&types(&[1, 0, 0, 0]), GroupingPolicy::ByLabel, None),
            Err(AnalysisError::GroupTooSmall { group: "A", .. })
        ));
    }

    #[test]
    fn fold_change_is_antisymmetric() {
        for (a, b) in [(10.0, 1.0), (0.0, 3.5), (7.25, 7.25), (1000.0, 0.1)] {
            assert_abs_diff_eq!(log2_fold_change(a, b), -log2_fold_change(b, a), epsilon = 1e-12);
        }
        assert_abs_diff_eq!(log2_fold_change(10.0, 0.0), 11f64.log2(), epsilon = 1e-12);
    }

    #[test]
    fn t_test_matches_reference_values() {
        // scipy.stats.ttest_ind([1, 2, 3, 4], [3, 4, 5, 6]) -> t = -2.1909, p = 0.07099
        match two_sample_t_test(&[1.0, 2.0, 3.0, 4.0], &[3.0, 4.0, 5.0, 6.0]) {
            TTestOutcome::Tested {
                t_statistic,
                p_value,
            } => {
                assert_abs_diff_eq!(t_statistic, -2.1908902300206643, epsilon = 1e-9);
                assert_abs_diff_eq!(p_value, 0.0709877, epsilon = 1e-6);
            }
            TTestOutcome::Degenerate => panic!("expected a tested outcome"),
        }
    }

    #[test]
    fn identical_groups_give_p_one() {
        let outcome = two_sample_t_test(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert_eq!(outcome.t_statistic(), Some(0.0));
        assert_abs_diff_eq!(outcome.p_value().unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn zero_variance_in_both_groups_is_degenerate() {
        assert!(two_sample_t_test(&[10.0, 10.0, 10.0], &[1.0, 1.0, 1.0]).is_degenerate());
        assert!(two_sample_t_test(&[0.1, 0.1], &[0.1, 0.1, 0.1]).is_degenerate());
        assert!(!two_sample_t_test(&[10.0, 10.0, 10.0], &[1.0, 2.0, 1.0]).is_degenerate());
    }

    #[test]
    fn tiny_magnitudes_are_still_tested() {
        let a = [1e-16, 2e-16, 3e-16, 4e-16];
        let b = [3e-16, 4e-16, 5e-16, 6e-16];
        let outcome = two_sample_t_test(&a, &b);
        assert!(!outcome.is_degenerate());
        assert_abs_diff_eq!(outcome.t_statistic().unwrap(), -2.1908902300206643, epsilon = 1e-9);
    }

    #[test]
    fn ranking_is_stable_on_ties() {
        let ranked = rank_genes(vec![
            stat("g0", 0, 0.5),
            stat("g1", 1, -2.0),
            stat("g2", 2, 2.0),
            stat("g3", 3, 0.0),
            stat("g4", 4, -0.5),
        ]);
        let order: Vec<&str> = ranked.iter().map(|s| s.gene.as_str()).collect();
        assert_eq!(order, vec!["g1", "g2", "g0", "g4", "g3"]);
    }

    #[test]
    fn ranking_is_deterministic() {
        let input = vec![
            stat("a", 0, 1.0),
            stat("b", 1, -1.0),
            stat("c", 2, 1.0),
            stat("d", 3, 3.0),
        ];
        assert_eq!(rank_genes(input.clone()), rank_genes(input));
    }

    #[test]
    fn end_to_end_fold_change_ranking() {
        let matrix = ExpressionMatrix::from_gene_rows(
            vec!["FLAT".into(), "UP_TO_ONE".into(), "NOISE".into(), "UP_TO_ZERO".into()],
            (1..=6).map(|i| format!("s{}", i)).collect(),
            vec![
                vec![5.0, 6.0, 7.0, 7.0, 6.0, 5.0],
                vec![10.0, 10.0, 10.0, 1.0, 1.0, 1.0],
                vec![2.0, 3.0, 4.0, 3.0, 2.0, 4.5],
                vec![10.0, 10.0, 10.0, 0.0, 0.0, 0.0],
            ],
        )
        .unwrap();
        let partition = partition_samples(
            &types(&[1, 1, 1, 0, 0, 0]),
            GroupingPolicy::PositionalHalves,
            Some([3, 3]),
        )
        .unwrap();
        let stats = differential_expression(&matrix, &partition);
        assert_abs_diff_eq!(stats[0].log2_fc, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats[1].log2_fc, (11.0f64 / 2.0).log2(), epsilon = 1e-12);
        assert!(stats[3].log2_fc > 3.0);
        assert!(stats[1].test.is_degenerate());

        let ranked = rank_genes(stats);
        let order: Vec<&str> = ranked.iter().map(|s| s.gene.as_str()).collect();
        assert_eq!(order[0], "UP_TO_ZERO");
        assert_eq!(order[1], "UP_TO_ONE");
        assert_eq!(order[3], "FLAT");
    }
}
