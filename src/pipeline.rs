// pipeline.rs

use crate::cluster::{self, Concordance, KMeansConfig, KMeansResult};
use crate::config::AnalysisConfig;
use crate::diffexpr::{self, GeneStatistic, GroupPartition};
use crate::error::Result;
use crate::interactive;
use crate::matrix_ops::{self, SampleType, Standardized};
use crate::output_writer::{self, AnalysisSummary};
use crate::pca_runner::{self, PcaEmbedding};
use crate::plots;
use crate::table::{self, ExpressionData, LoadStats};
use anyhow::anyhow;
use log::info;
use std::path::PathBuf;

/// Everything computed by one run, before anything touches the disk.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub data: ExpressionData,
    pub load_stats: LoadStats,
    pub partition: GroupPartition,
    pub standardized: Standardized,
    /// One embedding per requested component count, ascending.
    pub embeddings: Vec<PcaEmbedding>,
    /// All genes, rank order.
    pub ranked: Vec<GeneStatistic>,
    pub top_n: usize,
    pub clustering: KMeansResult,
    pub concordance: Concordance,
}

impl AnalysisOutcome {
    pub fn top_genes(&self) -> &[GeneStatistic] {
        &self.ranked[..self.top_n.min(self.ranked.len())]
    }

    pub fn embedding(&self, n_components: usize) -> Option<&PcaEmbedding> {
        self.embeddings
            .iter()
            .find(|e| e.num_components() == n_components)
    }

    /// Smallest embedding with at least `n_components` columns.
    fn embedding_at_least(&self, n_components: usize) -> Option<&PcaEmbedding> {
        self.embeddings
            .iter()
            .find(|e| e.num_components() >= n_components)
    }

    pub fn degenerate_genes(&self) -> Vec<String> {
        // Reported in matrix order.
        let mut genes: Vec<&GeneStatistic> =
            self.ranked.iter().filter(|s| s.test.is_degenerate()).collect();
        genes.sort_by_key(|s| s.gene_index);
        genes.into_iter().map(|s| s.gene.clone()).collect()
    }
}

/// Load, clean, standardize, reduce, test, rank and cluster. Any input
/// problem fails here, before a single output file exists.
pub fn run_analysis(config: &AnalysisConfig) -> Result<AnalysisOutcome> {
    config.validate()?;

    // --- 1. Load & clean ---
    info!("Loading expression table from {}", config.input_path.display());
    let (data, load_stats) =
        table::load_expression(&config.input_path, config.delimiter, config.table_layout)?;

    // --- 2. Group assignment ---
    let partition =
        diffexpr::partition_samples(&data.sample_types, config.grouping, config.group_sizes)?;

    // --- 3. Standardize ---
    let standardized = matrix_ops::standardize(&data.matrix)?;
    let samples = standardized.samples_by_genes();

    // --- 4. PCA ---
    let embeddings = config
        .component_counts()
        .into_iter()
        .map(|k| pca_runner::run_pca(&samples, k))
        .collect::<Result<Vec<_>>>()?;

    // --- 5. Differential expression & ranking ---
    let stats = diffexpr::differential_expression(&data.matrix, &partition);
    let ranked = diffexpr::rank_genes(stats);
    let top_n = config.top_n.min(ranked.len());
    info!(
        "Top genes by |log2FC|: {:?}",
        ranked
            .iter()
            .take(top_n.min(5))
            .map(|s| format!("{} ({:+.3})", s.gene, s.log2_fc))
            .collect::<Vec<_>>()
    );

    // --- 6. Clustering ---
    let kmeans_config = KMeansConfig {
        n_clusters: config.cluster_count,
        max_iter: config.kmeans_max_iter,
        n_init: config.kmeans_n_init,
        tolerance: config.kmeans_tolerance,
        seed: config.random_seed,
    };
    let clustering = cluster::kmeans(&samples, &kmeans_config)?;
    let concordance =
        cluster::concordance(&clustering.labels, config.cluster_count, &data.sample_types);
    for (cluster_id, [normal, cancer]) in concordance.counts.iter().enumerate() {
        info!(
            "Cluster {}: {} normal, {} cancer samples.",
            cluster_id, normal, cancer
        );
    }

    Ok(AnalysisOutcome {
        data,
        load_stats,
        partition,
        standardized,
        embeddings,
        ranked,
        top_n,
        clustering,
        concordance,
    })
}

fn build_summary(
    config: &AnalysisConfig,
    outcome: &AnalysisOutcome,
    artifacts: &[PathBuf],
) -> AnalysisSummary {
    let matrix = &outcome.data.matrix;
    let cancer_samples = outcome
        .data
        .sample_types
        .iter()
        .filter(|&&t| t == SampleType::Cancer)
        .count();
    let largest = outcome.embeddings.last();
    AnalysisSummary {
        input_path: config.input_path.display().to_string(),
        raw_rows: outcome.load_stats.raw_rows,
        dropped_rows: outcome.load_stats.dropped_rows,
        genes: matrix.num_genes(),
        samples: matrix.num_samples(),
        cancer_samples,
        normal_samples: matrix.num_samples() - cancer_samples,
        grouping: outcome.partition.policy,
        group_a_size: outcome.partition.group_a.len(),
        group_b_size: outcome.partition.group_b.len(),
        label_disagreements: outcome.partition.audit.label_disagreements,
        zero_variance_genes: outcome
            .standardized
            .zero_variance
            .iter()
            .map(|&i| matrix.gene_ids()[i].clone())
            .collect(),
        degenerate_genes: outcome.degenerate_genes(),
        explained_variance_ratio: largest
            .map(|e| e.explained_variance_ratio.clone())
            .unwrap_or_default(),
        cluster_count: config.cluster_count,
        cluster_sizes: outcome.clustering.cluster_sizes(),
        kmeans_inertia: outcome.clustering.inertia,
        kmeans_converged: outcome.clustering.converged,
        random_seed: config.random_seed,
        cluster_concordance: outcome.concordance.counts.clone(),
        top_genes: outcome.top_genes().iter().map(|s| s.gene.clone()).collect(),
        artifacts: artifacts
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect(),
    }
}

/// Writes tables, plots, the interactive view and the run summary into
/// `config.output_dir`. Returns the paths written, summary last.
pub fn write_artifacts(
    config: &AnalysisConfig,
    outcome: &AnalysisOutcome,
) -> anyhow::Result<Vec<PathBuf>> {
    let out_dir = &config.output_dir;
    if !out_dir.exists() {
        std::fs::create_dir_all(out_dir).map_err(|e| {
            anyhow!("Failed to create output directory {}: {}", out_dir.display(), e)
        })?;
        info!("Created output directory: {}", out_dir.display());
    }

    let matrix = &outcome.data.matrix;
    let sample_types = &outcome.data.sample_types;
    let labels = &outcome.clustering.labels;
    let mut written = Vec::new();

    let path = out_dir.join(output_writer::RANKED_GENES_CSV);
    output_writer::write_gene_table(&path, &outcome.ranked)?;
    written.push(path);

    let path = out_dir.join(output_writer::TOP_GENES_CSV);
    output_writer::write_gene_table(&path, outcome.top_genes())?;
    written.push(path);

    for embedding in &outcome.embeddings {
        let path = out_dir.join(output_writer::embedding_csv_name(embedding.num_components()));
        output_writer::write_embedding(&path, matrix.sample_ids(), sample_types, labels, embedding)?;
        written.push(path);
    }

    if let Some(largest) = outcome.embeddings.last() {
        let path = out_dir.join(output_writer::EXPLAINED_VARIANCE_CSV);
        output_writer::write_explained_variance(&path, largest)?;
        written.push(path);
    }

    if let Some(embedding) = outcome.embedding_at_least(2) {
        let path = out_dir.join(output_writer::PCA_2D_PNG);
        plots::plot_pca_2d(&path, embedding, sample_types)?;
        written.push(path);
    }

    if !outcome.top_genes().is_empty() {
        let path = out_dir.join(output_writer::HEATMAP_PNG);
        plots::plot_top_genes_heatmap(&path, matrix, outcome.top_genes())?;
        written.push(path);
    }

    let path = out_dir.join(output_writer::VOLCANO_PNG);
    plots::plot_volcano(&path, &outcome.ranked)?;
    written.push(path);

    if let Some(embedding) = outcome.embedding_at_least(3) {
        let path = out_dir.join(output_writer::PCA_3D_HTML);
        interactive::write_pca_3d_html(&path, embedding, matrix.sample_ids(), sample_types, labels)?;
        written.push(path);
    }

    let path = out_dir.join(output_writer::SUMMARY_JSON);
    written.push(path.clone());
    let summary = build_summary(config, outcome, &written);
    output_writer::write_summary(&path, &summary)?;

    info!("Wrote {} artifacts to {}", written.len(), out_dir.display());
    Ok(written)
}

/// `run_analysis` followed by `write_artifacts`.
pub fn analyze(config: &AnalysisConfig) -> anyhow::Result<Vec<PathBuf>> {
    let outcome = run_analysis(config)?;
    write_artifacts(config, &outcome)
}
