// output_writer.rs

use crate::config::GroupingPolicy;
use crate::diffexpr::{GeneStatistic, TTestOutcome};
use crate::matrix_ops::SampleType;
use crate::pca_runner::PcaEmbedding;
use anyhow::{anyhow, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

// --- Artifact names inside the output directory ---
pub const PCA_2D_PNG: &str = "pca_2d.png";
pub const HEATMAP_PNG: &str = "top_genes_heatmap.png";
pub const VOLCANO_PNG: &str = "volcano.png";
pub const PCA_3D_HTML: &str = "pca_3d.html";
pub const RANKED_GENES_CSV: &str = "ranked_genes.csv";
pub const TOP_GENES_CSV: &str = "top_genes.csv";
pub const EXPLAINED_VARIANCE_CSV: &str = "explained_variance.csv";
pub const SUMMARY_JSON: &str = "analysis_summary.json";
pub const REPORT_PDF: &str = "liver_rnaseq_report.pdf";

/// `pca_2d.csv`, `pca_3d.csv`, ...
pub fn embedding_csv_name(n_components: usize) -> String {
    format!("pca_{}d.csv", n_components)
}

const GENE_TABLE_HEADER: [&str; 9] = [
    "rank",
    "gene",
    "mean_group_a",
    "mean_group_b",
    "log2_fc",
    "abs_log2_fc",
    "t_statistic",
    "p_value",
    "status",
];

fn create_output_file(path: &Path) -> Result<BufWriter<File>> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| anyhow!("Failed to create output file {}: {}", path.display(), e))
}

fn csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>> {
    Ok(csv::WriterBuilder::new().from_writer(create_output_file(path)?))
}

/// Writes ranked gene statistics, rank 1 first. Degenerate tests are
/// written as `NA`.
pub fn write_gene_table(path: &Path, ranked: &[GeneStatistic]) -> Result<()> {
    let mut writer = csv_writer(path)?;
    writer.write_record(GENE_TABLE_HEADER)?;
    for (idx, stat) in ranked.iter().enumerate() {
        let (t_statistic, p_value, status) = match stat.test {
            TTestOutcome::Tested {
                t_statistic,
                p_value,
            } => (
                format!("{:.6}", t_statistic),
                format!("{:.6e}", p_value),
                "tested",
            ),
            TTestOutcome::Degenerate => ("NA".to_string(), "NA".to_string(), "degenerate"),
        };
        writer.write_record([
            (idx + 1).to_string(),
            stat.gene.clone(),
            format!("{:.6}", stat.mean_a),
            format!("{:.6}", stat.mean_b),
            format!("{:.6}", stat.log2_fc),
            format!("{:.6}", stat.abs_log2_fc()),
            t_statistic,
            p_value,
            status.to_string(),
        ])?;
    }
    writer.flush()?;
    info!("Wrote {} genes to {}", ranked.len(), path.display());
    Ok(())
}

/// Per-sample scores with the sample's type and cluster.
pub fn write_embedding(
    path: &Path,
    sample_ids: &[String],
    sample_types: &[SampleType],
    clusters: &[usize],
    embedding: &PcaEmbedding,
) -> Result<()> {
    let coords = &embedding.coordinates;
    if coords.nrows() != sample_ids.len() {
        return Err(anyhow!(
            "Embedding has {} rows but there are {} samples",
            coords.nrows(),
            sample_ids.len()
        ));
    }
    let mut writer = csv_writer(path)?;
    let mut header = vec![
        "sample".to_string(),
        "sample_type".to_string(),
        "cluster".to_string(),
    ];
    header.extend(embedding.component_names());
    writer.write_record(&header)?;

    for (sample_idx, sample) in sample_ids.iter().enumerate() {
        let mut record = vec![
            sample.clone(),
            sample_types[sample_idx].name().to_string(),
            clusters[sample_idx].to_string(),
        ];
        record.extend(coords.row(sample_idx).iter().map(|v| format!("{:.6}", v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!(
        "Wrote {}-component embedding to {}",
        embedding.num_components(),
        path.display()
    );
    Ok(())
}

pub fn write_explained_variance(path: &Path, embedding: &PcaEmbedding) -> Result<()> {
    let mut writer = csv_writer(path)?;
    writer.write_record(["component", "explained_variance", "explained_variance_ratio"])?;
    for (name, (variance, ratio)) in embedding.component_names().iter().zip(
        embedding
            .explained_variance
            .iter()
            .zip(&embedding.explained_variance_ratio),
    ) {
        writer.write_record([
            name.clone(),
            format!("{:.6}", variance),
            format!("{:.6}", ratio),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Machine-readable account of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub input_path: String,
    pub raw_rows: usize,
    pub dropped_rows: usize,
    pub genes: usize,
    pub samples: usize,
    pub cancer_samples: usize,
    pub normal_samples: usize,
    pub grouping: GroupingPolicy,
    pub group_a_size: usize,
    pub group_b_size: usize,
    /// Samples whose group contradicts their label.
    pub label_disagreements: usize,
    pub zero_variance_genes: Vec<String>,
    pub degenerate_genes: Vec<String>,
    pub explained_variance_ratio: Vec<f64>,
    pub cluster_count: usize,
    pub cluster_sizes: Vec<usize>,
    pub kmeans_inertia: f64,
    pub kmeans_converged: bool,
    pub random_seed: u64,
    /// Per cluster: [normal, cancer] sample counts.
    pub cluster_concordance: Vec<[usize; 2]>,
    pub top_genes: Vec<String>,
    pub artifacts: Vec<String>,
}

pub fn write_summary(path: &Path, summary: &AnalysisSummary) -> Result<()> {
    let writer = create_output_file(path)?;
    serde_json::to_writer_pretty(writer, summary)
        .map_err(|e| anyhow!("Failed to write summary {}: {}", path.display(), e))?;
    Ok(())
}

pub fn read_summary(path: &Path) -> Result<AnalysisSummary> {
    let file = File::open(path)
        .map_err(|e| anyhow!("Failed to open summary {}: {}", path.display(), e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| anyhow!("Failed to parse summary {}: {}", path.display(), e))
}

/// One row of a gene table as the report needs it.
#[derive(Debug, Clone, PartialEq)]
pub struct TopGeneRow {
    pub rank: usize,
    pub gene: String,
    pub log2_fc: f64,
    /// `None` for degenerate rows.
    pub p_value: Option<f64>,
}

/// Reads a gene table written by `write_gene_table`. Columns are located by
/// header name, so extra or reordered columns are tolerated.
pub fn read_top_genes(path: &Path) -> Result<Vec<TopGeneRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| anyhow!("Failed to open gene table {}: {}", path.display(), e))?;
    let headers = reader.headers()?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| anyhow!("Gene table {} has no '{}' column", path.display(), name))
    };
    let gene_col = column("gene")?;
    let fc_col = column("log2_fc")?;
    let p_col = column("p_value")?;
    let rank_col = headers.iter().position(|h| h.trim() == "rank");

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        let field = |col: usize| record.get(col).unwrap_or_default().trim();
        let log2_fc = field(fc_col).parse::<f64>().map_err(|_| {
            anyhow!(
                "Gene table {} row {}: invalid log2_fc '{}'",
                path.display(),
                idx + 1,
                field(fc_col)
            )
        })?;
        let p_value = field(p_col).parse::<f64>().ok();
        let rank = rank_col
            .and_then(|c| field(c).parse::<usize>().ok())
            .unwrap_or(idx + 1);
        rows.push(TopGeneRow {
            rank,
            gene: field(gene_col).to_string(),
            log2_fc,
            p_value,
        });
    }
    if rows.is_empty() {
        warn!("Gene table {} has no rows.", path.display());
    }
    Ok(rows)
}
