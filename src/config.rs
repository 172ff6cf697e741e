// config.rs

use crate::error::{AnalysisError, Result};
use crate::output_writer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Orientation of the input table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TableLayout {
    /// One row per gene, one interior column per sample. The label of
    /// sample `j` sits in the label cell of raw row `j`.
    GenesBySamples,
    /// One row per sample, one interior column per gene, label per row.
    SamplesByGenes,
}

/// How samples are split into the two groups of the differential test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingPolicy {
    /// First `floor(n/2)` samples vs the rest (or explicit `group_sizes`).
    PositionalHalves,
    /// Cancer-labelled samples vs normal-labelled samples.
    ByLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub table_layout: TableLayout,
    pub delimiter: char,
    pub grouping: GroupingPolicy,
    pub group_sizes: Option<[usize; 2]>,
    pub pca_components: Vec<usize>,
    pub cluster_count: usize,
    pub random_seed: u64,
    pub top_n: usize,
    pub kmeans_max_iter: usize,
    pub kmeans_n_init: usize,
    pub kmeans_tolerance: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::new(),
            output_dir: PathBuf::from("results"),
            table_layout: TableLayout::GenesBySamples,
            delimiter: ',',
            grouping: GroupingPolicy::PositionalHalves,
            group_sizes: None,
            pca_components: vec![2, 3],
            cluster_count: 2,
            random_seed: 42,
            top_n: 20,
            kmeans_max_iter: 300,
            kmeans_n_init: 10,
            kmeans_tolerance: 1e-4,
        }
    }
}

impl AnalysisConfig {
    /// Reads a TOML configuration file. Keys that are absent keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            AnalysisError::Config(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| AnalysisError::Config(e.to_string()))
    }

    /// Checks everything that can be checked without looking at the data.
    pub fn validate(&self) -> Result<()> {
        if self.input_path.as_os_str().is_empty() {
            return Err(AnalysisError::Config("input_path is required".to_string()));
        }
        if !self.delimiter.is_ascii() {
            return Err(AnalysisError::Config(format!(
                "delimiter must be a single ASCII character, got '{}'",
                self.delimiter
            )));
        }
        if self.pca_components.is_empty() {
            return Err(AnalysisError::Config(
                "pca_components must list at least one component count".to_string(),
            ));
        }
        if let Some(k) = self.pca_components.iter().find(|&&k| k != 2 && k != 3) {
            return Err(AnalysisError::Config(format!(
                "pca_components supports only 2 and 3, got {}",
                k
            )));
        }
        if self.cluster_count == 0 {
            return Err(AnalysisError::Config("cluster_count must be > 0".to_string()));
        }
        if self.top_n == 0 {
            return Err(AnalysisError::Config("top_n must be > 0".to_string()));
        }
        if self.kmeans_max_iter == 0 || self.kmeans_n_init == 0 {
            return Err(AnalysisError::Config(
                "kmeans_max_iter and kmeans_n_init must be > 0".to_string(),
            ));
        }
        if !self.kmeans_tolerance.is_finite() || self.kmeans_tolerance < 0.0 {
            return Err(AnalysisError::Config(format!(
                "kmeans_tolerance must be a finite non-negative number, got {}",
                self.kmeans_tolerance
            )));
        }
        if self.group_sizes.is_some() && self.grouping == GroupingPolicy::ByLabel {
            return Err(AnalysisError::Config(
                "group_sizes only applies to the positional-halves grouping".to_string(),
            ));
        }
        Ok(())
    }

    /// Component counts in ascending order, duplicates removed.
    pub fn component_counts(&self) -> Vec<usize> {
        let mut counts = self.pca_components.clone();
        counts.sort_unstable();
        counts.dedup();
        counts
    }
}

/// Inputs and output of the report assembler. Unset paths default to the
/// analyzer's artifact names inside `output_dir`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    pub output_dir: PathBuf,
    pub pca_image: Option<PathBuf>,
    pub heatmap_image: Option<PathBuf>,
    pub top_genes_csv: Option<PathBuf>,
    pub summary_json: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
}

impl ReportConfig {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            pca_image: None,
            heatmap_image: None,
            top_genes_csv: None,
            summary_json: None,
            output_path: None,
        }
    }

    fn resolve(&self, explicit: &Option<PathBuf>, default_name: &str) -> PathBuf {
        explicit
            .clone()
            .unwrap_or_else(|| self.output_dir.join(default_name))
    }

    pub fn pca_image_path(&self) -> PathBuf {
        self.resolve(&self.pca_image, output_writer::PCA_2D_PNG)
    }

    pub fn heatmap_image_path(&self) -> PathBuf {
        self.resolve(&self.heatmap_image, output_writer::HEATMAP_PNG)
    }

    pub fn top_genes_csv_path(&self) -> PathBuf {
        self.resolve(&self.top_genes_csv, output_writer::TOP_GENES_CSV)
    }

    pub fn summary_json_path(&self) -> PathBuf {
        self.resolve(&self.summary_json, output_writer::SUMMARY_JSON)
    }

    pub fn output_pdf_path(&self) -> PathBuf {
        self.resolve(&self.output_path, output_writer::REPORT_PDF)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_input() -> AnalysisConfig {
        AnalysisConfig {
            input_path: PathBuf::from("liver.csv"),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_valid_once_input_is_set() {
        assert!(AnalysisConfig::default().validate().is_err());
        assert!(config_with_input().validate().is_ok());
    }

    #[test]
    fn toml_overrides_only_listed_keys() {
        let cfg = AnalysisConfig::from_toml_str(
            r#"
            input_path = "data/liver.csv"
            table_layout = "samples-by-genes"
            group_sizes = [4, 6]
            random_seed = 7
            "#,
        )
        .unwrap();
        assert_eq!(cfg.input_path, PathBuf::from("data/liver.csv"));
        assert_eq!(cfg.table_layout, TableLayout::SamplesByGenes);
        assert_eq!(cfg.group_sizes, Some([4, 6]));
        assert_eq!(cfg.random_seed, 7);
        assert_eq!(cfg.cluster_count, 2);
        assert_eq!(cfg.pca_components, vec![2, 3]);
    }

    #[test]
    fn toml_rejects_unknown_keys() {
        let err = AnalysisConfig::from_toml_str("input_path = \"a.csv\"\nthreads = 4\n").unwrap_err();
        assert!(matches!(err, AnalysisError::Config(_)));
    }

    #[test]
    fn rejects_unsupported_component_counts() {
        let cfg = AnalysisConfig {
            pca_components: vec![2, 5],
            ..config_with_input()
        };
        assert!(matches!(cfg.validate(), Err(AnalysisError::Config(_))));
    }

    #[test]
    fn rejects_group_sizes_with_label_grouping() {
        let cfg = AnalysisConfig {
            grouping: GroupingPolicy::ByLabel,
            group_sizes: Some([3, 3]),
            ..config_with_input()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn component_counts_sorted_and_deduplicated() {
        let cfg = AnalysisConfig {
            pca_components: vec![3, 2, 3],
            ..config_with_input()
        };
        assert_eq!(cfg.component_counts(), vec![2, 3]);
    }

    #[test]
    fn report_paths_default_into_output_dir() {
        let mut cfg = ReportConfig::new("out");
        assert_eq!(cfg.pca_image_path(), PathBuf::from("out").join(output_writer::PCA_2D_PNG));
        cfg.heatmap_image = Some(PathBuf::from("elsewhere/heat.png"));
        assert_eq!(cfg.heatmap_image_path(), PathBuf::from("elsewhere/heat.png"));
    }
}
