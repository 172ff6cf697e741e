// main.rs

// --- External Crate Imports ---
use anyhow::{Context, Error, Result};
use clap::Parser;
use env_logger;
use log::{debug, info};
use std::time::Instant;

use liver_rnaseq::{pipeline, report, AnalysisConfig};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting liver_rnaseq with args: {:?}", cli_args);

    match cli_args.command {
        cli::Command::Analyze(args) => {
            // --- 1. Resolve configuration ---
            let config = args.into_config()?;
            debug!("Resolved analysis configuration: {:?}", config);

            // --- 2. Compute ---
            let outcome = compute(&config)?;
            info!(
                "Analysis complete: {} genes x {} samples, {} embedding(s), {} cluster(s).",
                outcome.data.matrix.num_genes(),
                outcome.data.matrix.num_samples(),
                outcome.embeddings.len(),
                config.cluster_count
            );

            // --- 3. Write Outputs ---
            let written = pipeline::write_artifacts(&config, &outcome)?;
            for path in &written {
                debug!("  {}", path.display());
            }
        }
        cli::Command::Report(args) => {
            let config = args.into_config();
            debug!("Resolved report configuration: {:?}", config);
            let output = report::assemble_report(&config)?;
            info!("Report saved as {}", output.display());
        }
    }

    info!(
        "liver_rnaseq finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}

/// Runs the analysis, keeping the typed error as the source of the context.
fn compute(config: &AnalysisConfig) -> Result<pipeline::AnalysisOutcome> {
    pipeline::run_analysis(config)
        .with_context(|| format!("Analysis of {} failed", config.input_path.display()))
}

// --- Module Implementations ---

mod cli {
    use anyhow::{anyhow, Result};
    use clap::{Args, Parser, Subcommand};
    use liver_rnaseq::{AnalysisConfig, GroupingPolicy, ReportConfig, TableLayout};
    use std::path::PathBuf;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Liver cancer RNA-seq expression analysis and PDF report tool.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        #[command(subcommand)]
        pub(crate) command: Command,

        #[arg(long, default_value = "Info", global = true)]
        pub(crate) log_level: String,
    }

    #[derive(Subcommand, Debug)]
    pub(crate) enum Command {
        /// Clean, standardize, reduce, test, rank and cluster an expression table.
        Analyze(AnalyzeArgs),
        /// Assemble the PDF report from the artifacts of a previous analysis.
        Report(ReportArgs),
    }

    /// Flags override the values of the `--config` file.
    #[derive(Args, Debug)]
    pub(crate) struct AnalyzeArgs {
        #[arg(short, long)]
        pub(crate) input: Option<PathBuf>,

        #[arg(short, long = "out")]
        pub(crate) output_dir: Option<PathBuf>,

        /// TOML file with analysis settings.
        #[arg(short, long)]
        pub(crate) config: Option<PathBuf>,

        #[arg(long, value_enum)]
        pub(crate) layout: Option<TableLayout>,

        #[arg(long)]
        pub(crate) delimiter: Option<char>,

        #[arg(long, value_enum)]
        pub(crate) grouping: Option<GroupingPolicy>,

        /// Sizes of group A and group B for the positional split.
        #[arg(long, num_args = 2, value_names = ["A", "B"])]
        pub(crate) group_sizes: Option<Vec<usize>>,

        /// Comma-separated PCA component counts (2 and/or 3).
        #[arg(short = 'k', long = "components", value_delimiter = ',')]
        pub(crate) pca_components: Option<Vec<usize>>,

        #[arg(long)]
        pub(crate) clusters: Option<usize>,

        #[arg(long)]
        pub(crate) seed: Option<u64>,

        #[arg(long)]
        pub(crate) top_n: Option<usize>,
    }

    impl AnalyzeArgs {
        pub(crate) fn into_config(self) -> Result<AnalysisConfig> {
            let mut config = match &self.config {
                Some(path) => AnalysisConfig::from_toml_file(path)?,
                None => AnalysisConfig::default(),
            };
            if let Some(v) = self.input {
                config.input_path = v;
            }
            if let Some(v) = self.output_dir {
                config.output_dir = v;
            }
            if let Some(v) = self.layout {
                config.table_layout = v;
            }
            if let Some(v) = self.delimiter {
                config.delimiter = v;
            }
            if let Some(v) = self.grouping {
                config.grouping = v;
            }
            if let Some(sizes) = self.group_sizes {
                match sizes.as_slice() {
                    [a, b] => config.group_sizes = Some([*a, *b]),
                    _ => return Err(anyhow!("--group-sizes takes exactly two values")),
                }
            }
            if let Some(v) = self.pca_components {
                config.pca_components = v;
            }
            if let Some(v) = self.clusters {
                config.cluster_count = v;
            }
            if let Some(v) = self.seed {
                config.random_seed = v;
            }
            if let Some(v) = self.top_n {
                config.top_n = v;
            }
            if config.input_path.as_os_str().is_empty() {
                return Err(anyhow!(
                    "No input table given: pass --input or set input_path in the config file."
                ));
            }
            Ok(config)
        }
    }

    #[derive(Args, Debug)]
    pub(crate) struct ReportArgs {
        /// Directory holding the analysis artifacts.
        #[arg(short = 'd', long = "dir", default_value = "results")]
        pub(crate) output_dir: PathBuf,

        #[arg(long)]
        pub(crate) pca_image: Option<PathBuf>,

        #[arg(long)]
        pub(crate) heatmap_image: Option<PathBuf>,

        #[arg(long)]
        pub(crate) top_genes: Option<PathBuf>,

        #[arg(long)]
        pub(crate) summary: Option<PathBuf>,

        /// Defaults to the report file name inside `--dir`.
        #[arg(short, long)]
        pub(crate) output: Option<PathBuf>,
    }

    impl ReportArgs {
        pub(crate) fn into_config(self) -> ReportConfig {
            ReportConfig {
                pca_image: self.pca_image,
                heatmap_image: self.heatmap_image,
                top_genes_csv: self.top_genes,
                summary_json: self.summary,
                output_path: self.output,
                ..ReportConfig::new(self.output_dir)
            }
        }
    }
}
