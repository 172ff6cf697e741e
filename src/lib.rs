// lib.rs

pub mod cluster;
pub mod config;
pub mod diffexpr;
pub mod error;
pub mod interactive;
pub mod matrix_ops;
pub mod output_writer;
pub mod pca_runner;
pub mod pipeline;
pub mod plots;
pub mod report;
pub mod table;

pub use config::{AnalysisConfig, GroupingPolicy, ReportConfig, TableLayout};
pub use error::AnalysisError;
