// table.rs

use crate::config::TableLayout;
use crate::error::{AnalysisError, Result};
use crate::matrix_ops::{ExpressionMatrix, SampleType};
use log::{debug, info};
use std::path::Path;

/// Tokens read as a missing cell.
const MISSING_TOKENS: [&str; 8] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL", "#N/A"];

/// One data row of the input file as read, missing cells kept as `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 0-based position among the data rows of the file.
    pub row_index: usize,
    pub id: String,
    pub values: Vec<Option<f64>>,
    pub label: Option<i64>,
}

/// A delimited table: identifier column, interior numeric block, label column.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub id_header: String,
    /// Headers of the interior columns.
    pub value_headers: Vec<String>,
    pub label_header: String,
    pub records: Vec<RawRecord>,
}

/// A record that survived cleaning; every cell is present.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRecord {
    pub row_index: usize,
    pub id: String,
    pub values: Vec<f64>,
    pub label: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanTable {
    pub value_headers: Vec<String>,
    pub records: Vec<CleanRecord>,
    pub dropped_rows: usize,
}

/// The oriented expression data: the matrix plus one label per sample.
#[derive(Debug, Clone)]
pub struct ExpressionData {
    pub matrix: ExpressionMatrix,
    pub sample_types: Vec<SampleType>,
}

fn is_missing(cell: &str) -> bool {
    MISSING_TOKENS.contains(&cell.trim())
}

fn parse_value(cell: &str, row: usize, column: &str) -> Result<Option<f64>> {
    if is_missing(cell) {
        return Ok(None);
    }
    match cell.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(AnalysisError::Parse {
            row,
            column: column.to_string(),
            value: cell.to_string(),
            expected: "a finite number",
        }),
    }
}

fn parse_label(cell: &str, row: usize, column: &str) -> Result<Option<i64>> {
    if is_missing(cell) {
        return Ok(None);
    }
    let trimmed = cell.trim();
    if let Ok(code) = trimmed.parse::<i64>() {
        return Ok(Some(code));
    }
    // Integer codes written as floats ("1.0") are accepted.
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 => Ok(Some(v as i64)),
        _ => Err(AnalysisError::Parse {
            row,
            column: column.to_string(),
            value: cell.to_string(),
            expected: "an integer sample-type code",
        }),
    }
}

/// Reads the table. The file must exist; every data row must have the
/// header's column count and at least one interior column.
pub fn read_table(path: &Path, delimiter: char) -> Result<RawTable> {
    if !path.is_file() {
        return Err(AnalysisError::InputNotFound(path.to_path_buf()));
    }
    let reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(true)
        .from_path(path)
        .map_err(|source| AnalysisError::InputRead {
            path: path.to_path_buf(),
            source,
        })?;
    read_from(reader, path)
}

fn read_from<R: std::io::Read>(mut reader: csv::Reader<R>, path: &Path) -> Result<RawTable> {
    let read_err = |source| AnalysisError::InputRead {
        path: path.to_path_buf(),
        source,
    };

    let headers: Vec<String> = reader
        .headers()
        .map_err(read_err)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.len() < 3 {
        return Err(AnalysisError::Shape(format!(
            "expected an identifier column, at least one value column and a label column; header has {} column(s)",
            headers.len()
        )));
    }
    let id_header = headers[0].clone();
    let label_header = headers[headers.len() - 1].clone();
    let value_headers = headers[1..headers.len() - 1].to_vec();

    let mut records = Vec::new();
    for (row_index, result) in reader.records().enumerate() {
        let record = result.map_err(read_err)?;
        let row_number = row_index + 1;
        let id = record.get(0).unwrap_or_default().trim().to_string();
        let mut values = Vec::with_capacity(value_headers.len());
        for (col, header) in value_headers.iter().enumerate() {
            let cell = record.get(col + 1).unwrap_or_default();
            values.push(parse_value(cell, row_number, header)?);
        }
        let label = parse_label(
            record.get(headers.len() - 1).unwrap_or_default(),
            row_number,
            &label_header,
        )?;
        records.push(RawRecord {
            row_index,
            id,
            values,
            label,
        });
    }

    info!(
        "Read {} data rows x {} value columns from {}.",
        records.len(),
        value_headers.len(),
        path.display()
    );

    Ok(RawTable {
        id_header,
        value_headers,
        label_header,
        records,
    })
}

/// Drops every record with a missing value, label cell included, keeping
/// the survivors in file order.
pub fn clean(table: &RawTable) -> Result<CleanTable> {
    let mut records = Vec::with_capacity(table.records.len());
    for record in &table.records {
        let label = match record.label {
            Some(label) if !record.id.is_empty() => label,
            _ => {
                debug!("Dropping data row {} (missing identifier or label).", record.row_index + 1);
                continue;
            }
        };
        let values: Option<Vec<f64>> = record.values.iter().copied().collect();
        match values {
            Some(values) => records.push(CleanRecord {
                row_index: record.row_index,
                id: record.id.clone(),
                values,
                label,
            }),
            None => debug!(
                "Dropping data row {} ('{}'): missing expression value.",
                record.row_index + 1,
                record.id
            ),
        }
    }

    let dropped_rows = table.records.len() - records.len();
    if records.is_empty() {
        return Err(AnalysisError::Shape(format!(
            "no rows left after dropping rows with missing values ({} rows read)",
            table.records.len()
        )));
    }
    if dropped_rows > 0 {
        info!(
            "Dropped {} of {} rows containing missing values.",
            dropped_rows,
            table.records.len()
        );
    }

    Ok(CleanTable {
        value_headers: table.value_headers.clone(),
        records,
        dropped_rows,
    })
}

/// Builds the genes x samples matrix and the per-sample labels.
///
/// For `GenesBySamples` the labels are taken from the raw table (before
/// cleaning) so that dropping a gene row never shifts a sample's label.
pub fn orient(raw: &RawTable, cleaned: &CleanTable, layout: TableLayout) -> Result<ExpressionData> {
    match layout {
        TableLayout::GenesBySamples => {
            let sample_ids = cleaned.value_headers.clone();
            let num_samples = sample_ids.len();
            if raw.records.len() < num_samples {
                return Err(AnalysisError::Shape(format!(
                    "label column '{}' has {} entries but the table has {} samples",
                    raw.label_header,
                    raw.records.len(),
                    num_samples
                )));
            }
            let mut sample_types = Vec::with_capacity(num_samples);
            for (sample_idx, sample) in sample_ids.iter().enumerate() {
                let code = raw.records[sample_idx].label.ok_or_else(|| {
                    AnalysisError::Shape(format!(
                        "missing label for sample '{}' (label cell of data row {})",
                        sample,
                        sample_idx + 1
                    ))
                })?;
                sample_types.push(SampleType::from_code(code, sample)?);
            }
            let gene_ids = cleaned.records.iter().map(|r| r.id.clone()).collect();
            let rows = cleaned.records.iter().map(|r| r.values.clone()).collect();
            let matrix = ExpressionMatrix::from_gene_rows(gene_ids, sample_ids, rows)?;
            Ok(ExpressionData {
                matrix,
                sample_types,
            })
        }
        TableLayout::SamplesByGenes => {
            let gene_ids = cleaned.value_headers.clone();
            let sample_ids: Vec<String> = cleaned.records.iter().map(|r| r.id.clone()).collect();
            let mut sample_types = Vec::with_capacity(sample_ids.len());
            for record in &cleaned.records {
                sample_types.push(SampleType::from_code(record.label, &record.id)?);
            }
            let rows = (0..gene_ids.len())
                .map(|gene_idx| cleaned.records.iter().map(|r| r.values[gene_idx]).collect())
                .collect();
            let matrix = ExpressionMatrix::from_gene_rows(gene_ids, sample_ids, rows)?;
            Ok(ExpressionData {
                matrix,
                sample_types,
            })
        }
    }
}

/// Row counts of a load, for the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadStats {
    pub raw_rows: usize,
    pub dropped_rows: usize,
}

/// Read, clean and orient in one call.
pub fn load_expression(
    path: &Path,
    delimiter: char,
    layout: TableLayout,
) -> Result<(ExpressionData, LoadStats)> {
    let raw = read_table(path, delimiter)?;
    let cleaned = clean(&raw)?;
    let data = orient(&raw, &cleaned, layout)?;
    info!(
        "Expression matrix: {} genes x {} samples ({:?} layout).",
        data.matrix.num_genes(),
        data.matrix.num_samples(),
        layout
    );
    let stats = LoadStats {
        raw_rows: raw.records.len(),
        dropped_rows: cleaned.dropped_rows,
    };
    Ok((data, stats))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<RawTable> {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(text.as_bytes());
        read_from(reader, Path::new("inline.csv"))
    }

    const GENES_BY_SAMPLES: &str = "\
gene,s1,s2,s3,s4,sample_type_id
ALB,10,12,1,2,1
APOA1,5,,6,7,1
TTR,3,4,5,6,0
CYP3A4,8,9,NA,1,0
AFP,0,1,2,3,
";

    #[test]
    fn reads_headers_and_missing_cells() {
        let table = parse(GENES_BY_SAMPLES).unwrap();
        assert_eq!(table.id_header, "gene");
        assert_eq!(table.value_headers, vec!["s1", "s2", "s3", "s4"]);
        assert_eq!(table.label_header, "sample_type_id");
        assert_eq!(table.records.len(), 5);
        assert_eq!(table.records[1].values[1], None);
        assert_eq!(table.records[3].values[2], None);
        assert_eq!(table.records[4].label, None);
    }

    #[test]
    fn rejects_non_numeric_cells() {
        let err = parse("gene,s1,s2,label\nALB,1,abc,0\n").unwrap_err();
        assert!(matches!(err, AnalysisError::Parse { row: 1, ref column, .. } if column == "s2"));
    }

    #[test]
    fn accepts_float_written_label_codes() {
        let table = parse("gene,s1,s2,label\nALB,1,2,1.0\n").unwrap();
        assert_eq!(table.records[0].label, Some(1));
    }

    #[test]
    fn clean_drops_incomplete_rows_and_keeps_order() {
        let table = parse(GENES_BY_SAMPLES).unwrap();
        let cleaned = clean(&table).unwrap();
        let ids: Vec<&str> = cleaned.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ALB", "TTR"]);
        assert_eq!(cleaned.dropped_rows, 3);
        let positions: Vec<usize> = cleaned.records.iter().map(|r| r.row_index).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn clean_drops_row_with_only_the_label_missing() {
        let table = parse("gene,s1,s2,s3,s4,label\nALB,1,2,3,4,0\nTTR,5,6,7,8,\n").unwrap();
        let cleaned = clean(&table).unwrap();
        assert_eq!(cleaned.dropped_rows, 1);
        assert_eq!(cleaned.records.len(), 1);
        assert_eq!(cleaned.records[0].id, "ALB");
        assert_eq!(cleaned.records[0].label, 0);
    }

    #[test]
    fn clean_rejects_empty_result() {
        let table = parse("gene,s1,s2,label\nALB,NA,1,0\nTTR,2,,1\n").unwrap();
        assert!(matches!(
            clean(&table),
            Err(AnalysisError::Shape(_))
        ));
    }

    #[test]
    fn labels_follow_sample_position_not_surviving_rows() {
        let table = parse(GENES_BY_SAMPLES).unwrap();
        let cleaned = clean(&table).unwrap();
        let data = orient(&table, &cleaned, TableLayout::GenesBySamples).unwrap();
        assert_eq!(
            data.sample_types,
            vec![
                SampleType::Cancer,
                SampleType::Cancer,
                SampleType::Normal,
                SampleType::Normal
            ]
        );
        assert_eq!(data.matrix.gene_ids(), ["ALB", "TTR"]);
        assert_eq!(data.matrix.values()[[1, 3]], 6.0);
    }

    #[test]
    fn label_column_shorter_than_sample_count_is_fatal() {
        let table = parse("gene,s1,s2,s3,label\nALB,1,2,3,0\nTTR,1,2,4,1\n").unwrap();
        let cleaned = clean(&table).unwrap();
        assert!(matches!(
            orient(&table, &cleaned, TableLayout::GenesBySamples),
            Err(AnalysisError::Shape(_))
        ));
    }

    #[test]
    fn samples_by_genes_is_transposed() {
        let text = "\
sample,ALB,TTR,AFP,sample_type_id
p1,10,3,0,1
p2,12,4,1,1
p3,1,5,2,0
";
        let table = parse(text).unwrap();
        let cleaned = clean(&table).unwrap();
        let data = orient(&table, &cleaned, TableLayout::SamplesByGenes).unwrap();
        assert_eq!(data.matrix.gene_ids(), ["ALB", "TTR", "AFP"]);
        assert_eq!(data.matrix.sample_ids(), ["p1", "p2", "p3"]);
        assert_eq!(data.matrix.values()[[0, 1]], 12.0);
        assert_eq!(data.sample_types[2], SampleType::Normal);
    }

    #[test]
    fn missing_file_is_reported() {
        let err = read_table(Path::new("/definitely/not/here.csv"), ',').unwrap_err();
        assert!(matches!(err, AnalysisError::InputNotFound(_)));
    }
}
