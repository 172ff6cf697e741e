// plots.rs

use crate::diffexpr::GeneStatistic;
use crate::matrix_ops::{ExpressionMatrix, SampleType};
use crate::pca_runner::PcaEmbedding;
use anyhow::{anyhow, Result};
use log::{info, warn};
use plotters::prelude::*;
use std::path::Path;

const NORMAL_COLOR: RGBColor = RGBColor(31, 119, 180);
const CANCER_COLOR: RGBColor = RGBColor(214, 39, 40);
const GUIDE_COLOR: RGBColor = RGBColor(128, 128, 128);

/// Most sample names printed under the heatmap before labels are thinned.
const MAX_SAMPLE_LABELS: usize = 40;

/// Heatmap rows drawn; longer gene lists are cut to this many.
pub const MAX_HEATMAP_GENES: usize = 100;

fn draw_error(path: &Path, e: impl std::fmt::Display) -> anyhow::Error {
    anyhow!("Failed to draw {}: {}", path.display(), e)
}

fn type_color(sample_type: SampleType) -> RGBColor {
    match sample_type {
        SampleType::Normal => NORMAL_COLOR,
        SampleType::Cancer => CANCER_COLOR,
    }
}

/// Min and max padded by `pct` of the span; a flat range is widened to +-1.
fn padded_range<I: IntoIterator<Item = f64>>(values: I, pct: f64) -> (f64, f64) {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (-1.0, 1.0);
    }
    if (hi - lo).abs() < 1e-9 {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * pct;
    (lo - pad, hi + pad)
}

/// Scatter of PC1 against PC2, one colour per sample type.
pub fn plot_pca_2d(path: &Path, embedding: &PcaEmbedding, sample_types: &[SampleType]) -> Result<()> {
    if embedding.num_components() < 2 {
        return Err(anyhow!(
            "2D PCA plot needs 2 components, embedding has {}",
            embedding.num_components()
        ));
    }
    let coords = &embedding.coordinates;
    let (x_lo, x_hi) = padded_range(coords.column(0).iter().copied(), 0.08);
    let (y_lo, y_hi) = padded_range(coords.column(1).iter().copied(), 0.08);
    let ratio = &embedding.explained_variance_ratio;

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| draw_error(path, e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("2D PCA of Liver RNA-seq Samples", ("sans-serif", 26))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(|e| draw_error(path, e))?;

    chart
        .configure_mesh()
        .x_desc(format!("PC1 ({:.1}%)", ratio[0] * 100.0))
        .y_desc(format!("PC2 ({:.1}%)", ratio[1] * 100.0))
        .axis_desc_style(("sans-serif", 16))
        .draw()
        .map_err(|e| draw_error(path, e))?;

    for sample_type in [SampleType::Normal, SampleType::Cancer] {
        let color = type_color(sample_type);
        let points: Vec<(f64, f64)> = coords
            .rows()
            .into_iter()
            .zip(sample_types)
            .filter(|(_, &t)| t == sample_type)
            .map(|(row, _)| (row[0], row[1]))
            .collect();
        if points.is_empty() {
            continue;
        }
        chart
            .draw_series(
                points
                    .into_iter()
                    .map(|p| Circle::new(p, 5, color.filled())),
            )
            .map_err(|e| draw_error(path, e))?
            .label(sample_type.name())
            .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
    }

    chart
        .configure_series_labels()
        .position(SeriesLabelPosition::UpperRight)
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(|e| draw_error(path, e))?;

    root.present().map_err(|e| draw_error(path, e))?;
    info!("Saved 2D PCA plot to {}", path.display());
    Ok(())
}

/// Raw expression of the given genes (rank 1 at the top) across all
/// samples, viridis-coloured, with a colour bar on the right. At most
/// `MAX_HEATMAP_GENES` rows are drawn.
pub fn plot_top_genes_heatmap(
    path: &Path,
    matrix: &ExpressionMatrix,
    top_genes: &[GeneStatistic],
) -> Result<()> {
    if top_genes.is_empty() {
        return Err(anyhow!("No genes to draw in the heatmap"));
    }
    if top_genes.len() > MAX_HEATMAP_GENES {
        warn!(
            "Heatmap limited to the first {} of {} top genes.",
            MAX_HEATMAP_GENES,
            top_genes.len()
        );
    }
    let top_genes = &top_genes[..top_genes.len().min(MAX_HEATMAP_GENES)];
    let values = matrix.values();
    let n_genes = top_genes.len();
    let n_samples = matrix.num_samples();

    let (mut v_min, mut v_max) = top_genes
        .iter()
        .flat_map(|g| values.row(g.gene_index).to_vec())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if v_max - v_min < 1e-12 {
        v_min -= 0.5;
        v_max += 0.5;
    }

    let width = 1000u32;
    let height = (220 + 28 * n_genes as u32).max(500);
    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| draw_error(path, e))?;
    let (main_area, bar_area) = root.split_horizontally(width - 120);

    let sample_ids = matrix.sample_ids();
    let gene_labels: Vec<&str> = top_genes.iter().map(|g| g.gene.as_str()).collect();
    let label_step = n_samples.div_ceil(MAX_SAMPLE_LABELS).max(1);

    let mut chart = ChartBuilder::on(&main_area)
        .caption(
            format!("Heatmap of Top {} Differentially Expressed Genes", n_genes),
            ("sans-serif", 24),
        )
        .margin(15)
        .x_label_area_size(90)
        .y_label_area_size(110)
        .build_cartesian_2d((0..n_samples).into_segmented(), (0..n_genes).into_segmented())
        .map_err(|e| draw_error(path, e))?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_labels(n_samples.min(MAX_SAMPLE_LABELS))
        .y_labels(n_genes)
        .x_label_style(("sans-serif", 11).into_font().transform(FontTransform::Rotate90))
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) if *i % label_step == 0 => {
                sample_ids.get(*i).cloned().unwrap_or_default()
            }
            _ => String::new(),
        })
        .y_label_formatter(&|v| match v {
            // Row 0 is drawn at the bottom; rank 1 goes on top.
            SegmentValue::CenterOf(i) if *i < n_genes => gene_labels[n_genes - 1 - *i].to_string(),
            _ => String::new(),
        })
        .x_desc("Samples")
        .y_desc("Top Genes")
        .draw()
        .map_err(|e| draw_error(path, e))?;

    chart
        .draw_series(top_genes.iter().enumerate().flat_map(|(rank_idx, gene)| {
            let row = n_genes - 1 - rank_idx;
            let gene_values = values.row(gene.gene_index);
            (0..n_samples).map(move |s| {
                let color = ViridisRGB::get_color_normalized(gene_values[s], v_min, v_max);
                Rectangle::new(
                    [
                        (SegmentValue::Exact(s), SegmentValue::Exact(row)),
                        (SegmentValue::Exact(s + 1), SegmentValue::Exact(row + 1)),
                    ],
                    color.filled(),
                )
            })
        }))
        .map_err(|e| draw_error(path, e))?;

    // --- Colour bar ---
    let mut bar = ChartBuilder::on(&bar_area)
        .margin_top(60)
        .margin_bottom(100)
        .margin_right(10)
        .y_label_area_size(60)
        .build_cartesian_2d(0.0..1.0, v_min..v_max)
        .map_err(|e| draw_error(path, e))?;
    bar.configure_mesh()
        .disable_mesh()
        .disable_x_axis()
        .y_labels(6)
        .y_label_formatter(&|v| format!("{:.1}", v))
        .draw()
        .map_err(|e| draw_error(path, e))?;
    const STEPS: usize = 100;
    let step = (v_max - v_min) / STEPS as f64;
    bar.draw_series((0..STEPS).map(|i| {
        let lo = v_min + step * i as f64;
        let color = ViridisRGB::get_color_normalized(lo + step / 2.0, v_min, v_max);
        Rectangle::new([(0.0, lo), (1.0, lo + step)], color.filled())
    }))
    .map_err(|e| draw_error(path, e))?;

    root.present().map_err(|e| draw_error(path, e))?;
    info!("Saved heatmap of {} genes to {}", n_genes, path.display());
    Ok(())
}

/// log2 fold change against -log10(p) for every tested gene.
pub fn plot_volcano(path: &Path, stats: &[GeneStatistic]) -> Result<()> {
    let points: Vec<(f64, f64)> = stats
        .iter()
        .filter_map(|s| {
            s.test
                .p_value()
                .map(|p| (s.log2_fc, -p.max(f64::MIN_POSITIVE).log10()))
        })
        .collect();
    let skipped = stats.len() - points.len();
    if skipped > 0 {
        warn!("Volcano plot skips {} degenerate genes without a p-value.", skipped);
    }

    let max_abs_fc = points
        .iter()
        .map(|(x, _)| x.abs())
        .fold(0.0_f64, f64::max)
        .max(1.0);
    let x_hi = max_abs_fc * 1.08;
    let (_, y_max) = padded_range(points.iter().map(|(_, y)| *y), 0.05);
    let y_hi = y_max.max(1.0);

    let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(|e| draw_error(path, e))?;

    let mut chart = ChartBuilder::on(&root)
        .caption("Volcano Plot of Gene Expression", ("sans-serif", 26))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-x_hi..x_hi, 0.0..y_hi)
        .map_err(|e| draw_error(path, e))?;

    chart
        .configure_mesh()
        .x_desc("log2 Fold Change")
        .y_desc("-log10(p-value)")
        .axis_desc_style(("sans-serif", 16))
        .draw()
        .map_err(|e| draw_error(path, e))?;

    chart
        .draw_series(DashedLineSeries::new(
            vec![(0.0, 0.0), (0.0, y_hi)],
            8,
            5,
            GUIDE_COLOR.stroke_width(1),
        ))
        .map_err(|e| draw_error(path, e))?;

    chart
        .draw_series(
            points
                .iter()
                .map(|&p| Circle::new(p, 3, NORMAL_COLOR.mix(0.5).filled())),
        )
        .map_err(|e| draw_error(path, e))?;

    root.present().map_err(|e| draw_error(path, e))?;
    info!("Saved volcano plot of {} genes to {}", points.len(), path.display());
    Ok(())
}
