// report.rs

use crate::config::ReportConfig;
use crate::output_writer::{self, AnalysisSummary, TopGeneRow};
use anyhow::{anyhow, Result};
use log::{debug, info, warn};
use printpdf::image_crate::{self, DynamicImage, GenericImageView};
use printpdf::{
    BuiltinFont, Image, ImageTransform, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

// --- Page geometry (A4 portrait, millimetres) ---
const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 10.0;
const IMAGE_WIDTH_MM: f32 = 90.0;
const PT_TO_MM: f32 = 0.3528;
/// Mean Helvetica glyph advance as a fraction of the font size.
const AVG_GLYPH_EM: f32 = 0.5;

/// Top genes spelled out under "Key Results".
const KEY_GENES_LISTED: usize = 5;

pub const REPORT_TITLE: &str = "Liver Cancer RNA-seq Analysis";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontFace {
    Regular,
    Bold,
    Italic,
}

/// One element of the report, top to bottom.
#[derive(Debug, Clone)]
pub enum Block {
    /// Centred, bold, 16 pt.
    Title(String),
    /// Bold section heading, 12 pt.
    Heading(String),
    /// Wrapped to the printable width; `\n` forces a line break.
    Paragraph {
        text: String,
        face: FontFace,
        size_pt: f32,
        line_mm: f32,
    },
    Image {
        path: PathBuf,
        image: DynamicImage,
        width_mm: f32,
    },
    /// Stands in for an artifact that could not be loaded.
    Placeholder(String),
    Spacer(f32),
}

#[derive(Debug, Clone)]
pub struct ReportLayout {
    pub blocks: Vec<Block>,
}

impl ReportLayout {
    pub fn placeholders(&self) -> impl Iterator<Item = &str> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Placeholder(text) => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn image_paths(&self) -> impl Iterator<Item = &Path> {
        self.blocks.iter().filter_map(|b| match b {
            Block::Image { path, .. } => Some(path.as_path()),
            _ => None,
        })
    }
}

fn paragraph(text: impl Into<String>) -> Block {
    Block::Paragraph {
        text: text.into(),
        face: FontFace::Regular,
        size_pt: 11.0,
        line_mm: 5.0,
    }
}

fn load_image(path: &Path) -> std::result::Result<DynamicImage, String> {
    if !path.is_file() {
        return Err("file not found".to_string());
    }
    image_crate::open(path).map_err(|e| e.to_string())
}

fn image_block(path: PathBuf) -> Block {
    match load_image(&path) {
        Ok(image) => {
            debug!("Loaded image {} ({:?}).", path.display(), image.dimensions());
            Block::Image {
                path,
                image,
                width_mm: IMAGE_WIDTH_MM,
            }
        }
        Err(e) => {
            warn!("Could not load image {}: {}", path.display(), e);
            Block::Placeholder(format!("Could not load image {}: {}", path.display(), e))
        }
    }
}

fn dataset_overview(summary: Option<&AnalysisSummary>) -> String {
    let mut lines = Vec::new();
    if let Some(s) = summary {
        lines.push(format!("- Genes: {}", s.genes));
        lines.push(format!(
            "- Samples: {} ({} cancer, {} normal)",
            s.samples, s.cancer_samples, s.normal_samples
        ));
        if s.dropped_rows > 0 {
            lines.push(format!(
                "- Rows removed for missing values: {} of {}",
                s.dropped_rows, s.raw_rows
            ));
        }
    }
    lines.push("- sample_type_id: 0 = Normal, 1 = Cancer".to_string());
    lines.join("\n")
}

fn analysis_steps(top_n: usize) -> String {
    [
        "1. PCA (2D and 3D) for sample distribution.".to_string(),
        format!(
            "2. Differential gene expression analysis (Top {} genes) using log2 fold change and t-test.",
            top_n
        ),
        format!("3. Heatmap of Top {} genes.", top_n),
        "4. Volcano plot of all genes.".to_string(),
        "5. k-means clustering of samples.".to_string(),
    ]
    .join("\n")
}

fn key_results(genes: &[TopGeneRow], table_name: &str, summary: Option<&AnalysisSummary>) -> String {
    let mut lines = vec![format!(
        "- Top {} genes identified and saved in '{}'.",
        genes.len(),
        table_name
    )];
    for row in genes.iter().take(KEY_GENES_LISTED) {
        let p = row
            .p_value
            .map_or_else(|| "NA".to_string(), |p| format!("{:.2e}", p));
        lines.push(format!(
            "   {}. {}  log2FC = {:.2}, p = {}",
            row.rank, row.gene, row.log2_fc, p
        ));
    }
    if let Some(s) = summary {
        if s.explained_variance_ratio.len() >= 2 {
            lines.push(format!(
                "- PC1 and PC2 explain {:.1}% and {:.1}% of the variance.",
                s.explained_variance_ratio[0] * 100.0,
                s.explained_variance_ratio[1] * 100.0
            ));
        }
        lines.push(format!(
            "- k-means (k = {}, seed {}) cluster sizes: {:?}.",
            s.cluster_count, s.random_seed, s.cluster_sizes
        ));
        if s.label_disagreements > 0 {
            lines.push(format!(
                "- Group split disagrees with sample labels for {} of {} samples.",
                s.label_disagreements, s.samples
            ));
        }
    }
    lines.push("- Heatmap visualizes expression patterns of the top genes.".to_string());
    lines.push(format!(
        "- 3D PCA interactive plot saved as '{}'.",
        output_writer::PCA_3D_HTML
    ));
    lines.join("\n")
}

/// Collects the report content. Missing or unreadable inputs become
/// placeholder blocks; this never fails.
pub fn build_layout(config: &ReportConfig) -> ReportLayout {
    let summary_path = config.summary_json_path();
    let summary = match output_writer::read_summary(&summary_path) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("Run summary unavailable: {}", e);
            None
        }
    };

    let genes_path = config.top_genes_csv_path();
    let genes = output_writer::read_top_genes(&genes_path);

    let mut blocks = vec![
        Block::Title(REPORT_TITLE.to_string()),
        Block::Spacer(5.0),
        Block::Paragraph {
            text: "This report summarizes the analysis of a liver cancer RNA-seq dataset (TCGA). \
                   The analysis includes PCA, differential gene expression, heatmap, volcano plot, \
                   and 3D PCA visualization."
                .to_string(),
            face: FontFace::Regular,
            size_pt: 12.0,
            line_mm: 6.0,
        },
        Block::Spacer(3.0),
        Block::Heading("Dataset Overview:".to_string()),
    ];
    if summary.is_none() {
        blocks.push(Block::Placeholder(format!(
            "Run summary not available: {}",
            summary_path.display()
        )));
    }
    blocks.push(paragraph(dataset_overview(summary.as_ref())));

    let top_n = match &genes {
        Ok(rows) if !rows.is_empty() => rows.len(),
        _ => summary.as_ref().map_or(20, |s| s.top_genes.len().max(1)),
    };
    blocks.push(Block::Spacer(2.0));
    blocks.push(Block::Heading("Analysis Steps:".to_string()));
    blocks.push(paragraph(analysis_steps(top_n)));

    blocks.push(Block::Spacer(2.0));
    blocks.push(Block::Heading("Key Results:".to_string()));
    match &genes {
        Ok(rows) => {
            let table_name = genes_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| genes_path.display().to_string());
            blocks.push(paragraph(key_results(rows, &table_name, summary.as_ref())));
        }
        Err(e) => {
            warn!("Top-gene table unavailable: {}", e);
            blocks.push(Block::Placeholder(format!(
                "Could not read top genes {}: {}",
                genes_path.display(),
                e
            )));
        }
    }

    blocks.push(Block::Spacer(2.0));
    blocks.push(Block::Heading("Visualizations:".to_string()));
    blocks.push(Block::Spacer(2.0));
    blocks.push(image_block(config.pca_image_path()));
    blocks.push(Block::Spacer(1.0));
    blocks.push(image_block(config.heatmap_image_path()));
    blocks.push(Block::Spacer(5.0));
    blocks.push(Block::Paragraph {
        text: format!(
            "Note: For full interactive visualization, open '{}'. \
             This report summarizes the main findings of the analysis.",
            output_writer::PCA_3D_HTML
        ),
        face: FontFace::Italic,
        size_pt: 10.0,
        line_mm: 5.0,
    });

    ReportLayout { blocks }
}

/// Greedy word wrap at `max_chars`; words longer than a line are split.
/// Leading spaces of each input line are kept as its indent.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    for raw_line in text.split('\n') {
        let indent = " ".repeat(raw_line.chars().take_while(|c| *c == ' ').count());
        let mut current = indent.clone();
        let mut empty = true;
        for word in raw_line.split_whitespace() {
            let mut chars: Vec<char> = word.chars().collect();
            loop {
                let used = current.chars().count();
                if used + usize::from(!empty) + chars.len() <= max_chars {
                    if !empty {
                        current.push(' ');
                    }
                    current.extend(chars);
                    empty = false;
                    break;
                }
                if !empty {
                    lines.push(std::mem::replace(&mut current, indent.clone()));
                    empty = true;
                    continue;
                }
                let room = max_chars.saturating_sub(used).max(1).min(chars.len());
                let rest = chars.split_off(room);
                current.extend(chars);
                lines.push(std::mem::replace(&mut current, indent.clone()));
                chars = rest;
            }
        }
        lines.push(current);
    }
    lines
}

/// Builtin PDF fonts only cover WinAnsi; anything else prints as '?'.
fn pdf_safe(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

fn chars_per_line(size_pt: f32) -> usize {
    let glyph_mm = size_pt * AVG_GLYPH_EM * PT_TO_MM;
    ((PAGE_WIDTH_MM - 2.0 * MARGIN_MM) / glyph_mm).floor() as usize
}

struct Fonts {
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    italic: IndirectFontRef,
}

impl Fonts {
    fn face(&self, face: FontFace) -> &IndirectFontRef {
        match face {
            FontFace::Regular => &self.regular,
            FontFace::Bold => &self.bold,
            FontFace::Italic => &self.italic,
        }
    }
}

/// Top-down cursor over the pages of the document.
struct PageCursor<'a> {
    doc: &'a PdfDocumentReference,
    layer: PdfLayerReference,
    /// Distance from the top edge of the current page.
    y_mm: f32,
    pages: usize,
}

impl<'a> PageCursor<'a> {
    fn ensure_room(&mut self, height_mm: f32) {
        if self.y_mm + height_mm > PAGE_HEIGHT_MM - MARGIN_MM && self.y_mm > MARGIN_MM {
            let (page, layer) = self
                .doc
                .add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
            self.layer = self.doc.get_page(page).get_layer(layer);
            self.y_mm = MARGIN_MM;
            self.pages += 1;
            debug!("Report continues on page {}.", self.pages);
        }
    }

    fn text_line(&mut self, text: &str, font: &IndirectFontRef, size_pt: f32, line_mm: f32, x_mm: f32) {
        self.ensure_room(line_mm);
        // Baseline sits about three quarters down the line box.
        let baseline = self.y_mm + line_mm * 0.75;
        self.layer.use_text(
            pdf_safe(text),
            size_pt,
            Mm(x_mm),
            Mm(PAGE_HEIGHT_MM - baseline),
            font,
        );
        self.y_mm += line_mm;
    }

    fn paragraph(&mut self, text: &str, font: &IndirectFontRef, size_pt: f32, line_mm: f32) {
        for line in wrap_text(text, chars_per_line(size_pt)) {
            self.text_line(&line, font, size_pt, line_mm, MARGIN_MM);
        }
    }
}

/// Draws `layout` onto A4 pages and writes the PDF to `path`.
pub fn render_pdf(layout: &ReportLayout, path: &Path) -> Result<()> {
    let (doc, page, layer) = PdfDocument::new(
        REPORT_TITLE,
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Layer 1",
    );
    let font = |f: BuiltinFont| {
        doc.add_builtin_font(f)
            .map_err(|e| anyhow!("Failed to add builtin font: {}", e))
    };
    let fonts = Fonts {
        regular: font(BuiltinFont::Helvetica)?,
        bold: font(BuiltinFont::HelveticaBold)?,
        italic: font(BuiltinFont::HelveticaOblique)?,
    };

    let mut cursor = PageCursor {
        doc: &doc,
        layer: doc.get_page(page).get_layer(layer),
        y_mm: MARGIN_MM,
        pages: 1,
    };

    for block in &layout.blocks {
        match block {
            Block::Title(text) => {
                let size = 16.0;
                let width = text.chars().count() as f32 * size * AVG_GLYPH_EM * PT_TO_MM * 1.1;
                let x = ((PAGE_WIDTH_MM - width) / 2.0).max(MARGIN_MM);
                cursor.text_line(text, &fonts.bold, size, 10.0, x);
            }
            Block::Heading(text) => cursor.text_line(text, &fonts.bold, 12.0, 6.0, MARGIN_MM),
            Block::Paragraph {
                text,
                face,
                size_pt,
                line_mm,
            } => cursor.paragraph(text, fonts.face(*face), *size_pt, *line_mm),
            Block::Placeholder(text) => cursor.paragraph(text, &fonts.italic, 10.0, 5.0),
            Block::Spacer(mm) => cursor.y_mm += mm,
            Block::Image {
                path: image_path,
                image,
                width_mm,
            } => {
                let (w_px, h_px) = image.dimensions();
                if w_px == 0 || h_px == 0 {
                    warn!("Skipping empty image {}.", image_path.display());
                    continue;
                }
                let height_mm = width_mm * h_px as f32 / w_px as f32;
                cursor.ensure_room(height_mm);
                // dpi chosen so the pixel width maps onto `width_mm`.
                let dpi = w_px as f32 * 25.4 / width_mm;
                Image::from_dynamic_image(image).add_to_layer(
                    cursor.layer.clone(),
                    ImageTransform {
                        translate_x: Some(Mm(MARGIN_MM)),
                        translate_y: Some(Mm(PAGE_HEIGHT_MM - cursor.y_mm - height_mm)),
                        dpi: Some(dpi),
                        ..Default::default()
                    },
                );
                cursor.y_mm += height_mm;
            }
        }
    }
    let pages = cursor.pages;

    let file = File::create(path)
        .map_err(|e| anyhow!("Failed to create report {}: {}", path.display(), e))?;
    doc.save(&mut BufWriter::new(file))
        .map_err(|e| anyhow!("Failed to write report {}: {}", path.display(), e))?;
    info!("Report written to {} ({} page(s)).", path.display(), pages);
    Ok(())
}

/// Builds the layout from the configured artifacts and writes the PDF.
/// Returns the path of the written report.
pub fn assemble_report(config: &ReportConfig) -> Result<PathBuf> {
    let layout = build_layout(config);
    let placeholders = layout.placeholders().count();
    if placeholders > 0 {
        warn!("Report contains {} placeholder(s) for missing inputs.", placeholders);
    }
    let output = config.output_pdf_path();
    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow!("Failed to create output directory {}: {}", parent.display(), e)
            })?;
            info!("Created output directory: {}", parent.display());
        }
    }
    render_pdf(&layout, &output)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_respects_width_and_explicit_breaks() {
        let lines = wrap_text("alpha beta gamma delta\n- one two", 11);
        assert_eq!(lines, vec!["alpha beta", "gamma delta", "- one two"]);
        assert!(lines.iter().all(|l| l.chars().count() <= 11));
    }

    #[test]
    fn wrap_splits_overlong_words() {
        let lines = wrap_text("ENSG00000123456789", 8);
        assert_eq!(lines, vec!["ENSG0000", "01234567", "89"]);
    }

    #[test]
    fn wrap_keeps_leading_indent() {
        let lines = wrap_text("   1. ALB  log2FC = 2.00", 60);
        assert_eq!(lines, vec!["   1. ALB log2FC = 2.00"]);
    }

    #[test]
    fn non_ascii_is_replaced() {
        assert_eq!(pdf_safe("TP53 \u{2013} p\u{2264}0.05"), "TP53 ? p?0.05");
    }

    #[test]
    fn empty_directory_yields_placeholders_for_everything() {
        let dir = tempfile::tempdir().unwrap();
        let layout = build_layout(&ReportConfig::new(dir.path()));
        let placeholders: Vec<&str> = layout.placeholders().collect();
        assert_eq!(placeholders.len(), 4);
        assert!(placeholders
            .iter()
            .any(|p| p.contains(output_writer::PCA_2D_PNG)));
        assert_eq!(layout.image_paths().count(), 0);
        assert!(matches!(&layout.blocks[0], Block::Title(t) if t == REPORT_TITLE));
    }
}
