// interactive.rs

use crate::matrix_ops::SampleType;
use crate::pca_runner::PcaEmbedding;
use anyhow::{anyhow, Result};
use log::info;
use serde::Serialize;
use std::path::Path;

#[derive(Serialize)]
struct ScatterPoint<'a> {
    sample: &'a str,
    sample_type: &'static str,
    cluster: usize,
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Serialize)]
struct ScatterData<'a> {
    title: &'a str,
    axes: [String; 3],
    points: Vec<ScatterPoint<'a>>,
}

const TEMPLATE_HEAD: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>3D PCA of Liver RNA-seq Samples</title>
<style>
body { font-family: sans-serif; margin: 0; background: #fafafa; }
h1 { font-size: 20px; margin: 12px 16px; }
#legend { margin: 0 16px; font-size: 14px; }
#legend span { display: inline-block; width: 12px; height: 12px; border-radius: 6px; margin: 0 4px 0 12px; vertical-align: middle; }
#plot { display: block; margin: 8px 16px; background: #fff; border: 1px solid #ddd; cursor: grab; }
#tip { position: absolute; pointer-events: none; background: rgba(0,0,0,0.75); color: #fff; padding: 3px 6px; font-size: 12px; border-radius: 3px; display: none; }
</style>
</head>
<body>
<h1 id="title"></h1>
<div id="legend"><span style="background:#1f77b4"></span>Normal<span style="background:#d62728"></span>Cancer &nbsp; (drag to rotate, wheel to zoom)</div>
<canvas id="plot" width="900" height="650"></canvas>
<div id="tip"></div>
<script>
const DATA = "##;

const TEMPLATE_TAIL: &str = r##";
(function () {
  const canvas = document.getElementById("plot");
  const ctx = canvas.getContext("2d");
  const tip = document.getElementById("tip");
  document.getElementById("title").textContent = DATA.title;
  const colors = { Normal: "#1f77b4", Cancer: "#d62728" };

  const pts = DATA.points;
  const center = [0, 0, 0];
  let radius = 0;
  for (const p of pts) { center[0] += p.x; center[1] += p.y; center[2] += p.z; }
  if (pts.length) { center[0] /= pts.length; center[1] /= pts.length; center[2] /= pts.length; }
  for (const p of pts) {
    radius = Math.max(radius, Math.hypot(p.x - center[0], p.y - center[1], p.z - center[2]));
  }
  if (radius === 0) { radius = 1; }

  let yaw = 0.6, pitch = 0.4, zoom = 1.0, dragging = null, projected = [];

  function project(v) {
    const x = (v[0] - center[0]) / radius, y = (v[1] - center[1]) / radius, z = (v[2] - center[2]) / radius;
    const cx = Math.cos(yaw) * x - Math.sin(yaw) * z;
    const cz = Math.sin(yaw) * x + Math.cos(yaw) * z;
    const cy = Math.cos(pitch) * y - Math.sin(pitch) * cz;
    const depth = Math.sin(pitch) * y + Math.cos(pitch) * cz;
    const scale = Math.min(canvas.width, canvas.height) * 0.38 * zoom / (1 + 0.25 * depth);
    return [canvas.width / 2 + cx * scale, canvas.height / 2 - cy * scale, depth];
  }

  function draw() {
    ctx.clearRect(0, 0, canvas.width, canvas.height);
    const origin = project(center);
    DATA.axes.forEach(function (name, i) {
      const end = center.slice();
      end[i] += radius;
      const q = project(end);
      ctx.strokeStyle = "#999";
      ctx.beginPath(); ctx.moveTo(origin[0], origin[1]); ctx.lineTo(q[0], q[1]); ctx.stroke();
      ctx.fillStyle = "#444"; ctx.font = "13px sans-serif"; ctx.fillText(name, q[0] + 4, q[1] - 4);
    });
    projected = pts.map(function (p) { return { p: p, q: project([p.x, p.y, p.z]) }; });
    projected.sort(function (a, b) { return b.q[2] - a.q[2]; });
    for (const item of projected) {
      ctx.fillStyle = colors[item.p.sample_type] || "#333";
      ctx.globalAlpha = 0.85;
      ctx.beginPath(); ctx.arc(item.q[0], item.q[1], 5, 0, 2 * Math.PI); ctx.fill();
    }
    ctx.globalAlpha = 1.0;
  }

  canvas.addEventListener("mousedown", function (e) { dragging = [e.clientX, e.clientY]; });
  window.addEventListener("mouseup", function () { dragging = null; });
  window.addEventListener("mousemove", function (e) {
    if (dragging) {
      yaw += (e.clientX - dragging[0]) * 0.01;
      pitch = Math.max(-1.5, Math.min(1.5, pitch + (e.clientY - dragging[1]) * 0.01));
      dragging = [e.clientX, e.clientY];
      draw();
      return;
    }
    const rect = canvas.getBoundingClientRect();
    const mx = e.clientX - rect.left, my = e.clientY - rect.top;
    let hit = null;
    for (const item of projected) {
      if (Math.hypot(item.q[0] - mx, item.q[1] - my) < 6) { hit = item; }
    }
    if (hit) {
      tip.style.display = "block";
      tip.style.left = (e.pageX + 10) + "px";
      tip.style.top = (e.pageY + 10) + "px";
      tip.textContent = hit.p.sample + " (" + hit.p.sample_type + ", cluster " + hit.p.cluster + ")";
    } else {
      tip.style.display = "none";
    }
  });
  canvas.addEventListener("wheel", function (e) {
    e.preventDefault();
    zoom = Math.max(0.2, Math.min(5, zoom * (e.deltaY < 0 ? 1.1 : 0.9)));
    draw();
  }, { passive: false });

  draw();
})();
</script>
</body>
</html>
"##;

/// Renders a self-contained HTML page with a rotatable 3D scatter of the
/// first three components. No external scripts are referenced.
pub fn render_pca_3d_html(
    embedding: &PcaEmbedding,
    sample_ids: &[String],
    sample_types: &[SampleType],
    clusters: &[usize],
) -> Result<String> {
    if embedding.num_components() < 3 {
        return Err(anyhow!(
            "3D PCA view needs 3 components, embedding has {}",
            embedding.num_components()
        ));
    }
    let ratio = &embedding.explained_variance_ratio;
    let axes = [0, 1, 2].map(|k| format!("PC{} ({:.1}%)", k + 1, ratio[k] * 100.0));
    let points = embedding
        .coordinates
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| ScatterPoint {
            sample: &sample_ids[i],
            sample_type: sample_types[i].name(),
            cluster: clusters[i],
            x: row[0],
            y: row[1],
            z: row[2],
        })
        .collect();
    let data = ScatterData {
        title: "3D PCA of Liver RNA-seq Samples",
        axes,
        points,
    };
    // "</" inside a string literal would close the script element early.
    let json = serde_json::to_string(&data)?.replace("</", "<\\/");
    Ok(format!("{}{}{}", TEMPLATE_HEAD, json, TEMPLATE_TAIL))
}

pub fn write_pca_3d_html(
    path: &Path,
    embedding: &PcaEmbedding,
    sample_ids: &[String],
    sample_types: &[SampleType],
    clusters: &[usize],
) -> Result<()> {
    let html = render_pca_3d_html(embedding, sample_ids, sample_types, clusters)?;
    std::fs::write(path, html)
        .map_err(|e| anyhow!("Failed to write {}: {}", path.display(), e))?;
    info!("Saved interactive 3D PCA view to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn embedding(k: usize) -> PcaEmbedding {
        let full = array![[1.0, 2.0, 3.0], [-1.0, -2.0, -3.0]];
        PcaEmbedding {
            coordinates: full.slice(ndarray::s![.., 0..k]).to_owned(),
            explained_variance: vec![1.0; k],
            explained_variance_ratio: vec![0.5, 0.3, 0.2][..k].to_vec(),
        }
    }

    #[test]
    fn html_embeds_points_without_external_resources() {
        let html = render_pca_3d_html(
            &embedding(3),
            &["T-01</script>".to_string(), "N-01".to_string()],
            &[SampleType::Cancer, SampleType::Normal],
            &[0, 1],
        )
        .unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("\"sample_type\":\"Cancer\""));
        assert!(html.contains("PC1 (50.0%)"));
        assert!(html.contains("T-01<\\/script>"));
        assert!(!html.contains("http://") && !html.contains("https://"));
    }

    #[test]
    fn script_keeps_colour_literals_and_closes_page() {
        let html = render_pca_3d_html(
            &embedding(3),
            &["T-01".to_string(), "N-01".to_string()],
            &[SampleType::Cancer, SampleType::Normal],
            &[0, 1],
        )
        .unwrap();
        for colour in ["\"#1f77b4\"", "\"#d62728\"", "\"#999\"", "\"#444\"", "\"#333\""] {
            assert!(html.contains(colour), "missing {}", colour);
        }
        assert!(html.trim_end().ends_with("</html>"));
        assert_eq!(html.matches("<script>").count(), 1);
        assert_eq!(html.matches("</script>").count(), 1);
    }

    #[test]
    fn needs_three_components() {
        let err = render_pca_3d_html(
            &embedding(2),
            &["a".to_string(), "b".to_string()],
            &[SampleType::Cancer, SampleType::Normal],
            &[0, 1],
        );
        assert!(err.is_err());
    }
}
