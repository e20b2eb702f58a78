//! Visualization functions using Plotters for the segmented CLTV table

use plotters::prelude::*;
use std::path::{Path, PathBuf};

use crate::report::CltvTable;

/// Color palette for segments, lowest rank first
const SEGMENT_COLORS: [RGBColor; 5] = [RED, MAGENTA, BLUE, GREEN, CYAN];

fn segment_color(rank: usize) -> RGBColor {
    SEGMENT_COLORS.get(rank).copied().unwrap_or(BLACK)
}

/// Scatter plot of expected purchases against CLV, colored by segment
///
/// # Arguments
/// * `table` - Segmented CLTV table
/// * `output_path` - Path to save the SVG plot
/// * `plot_title` - Title for the plot
pub fn create_clv_scatter(
    table: &CltvTable,
    output_path: &Path,
    plot_title: Option<&str>,
) -> crate::Result<()> {
    if table.is_empty() {
        anyhow::bail!("No customers to plot");
    }
    let title = plot_title.unwrap_or("Expected Purchases vs CLV (Colored by Segment)");

    let rows = table.rows();
    let (x_min, x_max) = bounds(rows.iter().map(|r| r.expected_purchases_horizon));
    let (y_min, y_max) = bounds(rows.iter().map(|r| r.clv));

    let root = SVGBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(50)
        .y_label_area_size(70)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Expected purchases")
        .y_desc("CLV")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    for summary in table.segment_summary() {
        let segment = summary.segment;
        let color = segment_color(segment.rank());
        chart
            .draw_series(
                rows.iter()
                    .filter(|r| r.segment == segment)
                    .map(|r| Circle::new((r.expected_purchases_horizon, r.clv), 4, color.filled())),
            )?
            .label(format!("Segment {}", segment))
            .legend(move |(x, y)| Circle::new((x + 5, y), 4, color.filled()));
    }

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;

    root.present()?;
    log::info!("CLV scatter saved to {}", output_path.display());
    Ok(())
}

/// Bar chart of mean CLV per segment, highest segment first
pub fn create_segment_value_chart(table: &CltvTable, output_path: &Path) -> crate::Result<()> {
    let summaries = table.segment_summary();
    if summaries.is_empty() {
        anyhow::bail!("No segments to plot");
    }
    let max_mean = summaries
        .iter()
        .map(|s| s.mean_clv)
        .fold(0.0_f64, f64::max)
        .max(1.0);
    let min_mean = summaries.iter().map(|s| s.mean_clv).fold(0.0_f64, f64::min);

    let root = SVGBackend::new(output_path, (600, 400)).into_drawing_area();
    root.fill(&WHITE)?;

    let labels: Vec<String> = summaries.iter().map(|s| s.segment.to_string()).collect();
    let mut chart = ChartBuilder::on(&root)
        .caption("Mean CLV by Segment", ("sans-serif", 30))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(-0.5f64..(summaries.len() as f64 - 0.5), (min_mean * 1.1)..(max_mean * 1.1))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(summaries.len())
        .x_label_formatter(&|x| {
            labels
                .get(x.round() as usize)
                .cloned()
                .unwrap_or_default()
        })
        .x_desc("Segment")
        .y_desc("Mean CLV")
        .axis_desc_style(("sans-serif", 15))
        .draw()?;

    chart.draw_series(summaries.iter().enumerate().map(|(i, summary)| {
        let color = segment_color(summary.segment.rank());
        Rectangle::new(
            [(i as f64 - 0.4, 0.0), (i as f64 + 0.4, summary.mean_clv)],
            color.filled(),
        )
    }))?;

    root.present()?;
    log::info!("Segment value chart saved to {}", output_path.display());
    Ok(())
}

/// Write both charts; the bar chart goes next to the scatter with a `_segments` suffix
///
/// # Returns
/// * Paths of the files written
pub fn generate_visualization_report(
    table: &CltvTable,
    base_output_path: &Path,
) -> crate::Result<Vec<PathBuf>> {
    let scatter_path = base_output_path.with_extension("svg");
    create_clv_scatter(table, &scatter_path, None)?;

    let stem = scatter_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "cltv".to_string());
    let segments_path = scatter_path.with_file_name(format!("{}_segments.svg", stem));
    create_segment_value_chart(table, &segments_path)?;

    Ok(vec![scatter_path, segments_path])
}

/// Padded min/max of a series
fn bounds(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let pad = ((max - min) * 0.05).max(0.5);
    (min - pad, max + pad)
}
