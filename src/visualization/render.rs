use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use plotters::prelude::*;
use plotters::style::{FontStyle, register_font};
use tracing::warn;

use super::{Projection, VisualizationError};
use crate::config::PlotSettings;
use crate::table::ensure_parent_dir;

const FONT_FAMILY: &str = "sans-serif";

/// matplotlib's tab10 cycle.
const TAB10: [RGBColor; 10] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
    RGBColor(188, 189, 34),
    RGBColor(23, 190, 207),
];

static REGISTERED_FONT: Mutex<Option<PathBuf>> = Mutex::new(None);

/// Distinct labels in first-seen order.
pub(crate) fn label_order(labels: &[String]) -> Vec<&str> {
    let mut order: Vec<&str> = Vec::new();
    for label in labels {
        if !order.contains(&label.as_str()) {
            order.push(label);
        }
    }
    order
}

pub(crate) fn label_color(index: usize) -> RGBColor {
    TAB10[index % TAB10.len()]
}

/// Register the TTF at `font_path` under the default family.
///
/// Returns false (and logs) when text has to be skipped.
fn ensure_font(font_path: Option<&Path>) -> bool {
    let Some(path) = font_path else {
        warn!("No plot font configured; rendering without text");
        return false;
    };
    let mut registered = match REGISTERED_FONT.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if registered.as_deref() == Some(path) {
        return true;
    }
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(
                "Plot font {} unavailable ({err}); rendering without text",
                path.display()
            );
            return false;
        }
    };
    // The registry keeps a 'static reference for the lifetime of the process.
    let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
    if register_font(FONT_FAMILY, FontStyle::Normal, bytes).is_err() {
        warn!(
            "Plot font {} is not a valid TTF; rendering without text",
            path.display()
        );
        return false;
    }
    *registered = Some(path.to_path_buf());
    true
}

fn padded_range(values: impl Iterator<Item = f32>) -> Range<f64> {
    let (min, max) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v as f64), hi.max(v as f64))
        });
    if !min.is_finite() || !max.is_finite() {
        return -1.0..1.0;
    }
    let pad = ((max - min) * 0.05).max(1e-3);
    (min - pad)..(max + pad)
}

/// Draw a 3-D scatter of `projection` to `path`, one color per label.
///
/// The image format follows the file extension.
pub fn render_scatter(
    projection: &Projection,
    settings: &PlotSettings,
    path: &Path,
) -> Result<(), VisualizationError> {
    ensure_parent_dir(path)?;
    let with_text = ensure_font(settings.font_path.as_deref());
    let render_err = |message: String| VisualizationError::Render {
        path: path.to_path_buf(),
        message,
    };
    let size = settings.image_size();
    let scale = settings.dpi.max(1) as f64 / 100.0;
    let column = |index: usize| (0..projection.len()).map(move |row| projection.point(row)[index]);
    let x_range = padded_range(column(0));
    let y_range = padded_range(column(1));
    let z_range = padded_range(column(2));

    let root = BitMapBackend::new(path, (size, size)).into_drawing_area();
    root.fill(&WHITE).map_err(|err| render_err(err.to_string()))?;
    let mut builder = ChartBuilder::on(&root);
    builder.margin((20.0 * scale) as u32);
    if with_text {
        builder.caption(
            projection.kind.title(),
            (FONT_FAMILY, 16.0 * scale).into_font(),
        );
    }
    let mut chart = builder
        .build_cartesian_3d(x_range.clone(), y_range.clone(), z_range.clone())
        .map_err(|err| render_err(err.to_string()))?;
    chart.with_projection(|mut pb| {
        pb.yaw = 0.6;
        pb.pitch = 0.35;
        pb.scale = 0.85;
        pb.into_matrix()
    });
    let label_style = (FONT_FAMILY, 9.0 * scale).into_font();
    let mut axes = chart.configure_axes();
    axes.light_grid_style(BLACK.mix(0.08))
        .max_light_lines(3)
        .label_style(label_style.clone());
    if !with_text {
        axes.x_labels(0).y_labels(0).z_labels(0);
    }
    axes.draw().map_err(|err| render_err(err.to_string()))?;

    if with_text {
        let [x_label, y_label, z_label] = projection.kind.axis_labels();
        let title_style = (FONT_FAMILY, 11.0 * scale).into_font();
        let anchors = [
            (x_label, (x_range.end, y_range.start, z_range.start)),
            (y_label, (x_range.start, y_range.end, z_range.start)),
            (z_label, (x_range.start, y_range.start, z_range.end)),
        ];
        chart
            .draw_series(
                anchors
                    .into_iter()
                    .map(|(text, at)| Text::new(text.to_string(), at, title_style.clone())),
            )
            .map_err(|err| render_err(err.to_string()))?;
    }

    let radius = (2.0 * scale).round().max(1.0) as i32;
    for (index, label) in label_order(&projection.labels).into_iter().enumerate() {
        let color = label_color(index);
        let points = projection
            .labels
            .iter()
            .enumerate()
            .filter(|(_, value)| value.as_str() == label)
            .map(|(row, _)| {
                let [x, y, z] = projection.point(row);
                Circle::new((x as f64, y as f64, z as f64), radius, color.mix(0.7).filled())
            });
        let series = chart
            .draw_series(points)
            .map_err(|err| render_err(err.to_string()))?;
        if with_text {
            let legend_label = if label.is_empty() { "(none)" } else { label };
            series
                .label(legend_label)
                .legend(move |(x, y)| Circle::new((x, y), radius + 1, color.filled()));
        }
    }
    if with_text {
        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .label_font(label_style)
            .background_style(WHITE.mix(0.8))
            .border_style(BLACK)
            .draw()
            .map_err(|err| render_err(err.to_string()))?;
    }
    root.present().map_err(|err| render_err(err.to_string()))?;
    Ok(())
}
