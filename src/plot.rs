use std::{fmt::Display, fs, path::Path};

use plotters::prelude::*;
use tracing::info;

use crate::{
    error::{Error, Result},
    results::{CurvePoint, Metric},
};

const PLOT_SIZE: (u32, u32) = (1000, 700);

/// Margins around the data on each axis (lower, upper multipliers).
const X_MARGINS: (f64, f64) = (0.8, 1.25);
const Y_MARGINS: (f64, f64) = (0.8, 1.25);

fn plot_error(err: impl Display) -> Error {
    Error::Plot(err.to_string())
}

/// Draws mean `metric` against dataset size. The band spans ±1 population
/// standard deviation across seeds (`CurvePoint::std`), not a bootstrapped
/// confidence interval. Sizes are on a log axis, loss values too.
pub fn render_curves(points: &[CurvePoint], metric: Metric, path: &Path) -> Result<()> {
    if points.is_empty() {
        return Err(Error::Plot(format!("no {metric} values to plot")));
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let min_x = points.iter().map(|p| p.size).min().unwrap_or(1).max(1) as f64;
    let max_x = points.iter().map(|p| p.size).max().unwrap_or(1).max(1) as f64;
    let x_range = (min_x * X_MARGINS.0)..(max_x * X_MARGINS.1);

    let root = BitMapBackend::new(path, PLOT_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    match metric {
        Metric::Loss => {
            let floor = positive_floor(points);
            let max_y = points
                .iter()
                .map(|p| p.mean + p.std)
                .fold(floor, f64::max);

            let mut chart = ChartBuilder::on(&root)
                .caption("Probe loss vs dataset size", ("sans-serif", 30).into_font())
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(
                    x_range.log_scale(),
                    ((floor * Y_MARGINS.0)..(max_y * Y_MARGINS.1)).log_scale(),
                )
                .map_err(plot_error)?;

            chart
                .configure_mesh()
                .x_desc("Dataset size")
                .y_desc("Loss")
                .draw()
                .map_err(plot_error)?;

            draw_curve(&mut chart, points, floor, f64::INFINITY)?;
        }
        Metric::Accuracy => {
            let mut chart = ChartBuilder::on(&root)
                .caption(
                    "Probe accuracy vs dataset size",
                    ("sans-serif", 30).into_font(),
                )
                .margin(10)
                .x_label_area_size(40)
                .y_label_area_size(60)
                .build_cartesian_2d(x_range.log_scale(), 0.0..1.0)
                .map_err(plot_error)?;

            chart
                .configure_mesh()
                .x_desc("Dataset size")
                .y_desc("Accuracy")
                .draw()
                .map_err(plot_error)?;

            draw_curve(&mut chart, points, 0.0, 1.0)?;
        }
    }

    root.present().map_err(plot_error)?;
    info!(path = %path.display(), %metric, points = points.len(), "plot written");
    Ok(())
}

// smallest positive value the band reaches, the lower edge of a log axis
fn positive_floor(points: &[CurvePoint]) -> f64 {
    let lowest = points
        .iter()
        .flat_map(|p| [p.mean - p.std, p.mean])
        .filter(|v| *v > 0.0)
        .fold(f64::INFINITY, f64::min);
    if lowest.is_finite() {
        lowest
    } else {
        1e-6
    }
}

fn draw_curve<X, Y>(
    chart: &mut ChartContext<'_, BitMapBackend<'_>, Cartesian2d<X, Y>>,
    points: &[CurvePoint],
    y_min: f64,
    y_max: f64,
) -> Result<()>
where
    X: Ranged<ValueType = f64>,
    Y: Ranged<ValueType = f64>,
{
    let clamp = |v: f64| v.clamp(y_min, y_max);

    // band: upper edge left to right, lower edge back
    let band: Vec<(f64, f64)> = points
        .iter()
        .map(|p| (p.size as f64, clamp(p.mean + p.std)))
        .chain(
            points
                .iter()
                .rev()
                .map(|p| (p.size as f64, clamp(p.mean - p.std))),
        )
        .collect();
    chart
        .draw_series(std::iter::once(Polygon::new(band, BLUE.mix(0.2))))
        .map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(
            points.iter().map(|p| (p.size as f64, clamp(p.mean))),
            &BLUE,
        ))
        .map_err(plot_error)?;

    chart
        .draw_series(
            points
                .iter()
                .map(|p| Circle::new((p.size as f64, clamp(p.mean)), 3, BLUE.filled())),
        )
        .map_err(plot_error)?;

    Ok(())
}
