//! Pictures of resolution curves and of slice fits

use crate::{
    curve::Curve,
    error::{Error, Result},
    fit::{DoubleGaussian, Gaussian, Model},
    hist::Hist1D,
    resolution::SliceFit,
};
use plotters::{
    coord::{types::RangedCoordf64, Shift},
    prelude::*,
};
use std::{fmt::Display, path::Path};

/// Picture size in pixels
const SIZE: (u32, u32) = (1024, 768);

/// Number of points used to draw fitted functions
const FUNCTION_POINTS: usize = 200;

/// Colors assigned to successive curves
const PALETTE: [RGBColor; 6] = [
    RGBColor(0, 0, 0),
    RGBColor(200, 0, 100),
    RGBColor(30, 144, 255),
    RGBColor(34, 139, 34),
    RGBColor(255, 140, 0),
    RGBColor(128, 0, 128),
];

fn render_error(e: impl Display) -> Error {
    Error::Render(e.to_string())
}

/// Whether points are marked on top of the line joining them
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineStyle {
    /// Plain line
    Line,
    /// Line with a marker on every point
    LineAndMarkers,
}

/// Appearance of one curve
#[derive(Clone, Debug, PartialEq)]
pub struct CurveStyle {
    /// Legend entry
    pub label: String,
    /// Line and marker color
    pub color: RGBColor,
    /// Line width in pixels
    pub line_width: u32,
    /// Line style
    pub line_style: LineStyle,
}
//
impl CurveStyle {
    /// Default style of the n-th curve of a canvas
    ///
    /// Colors cycle through a fixed palette, and markers are added once the
    /// palette has been exhausted so that curves remain distinguishable.
    pub fn nth(n: usize, label: &str) -> Self {
        Self {
            label: label.to_owned(),
            color: PALETTE[n % PALETTE.len()],
            line_width: 2,
            line_style: if (n / PALETTE.len()) % 2 == 0 {
                LineStyle::Line
            } else {
                LineStyle::LineAndMarkers
            },
        }
    }
}

/// Layout shared by all curves of a picture
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Canvas {
    /// Title drawn on top
    pub title: String,
    /// Horizontal axis description
    pub x_label: String,
    /// Vertical axis description
    pub y_label: String,
    /// Fixed vertical range, or None to fit it to the curves
    pub y_range: Option<(f64, f64)>,
    /// Logarithmic vertical axis
    pub log_y: bool,
}
//
impl Canvas {
    /// Vertical range of the picture
    pub fn y_range(&self, curves: &[Curve]) -> (f64, f64) {
        if let Some(range) = self.y_range {
            return range;
        }
        let points = curves.iter().flat_map(|c| c.points());
        let (mut low, mut high) = points.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            let (y, ey) = (p.y as f64, p.ey as f64);
            (lo.min(y - ey), hi.max(y + ey))
        });
        if !(low.is_finite() && high.is_finite()) {
            return if self.log_y { (0.1, 10.) } else { (0., 1.) };
        }
        if self.log_y {
            low = curves
                .iter()
                .flat_map(|c| c.ys())
                .map(|y| y as f64)
                .filter(|&y| y > 0.)
                .fold(f64::INFINITY, f64::min);
            if !low.is_finite() {
                return (0.1, 10.);
            }
            return (low / 2., high.max(low) * 2.);
        }
        let margin = if high > low { 0.1 * (high - low) } else { 1. };
        low -= margin;
        high += margin;
        (low, high)
    }
}

/// Horizontal range spanned by some curves
fn x_range(curves: &[Curve]) -> (f64, f64) {
    let (low, high) = curves
        .iter()
        .flat_map(|c| c.xs())
        .map(|x| x as f64)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
            (lo.min(x), hi.max(x))
        });
    if !(low.is_finite() && high.is_finite()) {
        (0., 1.)
    } else if high > low {
        let margin = 0.05 * (high - low);
        (low - margin, high + margin)
    } else {
        (low - 1., high + 1.)
    }
}

/// Draw curves into `<base>.png` and `<base>.svg`
pub fn draw_curves(base: &Path, curves: &[Curve], styles: &[CurveStyle], canvas: &Canvas) -> Result<()> {
    if styles.len() != curves.len() {
        return Err(Error::Cardinality {
            what: "curve styles",
            expected: curves.len(),
            found: styles.len(),
        });
    }
    let png = format!("{}.png", base.display());
    let root = BitMapBackend::new(&png, SIZE).into_drawing_area();
    draw_canvas(root, curves, styles, canvas).map_err(render_error)?;
    let svg = format!("{}.svg", base.display());
    let root = SVGBackend::new(&svg, SIZE).into_drawing_area();
    draw_canvas(root, curves, styles, canvas).map_err(render_error)
}

fn draw_canvas<DB>(
    root: DrawingArea<DB, Shift>,
    curves: &[Curve],
    styles: &[CurveStyle],
    canvas: &Canvas,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let (x_min, x_max) = x_range(curves);
    let (y_min, y_max) = canvas.y_range(curves);

    let mut builder = ChartBuilder::on(&root);
    builder
        .caption(&canvas.title, ("sans-serif", 24))
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40);

    if canvas.log_y {
        let mut chart = builder.build_cartesian_2d(x_min..x_max, (y_min..y_max).log_scale())?;
        chart
            .configure_mesh()
            .x_desc(&canvas.x_label)
            .y_desc(&canvas.y_label)
            .draw()?;
        plot_curves(&mut chart, curves, styles, y_min)?;
    } else {
        let mut chart = builder.build_cartesian_2d(x_min..x_max, y_min..y_max)?;
        chart
            .configure_mesh()
            .x_desc(&canvas.x_label)
            .y_desc(&canvas.y_label)
            .draw()?;
        plot_curves(&mut chart, curves, styles, y_min)?;
    }
    root.present()
}

fn plot_curves<'a, DB, Y>(
    chart: &mut ChartContext<'a, DB, Cartesian2d<RangedCoordf64, Y>>,
    curves: &[Curve],
    styles: &[CurveStyle],
    y_floor: f64,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>>
where
    DB: DrawingBackend + 'a,
    DB::ErrorType: 'static,
    Y: Ranged<ValueType = f64>,
{
    for (curve, style) in curves.iter().zip(styles) {
        let (color, width) = (style.color, style.line_width);
        let shape = color.stroke_width(width);
        let points = curve
            .points()
            .iter()
            .map(|p| (p.x as f64, p.y as f64, p.ey as f64))
            .collect::<Vec<_>>();

        chart
            .draw_series(LineSeries::new(points.iter().map(|&(x, y, _)| (x, y)), shape))?
            .label(style.label.as_str())
            .legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 30, y)], color.stroke_width(width))
            });
        chart.draw_series(
            points
                .iter()
                .filter(|&&(_, _, ey)| ey > 0.)
                .map(|&(x, y, ey)| ErrorBar::new_vertical(x, (y - ey).max(y_floor), y, y + ey, shape, 6)),
        )?;
        if style.line_style == LineStyle::LineAndMarkers {
            chart.draw_series(
                points
                    .iter()
                    .map(|&(x, y, _)| Circle::new((x, y), 4, color.filled())),
            )?;
        }
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .position(SeriesLabelPosition::UpperRight)
        .draw()
}

/// Draw a slice histogram with its loose and double Gaussian fits into a PNG
pub fn dump_fit(path: &Path, slice: &Hist1D, fits: &SliceFit) -> Result<()> {
    let root = BitMapBackend::new(path, SIZE).into_drawing_area();
    draw_fit(root, slice, fits).map_err(render_error)
}

fn draw_fit<DB>(
    root: DrawingArea<DB, Shift>,
    slice: &Hist1D,
    fits: &SliceFit,
) -> std::result::Result<(), DrawingAreaErrorKind<DB::ErrorType>>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let axis = slice.axis();
    let (x_min, x_max) = (axis.min as f64, axis.max as f64);
    let y_max = slice
        .bins()
        .map(|(_, content, error)| (content + error) as f64)
        .fold(0., f64::max);
    let y_max = if y_max > 0. { 1.2 * y_max } else { 1. };

    let mut chart = ChartBuilder::on(&root)
        .caption(slice.name(), ("sans-serif", 24))
        .margin(20)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(x_min..x_max, 0.0..y_max)?;
    chart.configure_mesh().draw()?;

    chart.draw_series(slice.bins().map(|(x, content, error)| {
        let (x, y, ey) = (x as f64, content as f64, error as f64);
        ErrorBar::new_vertical(x, (y - ey).max(0.), y, y + ey, BLACK.filled(), 4)
    }))?;

    let step = (x_max - x_min) / FUNCTION_POINTS as f64;
    let xs = (0..=FUNCTION_POINTS).map(|i| x_min + step * i as f64);
    let sample = |f: &dyn Fn(f64) -> f64| xs.clone().map(|x| (x, f(x))).collect::<Vec<_>>();

    let loose = sample(&|x| Gaussian.eval(x as _, &fits.loose.params) as f64);
    chart
        .draw_series(LineSeries::new(loose, PALETTE[2].stroke_width(2)))?
        .label(Gaussian.name())
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], PALETTE[2]));

    let params = &fits.mixture.params;
    let mixture = sample(&|x| DoubleGaussian.eval(x as _, params) as f64);
    chart
        .draw_series(LineSeries::new(mixture, PALETTE[1].stroke_width(2)))?
        .label(DoubleGaussian.name())
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], PALETTE[1]));

    for which in 0..2 {
        let component = DoubleGaussian::component(params, which);
        let points = sample(&|x| Gaussian.eval(x as _, &component) as f64);
        chart.draw_series(LineSeries::new(points, PALETTE[1].mix(0.5)))?;
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;
    root.present()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::CurvePoint;

    fn curve(points: &[(f64, f64, f64)]) -> Curve {
        Curve::from_points(
            points
                .iter()
                .map(|&(x, y, ey)| CurvePoint {
                    x: x as _,
                    y: y as _,
                    ey: ey as _,
                })
                .collect(),
        )
    }

    #[test]
    fn automatic_ranges() {
        let curves = [curve(&[(10., 1., 0.5), (30., 3., 0.5)])];
        assert_eq!(x_range(&curves), (9., 31.));
        let canvas = Canvas::default();
        let (low, high) = canvas.y_range(&curves);
        assert!((low - 0.2).abs() < 1e-9);
        assert!((high - 3.8).abs() < 1e-9);

        let log = Canvas {
            log_y: true,
            ..Canvas::default()
        };
        assert_eq!(log.y_range(&curves), (0.5, 7.));

        let fixed = Canvas {
            y_range: Some((0., 2.)),
            ..Canvas::default()
        };
        assert_eq!(fixed.y_range(&curves), (0., 2.));
        assert_eq!(canvas.y_range(&[]), (0., 1.));
        assert_eq!(x_range(&[curve(&[(5., 1., 0.)])]), (4., 6.));
    }

    #[test]
    fn styles_cycle_through_palette() {
        let first = CurveStyle::nth(0, "data");
        let wrapped = CurveStyle::nth(PALETTE.len(), "mc");
        assert_eq!(first.color, wrapped.color);
        assert_eq!(first.line_style, LineStyle::Line);
        assert_eq!(wrapped.line_style, LineStyle::LineAndMarkers);
        assert_ne!(CurveStyle::nth(1, "x").color, first.color);
    }

    #[test]
    fn one_style_per_curve() {
        let dir = tempfile::tempdir().unwrap();
        let curves = [curve(&[(1., 1., 0.)]), curve(&[(1., 2., 0.)])];
        let err = draw_curves(
            &dir.path().join("canvas"),
            &curves,
            &[CurveStyle::nth(0, "only one")],
            &Canvas::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Cardinality { expected: 2, found: 1, .. }));
    }
}
