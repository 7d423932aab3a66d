//! Resolution curves from bin-by-bin double Gaussian fits
//!
//! A 2-D distribution of some residual (y) versus some kinematic variable
//! (x) is sliced along x. Each slice is first fitted with a single "loose"
//! Gaussian, whose result seeds a fit with two Gaussian components sharing
//! the same mean. One number per slice is then extracted from the fit
//! results according to an [`ExtractionRule`], yielding one [`Curve`] point
//! per x bin.

use crate::{
    curve::{quotient_error, Curve},
    error::{Error, Result},
    fit::{fit_histogram, DoubleGaussian, FitResult, Gaussian, ParamLimits},
    hist::{Hist1D, Hist2D},
    numeric::{functions::sqr, Float},
    render,
    tree::Chain,
};
use prefix_num_ops::real::*;
use std::{fmt, path::PathBuf, str::FromStr};
use tracing::info;

/// Which quantity of the slice fits is reported as the curve value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExtractionRule {
    /// Shared mean of the double Gaussian
    Mean,

    /// Smaller of the two double Gaussian widths
    NarrowSigma,

    /// Larger of the two double Gaussian widths
    WideSigma,

    /// Average of both widths, weighted by amplitude / sqrt(width)
    WeightedSigma,

    /// Mean of the loose single Gaussian
    LooseMean,

    /// Width of the loose single Gaussian
    LooseSigma,
}
//
impl ExtractionRule {
    /// All rules, in the order of their historical numbering
    pub const ALL: [ExtractionRule; 6] = [
        ExtractionRule::Mean,
        ExtractionRule::NarrowSigma,
        ExtractionRule::WideSigma,
        ExtractionRule::WeightedSigma,
        ExtractionRule::LooseMean,
        ExtractionRule::LooseSigma,
    ];

    /// Look up a rule by its historical number (0 to 5)
    pub fn from_index(index: usize) -> Result<Self> {
        Self::ALL
            .get(index)
            .copied()
            .ok_or_else(|| Error::UnknownExtractionRule(index.to_string()))
    }

    /// Extract (value, error) from the loose and double Gaussian fits
    pub fn extract(self, loose: &FitResult, mixture: &FitResult) -> (Float, Float) {
        use DoubleGaussian as DG;
        let sigma = |param: usize| (mixture.parameter(param), mixture.par_error(param));
        match self {
            ExtractionRule::Mean => sigma(DG::MEAN),
            ExtractionRule::NarrowSigma => {
                if mixture.parameter(DG::SIGMA1) < mixture.parameter(DG::SIGMA2) {
                    sigma(DG::SIGMA1)
                } else {
                    sigma(DG::SIGMA2)
                }
            }
            ExtractionRule::WideSigma => {
                if mixture.parameter(DG::SIGMA1) > mixture.parameter(DG::SIGMA2) {
                    sigma(DG::SIGMA1)
                } else {
                    sigma(DG::SIGMA2)
                }
            }
            ExtractionRule::WeightedSigma => {
                let (s1, e1) = sigma(DG::SIGMA1);
                let (s2, e2) = sigma(DG::SIGMA2);
                let w1 = mixture.parameter(DG::AMPLITUDE1) / sqrt(s1);
                let w2 = mixture.parameter(DG::AMPLITUDE2) / sqrt(s2);
                let value = (w1 * s1 + w2 * s2) / (w1 + w2);
                // Covariances between the mixture parameters are ignored
                let error = sqrt(sqr(w1 * e1) + sqr(w2 * e2)) / (w1 + w2);
                (value, error)
            }
            ExtractionRule::LooseMean => (
                loose.parameter(Gaussian::MEAN),
                loose.par_error(Gaussian::MEAN),
            ),
            ExtractionRule::LooseSigma => (
                loose.parameter(Gaussian::SIGMA),
                loose.par_error(Gaussian::SIGMA),
            ),
        }
    }
}
//
impl FromStr for ExtractionRule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(index) = s.parse::<usize>() {
            return Self::from_index(index);
        }
        Ok(match s.to_lowercase().as_str() {
            "mean" => ExtractionRule::Mean,
            "narrow" | "narrow-sigma" => ExtractionRule::NarrowSigma,
            "wide" | "wide-sigma" => ExtractionRule::WideSigma,
            "weighted" | "weighted-sigma" => ExtractionRule::WeightedSigma,
            "loose-mean" => ExtractionRule::LooseMean,
            "loose-sigma" => ExtractionRule::LooseSigma,
            _ => return Err(Error::UnknownExtractionRule(s.to_owned())),
        })
    }
}
//
impl fmt::Display for ExtractionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExtractionRule::Mean => "mean",
            ExtractionRule::NarrowSigma => "narrow-sigma",
            ExtractionRule::WideSigma => "wide-sigma",
            ExtractionRule::WeightedSigma => "weighted-sigma",
            ExtractionRule::LooseMean => "loose-mean",
            ExtractionRule::LooseSigma => "loose-sigma",
        };
        f.write_str(name)
    }
}

/// Binning of the (x, y) distribution
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResolutionBinning {
    /// Number of x slices, i.e. of curve points
    pub n_bins_x: usize,
    /// Lower x edge
    pub x_min: Float,
    /// Upper x edge
    pub x_max: Float,
    /// Number of bins of each y projection
    pub n_bins_y: usize,
    /// Lower y edge, also the lower end of the fit range
    pub y_min: Float,
    /// Upper y edge, also the upper end of the fit range
    pub y_max: Float,
}
//
impl ResolutionBinning {
    fn check(&self) -> Result<()> {
        if self.n_bins_x == 0 || self.n_bins_y == 0 {
            return Err(Error::Binning("resolution plots need x and y bins".into()));
        }
        if !(self.x_max > self.x_min && self.y_max > self.y_min) {
            return Err(Error::Binning(format!(
                "empty resolution plot range x: [{}, {}], y: [{}, {}]",
                self.x_min, self.x_max, self.y_min, self.y_max
            )));
        }
        Ok(())
    }
}

/// Loose and double Gaussian fits of one slice
#[derive(Clone, Debug, PartialEq)]
pub struct SliceFit {
    /// Single Gaussian fit used as a seed
    pub loose: FitResult,

    /// Double Gaussian fit
    pub mixture: FitResult,
}

/// Fit one y slice: loose Gaussian first, then the seeded double Gaussian
///
/// `extra_limits` are applied on top of the default double Gaussian limits.
pub fn fit_slice(
    slice: &Hist1D,
    y_min: Float,
    y_max: Float,
    extra_limits: &ParamLimits,
) -> SliceFit {
    let range = (y_min, y_max);
    let width = y_max - y_min;

    let mut loose_limits = ParamLimits::new();
    loose_limits.set(Gaussian::AMPLITUDE, 0., 1e8);
    loose_limits.set(Gaussian::MEAN, y_min, y_max);
    loose_limits.set(Gaussian::SIGMA, 0., width);
    let loose = fit_histogram(&Gaussian, slice, &[10., 0., 30.], &loose_limits, range);

    let mut limits = ParamLimits::new();
    limits.set(DoubleGaussian::MEAN, y_min, y_max);
    limits.set(DoubleGaussian::SIGMA1, 0., width);
    limits.set(DoubleGaussian::SIGMA2, 0., width);
    limits.set(DoubleGaussian::AMPLITUDE1, 0., 1e8);
    limits.set(DoubleGaussian::AMPLITUDE2, 0., 1e8);
    limits.extend(extra_limits);

    let amplitude = loose.parameter(Gaussian::AMPLITUDE);
    let sigma = loose.parameter(Gaussian::SIGMA);
    let seed = [
        loose.parameter(Gaussian::MEAN),
        sigma,
        sigma * 1.2,
        amplitude * 0.7,
        amplitude * 0.3,
    ];
    let mixture = fit_histogram(&DoubleGaussian, slice, &seed, &limits, range);
    SliceFit { loose, mixture }
}

/// Pick the i-th element of a per-curve list, falling back to a shared value
fn pick<'v>(list: &'v [String], default: &'v str, i: usize) -> &'v str {
    match list.len() {
        0 => default,
        1 => &list[0],
        _ => &list[i],
    }
}

/// Producer of resolution curves
///
/// Each curve may use its own data source, cut, y expression and x
/// expression. Per-curve lists left empty fall back to the default value,
/// lists with a single element are shared by all curves, other lists must
/// have one element per curve.
pub struct ResolutionPlotter<'src> {
    default_source: Option<&'src Chain>,
    default_cut: String,
    default_expr: String,
    default_expr_x: String,

    sources: Vec<&'src Chain>,
    cuts: Vec<String>,
    exprs: Vec<String>,
    exprs_x: Vec<String>,

    /// User limits on the double Gaussian parameters
    param_limits: ParamLimits,

    include_error_bars: bool,

    /// Directory where fit pictures are dumped, if enabled
    dump_dir: Option<PathBuf>,
    num_fit_dumps: usize,

    plot_counter: usize,
}
//
impl Default for ResolutionPlotter<'_> {
    fn default() -> Self {
        Self::new()
    }
}
//
impl<'src> ResolutionPlotter<'src> {
    /// Set up a plotter with nothing configured and error bars enabled
    pub fn new() -> Self {
        Self {
            default_source: None,
            default_cut: String::new(),
            default_expr: String::new(),
            default_expr_x: String::new(),
            sources: Vec::new(),
            cuts: Vec::new(),
            exprs: Vec::new(),
            exprs_x: Vec::new(),
            param_limits: ParamLimits::new(),
            include_error_bars: true,
            dump_dir: None,
            num_fit_dumps: 0,
            plot_counter: 0,
        }
    }

    /// Data source used by curves which do not have their own
    pub fn set_default_source(&mut self, source: &'src Chain) {
        self.default_source = Some(source);
    }

    /// Cut used by curves which do not have their own
    pub fn set_default_cut(&mut self, cut: &str) {
        self.default_cut = cut.to_owned();
    }

    /// Y expression used by curves which do not have their own
    pub fn set_default_expr(&mut self, expr: &str) {
        self.default_expr = expr.to_owned();
    }

    /// X expression used by curves which do not have their own
    pub fn set_default_expr_x(&mut self, expr: &str) {
        self.default_expr_x = expr.to_owned();
    }

    /// Add a per-curve data source
    pub fn add_source(&mut self, source: &'src Chain) {
        self.sources.push(source);
    }

    /// Add a per-curve cut
    pub fn add_cut(&mut self, cut: &str) {
        self.cuts.push(cut.to_owned());
    }

    /// Add a per-curve y expression
    pub fn add_expr(&mut self, expr: &str) {
        self.exprs.push(expr.to_owned());
    }

    /// Add a per-curve x expression
    pub fn add_expr_x(&mut self, expr: &str) {
        self.exprs_x.push(expr.to_owned());
    }

    /// Constrain one double Gaussian parameter
    pub fn set_parameter_limits(&mut self, param: usize, low: Float, high: Float) {
        self.param_limits.set(param, low, high);
    }

    /// Choose whether curves carry vertical error bars
    pub fn set_include_error_bars(&mut self, include: bool) {
        self.include_error_bars = include;
    }

    /// Enable or disable dumping a picture of every slice fit
    pub fn set_dump_fits(&mut self, dir: Option<PathBuf>) {
        self.dump_dir = dir;
    }

    /// Number of fit pictures dumped so far
    pub fn num_fit_dumps(&self) -> usize {
        self.num_fit_dumps
    }

    /// Number of curves implied by the per-curve lists
    fn num_curves(&self) -> Result<usize> {
        let lengths = [
            ("sources", self.sources.len()),
            ("cuts", self.cuts.len()),
            ("y expressions", self.exprs.len()),
            ("x expressions", self.exprs_x.len()),
        ];
        let n = lengths.iter().map(|&(_, len)| len).max().unwrap_or(0);
        if n == 0 {
            return Err(Error::NothingToPlot);
        }
        for (what, len) in lengths {
            if len > 1 && len != n {
                return Err(Error::Cardinality {
                    what,
                    expected: n,
                    found: len,
                });
            }
        }
        Ok(n)
    }

    /// Build one resolution curve per configured source/cut/expression
    pub fn make_fit_graphs(
        &mut self,
        binning: ResolutionBinning,
        rule: ExtractionRule,
    ) -> Result<Vec<Curve>> {
        if self.default_expr_x.is_empty() && self.exprs_x.is_empty() {
            return Err(Error::MissingXExpression);
        }
        let num_plots = self.num_curves()?;
        binning.check()?;

        info!("{} lines will be made.", num_plots);
        let mut curves = Vec::with_capacity(num_plots);
        for i in 0..num_plots {
            info!("{} more to go.", num_plots - i);
            let source = match self.sources.len() {
                0 => self.default_source.ok_or(Error::MissingSource(i))?,
                1 => self.sources[0],
                _ => self.sources[i],
            };
            let cut = pick(&self.cuts, &self.default_cut, i);
            let expr = pick(&self.exprs, &self.default_expr, i);
            let expr_x = pick(&self.exprs_x, &self.default_expr_x, i);

            let name = format!("Hist_{}", self.plot_counter);
            self.plot_counter += 1;
            let mut hist = Hist2D::new(
                &name,
                binning.n_bins_x,
                binning.x_min,
                binning.x_max,
                binning.n_bins_y,
                binning.y_min,
                binning.y_max,
            );
            source.draw_2d(expr_x, expr, cut, &mut hist)?;
            curves.push(self.fit_curve(&hist, &binning, rule)?);
        }
        Ok(curves)
    }

    /// Fit every x slice of a 2-D histogram and extract one point per slice
    fn fit_curve(
        &mut self,
        hist: &Hist2D,
        binning: &ResolutionBinning,
        rule: ExtractionRule,
    ) -> Result<Curve> {
        let mut curve = Curve::new(binning.n_bins_x);
        for x_bin in 0..binning.n_bins_x {
            let slice = hist.projection_y(&format!("{}_py", hist.name()), x_bin);
            let fits = fit_slice(&slice, binning.y_min, binning.y_max, &self.param_limits);

            if let Some(dir) = &self.dump_dir {
                let path = dir.join(format!("DumpFit_{}.png", self.num_fit_dumps));
                render::dump_fit(&path, &slice, &fits)?;
                self.num_fit_dumps += 1;
            }

            let (value, error) = rule.extract(&fits.loose, &fits.mixture);
            curve.set_point(x_bin, hist.x_bin_center(x_bin), value);
            if self.include_error_bars {
                curve.set_point_error(x_bin, error);
            }
        }
        Ok(curve)
    }

    /// Divide each curve by its own reference curve
    pub fn ratio_to_lines(&self, curves: &[Curve], references: &[Curve]) -> Result<Vec<Curve>> {
        if curves.len() != references.len() {
            return Err(Error::Cardinality {
                what: "reference curves",
                expected: curves.len(),
                found: references.len(),
            });
        }
        curves
            .iter()
            .zip(references)
            .map(|(curve, reference)| {
                if curve.len() != reference.len() {
                    return Err(Error::Cardinality {
                        what: "ratio curve points",
                        expected: reference.len(),
                        found: curve.len(),
                    });
                }
                let mut ratio = Curve::new(reference.len());
                for (i, (p, r)) in curve.points().iter().zip(reference.points()).enumerate() {
                    ratio.set_point(i, p.x, p.y / r.y);
                    if self.include_error_bars {
                        ratio.set_point_error(i, quotient_error(p.y, p.ey, r.y, r.ey));
                    }
                }
                Ok(ratio)
            })
            .collect()
    }

    /// Divide every curve by the same reference curve
    pub fn ratio_to_line(&self, curves: &[Curve], reference: &Curve) -> Result<Vec<Curve>> {
        let references = vec![reference.clone(); curves.len()];
        self.ratio_to_lines(curves, &references)
    }

    /// Divide every curve by a constant with some uncertainty
    ///
    /// The constant reference is sampled at the x values of the first curve.
    pub fn ratio_to_point(&self, curves: &[Curve], value: Float, error: Float) -> Result<Vec<Curve>> {
        let Some(first) = curves.first() else {
            return Ok(Vec::new());
        };
        let mut reference = Curve::new(first.len());
        for (i, x) in first.xs().enumerate() {
            reference.set_point(i, x, value);
            if self.include_error_bars {
                reference.set_point_error(i, error);
            }
        }
        self.ratio_to_line(curves, &reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::CurvePoint,
        error::ErrorClass,
        fit::Model,
        random::RandomGenerator,
        tree::Tree,
    };
    use approx::assert_relative_eq;

    fn fit_result(params: Vec<Float>, errors: Vec<Float>) -> FitResult {
        FitResult {
            params,
            errors,
            chi2: 0.,
            ndf: 1,
            converged: true,
        }
    }

    fn curve(points: &[(Float, Float, Float)]) -> Curve {
        Curve::from_points(
            points
                .iter()
                .map(|&(x, y, ey)| CurvePoint { x, y, ey })
                .collect(),
        )
    }

    #[test]
    fn narrow_and_wide_sigma_ignore_parameter_order() {
        let loose = fit_result(vec![1., 0., 3.], vec![0.; 3]);
        let a = fit_result(vec![0., 2., 5., 70., 30.], vec![0.01, 0.1, 0.5, 1., 1.]);
        let b = fit_result(vec![0., 5., 2., 30., 70.], vec![0.01, 0.5, 0.1, 1., 1.]);
        for mixture in [&a, &b] {
            assert_eq!(ExtractionRule::NarrowSigma.extract(&loose, mixture), (2., 0.1));
            assert_eq!(ExtractionRule::WideSigma.extract(&loose, mixture), (5., 0.5));
        }
    }

    #[test]
    fn weighted_sigma_combination() {
        let loose = fit_result(vec![1., 0., 3.], vec![0.; 3]);
        let mixture = fit_result(vec![0., 4., 6., 70., 30.], vec![0., 0.1, 0.2, 0., 0.]);
        let (value, error) = ExtractionRule::WeightedSigma.extract(&loose, &mixture);
        let w1: Float = 70. / (4.0 as Float).sqrt();
        let w2: Float = 30. / (6.0 as Float).sqrt();
        assert_relative_eq!(value, (w1 * 4. + w2 * 6.) / (w1 + w2));
        assert_relative_eq!(
            error,
            ((w1 * 0.1).powi(2) + (w2 * 0.2).powi(2)).sqrt() / (w1 + w2)
        );
    }

    #[test]
    fn other_rules_pick_single_parameters() {
        let loose = fit_result(vec![10., 0.5, 3.], vec![1., 0.05, 0.3]);
        let mixture = fit_result(vec![0.2, 4., 6., 70., 30.], vec![0.02, 0.1, 0.2, 1., 1.]);
        assert_eq!(ExtractionRule::Mean.extract(&loose, &mixture), (0.2, 0.02));
        assert_eq!(ExtractionRule::LooseMean.extract(&loose, &mixture), (0.5, 0.05));
        assert_eq!(ExtractionRule::LooseSigma.extract(&loose, &mixture), (3., 0.3));
    }

    #[test]
    fn rule_names() {
        for (i, rule) in ExtractionRule::ALL.iter().enumerate() {
            assert_eq!(ExtractionRule::from_index(i).unwrap(), *rule);
            assert_eq!(rule.to_string().parse::<ExtractionRule>().unwrap(), *rule);
        }
        assert_eq!("1".parse::<ExtractionRule>().unwrap(), ExtractionRule::NarrowSigma);
        assert!("6".parse::<ExtractionRule>().is_err());
        assert!("median".parse::<ExtractionRule>().is_err());
    }

    #[test]
    fn ratio_to_unit_point() {
        let plotter = ResolutionPlotter::new();
        let c = curve(&[(1., 1., 0.), (2., 1., 0.), (3., 1., 0.)]);
        let ratios = plotter.ratio_to_point(&[c.clone()], 1., 0.).unwrap();
        assert_eq!(ratios, vec![c]);

        // Only the numerator error contributes when the reference is exact
        let c = curve(&[(1., 1., 0.2), (2., 1., 0.3)]);
        let ratios = plotter.ratio_to_point(&[c], 1., 0.).unwrap();
        assert_eq!(ratios[0].point(0), CurvePoint { x: 1., y: 1., ey: 0.2 });
        assert_eq!(ratios[0].point(1), CurvePoint { x: 2., y: 1., ey: 0.3 });
    }

    #[test]
    fn ratio_to_line_is_repeated_ratio_to_lines() {
        let plotter = ResolutionPlotter::new();
        let curves = vec![
            curve(&[(1., 2., 0.2), (2., 3., 0.1)]),
            curve(&[(1., 4., 0.4), (2., 1., 0.3)]),
            curve(&[(1., 8., 0.1), (2., 6., 0.6)]),
        ];
        let reference = curve(&[(1., 2., 0.1), (2., 4., 0.2)]);
        let repeated = vec![reference.clone(); curves.len()];
        assert_eq!(
            plotter.ratio_to_line(&curves, &reference).unwrap(),
            plotter.ratio_to_lines(&curves, &repeated).unwrap()
        );

        let ratio = plotter.ratio_to_line(&curves[..1], &reference).unwrap();
        assert_relative_eq!(ratio[0].point(0).y, 1.);
        assert_relative_eq!(ratio[0].point(0).ey, quotient_error(2., 0.2, 2., 0.1));
    }

    #[test]
    fn ratio_without_error_bars() {
        let mut plotter = ResolutionPlotter::new();
        plotter.set_include_error_bars(false);
        let c = curve(&[(1., 3., 0.2)]);
        let ratios = plotter.ratio_to_point(&[c], 2., 0.5).unwrap();
        assert_eq!(ratios[0].point(0), CurvePoint { x: 1., y: 1.5, ey: 0. });
    }

    #[test]
    fn ratio_size_mismatch_is_fatal() {
        let plotter = ResolutionPlotter::new();
        let short = curve(&[(1., 1., 0.)]);
        let long = curve(&[(1., 1., 0.), (2., 1., 0.)]);
        let err = plotter.ratio_to_line(&[long.clone()], &short).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Cardinality);
        let err = plotter.ratio_to_line(&[short], &long).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Cardinality);
        let err = plotter.ratio_to_lines(&[long.clone(), long.clone()], &[long]).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Cardinality);
    }

    #[test]
    fn configuration_errors() {
        let binning = ResolutionBinning {
            n_bins_x: 2,
            x_min: 0.,
            x_max: 2.,
            n_bins_y: 10,
            y_min: -5.,
            y_max: 5.,
        };
        let mut plotter = ResolutionPlotter::new();
        assert!(matches!(
            plotter.make_fit_graphs(binning, ExtractionRule::Mean),
            Err(Error::MissingXExpression)
        ));
        plotter.set_default_expr_x("x");
        assert!(matches!(
            plotter.make_fit_graphs(binning, ExtractionRule::Mean),
            Err(Error::NothingToPlot)
        ));
        plotter.add_cut("x > 0");
        assert!(matches!(
            plotter.make_fit_graphs(binning, ExtractionRule::Mean),
            Err(Error::MissingSource(0))
        ));
        plotter.add_cut("x > 1");
        plotter.add_expr("y");
        plotter.add_expr("y");
        plotter.add_expr("2 * y");
        assert!(matches!(
            plotter.make_fit_graphs(binning, ExtractionRule::Mean),
            Err(Error::Cardinality { expected: 3, found: 2, .. })
        ));
    }

    #[test]
    fn slice_fit_seeds_double_gaussian_from_loose_fit() {
        let truth = [0.5, 3., 9., 300., 60.];
        let mut slice = Hist1D::new("slice", 80, -40., 40.);
        for bin in 0..80 {
            let y = DoubleGaussian.eval(slice.bin_center(bin), &truth);
            slice.set_bin_content(bin, y);
            slice.set_bin_error(bin, y.max(1.).sqrt());
        }
        let fits = fit_slice(&slice, -40., 40., &ParamLimits::new());
        assert!(fits.loose.converged);
        assert!(fits.mixture.converged);
        assert!(fits.loose.parameter(Gaussian::SIGMA) > 3.);
        let (narrow, _) = ExtractionRule::NarrowSigma.extract(&fits.loose, &fits.mixture);
        let (wide, _) = ExtractionRule::WideSigma.extract(&fits.loose, &fits.mixture);
        assert_relative_eq!(narrow, 3., max_relative = 2e-2);
        assert_relative_eq!(wide, 9., max_relative = 2e-2);
        let (mean, _) = ExtractionRule::Mean.extract(&fits.loose, &fits.mixture);
        assert_relative_eq!(mean, 0.5, epsilon = 2e-2);
    }

    #[test]
    fn user_limits_override_defaults() {
        let truth = [0., 3., 9., 300., 60.];
        let mut slice = Hist1D::new("slice", 80, -40., 40.);
        for bin in 0..80 {
            let y = DoubleGaussian.eval(slice.bin_center(bin), &truth);
            slice.set_bin_content(bin, y);
            slice.set_bin_error(bin, y.max(1.).sqrt());
        }
        let mut limits = ParamLimits::new();
        limits.set(DoubleGaussian::MEAN, 1., 2.);
        let fits = fit_slice(&slice, -40., 40., &limits);
        let mean = fits.mixture.parameter(DoubleGaussian::MEAN);
        assert!((1. ..=2.).contains(&mean));
    }

    /// Residuals whose width grows linearly with x
    fn resolution_tree(entries: usize) -> Tree {
        let mut rng = RandomGenerator::new();
        let (mut xs, mut ys) = (Vec::with_capacity(entries), Vec::with_capacity(entries));
        for _ in 0..entries {
            let x = 100. * rng.random() as f64;
            let sigma = 5. + 0.1 * x;
            xs.push(x);
            ys.push(sigma * rng.gaussian() as f64);
        }
        let mut tree = Tree::new("events");
        tree.add_scalar("genBos_pt", xs).unwrap();
        tree.add_scalar("u_para", ys).unwrap();
        tree.add_scalar("weight", vec![1.; entries]).unwrap();
        tree
    }

    #[test]
    fn resolution_curves_follow_the_input_width() {
        let mut chain = Chain::new("events");
        chain.add_tree(resolution_tree(40_000));

        let mut plotter = ResolutionPlotter::new();
        plotter.set_default_expr_x("genBos_pt");
        plotter.add_source(&chain);
        plotter.add_cut("weight");
        plotter.add_expr("u_para");
        plotter.add_expr("-u_para");
        let binning = ResolutionBinning {
            n_bins_x: 5,
            x_min: 0.,
            x_max: 100.,
            n_bins_y: 60,
            y_min: -60.,
            y_max: 60.,
        };

        let curves = plotter
            .make_fit_graphs(binning, ExtractionRule::LooseSigma)
            .unwrap();
        assert_eq!(curves.len(), 2);
        for curve in &curves {
            assert_eq!(curve.len(), 5);
            for (i, p) in curve.points().iter().enumerate() {
                assert_relative_eq!(p.x, 10. + 20. * i as Float);
                let expected = 5. + 0.1 * p.x;
                assert_relative_eq!(p.y, expected, max_relative = 0.15);
                assert!(p.ey > 0.);
            }
        }

        plotter.set_include_error_bars(false);
        let means = plotter.make_fit_graphs(binning, ExtractionRule::Mean).unwrap();
        for p in means[0].points() {
            assert!(p.y.abs() < 1.5, "mean {} too far from zero", p.y);
            assert_eq!(p.ey, 0.);
        }
        assert_eq!(plotter.num_fit_dumps(), 0);
    }
}
