//! Least-squares fits of parametric models to histograms
//!
//! Fits minimize the usual chi-square over non-empty bins, using bin
//! uncertainties as weights and evaluating the model at bin centers.
//!
//! The minimizer is argmin's L-BFGS. It works on unbounded internal
//! variables: a parameter limited to [low, high] is seen through the
//! `low + (high - low) * (sin(u) + 1) / 2` mapping used by Minuit, so that
//! no step can take it out of its box nor pin it onto an edge where the
//! model may stop depending on it (e.g. a Gaussian of zero width).

use crate::{
    hist::Hist1D,
    numeric::{functions::*, Float},
};
use argmin::{
    core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus},
    solver::{linesearch::MoreThuenteLineSearch, quasinewton::LBFGS},
};
use nalgebra::DMatrix;
use prefix_num_ops::real::*;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Maximal number of L-BFGS iterations
const MAX_ITERATIONS: u64 = 5000;

/// Number of past steps used to approximate the inverse Hessian
const LBFGS_MEMORY: usize = 10;

/// Gradient norm below which a fit is considered converged
const GRAD_TOLERANCE: Float = 1e-7;

/// Chi-square change below which a fit is considered converged
const COST_TOLERANCE: Float = 1e-10;

/// Number of L-BFGS runs attempted before a fit is declared unconverged
const MAX_RESTARTS: usize = 3;

/// Parametric model which can be fitted to a histogram
pub trait Model {
    /// Short name of the model
    fn name(&self) -> &str;

    /// Names of the parameters, in parameter index order
    fn param_names(&self) -> &'static [&'static str];

    /// Number of parameters
    fn n_params(&self) -> usize {
        self.param_names().len()
    }

    /// Value of the model at some point
    fn eval(&self, x: Float, params: &[Float]) -> Float;

    /// Derivatives of the model with respect to each parameter
    fn gradient(&self, x: Float, params: &[Float], grad: &mut [Float]);
}

/// `[0]*gaus(x, [1], [2])`
#[derive(Clone, Copy, Debug, Default)]
pub struct Gaussian;
//
impl Gaussian {
    /// Index of the amplitude parameter
    pub const AMPLITUDE: usize = 0;
    /// Index of the mean parameter
    pub const MEAN: usize = 1;
    /// Index of the width parameter
    pub const SIGMA: usize = 2;
}
//
impl Model for Gaussian {
    fn name(&self) -> &str {
        "loose"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["amplitude", "mean", "sigma"]
    }

    fn eval(&self, x: Float, p: &[Float]) -> Float {
        p[0] * gaus(x, p[1], p[2])
    }

    fn gradient(&self, x: Float, p: &[Float], grad: &mut [Float]) {
        let (amp, mean, sigma) = (p[0], p[1], p[2]);
        let g = gaus(x, mean, sigma);
        grad[0] = g;
        if sigma == 0. {
            grad[1] = 0.;
            grad[2] = 0.;
        } else {
            let dx = x - mean;
            grad[1] = amp * g * dx / sqr(sigma);
            grad[2] = amp * g * sqr(dx) / (sigma * sqr(sigma));
        }
    }
}

/// `[3]*gaus(x, [0], [1]) + [4]*gaus(x, [0], [2])`
///
/// Two Gaussian components sharing the same mean.
#[derive(Clone, Copy, Debug, Default)]
pub struct DoubleGaussian;
//
impl DoubleGaussian {
    /// Index of the shared mean
    pub const MEAN: usize = 0;
    /// Index of the width of the first component
    pub const SIGMA1: usize = 1;
    /// Index of the width of the second component
    pub const SIGMA2: usize = 2;
    /// Index of the amplitude of the first component
    pub const AMPLITUDE1: usize = 3;
    /// Index of the amplitude of the second component
    pub const AMPLITUDE2: usize = 4;

    /// Parameters of one component, in the order expected by [`Gaussian`]
    pub fn component(params: &[Float], which: usize) -> [Float; 3] {
        match which {
            0 => [params[Self::AMPLITUDE1], params[Self::MEAN], params[Self::SIGMA1]],
            _ => [params[Self::AMPLITUDE2], params[Self::MEAN], params[Self::SIGMA2]],
        }
    }
}
//
impl Model for DoubleGaussian {
    fn name(&self) -> &str {
        "func"
    }

    fn param_names(&self) -> &'static [&'static str] {
        &["mean", "sigma1", "sigma2", "amplitude1", "amplitude2"]
    }

    fn eval(&self, x: Float, p: &[Float]) -> Float {
        p[3] * gaus(x, p[0], p[1]) + p[4] * gaus(x, p[0], p[2])
    }

    fn gradient(&self, x: Float, p: &[Float], grad: &mut [Float]) {
        let mut sub = [0.; 3];
        grad[0] = 0.;
        for (which, sigma_idx, amp_idx) in [(0, 1, 3), (1, 2, 4)] {
            let component = Self::component(p, which);
            Gaussian.gradient(x, &component, &mut sub);
            grad[amp_idx] = sub[0];
            grad[0] += sub[1];
            grad[sigma_idx] = sub[2];
        }
    }
}

/// Box constraints on fit parameters
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamLimits {
    limits: BTreeMap<usize, (Float, Float)>,
}
//
impl ParamLimits {
    /// Start with unconstrained parameters
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrain a parameter to [low, high], replacing any previous limit
    pub fn set(&mut self, param: usize, low: Float, high: Float) {
        let bounds = if low <= high { (low, high) } else { (high, low) };
        self.limits.insert(param, bounds);
    }

    /// Limits of a parameter, if any
    pub fn get(&self, param: usize) -> Option<(Float, Float)> {
        self.limits.get(&param).copied()
    }

    /// Apply all limits of another set on top of these ones
    pub fn extend(&mut self, other: &ParamLimits) {
        self.limits.extend(other.limits.iter().map(|(&k, &v)| (k, v)));
    }
}

/// How one parameter is seen by the minimizer
#[derive(Clone, Copy, Debug, PartialEq)]
enum Mapping {
    /// No limits, the internal variable is the parameter
    Free,

    /// Empty box, the parameter cannot move
    Fixed(Float),

    /// Parameter in [low, high], through the sine mapping
    Bounded(Float, Float),
}
//
impl Mapping {
    fn new(limits: Option<(Float, Float)>) -> Self {
        match limits {
            None => Mapping::Free,
            Some((low, high)) if high > low => Mapping::Bounded(low, high),
            Some((low, _)) => Mapping::Fixed(low),
        }
    }

    /// Parameter value for an internal variable
    fn external(self, u: Float) -> Float {
        match self {
            Mapping::Free => u,
            Mapping::Fixed(value) => value,
            Mapping::Bounded(low, high) => low + (high - low) * (u.sin() + 1.) / 2.,
        }
    }

    /// Derivative of the parameter value with respect to the internal variable
    fn derivative(self, u: Float) -> Float {
        match self {
            Mapping::Free => 1.,
            Mapping::Fixed(_) => 0.,
            Mapping::Bounded(low, high) => (high - low) / 2. * u.cos(),
        }
    }

    /// Internal variable for a parameter value. Values outside of the box
    /// are brought back inside, and values on an edge are moved slightly
    /// inwards since the mapping is flat there.
    fn internal(self, p: Float) -> Float {
        match self {
            Mapping::Free => p,
            Mapping::Fixed(_) => 0.,
            Mapping::Bounded(low, high) => {
                let margin = sqrt(Float::EPSILON);
                let s = 2. * (p - low) / (high - low) - 1.;
                s.clamp(-1. + margin, 1. - margin).asin()
            }
        }
    }
}

/// Outcome of a fit
#[derive(Clone, Debug, PartialEq)]
pub struct FitResult {
    /// Best parameter values
    pub params: Vec<Float>,

    /// Standard errors of the parameters
    pub errors: Vec<Float>,

    /// Chi-square at the best parameters
    pub chi2: Float,

    /// Number of degrees of freedom
    pub ndf: usize,

    /// Whether the minimizer reported convergence
    pub converged: bool,
}
//
impl FitResult {
    /// Value of a parameter
    pub fn parameter(&self, param: usize) -> Float {
        self.params[param]
    }

    /// Standard error of a parameter
    pub fn par_error(&self, param: usize) -> Float {
        self.errors[param]
    }
}

/// Data points entering the chi-square: (x, y, 1/σ)
struct FitPoints(Vec<(Float, Float, Float)>);
//
impl FitPoints {
    fn from_hist(hist: &Hist1D, (min, max): (Float, Float)) -> Self {
        Self(
            hist.bins()
                .filter(|&(x, content, error)| {
                    x >= min && x <= max && content != 0. && error > 0.
                })
                .map(|(x, content, error)| (x, content, 1. / error))
                .collect(),
        )
    }

    fn chi2(&self, model: &impl Model, params: &[Float]) -> Float {
        self.0
            .iter()
            .map(|&(x, y, inv_err)| sqr((y - model.eval(x, params)) * inv_err))
            .sum()
    }

    /// Derivatives of the chi-square with respect to the parameters
    fn chi2_gradient(&self, model: &impl Model, params: &[Float]) -> Vec<Float> {
        let mut result = vec![0.; params.len()];
        let mut grad = vec![0.; params.len()];
        for &(x, y, inv_err) in &self.0 {
            model.gradient(x, params, &mut grad);
            let residual = (y - model.eval(x, params)) * sqr(inv_err);
            for (r, g) in result.iter_mut().zip(&grad) {
                *r -= 2. * residual * g;
            }
        }
        result
    }

    /// Gauss-Newton approximation JᵀWJ of half the chi-square Hessian
    fn curvature(&self, model: &impl Model, params: &[Float]) -> DMatrix<Float> {
        let n = params.len();
        let mut jtj = DMatrix::<Float>::zeros(n, n);
        let mut grad = vec![0.; n];
        for &(x, _, inv_err) in &self.0 {
            model.gradient(x, params, &mut grad);
            let w = sqr(inv_err);
            for i in 0..n {
                for j in 0..=i {
                    jtj[(i, j)] += grad[i] * grad[j] * w;
                }
            }
        }
        for i in 0..n {
            for j in 0..i {
                jtj[(j, i)] = jtj[(i, j)];
            }
        }
        jtj
    }
}

/// Chi-square as a function of the internal variables
struct Chi2Problem<'a, M: Model> {
    model: &'a M,
    points: &'a FitPoints,
    mappings: &'a [Mapping],
}
//
impl<M: Model> Chi2Problem<'_, M> {
    fn external(&self, internal: &[Float]) -> Vec<Float> {
        self.mappings
            .iter()
            .zip(internal)
            .map(|(m, &u)| m.external(u))
            .collect()
    }
}
//
impl<M: Model> CostFunction for Chi2Problem<'_, M> {
    type Param = Vec<Float>;
    type Output = Float;

    fn cost(&self, internal: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        Ok(self.points.chi2(self.model, &self.external(internal)))
    }
}
//
impl<M: Model> Gradient for Chi2Problem<'_, M> {
    type Param = Vec<Float>;
    type Gradient = Vec<Float>;

    fn gradient(&self, internal: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let params = self.external(internal);
        let grad = self.points.chi2_gradient(self.model, &params);
        Ok(self
            .mappings
            .iter()
            .zip(internal)
            .zip(grad)
            .map(|((m, &u), g)| g * m.derivative(u))
            .collect())
    }
}

/// Run one L-BFGS minimization from some internal starting point
///
/// Returns the best point found, whether the solver reported convergence,
/// or the error which stopped it.
fn run_lbfgs<M: Model>(
    problem: Chi2Problem<'_, M>,
    start: Vec<Float>,
) -> Result<(Vec<Float>, bool), argmin::core::Error> {
    let solver = LBFGS::new(MoreThuenteLineSearch::new(), LBFGS_MEMORY)
        .with_tolerance_grad(GRAD_TOLERANCE)?
        .with_tolerance_cost(COST_TOLERANCE)?;
    let res = Executor::new(problem, solver)
        .configure(|state| state.param(start).max_iters(MAX_ITERATIONS))
        .run()?;
    let state = res.state();
    let converged = matches!(
        state.get_termination_status(),
        TerminationStatus::Terminated(
            TerminationReason::SolverConverged | TerminationReason::TargetCostReached
        )
    );
    let best = state
        .get_best_param()
        .cloned()
        .ok_or_else(|| argmin::core::Error::msg("No best parameters after minimization"))?;
    Ok((best, converged))
}

/// Minimize, restarting L-BFGS from its last best point (with a fresh
/// inverse Hessian approximation) while it does not converge
fn minimize<M: Model>(problem: &Chi2Problem<'_, M>, start: Vec<Float>) -> (Vec<Float>, bool) {
    let mut best = start;
    for attempt in 0..MAX_RESTARTS {
        let problem = Chi2Problem {
            model: problem.model,
            points: problem.points,
            mappings: problem.mappings,
        };
        match run_lbfgs(problem, best.clone()) {
            Ok((point, converged)) => {
                best = point;
                if converged {
                    return (best, true);
                }
                debug!("L-BFGS run {} did not converge, restarting", attempt);
            }
            Err(e) => {
                warn!("Minimization failed: {}", e);
                break;
            }
        }
    }
    (best, false)
}

/// Fit a model to the bins of a histogram lying within some x range
///
/// The starting point is brought inside of the parameter limits first. A fit
/// with fewer usable bins than parameters leaves the parameters at their
/// starting point and reports itself as not converged.
pub fn fit_histogram(
    model: &impl Model,
    hist: &Hist1D,
    start: &[Float],
    limits: &ParamLimits,
    range: (Float, Float),
) -> FitResult {
    assert_eq!(
        start.len(),
        model.n_params(),
        "Starting point does not match the model's parameter count"
    );
    let n_params = model.n_params();
    let points = FitPoints::from_hist(hist, range);
    let mappings = (0..n_params)
        .map(|param| Mapping::new(limits.get(param)))
        .collect::<Vec<_>>();
    let internal_start = mappings
        .iter()
        .zip(start)
        .map(|(m, &p)| m.internal(p))
        .collect::<Vec<_>>();
    let problem = Chi2Problem {
        model,
        points: &points,
        mappings: &mappings,
    };

    if points.0.len() < n_params {
        warn!(
            "Only {} usable bins in {} for the {}-parameter '{}' fit",
            points.0.len(),
            hist.name(),
            n_params,
            model.name()
        );
        let params = problem.external(&internal_start);
        return FitResult {
            chi2: points.chi2(model, &params),
            errors: vec![0.; n_params],
            params,
            ndf: 0,
            converged: false,
        };
    }

    let (internal, converged) = minimize(&problem, internal_start);
    let params = problem.external(&internal);
    let chi2 = points.chi2(model, &params);
    if !converged {
        warn!("Fit '{}' of {} did not converge", model.name(), hist.name());
    }

    // Fixed parameters have no uncertainty and are left out of the inversion
    let free = (0..n_params)
        .filter(|&i| !matches!(mappings[i], Mapping::Fixed(_)))
        .collect::<Vec<_>>();
    let curvature = points.curvature(model, &params);
    let reduced = DMatrix::from_fn(free.len(), free.len(), |i, j| curvature[(free[i], free[j])]);
    let mut errors = vec![0.; n_params];
    if let Some(cov) = reduced.try_inverse() {
        for (k, &i) in free.iter().enumerate() {
            errors[i] = sqrt(abs(cov[(k, k)]));
        }
    }
    let ndf = points.0.len() - n_params;
    debug!(
        "Fit '{}' of {}: chi2/ndf = {}/{}, params = {:?}",
        model.name(),
        hist.name(),
        chi2,
        ndf,
        params
    );
    FitResult {
        params,
        errors,
        chi2,
        ndf,
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Histogram whose bin contents follow a model exactly
    fn exact_hist(model: &impl Model, params: &[Float], n_bins: usize, min: Float, max: Float) -> Hist1D {
        let mut hist = Hist1D::new("exact", n_bins, min, max);
        for bin in 0..n_bins {
            let x = hist.bin_center(bin);
            let y = model.eval(x, params);
            hist.set_bin_content(bin, y);
            hist.set_bin_error(bin, sqrt(y.max(1.)));
        }
        hist
    }

    #[test]
    fn analytic_gradients_match_finite_differences() {
        let params = [1.5, 2., 4., 70., 30.];
        let mut grad = [0.; 5];
        DoubleGaussian.gradient(3., &params, &mut grad);
        for i in 0..5 {
            let h = 1e-6;
            let mut up = params;
            up[i] += h;
            let mut down = params;
            down[i] -= h;
            let numeric = (DoubleGaussian.eval(3., &up) - DoubleGaussian.eval(3., &down)) / (2. * h);
            assert_relative_eq!(grad[i], numeric, epsilon = 1e-5, max_relative = 1e-5);
        }
    }

    #[test]
    fn loose_gaussian_fit_recovers_parameters() {
        let truth = [500., 4., 12.];
        let hist = exact_hist(&Gaussian, &truth, 60, -60., 60.);
        let mut limits = ParamLimits::new();
        limits.set(0, 0., 1e8);
        limits.set(1, -60., 60.);
        limits.set(2, 0., 120.);
        let fit = fit_histogram(&Gaussian, &hist, &[10., 0., 30.], &limits, (-60., 60.));
        assert!(fit.converged);
        assert_relative_eq!(fit.parameter(0), 500., max_relative = 1e-3);
        assert_relative_eq!(fit.parameter(1), 4., epsilon = 1e-3);
        assert_relative_eq!(fit.parameter(2), 12., max_relative = 1e-3);
        assert!(fit.par_error(1) > 0.);
        assert!(fit.chi2 < 1e-3);
        assert_eq!(fit.ndf, 57);
    }

    #[test]
    fn double_gaussian_fit_recovers_parameters() {
        let truth = [1., 5., 15., 400., 100.];
        let hist = exact_hist(&DoubleGaussian, &truth, 100, -75., 75.);
        let mut limits = ParamLimits::new();
        limits.set(0, -75., 75.);
        limits.set(1, 0., 150.);
        limits.set(2, 0., 150.);
        limits.set(3, 0., 1e8);
        limits.set(4, 0., 1e8);
        let fit = fit_histogram(
            &DoubleGaussian,
            &hist,
            &[0., 7., 8.4, 300., 130.],
            &limits,
            (-75., 75.),
        );
        assert!(fit.converged);
        let (narrow, wide) = if fit.parameter(1) < fit.parameter(2) { (1, 2) } else { (2, 1) };
        assert_relative_eq!(fit.parameter(0), 1., epsilon = 1e-2);
        assert_relative_eq!(fit.parameter(narrow), 5., max_relative = 1e-2);
        assert_relative_eq!(fit.parameter(wide), 15., max_relative = 1e-2);
    }

    #[test]
    fn limits_are_honored() {
        let truth = [500., 4., 12.];
        let hist = exact_hist(&Gaussian, &truth, 60, -60., 60.);
        let mut limits = ParamLimits::new();
        limits.set(2, 0., 8.);
        // Reversed bounds are reordered
        limits.set(1, 10., -10.);
        assert_eq!(limits.get(1), Some((-10., 10.)));
        let fit = fit_histogram(&Gaussian, &hist, &[10., 0., 30.], &limits, (-60., 60.));
        assert!(fit.parameter(2) <= 8.);
        assert!(fit.parameter(2) > 0.);
    }

    #[test]
    fn too_few_bins_keeps_start_point() {
        let mut hist = Hist1D::new("sparse", 10, 0., 10.);
        hist.fill(5.5, 1.);
        let fit = fit_histogram(&Gaussian, &hist, &[10., 0., 30.], &ParamLimits::new(), (0., 10.));
        assert!(!fit.converged);
        assert_eq!(fit.params, vec![10., 0., 30.]);
        assert_eq!(fit.errors, vec![0.; 3]);
    }

    #[test]
    fn narrow_peak_from_wide_seed() {
        let truth = [300., 0.5, 3.];
        let hist = exact_hist(&Gaussian, &truth, 80, -40., 40.);
        let mut limits = ParamLimits::new();
        limits.set(0, 0., 1e8);
        limits.set(1, -40., 40.);
        limits.set(2, 0., 80.);
        let fit = fit_histogram(&Gaussian, &hist, &[10., 0., 30.], &limits, (-40., 40.));
        assert!(fit.converged);
        assert_relative_eq!(fit.parameter(2), 3., max_relative = 1e-2);
        assert_relative_eq!(fit.parameter(1), 0.5, epsilon = 1e-2);
        assert_relative_eq!(fit.parameter(0), 300., max_relative = 1e-2);
    }

    #[test]
    fn empty_box_fixes_parameter() {
        let truth = [500., 4., 12.];
        let hist = exact_hist(&Gaussian, &truth, 60, -60., 60.);
        let mut limits = ParamLimits::new();
        limits.set(1, 4., 4.);
        let fit = fit_histogram(&Gaussian, &hist, &[400., 0., 10.], &limits, (-60., 60.));
        assert_eq!(fit.parameter(1), 4.);
        assert_eq!(fit.par_error(1), 0.);
        assert!(fit.par_error(2) > 0.);
        assert_relative_eq!(fit.parameter(2), 12., max_relative = 1e-2);
    }

    #[test]
    fn sine_mapping_stays_in_bounds() {
        let mapping = Mapping::new(Some((0., 10.)));
        assert_eq!(mapping, Mapping::Bounded(0., 10.));
        for u in [-100., -1.5, 0., 0.7, 42.] {
            let p = mapping.external(u);
            assert!((0. ..=10.).contains(&p));
        }
        assert_relative_eq!(mapping.external(mapping.internal(2.5)), 2.5, epsilon = 1e-9);
        // Edges and out-of-box values land strictly inside
        assert!(mapping.external(mapping.internal(0.)) > 0.);
        assert!(mapping.external(mapping.internal(-5.)) > 0.);
        assert!(mapping.external(mapping.internal(15.)) < 10.);
        assert!(mapping.derivative(mapping.internal(0.)) > 0.);
        assert_eq!(Mapping::new(Some((3., 3.))), Mapping::Fixed(3.));
        assert_eq!(Mapping::new(None), Mapping::Free);
    }
}
