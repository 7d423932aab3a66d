//! Event selection into skimmed trees
//!
//! An [`EventSelector`] runs a list of [`Operator`]s over every entry of an
//! input tree. Entries that pass all operators are copied into an output
//! tree, where the [`SelectorKind`] decides how many output events an input
//! event turns into and how their weights are adjusted.

use crate::{
    error::{Error, Result},
    expr::CompiledExpr,
    random::RandomGenerator,
    tree::{Event, Tree},
};
use tracing::{debug, info, warn};

/// One step of an event selection
pub trait Operator {
    /// Name used in cut flow reports
    fn name(&self) -> &str;

    /// Examine an input entry, possibly modifying the output event, and tell
    /// whether the entry passes
    fn apply(&mut self, input: &Tree, entry: usize, output: &mut Event) -> Result<bool>;
}

/// Keep entries where an expression is true for at least one instance
pub struct Cut {
    name: String,
    expr: CompiledExpr,
}
//
impl Cut {
    /// Compile a cut
    pub fn new(name: &str, expr: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_owned(),
            expr: CompiledExpr::compile(expr)?,
        })
    }
}
//
impl Operator for Cut {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, input: &Tree, entry: usize, _output: &mut Event) -> Result<bool> {
        let bound = self.expr.bind(input)?;
        Ok(bound.eval_instances(entry).iter().any(|&x| x != 0.))
    }
}

/// Multiply the output weight by a per-event expression
pub struct Weight {
    name: String,
    expr: CompiledExpr,
}
//
impl Weight {
    /// Compile a weight factor
    pub fn new(name: &str, expr: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_owned(),
            expr: CompiledExpr::compile(expr)?,
        })
    }
}
//
impl Operator for Weight {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, input: &Tree, entry: usize, output: &mut Event) -> Result<bool> {
        let factor = self.expr.bind(input)?.eval(entry, 0);
        let weight = output.scalar("weight").unwrap_or(1.);
        output.set_scalar("weight", weight * factor);
        Ok(true)
    }
}

/// Find all pairs of objects passing a per-object selection
pub struct EEPairSelection {
    name: String,
    expr: CompiledExpr,
    pairs: Vec<(usize, usize)>,
}
//
impl EEPairSelection {
    /// Compile the per-object selection, e.g. `electrons.pt > 30`
    pub fn new(name: &str, object_expr: &str) -> Result<Self> {
        Ok(Self {
            name: name.to_owned(),
            expr: CompiledExpr::compile(object_expr)?,
            pairs: Vec::new(),
        })
    }

    /// Pairs found in the last examined entry, as (i, j) with i < j
    pub fn pairs(&self) -> &[(usize, usize)] {
        &self.pairs
    }
}
//
impl Operator for EEPairSelection {
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&mut self, input: &Tree, entry: usize, _output: &mut Event) -> Result<bool> {
        let passing = self
            .expr
            .bind(input)?
            .eval_instances(entry)
            .into_iter()
            .enumerate()
            .filter(|&(_, x)| x != 0.)
            .map(|(i, _)| i)
            .collect::<Vec<_>>();
        self.pairs.clear();
        for (k, &i) in passing.iter().enumerate() {
            for &j in &passing[k + 1..] {
                self.pairs.push((i, j));
            }
        }
        Ok(!self.pairs.is_empty())
    }
}

/// Tabulated probability density, sampled by inverse cumulative distribution
#[derive(Clone, Debug)]
pub struct SmearingFunction {
    grid: Vec<f64>,
    cdf: Vec<f64>,
}
//
impl SmearingFunction {
    /// Tabulate a density over [min, max] with `n_steps` trapezoids
    ///
    /// Negative density values are treated as zero.
    pub fn new(density: impl Fn(f64) -> f64, min: f64, max: f64, n_steps: usize) -> Result<Self> {
        if n_steps == 0 || !(max > min) {
            return Err(Error::Binning(format!(
                "cannot tabulate smearing function over [{}, {}] in {} steps",
                min, max, n_steps
            )));
        }
        let step = (max - min) / n_steps as f64;
        let grid = (0..=n_steps).map(|i| min + step * i as f64).collect::<Vec<_>>();
        let mut cdf = Vec::with_capacity(grid.len());
        let mut total = 0.;
        let mut last = density(min).max(0.);
        cdf.push(0.);
        for &x in &grid[1..] {
            let current = density(x).max(0.);
            total += 0.5 * (last + current) * step;
            cdf.push(total);
            last = current;
        }
        if !(total > 0.) {
            return Err(Error::Binning(
                "smearing function has no positive density".into(),
            ));
        }
        Ok(Self { grid, cdf })
    }

    /// Map a uniform number in [0, 1) to a draw from the density
    pub fn quantile(&self, u: f64) -> f64 {
        let total = self.cdf[self.cdf.len() - 1];
        let target = u.clamp(0., 1.) * total;
        let k = self
            .cdf
            .partition_point(|&c| c <= target)
            .clamp(1, self.cdf.len() - 1);
        let (c0, c1) = (self.cdf[k - 1], self.cdf[k]);
        let (x0, x1) = (self.grid[k - 1], self.grid[k]);
        if c1 > c0 {
            x0 + (x1 - x0) * (target - c0) / (c1 - c0)
        } else {
            x0
        }
    }
}

/// How passing input events are turned into output events
pub enum SelectorKind {
    /// One output event per passing input event
    Plain,

    /// One output event per selected electron pair, with `tag` and `probe`
    /// object indices
    Zee(EEPairSelection),

    /// Only W decays to non-electron leptons
    Wlnu,

    /// Only W decays to electrons
    Wenu,

    /// Output weights are rescaled at the end so that the events passing
    /// `norm_cut` sum up to `norm`
    Normalizing {
        /// Target sum of weights
        norm: f64,
        /// Selection defining the normalization region
        norm_cut: CompiledExpr,
    },

    /// Each passing event is resampled `samples` times with its missing
    /// transverse energy drawn from `function`
    Smearing {
        /// Number of output events per input event
        samples: usize,
        /// Missing transverse energy model
        function: SmearingFunction,
        /// Random number source
        rng: RandomGenerator,
    },
}

/// Generator-level lepton flavour branch used by the W selectors
const GEN_LEPTON: &str = "gen.lepton";

/// Event selector with a cut flow
pub struct EventSelector {
    name: String,
    operators: Vec<Box<dyn Operator>>,
    pass_counts: Vec<usize>,
    kind: SelectorKind,
    blind_prescale: u64,
    blind_min_run: u64,
}
//
impl EventSelector {
    /// Set up a selector with no operator
    pub fn new(name: &str, kind: SelectorKind) -> Self {
        Self {
            name: name.to_owned(),
            operators: Vec::new(),
            pass_counts: Vec::new(),
            kind,
            blind_prescale: 1,
            blind_min_run: 0,
        }
    }

    /// Name of the selector
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append an operator to the cut flow
    pub fn add_operator(&mut self, operator: Box<dyn Operator>) {
        self.operators.push(operator);
        self.pass_counts.push(0);
    }

    /// Look up an operator by name
    pub fn find_operator(&self, name: &str) -> Option<&dyn Operator> {
        self.operators
            .iter()
            .find(|op| op.name() == name)
            .map(|op| op.as_ref())
    }

    /// Only keep one event in `prescale` for runs from `min_run` onwards
    pub fn set_partial_blinding(&mut self, prescale: u64, min_run: u64) {
        self.blind_prescale = prescale.max(1);
        self.blind_min_run = min_run;
    }

    /// Number of entries that passed each operator so far, in cut flow order
    pub fn pass_counts(&self) -> Vec<(&str, usize)> {
        self.operators
            .iter()
            .map(|op| op.name())
            .zip(self.pass_counts.iter().copied())
            .collect()
    }

    fn is_blinded(&self, input: &Tree, entry: usize) -> Result<bool> {
        if self.blind_prescale <= 1 {
            return Ok(false);
        }
        let run = input.scalar_branch("run")?[entry] as u64;
        let event = input.scalar_branch("event")?[entry] as u64;
        Ok(run >= self.blind_min_run && event % self.blind_prescale != 0)
    }

    /// Run the operators, stopping at the first one that fails
    fn run_operators(&mut self, input: &Tree, entry: usize, output: &mut Event) -> Result<bool> {
        for (op, count) in self.operators.iter_mut().zip(self.pass_counts.iter_mut()) {
            if !op.apply(input, entry, output)? {
                return Ok(false);
            }
            *count += 1;
        }
        Ok(true)
    }

    /// Select the entries of a tree, producing the skimmed tree
    pub fn select_tree(&mut self, input: &Tree) -> Result<Tree> {
        let mut out_tree = Tree::new(&self.name);
        let mut num_selected = 0;
        for entry in 0..input.entries() {
            if self.is_blinded(input, entry)? {
                continue;
            }

            match &self.kind {
                SelectorKind::Wlnu | SelectorKind::Wenu => {
                    let pdg_id = input.scalar_branch(GEN_LEPTON)?[entry].abs();
                    let is_electron = pdg_id == 11.;
                    if is_electron != matches!(self.kind, SelectorKind::Wenu) {
                        continue;
                    }
                }
                _ => {}
            }

            let mut output = input.event(entry);
            if output.scalar("weight").is_none() {
                output.set_scalar("weight", 1.);
            }
            if !self.run_operators(input, entry, &mut output)? {
                continue;
            }
            num_selected += 1;

            match &mut self.kind {
                SelectorKind::Zee(pair_selection) => {
                    if !pair_selection.apply(input, entry, &mut output)? {
                        continue;
                    }
                    for &(tag, probe) in pair_selection.pairs() {
                        let mut pair_event = output.clone();
                        pair_event.set_scalar("tag", tag as f64);
                        pair_event.set_scalar("probe", probe as f64);
                        out_tree.push_event(&pair_event)?;
                    }
                }
                SelectorKind::Smearing {
                    samples,
                    function,
                    rng,
                } => {
                    let weight = output.scalar("weight").unwrap_or(1.) / *samples as f64;
                    for _ in 0..*samples {
                        let mut sample = output.clone();
                        sample.set_scalar("met", function.quantile(rng.random() as f64));
                        sample.set_scalar("weight", weight);
                        out_tree.push_event(&sample)?;
                    }
                }
                SelectorKind::Plain
                | SelectorKind::Wlnu
                | SelectorKind::Wenu
                | SelectorKind::Normalizing { .. } => out_tree.push_event(&output)?,
            }
        }

        if let SelectorKind::Normalizing { norm, norm_cut } = &self.kind {
            normalize(&mut out_tree, *norm, norm_cut)?;
        }

        info!(
            "{}: {} of {} input entries selected into {} output entries",
            self.name,
            num_selected,
            input.entries(),
            out_tree.entries()
        );
        for (name, count) in self.pass_counts() {
            debug!("  {:<30} {}", name, count);
        }
        Ok(out_tree)
    }
}

/// Scale the weights of a tree so that entries passing `cut` sum up to `norm`
fn normalize(tree: &mut Tree, norm: f64, cut: &CompiledExpr) -> Result<()> {
    if tree.entries() == 0 {
        return Ok(());
    }
    let passing = {
        let bound = cut.bind(tree)?;
        (0..tree.entries())
            .map(|entry| bound.eval_instances(entry).iter().any(|&x| x != 0.))
            .collect::<Vec<_>>()
    };
    let weights = tree.scalar_branch_mut("weight")?;
    let sum_w: f64 = weights
        .iter()
        .zip(&passing)
        .filter(|(_, pass)| **pass)
        .map(|(w, _)| w)
        .sum();
    if sum_w == 0. {
        warn!("Normalization region of {} is empty, weights left as is", cut.source());
        return Ok(());
    }
    let scale = norm / sum_w;
    for w in weights.iter_mut() {
        *w *= scale;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn input_tree() -> Tree {
        let mut tree = Tree::new("events");
        tree.add_scalar("run", vec![1., 1., 2., 2.]).unwrap();
        tree.add_scalar("event", vec![10., 11., 12., 13.]).unwrap();
        tree.add_scalar("met", vec![20., 80., 150., 40.]).unwrap();
        tree.add_scalar("weight", vec![1., 2., 1., 0.5]).unwrap();
        tree.add_scalar("gen.lepton", vec![11., -13., -11., 15.]).unwrap();
        tree.add_jagged(
            "electrons.pt",
            vec![vec![40., 35., 10.], vec![50.], vec![], vec![31., 32., 33.]],
        )
        .unwrap();
        tree
    }

    #[test]
    fn plain_selection_with_cut_flow() {
        let mut selector = EventSelector::new("monoph", SelectorKind::Plain);
        selector.add_operator(Box::new(Cut::new("MetFilter", "met > 30").unwrap()));
        selector.add_operator(Box::new(Weight::new("Double", "2").unwrap()));
        selector.add_operator(Box::new(Cut::new("HasElectron", "electrons.pt > 45").unwrap()));

        let out = selector.select_tree(&input_tree()).unwrap();
        assert_eq!(out.entries(), 1);
        assert_eq!(out.scalar_branch("met").unwrap(), &[80.]);
        assert_eq!(out.scalar_branch("weight").unwrap(), &[4.]);
        assert_eq!(
            selector.pass_counts(),
            vec![("MetFilter", 3), ("Double", 3), ("HasElectron", 1)]
        );
        assert!(selector.find_operator("Double").is_some());
        assert!(selector.find_operator("Triple").is_none());
    }

    #[test]
    fn zee_emits_one_event_per_pair() {
        let pairs = EEPairSelection::new("EEPairSelection", "electrons.pt > 30").unwrap();
        let mut selector = EventSelector::new("zee", SelectorKind::Zee(pairs));
        let out = selector.select_tree(&input_tree()).unwrap();
        // Two electrons above threshold in entry 0, three in entry 3
        assert_eq!(out.entries(), 4);
        assert_eq!(out.scalar_branch("tag").unwrap(), &[0., 0., 0., 1.]);
        assert_eq!(out.scalar_branch("probe").unwrap(), &[1., 1., 2., 2.]);
        assert_eq!(out.scalar_branch("event").unwrap(), &[10., 13., 13., 13.]);
    }

    #[test]
    fn w_selectors_split_by_lepton_flavour() {
        let mut wenu = EventSelector::new("wenu", SelectorKind::Wenu);
        let out = wenu.select_tree(&input_tree()).unwrap();
        assert_eq!(out.scalar_branch("event").unwrap(), &[10., 12.]);

        let mut wlnu = EventSelector::new("wlnu", SelectorKind::Wlnu);
        let out = wlnu.select_tree(&input_tree()).unwrap();
        assert_eq!(out.scalar_branch("event").unwrap(), &[11., 13.]);
    }

    #[test]
    fn normalization_targets_cut_region() {
        let kind = SelectorKind::Normalizing {
            norm: 10.,
            norm_cut: CompiledExpr::compile("met > 50").unwrap(),
        };
        let mut selector = EventSelector::new("norm", kind);
        let out = selector.select_tree(&input_tree()).unwrap();
        let weights = out.scalar_branch("weight").unwrap();
        // Weights 2 and 1 pass the normalization cut, so the scale is 10/3
        assert_relative_eq!(weights[1] + weights[2], 10.);
        assert_relative_eq!(weights[0], 10. / 3.);
    }

    #[test]
    fn partial_blinding() {
        let mut selector = EventSelector::new("blind", SelectorKind::Plain);
        selector.set_partial_blinding(2, 2);
        let out = selector.select_tree(&input_tree()).unwrap();
        // Run 1 is unblinded, only even events of run 2 survive
        assert_eq!(out.scalar_branch("event").unwrap(), &[10., 11., 12.]);
    }

    #[test]
    fn smearing_resamples_met() {
        let function = SmearingFunction::new(|x| (-x / 50.).exp(), 0., 500., 1000).unwrap();
        let kind = SelectorKind::Smearing {
            samples: 4,
            function,
            rng: RandomGenerator::new(),
        };
        let mut selector = EventSelector::new("smear", kind);
        selector.add_operator(Box::new(Cut::new("Run1", "run == 1").unwrap()));
        let out = selector.select_tree(&input_tree()).unwrap();
        assert_eq!(out.entries(), 8);
        let weights = out.scalar_branch("weight").unwrap();
        assert_eq!(&weights[..4], &[0.25; 4]);
        assert_eq!(&weights[4..], &[0.5; 4]);
        assert!(out
            .scalar_branch("met")
            .unwrap()
            .iter()
            .all(|&met| (0. ..=500.).contains(&met)));
    }

    #[test]
    fn quantiles_of_uniform_density() {
        let uniform = SmearingFunction::new(|_| 1., 10., 20., 10).unwrap();
        assert_relative_eq!(uniform.quantile(0.), 10.);
        assert_relative_eq!(uniform.quantile(0.25), 12.5);
        assert_relative_eq!(uniform.quantile(1.), 20.);
        assert!(SmearingFunction::new(|_| 0., 0., 1., 10).is_err());
        assert!(SmearingFunction::new(|_| 1., 1., 0., 10).is_err());
    }
}
