//! Tag-and-probe templates
//!
//! Templates are distributions of some per-pair quantity (e.g. the invariant
//! mass of tag-and-probe pairs) for the pairs that pass a selection. They come
//! in two flavors: weighted histograms, and unbinned (value, weight) tables
//! stored in a [`ScratchFile`].

use crate::{
    entrylist::EntryListArray,
    error::{Error, Result},
    hist::Hist1D,
    numeric::Float,
    scratch::{ScratchFile, Table},
    tree::{Chain, Tree},
};
use std::{fmt, path::Path, str::FromStr};
use tracing::info;

/// Name of the input trees
pub const TREE_NAME: &str = "skimmedEvents";

/// Scalar branch holding the number of tag-and-probe pairs of an event
pub const PAIR_COUNT: &str = "tp.size";

/// Skim categories, each with its own input chain
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkimType {
    /// Electron + photon
    Eg,
    /// Muon + photon
    Mg,
    /// Two muons + photon
    Mmg,
}
//
impl SkimType {
    /// All skim categories
    pub const ALL: [SkimType; 3] = [SkimType::Eg, SkimType::Mg, SkimType::Mmg];

    fn index(self) -> usize {
        self as usize
    }
}
//
impl FromStr for SkimType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "eg" => Ok(SkimType::Eg),
            "mg" => Ok(SkimType::Mg),
            "mmg" => Ok(SkimType::Mmg),
            _ => Err(Error::UnknownSkimType(s.to_owned())),
        }
    }
}
//
impl fmt::Display for SkimType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SkimType::Eg => "eg",
            SkimType::Mg => "mg",
            SkimType::Mmg => "mmg",
        })
    }
}

/// Quantity whose distribution makes up a template
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Variable {
    /// Tag-and-probe invariant mass
    Mass,
    /// Generator-level angular separation (not wired to any branch yet)
    DrGen,
}
//
impl Variable {
    /// All variables
    pub const ALL: [Variable; 2] = [Variable::Mass, Variable::DrGen];

    fn index(self) -> usize {
        self as usize
    }

    /// Per-pair branch and table column holding this variable
    fn source(self) -> Result<(&'static str, &'static str)> {
        match self {
            Variable::Mass => Ok(("tp.mass", "mass")),
            Variable::DrGen => Err(Error::UnsupportedVariable(self.to_string())),
        }
    }
}
//
impl FromStr for Variable {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "mass" => Ok(Variable::Mass),
            "drgen" | "dr-gen" => Ok(Variable::DrGen),
            _ => Err(Error::UnknownVariable(s.to_owned())),
        }
    }
}
//
impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Variable::Mass => "mass",
            Variable::DrGen => "drgen",
        })
    }
}

/// Uniform binning of a template
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Binning {
    n_bins: usize,
    min: Float,
    max: Float,
}
//
impl Binning {
    /// Check and build a binning
    pub fn new(n_bins: usize, min: Float, max: Float) -> Result<Self> {
        if n_bins == 0 || !(max > min) {
            return Err(Error::Binning(format!(
                "{} bins in [{}, {}] is not a valid template binning",
                n_bins, min, max
            )));
        }
        Ok(Self { n_bins, min, max })
    }

    /// Number of bins
    pub fn n_bins(&self) -> usize {
        self.n_bins
    }

    /// Lower bound
    pub fn min(&self) -> Float {
        self.min
    }

    /// Upper bound
    pub fn max(&self) -> Float {
        self.max
    }
}

/// One selected pair, as seen by template sinks
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TemplateEntry {
    /// Value of the tracked variable
    pub value: f64,
    /// Event weight
    pub weight: f64,
    /// Number of primary vertices of the event
    pub npv: f64,
}

/// Visit every selected pair of a chain, in entry list order
///
/// `value_branch` is the per-pair branch to read. An entry list that does
/// not describe `chain` is reported as an integrity error.
pub fn visit_selection(
    chain: &Chain,
    list: &EntryListArray,
    value_branch: &str,
    mut sink: impl FnMut(TemplateEntry),
) -> Result<()> {
    for (list_entry, tree_entry) in list.entries().enumerate() {
        let missing = |tree_number, local_entry| Error::MissingSubList {
            list_entry,
            tree_entry,
            tree_number,
            local_entry,
        };
        // Entries past the end of the chain are reported as belonging to an
        // extra tree following the last one
        let (tree_number, local) = chain.locate(tree_entry).ok_or_else(|| {
            missing(chain.trees().len(), tree_entry.saturating_sub(chain.entries()))
        })?;
        let sub_list = list
            .sub_list(tree_number, local)
            .ok_or_else(|| missing(tree_number, local))?;
        let tree: &Tree = chain
            .tree(tree_number)
            .ok_or_else(|| missing(tree_number, local))?;

        let size = tree.scalar_branch(PAIR_COUNT)?[local] as usize;
        let weight = tree.scalar_branch("weight")?[local];
        let npv = tree.scalar_branch("npv")?[local];
        let values = &tree.jagged_branch(value_branch)?[local];
        let size = size.min(values.len());

        for &index in sub_list {
            if index >= size {
                return Err(Error::InstanceOutOfRange {
                    entry: tree_entry,
                    index,
                    size,
                });
            }
            sink(TemplateEntry {
                value: values[index],
                weight,
                npv,
            });
        }
    }
    Ok(())
}

/// Suppress statistically insignificant bins of a weighted template
///
/// Negative bin contents are set to zero, then the error of any bin whose
/// content minus error is negative is set to zero.
pub fn clamp_negative_bins(hist: &mut Hist1D) {
    for bin in 0..hist.n_bins() {
        if hist.bin_content(bin) < 0. {
            hist.set_bin_content(bin, 0.);
        }
        if hist.bin_content(bin) - hist.bin_error(bin) < 0. {
            hist.set_bin_error(bin, 0.);
        }
    }
}

/// Builder of templates from per-skim input chains
pub struct TemplateGenerator {
    inputs: [Chain; 3],
    binnings: [Binning; 2],
}
//
impl Default for TemplateGenerator {
    fn default() -> Self {
        Self::new()
    }
}
//
impl TemplateGenerator {
    /// Set up a generator with empty inputs and default binnings
    pub fn new() -> Self {
        Self {
            inputs: [
                Chain::new(TREE_NAME),
                Chain::new(TREE_NAME),
                Chain::new(TREE_NAME),
            ],
            binnings: [
                Binning {
                    n_bins: 60,
                    min: 60.,
                    max: 120.,
                },
                Binning {
                    n_bins: 40,
                    min: 0.,
                    max: 2.5,
                },
            ],
        }
    }

    /// Append a tree file to the input of a skim category
    pub fn add_input(&mut self, skim: SkimType, path: impl AsRef<Path>) -> Result<()> {
        self.inputs[skim.index()].add(path)
    }

    /// Append an in-memory tree to the input of a skim category
    pub fn add_tree(&mut self, skim: SkimType, tree: Tree) {
        self.inputs[skim.index()].add_tree(tree);
    }

    /// Input chain of a skim category
    pub fn input(&self, skim: SkimType) -> &Chain {
        &self.inputs[skim.index()]
    }

    /// Change the binning of future templates of some variable
    pub fn set_template_binning(&mut self, variable: Variable, binning: Binning) {
        self.binnings[variable.index()] = binning;
    }

    /// Binning of templates of some variable
    pub fn binning(&self, variable: Variable) -> Binning {
        self.binnings[variable.index()]
    }

    /// Create an empty histogram with the binning of some variable
    pub fn make_empty_template(&self, name: &str, variable: Variable) -> Hist1D {
        let b = self.binning(variable);
        Hist1D::new(name, b.n_bins, b.min, b.max)
    }

    /// Select the pairs of a skim passing `expr`, logging how many entries
    /// have at least one of them
    fn select(&self, skim: SkimType, expr: &str) -> Result<Option<EntryListArray>> {
        let list = self.input(skim).draw_entry_list(expr, Some(PAIR_COUNT))?;
        let n = list.as_ref().map_or(0, EntryListArray::n);
        info!("Tree {}: {} entries passing {}", skim, n, expr);
        Ok(list)
    }

    /// Histogram `variable` for the pairs of a skim that pass `expr`
    ///
    /// Returns None if no pair passes the selection.
    pub fn make_template(
        &self,
        skim: SkimType,
        name: &str,
        expr: &str,
        variable: Variable,
    ) -> Result<Option<Hist1D>> {
        let (branch, _) = variable.source()?;
        let Some(list) = self.select(skim, expr)? else {
            return Ok(None);
        };

        let mut hist = self.make_empty_template(name, variable);
        visit_selection(self.input(skim), &list, branch, |entry| {
            hist.fill(entry.value as Float, entry.weight as Float)
        })?;
        clamp_negative_bins(&mut hist);
        Ok(Some(hist))
    }

    /// Record (variable, weight) rows for the pairs of a skim that pass
    /// `expr` into a table of the scratch file
    ///
    /// Returns None if no pair passes the selection, in which case the
    /// scratch file is left untouched.
    pub fn make_unbinned_template<'s>(
        &self,
        scratch: &'s mut ScratchFile,
        skim: SkimType,
        name: &str,
        expr: &str,
        variable: Variable,
    ) -> Result<Option<&'s Table>> {
        let (branch, column) = variable.source()?;
        let Some(list) = self.select(skim, expr)? else {
            return Ok(None);
        };

        let mut rows = Vec::new();
        visit_selection(self.input(skim), &list, branch, |entry| {
            rows.push(vec![entry.value, entry.weight])
        })?;

        let table = scratch.create_table(name, &[column, "weight"]);
        for row in rows {
            table.push_row(row)?;
        }
        scratch.save()?;
        Ok(scratch.table(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use approx::assert_relative_eq;

    /// Events with pairs of given masses, all pairs stored
    fn tp_tree(name: &str, masses: Vec<Vec<f64>>, weights: Vec<f64>) -> Tree {
        let n = masses.len();
        let mut tree = Tree::new(name);
        tree.add_scalar("tp.size", masses.iter().map(|m| m.len() as f64).collect())
            .unwrap();
        tree.add_jagged("tp.mass", masses).unwrap();
        tree.add_scalar("weight", weights).unwrap();
        tree.add_scalar("npv", vec![12.; n]).unwrap();
        tree
    }

    fn generator() -> TemplateGenerator {
        let mut gen = TemplateGenerator::new();
        gen.add_tree(
            SkimType::Eg,
            tp_tree("a", vec![vec![91., 30.], vec![89.5]], vec![1., 2.]),
        );
        gen.add_tree(
            SkimType::Eg,
            tp_tree("b", vec![vec![], vec![61., 119.5, 95.]], vec![1., 0.5]),
        );
        gen
    }

    #[test]
    fn default_binnings() {
        let mut gen = TemplateGenerator::new();
        assert_eq!(gen.binning(Variable::Mass), Binning::new(60, 60., 120.).unwrap());
        assert_eq!(gen.binning(Variable::DrGen), Binning::new(40, 0., 2.5).unwrap());
        gen.set_template_binning(Variable::Mass, Binning::new(30, 70., 110.).unwrap());
        let hist = gen.make_empty_template("empty", Variable::Mass);
        assert_eq!(hist.n_bins(), 30);
        assert_eq!(hist.integral(), 0.);
        assert!(Binning::new(0, 0., 1.).is_err());
        assert!(Binning::new(10, 1., 1.).is_err());
    }

    #[test]
    fn binning_changes_spare_built_templates() {
        let mut gen = generator();
        let before = gen
            .make_template(SkimType::Eg, "before", "tp.mass > 60", Variable::Mass)
            .unwrap()
            .unwrap();
        gen.set_template_binning(Variable::Mass, Binning::new(10, 80., 100.).unwrap());
        let after = gen
            .make_template(SkimType::Eg, "after", "tp.mass > 60", Variable::Mass)
            .unwrap()
            .unwrap();
        assert_eq!(before.n_bins(), 60);
        assert_eq!(before.axis().min, 60.);
        assert_eq!(before.axis().max, 120.);
        assert_relative_eq!(before.integral(), 4.5);
        assert_eq!(after.n_bins(), 10);
        assert_eq!(after.axis().min, 80.);
    }

    #[test]
    fn no_cut_selects_every_pair() {
        let mut gen = TemplateGenerator::new();
        gen.add_tree(
            SkimType::Eg,
            tp_tree("a", vec![vec![91., 85.], vec![], vec![95.]], vec![1., 1., 2.]),
        );
        let all = gen
            .make_template(SkimType::Eg, "all", "", Variable::Mass)
            .unwrap()
            .unwrap();
        assert_eq!(all.entries(), 3);
        assert_relative_eq!(all.integral(), 4.);
    }

    #[test]
    fn scalar_cut_selects_every_pair_of_passing_events() {
        let mut gen = TemplateGenerator::new();
        gen.add_tree(
            SkimType::Eg,
            tp_tree("a", vec![vec![91., 85.], vec![], vec![95.]], vec![1., 1., -2.]),
        );
        let positive = gen
            .make_template(SkimType::Eg, "positive", "weight > 0", Variable::Mass)
            .unwrap()
            .unwrap();
        assert_eq!(positive.entries(), 2);
        assert_relative_eq!(positive.integral(), 2.);

        let list = gen.select(SkimType::Eg, "weight > 0").unwrap().unwrap();
        assert_eq!(list.n(), 1);
        assert_eq!(list.total_instances(), 2);
    }

    #[test]
    fn histogram_template_sums_weights() {
        let gen = generator();
        let hist = gen
            .make_template(SkimType::Eg, "tmpl", "tp.mass > 60", Variable::Mass)
            .unwrap()
            .unwrap();
        assert_eq!(hist.name(), "tmpl");
        assert_eq!(hist.entries(), 5);
        // Pair at 30 GeV fails the selection, 61 and 119.5 land in edge bins
        assert_relative_eq!(hist.bin_content(31), 1.);
        assert_relative_eq!(hist.bin_content(29), 2.);
        assert_relative_eq!(hist.bin_content(1), 0.5);
        assert_relative_eq!(hist.bin_content(59), 0.5);
        assert_relative_eq!(hist.bin_content(35), 0.5);
        assert_relative_eq!(hist.integral(), 4.5);
        // A single positive fill has content equal to its error, which is kept
        assert_relative_eq!(hist.bin_error(1), 0.5);
        assert_relative_eq!(hist.bin_error(29), 2.);
    }

    #[test]
    fn zero_matches_is_not_an_error() {
        let gen = generator();
        let tmpl = gen
            .make_template(SkimType::Eg, "none", "tp.mass > 500", Variable::Mass)
            .unwrap();
        assert!(tmpl.is_none());
        assert!(gen
            .make_template(SkimType::Mg, "empty-skim", "", Variable::Mass)
            .unwrap()
            .is_none());
    }

    #[test]
    fn unsupported_variable_fails() {
        let gen = generator();
        let err = gen
            .make_template(SkimType::Eg, "dr", "tp.mass > 60", Variable::DrGen)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedVariable(_)));
        assert_eq!(err.class(), ErrorClass::Configuration);
    }

    #[test]
    fn negative_content_clamps_content_and_error() {
        let mut hist = Hist1D::new("h", 1, 0., 1.);
        hist.fill(0.5, 1.);
        hist.fill(0.5, -1.5);
        clamp_negative_bins(&mut hist);
        assert_eq!(hist.bin_content(0), 0.);
        assert_eq!(hist.bin_error(0), 0.);
    }

    #[test]
    fn insignificant_content_clamps_error_only() {
        let mut hist = Hist1D::new("h", 1, 0., 1.);
        hist.fill(0.5, 3.);
        hist.fill(0.5, -2.5);
        clamp_negative_bins(&mut hist);
        assert_relative_eq!(hist.bin_content(0), 0.5);
        assert_eq!(hist.bin_error(0), 0.);
    }

    #[test]
    fn significant_content_is_untouched() {
        let mut hist = Hist1D::new("h", 1, 0., 1.);
        for _ in 0..4 {
            hist.fill(0.5, 1.);
        }
        clamp_negative_bins(&mut hist);
        assert_relative_eq!(hist.bin_content(0), 4.);
        assert_relative_eq!(hist.bin_error(0), 2.);
    }

    #[test]
    fn negative_content_without_error() {
        let mut hist = Hist1D::new("h", 2, 0., 2.);
        hist.set_bin_content(0, -1.);
        hist.set_bin_error(0, 0.);
        hist.set_bin_content(1, 2.);
        hist.set_bin_error(1, 3.);
        clamp_negative_bins(&mut hist);
        assert_eq!((hist.bin_content(0), hist.bin_error(0)), (0., 0.));
        assert_eq!((hist.bin_content(1), hist.bin_error(1)), (2., 0.));
    }

    #[test]
    fn foreign_entry_list_is_an_integrity_error() {
        let gen = generator();
        let list = gen
            .input(SkimType::Eg)
            .draw_entry_list("tp.mass > 100", Some(PAIR_COUNT))
            .unwrap()
            .unwrap();

        // Same entries, but split differently across trees
        let mut other = Chain::new(TREE_NAME);
        other.add_tree(tp_tree(
            "merged",
            vec![vec![91., 30.], vec![89.5], vec![], vec![61., 119.5, 95.]],
            vec![1., 2., 1., 0.5],
        ));
        let err = visit_selection(&other, &list, "tp.mass", |_| {}).unwrap_err();
        assert!(matches!(err, Error::MissingSubList { list_entry: 0, tree_entry: 3, .. }));
        assert_eq!(err.class(), ErrorClass::Integrity);
    }

    #[test]
    fn selected_instances_must_exist() {
        // Claim a single pair although two are stored
        let mut tree = Tree::new("t");
        tree.add_scalar("tp.size", vec![1.]).unwrap();
        tree.add_jagged("tp.mass", vec![vec![91., 92.]]).unwrap();
        tree.add_scalar("weight", vec![1.]).unwrap();
        tree.add_scalar("npv", vec![8.]).unwrap();
        let mut chain = Chain::new(TREE_NAME);
        chain.add_tree(tree);
        let list = chain
            .draw_entry_list("tp.mass > 91.5", Some(PAIR_COUNT))
            .unwrap()
            .unwrap();
        let err = visit_selection(&chain, &list, "tp.mass", |_| {}).unwrap_err();
        assert!(matches!(err, Error::InstanceOutOfRange { index: 1, size: 1, .. }));
    }

    #[test]
    fn unbinned_template_goes_to_scratch_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut scratch = ScratchFile::open_or_create(dir.path().join("scratch.json")).unwrap();
        let gen = generator();

        let table = gen
            .make_unbinned_template(&mut scratch, SkimType::Eg, "pass", "tp.mass > 60", Variable::Mass)
            .unwrap()
            .unwrap();
        assert_eq!(table.columns(), &["mass".to_owned(), "weight".to_owned()]);
        assert_eq!(
            table.rows(),
            &[
                vec![91., 1.],
                vec![89.5, 2.],
                vec![61., 0.5],
                vec![119.5, 0.5],
                vec![95., 0.5]
            ]
        );

        assert!(gen
            .make_unbinned_template(&mut scratch, SkimType::Eg, "none", "tp.mass > 500", Variable::Mass)
            .unwrap()
            .is_none());
        assert!(scratch.table("none").is_none());

        let reopened = ScratchFile::open_or_create(scratch.path()).unwrap();
        assert_eq!(reopened.table("pass").map(Table::len), Some(5));
    }

    #[test]
    fn skim_and_variable_names() {
        for skim in SkimType::ALL {
            assert_eq!(skim.to_string().parse::<SkimType>().unwrap(), skim);
        }
        for variable in Variable::ALL {
            assert_eq!(variable.to_string().parse::<Variable>().unwrap(), variable);
        }
        assert!(matches!("ee".parse::<SkimType>(), Err(Error::UnknownSkimType(_))));
        assert!(matches!("pt".parse::<Variable>(), Err(Error::UnknownVariable(_))));
    }
}
