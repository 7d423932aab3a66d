//! Columnar event storage
//!
//! A [`Tree`] stores one value per entry for scalar branches, and one
//! variable-length array per entry for jagged branches (one element per
//! object instance, e.g. per tag-and-probe pair). A [`Chain`] concatenates
//! several trees into one logical source.

use crate::{
    entrylist::EntryListArray,
    error::{Error, Result},
    expr::{joint_instance_count, CompiledExpr},
    hist::Hist2D,
    numeric::Float,
};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::File, io::BufReader, io::BufWriter, path::Path};
use tracing::debug;

/// Storage of one branch across all entries of a tree
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Branch {
    /// One value per entry
    Scalar(Vec<f64>),

    /// One array of object values per entry
    Jagged(Vec<Vec<f64>>),
}
//
impl Branch {
    /// Number of entries stored in this branch
    pub fn len(&self) -> usize {
        match self {
            Branch::Scalar(v) => v.len(),
            Branch::Jagged(v) => v.len(),
        }
    }

    /// Truth that this branch has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Value of one branch in one entry
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Value of a scalar branch
    Scalar(f64),

    /// Value of a jagged branch
    Array(Vec<f64>),
}

/// One entry of a tree, detached from its storage
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Event {
    values: BTreeMap<String, Value>,
}
//
impl Event {
    /// Create an event with no branch values
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a scalar branch value
    pub fn scalar(&self, name: &str) -> Option<f64> {
        match self.values.get(name)? {
            Value::Scalar(x) => Some(*x),
            Value::Array(_) => None,
        }
    }

    /// Read a jagged branch value
    pub fn array(&self, name: &str) -> Option<&[f64]> {
        match self.values.get(name)? {
            Value::Array(v) => Some(v),
            Value::Scalar(_) => None,
        }
    }

    /// Set a scalar branch value
    pub fn set_scalar(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_owned(), Value::Scalar(value));
    }

    /// Set a jagged branch value
    pub fn set_array(&mut self, name: &str, values: Vec<f64>) {
        self.values.insert(name.to_owned(), Value::Array(values));
    }

    /// Iterate over (branch name, value) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Named collection of equally long branches
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Tree {
    name: String,
    branches: BTreeMap<String, Branch>,
    #[serde(skip)]
    entries: usize,
}
//
impl Tree {
    /// Create an empty tree
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            branches: BTreeMap::new(),
            entries: 0,
        }
    }

    /// Load a tree from a JSON tree file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut tree: Tree = serde_json::from_reader(reader)?;
        tree.entries = tree.branches.values().next().map_or(0, Branch::len);
        for (name, branch) in &tree.branches {
            tree.check_length(name, branch)?;
        }
        debug!(
            "Loaded tree '{}' with {} entries from {}",
            tree.name,
            tree.entries,
            path.display()
        );
        Ok(tree)
    }

    /// Save a tree to a JSON tree file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Name of the tree
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of entries
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Look up a branch by name
    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches.get(name)
    }

    /// Look up a scalar branch, which must exist
    pub fn scalar_branch(&self, name: &str) -> Result<&[f64]> {
        match self.required_branch(name)? {
            Branch::Scalar(values) => Ok(values),
            Branch::Jagged(_) => Err(kind_error(name, "scalars")),
        }
    }

    /// Look up a jagged branch, which must exist
    pub fn jagged_branch(&self, name: &str) -> Result<&[Vec<f64>]> {
        match self.required_branch(name)? {
            Branch::Jagged(rows) => Ok(rows),
            Branch::Scalar(_) => Err(kind_error(name, "arrays")),
        }
    }

    /// Mutable access to a scalar branch, which must exist
    pub fn scalar_branch_mut(&mut self, name: &str) -> Result<&mut [f64]> {
        match self.branches.get_mut(name) {
            Some(Branch::Scalar(values)) => Ok(values),
            Some(Branch::Jagged(_)) => Err(kind_error(name, "scalars")),
            None => Err(Error::UnknownBranch {
                tree: self.name.clone(),
                branch: name.to_owned(),
            }),
        }
    }

    fn required_branch(&self, name: &str) -> Result<&Branch> {
        self.branch(name).ok_or_else(|| Error::UnknownBranch {
            tree: self.name.clone(),
            branch: name.to_owned(),
        })
    }

    /// Add a scalar branch
    pub fn add_scalar(&mut self, name: &str, values: Vec<f64>) -> Result<()> {
        self.add_branch(name, Branch::Scalar(values))
    }

    /// Add a jagged branch
    pub fn add_jagged(&mut self, name: &str, values: Vec<Vec<f64>>) -> Result<()> {
        self.add_branch(name, Branch::Jagged(values))
    }

    fn add_branch(&mut self, name: &str, branch: Branch) -> Result<()> {
        if self.branches.is_empty() {
            self.entries = branch.len();
        }
        self.check_length(name, &branch)?;
        self.branches.insert(name.to_owned(), branch);
        Ok(())
    }

    fn check_length(&self, name: &str, branch: &Branch) -> Result<()> {
        if branch.len() != self.entries {
            return Err(Error::BranchLength {
                branch: name.to_owned(),
                expected: self.entries,
                found: branch.len(),
            });
        }
        Ok(())
    }

    /// Read back one entry
    pub fn event(&self, entry: usize) -> Event {
        let mut event = Event::new();
        for (name, branch) in &self.branches {
            match branch {
                Branch::Scalar(v) => event.set_scalar(name, v[entry]),
                Branch::Jagged(v) => event.set_array(name, v[entry].clone()),
            }
        }
        event
    }

    /// Append one entry. The first entry of an empty tree defines its
    /// branches, later entries must provide the same branches.
    pub fn push_event(&mut self, event: &Event) -> Result<()> {
        if self.branches.is_empty() {
            for (name, value) in event.iter() {
                let branch = match value {
                    Value::Scalar(_) => Branch::Scalar(Vec::new()),
                    Value::Array(_) => Branch::Jagged(Vec::new()),
                };
                self.branches.insert(name.to_owned(), branch);
            }
        }
        let found = event.values.len();
        if found != self.branches.len() {
            return Err(Error::Cardinality {
                what: "event branches",
                expected: self.branches.len(),
                found,
            });
        }
        for (name, branch) in &self.branches {
            match (branch, event.values.get(name)) {
                (Branch::Scalar(_), Some(Value::Scalar(_)))
                | (Branch::Jagged(_), Some(Value::Array(_))) => {}
                (_, None) => {
                    return Err(Error::UnknownBranch {
                        tree: self.name.clone(),
                        branch: name.clone(),
                    })
                }
                (Branch::Scalar(_), Some(_)) => return Err(kind_error(name, "scalars")),
                (Branch::Jagged(_), Some(_)) => return Err(kind_error(name, "arrays")),
            }
        }
        for (name, branch) in self.branches.iter_mut() {
            match (branch, &event.values[name]) {
                (Branch::Scalar(v), Value::Scalar(x)) => v.push(*x),
                (Branch::Jagged(v), Value::Array(a)) => v.push(a.clone()),
                _ => unreachable!("branch kinds were checked above"),
            }
        }
        self.entries += 1;
        Ok(())
    }
}

fn kind_error(branch: &str, expected: &'static str) -> Error {
    Error::BranchKind {
        branch: branch.to_owned(),
        expected,
    }
}

/// Ordered concatenation of trees, viewed as a single logical tree
#[derive(Clone, Debug)]
pub struct Chain {
    name: String,
    trees: Vec<Tree>,
    /// Global entry number of the first entry of each tree
    offsets: Vec<usize>,
    entries: usize,
}
//
impl Chain {
    /// Create an empty chain
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            trees: Vec::new(),
            offsets: Vec::new(),
            entries: 0,
        }
    }

    /// Append the tree stored in a file
    pub fn add(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.add_tree(Tree::load(path)?);
        Ok(())
    }

    /// Append an in-memory tree
    pub fn add_tree(&mut self, tree: Tree) {
        self.offsets.push(self.entries);
        self.entries += tree.entries();
        self.trees.push(tree);
    }

    /// Name of the chain
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of entries
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Chained trees
    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Access one of the chained trees
    pub fn tree(&self, tree_number: usize) -> Option<&Tree> {
        self.trees.get(tree_number)
    }

    /// Global entry number of the first entry of a chained tree
    pub fn offset(&self, tree_number: usize) -> Option<usize> {
        self.offsets.get(tree_number).copied()
    }

    /// Map a global entry number to (tree number, local entry number)
    pub fn locate(&self, entry: usize) -> Option<(usize, usize)> {
        if entry >= self.entries {
            return None;
        }
        // Empty trees share their offset with the next tree, so the last tree
        // starting at or before the entry is the one holding it
        let tree_number = self.offsets.partition_point(|&start| start <= entry) - 1;
        Some((tree_number, entry - self.offsets[tree_number]))
    }

    /// Find out which object instances of which entries pass a selection
    ///
    /// A selection reading per-instance branches is evaluated over the
    /// instances of those branches. Otherwise, it holds for every instance
    /// of an entry or for none of them: `size_branch`, if any, is the scalar
    /// branch giving how many instances each entry has, and entries with no
    /// instance never pass. Without it, each entry counts as one instance.
    ///
    /// Returns None if no instance passes in any entry.
    pub fn draw_entry_list(
        &self,
        selection: &str,
        size_branch: Option<&str>,
    ) -> Result<Option<EntryListArray>> {
        let selection = CompiledExpr::compile(selection)?;
        let mut list = EntryListArray::new();
        for (tree_number, tree) in self.trees.iter().enumerate() {
            let bound = selection.bind(tree)?;
            let sizes = size_branch.map(|name| tree.scalar_branch(name)).transpose()?;
            let offset = self.offsets[tree_number];
            for local in 0..tree.entries() {
                let count = bound
                    .instance_count(local)
                    .or_else(|| sizes.map(|sizes| sizes[local].max(0.) as usize))
                    .unwrap_or(1);
                let passing = (0..count)
                    .filter(|&instance| bound.eval(local, instance) != 0.)
                    .collect::<Vec<_>>();
                if !passing.is_empty() {
                    list.insert(offset + local, tree_number, local, passing);
                }
            }
        }
        Ok(if list.n() == 0 { None } else { Some(list) })
    }

    /// Fill a 2-D histogram with (x, y) pairs of every selected instance
    ///
    /// As in usual ntuple drawing conventions, the value of the cut
    /// expression is used as the fill weight, so that cuts such as
    /// `weight * (met > 50)` work as expected.
    pub fn draw_2d(&self, x: &str, y: &str, cut: &str, hist: &mut Hist2D) -> Result<()> {
        let (x, y, cut) = (
            CompiledExpr::compile(x)?,
            CompiledExpr::compile(y)?,
            CompiledExpr::compile(cut)?,
        );
        for tree in &self.trees {
            let (bx, by, bcut) = (x.bind(tree)?, y.bind(tree)?, cut.bind(tree)?);
            for entry in 0..tree.entries() {
                for instance in 0..joint_instance_count(&[&bx, &by, &bcut], entry) {
                    let weight = bcut.eval(entry, instance);
                    if weight == 0. {
                        continue;
                    }
                    hist.fill(
                        bx.eval(entry, instance) as Float,
                        by.eval(entry, instance) as Float,
                        weight as Float,
                    );
                }
            }
        }
        Ok(())
    }
}
