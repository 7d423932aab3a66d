//! Error types of the analysis procedures
//!
//! Every variant of [`Error`] aborts the procedure that raised it. Selections
//! which simply match nothing are not errors: the corresponding procedures
//! return `Ok(None)` instead.

use thiserror::Error;

/// Broad classification of what went wrong
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Required configuration is missing or invalid
    Configuration,

    /// Parallel inputs or paired curves do not have matching sizes
    Cardinality,

    /// Internal bookkeeping of an entry list does not match the data
    Integrity,

    /// Underlying data, expression or file handling failed
    Substrate,
}

/// Analysis error type
#[derive(Error, Debug)]
pub enum Error {
    /// No x-axis expression was configured for a resolution plot
    #[error("no x expression has been initialized")]
    MissingXExpression,

    /// None of the per-curve inputs was configured
    #[error("nothing has been initialized in resolution plot")]
    NothingToPlot,

    /// A curve has no tabular data source to read from
    #[error("no data source configured for curve {0}")]
    MissingSource(usize),

    /// The requested tracked variable is not wired to any branch
    #[error("template variable '{0}' is not supported")]
    UnsupportedVariable(String),

    /// Unknown skim category name
    #[error("unknown skim type '{0}'")]
    UnknownSkimType(String),

    /// Unknown resolution extraction rule
    #[error("unknown extraction rule '{0}'")]
    UnknownExtractionRule(String),

    /// Unknown tracked variable name
    #[error("unknown template variable '{0}'")]
    UnknownVariable(String),

    /// Parallel lists or paired curves disagree on their size
    #[error("size mismatch for {what}: expected {expected}, found {found}")]
    Cardinality {
        /// What was being paired
        what: &'static str,
        /// Size implied by the other inputs
        expected: usize,
        /// Size that was actually found
        found: usize,
    },

    /// An entry visited through an entry list has no sub-list
    #[error(
        "sublist not found for entry {list_entry} {tree_entry} \
         ({tree_number}, {local_entry})"
    )]
    MissingSubList {
        /// Position in the entry list
        list_entry: usize,
        /// Global entry number in the chain
        tree_entry: usize,
        /// Index of the tree inside of the chain
        tree_number: usize,
        /// Entry number inside of that tree
        local_entry: usize,
    },

    /// A selected instance index lies beyond the instance count of its entry
    #[error("instance {index} selected in entry {entry}, which only has {size}")]
    InstanceOutOfRange {
        /// Global entry number
        entry: usize,
        /// Selected instance
        index: usize,
        /// Instance count of the entry
        size: usize,
    },

    /// Expression could not be parsed
    #[error("expression error: {0}")]
    Expression(String),

    /// Expression or procedure refers to a branch that does not exist
    #[error("tree '{tree}' has no branch '{branch}'")]
    UnknownBranch {
        /// Tree name
        tree: String,
        /// Missing branch
        branch: String,
    },

    /// Branches of a tree disagree on their entry count
    #[error("branch '{branch}' has {found} entries, tree has {expected}")]
    BranchLength {
        /// Offending branch
        branch: String,
        /// Entry count of the tree
        expected: usize,
        /// Entry count of the branch
        found: usize,
    },

    /// A branch holds scalars where arrays are expected, or vice versa
    #[error("branch '{branch}' should hold {expected}")]
    BranchKind {
        /// Offending branch
        branch: String,
        /// Expected kind of contents
        expected: &'static str,
    },

    /// Invalid histogram or fit setup
    #[error("invalid binning: {0}")]
    Binning(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Plot rendering failed
    #[error("rendering error: {0}")]
    Render(String),
}
//
impl Error {
    /// Tell which class of failure this error belongs to
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::MissingXExpression
            | Error::NothingToPlot
            | Error::MissingSource(_)
            | Error::UnsupportedVariable(_)
            | Error::UnknownSkimType(_)
            | Error::UnknownExtractionRule(_)
            | Error::UnknownVariable(_)
            | Error::Binning(_) => ErrorClass::Configuration,
            Error::Cardinality { .. } => ErrorClass::Cardinality,
            Error::MissingSubList { .. } | Error::InstanceOutOfRange { .. } => {
                ErrorClass::Integrity
            }
            Error::Expression(_)
            | Error::UnknownBranch { .. }
            | Error::BranchLength { .. }
            | Error::BranchKind { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::Render(_) => ErrorClass::Substrate,
        }
    }

    /// All errors abort the current run
    pub fn is_fatal(&self) -> bool {
        true
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(Error::MissingXExpression.class(), ErrorClass::Configuration);
        assert_eq!(
            Error::Cardinality {
                what: "curves",
                expected: 2,
                found: 3
            }
            .class(),
            ErrorClass::Cardinality
        );
        assert_eq!(
            Error::MissingSubList {
                list_entry: 0,
                tree_entry: 1,
                tree_number: 0,
                local_entry: 1
            }
            .class(),
            ErrorClass::Integrity
        );
        assert!(Error::NothingToPlot.is_fatal());
    }

    #[test]
    fn messages() {
        let e = Error::Cardinality {
            what: "ratio curve points",
            expected: 4,
            found: 5,
        };
        assert_eq!(
            e.to_string(),
            "size mismatch for ratio curve points: expected 4, found 5"
        );
    }
}
