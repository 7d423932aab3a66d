//! Building blocks of tag-and-probe efficiency and resolution studies
//!
//! Skimmed events are stored in columnar [`tree::Tree`]s, which carry scalar
//! per-event branches and jagged per-object branches. On top of them:
//!
//! * [`expr`] compiles string selections such as `tp.mass > 60 &&
//!   probes.pass` and evaluates them per object instance.
//! * [`tree::Chain::draw_entry_list`] turns a selection into an
//!   [`entrylist::EntryListArray`] recording which instances of which
//!   entries passed.
//! * [`template`] turns entry lists into weighted mass histograms or into
//!   unbinned tables of a [`scratch::ScratchFile`].
//! * [`resolution`] slices 2-D residual histograms and fits every slice with
//!   a double Gaussian to produce resolution [`curve::Curve`]s, which
//!   [`render`] can draw.
//! * [`selectors`] produces skimmed trees out of raw ones.

#![warn(missing_docs)]

pub mod curve;
pub mod entrylist;
pub mod error;
pub mod expr;
pub mod fit;
pub mod hist;
pub mod numeric;
pub mod random;
pub mod render;
pub mod resolution;
pub mod scratch;
pub mod selectors;
pub mod template;
pub mod tree;

pub use crate::error::{Error, Result};
