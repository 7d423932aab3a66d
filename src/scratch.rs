//! Scratch storage for unbinned templates
//!
//! Unbinned templates are flat tables of (value, weight) rows. All tables of
//! a run are kept in a single scratch file, which is reopened if it already
//! exists and created otherwise. The caller owns the [`ScratchFile`] handle
//! and passes it to every procedure that writes tables.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter},
    path::{Path, PathBuf},
};
use tracing::debug;

/// Flat table of numerical rows
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<f64>>,
}
//
impl Table {
    /// Create an empty table with some columns
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|&c| c.to_owned()).collect(),
            rows: Vec::new(),
        }
    }

    /// Column names
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Index of a column
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append a row, which must have one value per column
    pub fn push_row(&mut self, row: Vec<f64>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::Cardinality {
                what: "table row",
                expected: self.columns.len(),
                found: row.len(),
            });
        }
        self.rows.push(row);
        Ok(())
    }

    /// All rows
    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Truth that the table has no rows
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one column
    pub fn column(&self, index: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |row| row[index])
    }
}

/// Named tables persisted together in one JSON file
#[derive(Debug)]
pub struct ScratchFile {
    path: PathBuf,
    tables: BTreeMap<String, Table>,
}
//
impl ScratchFile {
    /// Default scratch location
    pub const DEFAULT_PATH: &'static str = "/tmp/templategen.json";

    /// Start a fresh scratch file, discarding whatever an earlier run left
    /// at that location
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        debug!("Recreating scratch file {}", path.display());
        let scratch = Self {
            path,
            tables: BTreeMap::new(),
        };
        scratch.save()?;
        Ok(scratch)
    }

    /// Reopen an existing scratch file, or create an empty one
    ///
    /// Tables written by earlier processes are kept, use [`ScratchFile::create`]
    /// to start from an empty file instead.
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let tables = if path.exists() {
            debug!("Reopening scratch file {}", path.display());
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader(reader)?
        } else {
            debug!("Creating scratch file {}", path.display());
            BTreeMap::new()
        };
        let scratch = Self { path, tables };
        scratch.save()?;
        Ok(scratch)
    }

    /// Location of the scratch file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start a new table, replacing any previous table of the same name
    pub fn create_table(&mut self, name: &str, columns: &[&str]) -> &mut Table {
        let table = self.tables.entry(name.to_owned()).or_default();
        *table = Table::new(columns);
        table
    }

    /// Look up a table
    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Names of all tables
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Write all tables back to disk
    pub fn save(&self) -> Result<()> {
        let writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer(writer, &self.tables)?;
        Ok(())
    }
}
