//! Store abstraction for Ecclesia's state.
//!
//! A store is a directory holding the school database, its audit log and
//! an optional `config.toml` one level up.

use std::path::PathBuf;

/// Where a store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKind {
    /// Project store at `<project>/.ecclesia/data/`
    Project,
    /// Throwaway store (tests, dry runs) rooted anywhere.
    Scratch,
}

/// Store handle. All subsystem state is scoped to a store root.
#[derive(Debug, Clone)]
pub struct Store {
    pub kind: StoreKind,
    /// Absolute path to the store root directory
    pub root: PathBuf,
}

impl Store {
    pub fn scratch(root: impl Into<PathBuf>) -> Self {
        Self {
            kind: StoreKind::Scratch,
            root: root.into(),
        }
    }
}
