//! Mapping of virtual (mount-relative) paths to backing-store paths.

use crate::table::SubstitutionTable;
use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};

/// Maps virtual paths to concrete paths under the backing root.
///
/// The root is the canonicalized backing directory supplied at startup;
/// it is never mutated after construction, so the mapper can be shared
/// freely across the fuser worker threads.
#[derive(Debug, Clone)]
pub struct PathMapper {
    root: PathBuf,
    table: SubstitutionTable,
}

impl PathMapper {
    /// Creates a mapper over an already-canonicalized backing root.
    pub fn new(root: PathBuf, table: SubstitutionTable) -> Self {
        Self { root, table }
    }

    /// The backing root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The substitution table, for content transforms.
    pub fn table(&self) -> SubstitutionTable {
        self.table
    }

    /// Computes the backing path for a virtual path.
    ///
    /// Every component is byte-substituted independently; separators are
    /// identity-mapped by the table, so transforming component-by-component
    /// is equivalent to transforming the whole byte sequence. The returned
    /// buffer is owned by the caller and dropped at end of scope.
    pub fn backing_path(&self, virtual_path: &Path) -> PathBuf {
        let mut backing = self.root.clone();
        for component in virtual_path.components() {
            if let Component::Normal(name) = component {
                backing.push(self.table.transform_os(name));
            }
        }
        backing
    }

    /// Transforms a single directory-entry name read from the backing
    /// store into its virtual (plaintext) form. The table is an involution,
    /// so this is the same transform `backing_path` applies on the way in.
    pub fn reveal_name(&self, name: &OsStr) -> OsString {
        self.table.transform_os(name)
    }
}
