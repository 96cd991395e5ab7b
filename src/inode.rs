//! Inode management for the FUSE filesystem.
//!
//! fuser speaks the low-level, inode-addressed FUSE protocol, so the
//! overlay keeps a bidirectional mapping between inode numbers and
//! virtual (plaintext, mount-relative) paths, with the `nlookup`
//! reference counting the kernel expects.
//!
//! The table stores virtual paths only; translation to backing paths
//! happens per-operation in the verb handlers.

use dashmap::DashMap;
use dashmap::mapref::one::Ref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// The root inode number (FUSE convention).
pub const ROOT_INODE: u64 = 1;

/// An entry in the inode table.
#[derive(Debug)]
pub struct InodeEntry {
    /// The virtual path, relative to the mount point. Empty for root.
    pub path: PathBuf,
    /// Lookup count for proper `forget()` handling.
    nlookup: AtomicU64,
}

impl InodeEntry {
    fn new(path: PathBuf, nlookup: u64) -> Self {
        Self {
            path,
            nlookup: AtomicU64::new(nlookup),
        }
    }

    /// Increments the lookup count.
    pub fn inc_nlookup(&self) -> u64 {
        self.nlookup.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrements the lookup count by `count`, saturating at zero.
    /// Returns the remaining count.
    pub fn dec_nlookup(&self, count: u64) -> u64 {
        let old = self.nlookup.fetch_sub(count, Ordering::AcqRel);
        if old < count {
            self.nlookup.fetch_add(count - old, Ordering::Relaxed);
            0
        } else {
            old - count
        }
    }

    /// Returns the current lookup count.
    pub fn nlookup(&self) -> u64 {
        self.nlookup.load(Ordering::Relaxed)
    }
}

/// Thread-safe table mapping between inode numbers and virtual paths.
///
/// Backed by `DashMap` for lock-free concurrent access from the fuser
/// worker threads. The root inode is pre-allocated and never evicted.
pub struct InodeTable {
    by_ino: DashMap<u64, InodeEntry>,
    by_path: DashMap<PathBuf, u64>,
    next_ino: AtomicU64,
}

impl InodeTable {
    /// Creates a new table with the root directory pre-allocated.
    pub fn new() -> Self {
        let by_ino = DashMap::new();
        let by_path = DashMap::new();
        by_ino.insert(ROOT_INODE, InodeEntry::new(PathBuf::new(), 1));
        by_path.insert(PathBuf::new(), ROOT_INODE);
        Self {
            by_ino,
            by_path,
            next_ino: AtomicU64::new(ROOT_INODE + 1),
        }
    }

    /// Allocates an inode for the given virtual path, incrementing the
    /// lookup count if the path is already known. Used by `lookup`,
    /// `create` and `mkdir`, which per the FUSE protocol hand the kernel
    /// a new reference.
    pub fn get_or_insert(&self, path: &Path) -> u64 {
        let mut created = false;
        let ino = self.insert_or_get(path, 1, &mut created);
        if !created {
            if let Some(entry) = self.by_ino.get(&ino) {
                entry.inc_nlookup();
            }
        }
        ino
    }

    /// Allocates an inode WITHOUT touching the lookup count. Per the FUSE
    /// protocol, entries reported from `readdir` must not increment it.
    pub fn get_or_insert_no_lookup(&self, path: &Path) -> u64 {
        let mut created = false;
        self.insert_or_get(path, 0, &mut created)
    }

    fn insert_or_get(&self, path: &Path, nlookup: u64, created: &mut bool) -> u64 {
        // The path entry serializes racing inserts, so every caller agrees
        // on one inode per path.
        let entry = self.by_path.entry(path.to_path_buf()).or_insert_with(|| {
            *created = true;
            let ino = self.next_ino.fetch_add(1, Ordering::Relaxed);
            self.by_ino
                .insert(ino, InodeEntry::new(path.to_path_buf(), nlookup));
            ino
        });
        *entry
    }

    /// Looks up an entry by inode number.
    pub fn get(&self, ino: u64) -> Option<Ref<'_, u64, InodeEntry>> {
        self.by_ino.get(&ino)
    }

    /// Returns the virtual path for an inode, if known.
    pub fn path_of(&self, ino: u64) -> Option<PathBuf> {
        self.by_ino.get(&ino).map(|entry| entry.path.clone())
    }

    /// Looks up an inode by virtual path.
    pub fn get_ino(&self, path: &Path) -> Option<u64> {
        self.by_path.get(path).map(|r| *r)
    }

    /// Decrements the lookup count for an inode, evicting the entry when
    /// the count reaches zero. The root inode is never evicted.
    /// Returns `true` if the inode was evicted.
    pub fn forget(&self, ino: u64, nlookup: u64) -> bool {
        if ino == ROOT_INODE {
            return false;
        }
        let evict = match self.by_ino.get(&ino) {
            Some(entry) => entry.dec_nlookup(nlookup) == 0,
            None => false,
        };
        if evict {
            if let Some((_, entry)) = self.by_ino.remove(&ino) {
                // Only drop the path mapping if it still points at us; a
                // rename or re-create may have repointed it.
                self.by_path.remove_if(&entry.path, |_, v| *v == ino);
                return true;
            }
        }
        false
    }

    /// Drops the path mapping after an unlink or rmdir. The inode entry
    /// itself stays until the kernel sends `forget` — the kernel may still
    /// hold the inode in its dcache and address operations to it.
    pub fn invalidate_path(&self, path: &Path) {
        self.by_path.remove(path);
    }

    /// Re-points a path (and, for directories, every descendant path) at
    /// its new location after a rename.
    pub fn rename_path(&self, old: &Path, new: &Path) {
        let moved: Vec<(PathBuf, u64)> = self
            .by_path
            .iter()
            .filter(|item| item.key().as_path() == old || item.key().starts_with(old))
            .map(|item| (item.key().clone(), *item.value()))
            .collect();

        for (path, ino) in moved {
            let new_path = match path.strip_prefix(old) {
                Ok(suffix) if suffix.as_os_str().is_empty() => new.to_path_buf(),
                Ok(suffix) => new.join(suffix),
                Err(_) => continue,
            };
            self.by_path.remove(&path);
            self.by_path.insert(new_path.clone(), ino);
            if let Some(mut entry) = self.by_ino.get_mut(&ino) {
                entry.path = new_path;
            }
        }
    }

    /// Returns the number of inodes currently in the table.
    pub fn len(&self) -> usize {
        self.by_ino.len()
    }

    /// Returns true if the table only contains the root inode.
    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_inode_exists() {
        let table = InodeTable::new();
        assert!(table.get(ROOT_INODE).is_some());
        assert_eq!(table.path_of(ROOT_INODE), Some(PathBuf::new()));
    }

    #[test]
    fn test_allocate_inode() {
        let table = InodeTable::new();
        let path = Path::new("documents");

        let ino = table.get_or_insert(path);
        assert!(ino > ROOT_INODE);

        // Second call returns the same inode and bumps nlookup
        let ino2 = table.get_or_insert(path);
        assert_eq!(ino, ino2);
        assert_eq!(table.get(ino).unwrap().nlookup(), 2);
    }

    #[test]
    fn test_forget_evicts() {
        let table = InodeTable::new();
        let path = Path::new("temp");

        let ino = table.get_or_insert(path);
        assert_eq!(table.get(ino).unwrap().nlookup(), 1);

        assert!(table.forget(ino, 1));
        assert!(table.get(ino).is_none());
        assert!(table.get_ino(path).is_none());
    }

    #[test]
    fn test_forget_root_never_evicts() {
        let table = InodeTable::new();
        assert!(!table.forget(ROOT_INODE, 1));
        assert!(table.get(ROOT_INODE).is_some());
    }

    #[test]
    fn test_readdir_entries_do_not_bump_nlookup() {
        let table = InodeTable::new();
        let path = Path::new("listed");

        let ino = table.get_or_insert_no_lookup(path);
        assert_eq!(table.get(ino).unwrap().nlookup(), 0);

        let ino2 = table.get_or_insert_no_lookup(path);
        assert_eq!(ino, ino2);
        assert_eq!(table.get(ino).unwrap().nlookup(), 0);

        // A real lookup then takes a reference
        table.get_or_insert(path);
        assert_eq!(table.get(ino).unwrap().nlookup(), 1);
    }

    #[test]
    fn test_invalidate_path_keeps_inode() {
        let table = InodeTable::new();
        let path = Path::new("to_delete");

        let ino = table.get_or_insert(path);
        table.invalidate_path(path);

        // Path mapping gone, inode entry still addressable until forget
        assert!(table.get_ino(path).is_none());
        assert!(table.get(ino).is_some());
    }

    #[test]
    fn test_rename_path() {
        let table = InodeTable::new();
        let old = Path::new("old_name");
        let new = Path::new("new_name");

        let ino = table.get_or_insert(old);
        table.rename_path(old, new);

        assert!(table.get_ino(old).is_none());
        assert_eq!(table.get_ino(new), Some(ino));
        assert_eq!(table.path_of(ino), Some(new.to_path_buf()));
    }

    #[test]
    fn test_rename_moves_descendants() {
        let table = InodeTable::new();
        let dir = table.get_or_insert(Path::new("dir"));
        let child = table.get_or_insert(Path::new("dir/child.txt"));
        let nested = table.get_or_insert(Path::new("dir/sub/deep.txt"));
        // Sibling with a common string prefix must not move
        let sibling = table.get_or_insert(Path::new("dir2/other.txt"));

        table.rename_path(Path::new("dir"), Path::new("renamed"));

        assert_eq!(table.get_ino(Path::new("renamed")), Some(dir));
        assert_eq!(table.get_ino(Path::new("renamed/child.txt")), Some(child));
        assert_eq!(
            table.get_ino(Path::new("renamed/sub/deep.txt")),
            Some(nested)
        );
        assert_eq!(table.get_ino(Path::new("dir2/other.txt")), Some(sibling));
        assert_eq!(table.path_of(child), Some(PathBuf::from("renamed/child.txt")));
    }

    #[test]
    fn test_forget_partial_keeps_entry() {
        let table = InodeTable::new();
        let path = Path::new("multi");

        let ino = table.get_or_insert(path);
        table.get_or_insert(path);
        table.get_or_insert(path);
        assert_eq!(table.get(ino).unwrap().nlookup(), 3);

        assert!(!table.forget(ino, 2));
        assert_eq!(table.get(ino).unwrap().nlookup(), 1);

        assert!(table.forget(ino, 1));
        assert!(table.get(ino).is_none());
    }

    #[test]
    fn test_concurrent_allocation() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(InodeTable::new());
        let mut handles = vec![];

        for i in 0..10 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                table.get_or_insert(Path::new(&format!("file_{i}")))
            }));
        }

        let inos: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mut sorted = inos.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), inos.len());
        assert_eq!(table.len(), 11); // root + 10 files
    }

    #[test]
    fn test_concurrent_same_path_agrees() {
        use std::sync::Arc;
        use std::thread;

        let table = Arc::new(InodeTable::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let table = Arc::clone(&table);
            handles.push(thread::spawn(move || {
                table.get_or_insert(Path::new("shared/file"))
            }));
        }

        let inos: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(inos.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_non_utf8_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let table = InodeTable::new();
        let mut path = PathBuf::from("dir");
        path.push(OsStr::from_bytes(&[0xff, 0xfe]));

        let ino = table.get_or_insert(&path);
        assert_eq!(table.path_of(ino), Some(path));
    }
}
