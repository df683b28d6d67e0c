//! Inode number ↔ path mapping.
//!
//! The kernel addresses files by inode number while the monitor is
//! path-based. A number is handed out when the kernel first looks a path
//! up and is dropped again once the kernel forgets every lookup of it, so
//! the table only holds what the kernel still references.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Inode of the mount root.
pub const ROOT_INODE: u64 = 1;

#[derive(Debug)]
struct Node {
    path: PathBuf,
    lookups: u64,
}

#[derive(Debug)]
pub struct InodeTable {
    by_inode: HashMap<u64, Node>,
    by_path: HashMap<PathBuf, u64>,
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    /// Table containing only the root, which is never forgotten.
    pub fn new() -> Self {
        let root = PathBuf::from("/");
        Self {
            by_inode: HashMap::from([(
                ROOT_INODE,
                Node {
                    path: root.clone(),
                    lookups: 0,
                },
            )]),
            by_path: HashMap::from([(root, ROOT_INODE)]),
            next_inode: ROOT_INODE + 1,
        }
    }

    /// Inode for `path` after the kernel was handed an entry for it.
    ///
    /// Allocates on first sight and counts one kernel reference.
    pub fn lookup(&mut self, path: &Path) -> u64 {
        let inode = match self.by_path.get(path) {
            Some(&existing) => existing,
            None => {
                let inode = self.next_inode;
                self.next_inode = self.next_inode.saturating_add(1);
                self.by_inode.insert(
                    inode,
                    Node {
                        path: path.to_path_buf(),
                        lookups: 0,
                    },
                );
                self.by_path.insert(path.to_path_buf(), inode);
                inode
            }
        };
        if let Some(node) = self.by_inode.get_mut(&inode) {
            node.lookups = node.lookups.saturating_add(1);
        }
        inode
    }

    /// Inode already assigned to `path`, without taking a reference.
    pub fn peek(&self, path: &Path) -> Option<u64> {
        self.by_path.get(path).copied()
    }

    /// Drop `count` kernel references to `inode`.
    pub fn forget(&mut self, inode: u64, count: u64) {
        if inode == ROOT_INODE {
            return;
        }
        let Some(node) = self.by_inode.get_mut(&inode) else {
            return;
        };
        node.lookups = node.lookups.saturating_sub(count);
        if node.lookups == 0 {
            if let Some(node) = self.by_inode.remove(&inode) {
                self.by_path.remove(&node.path);
            }
        }
    }

    pub fn path_for(&self, inode: u64) -> Option<&Path> {
        self.by_inode.get(&inode).map(|node| node.path.as_path())
    }

    /// Path of `name` inside the directory `parent`.
    pub fn child_path(&self, parent: u64, name: &OsStr) -> Option<PathBuf> {
        self.path_for(parent).map(|dir| dir.join(name))
    }

    /// Detach `path` after it was removed.
    ///
    /// The inode itself lives on until forgotten but no longer resolves.
    pub fn remove(&mut self, path: &Path) {
        if let Some(inode) = self.by_path.remove(path) {
            self.by_inode.remove(&inode);
        }
    }

    /// Move `from` and everything below it to `to`, keeping inode numbers.
    pub fn rename(&mut self, from: &Path, to: &Path) {
        self.remove(to);

        let moved: Vec<(PathBuf, u64)> = self
            .by_path
            .iter()
            .filter(|(path, _)| path.starts_with(from))
            .map(|(path, &inode)| (path.clone(), inode))
            .collect();

        for (old, inode) in moved {
            let Ok(suffix) = old.strip_prefix(from) else {
                continue;
            };
            let new = if suffix.as_os_str().is_empty() {
                to.to_path_buf()
            } else {
                to.join(suffix)
            };
            self.by_path.remove(&old);
            self.by_path.insert(new.clone(), inode);
            if let Some(node) = self.by_inode.get_mut(&inode) {
                node.path = new;
            }
        }
    }

    /// Number of inodes currently assigned, the root included.
    pub fn len(&self) -> usize {
        self.by_inode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_inode.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_preallocated() {
        let table = InodeTable::new();
        assert_eq!(table.path_for(ROOT_INODE), Some(Path::new("/")));
        assert_eq!(table.peek(Path::new("/")), Some(ROOT_INODE));
    }

    #[test]
    fn test_lookup_is_stable() {
        let mut table = InodeTable::new();
        let a = table.lookup(Path::new("/a"));
        let b = table.lookup(Path::new("/b"));
        assert_ne!(a, b);
        assert_ne!(a, ROOT_INODE);
        assert_eq!(table.lookup(Path::new("/a")), a);
        assert_eq!(table.peek(Path::new("/a")), Some(a));
        assert_eq!(table.peek(Path::new("/never")), None);
    }

    #[test]
    fn test_forget_releases_after_last_reference() {
        let mut table = InodeTable::new();
        let ino = table.lookup(Path::new("/f"));
        table.lookup(Path::new("/f"));
        assert_eq!(table.len(), 2);

        table.forget(ino, 1);
        assert_eq!(table.path_for(ino), Some(Path::new("/f")));

        table.forget(ino, 1);
        assert_eq!(table.path_for(ino), None);
        assert_eq!(table.peek(Path::new("/f")), None);
        assert_eq!(table.len(), 1);

        // Stale or repeated forgets are harmless.
        table.forget(ino, 5);
        table.forget(ROOT_INODE, 100);
        assert_eq!(table.path_for(ROOT_INODE), Some(Path::new("/")));
    }

    #[test]
    fn test_table_does_not_grow_across_lookup_cycles() {
        let mut table = InodeTable::new();
        for round in 0..100 {
            for name in ["/a", "/a.csv", "/a-heatmap.png"] {
                let ino = table.lookup(Path::new(name));
                table.forget(ino, 1);
            }
            assert_eq!(table.len(), 1, "round {round}");
        }
    }

    #[test]
    fn test_child_path() {
        let mut table = InodeTable::new();
        let dir = table.lookup(Path::new("/dir"));
        assert_eq!(
            table.child_path(dir, OsStr::new("f.bin")),
            Some(PathBuf::from("/dir/f.bin"))
        );
        assert_eq!(
            table.child_path(ROOT_INODE, OsStr::new("x")),
            Some(PathBuf::from("/x"))
        );
        assert_eq!(table.child_path(999, OsStr::new("x")), None);
    }

    #[test]
    fn test_rename_moves_subtree() {
        let mut table = InodeTable::new();
        let dir = table.lookup(Path::new("/old"));
        let file = table.lookup(Path::new("/old/f"));
        let sibling = table.lookup(Path::new("/older"));

        table.rename(Path::new("/old"), Path::new("/new"));

        assert_eq!(table.path_for(dir), Some(Path::new("/new")));
        assert_eq!(table.path_for(file), Some(Path::new("/new/f")));
        assert_eq!(table.path_for(sibling), Some(Path::new("/older")));
        assert_eq!(table.lookup(Path::new("/new/f")), file);

        // Forgetting after a rename drops the new path.
        table.forget(file, 2);
        assert_eq!(table.peek(Path::new("/new/f")), None);
    }

    #[test]
    fn test_remove() {
        let mut table = InodeTable::new();
        let ino = table.lookup(Path::new("/gone"));
        table.remove(Path::new("/gone"));
        assert_eq!(table.path_for(ino), None);
        table.forget(ino, 1);
        assert_ne!(table.lookup(Path::new("/gone")), ino);
    }
}
