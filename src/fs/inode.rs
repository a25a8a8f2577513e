// Inode <-> path mapping
//
// The kernel identifies entries by inode, the share by path. Every inode the
// kernel is told about carries a lookup count; the kernel hands those counts
// back through forget and the mapping disappears when the count reaches zero.
// The root inode is permanent.

use std::collections::HashMap;

/// Inode of the share root
pub const ROOT_INODE: u64 = 1;

/// Path of the share root
pub const ROOT_PATH: &str = "/";

#[derive(Debug)]
struct InodeEntry {
    path: String,
    refcount: u64,
    /// The path was removed or now names a different entry
    stale: bool,
}

/// Bidirectional, reference-counted mapping between inodes and paths
#[derive(Debug)]
pub struct InodeTable {
    entries: HashMap<u64, InodeEntry>,
    by_path: HashMap<String, u64>,
    next_inode: u64,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let mut table = Self { entries: HashMap::new(), by_path: HashMap::new(), next_inode: 2 };
        table.entries.insert(ROOT_INODE, InodeEntry { path: ROOT_PATH.to_string(), refcount: 1, stale: false });
        table.by_path.insert(ROOT_PATH.to_string(), ROOT_INODE);
        table
    }

    /// Path of a live inode.
    ///
    /// # Panics
    ///
    /// If the inode is unknown. Inodes only reach this table after a reply
    /// that handed them to the kernel, so a miss is a broken invariant.
    pub fn path_for(&self, inode: u64) -> &str {
        match self.entries.get(&inode) {
            Some(entry) => &entry.path,
            None => panic!("inode {} is not in the inode table", inode),
        }
    }

    /// Inode for a path, taking one reference on it.
    pub fn acquire(&mut self, path: &str) -> u64 {
        if let Some(&inode) = self.by_path.get(path) {
            if inode != ROOT_INODE {
                if let Some(entry) = self.entries.get_mut(&inode) {
                    entry.refcount += 1;
                }
            }
            return inode;
        }

        let inode = self.next_inode;
        self.next_inode = inode.checked_add(1).expect("inode counter overflowed");
        self.entries.insert(inode, InodeEntry { path: path.to_string(), refcount: 1, stale: false });
        self.by_path.insert(path.to_string(), inode);
        inode
    }

    /// Drop `count` references, removing the mapping at zero.
    pub fn forget(&mut self, inode: u64, count: u64) {
        if inode == ROOT_INODE {
            return;
        }

        let Some(entry) = self.entries.get_mut(&inode) else {
            tracing::warn!(inode, count, "Forget for unknown inode");
            return;
        };

        if count > entry.refcount {
            tracing::warn!(inode, count, refcount = entry.refcount, "Forget exceeds lookup count");
        }
        entry.refcount = entry.refcount.saturating_sub(count);
        if entry.refcount > 0 {
            return;
        }

        if let Some(entry) = self.entries.remove(&inode) {
            // A rename may have handed the path to another inode
            if self.by_path.get(&entry.path) == Some(&inode) {
                self.by_path.remove(&entry.path);
            }
        }
    }

    /// Unmap `path` after the remote entry is gone. The inode stays alive
    /// until forgotten but is marked stale.
    pub fn detach(&mut self, path: &str) {
        if path == ROOT_PATH {
            return;
        }
        if let Some(inode) = self.by_path.remove(path) {
            self.mark_stale(inode);
        }
    }

    fn mark_stale(&mut self, inode: u64) {
        if let Some(entry) = self.entries.get_mut(&inode) {
            entry.stale = true;
        }
    }

    /// Re-key `old` and everything below it to `new` after a remote rename.
    ///
    /// An inode previously mapped at `new` is marked stale.
    pub fn rename(&mut self, old: &str, new: &str) {
        if old == new || old == ROOT_PATH {
            return;
        }

        let prefix = format!("{}/", old);
        let moved: Vec<(String, u64)> = self
            .by_path
            .iter()
            .filter(|(path, _)| path.as_str() == old || path.starts_with(&prefix))
            .map(|(path, inode)| (path.clone(), *inode))
            .collect();

        if moved.is_empty() {
            return;
        }

        for (path, _) in &moved {
            self.by_path.remove(path);
        }
        for (path, inode) in moved {
            let renamed = format!("{}{}", new, &path[old.len()..]);
            if let Some(displaced) = self.by_path.insert(renamed.clone(), inode) {
                tracing::debug!(inode = displaced, path = %renamed, "Inode displaced by rename");
                self.mark_stale(displaced);
            }
            if let Some(entry) = self.entries.get_mut(&inode) {
                entry.path = renamed;
            }
        }
    }

    /// Inode currently mapped at a path
    pub fn inode_for(&self, path: &str) -> Option<u64> {
        self.by_path.get(path).copied()
    }

    /// Whether the inode's path no longer names its entry
    pub fn is_stale(&self, inode: u64) -> bool {
        self.entries.get(&inode).is_some_and(|entry| entry.stale)
    }

    /// Whether the inode is live
    pub fn contains(&self, inode: u64) -> bool {
        self.entries.contains_key(&inode)
    }

    pub fn refcount(&self, inode: u64) -> Option<u64> {
        self.entries.get(&inode).map(|entry| entry.refcount)
    }

    /// Number of live inodes, root included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Join a directory path and an entry name
pub fn child_path(parent: &str, name: &str) -> String {
    if parent == ROOT_PATH { format!("/{}", name) } else { format!("{}/{}", parent, name) }
}
