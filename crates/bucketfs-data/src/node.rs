//! Tree nodes.
//!
//! A node couples its stored path with a shared metadata record and two
//! directed relations: a weak parent back-reference and strongly owned
//! children keyed by base name. Dropping a node's last strong reference
//! after removal tears down its subtree.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use bucketfs_utils::paths;

use crate::meta::{FileMetaData, SharedMeta};

pub struct Node {
    /// Path this node is indexed under. Shared metadata may disagree
    /// for hard links, which alias another path's record.
    path: RwLock<String>,
    meta: SharedMeta,
    parent: Mutex<Weak<Node>>,
    children: Mutex<BTreeMap<String, Arc<Node>>>,
    hard_link: AtomicBool,
    /// Cleared once the node leaves the tree; stale handles observe it.
    operable: AtomicBool,
}

impl Node {
    pub fn new(meta: SharedMeta) -> Arc<Self> {
        let path = meta.read().file_path.clone();
        Arc::new(Self {
            path: RwLock::new(path),
            meta,
            parent: Mutex::new(Weak::new()),
            children: Mutex::new(BTreeMap::new()),
            hard_link: AtomicBool::new(false),
            operable: AtomicBool::new(true),
        })
    }

    /// Create an alias node at `link_path` sharing `meta` with its
    /// target.
    pub fn new_hard_link(link_path: &str, meta: SharedMeta) -> Arc<Self> {
        let node = Self::new(meta);
        *node.path.write() = link_path.to_owned();
        node.hard_link.store(true, Ordering::Release);
        node
    }

    pub fn file_path(&self) -> String {
        self.path.read().clone()
    }

    pub fn set_file_path(&self, path: impl Into<String>) {
        let path = path.into();
        if !self.is_hard_link() {
            self.meta.write().file_path = path.clone();
        }
        *self.path.write() = path;
    }

    /// The shared metadata record.
    pub fn meta(&self) -> SharedMeta {
        self.meta.clone()
    }

    /// Replace the record's contents, keeping every holder of the
    /// shared record in sync.
    pub fn set_entry(&self, meta: FileMetaData) {
        *self.meta.write() = meta;
    }

    pub fn mtime(&self) -> i64 {
        self.meta.read().mtime
    }

    pub fn is_directory(&self) -> bool {
        self.meta.read().is_directory()
    }

    pub fn is_hard_link(&self) -> bool {
        self.hard_link.load(Ordering::Acquire)
    }

    pub fn num_link(&self) -> u32 {
        self.meta.read().num_link
    }

    pub fn increase_num_link(&self) {
        self.meta.write().num_link += 1;
    }

    /// Whether the node is still part of the tree.
    pub fn is_operable(&self) -> bool {
        self.operable.load(Ordering::Acquire)
    }

    pub(crate) fn mark_removed(&self) {
        self.operable.store(false, Ordering::Release);
    }

    pub fn parent(&self) -> Option<Arc<Node>> {
        self.parent.lock().upgrade()
    }

    pub fn set_parent(&self, parent: &Arc<Node>) {
        *self.parent.lock() = Arc::downgrade(parent);
    }

    pub fn insert_child(&self, child: Arc<Node>) {
        let base = paths::base_name(&child.file_path());
        self.children.lock().insert(base, child);
    }

    /// Remove the child indexed at `path` from this node's child map.
    pub fn remove_child(&self, path: &str) -> Option<Arc<Node>> {
        self.children.lock().remove(&paths::base_name(path))
    }

    /// Snapshot of the children, in base-name order.
    pub fn children(&self) -> Vec<Arc<Node>> {
        self.children.lock().values().cloned().collect()
    }

    /// Full paths of the current children.
    pub fn children_paths(&self) -> BTreeSet<String> {
        self.children
            .lock()
            .values()
            .map(|child| child.file_path())
            .collect()
    }

    pub fn has_children(&self) -> bool {
        !self.children.lock().is_empty()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.file_path())
            .field("operable", &self.is_operable())
            .field("children", &self.children.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{shared, FileKind};

    fn file_node(path: &str) -> Arc<Node> {
        let meta = FileMetaData::new(path, 10, 1, 1, 1000, 1000, 0o644, FileKind::File);
        Node::new(shared(meta))
    }

    fn dir_node(path: &str) -> Arc<Node> {
        let meta = FileMetaData::new(path, 0, 1, 1, 1000, 1000, 0o755, FileKind::Directory);
        Node::new(shared(meta))
    }

    #[test]
    fn test_child_insert_remove() {
        let dir = dir_node("/a/");
        let file = file_node("/a/b.txt");
        file.set_parent(&dir);
        dir.insert_child(file.clone());

        assert!(dir.has_children());
        assert_eq!(
            dir.children_paths().into_iter().collect::<Vec<_>>(),
            vec!["/a/b.txt".to_owned()]
        );
        assert_eq!(file.parent().unwrap().file_path(), "/a/");

        let removed = dir.remove_child("/a/b.txt").unwrap();
        assert_eq!(removed.file_path(), "/a/b.txt");
        assert!(!dir.has_children());
    }

    #[test]
    fn test_set_entry_updates_shared_record() {
        let file = file_node("/a/b.txt");
        let record = file.meta();
        let mut updated = record.read().clone();
        updated.file_size = 999;
        updated.mtime = 7;
        file.set_entry(updated);

        assert_eq!(record.read().file_size, 999);
        assert_eq!(file.mtime(), 7);
    }

    #[test]
    fn test_hard_link_shares_record() {
        let file = file_node("/a/b.txt");
        let link = Node::new_hard_link("/a/alias", file.meta());
        assert!(link.is_hard_link());
        assert_eq!(link.file_path(), "/a/alias");

        file.increase_num_link();
        assert_eq!(link.num_link(), 2);
        // The alias path must not leak into the shared record.
        assert_eq!(link.meta().read().file_path, "/a/b.txt");
    }

    #[test]
    fn test_operable_flag() {
        let file = file_node("/a/b.txt");
        assert!(file.is_operable());
        file.mark_removed();
        assert!(!file.is_operable());
    }
}
