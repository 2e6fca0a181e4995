//! The path-indexed directory tree.
//!
//! One root at `/`, a path index of weak handles, and a parent-path to
//! children multi-map used to hook up out-of-order arrivals in O(1).
//! The multi-map holds strong references: it is what keeps a child
//! alive until its directory shows up and adopts it. A single mutex
//! guards both maps; every public operation locks once and delegates
//! to a `*_locked` variant, which is how `UpdateDirectory` re-enters
//! `Grow` without a recursive lock.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use bucketfs_utils::paths;

use crate::meta::{build_default_directory_meta, shared, FileKind, FileMetaData};
use crate::node::Node;

struct TreeState {
    root: Arc<Node>,
    map: HashMap<String, Weak<Node>>,
    parent_to_children: HashMap<String, Vec<Arc<Node>>>,
    default_uid: u32,
    default_gid: u32,
    default_dir_mode: u32,
}

pub struct DirectoryTree {
    state: Mutex<TreeState>,
}

impl DirectoryTree {
    /// Build a tree whose root carries the given attributes. The uid,
    /// gid and mode also seed synthesized directory entries.
    pub fn new(mtime: i64, uid: u32, gid: u32, mode: u32) -> Self {
        let root_meta = FileMetaData::new(
            paths::ROOT_PATH,
            0,
            mtime,
            mtime,
            uid,
            gid,
            mode,
            FileKind::Directory,
        );
        let root = Node::new(shared(root_meta));
        let mut map = HashMap::new();
        map.insert(paths::ROOT_PATH.to_owned(), Arc::downgrade(&root));
        Self {
            state: Mutex::new(TreeState {
                root,
                map,
                parent_to_children: HashMap::new(),
                default_uid: uid,
                default_gid: gid,
                default_dir_mode: mode,
            }),
        }
    }

    pub fn root(&self) -> Arc<Node> {
        self.state.lock().root.clone()
    }

    /// O(1) lookup of a live node.
    pub fn find(&self, file_path: &str) -> Option<Arc<Node>> {
        find_locked(&self.state.lock(), file_path)
    }

    pub fn has(&self, file_path: &str) -> bool {
        self.find(file_path).is_some()
    }

    /// Children registered under `dir_path`, whether or not the
    /// directory node itself exists yet.
    pub fn find_children(&self, dir_path: &str) -> Vec<Arc<Node>> {
        find_children_locked(&self.state.lock(), dir_path)
    }

    /// Idempotent upsert. An existing node is refreshed only when the
    /// incoming mtime is strictly newer; a fresh node is linked to its
    /// parent and, for directories, adopts any already-known children.
    pub fn grow(&self, meta: FileMetaData) -> Arc<Node> {
        grow_locked(&mut self.state.lock(), meta)
    }

    pub fn grow_all(&self, metas: Vec<FileMetaData>) {
        let mut state = self.state.lock();
        for meta in metas {
            grow_locked(&mut state, meta);
        }
    }

    /// Reconcile a fresh listing of `dir_path` against the current
    /// children: entries that disappeared are removed, the rest are
    /// grown. A listing for an unknown directory synthesizes the
    /// directory entry first.
    pub fn update_directory(
        &self,
        dir_path: &str,
        children_metas: Vec<FileMetaData>,
    ) -> Option<Arc<Node>> {
        if dir_path.is_empty() {
            tracing::warn!("empty dir path");
            return None;
        }
        let path = paths::append_delim(dir_path);
        tracing::debug!("update directory {path}");

        let mut state = self.state.lock();

        let mut new_metas = Vec::with_capacity(children_metas.len());
        let mut new_ids = BTreeSet::new();
        for child in children_metas {
            let child_dir = child.dir_name();
            if child_dir.is_empty() {
                tracing::warn!("child {} has empty dirname", child.file_path);
                continue;
            }
            if child_dir != path {
                tracing::warn!("child {} does not belong to {path}", child.file_path);
                continue;
            }
            new_ids.insert(child.file_path.clone());
            new_metas.push(child);
        }

        match find_locked(&state, &path) {
            Some(node) => {
                if !node.is_directory() {
                    tracing::warn!("not a directory: {path}");
                    return None;
                }

                let old_ids = node.children_paths();
                let delete_ids: Vec<String> =
                    old_ids.difference(&new_ids).cloned().collect();
                for child_id in &delete_ids {
                    if let Some(child) = node.remove_child(child_id) {
                        purge_index_locked(&mut state, &child);
                    }
                }

                for meta in new_metas {
                    grow_locked(&mut state, meta);
                }
                Some(node)
            }
            None => {
                let default = build_default_directory_meta(
                    &path,
                    0,
                    state.default_uid,
                    state.default_gid,
                    state.default_dir_mode,
                );
                let node = grow_locked(&mut state, default);
                for meta in new_metas {
                    grow_locked(&mut state, meta);
                }
                Some(node)
            }
        }
    }

    /// Move a node (and, for directories, its whole subtree) to a new
    /// path. The node keeps its identity; only the indexes and stored
    /// paths change. Requires `old` to exist and `new` to be free; the
    /// root cannot be renamed.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Option<Arc<Node>> {
        if old_path.is_empty() || new_path.is_empty() {
            tracing::warn!("cannot rename {old_path:?} -> {new_path:?}");
            return None;
        }
        if paths::is_root(old_path) {
            tracing::warn!("unable to rename root");
            return None;
        }

        let mut state = self.state.lock();
        let node = match find_locked(&state, old_path) {
            Some(node) => node,
            None => {
                tracing::warn!("node not found, no rename: {old_path}");
                return None;
            }
        };
        if find_locked(&state, new_path).is_some() {
            tracing::warn!("node exists, no rename: {new_path}");
            return Some(node);
        }

        tracing::debug!("rename node {old_path} -> {new_path}");
        if let Some(parent) = node.parent() {
            parent.remove_child(old_path);
        }
        relocate_locked(&mut state, &node, old_path, new_path);
        if let Some(new_parent) = find_locked(&state, &paths::dir_name(new_path)) {
            new_parent.insert_child(node.clone());
            node.set_parent(&new_parent);
        }
        Some(node)
    }

    /// Detach `path` from the tree, purging the whole subtree from both
    /// indexes. Dropping the returned-from-parent strong reference
    /// destroys the nodes. The root cannot be removed.
    pub fn remove(&self, file_path: &str) {
        if paths::is_root(file_path) {
            tracing::warn!("unable to remove root");
            return;
        }

        let mut state = self.state.lock();
        let node = match find_locked(&state, file_path) {
            Some(node) => node,
            None => {
                tracing::debug!("no such node, no remove: {file_path}");
                return;
            }
        };

        tracing::debug!("remove node {file_path}");
        if let Some(parent) = node.parent() {
            parent.remove_child(file_path);
        }
        purge_index_locked(&mut state, &node);
    }

    /// Create a local alias for `file_path` at `link_path`. The alias
    /// shares the target's metadata record and bumps its link count.
    /// Fails when the target is missing or is a directory.
    pub fn hard_link(&self, file_path: &str, link_path: &str) -> Option<Arc<Node>> {
        tracing::debug!("hard link {file_path} -> {link_path}");
        let mut state = self.state.lock();
        let node = match find_locked(&state, file_path) {
            Some(node) => node,
            None => {
                tracing::warn!("no such file: {file_path}");
                return None;
            }
        };
        if node.is_directory() {
            tracing::error!("unable to hard link a directory: {file_path}");
            return None;
        }

        let link = Node::new_hard_link(link_path, node.meta());
        node.increase_num_link();

        let parent_path = paths::dir_name(link_path);
        if let Some(parent) = find_locked(&state, &parent_path) {
            parent.insert_child(link.clone());
            link.set_parent(&parent);
        }
        state.map.insert(link_path.to_owned(), Arc::downgrade(&link));
        state
            .parent_to_children
            .entry(parent_path)
            .or_default()
            .push(link.clone());
        Some(link)
    }

    /// Number of live nodes in the path index.
    pub fn node_count(&self) -> usize {
        let state = self.state.lock();
        state
            .map
            .values()
            .filter(|weak| weak.upgrade().is_some())
            .count()
    }
}

fn find_locked(state: &TreeState, file_path: &str) -> Option<Arc<Node>> {
    state
        .map
        .get(file_path)
        .and_then(Weak::upgrade)
        .filter(|node| node.is_operable())
}

fn find_children_locked(state: &TreeState, dir_path: &str) -> Vec<Arc<Node>> {
    state
        .parent_to_children
        .get(dir_path)
        .cloned()
        .unwrap_or_default()
}

fn grow_locked(state: &mut TreeState, meta: FileMetaData) -> Arc<Node> {
    let file_path = meta.file_path.clone();

    if let Some(node) = find_locked(state, &file_path) {
        if meta.mtime > node.mtime() {
            tracing::debug!("update node {file_path}");
            node.set_entry(meta);
        }
        return node;
    }

    tracing::debug!("add node {file_path}");
    let is_dir = meta.is_directory();
    let dir_name = meta.dir_name();
    let node = Node::new(shared(meta));
    state.map.insert(file_path.clone(), Arc::downgrade(&node));

    if let Some(parent) = find_locked(state, &dir_name) {
        parent.insert_child(node.clone());
        node.set_parent(&parent);
    }

    // Adopt children that were grown before their parent arrived.
    if is_dir {
        for child in find_children_locked(state, &file_path) {
            child.set_parent(&node);
            node.insert_child(child);
        }
    }

    state
        .parent_to_children
        .entry(dir_name)
        .or_default()
        .push(node.clone());
    node
}

/// Drop `node` and every descendant from both indexes, breadth-first,
/// testing each popped node for directory-ness before descending.
fn purge_index_locked(state: &mut TreeState, node: &Arc<Node>) {
    let path = node.file_path();
    state.map.remove(&path);
    state.parent_to_children.remove(&path);
    remove_from_bucket(state, &paths::dir_name(&path), &path);
    node.mark_removed();

    if !node.is_directory() {
        return;
    }
    let mut queue: VecDeque<Arc<Node>> = node.children().into();
    while let Some(descendant) = queue.pop_front() {
        let descendant_path = descendant.file_path();
        state.map.remove(&descendant_path);
        state.parent_to_children.remove(&descendant_path);
        descendant.mark_removed();
        if descendant.is_directory() {
            queue.extend(descendant.children());
        }
    }
}

/// Re-key `node` from `old_path` to `new_path` in both indexes and
/// recurse over its subtree. The caller has already re-keyed the node
/// in its parent's child map.
fn relocate_locked(state: &mut TreeState, node: &Arc<Node>, old_path: &str, new_path: &str) {
    state.map.remove(old_path);
    state.map.insert(new_path.to_owned(), Arc::downgrade(node));
    remove_from_bucket(state, &paths::dir_name(old_path), old_path);
    state
        .parent_to_children
        .entry(paths::dir_name(new_path))
        .or_default()
        .push(node.clone());
    node.set_file_path(new_path);

    if node.is_directory() {
        for child in node.children() {
            let child_old = child.file_path();
            debug_assert!(child_old.starts_with(old_path));
            let child_new = format!("{new_path}{}", &child_old[old_path.len()..]);
            relocate_locked(state, &child, &child_old, &child_new);
        }
        if state
            .parent_to_children
            .get(old_path)
            .is_some_and(|bucket| bucket.is_empty())
        {
            state.parent_to_children.remove(old_path);
        }
    }
}

/// Drop the entry for `path` from the children bucket of `parent`.
fn remove_from_bucket(state: &mut TreeState, parent: &str, path: &str) {
    if let Some(bucket) = state.parent_to_children.get_mut(parent) {
        bucket.retain(|node| node.file_path() != path);
        if bucket.is_empty() {
            state.parent_to_children.remove(parent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> DirectoryTree {
        DirectoryTree::new(1, 1000, 1000, 0o755)
    }

    fn file_meta(path: &str, mtime: i64) -> FileMetaData {
        FileMetaData::new(path, 10, mtime, mtime, 1000, 1000, 0o644, FileKind::File)
    }

    fn dir_meta(path: &str, mtime: i64) -> FileMetaData {
        FileMetaData::new(path, 0, mtime, mtime, 1000, 1000, 0o755, FileKind::Directory)
    }

    #[test]
    fn test_new_has_root() {
        let tree = tree();
        assert!(tree.has("/"));
        assert!(tree.root().is_directory());
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_grow_links_parent_and_child() {
        let tree = tree();
        tree.grow(dir_meta("/a/", 5));
        tree.grow(file_meta("/a/b.txt", 5));

        let dir = tree.find("/a/").unwrap();
        let file = tree.find("/a/b.txt").unwrap();
        assert_eq!(file.parent().unwrap().file_path(), "/a/");
        assert_eq!(
            dir.children_paths().into_iter().collect::<Vec<_>>(),
            vec!["/a/b.txt".to_owned()]
        );
    }

    #[test]
    fn test_grow_adopts_out_of_order_children() {
        let tree = tree();
        // Children arrive before their directory.
        tree.grow(file_meta("/a/b.txt", 5));
        tree.grow(file_meta("/a/c.txt", 5));
        tree.grow(dir_meta("/a/", 5));

        let dir = tree.find("/a/").unwrap();
        assert_eq!(dir.children_paths().len(), 2);
        assert_eq!(
            tree.find("/a/b.txt").unwrap().parent().unwrap().file_path(),
            "/a/"
        );
    }

    #[test]
    fn test_grow_newer_mtime_wins() {
        let tree = tree();
        let node = tree.grow(file_meta("/f", 10));

        let mut stale = file_meta("/f", 5);
        stale.file_size = 111;
        tree.grow(stale);
        assert_eq!(node.meta().read().file_size, 10);

        let mut fresh = file_meta("/f", 20);
        fresh.file_size = 222;
        let same = tree.grow(fresh);
        assert!(Arc::ptr_eq(&node, &same));
        assert_eq!(node.meta().read().file_size, 222);
    }

    #[test]
    fn test_update_directory_diffs_children() {
        let tree = tree();
        tree.grow(dir_meta("/d/", 1));
        tree.grow(file_meta("/d/keep.txt", 1));
        tree.grow(file_meta("/d/gone.txt", 1));

        let listing = vec![file_meta("/d/keep.txt", 2), file_meta("/d/new.txt", 2)];
        let node = tree.update_directory("/d/", listing).unwrap();

        assert_eq!(node.children_paths().len(), 2);
        assert!(tree.has("/d/keep.txt"));
        assert!(tree.has("/d/new.txt"));
        assert!(!tree.has("/d/gone.txt"));
    }

    #[test]
    fn test_update_directory_rejects_foreign_children() {
        let tree = tree();
        tree.grow(dir_meta("/d/", 1));
        let listing = vec![file_meta("/other/x.txt", 2), file_meta("/d/ok.txt", 2)];
        tree.update_directory("/d/", listing);
        assert!(tree.has("/d/ok.txt"));
        assert!(!tree.has("/other/x.txt"));
    }

    #[test]
    fn test_update_directory_synthesizes_missing_dir() {
        let tree = tree();
        let listing = vec![file_meta("/d/a.txt", 2)];
        let node = tree.update_directory("/d", listing).unwrap();
        assert_eq!(node.file_path(), "/d/");
        assert!(node.is_directory());
        assert_eq!(node.meta().read().mode, 0o755);
        assert!(tree.has("/d/a.txt"));
    }

    #[test]
    fn test_rename_preserves_identity_and_descendants() {
        let tree = tree();
        tree.grow(dir_meta("/src/", 1));
        tree.grow(file_meta("/src/a.txt", 1));
        tree.grow(dir_meta("/src/sub/", 1));
        tree.grow(file_meta("/src/sub/deep.txt", 1));

        let before = tree.find("/src/sub/deep.txt").unwrap();
        let renamed = tree.rename("/src/", "/dst/").unwrap();

        assert_eq!(renamed.file_path(), "/dst/");
        assert!(!tree.has("/src/"));
        assert!(!tree.has("/src/a.txt"));
        assert!(!tree.has("/src/sub/deep.txt"));
        assert!(tree.has("/dst/a.txt"));
        assert!(tree.has("/dst/sub/"));

        let after = tree.find("/dst/sub/deep.txt").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.meta().read().file_path, "/dst/sub/deep.txt");
    }

    #[test]
    fn test_rename_refuses_existing_target_and_root() {
        let tree = tree();
        tree.grow(file_meta("/a", 1));
        tree.grow(file_meta("/b", 1));
        let node = tree.rename("/a", "/b").unwrap();
        assert_eq!(node.file_path(), "/a");
        assert!(tree.rename("/", "/x").is_none());
    }

    #[test]
    fn test_remove_purges_subtree() {
        let tree = tree();
        tree.grow(dir_meta("/d/", 1));
        tree.grow(file_meta("/d/a.txt", 1));
        tree.grow(dir_meta("/d/sub/", 1));
        tree.grow(file_meta("/d/sub/b.txt", 1));

        let stale = tree.find("/d/sub/b.txt").unwrap();
        tree.remove("/d/");

        assert!(!tree.has("/d/"));
        assert!(!tree.has("/d/a.txt"));
        assert!(!tree.has("/d/sub/"));
        assert!(!tree.has("/d/sub/b.txt"));
        assert!(!stale.is_operable());
        assert!(tree.find_children("/d/").is_empty());
        assert_eq!(tree.node_count(), 1); // only the root
    }

    #[test]
    fn test_remove_root_is_refused() {
        let tree = tree();
        tree.remove("/");
        assert!(tree.has("/"));
    }

    #[test]
    fn test_hard_link() {
        let tree = tree();
        tree.grow(dir_meta("/a/", 1));
        let target = tree.grow(file_meta("/a/b.txt", 1));

        let link = tree.hard_link("/a/b.txt", "/a/alias").unwrap();
        assert!(link.is_hard_link());
        assert_eq!(target.num_link(), 2);
        assert!(tree.has("/a/alias"));
        assert_eq!(
            tree.find("/a/").unwrap().children_paths().len(),
            2
        );
    }

    #[test]
    fn test_hard_link_rejects_directories_and_missing() {
        let tree = tree();
        tree.grow(dir_meta("/d/", 1));
        assert!(tree.hard_link("/d/", "/alias").is_none());
        assert!(tree.hard_link("/missing", "/alias").is_none());
    }
}
