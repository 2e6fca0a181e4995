//! Bounded LRU store of shared metadata records.
//!
//! Insertion-ordered list plus a path index; access moves an entry to
//! the front. Eviction walks from the least recently used end, passing
//! over pinned entries (open files, or the path the caller is inserting
//! for). If not enough unpinned victims exist the store refuses the
//! insertion outright rather than evicting part of what it needs.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::meta::{shared, FileMetaData, SharedMeta};

const NIL: usize = usize::MAX;

struct Entry {
    path: String,
    meta: SharedMeta,
    prev: usize,
    next: usize,
}

#[derive(Default)]
struct StoreState {
    map: HashMap<String, usize>,
    slots: Vec<Option<Entry>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
}

pub struct MetaStore {
    state: Mutex<StoreState>,
    max_count: usize,
}

impl MetaStore {
    pub fn new(max_count: usize) -> Self {
        assert!(max_count > 0, "meta store capacity must be positive");
        Self {
            state: Mutex::new(StoreState {
                map: HashMap::new(),
                slots: Vec::new(),
                free: Vec::new(),
                head: NIL,
                tail: NIL,
            }),
            max_count,
        }
    }

    pub fn max_count(&self) -> usize {
        self.max_count
    }

    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().map.is_empty()
    }

    pub fn has(&self, path: &str) -> bool {
        self.state.lock().map.contains_key(path)
    }

    /// Whether `need` more entries fit without eviction.
    pub fn has_free_space(&self, need: usize) -> bool {
        self.state.lock().map.len() + need <= self.max_count
    }

    /// Fetch the record for `path`, marking it most recently used.
    pub fn get(&self, path: &str) -> Option<SharedMeta> {
        let mut state = self.state.lock();
        let idx = *state.map.get(path)?;
        detach(&mut state, idx);
        push_front(&mut state, idx);
        Some(state.slots[idx].as_ref().expect("indexed slot").meta.clone())
    }

    /// Insert or refresh the record for `meta.file_path`.
    ///
    /// Returns false when room could not be made. Refreshing keeps the
    /// local-only flags (`file_open`, `need_upload`) and never lets the
    /// cached-at timestamp go backwards.
    pub fn add(&self, meta: FileMetaData) -> bool {
        let mut state = self.state.lock();
        self.add_locked(&mut state, meta)
    }

    /// Batched insert; stops at the first refused record.
    pub fn add_all(&self, metas: Vec<FileMetaData>) -> bool {
        let mut state = self.state.lock();
        for meta in metas {
            if !self.add_locked(&mut state, meta) {
                return false;
            }
        }
        true
    }

    fn add_locked(&self, state: &mut StoreState, meta: FileMetaData) -> bool {
        if let Some(&idx) = state.map.get(&meta.file_path) {
            let record = state.slots[idx].as_ref().expect("indexed slot").meta.clone();
            {
                let mut guard = record.write();
                let file_open = guard.file_open;
                let need_upload = guard.need_upload;
                let cached_time = guard.cached_time.max(meta.cached_time);
                *guard = meta;
                guard.file_open = file_open;
                guard.need_upload = need_upload;
                guard.cached_time = cached_time;
            }
            detach(state, idx);
            push_front(state, idx);
            return true;
        }

        if state.map.len() + 1 > self.max_count && !self.evict_locked(state, 1, &meta.file_path) {
            tracing::warn!("stat store full, refusing entry for {}", meta.file_path);
            return false;
        }

        let path = meta.file_path.clone();
        let entry = Entry {
            path: path.clone(),
            meta: shared(meta),
            prev: NIL,
            next: NIL,
        };
        let idx = match state.free.pop() {
            Some(idx) => {
                state.slots[idx] = Some(entry);
                idx
            }
            None => {
                state.slots.push(Some(entry));
                state.slots.len() - 1
            }
        };
        push_front(state, idx);
        state.map.insert(path, idx);
        true
    }

    /// Make room for `need` more entries, skipping pinned records.
    /// Either frees enough or frees nothing.
    fn evict_locked(&self, state: &mut StoreState, need: usize, unfreeable: &str) -> bool {
        if need > self.max_count {
            tracing::error!(
                "asked to free {need} entries, more than the store capacity {}",
                self.max_count
            );
            return false;
        }
        let must_free = (state.map.len() + need).saturating_sub(self.max_count);

        let mut victims = Vec::with_capacity(must_free);
        let mut cursor = state.tail;
        while cursor != NIL && victims.len() < must_free {
            let entry = state.slots[cursor].as_ref().expect("linked slot");
            let pinned = entry.meta.read().file_open || entry.path == unfreeable;
            if !pinned {
                victims.push(cursor);
            }
            cursor = entry.prev;
        }
        if victims.len() < must_free {
            return false;
        }

        for idx in victims {
            let path = state.slots[idx].as_ref().expect("linked slot").path.clone();
            detach(&mut *state, idx);
            state.slots[idx] = None;
            state.free.push(idx);
            state.map.remove(&path);
        }
        tracing::debug!("freed {must_free} stat entries");
        true
    }

    /// Drop the record for `path`, if any.
    pub fn erase(&self, path: &str) {
        let mut state = self.state.lock();
        if let Some(idx) = state.map.remove(path) {
            detach(&mut state, idx);
            state.slots[idx] = None;
            state.free.push(idx);
        }
    }

    /// Re-key the record at `old_path`, marking it most recently used.
    /// A collision with an existing record leaves everything untouched.
    pub fn rename(&self, old_path: &str, new_path: &str) {
        if old_path == new_path {
            return;
        }
        let mut state = self.state.lock();
        if state.map.contains_key(new_path) {
            tracing::warn!("stat entry exists, not renaming {old_path} -> {new_path}");
            return;
        }
        let Some(idx) = state.map.remove(old_path) else {
            return;
        };
        {
            let entry = state.slots[idx].as_mut().expect("indexed slot");
            entry.path = new_path.to_owned();
            entry.meta.write().file_path = new_path.to_owned();
        }
        detach(&mut state, idx);
        push_front(&mut state, idx);
        state.map.insert(new_path.to_owned(), idx);
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.map.clear();
        state.slots.clear();
        state.free.clear();
        state.head = NIL;
        state.tail = NIL;
    }

    /// Paths from most to least recently used; test and debug aid.
    pub fn paths_by_recency(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut out = Vec::with_capacity(state.map.len());
        let mut cursor = state.head;
        while cursor != NIL {
            let entry = state.slots[cursor].as_ref().expect("linked slot");
            out.push(entry.path.clone());
            cursor = entry.next;
        }
        out
    }
}

fn detach(state: &mut StoreState, idx: usize) {
    let (prev, next) = {
        let entry = state.slots[idx].as_ref().expect("linked slot");
        (entry.prev, entry.next)
    };
    if prev != NIL {
        state.slots[prev].as_mut().expect("linked slot").next = next;
    } else if state.head == idx {
        state.head = next;
    }
    if next != NIL {
        state.slots[next].as_mut().expect("linked slot").prev = prev;
    } else if state.tail == idx {
        state.tail = prev;
    }
    let entry = state.slots[idx].as_mut().expect("linked slot");
    entry.prev = NIL;
    entry.next = NIL;
}

fn push_front(state: &mut StoreState, idx: usize) {
    let old_head = state.head;
    {
        let entry = state.slots[idx].as_mut().expect("linked slot");
        entry.prev = NIL;
        entry.next = old_head;
    }
    if old_head != NIL {
        state.slots[old_head].as_mut().expect("linked slot").prev = idx;
    }
    state.head = idx;
    if state.tail == NIL {
        state.tail = idx;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::FileKind;

    fn meta(path: &str) -> FileMetaData {
        FileMetaData::new(path, 1, 10, 10, 1000, 1000, 0o644, FileKind::File)
    }

    #[test]
    fn test_add_get() {
        let store = MetaStore::new(4);
        assert!(store.add(meta("/a")));
        assert!(store.add(meta("/b")));
        assert_eq!(store.len(), 2);
        assert!(store.has("/a"));
        assert_eq!(store.get("/a").unwrap().read().file_path, "/a");
        assert!(store.get("/missing").is_none());
    }

    #[test]
    fn test_access_moves_to_front() {
        let store = MetaStore::new(4);
        store.add(meta("/a"));
        store.add(meta("/b"));
        store.add(meta("/c"));
        store.get("/a");
        assert_eq!(store.paths_by_recency(), vec!["/a", "/c", "/b"]);
    }

    #[test]
    fn test_eviction_drops_least_recently_used() {
        let store = MetaStore::new(2);
        store.add(meta("/p1"));
        store.add(meta("/p2"));
        store.add(meta("/p3"));
        assert_eq!(store.len(), 2);
        assert!(!store.has("/p1"));
        assert!(store.has("/p2"));
        assert!(store.has("/p3"));
    }

    #[test]
    fn test_eviction_skips_open_entries() {
        // max=2: p1, p2, p3 evicts p1; pinning p2 then adding p4 must
        // keep p2 and sacrifice p3.
        let store = MetaStore::new(2);
        store.add(meta("/p1"));
        store.add(meta("/p2"));
        store.add(meta("/p3"));
        assert!(!store.has("/p1"));

        store.get("/p2").unwrap().write().file_open = true;
        assert!(store.add(meta("/p4")));
        assert!(store.has("/p2"));
        assert!(!store.has("/p3"));
        assert!(store.has("/p4"));
    }

    #[test]
    fn test_insert_refused_when_everything_pinned() {
        let store = MetaStore::new(2);
        store.add(meta("/a"));
        store.add(meta("/b"));
        store.get("/a").unwrap().write().file_open = true;
        store.get("/b").unwrap().write().file_open = true;

        assert!(!store.add(meta("/c")));
        assert_eq!(store.len(), 2);
        assert!(store.has("/a"));
        assert!(store.has("/b"));
    }

    #[test]
    fn test_refresh_keeps_local_flags_and_cached_time() {
        let store = MetaStore::new(4);
        let mut original = meta("/a");
        original.cached_time = 50;
        store.add(original);
        store.get("/a").unwrap().write().file_open = true;

        let mut newer = meta("/a");
        newer.file_size = 999;
        newer.cached_time = 20; // stale clock
        assert!(store.add(newer));

        let record = store.get("/a").unwrap();
        let guard = record.read();
        assert_eq!(guard.file_size, 999);
        assert!(guard.file_open);
        assert_eq!(guard.cached_time, 50);
    }

    #[test]
    fn test_erase_frees_slot_for_reuse() {
        let store = MetaStore::new(2);
        store.add(meta("/a"));
        store.erase("/a");
        assert!(!store.has("/a"));
        assert!(store.add(meta("/b")));
        assert!(store.add(meta("/c")));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_rename() {
        let store = MetaStore::new(4);
        store.add(meta("/old"));
        store.add(meta("/other"));
        store.rename("/old", "/new");
        assert!(!store.has("/old"));
        let record = store.get("/new").unwrap();
        assert_eq!(record.read().file_path, "/new");

        // Collision: nothing changes.
        store.rename("/new", "/other");
        assert!(store.has("/new"));
        assert!(store.has("/other"));
    }

    #[test]
    fn test_size_never_exceeds_max() {
        let store = MetaStore::new(3);
        for i in 0..32 {
            store.add(meta(&format!("/f{i}")));
            assert!(store.len() <= 3);
        }
    }

    #[test]
    fn test_clear() {
        let store = MetaStore::new(2);
        store.add(meta("/a"));
        store.clear();
        assert!(store.is_empty());
        assert!(store.add(meta("/b")));
    }
}
