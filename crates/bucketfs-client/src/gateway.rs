//! The filesystem-facing operations.
//!
//! Each operation drives the raw client through the retry policy and
//! keeps the directory tree and the stat store coherent with what the
//! backend reported. This is the surface the FUSE binding calls into.

use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;

use bucketfs_config::GatewayConfig;
use bucketfs_data::{build_default_directory_meta, DirectoryTree, MetaStore};
use bucketfs_executor::{retry, retry_counted, Executor, RetryPolicy};
use bucketfs_store::mime::{lookup_mime_type, DIRECTORY_MIME, SYMLINK_MIME};
use bucketfs_store::{ListObjectsInput, ObjectBackend, PutObjectInput};
use bucketfs_types::{ErrorKind, HttpStatus, Result};
use bucketfs_utils::{paths, range, time};

use crate::convert::{self, MetaDefaults, VfsStats};
use crate::raw::{ListResult, RawClient};

/// Largest page the backend accepts for one list call.
const LIST_OBJECTS_LIMIT: u64 = 200;
/// Seed for the exponential retry backoff.
const RETRY_BASE_DELAY_MS: u64 = 200;
const MIB: u64 = 1 << 20;

fn transfer_timeout_ms(bytes: u64, base_ms: u64) -> u64 {
    bytes.div_ceil(MIB) * base_ms * 4 + 1000
}

fn list_timeout_ms(max_count: u64, base_ms: u64) -> u64 {
    max_count.div_ceil(200) * base_ms * 2 + 1000
}

fn move_timeout_ms(base_ms: u64) -> u64 {
    base_ms * 5
}

fn process_uid() -> u32 {
    // SAFETY: geteuid has no failure modes and touches no memory.
    unsafe { libc::geteuid() }
}

fn process_gid() -> u32 {
    // SAFETY: as geteuid.
    unsafe { libc::getegid() }
}

fn log_move_outcome(outcome: Result<()>) {
    if let Err(err) = outcome {
        tracing::error!("{}", err.describe());
    }
}

pub struct Gateway {
    raw: RawClient,
    tree: Arc<DirectoryTree>,
    store: Arc<MetaStore>,
    config: Arc<GatewayConfig>,
    policy: RetryPolicy,
    defaults: MetaDefaults,
    /// Back-reference handed to detached tasks so they can call back
    /// into the gateway without keeping it alive forever.
    self_ref: Weak<Gateway>,
}

impl Gateway {
    /// Compose a gateway over an injected backend, starting its own
    /// worker pool.
    pub fn new(backend: Arc<dyn ObjectBackend>, config: Arc<GatewayConfig>) -> Arc<Self> {
        let executor = Arc::new(Executor::new(config.pool_size));
        Self::with_executor(backend, executor, config)
    }

    pub fn with_executor(
        backend: Arc<dyn ObjectBackend>,
        executor: Arc<Executor>,
        config: Arc<GatewayConfig>,
    ) -> Arc<Self> {
        let uid = process_uid();
        let gid = process_gid();
        let defaults = MetaDefaults {
            uid,
            gid,
            file_mode: config.file_mode,
            dir_mode: config.dir_mode,
        };
        let tree = Arc::new(DirectoryTree::new(
            time::now_secs(),
            uid,
            gid,
            config.dir_mode,
        ));
        let store = Arc::new(MetaStore::new(config.max_stat_entries));
        Arc::new_cyclic(|self_ref| Self {
            raw: RawClient::new(backend, executor),
            tree,
            store,
            policy: RetryPolicy::new(
                config.max_retries,
                Duration::from_millis(RETRY_BASE_DELAY_MS),
            ),
            defaults,
            config,
            self_ref: self_ref.clone(),
        })
    }

    pub fn tree(&self) -> &Arc<DirectoryTree> {
        &self.tree
    }

    pub fn store(&self) -> &Arc<MetaStore> {
        &self.store
    }

    fn base_ms(&self) -> u64 {
        self.config.transaction_time_ms
    }

    /// Confirm the bucket is reachable.
    pub fn head_bucket(&self) -> Result<()> {
        let base = self.base_ms();
        retry(&self.policy, "head bucket", || self.raw.head_bucket(base))
    }

    /// Refresh the record for `path`. Returns whether anything new was
    /// learned: false for a conditional HEAD answered 304, true when
    /// the record was created or replaced.
    ///
    /// A 404 on a directory-style path is not final: the backend may
    /// never have materialized the directory object, so its children
    /// are probed and the directory synthesized locally.
    pub fn stat(&self, path: &str, modified_since: Option<i64>) -> Result<bool> {
        if paths::is_root(path) {
            // The bucket has no headable object; its mtime is fixed at
            // mount time and never considered modified since.
            self.head_bucket()?;
            return Ok(false);
        }

        let key = paths::object_key(path).to_owned();
        let if_modified_since = modified_since.map(time::secs_to_http_date);
        let base = self.base_ms();
        let outcome = retry(&self.policy, &format!("head object {path}"), || {
            self.raw
                .head_object(&key, if_modified_since.clone(), base)
        });

        match outcome {
            Ok(response) => {
                if response.status == HttpStatus::NOT_MODIFIED {
                    return Ok(false);
                }
                let meta = convert::head_to_meta(path, &response.body, &self.defaults);
                self.tree.grow(meta.clone());
                self.store.add(meta);
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::KeyNotExist && paths::is_dir_path(path) => {
                if self.probe_directory(&key)? {
                    let meta = build_default_directory_meta(
                        path,
                        0,
                        self.defaults.uid,
                        self.defaults.gid,
                        self.defaults.dir_mode,
                    );
                    self.tree.grow(meta.clone());
                    self.store.add(meta);
                    Ok(true)
                } else {
                    Err(err)
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Whether any key lives under `prefix` (an implicit directory).
    fn probe_directory(&self, prefix: &str) -> Result<bool> {
        let mut input = ListObjectsInput::new(prefix, 2);
        let result = self
            .raw
            .list_objects(&mut input, 2, list_timeout_ms(2, self.base_ms()))?;
        Ok(result.pages.iter().any(|page| !page.is_empty()))
    }

    /// Create an empty object at `path`. The backend does not echo the
    /// new attributes, so callers re-stat to learn them.
    pub fn make_file(&self, path: &str) -> Result<()> {
        let key = paths::object_key(path).to_owned();
        let input = PutObjectInput {
            content_type: Some(lookup_mime_type(path).to_owned()),
            content_length: 0,
            ..PutObjectInput::default()
        };
        let base = self.base_ms();
        retry(&self.policy, &format!("make file {path}"), || {
            self.raw.put_object(&key, input.clone(), base)
        })
    }

    /// Create a directory object (trailing delimiter forced).
    pub fn make_directory(&self, dir_path: &str) -> Result<()> {
        let dir = paths::append_delim(dir_path);
        let key = paths::object_key(&dir).to_owned();
        let input = PutObjectInput {
            content_type: Some(DIRECTORY_MIME.to_owned()),
            content_length: 0,
            ..PutObjectInput::default()
        };
        let base = self.base_ms();
        retry(&self.policy, &format!("make directory {dir}"), || {
            self.raw.put_object(&key, input.clone(), base)
        })
    }

    /// Delete a file or empty directory. Hard links are local aliases:
    /// dropping one never deletes the backing object.
    pub fn delete_file(&self, path: &str) -> Result<()> {
        if let Some(node) = self.tree.find(path) {
            if node.is_hard_link() || (!node.is_directory() && node.num_link() >= 2) {
                self.tree.remove(path);
                return Ok(());
            }
        }

        let key = paths::object_key(path).to_owned();
        let base = self.base_ms();
        retry(&self.policy, &format!("delete object {path}"), || {
            self.raw.delete_object(&key, base)
        })?;
        self.tree.remove(path);
        self.store.erase(path);
        Ok(())
    }

    /// Server-side move of one object. A timed-out attempt may have
    /// completed on the backend, in which case the retry sees the
    /// source gone; a 404 after at least one retry therefore counts as
    /// success.
    fn move_object(&self, source_path: &str, target_path: &str) -> Result<()> {
        let source_key = paths::object_key(source_path);
        let target_key = paths::object_key(target_path).to_owned();
        let mut input = PutObjectInput {
            move_source: Some(format!("/{}/{}", self.config.bucket, source_key)),
            content_length: 0,
            ..PutObjectInput::default()
        };
        // Server-side copy discards the content type; restate it for
        // directory objects.
        if paths::is_dir_path(source_path.trim_end()) {
            input.content_type = Some(DIRECTORY_MIME.to_owned());
        }

        let timeout = move_timeout_ms(self.base_ms());
        let what = format!("move object {source_path} -> {target_path}");
        let (outcome, attempts) = retry_counted(&self.policy, &what, || {
            self.raw.put_object(&target_key, input.clone(), timeout)
        });
        match outcome {
            Ok(()) => Ok(()),
            Err(err) if attempts > 0 && err.kind() == ErrorKind::KeyNotExist => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Move one object and relocate its tree node and stat entry.
    ///
    /// Moving onto a directory-style key whose source object was never
    /// materialized fails with 404; the directory is then created at
    /// the destination and the local rename proceeds.
    pub fn move_file(&self, source_path: &str, target_path: &str) -> Result<()> {
        match self.move_object(source_path, target_path) {
            Ok(()) => {
                if self.tree.has(source_path) {
                    self.tree.rename(source_path, target_path);
                }
                self.store.rename(source_path, target_path);
                Ok(())
            }
            Err(err)
                if err.kind() == ErrorKind::KeyNotExist && paths::is_dir_path(target_path) =>
            {
                match self.make_directory(target_path) {
                    Ok(()) => {
                        if self.tree.has(source_path) {
                            self.tree.rename(source_path, target_path);
                        }
                        self.store.rename(source_path, target_path);
                        Ok(())
                    }
                    Err(make_err) => {
                        tracing::debug!("target not created: {}", make_err.describe());
                        Err(err)
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Move a directory: list the source, move every file and recurse
    /// into every subdirectory, then move the directory object itself.
    /// With `async_mode` the per-item moves run as detached tasks whose
    /// failures are logged by the completion handler; the call itself
    /// reports only listing failures.
    pub fn move_directory(
        &self,
        source_dir_path: &str,
        target_dir_path: &str,
        async_mode: bool,
    ) -> Result<()> {
        let source_dir = paths::append_delim(source_dir_path);
        let target_dir = paths::append_delim(target_dir_path);

        let listing = self.list_all_objects(&source_dir)?;
        let source_prefix = paths::object_key(&source_dir).to_owned();

        for page in &listing.pages {
            for entry in &page.keys {
                // The backend lists the directory object under its own
                // prefix; it moves last, not here.
                if entry.key == source_prefix {
                    continue;
                }
                let sub_source = paths::key_to_path(&entry.key);
                let sub_target = format!("{target_dir}{}", &sub_source[source_dir.len()..]);
                self.dispatch_move(async_mode, sub_source, sub_target, false);
            }
        }
        for page in &listing.pages {
            for prefix in &page.common_prefixes {
                let sub_source = paths::append_delim(&paths::key_to_path(prefix));
                let sub_target = format!("{target_dir}{}", &sub_source[source_dir.len()..]);
                self.dispatch_move(async_mode, sub_source, sub_target, true);
            }
        }
        self.dispatch_move(async_mode, source_dir, target_dir, false);
        Ok(())
    }

    fn dispatch_move(
        &self,
        async_mode: bool,
        source: String,
        target: String,
        is_directory: bool,
    ) {
        if async_mode {
            let Some(gateway) = self.self_ref.upgrade() else {
                return;
            };
            self.raw.executor().submit_detached(log_move_outcome, move || {
                if is_directory {
                    gateway.move_directory(&source, &target, false)
                } else {
                    gateway.move_file(&source, &target)
                }
            });
        } else {
            let outcome = if is_directory {
                self.move_directory(&source, &target, false)
            } else {
                self.move_file(&source, &target)
            };
            log_move_outcome(outcome);
        }
    }

    fn list_all_objects(&self, dir: &str) -> Result<ListResult> {
        let prefix = if paths::is_root(dir) {
            String::new()
        } else {
            paths::object_key(dir).to_owned()
        };
        let mut input = ListObjectsInput::new(prefix, LIST_OBJECTS_LIMIT);
        let timeout = list_timeout_ms(0, self.base_ms());
        retry(&self.policy, &format!("list objects {dir}"), || {
            self.raw.list_objects(&mut input, 0, timeout)
        })
    }

    /// Download `byte_range` of `path` (or the whole object) into
    /// `buffer`. Returns the entity tag when the backend sent one.
    pub fn download_range(
        &self,
        path: &str,
        byte_range: Option<&str>,
        buffer: &mut Vec<u8>,
    ) -> Result<Option<String>> {
        let key = paths::object_key(path).to_owned();
        let base = self.base_ms();
        let timeout = match byte_range.and_then(range::parse_range) {
            Some((_, len)) => transfer_timeout_ms(len, base),
            None => base,
        };
        let owned_range = byte_range.map(str::to_owned);
        let body = retry(&self.policy, &format!("download file {path}"), || {
            self.raw.get_object(&key, owned_range.clone(), timeout)
        })?;
        buffer.clear();
        buffer.extend_from_slice(&body.body);
        Ok(body.etag)
    }

    /// Upload the whole object in one PUT.
    pub fn upload_file(&self, path: &str, file_size: u64, content: Bytes) -> Result<()> {
        let key = paths::object_key(path).to_owned();
        let input = PutObjectInput {
            content_type: Some(lookup_mime_type(path).to_owned()),
            content_length: file_size,
            body: (file_size > 0).then(|| content.clone()),
            move_source: None,
        };
        let timeout = transfer_timeout_ms(file_size, self.base_ms());
        retry(&self.policy, &format!("upload file {path}"), || {
            self.raw.put_object(&key, input.clone(), timeout)
        })
    }

    pub fn initiate_multipart_upload(&self, path: &str) -> Result<String> {
        let key = paths::object_key(path).to_owned();
        let input = PutObjectInput {
            content_type: Some(lookup_mime_type(path).to_owned()),
            ..PutObjectInput::default()
        };
        let base = self.base_ms();
        retry(
            &self.policy,
            &format!("initiate multipart upload {path}"),
            || self.raw.initiate_multipart(&key, input.clone(), base),
        )
    }

    pub fn upload_part(
        &self,
        path: &str,
        upload_id: &str,
        part_number: i32,
        part_size: u64,
        content: Bytes,
    ) -> Result<()> {
        let key = paths::object_key(path).to_owned();
        let timeout = transfer_timeout_ms(part_size, self.base_ms());
        retry(&self.policy, &format!("upload part {path}"), || {
            self.raw
                .upload_part(&key, upload_id, part_number, content.clone(), timeout)
        })
    }

    /// Close a multipart upload; `sorted_part_numbers` must be in
    /// ascending part order.
    pub fn complete_multipart_upload(
        &self,
        path: &str,
        upload_id: &str,
        sorted_part_numbers: Vec<i32>,
    ) -> Result<()> {
        let key = paths::object_key(path).to_owned();
        let base = self.base_ms();
        retry(
            &self.policy,
            &format!("complete multipart upload {path}"),
            || {
                self.raw
                    .complete_multipart(&key, upload_id, sorted_part_numbers.clone(), base)
            },
        )
    }

    pub fn abort_multipart_upload(&self, path: &str, upload_id: &str) -> Result<()> {
        let key = paths::object_key(path).to_owned();
        let base = self.base_ms();
        retry(
            &self.policy,
            &format!("abort multipart upload {path}"),
            || self.raw.abort_multipart(&key, upload_id, base),
        )
    }

    /// Store a symlink: the object body is the target path.
    pub fn sym_link(&self, target_path: &str, link_path: &str) -> Result<()> {
        let key = paths::object_key(link_path).to_owned();
        let input = PutObjectInput {
            content_type: Some(SYMLINK_MIME.to_owned()),
            content_length: target_path.len() as u64,
            body: Some(Bytes::copy_from_slice(target_path.as_bytes())),
            move_source: None,
        };
        let base = self.base_ms();
        retry(
            &self.policy,
            &format!("symlink {target_path} -> {link_path}"),
            || self.raw.put_object(&key, input.clone(), base),
        )
    }

    /// List `dir_path` page by page, folding each page into the tree as
    /// it arrives: a directory the tree has not seen grows complete
    /// with its own entry, a known empty one just grows children, and a
    /// populated one is reconciled against the listing.
    pub fn list_directory(&self, dir_path: &str) -> Result<()> {
        let dir = paths::append_delim(dir_path);
        let prefix = if paths::is_root(&dir) {
            String::new()
        } else {
            paths::object_key(&dir).to_owned()
        };

        let max_list = self.config.max_list_count;
        let list_all = max_list == 0;
        let mut max_per_list = LIST_OBJECTS_LIMIT * 2;
        if !list_all && max_list < max_per_list {
            max_per_list = max_list;
        }
        let per_call_max = if list_all { 0 } else { max_per_list };

        let dir_node = self.tree.find(&dir);
        let include_self = dir_node.is_none();
        let grow_only = match &dir_node {
            Some(node) => !node.has_children(),
            None => true,
        };

        let base = self.base_ms();
        let timeout = list_timeout_ms(per_call_max, base);
        let mut input = ListObjectsInput::new(prefix, LIST_OBJECTS_LIMIT.min(max_per_list));
        let mut total = 0u64;
        loop {
            let result = retry(&self.policy, &format!("list directory {dir}"), || {
                self.raw.list_objects(&mut input, per_call_max, timeout)
            })?;

            total += result.count;
            for page in &result.pages {
                let metas = convert::page_to_metas(page, &dir, include_self, &self.defaults);
                if !self.store.add_all(metas.clone()) {
                    tracing::warn!("stat store refused entries while listing {dir}");
                }
                if include_self || grow_only {
                    self.tree.grow_all(metas);
                } else {
                    self.tree.update_directory(&dir, metas);
                }
            }

            if !result.truncated || (!list_all && total >= max_list) {
                return Ok(());
            }
        }
    }

    /// Fill filesystem statistics from the bucket statistics.
    pub fn statvfs(&self) -> Result<VfsStats> {
        let base = self.base_ms();
        let stats = retry(&self.policy, "get bucket statistics", || {
            self.raw.bucket_statistics(base)
        })?;
        Ok(convert::statistics_to_vfs(&stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketfs_data::FileKind;
    use bucketfs_store::StubBackend;
    use bucketfs_types::TransportStatus;

    fn gateway_over(stub: &Arc<StubBackend>) -> Arc<Gateway> {
        let mut config = GatewayConfig::default();
        config.bucket = "bucket".into();
        config.transaction_time_ms = 100;
        Gateway::new(
            Arc::clone(stub) as Arc<dyn ObjectBackend>,
            Arc::new(config),
        )
    }

    #[test]
    fn test_timeout_scaling() {
        assert_eq!(transfer_timeout_ms(0, 500), 1000);
        assert_eq!(transfer_timeout_ms(1, 500), 3000);
        assert_eq!(transfer_timeout_ms(MIB, 500), 3000);
        assert_eq!(transfer_timeout_ms(MIB + 1, 500), 5000);
        assert_eq!(list_timeout_ms(400, 500), 3000);
        assert_eq!(move_timeout_ms(500), 2500);
    }

    #[test]
    fn test_stat_file_grows_tree_and_store() {
        let stub = StubBackend::new().into_arc();
        stub.seed("a/b.txt", "hello", Some("text/plain"));
        let gateway = gateway_over(&stub);

        assert!(gateway.stat("/a/b.txt", None).unwrap());
        let node = gateway.tree().find("/a/b.txt").unwrap();
        assert_eq!(node.meta().read().file_size, 5);
        assert!(gateway.store().has("/a/b.txt"));
    }

    #[test]
    fn test_stat_missing_file_leaves_tree_alone() {
        let stub = StubBackend::new().into_arc();
        let gateway = gateway_over(&stub);

        let err = gateway.stat("/a/b.txt", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotExist);
        assert!(!gateway.tree().has("/a/b.txt"));
        assert_eq!(gateway.tree().node_count(), 1);
    }

    #[test]
    fn test_stat_probes_implicit_directory() {
        let stub = StubBackend::new().into_arc();
        stub.seed("a/f.txt", "x", None);
        let gateway = gateway_over(&stub);

        assert!(gateway.stat("/a/", None).unwrap());
        let node = gateway.tree().find("/a/").unwrap();
        let meta = node.meta();
        let guard = meta.read();
        assert!(guard.is_directory());
        assert_eq!(guard.mode, 0o755);
        assert_eq!(guard.num_link, 2);
    }

    #[test]
    fn test_stat_empty_prefix_stays_missing() {
        let stub = StubBackend::new().into_arc();
        let gateway = gateway_over(&stub);
        let err = gateway.stat("/a/", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::KeyNotExist);
        assert!(!gateway.tree().has("/a/"));
    }

    #[test]
    fn test_stat_root_heads_bucket() {
        let stub = StubBackend::new().into_arc();
        let gateway = gateway_over(&stub);
        assert!(!gateway.stat("/", None).unwrap());
        assert_eq!(stub.calls(), vec!["HeadBucket".to_owned()]);
    }

    #[test]
    fn test_stat_not_modified() {
        let stub = StubBackend::new().into_arc();
        stub.seed("f", "x", None);
        let modified = stub.object("f").unwrap().modified;
        let gateway = gateway_over(&stub);

        assert!(!gateway.stat("/f", Some(modified + 5)).unwrap());
        assert!(!gateway.tree().has("/f"));

        assert!(gateway.stat("/f", Some(modified - 5)).unwrap());
        assert!(gateway.tree().has("/f"));
    }

    #[test]
    fn test_make_directory_then_stat() {
        let stub = StubBackend::new().into_arc();
        let gateway = gateway_over(&stub);

        gateway.make_directory("/d").unwrap();
        assert!(gateway.stat("/d/", None).unwrap());
        let node = gateway.tree().find("/d/").unwrap();
        assert!(node.is_directory());
    }

    #[test]
    fn test_retry_recovers_transient_failure() {
        let stub = StubBackend::new().into_arc();
        stub.fail_next("HeadBucket", HttpStatus(504));
        let gateway = gateway_over(&stub);

        gateway.head_bucket().unwrap();
        assert_eq!(stub.calls().len(), 2);
    }

    #[test]
    fn test_retry_gives_up_on_fatal_failure() {
        let stub = StubBackend::new().into_arc();
        stub.fail_next("HeadBucket", HttpStatus(403));
        let gateway = gateway_over(&stub);

        let err = gateway.head_bucket().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
        assert_eq!(stub.calls().len(), 1);
    }

    #[test]
    fn test_delete_file_removes_everywhere() {
        let stub = StubBackend::new().into_arc();
        stub.seed("f.txt", "x", None);
        let gateway = gateway_over(&stub);
        gateway.stat("/f.txt", None).unwrap();

        gateway.delete_file("/f.txt").unwrap();
        assert!(stub.object("f.txt").is_none());
        assert!(!gateway.tree().has("/f.txt"));
        assert!(!gateway.store().has("/f.txt"));
    }

    #[test]
    fn test_delete_hard_link_only_drops_alias() {
        let stub = StubBackend::new().into_arc();
        stub.seed("f.txt", "x", None);
        let gateway = gateway_over(&stub);
        gateway.stat("/f.txt", None).unwrap();
        gateway.tree().hard_link("/f.txt", "/alias").unwrap();

        gateway.delete_file("/alias").unwrap();
        assert!(!gateway.tree().has("/alias"));
        assert!(gateway.tree().has("/f.txt"));
        // No backend delete was issued for the alias.
        assert!(stub.object("f.txt").is_some());
        assert!(!stub.calls().iter().any(|call| call.starts_with("DeleteObject")));
    }

    #[test]
    fn test_move_file_relocates_node_and_cache() {
        let stub = StubBackend::new().into_arc();
        stub.seed("a.txt", "payload", None);
        let gateway = gateway_over(&stub);
        gateway.stat("/a.txt", None).unwrap();

        gateway.move_file("/a.txt", "/b.txt").unwrap();
        assert!(stub.object("a.txt").is_none());
        assert!(stub.object("b.txt").is_some());
        assert!(!gateway.tree().has("/a.txt"));
        assert!(gateway.tree().has("/b.txt"));
        assert!(gateway.store().has("/b.txt"));
    }

    #[test]
    fn test_move_idempotence_after_retry() {
        let stub = StubBackend::new().into_arc();
        stub.seed("a.txt", "x", None);
        let gateway = gateway_over(&stub);

        // First attempt looks transient; the backend actually finished
        // it, so the retry observes the source gone.
        stub.fail_next("PutObject", HttpStatus(504));
        stub.fail_next("PutObject", HttpStatus::NOT_FOUND);
        gateway.move_file("/a.txt", "/b.txt").unwrap();
    }

    #[test]
    fn test_move_missing_directory_quirk() {
        let stub = StubBackend::new().into_arc();
        // No "src/" object was ever materialized.
        let gateway = gateway_over(&stub);

        gateway.move_file("/src/", "/dst/").unwrap();
        let created = stub.object("dst/").unwrap();
        assert_eq!(created.content_type.as_deref(), Some(DIRECTORY_MIME));
    }

    #[test]
    fn test_move_directory_moves_subtree() {
        let stub = StubBackend::new().into_arc();
        stub.seed("src/", "", Some(DIRECTORY_MIME));
        stub.seed("src/a.txt", "a", None);
        stub.seed("src/sub/deep.txt", "d", None);
        let gateway = gateway_over(&stub);

        gateway.move_directory("/src/", "/dst/", false).unwrap();

        let mut keys = stub.keys();
        keys.sort();
        assert_eq!(
            keys,
            vec!["dst/", "dst/a.txt", "dst/sub/", "dst/sub/deep.txt"]
        );

        // File first, then the subdirectory contents, then the
        // directory objects themselves.
        let moves: Vec<String> = stub
            .calls()
            .into_iter()
            .filter(|call| call.contains("<-"))
            .collect();
        assert_eq!(
            moves,
            vec![
                "PutObject dst/a.txt <- /bucket/src/a.txt".to_owned(),
                "PutObject dst/sub/deep.txt <- /bucket/src/sub/deep.txt".to_owned(),
                "PutObject dst/sub/ <- /bucket/src/sub/".to_owned(),
                "PutObject dst/ <- /bucket/src/".to_owned(),
            ]
        );
    }

    #[test]
    fn test_move_directory_async_completes() {
        let stub = StubBackend::new().into_arc();
        stub.seed("src/", "", Some(DIRECTORY_MIME));
        stub.seed("src/a.txt", "a", None);
        let gateway = gateway_over(&stub);

        gateway.move_directory("/src/", "/dst/", true).unwrap();

        // Detached moves drain on the worker pool.
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while stub.object("dst/a.txt").is_none() || stub.object("dst/").is_none() {
            assert!(std::time::Instant::now() < deadline, "moves never finished");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn test_upload_then_download_range() {
        let stub = StubBackend::new().into_arc();
        let gateway = gateway_over(&stub);

        gateway
            .upload_file("/f.txt", 10, Bytes::from_static(b"0123456789"))
            .unwrap();
        let mut buffer = Vec::new();
        let etag = gateway
            .download_range("/f.txt", Some("bytes=2-5"), &mut buffer)
            .unwrap();
        assert_eq!(buffer, b"2345");
        assert!(etag.is_some());

        let etag_full = gateway
            .download_range("/f.txt", None, &mut buffer)
            .unwrap();
        assert_eq!(buffer, b"0123456789");
        assert_eq!(etag, etag_full);
    }

    #[test]
    fn test_multipart_upload_flow() {
        let stub = StubBackend::new().into_arc();
        let gateway = gateway_over(&stub);

        let upload_id = gateway.initiate_multipart_upload("/big.bin").unwrap();
        gateway
            .upload_part("/big.bin", &upload_id, 1, 2, Bytes::from_static(b"aa"))
            .unwrap();
        gateway
            .upload_part("/big.bin", &upload_id, 2, 2, Bytes::from_static(b"bb"))
            .unwrap();
        gateway
            .complete_multipart_upload("/big.bin", &upload_id, vec![1, 2])
            .unwrap();
        assert_eq!(&stub.object("big.bin").unwrap().body[..], b"aabb");

        let abandoned = gateway.initiate_multipart_upload("/other.bin").unwrap();
        gateway
            .abort_multipart_upload("/other.bin", &abandoned)
            .unwrap();
        assert!(stub.object("other.bin").is_none());
    }

    #[test]
    fn test_symlink_object() {
        let stub = StubBackend::new().into_arc();
        let gateway = gateway_over(&stub);

        gateway.sym_link("/data/real.txt", "/link").unwrap();
        let object = stub.object("link").unwrap();
        assert_eq!(&object.body[..], b"/data/real.txt");
        assert_eq!(object.content_type.as_deref(), Some(SYMLINK_MIME));

        assert!(gateway.stat("/link", None).unwrap());
        let node = gateway.tree().find("/link").unwrap();
        assert_eq!(node.meta().read().file_kind, FileKind::Symlink);
    }

    #[test]
    fn test_list_directory_builds_tree() {
        let stub = StubBackend::new().into_arc();
        stub.seed("d/", "", Some(DIRECTORY_MIME));
        stub.seed("d/a.txt", "a", None);
        stub.seed("d/sub/x.txt", "x", None);
        let gateway = gateway_over(&stub);

        gateway.list_directory("/d/").unwrap();
        assert!(gateway.tree().has("/d/"));
        assert!(gateway.tree().has("/d/a.txt"));
        assert!(gateway.tree().has("/d/sub/"));
        let dir = gateway.tree().find("/d/").unwrap();
        assert_eq!(dir.children_paths().len(), 2);
        assert!(gateway.store().has("/d/a.txt"));
    }

    #[test]
    fn test_list_directory_reconciles_changes() {
        let stub = StubBackend::new().into_arc();
        stub.seed("d/", "", Some(DIRECTORY_MIME));
        stub.seed("d/old.txt", "o", None);
        let gateway = gateway_over(&stub);
        gateway.list_directory("/d/").unwrap();
        assert!(gateway.tree().has("/d/old.txt"));

        // The bucket changed behind our back.
        stub.seed("d/new.txt", "n", None);
        stub.unseed("d/old.txt");

        gateway.list_directory("/d/").unwrap();
        assert!(!gateway.tree().has("/d/old.txt"));
        assert!(gateway.tree().has("/d/new.txt"));
    }

    #[test]
    fn test_statvfs() {
        let stub = StubBackend::new().into_arc();
        stub.seed("a", "12345", None);
        let gateway = gateway_over(&stub);

        let vfs = gateway.statvfs().unwrap();
        assert_eq!(vfs.files, 1);
        assert_eq!(vfs.block_size, 4096);
    }

    #[test]
    fn test_transport_error_then_success() {
        let stub = StubBackend::new().into_arc();
        stub.seed("f", "x", None);
        stub.fail_next_with(
            "HeadObject",
            TransportStatus::SendError,
            HttpStatus::NOT_MADE,
        );
        let gateway = gateway_over(&stub);

        assert!(gateway.stat("/f", None).unwrap());
        assert_eq!(
            stub.calls()
                .iter()
                .filter(|call| call.starts_with("HeadObject"))
                .count(),
            2
        );
    }
}
