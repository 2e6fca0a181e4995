//! An in-memory [`ObjectBackend`] for tests.
//!
//! Implements real bucket semantics over a key-ordered map (listing
//! with delimiter collapsing, server-side move, multipart assembly) and
//! lets tests inject per-operation failures and inspect the call log.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use bucketfs_types::{HttpStatus, TransportStatus};
use bucketfs_utils::{range, time};

use crate::backend::{
    BucketStatistics, KeyEntry, ListObjectsInput, ListPage, ObjectBackend, ObjectBody,
    ObjectHead, PutObjectInput, SdkResponse,
};

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub modified: i64,
    pub encrypted: bool,
}

struct PendingUpload {
    parts: BTreeMap<i32, Bytes>,
    content_type: Option<String>,
}

#[derive(Default)]
pub struct StubBackend {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    uploads: Mutex<HashMap<String, PendingUpload>>,
    next_upload: AtomicU64,
    clock: AtomicI64,
    failures: Mutex<HashMap<&'static str, VecDeque<(TransportStatus, HttpStatus)>>>,
    calls: Mutex<Vec<String>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            clock: AtomicI64::new(time::now_secs()),
            ..Self::default()
        }
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Seed an object directly, bypassing the call log.
    pub fn seed(&self, key: &str, body: impl Into<Bytes>, content_type: Option<&str>) {
        let modified = self.tick();
        self.objects.lock().insert(
            key.to_owned(),
            StoredObject {
                body: body.into(),
                content_type: content_type.map(str::to_owned),
                etag: Some(format!("etag-{modified}")),
                modified,
                encrypted: false,
            },
        );
    }

    /// Drop an object directly, bypassing the call log.
    pub fn unseed(&self, key: &str) {
        self.objects.lock().remove(key);
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().get(key).cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().keys().cloned().collect()
    }

    /// Make the next call to `op` fail with the given HTTP status.
    /// Queued failures are consumed in order, one per call.
    pub fn fail_next(&self, op: &'static str, status: HttpStatus) {
        self.fail_next_with(op, TransportStatus::NoError, status);
    }

    pub fn fail_next_with(
        &self,
        op: &'static str,
        transport: TransportStatus,
        status: HttpStatus,
    ) {
        self.failures
            .lock()
            .entry(op)
            .or_default()
            .push_back((transport, status));
    }

    /// Everything the backend has been asked to do, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn record(&self, line: String) {
        self.calls.lock().push(line);
    }

    fn scripted_failure(&self, op: &'static str) -> Option<(TransportStatus, HttpStatus)> {
        self.failures.lock().get_mut(op).and_then(VecDeque::pop_front)
    }

    fn head_for(object: &StoredObject) -> ObjectHead {
        ObjectHead {
            content_length: object.body.len() as u64,
            content_type: object.content_type.clone(),
            etag: object.etag.clone(),
            last_modified: Some(object.modified),
            encrypted: object.encrypted,
        }
    }

    /// Strip `/bucket/` from a move-source header, yielding the key.
    fn move_source_key(source: &str) -> Option<&str> {
        let mut pieces = source.splitn(3, '/');
        let leading = pieces.next()?;
        if !leading.is_empty() {
            return None;
        }
        let _bucket = pieces.next()?;
        pieces.next()
    }
}

impl ObjectBackend for StubBackend {
    fn head_bucket(&self) -> SdkResponse<()> {
        self.record("HeadBucket".into());
        if let Some((transport, status)) = self.scripted_failure("HeadBucket") {
            return SdkResponse::error(transport, status);
        }
        SdkResponse::ok(HttpStatus::OK, ())
    }

    fn head_object(&self, key: &str, if_modified_since: Option<&str>) -> SdkResponse<ObjectHead> {
        self.record(format!("HeadObject {key}"));
        if let Some((transport, status)) = self.scripted_failure("HeadObject") {
            return SdkResponse::error(transport, status);
        }
        let objects = self.objects.lock();
        match objects.get(key) {
            Some(object) => {
                if let Some(since) = if_modified_since.and_then(time::http_date_to_secs) {
                    if object.modified <= since {
                        return SdkResponse::error(
                            TransportStatus::NoError,
                            HttpStatus::NOT_MODIFIED,
                        );
                    }
                }
                SdkResponse::ok(HttpStatus::OK, Self::head_for(object))
            }
            None => SdkResponse::http_error(HttpStatus::NOT_FOUND),
        }
    }

    fn get_object(&self, key: &str, byte_range: Option<&str>) -> SdkResponse<ObjectBody> {
        self.record(format!("GetObject {key}"));
        if let Some((transport, status)) = self.scripted_failure("GetObject") {
            return SdkResponse::error(transport, status);
        }
        let objects = self.objects.lock();
        let Some(object) = objects.get(key) else {
            return SdkResponse::http_error(HttpStatus::NOT_FOUND);
        };
        let total = object.body.len() as u64;
        match byte_range.and_then(range::parse_range) {
            Some((offset, len)) => {
                let start = offset.min(total) as usize;
                let end = (offset + len).min(total) as usize;
                let slice = object.body.slice(start..end);
                SdkResponse::ok(
                    HttpStatus::PARTIAL_CONTENT,
                    ObjectBody {
                        content_length: slice.len() as u64,
                        content_range: Some(format!(
                            "bytes {start}-{}/{total}",
                            end.saturating_sub(1)
                        )),
                        etag: object.etag.clone(),
                        body: slice,
                    },
                )
            }
            None => SdkResponse::ok(
                HttpStatus::OK,
                ObjectBody {
                    content_length: total,
                    content_range: None,
                    etag: object.etag.clone(),
                    body: object.body.clone(),
                },
            ),
        }
    }

    fn put_object(&self, key: &str, input: &PutObjectInput) -> SdkResponse<()> {
        match &input.move_source {
            Some(source) => self.record(format!("PutObject {key} <- {source}")),
            None => self.record(format!("PutObject {key}")),
        }
        if let Some((transport, status)) = self.scripted_failure("PutObject") {
            return SdkResponse::error(transport, status);
        }

        let mut objects = self.objects.lock();
        if let Some(source) = &input.move_source {
            let Some(src_key) = Self::move_source_key(source) else {
                return SdkResponse::http_error(HttpStatus(400));
            };
            let Some(mut moved) = objects.remove(src_key) else {
                return SdkResponse::http_error(HttpStatus::NOT_FOUND);
            };
            if input.content_type.is_some() {
                moved.content_type = input.content_type.clone();
            }
            moved.modified = self.tick();
            objects.insert(key.to_owned(), moved);
            return SdkResponse::ok(HttpStatus::CREATED, ());
        }

        let modified = self.tick();
        objects.insert(
            key.to_owned(),
            StoredObject {
                body: input.body.clone().unwrap_or_default(),
                content_type: input.content_type.clone(),
                etag: Some(format!("etag-{modified}")),
                modified,
                encrypted: false,
            },
        );
        SdkResponse::ok(HttpStatus::CREATED, ())
    }

    fn delete_object(&self, key: &str) -> SdkResponse<()> {
        self.record(format!("DeleteObject {key}"));
        if let Some((transport, status)) = self.scripted_failure("DeleteObject") {
            return SdkResponse::error(transport, status);
        }
        match self.objects.lock().remove(key) {
            Some(_) => SdkResponse::ok(HttpStatus::NO_CONTENT, ()),
            None => SdkResponse::http_error(HttpStatus::NOT_FOUND),
        }
    }

    fn list_objects(&self, input: &ListObjectsInput) -> SdkResponse<ListPage> {
        self.record(format!(
            "ListObjects prefix={} limit={}",
            input.prefix, input.limit
        ));
        if let Some((transport, status)) = self.scripted_failure("ListObjects") {
            return SdkResponse::error(transport, status);
        }

        // Build the full ordered item sequence, then page by marker.
        let objects = self.objects.lock();
        let mut items: Vec<(String, Option<KeyEntry>)> = Vec::new();
        let mut seen_prefixes = BTreeSet::new();
        for (key, object) in objects.range(input.prefix.clone()..) {
            if !key.starts_with(&input.prefix) {
                break;
            }
            let remainder = &key[input.prefix.len()..];
            match remainder.find(&input.delimiter) {
                // A delimiter below the prefix collapses the key into
                // an implicit-subdirectory common prefix.
                Some(idx) => {
                    let prefix =
                        format!("{}{}", input.prefix, &remainder[..idx + input.delimiter.len()]);
                    if seen_prefixes.insert(prefix.clone()) {
                        items.push((prefix, None));
                    }
                }
                None => {
                    items.push((
                        key.clone(),
                        Some(KeyEntry {
                            key: key.clone(),
                            size: object.body.len() as u64,
                            mime_type: object.content_type.clone(),
                            etag: object.etag.clone(),
                            modified: object.modified,
                            encrypted: object.encrypted,
                        }),
                    ));
                }
            }
        }

        let mut page = ListPage::default();
        let mut taken = 0;
        let mut last_item = None;
        let mut more = false;
        for (sort_key, entry) in items {
            if let Some(marker) = &input.marker {
                if sort_key <= *marker {
                    continue;
                }
            }
            if taken >= input.limit {
                more = true;
                break;
            }
            match entry {
                Some(key_entry) => page.keys.push(key_entry),
                None => page.common_prefixes.push(sort_key.clone()),
            }
            last_item = Some(sort_key);
            taken += 1;
        }
        page.next_marker = if more { last_item } else { None };
        SdkResponse::ok(HttpStatus::OK, page)
    }

    fn initiate_multipart(&self, key: &str, input: &PutObjectInput) -> SdkResponse<String> {
        self.record(format!("InitiateMultipart {key}"));
        if let Some((transport, status)) = self.scripted_failure("InitiateMultipart") {
            return SdkResponse::error(transport, status);
        }
        let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::Relaxed) + 1);
        self.uploads.lock().insert(
            id.clone(),
            PendingUpload {
                parts: BTreeMap::new(),
                content_type: input.content_type.clone(),
            },
        );
        SdkResponse::ok(HttpStatus::OK, id)
    }

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> SdkResponse<()> {
        self.record(format!("UploadPart {key} id={upload_id} part={part_number}"));
        if let Some((transport, status)) = self.scripted_failure("UploadPart") {
            return SdkResponse::error(transport, status);
        }
        match self.uploads.lock().get_mut(upload_id) {
            Some(upload) => {
                upload.parts.insert(part_number, body);
                SdkResponse::ok(HttpStatus::CREATED, ())
            }
            None => SdkResponse::http_error(HttpStatus::NOT_FOUND),
        }
    }

    fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[i32]) -> SdkResponse<()> {
        self.record(format!("CompleteMultipart {key} id={upload_id}"));
        if let Some((transport, status)) = self.scripted_failure("CompleteMultipart") {
            return SdkResponse::error(transport, status);
        }
        let Some(upload) = self.uploads.lock().remove(upload_id) else {
            return SdkResponse::http_error(HttpStatus::NOT_FOUND);
        };
        let mut body = Vec::new();
        for part_number in parts {
            if let Some(part) = upload.parts.get(part_number) {
                body.extend_from_slice(part);
            }
        }
        let modified = self.tick();
        self.objects.lock().insert(
            key.to_owned(),
            StoredObject {
                body: Bytes::from(body),
                content_type: upload.content_type,
                etag: Some(format!("etag-{modified}")),
                modified,
                encrypted: false,
            },
        );
        SdkResponse::ok(HttpStatus::CREATED, ())
    }

    fn abort_multipart(&self, key: &str, upload_id: &str) -> SdkResponse<()> {
        self.record(format!("AbortMultipart {key} id={upload_id}"));
        if let Some((transport, status)) = self.scripted_failure("AbortMultipart") {
            return SdkResponse::error(transport, status);
        }
        match self.uploads.lock().remove(upload_id) {
            Some(_) => SdkResponse::ok(HttpStatus::NO_CONTENT, ()),
            None => SdkResponse::http_error(HttpStatus::NOT_FOUND),
        }
    }

    fn bucket_statistics(&self) -> SdkResponse<BucketStatistics> {
        self.record("GetBucketStatistics".into());
        if let Some((transport, status)) = self.scripted_failure("GetBucketStatistics") {
            return SdkResponse::error(transport, status);
        }
        let objects = self.objects.lock();
        let stats = BucketStatistics {
            size: objects.values().map(|object| object.body.len() as u64).sum(),
            count: objects.len() as u64,
        };
        SdkResponse::ok(HttpStatus::OK, stats)
    }
}
