//! The opaque object-store client the gateway drives.
//!
//! The gateway never constructs the real SDK client; it receives a
//! `dyn ObjectBackend` at composition time. Every method returns the
//! raw (transport, HTTP status, body) triple; interpretation belongs to
//! the response classifier, not to implementations.

use bytes::Bytes;

use bucketfs_types::{HttpStatus, TransportStatus};

/// The raw outcome of one backend call.
#[derive(Debug, Clone)]
pub struct SdkResponse<T> {
    pub transport: TransportStatus,
    pub status: HttpStatus,
    pub body: T,
}

impl<T> SdkResponse<T> {
    pub fn ok(status: HttpStatus, body: T) -> Self {
        Self {
            transport: TransportStatus::NoError,
            status,
            body,
        }
    }
}

impl<T: Default> SdkResponse<T> {
    pub fn error(transport: TransportStatus, status: HttpStatus) -> Self {
        Self {
            transport,
            status,
            body: T::default(),
        }
    }

    /// An HTTP-level failure that did reach the backend.
    pub fn http_error(status: HttpStatus) -> Self {
        Self::error(TransportStatus::NoError, status)
    }
}

/// Headers of interest from a HEAD response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectHead {
    pub content_length: u64,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    /// Last-Modified, UNIX seconds.
    pub last_modified: Option<i64>,
    pub encrypted: bool,
}

/// A GET response body with its transfer headers.
#[derive(Debug, Clone, Default)]
pub struct ObjectBody {
    pub content_length: u64,
    pub content_range: Option<String>,
    pub etag: Option<String>,
    pub body: Bytes,
}

/// Inputs to PUT-style calls (uploads, creates and server-side moves).
#[derive(Debug, Clone, Default)]
pub struct PutObjectInput {
    pub content_type: Option<String>,
    pub content_length: u64,
    pub body: Option<Bytes>,
    /// `/bucket/key` source header for a server-side move.
    pub move_source: Option<String>,
}

/// Inputs to a single list-objects page request.
#[derive(Debug, Clone)]
pub struct ListObjectsInput {
    pub prefix: String,
    pub delimiter: String,
    pub limit: u64,
    pub marker: Option<String>,
}

impl ListObjectsInput {
    pub fn new(prefix: impl Into<String>, limit: u64) -> Self {
        Self {
            prefix: prefix.into(),
            delimiter: bucketfs_utils::paths::DELIMITER.to_string(),
            limit,
            marker: None,
        }
    }
}

/// One listed object key with the metadata the listing carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeyEntry {
    pub key: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub etag: Option<String>,
    /// Modification time, UNIX seconds.
    pub modified: i64,
    pub encrypted: bool,
}

/// One page of a listing: keys, delimiter-collapsed prefixes, and the
/// continuation marker (`None` when the listing is exhausted).
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub keys: Vec<KeyEntry>,
    pub common_prefixes: Vec<String>,
    pub next_marker: Option<String>,
}

impl ListPage {
    pub fn entry_count(&self) -> u64 {
        (self.keys.len() + self.common_prefixes.len()) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.common_prefixes.is_empty()
    }
}

/// Bucket-wide statistics backing `statvfs`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketStatistics {
    /// Bytes stored in the bucket.
    pub size: u64,
    /// Number of objects.
    pub count: u64,
}

/// The object-store client contract. Object keys never carry a leading
/// delimiter; directory keys keep their trailing one. Implementations
/// must be shareable across worker threads.
pub trait ObjectBackend: Send + Sync {
    fn head_bucket(&self) -> SdkResponse<()>;

    fn head_object(&self, key: &str, if_modified_since: Option<&str>) -> SdkResponse<ObjectHead>;

    fn get_object(&self, key: &str, range: Option<&str>) -> SdkResponse<ObjectBody>;

    fn put_object(&self, key: &str, input: &PutObjectInput) -> SdkResponse<()>;

    fn delete_object(&self, key: &str) -> SdkResponse<()>;

    fn list_objects(&self, input: &ListObjectsInput) -> SdkResponse<ListPage>;

    /// Returns the upload id.
    fn initiate_multipart(&self, key: &str, input: &PutObjectInput) -> SdkResponse<String>;

    fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> SdkResponse<()>;

    fn complete_multipart(&self, key: &str, upload_id: &str, parts: &[i32]) -> SdkResponse<()>;

    fn abort_multipart(&self, key: &str, upload_id: &str) -> SdkResponse<()>;

    fn bucket_statistics(&self) -> SdkResponse<BucketStatistics>;
}
