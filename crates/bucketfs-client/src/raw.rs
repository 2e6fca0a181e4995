//! Per-call backend dispatch.
//!
//! Every method enqueues one backend call at high priority on the
//! worker pool, waits up to the caller's deadline, and interprets the
//! raw outcome through the response classifier. Paged listing loops
//! here so callers see whole listings.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use bucketfs_executor::{Executor, WaitTimeout};
use bucketfs_store::{
    BucketStatistics, ListObjectsInput, ListPage, ObjectBackend, ObjectBody, ObjectHead,
    PutObjectInput, SdkResponse,
};
use bucketfs_types::{
    classify_response, response_success, ApiError, ErrorKind, HttpStatus, Result,
};
use bucketfs_utils::range;

/// A completed (possibly multi-page) listing.
#[derive(Debug, Default)]
pub struct ListResult {
    pub pages: Vec<ListPage>,
    /// More entries remained past the requested count.
    pub truncated: bool,
    /// Keys plus common prefixes seen.
    pub count: u64,
}

pub struct RawClient {
    backend: Arc<dyn ObjectBackend>,
    executor: Arc<Executor>,
}

fn timeout_error(exception: &str, timeout: WaitTimeout) -> ApiError {
    if timeout.started {
        // A worker is still on it; retrying would duplicate the call's
        // side effects.
        ApiError::with_context(
            ErrorKind::RequestWaiting,
            exception,
            ErrorKind::RequestWaiting.as_str(),
            false,
        )
    } else {
        ApiError::with_context(
            ErrorKind::RequestUninitialized,
            exception,
            ErrorKind::RequestUninitialized.as_str(),
            true,
        )
    }
}

fn missing_parameter(exception: &str, message: &str) -> ApiError {
    ApiError::with_context(ErrorKind::ParameterMissing, exception, message, false)
}

impl RawClient {
    pub fn new(backend: Arc<dyn ObjectBackend>, executor: Arc<Executor>) -> Self {
        Self { backend, executor }
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Run `call` against the backend on a worker thread, bounded by
    /// `timeout_ms`, and fold the raw response into the taxonomy.
    fn dispatch<T, F>(&self, exception: String, timeout_ms: u64, call: F) -> Result<SdkResponse<T>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ObjectBackend) -> SdkResponse<T> + Send + 'static,
    {
        let backend = Arc::clone(&self.backend);
        let outcome = self.executor.submit_await(
            move || call(backend.as_ref()),
            Duration::from_millis(timeout_ms),
        );
        match outcome {
            Ok(response) => {
                if response_success(&response.transport, response.status) {
                    Ok(response)
                } else {
                    Err(classify_response(
                        &response.transport,
                        response.status,
                        &exception,
                    ))
                }
            }
            Err(timeout) => Err(timeout_error(&exception, timeout)),
        }
    }

    pub fn head_bucket(&self, timeout_ms: u64) -> Result<()> {
        self.dispatch("HeadBucket".to_owned(), timeout_ms, |backend| {
            backend.head_bucket()
        })
        .map(|_| ())
    }

    pub fn head_object(
        &self,
        key: &str,
        if_modified_since: Option<String>,
        timeout_ms: u64,
    ) -> Result<SdkResponse<ObjectHead>> {
        let exception = format!("HeadObject object={key}");
        if key.is_empty() {
            return Err(missing_parameter(&exception, "empty object key"));
        }
        let key = key.to_owned();
        self.dispatch(exception, timeout_ms, move |backend| {
            backend.head_object(&key, if_modified_since.as_deref())
        })
    }

    pub fn get_object(
        &self,
        key: &str,
        byte_range: Option<String>,
        timeout_ms: u64,
    ) -> Result<ObjectBody> {
        let exception = format!("GetObject object={key}");
        if key.is_empty() {
            return Err(missing_parameter(&exception, "empty object key"));
        }
        let requested = byte_range.as_deref().and_then(range::parse_range);
        let key_owned = key.to_owned();
        let response = self.dispatch(exception.clone(), timeout_ms, move |backend| {
            backend.get_object(&key_owned, byte_range.as_deref())
        })?;

        if let Some((_, requested_len)) = requested {
            // A ranged read must answer 206; anything else is a
            // backend inconsistency worth retrying.
            if response.status != HttpStatus::PARTIAL_CONTENT {
                return Err(ApiError::with_context(
                    ErrorKind::UnexpectedResponse,
                    exception,
                    response.status.describe(),
                    true,
                ));
            }
            if response.body.content_length < requested_len {
                tracing::warn!(
                    "short ranged read: requested {requested_len} bytes, got {} ({:?})",
                    response.body.content_length,
                    response.body.content_range
                );
            }
        }
        Ok(response.body)
    }

    pub fn put_object(&self, key: &str, input: PutObjectInput, timeout_ms: u64) -> Result<()> {
        let exception = format!("PutObject object={key}");
        if key.is_empty() {
            return Err(missing_parameter(&exception, "empty object key"));
        }
        let key = key.to_owned();
        self.dispatch(exception, timeout_ms, move |backend| {
            backend.put_object(&key, &input)
        })
        .map(|_| ())
    }

    pub fn delete_object(&self, key: &str, timeout_ms: u64) -> Result<()> {
        let exception = format!("DeleteObject object={key}");
        if key.is_empty() {
            return Err(missing_parameter(&exception, "empty object key"));
        }
        let key = key.to_owned();
        self.dispatch(exception, timeout_ms, move |backend| {
            backend.delete_object(&key)
        })
        .map(|_| ())
    }

    /// Page through a listing. `max_count == 0` lists everything under
    /// the prefix; otherwise the per-page limit is clamped to what is
    /// left of the budget. The input's marker advances page by page, so
    /// a retried call resumes where the last success left off.
    pub fn list_objects(
        &self,
        input: &mut ListObjectsInput,
        max_count: u64,
        timeout_ms: u64,
    ) -> Result<ListResult> {
        let exception = format!("ListObjects prefix={}", input.prefix);
        if input.limit == 0 {
            return Err(ApiError::with_context(
                ErrorKind::NoSuchListObjects,
                exception,
                "zero count limit",
                false,
            ));
        }

        let list_all = max_count == 0;
        let mut result = ListResult::default();
        loop {
            if !list_all {
                let remaining = max_count - result.count;
                input.limit = input.limit.min(remaining);
            }

            let page_input = input.clone();
            let response = self.dispatch(exception.clone(), timeout_ms, move |backend| {
                backend.list_objects(&page_input)
            })?;
            let page = response.body;

            result.count += page.entry_count();
            result.truncated = page.next_marker.is_some();
            if let Some(marker) = &page.next_marker {
                input.marker = Some(marker.clone());
            }
            result.pages.push(page);

            if !result.truncated || (!list_all && result.count >= max_count) {
                return Ok(result);
            }
        }
    }

    pub fn initiate_multipart(
        &self,
        key: &str,
        input: PutObjectInput,
        timeout_ms: u64,
    ) -> Result<String> {
        let exception = format!("InitiateMultipartUpload object={key}");
        if key.is_empty() {
            return Err(missing_parameter(&exception, "empty object key"));
        }
        let key = key.to_owned();
        self.dispatch(exception, timeout_ms, move |backend| {
            backend.initiate_multipart(&key, &input)
        })
        .map(|response| response.body)
    }

    pub fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
        timeout_ms: u64,
    ) -> Result<()> {
        let exception = format!("UploadPart object={key}");
        if key.is_empty() || upload_id.is_empty() {
            return Err(missing_parameter(&exception, "empty object key or upload id"));
        }
        let key = key.to_owned();
        let upload_id = upload_id.to_owned();
        self.dispatch(exception, timeout_ms, move |backend| {
            backend.upload_part(&key, &upload_id, part_number, body)
        })
        .map(|_| ())
    }

    pub fn complete_multipart(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<i32>,
        timeout_ms: u64,
    ) -> Result<()> {
        let exception = format!("CompleteMultipartUpload object={key}");
        if key.is_empty() || upload_id.is_empty() {
            return Err(missing_parameter(&exception, "empty object key or upload id"));
        }
        let key = key.to_owned();
        let upload_id = upload_id.to_owned();
        self.dispatch(exception, timeout_ms, move |backend| {
            backend.complete_multipart(&key, &upload_id, &parts)
        })
        .map(|_| ())
    }

    pub fn abort_multipart(&self, key: &str, upload_id: &str, timeout_ms: u64) -> Result<()> {
        let exception = format!("AbortMultipartUpload object={key}");
        if key.is_empty() || upload_id.is_empty() {
            return Err(missing_parameter(&exception, "empty object key or upload id"));
        }
        let key = key.to_owned();
        let upload_id = upload_id.to_owned();
        self.dispatch(exception, timeout_ms, move |backend| {
            backend.abort_multipart(&key, &upload_id)
        })
        .map(|_| ())
    }

    pub fn bucket_statistics(&self, timeout_ms: u64) -> Result<BucketStatistics> {
        self.dispatch(
            "GetBucketStatistics".to_owned(),
            timeout_ms,
            |backend| backend.bucket_statistics(),
        )
        .map(|response| response.body)
    }
}
