//! Gateway error taxonomy.

use std::fmt;

/// The closed set of error kinds a gateway operation can surface.
///
/// `Good` never appears inside an `Err`; it exists so that string
/// round-trips with backend error codes stay total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Good,
    Unknown,
    KeyNotExist,
    ParameterMissing,
    RequestUninitialized,
    RequestWaiting,
    RequestDeferred,
    RequestExpired,
    RequestSendError,
    UnexpectedResponse,
    NoSuchUpload,
    NoSuchListMultipart,
    NoSuchListMultipartUploads,
    NoSuchListObjects,
    NoSuchMultipartDownload,
    NoSuchMultipartUpload,
    SdkConfigureFileInvalid,
    SdkNoRequiredParameter,
}

impl ErrorKind {
    /// The wire-facing code name for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Good => "Good",
            ErrorKind::Unknown => "Unknown",
            ErrorKind::KeyNotExist => "KeyNotExist",
            ErrorKind::ParameterMissing => "ParameterMissing",
            ErrorKind::RequestUninitialized => "RequestUninitialized",
            ErrorKind::RequestWaiting => "RequestWaiting",
            ErrorKind::RequestDeferred => "RequestDeferred",
            ErrorKind::RequestExpired => "RequestExpired",
            ErrorKind::RequestSendError => "RequestSendError",
            ErrorKind::UnexpectedResponse => "UnexpectedResponse",
            ErrorKind::NoSuchUpload => "NoSuchUpload",
            ErrorKind::NoSuchListMultipart => "NoSuchListMultipart",
            ErrorKind::NoSuchListMultipartUploads => "NoSuchListMultipartUploads",
            ErrorKind::NoSuchListObjects => "NoSuchListObjects",
            ErrorKind::NoSuchMultipartDownload => "NoSuchMultipartDownload",
            ErrorKind::NoSuchMultipartUpload => "NoSuchMultipartUpload",
            ErrorKind::SdkConfigureFileInvalid => "SdkConfigureFileInvalid",
            ErrorKind::SdkNoRequiredParameter => "SdkNoRequiredParameter",
        }
    }

    /// Parse a code name back into a kind. Unrecognized codes map to
    /// `Unknown`.
    pub fn from_code(code: &str) -> Self {
        match code {
            "Good" => ErrorKind::Good,
            "KeyNotExist" => ErrorKind::KeyNotExist,
            "ParameterMissing" => ErrorKind::ParameterMissing,
            "RequestUninitialized" => ErrorKind::RequestUninitialized,
            "RequestWaiting" => ErrorKind::RequestWaiting,
            "RequestDeferred" => ErrorKind::RequestDeferred,
            "RequestExpired" => ErrorKind::RequestExpired,
            "RequestSendError" => ErrorKind::RequestSendError,
            "UnexpectedResponse" => ErrorKind::UnexpectedResponse,
            "NoSuchUpload" => ErrorKind::NoSuchUpload,
            "NoSuchListMultipart" => ErrorKind::NoSuchListMultipart,
            "NoSuchListMultipartUploads" => ErrorKind::NoSuchListMultipartUploads,
            "NoSuchListObjects" => ErrorKind::NoSuchListObjects,
            "NoSuchMultipartDownload" => ErrorKind::NoSuchMultipartDownload,
            "NoSuchMultipartUpload" => ErrorKind::NoSuchMultipartUpload,
            "SdkConfigureFileInvalid" => ErrorKind::SdkConfigureFileInvalid,
            "SdkNoRequiredParameter" => ErrorKind::SdkNoRequiredParameter,
            _ => ErrorKind::Unknown,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error produced by a gateway operation.
///
/// Carries the taxonomy kind, the exception tag identifying the request
/// (operation name plus object key), a diagnostic message and whether a
/// retry of the same request is safe.
#[derive(Debug, Clone)]
#[must_use]
pub struct ApiError {
    kind: ErrorKind,
    exception: String,
    message: String,
    retriable: bool,
}

impl ApiError {
    /// Create an error with just a kind and retriable flag.
    pub fn new(kind: ErrorKind, retriable: bool) -> Self {
        Self {
            kind,
            exception: String::new(),
            message: kind.as_str().to_owned(),
            retriable,
        }
    }

    /// Create an error with full request context.
    pub fn with_context(
        kind: ErrorKind,
        exception: impl Into<String>,
        message: impl Into<String>,
        retriable: bool,
    ) -> Self {
        Self {
            kind,
            exception: exception.into(),
            message: message.into(),
            retriable,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The exception tag (operation name and object key).
    pub fn exception(&self) -> &str {
        &self.exception
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retriable(&self) -> bool {
        self.retriable
    }

    /// Combined kind name, tag and detail, enough to identify the
    /// failed request in a log line.
    pub fn describe(&self) -> String {
        format!("{}, {}:{}", self.kind.as_str(), self.exception, self.message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for ApiError {}

/// The result type used by every gateway operation.
pub type Result<T> = std::result::Result<T, ApiError>;
