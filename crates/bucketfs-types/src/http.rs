//! HTTP and transport status model plus the response classifier.
//!
//! Every backend call yields a transport status (did the request leave
//! the machine) and an HTTP response code. The classifier folds the two
//! into an [`ApiError`] with a retriable flag; callers never inspect
//! raw codes outside this module.

use std::fmt;

use crate::error::{ApiError, ErrorKind};

/// An HTTP response code. `HttpStatus::NOT_MADE` (0) marks a request
/// that never produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HttpStatus(pub u16);

impl HttpStatus {
    pub const NOT_MADE: HttpStatus = HttpStatus(0);
    pub const OK: HttpStatus = HttpStatus(200);
    pub const CREATED: HttpStatus = HttpStatus(201);
    pub const NO_CONTENT: HttpStatus = HttpStatus(204);
    pub const PARTIAL_CONTENT: HttpStatus = HttpStatus(206);
    pub const NOT_MODIFIED: HttpStatus = HttpStatus(304);
    pub const NOT_FOUND: HttpStatus = HttpStatus(404);

    /// Whether this code counts as a successful response:
    /// informational, 2xx, 302 Found or 304 Not Modified.
    pub fn is_success(self) -> bool {
        matches!(self.0, 100..=199 | 200..=299 | 302 | 304)
    }

    /// Whether a request answered with this code is worth retrying.
    pub fn should_retry(self) -> bool {
        matches!(self.0, 100 | 102 | 429 | 504 | 509 | 598 | 599)
    }

    /// The conventional reason phrase, condensed to a single name.
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "RequestNotMade",
            100 => "Continue",
            101 => "SwitchingProtocols",
            102 => "Processing",
            200 => "Ok",
            201 => "Created",
            202 => "Accepted",
            203 => "NonAuthoritativeInformation",
            204 => "NoContent",
            205 => "ResetContent",
            206 => "PartialContent",
            207 => "MultiStatus",
            208 => "AlreadyReported",
            226 => "IMUsed",
            300 => "MultipleChoices",
            301 => "MovedPermanently",
            302 => "Found",
            303 => "SeeOther",
            304 => "NotModified",
            305 => "UseProxy",
            307 => "TemporaryRedirect",
            308 => "PermanentRedirect",
            400 => "BadRequest",
            401 => "UnauthorizedOrExpired",
            402 => "DelinquentAccount",
            403 => "Forbidden",
            404 => "NotFound",
            405 => "MethodNotAllowed",
            409 => "Conflict",
            412 => "PreconditionFailed",
            416 => "InvalidRange",
            429 => "TooManyRequests",
            500 => "InternalServerError",
            503 => "ServiceUnavailable",
            504 => "GatewayTimeout",
            505 => "HttpVersionNotSupported",
            506 => "VariantAlsoNegotiates",
            507 => "InsufficientStorage",
            508 => "LoopDetected",
            509 => "BandwidthLimitExceeded",
            510 => "NotExtended",
            511 => "NetworkAuthenticationRequired",
            598 => "NetworkReadTimeout",
            599 => "NetworkConnectTimeout",
            _ => "UnknownResponseCode",
        }
    }

    /// `"NotFound(404)"` style description.
    pub fn describe(self) -> String {
        format!("{}({})", self.name(), self.0)
    }
}

impl fmt::Display for HttpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A structured error body parsed from an unexpected response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseErrorInfo {
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub url: String,
}

/// The transport-level outcome of a backend call, independent of any
/// HTTP response code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    /// The request was sent and a response arrived.
    NoError,
    /// The SDK configuration file could not be used.
    ConfigFileInvalid,
    /// A parameter the SDK requires was absent.
    MissingRequiredParameter,
    /// The request could not be sent at all.
    SendError,
    /// A response arrived that the SDK could not interpret; may carry a
    /// structured error body.
    UnexpectedResponse(Option<ResponseErrorInfo>),
}

impl TransportStatus {
    fn kind(&self) -> ErrorKind {
        match self {
            TransportStatus::NoError => ErrorKind::Unknown,
            TransportStatus::ConfigFileInvalid => ErrorKind::SdkConfigureFileInvalid,
            TransportStatus::MissingRequiredParameter => ErrorKind::ParameterMissing,
            TransportStatus::SendError => ErrorKind::RequestSendError,
            TransportStatus::UnexpectedResponse(_) => ErrorKind::UnexpectedResponse,
        }
    }
}

/// Whether the pair (transport, response code) counts as success.
pub fn response_success(transport: &TransportStatus, status: HttpStatus) -> bool {
    *transport == TransportStatus::NoError && status.is_success()
}

fn status_kind(status: HttpStatus) -> ErrorKind {
    match status.0 {
        0 => ErrorKind::Unknown,
        404 => ErrorKind::KeyNotExist,
        _ if status.is_success() => ErrorKind::Good,
        300..=599 => ErrorKind::UnexpectedResponse,
        _ => ErrorKind::Unknown,
    }
}

/// Classify a failed backend response into an [`ApiError`].
///
/// The response code decides the kind where it can; otherwise the
/// transport status does. A structured error body, when present, is
/// folded into the message so the remote request can be identified.
pub fn classify_response(
    transport: &TransportStatus,
    status: HttpStatus,
    exception: &str,
) -> ApiError {
    let mut kind = status_kind(status);
    if kind == ErrorKind::Unknown {
        kind = transport.kind();
    }

    let retriable = match kind {
        ErrorKind::RequestSendError => true,
        ErrorKind::KeyNotExist => false,
        _ => status.should_retry(),
    };

    if let TransportStatus::UnexpectedResponse(Some(info)) = transport {
        let message = format!(
            "[code:{}; message:{}; request:{}; url:{}]",
            info.code, info.message, info.request_id, info.url
        );
        return ApiError::with_context(kind, exception, message, retriable);
    }

    ApiError::with_context(kind, exception, status.describe(), retriable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_codes() {
        for code in [100, 101, 102, 200, 201, 204, 206, 226, 302, 304] {
            assert!(HttpStatus(code).is_success(), "code {code}");
        }
        for code in [0, 300, 301, 303, 400, 404, 429, 500, 599] {
            assert!(!HttpStatus(code).is_success(), "code {code}");
        }
    }

    #[test]
    fn test_retriable_codes() {
        for code in [100, 102, 429, 504, 509, 598, 599] {
            assert!(HttpStatus(code).should_retry(), "code {code}");
        }
        for code in [200, 304, 400, 404, 500, 503] {
            assert!(!HttpStatus(code).should_retry(), "code {code}");
        }
    }

    #[test]
    fn test_classify_not_found() {
        let err = classify_response(&TransportStatus::NoError, HttpStatus::NOT_FOUND, "HeadObject");
        assert_eq!(err.kind(), ErrorKind::KeyNotExist);
        assert!(!err.is_retriable());
        assert_eq!(err.message(), "NotFound(404)");
    }

    #[test]
    fn test_classify_throttled_is_retriable() {
        let err = classify_response(&TransportStatus::NoError, HttpStatus(429), "PutObject");
        assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
        assert!(err.is_retriable());
    }

    #[test]
    fn test_classify_server_error_not_retriable() {
        let err = classify_response(&TransportStatus::NoError, HttpStatus(500), "PutObject");
        assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_classify_send_error() {
        let err = classify_response(&TransportStatus::SendError, HttpStatus::NOT_MADE, "GetObject");
        assert_eq!(err.kind(), ErrorKind::RequestSendError);
        assert!(err.is_retriable());
    }

    #[test]
    fn test_classify_structured_body() {
        let info = ResponseErrorInfo {
            code: "invalid_range".into(),
            message: "range not satisfiable".into(),
            request_id: "req-123".into(),
            url: "https://bucket.zone.example/object".into(),
        };
        let err = classify_response(
            &TransportStatus::UnexpectedResponse(Some(info)),
            HttpStatus(416),
            "GetObject",
        );
        assert_eq!(err.kind(), ErrorKind::UnexpectedResponse);
        assert!(err.message().contains("request:req-123"));
        assert!(err.message().contains("invalid_range"));
    }

    #[test]
    fn test_response_success() {
        assert!(response_success(&TransportStatus::NoError, HttpStatus::OK));
        assert!(!response_success(
            &TransportStatus::SendError,
            HttpStatus::OK
        ));
        assert!(!response_success(
            &TransportStatus::NoError,
            HttpStatus::NOT_FOUND
        ));
    }
}
