//! Shared core types for the bucketfs gateway.
//!
//! Holds the closed error taxonomy, the HTTP/transport status model and
//! the response classifier that turns backend outcomes into [`ApiError`]
//! values with a retriable flag.

pub mod error;
pub mod http;

pub use error::{ApiError, ErrorKind, Result};
pub use http::{
    classify_response, response_success, HttpStatus, ResponseErrorInfo, TransportStatus,
};
