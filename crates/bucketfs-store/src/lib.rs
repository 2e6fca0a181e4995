//! The object-store seam: the backend trait the gateway is injected
//! with, its request/response value types, and an in-memory stub
//! backend for tests.

pub mod backend;
pub mod mime;
pub mod stub;

pub use backend::{
    BucketStatistics, KeyEntry, ListObjectsInput, ListPage, ObjectBackend, ObjectBody,
    ObjectHead, PutObjectInput, SdkResponse,
};
pub use stub::StubBackend;
