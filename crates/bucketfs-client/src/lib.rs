//! The object-to-filesystem adaptation layer.
//!
//! [`RawClient`] dispatches single backend calls through the worker
//! pool with a deadline and classifies their outcomes; [`Gateway`]
//! builds the filesystem-facing operations on top of it, keeping the
//! directory tree and the stat store coherent with the bucket.

pub mod convert;
pub mod gateway;
pub mod raw;

pub use convert::VfsStats;
pub use gateway::Gateway;
pub use raw::{ListResult, RawClient};
