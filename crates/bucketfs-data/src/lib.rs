//! In-memory namespace state: per-path metadata records, the bounded
//! LRU stat store, and the directory tree shared with the kernel
//! callback thread.

pub mod meta;
pub mod node;
pub mod store;
pub mod tree;

pub use meta::{
    build_default_directory_meta, shared, FileKind, FileMetaData, SharedMeta,
};
pub use node::Node;
pub use store::MetaStore;
pub use tree::DirectoryTree;
