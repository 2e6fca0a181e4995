//! Conversions between backend response types and filesystem metadata.

use bucketfs_data::{build_default_directory_meta, FileKind, FileMetaData};
use bucketfs_store::mime::{DIRECTORY_MIME, SYMLINK_MIME};
use bucketfs_store::{BucketStatistics, KeyEntry, ListPage, ObjectHead};
use bucketfs_utils::paths;
use bucketfs_utils::time::now_secs;

/// Identity and mode bits applied to records the backend has no POSIX
/// attributes for.
#[derive(Debug, Clone, Copy)]
pub struct MetaDefaults {
    pub uid: u32,
    pub gid: u32,
    pub file_mode: u32,
    pub dir_mode: u32,
}

fn kind_for(path: &str, content_type: Option<&str>) -> FileKind {
    if paths::is_dir_path(path) || content_type == Some(DIRECTORY_MIME) {
        FileKind::Directory
    } else if content_type == Some(SYMLINK_MIME) {
        FileKind::Symlink
    } else {
        FileKind::File
    }
}

/// Build the record for `path` from a HEAD response.
pub fn head_to_meta(path: &str, head: &ObjectHead, defaults: &MetaDefaults) -> FileMetaData {
    let kind = kind_for(path, head.content_type.as_deref());
    let now = now_secs();
    let mtime = head.last_modified.unwrap_or(now);
    let mode = if kind == FileKind::Directory {
        defaults.dir_mode
    } else {
        defaults.file_mode
    };
    let mut meta = FileMetaData::new(
        path,
        head.content_length,
        now,
        mtime,
        defaults.uid,
        defaults.gid,
        mode,
        kind,
    )
    .with_encrypted(head.encrypted);
    meta.mime_type = head.content_type.clone();
    meta.etag = head.etag.clone();
    meta
}

fn key_to_meta(entry: &KeyEntry, defaults: &MetaDefaults) -> FileMetaData {
    let path = paths::key_to_path(&entry.key);
    let kind = kind_for(&path, entry.mime_type.as_deref());
    let mode = if kind == FileKind::Directory {
        defaults.dir_mode
    } else {
        defaults.file_mode
    };
    let mut meta = FileMetaData::new(
        path,
        entry.size,
        now_secs(),
        entry.modified,
        defaults.uid,
        defaults.gid,
        mode,
        kind,
    )
    .with_encrypted(entry.encrypted);
    meta.mime_type = entry.mime_type.clone();
    meta.etag = entry.etag.clone();
    meta
}

/// Convert one listing page for `dir_path` into records.
///
/// Common prefixes become synthesized directory entries. The listing
/// echo of the directory key itself is kept only when `include_self`
/// is set (a directory the tree has not seen yet).
pub fn page_to_metas(
    page: &ListPage,
    dir_path: &str,
    include_self: bool,
    defaults: &MetaDefaults,
) -> Vec<FileMetaData> {
    let mut metas = Vec::with_capacity(page.keys.len() + page.common_prefixes.len() + 1);

    for entry in &page.keys {
        let path = paths::key_to_path(&entry.key);
        if path == dir_path {
            if include_self {
                metas.push(key_to_meta(entry, defaults));
            }
            continue;
        }
        metas.push(key_to_meta(entry, defaults));
    }

    for prefix in &page.common_prefixes {
        let path = paths::key_to_path(prefix);
        metas.push(build_default_directory_meta(
            &path,
            0,
            defaults.uid,
            defaults.gid,
            defaults.dir_mode,
        ));
    }

    metas
}

/// The filesystem-stat structure handed up to the FUSE binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VfsStats {
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub name_max: u64,
}

const VFS_BLOCK_SIZE: u64 = 4096;
// Object storage has no real capacity ceiling; report a fixed large
// virtual volume so `df` output stays sane.
const VFS_VIRTUAL_CAPACITY: u64 = 1 << 50;

/// Project bucket statistics onto a statvfs-shaped structure.
pub fn statistics_to_vfs(stats: &BucketStatistics) -> VfsStats {
    let blocks = VFS_VIRTUAL_CAPACITY / VFS_BLOCK_SIZE;
    let used = stats.size.div_ceil(VFS_BLOCK_SIZE);
    let free = blocks.saturating_sub(used);
    VfsStats {
        block_size: VFS_BLOCK_SIZE,
        blocks,
        blocks_free: free,
        blocks_available: free,
        files: stats.count,
        name_max: 255,
    }
}
