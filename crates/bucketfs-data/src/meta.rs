//! Canonical per-path file attributes.

use std::sync::Arc;

use parking_lot::RwLock;

use bucketfs_utils::paths;
use bucketfs_utils::time::now_secs;

/// The kind of filesystem object a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Block,
    Character,
    Fifo,
    Socket,
}

impl FileKind {
    pub fn type_name(self) -> &'static str {
        match self {
            FileKind::File => "File",
            FileKind::Directory => "Directory",
            FileKind::Symlink => "Symbolic Link",
            FileKind::Block => "Block",
            FileKind::Character => "Character",
            FileKind::Fifo => "FIFO",
            FileKind::Socket => "Socket",
        }
    }
}

/// Attributes cached for one absolute path.
///
/// Directory paths always carry a trailing delimiter; the constructor
/// enforces it. Link count starts at 2 for directories (self plus the
/// `.` entry) and 1 for everything else.
#[derive(Debug, Clone, PartialEq)]
pub struct FileMetaData {
    pub file_path: String,
    pub file_size: u64,
    /// Access / modify / change times, UNIX seconds.
    pub atime: i64,
    pub mtime: i64,
    pub ctime: i64,
    /// When this record was cached; never decreases for a given path.
    pub cached_time: i64,
    pub uid: u32,
    pub gid: u32,
    /// Permission bits only; the type bits live in `file_kind`.
    pub mode: u32,
    pub file_kind: FileKind,
    pub mime_type: Option<String>,
    pub etag: Option<String>,
    pub encrypted: bool,
    pub dev: u64,
    pub num_link: u32,
    /// Local modifications not yet pushed to the backend.
    pub need_upload: bool,
    /// An open handle references this record; pins it in the LRU.
    pub file_open: bool,
}

impl FileMetaData {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        file_path: impl Into<String>,
        file_size: u64,
        atime: i64,
        mtime: i64,
        uid: u32,
        gid: u32,
        mode: u32,
        file_kind: FileKind,
    ) -> Self {
        let mut file_path = file_path.into();
        if file_kind == FileKind::Directory {
            file_path = paths::append_delim(&file_path);
        }
        Self {
            file_path,
            file_size,
            atime,
            mtime,
            ctime: mtime,
            cached_time: atime,
            uid,
            gid,
            mode,
            file_kind,
            mime_type: None,
            etag: None,
            encrypted: false,
            dev: 0,
            num_link: if file_kind == FileKind::Directory { 2 } else { 1 },
            need_upload: false,
            file_open: false,
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn is_directory(&self) -> bool {
        self.file_kind == FileKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.file_kind == FileKind::File
    }

    pub fn is_symlink(&self) -> bool {
        self.file_kind == FileKind::Symlink
    }

    /// The parent directory path, trailing delimiter included.
    pub fn dir_name(&self) -> String {
        paths::dir_name(&self.file_path)
    }

    pub fn base_name(&self) -> String {
        paths::base_name(&self.file_path)
    }

    /// The `st_mode` projection: type bits combined with permissions.
    pub fn file_type_and_mode(&self) -> u32 {
        let type_bits = match self.file_kind {
            FileKind::File => libc::S_IFREG,
            FileKind::Directory => libc::S_IFDIR,
            FileKind::Symlink => libc::S_IFLNK,
            FileKind::Block => libc::S_IFBLK,
            FileKind::Character => libc::S_IFCHR,
            FileKind::Fifo => libc::S_IFIFO,
            FileKind::Socket => libc::S_IFSOCK,
        };
        type_bits | self.mode
    }

    /// POSIX permission check for the given requester and access mask
    /// (`R_OK` / `W_OK` / `X_OK`, or `F_OK` for bare existence).
    pub fn allows_access(&self, uid: u32, gid: u32, amode: i32) -> bool {
        if self.file_path.is_empty() {
            return false;
        }
        // F_OK alone asks for bare existence; there is a record, so yes.
        if amode == libc::F_OK {
            return true;
        }

        if amode & libc::R_OK != 0 {
            let allowed = ((uid == self.uid || uid == 0) && self.mode & libc::S_IRUSR != 0)
                || ((gid == self.gid || gid == 0) && self.mode & libc::S_IRGRP != 0)
                || self.mode & libc::S_IROTH != 0;
            if !allowed {
                return false;
            }
        }
        if amode & libc::W_OK != 0 {
            let allowed = ((uid == self.uid || uid == 0) && self.mode & libc::S_IWUSR != 0)
                || ((gid == self.gid || gid == 0) && self.mode & libc::S_IWGRP != 0)
                || self.mode & libc::S_IWOTH != 0;
            if !allowed {
                return false;
            }
        }
        if amode & libc::X_OK != 0 {
            // Root gets execute whenever anyone does.
            let allowed = if uid == 0 {
                self.mode & (libc::S_IXUSR | libc::S_IXGRP | libc::S_IXOTH) != 0
            } else {
                (uid == self.uid && self.mode & libc::S_IXUSR != 0)
                    || (gid == self.gid && self.mode & libc::S_IXGRP != 0)
                    || self.mode & libc::S_IXOTH != 0
            };
            if !allowed {
                return false;
            }
        }
        true
    }
}

/// A metadata record shared between the tree node and the stat store.
pub type SharedMeta = Arc<RwLock<FileMetaData>>;

/// Wrap a record for sharing.
pub fn shared(meta: FileMetaData) -> SharedMeta {
    Arc::new(RwLock::new(meta))
}

/// Synthesize the record for a directory the backend has no object for:
/// current access time, caller-provided mtime, and the identity/mode
/// the gateway was configured with.
pub fn build_default_directory_meta(
    dir_path: &str,
    mtime: i64,
    uid: u32,
    gid: u32,
    mode: u32,
) -> FileMetaData {
    FileMetaData::new(
        paths::append_delim(dir_path),
        0,
        now_secs(),
        mtime,
        uid,
        gid,
        mode,
        FileKind::Directory,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_meta(path: &str, mode: u32) -> FileMetaData {
        FileMetaData::new(path, 4096, 100, 100, 1000, 1000, mode, FileKind::File)
    }

    #[test]
    fn test_directory_path_gets_delimiter() {
        let meta = FileMetaData::new("/a/b", 0, 1, 1, 0, 0, 0o755, FileKind::Directory);
        assert_eq!(meta.file_path, "/a/b/");
        assert_eq!(meta.num_link, 2);
    }

    #[test]
    fn test_file_defaults() {
        let meta = file_meta("/a/b.txt", 0o644);
        assert_eq!(meta.num_link, 1);
        assert_eq!(meta.ctime, meta.mtime);
        assert_eq!(meta.cached_time, meta.atime);
        assert!(!meta.need_upload);
        assert!(!meta.file_open);
    }

    #[test]
    fn test_dir_and_base_name() {
        let meta = file_meta("/a/b.txt", 0o644);
        assert_eq!(meta.dir_name(), "/a/");
        assert_eq!(meta.base_name(), "b.txt");
    }

    #[test]
    fn test_file_type_and_mode() {
        let meta = file_meta("/a/b.txt", 0o644);
        assert_eq!(meta.file_type_and_mode(), libc::S_IFREG | 0o644);

        let dir = FileMetaData::new("/d/", 0, 1, 1, 0, 0, 0o755, FileKind::Directory);
        assert_eq!(dir.file_type_and_mode(), libc::S_IFDIR | 0o755);
    }

    #[test]
    fn test_access_owner() {
        let meta = file_meta("/a/b.txt", 0o600);
        assert!(meta.allows_access(1000, 1000, libc::R_OK | libc::W_OK));
        assert!(!meta.allows_access(2000, 2000, libc::R_OK));
        assert!(meta.allows_access(0, 0, libc::R_OK)); // root reads
    }

    #[test]
    fn test_access_group_and_other() {
        let meta = file_meta("/a/b.txt", 0o064);
        assert!(meta.allows_access(2000, 1000, libc::R_OK)); // via group
        let other = file_meta("/a/b.txt", 0o004);
        assert!(other.allows_access(2000, 2000, libc::R_OK)); // via other
        assert!(!other.allows_access(2000, 2000, libc::W_OK));
    }

    #[test]
    fn test_access_execute_root_needs_any_x_bit() {
        let no_x = file_meta("/a/b.txt", 0o644);
        assert!(!no_x.allows_access(0, 0, libc::X_OK));
        let with_x = file_meta("/a/b.txt", 0o744);
        assert!(with_x.allows_access(0, 0, libc::X_OK));
    }

    #[test]
    fn test_existence_check_always_allowed() {
        let meta = file_meta("/a/b.txt", 0o000);
        assert!(meta.allows_access(2000, 2000, libc::F_OK));
    }

    #[test]
    fn test_default_directory_meta() {
        let meta = build_default_directory_meta("/d", 42, 1000, 1000, 0o755);
        assert_eq!(meta.file_path, "/d/");
        assert!(meta.is_directory());
        assert_eq!(meta.mtime, 42);
        assert_eq!(meta.mode, 0o755);
        assert_eq!(meta.num_link, 2);
    }
}
