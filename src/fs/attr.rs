// Attribute records reported to the kernel
//
// Remote stats are normalized before they leave the filesystem: only regular
// files and directories are admitted, permission bits are clamped to the owner
// and group, and ownership is always the mount's configured uid/gid.

use crate::smb::{SmbStat, StatVfs};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Lifetime of attributes and entries in the kernel cache
pub const ATTR_TIMEOUT: Duration = Duration::from_secs(5);

/// File type bits that may be reported
pub const ALLOWED_FILE_BITS: u32 = libc::S_IFREG | libc::S_IFDIR;

/// Permission bits that may be reported (owner and group rwx)
pub const PERMISSION_MASK: u32 = libc::S_IRWXU | libc::S_IRWXG;

/// Mask applied to every reported mode
pub const FILE_MODE_MASK: u32 = ALLOWED_FILE_BITS | PERMISSION_MASK;

/// File type enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    RegularFile,
    Directory,
}

impl FileType {
    /// Classify a full `st_mode`; `None` for anything but files and directories
    pub fn from_mode(mode: u32) -> Option<Self> {
        match mode & libc::S_IFMT {
            libc::S_IFREG => Some(FileType::RegularFile),
            libc::S_IFDIR => Some(FileType::Directory),
            _ => None,
        }
    }

    pub fn type_bits(&self) -> u32 {
        match self {
            FileType::RegularFile => libc::S_IFREG,
            FileType::Directory => libc::S_IFDIR,
        }
    }
}

/// File attributes structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttr {
    pub inode: u64,
    pub kind: FileType,
    pub size: u64,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub mode: u32, // Permission bits
    pub uid: u32,
    pub gid: u32,
    pub nlinks: u32,
}

/// Ownership stamped onto every attribute record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

impl FileAttr {
    /// Normalize a remote stat, or `None` if its type is not allowed.
    pub fn from_stat(inode: u64, stat: &SmbStat, owner: Ownership) -> Option<Self> {
        let kind = FileType::from_mode(stat.mode)?;
        Some(Self {
            inode,
            kind,
            size: stat.size,
            atime: stat.atime,
            mtime: stat.mtime,
            ctime: stat.ctime,
            mode: stat.mode & PERMISSION_MASK,
            uid: owner.uid,
            gid: owner.gid,
            nlinks: 1,
        })
    }

    /// Attributes for an entry just created remotely, without a round trip.
    pub fn synthesized(inode: u64, kind: FileType, mode: u32, owner: Ownership) -> Self {
        let now = Utc::now();
        Self {
            inode,
            kind,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            mode: mode & PERMISSION_MASK,
            uid: owner.uid,
            gid: owner.gid,
            nlinks: 1,
        }
    }

    /// The full `st_mode` (type bits plus permissions)
    pub fn st_mode(&self) -> u32 {
        (self.kind.type_bits() | self.mode) & FILE_MODE_MASK
    }
}

/// Directory entry structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub inode: u64,
    /// Cursor token that resumes the listing after this entry
    pub offset: i64,
    pub name: String,
    pub kind: FileType,
}

/// Set attributes parameters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SetAttr {
    pub size: Option<u64>,
    pub atime: Option<DateTime<Utc>>,
    pub mtime: Option<DateTime<Utc>>,
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl SetAttr {
    pub fn is_empty(&self) -> bool {
        *self == SetAttr::default()
    }

    /// True if anything other than the size is being changed
    pub fn has_unsupported(&self) -> bool {
        self.atime.is_some()
            || self.mtime.is_some()
            || self.mode.is_some()
            || self.uid.is_some()
            || self.gid.is_some()
    }
}

/// Filesystem statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatFs {
    pub blocks: u64,  // Total blocks
    pub bfree: u64,   // Free blocks
    pub bavail: u64,  // Available blocks for unprivileged users
    pub files: u64,   // Total inodes
    pub ffree: u64,   // Free inodes
    pub bsize: u32,   // Block size
    pub namelen: u32, // Maximum filename length
    pub frsize: u32,  // Fragment size
}

impl From<StatVfs> for StatFs {
    fn from(st: StatVfs) -> Self {
        // Without UNIX extensions the server reports sectors per allocation
        // unit in frsize, not bytes
        let frsize = if st.unix_extensions { st.frsize } else { st.frsize.saturating_mul(st.bsize) };
        Self {
            blocks: st.blocks,
            bfree: st.bfree,
            bavail: st.bavail,
            files: st.files,
            ffree: st.ffree,
            bsize: u32::try_from(st.bsize).unwrap_or(u32::MAX),
            namelen: u32::try_from(st.namemax).unwrap_or(u32::MAX),
            frsize: u32::try_from(frsize).unwrap_or(u32::MAX),
        }
    }
}
