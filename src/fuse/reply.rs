// fuser reply types as filesystem requests
//
// fuser exposes no interrupt notification to the filesystem, so a request
// coming from the kernel is never seen as cancelled here.

use crate::fs::{
    AttrRequest, CreateRequest, DataRequest, DirEntry, DirectoryRequest, EmptyRequest,
    EntryRequest, FileAttr, FileType, FsError, OpenRequest, Request, StatFs, StatfsRequest,
    WriteRequest,
};
use chrono::{DateTime, Utc};
use fuser::{
    FileType as FuseFileType, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty,
    ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite,
};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const BLOCK_SIZE: u32 = 4096;

pub(crate) fn to_fuse_kind(kind: FileType) -> FuseFileType {
    match kind {
        FileType::RegularFile => FuseFileType::RegularFile,
        FileType::Directory => FuseFileType::Directory,
    }
}

/// Convert our FileAttr to fuser FileAttr
pub(crate) fn to_fuse_attr(attr: &FileAttr) -> fuser::FileAttr {
    fuser::FileAttr {
        ino: attr.inode,
        size: attr.size,
        blocks: attr.size.div_ceil(512),
        atime: datetime_to_systemtime(attr.atime),
        mtime: datetime_to_systemtime(attr.mtime),
        ctime: datetime_to_systemtime(attr.ctime),
        crtime: UNIX_EPOCH,
        kind: to_fuse_kind(attr.kind),
        perm: (attr.st_mode() & 0o7777) as u16,
        nlink: attr.nlinks,
        uid: attr.uid,
        gid: attr.gid,
        rdev: 0,
        blksize: BLOCK_SIZE,
        flags: 0,
    }
}

/// Convert chrono DateTime to SystemTime; times before the epoch clamp to it
pub(crate) fn datetime_to_systemtime(dt: DateTime<Utc>) -> SystemTime {
    match u64::try_from(dt.timestamp()) {
        Ok(secs) => UNIX_EPOCH + Duration::new(secs, dt.timestamp_subsec_nanos()),
        Err(_) => UNIX_EPOCH,
    }
}

/// Convert SystemTime to chrono DateTime
pub(crate) fn systemtime_to_datetime(st: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(st)
}

macro_rules! kernel_request {
    ($($reply:ty),* $(,)?) => {
        $(
            impl Request for $reply {
                fn is_cancelled(&self) -> bool {
                    false
                }

                fn reply_error(self, err: FsError) {
                    self.error(err.to_errno());
                }
            }
        )*
    };
}

kernel_request!(
    ReplyEntry,
    ReplyAttr,
    ReplyOpen,
    ReplyCreate,
    ReplyData,
    ReplyWrite,
    ReplyEmpty,
    ReplyDirectory,
    ReplyStatfs,
);

impl EntryRequest for ReplyEntry {
    fn reply_entry(self, ttl: Duration, attr: &FileAttr) {
        self.entry(&ttl, &to_fuse_attr(attr), 0);
    }
}

impl AttrRequest for ReplyAttr {
    fn reply_attr(self, ttl: Duration, attr: &FileAttr) {
        self.attr(&ttl, &to_fuse_attr(attr));
    }
}

impl OpenRequest for ReplyOpen {
    fn reply_open(self, handle: u64) {
        self.opened(handle, 0);
    }
}

impl CreateRequest for ReplyCreate {
    fn reply_create(self, ttl: Duration, attr: &FileAttr, handle: u64) {
        self.created(&ttl, &to_fuse_attr(attr), 0, handle, 0);
    }
}

impl DataRequest for ReplyData {
    fn reply_data(self, data: &[u8]) {
        self.data(data);
    }
}

impl WriteRequest for ReplyWrite {
    fn reply_written(self, written: u32) {
        self.written(written);
    }
}

impl EmptyRequest for ReplyEmpty {
    fn reply_ok(self) {
        self.ok();
    }
}

impl DirectoryRequest for ReplyDirectory {
    fn add_entry(&mut self, entry: &DirEntry) -> bool {
        self.add(entry.inode, entry.offset, to_fuse_kind(entry.kind), &entry.name)
    }

    fn reply_done(self) {
        self.ok();
    }
}

impl StatfsRequest for ReplyStatfs {
    fn reply_statfs(self, stats: &StatFs) {
        self.statfs(
            stats.blocks,
            stats.bfree,
            stats.bavail,
            stats.files,
            stats.ffree,
            stats.bsize,
            stats.namelen,
            stats.frsize,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Ownership;

    #[test]
    fn test_datetime_conversion_keeps_nanos() {
        let dt = DateTime::from_timestamp(1_700_000_000, 123_456_789).unwrap();
        let st = datetime_to_systemtime(dt);
        assert_eq!(systemtime_to_datetime(st), dt);
    }

    #[test]
    fn test_pre_epoch_time_clamps() {
        let dt = DateTime::from_timestamp(-10, 0).unwrap();
        assert_eq!(datetime_to_systemtime(dt), UNIX_EPOCH);
    }

    #[test]
    fn test_fuse_attr_permissions() {
        let owner = Ownership { uid: 1000, gid: 100 };
        let attr = FileAttr::synthesized(5, FileType::RegularFile, 0o777, owner);
        let fuse_attr = to_fuse_attr(&attr);

        assert_eq!(fuse_attr.ino, 5);
        assert_eq!(fuse_attr.kind, FuseFileType::RegularFile);
        assert_eq!(fuse_attr.perm, 0o770);
        assert_eq!(fuse_attr.uid, 1000);
        assert_eq!(fuse_attr.gid, 100);
        assert_eq!(fuse_attr.nlink, 1);
    }
}
