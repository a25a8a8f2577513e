// FUSE adapter - forwards kernel callbacks to SmbFilesystem
//
// fuser calls these methods one at a time on its session thread. Each one
// converts the kernel operands and hands the reply object to the filesystem,
// which queues the work and returns without blocking. Replies are sent later
// from the filesystem worker thread.

use super::reply::systemtime_to_datetime;
use crate::fs::{SetAttr, SmbFilesystem};
use crate::smb::SmbClient;
use chrono::{DateTime, Utc};
use fuser::{
    Filesystem, ReplyAttr, ReplyCreate, ReplyData, ReplyDirectory, ReplyEmpty, ReplyEntry,
    ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use std::ffi::OsStr;
use std::time::SystemTime;

/// FUSE adapter that owns the filesystem for the lifetime of the mount
pub struct FuseAdapter<C: SmbClient + 'static> {
    fs: SmbFilesystem<C>,
}

impl<C: SmbClient + 'static> FuseAdapter<C> {
    pub fn new(fs: SmbFilesystem<C>) -> Self {
        Self { fs }
    }

    pub fn filesystem(&self) -> &SmbFilesystem<C> {
        &self.fs
    }
}

fn time_or_now(time: TimeOrNow) -> DateTime<Utc> {
    match time {
        TimeOrNow::SpecificTime(st) => systemtime_to_datetime(st),
        TimeOrNow::Now => Utc::now(),
    }
}

/// Names must be UTF-8 to form SMB URLs.
macro_rules! utf8_name {
    ($name:expr, $reply:expr) => {
        match $name.to_str() {
            Some(name) => name,
            None => {
                tracing::debug!(name = ?$name, "Rejecting non UTF-8 name");
                $reply.error(libc::EINVAL);
                return;
            }
        }
    };
}

impl<C: SmbClient + 'static> Filesystem for FuseAdapter<C> {
    fn init(
        &mut self,
        _req: &Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> Result<(), libc::c_int> {
        tracing::info!(share = %self.fs.share_address(), "FUSE filesystem initialized");
        Ok(())
    }

    fn destroy(&mut self) {
        self.fs.shutdown();
        tracing::info!("FUSE filesystem destroyed");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let name = utf8_name!(name, reply);
        self.fs.lookup(reply, parent, name);
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.fs.forget(ino, nlookup);
    }

    fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
        for node in nodes {
            self.fs.forget(node.nodeid, node.nlookup);
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        self.fs.getattr(reply, ino);
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let changes = SetAttr {
            size,
            atime: atime.map(time_or_now),
            mtime: mtime.map(time_or_now),
            mode,
            uid,
            gid,
        };
        self.fs.setattr(reply, ino, fh, changes);
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        self.fs.open(reply, ino, flags);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        flags: i32,
        reply: ReplyCreate,
    ) {
        let name = utf8_name!(name, reply);
        self.fs.create(reply, parent, name, mode, flags);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        self.fs.read(reply, ino, fh, size, offset);
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        self.fs.write(reply, ino, fh, data, offset);
    }

    fn release(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: ReplyEmpty,
    ) {
        self.fs.release(reply, ino, fh);
    }

    fn rename(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        // RENAME_NOREPLACE and RENAME_EXCHANGE have no SMB counterpart
        if flags != 0 {
            reply.error(libc::EINVAL);
            return;
        }
        let name = utf8_name!(name, reply);
        let newname = utf8_name!(newname, reply);
        self.fs.rename(reply, parent, name, newparent, newname);
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = utf8_name!(name, reply);
        self.fs.unlink(reply, parent, name);
    }

    fn opendir(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        self.fs.opendir(reply, ino, flags);
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        reply: ReplyDirectory,
    ) {
        self.fs.readdir(reply, ino, fh, offset);
    }

    fn releasedir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        _flags: i32,
        reply: ReplyEmpty,
    ) {
        self.fs.releasedir(reply, ino, fh);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let name = utf8_name!(name, reply);
        self.fs.mkdir(reply, parent, name, mode);
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let name = utf8_name!(name, reply);
        self.fs.rmdir(reply, parent, name);
    }

    fn statfs(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyStatfs) {
        self.fs.statfs(reply, ino);
    }
}
