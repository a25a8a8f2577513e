// Worker-side filesystem state and operation handlers
//
// A `Session` owns the SMB client together with the inode and handle tables.
// It lives on the worker thread and every method here runs there, one at a
// time, so none of it needs locking. Each handler first drops requests the
// kernel has abandoned, then resolves paths, makes its SMB calls and replies.

use super::attr::{ATTR_TIMEOUT, DirEntry, FileAttr, FileType, Ownership, SetAttr, StatFs};
use super::error::{ConnectError, FsError};
use super::handle::{OpenHandleTable, OpenResource};
use super::inode::{InodeTable, ROOT_INODE, child_path};
use super::request::{
    AttrRequest, CreateRequest, DataRequest, DirectoryRequest, EmptyRequest, EntryRequest,
    OpenRequest, StatfsRequest, WriteRequest,
};
use crate::smb::{DirentType, ShareAddress, SmbClient, SmbResult, SmbStat};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A native resource closed automatically unless released.
struct Scoped<'a, C, T> {
    client: &'a mut C,
    resource: Option<T>,
    close: fn(&mut C, T) -> SmbResult<()>,
}

impl<'a, C, T> Scoped<'a, C, T> {
    fn new(client: &'a mut C, resource: T, close: fn(&mut C, T) -> SmbResult<()>) -> Self {
        Self { client, resource: Some(resource), close }
    }

    fn parts(&mut self) -> (&mut C, &mut T) {
        match self.resource.as_mut() {
            Some(resource) => (&mut *self.client, resource),
            None => unreachable!("scoped resource used after release"),
        }
    }
}

impl<C, T> Drop for Scoped<'_, C, T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            if let Err(errno) = (self.close)(self.client, resource) {
                warn!(%errno, "Failed to close temporary SMB handle");
            }
        }
    }
}

type Resource<C> = OpenResource<<C as SmbClient>::File, <C as SmbClient>::Dir>;

/// Everything the worker thread owns
pub(crate) struct Session<C: SmbClient> {
    client: C,
    address: Arc<ShareAddress>,
    inodes: InodeTable,
    handles: OpenHandleTable<Resource<C>>,
    owner: Ownership,
}

impl<C: SmbClient> Session<C> {
    pub(crate) fn new(client: C, address: Arc<ShareAddress>, owner: Ownership) -> Self {
        Self {
            client,
            address,
            inodes: InodeTable::new(),
            handles: OpenHandleTable::new(),
            owner,
        }
    }

    /// Full remote URL for a share-relative path
    fn url(&self, path: &str) -> String {
        self.address.url_for(path)
    }

    /// Path of an inode that still names its remote entry
    fn live_path(&self, inode: u64) -> Result<String, FsError> {
        if self.inodes.is_stale(inode) {
            return Err(FsError::NotFound(format!("inode {} was removed or replaced", inode)));
        }
        Ok(self.inodes.path_for(inode).to_string())
    }

    fn child(&self, parent: u64, name: &str) -> Result<String, FsError> {
        Ok(child_path(&self.live_path(parent)?, name))
    }

    /// Stat a path and normalize it, rejecting types other than files and
    /// directories.
    fn stat_attr(&mut self, path: &str, inode: u64) -> Result<(SmbStat, FileAttr), FsError> {
        let url = self.url(path);
        let stat = self.client.stat(&url).map_err(|errno| FsError::remote("stat", errno))?;
        match FileAttr::from_stat(inode, &stat, self.owner) {
            Some(attr) => Ok((stat, attr)),
            None => Err(FsError::PermissionDenied(format!(
                "{} has unsupported file type {:o}",
                path,
                stat.mode & libc::S_IFMT
            ))),
        }
    }

    pub(crate) fn lookup<R: EntryRequest>(&mut self, req: R, parent: u64, name: String) {
        if req.is_cancelled() {
            return;
        }

        let path = match self.child(parent, &name) {
            Ok(path) => path,
            Err(err) => return req.reply_error(err),
        };
        debug!(parent, path = %path, "lookup");
        match self.stat_attr(&path, 0) {
            Ok((_, mut attr)) => {
                attr.inode = self.inodes.acquire(&path);
                req.reply_entry(ATTR_TIMEOUT, &attr);
            }
            Err(err) => {
                debug!(path = %path, error = %err, "lookup failed");
                req.reply_error(err);
            }
        }
    }

    pub(crate) fn forget(&mut self, inode: u64, count: u64) {
        self.inodes.forget(inode, count);
    }

    pub(crate) fn getattr<R: AttrRequest>(&mut self, req: R, inode: u64) {
        if req.is_cancelled() {
            return;
        }

        let path = match self.live_path(inode) {
            Ok(path) => path,
            Err(err) => return req.reply_error(err),
        };
        debug!(inode, path = %path, "getattr");
        match self.stat_attr(&path, inode) {
            Ok((_, attr)) => req.reply_attr(ATTR_TIMEOUT, &attr),
            Err(err) => req.reply_error(err),
        }
    }

    pub(crate) fn setattr<R: AttrRequest>(
        &mut self,
        req: R,
        inode: u64,
        handle: Option<u64>,
        changes: SetAttr,
    ) {
        if req.is_cancelled() {
            return;
        }

        let path = match self.live_path(inode) {
            Ok(path) => path,
            Err(err) => return req.reply_error(err),
        };
        debug!(inode, ?handle, ?changes, "setattr");

        if changes.is_empty() {
            return req.reply_error(FsError::InvalidArgument("no attributes to set".to_string()));
        }
        if changes.has_unsupported() {
            return req.reply_error(FsError::NotSupported(format!(
                "only size can be changed on {}",
                path
            )));
        }
        let Some(size) = changes.size else {
            return req.reply_error(FsError::InvalidArgument("no size given".to_string()));
        };

        let mut attr = match self.stat_attr(&path, inode) {
            Ok((_, attr)) if attr.kind == FileType::Directory => {
                return req.reply_error(FsError::IsDirectory(path));
            }
            Ok((_, attr)) => attr,
            Err(err) => return req.reply_error(err),
        };

        let truncated = match handle {
            Some(fh) => match self.handles.file(fh) {
                Some(file) => self.client.truncate(file, size),
                None => return req.reply_error(FsError::BadHandle(fh)),
            },
            None => {
                let url = self.url(&path);
                match self.client.open(&url, libc::O_WRONLY, 0) {
                    Ok(file) => {
                        let mut scoped = Scoped::new(&mut self.client, file, C::close);
                        let (client, file) = scoped.parts();
                        client.truncate(file, size)
                    }
                    Err(errno) => return req.reply_error(FsError::remote("open", errno)),
                }
            }
        };

        match truncated {
            Ok(()) => {
                attr.size = size;
                req.reply_attr(ATTR_TIMEOUT, &attr);
            }
            Err(errno) => req.reply_error(FsError::remote("truncate", errno)),
        }
    }

    pub(crate) fn open<R: OpenRequest>(&mut self, req: R, inode: u64, flags: i32) {
        if req.is_cancelled() {
            return;
        }
        if inode == ROOT_INODE {
            return req.reply_error(FsError::IsDirectory("/".to_string()));
        }

        let path = match self.live_path(inode) {
            Ok(path) => path,
            Err(err) => return req.reply_error(err),
        };
        debug!(inode, path = %path, flags, "open");
        let url = self.url(&path);
        match self.client.open(&url, flags, 0) {
            Ok(file) => {
                let handle = self.handles.insert(OpenResource::File(file));
                req.reply_open(handle);
            }
            Err(errno) => req.reply_error(FsError::remote("open", errno)),
        }
    }

    pub(crate) fn create<R: CreateRequest>(
        &mut self,
        req: R,
        parent: u64,
        name: String,
        mode: u32,
        flags: i32,
    ) {
        if req.is_cancelled() {
            return;
        }

        let path = match self.child(parent, &name) {
            Ok(path) => path,
            Err(err) => return req.reply_error(err),
        };
        debug!(parent, path = %path, mode, flags, "create");
        let url = self.url(&path);
        match self.client.open(&url, flags | libc::O_CREAT, mode) {
            Ok(file) => {
                let handle = self.handles.insert(OpenResource::File(file));
                let inode = self.inodes.acquire(&path);
                let attr = FileAttr::synthesized(inode, FileType::RegularFile, mode, self.owner);
                req.reply_create(ATTR_TIMEOUT, &attr, handle);
            }
            Err(errno) => req.reply_error(FsError::remote("open", errno)),
        }
    }

    pub(crate) fn read<R: DataRequest>(
        &mut self,
        req: R,
        inode: u64,
        handle: u64,
        size: u32,
        offset: i64,
    ) {
        if req.is_cancelled() {
            return;
        }
        debug!(inode, handle, size, offset, "read");

        let Ok(offset) = u64::try_from(offset) else {
            return req.reply_error(FsError::InvalidArgument(format!("offset {}", offset)));
        };
        let Some(file) = self.handles.file(handle) else {
            return req.reply_error(FsError::BadHandle(handle));
        };
        if let Err(errno) = self.client.seek(file, offset) {
            return req.reply_error(FsError::remote("seek", errno));
        }

        let mut buf = vec![0u8; size as usize];
        match self.client.read(file, &mut buf) {
            Ok(count) => {
                buf.truncate(count);
                req.reply_data(&buf);
            }
            Err(errno) => req.reply_error(FsError::remote("read", errno)),
        }
    }

    pub(crate) fn write<R: WriteRequest>(
        &mut self,
        req: R,
        inode: u64,
        handle: u64,
        data: Vec<u8>,
        offset: i64,
    ) {
        if req.is_cancelled() {
            return;
        }
        debug!(inode, handle, len = data.len(), offset, "write");

        let Ok(offset) = u64::try_from(offset) else {
            return req.reply_error(FsError::InvalidArgument(format!("offset {}", offset)));
        };
        let Some(file) = self.handles.file(handle) else {
            return req.reply_error(FsError::BadHandle(handle));
        };
        if let Err(errno) = self.client.seek(file, offset) {
            return req.reply_error(FsError::remote("seek", errno));
        }

        match self.client.write(file, &data) {
            Ok(count) => req.reply_written(u32::try_from(count).unwrap_or(u32::MAX)),
            Err(errno) => req.reply_error(FsError::remote("write", errno)),
        }
    }

    pub(crate) fn release<R: EmptyRequest>(&mut self, req: R, inode: u64, handle: u64) {
        if req.is_cancelled() {
            return;
        }
        debug!(inode, handle, "release");

        let Some(file) = self.handles.remove_file(handle) else {
            return req.reply_error(FsError::BadHandle(handle));
        };
        match self.client.close(file) {
            Ok(()) => req.reply_ok(),
            Err(errno) => req.reply_error(FsError::remote("close", errno)),
        }
    }

    pub(crate) fn rename<R: EmptyRequest>(
        &mut self,
        req: R,
        old_parent: u64,
        old_name: String,
        new_parent: u64,
        new_name: String,
    ) {
        if req.is_cancelled() {
            return;
        }

        let (old_path, new_path) =
            match (self.child(old_parent, &old_name), self.child(new_parent, &new_name)) {
                (Ok(old_path), Ok(new_path)) => (old_path, new_path),
                (Err(err), _) | (_, Err(err)) => return req.reply_error(err),
            };
        debug!(from = %old_path, to = %new_path, "rename");
        let (old_url, new_url) = (self.url(&old_path), self.url(&new_path));
        match self.client.rename(&old_url, &new_url) {
            Ok(()) => {
                self.inodes.rename(&old_path, &new_path);
                req.reply_ok();
            }
            Err(errno) => req.reply_error(FsError::remote("rename", errno)),
        }
    }

    pub(crate) fn unlink<R: EmptyRequest>(&mut self, req: R, parent: u64, name: String) {
        if req.is_cancelled() {
            return;
        }

        let path = match self.child(parent, &name) {
            Ok(path) => path,
            Err(err) => return req.reply_error(err),
        };
        debug!(path = %path, "unlink");
        let url = self.url(&path);
        match self.client.unlink(&url) {
            Ok(()) => {
                self.inodes.detach(&path);
                req.reply_ok();
            }
            Err(errno) => req.reply_error(FsError::remote("unlink", errno)),
        }
    }

    pub(crate) fn opendir<R: OpenRequest>(&mut self, req: R, inode: u64, flags: i32) {
        if req.is_cancelled() {
            return;
        }
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            return req.reply_error(FsError::PermissionDenied(
                "directories can only be opened read-only".to_string(),
            ));
        }

        let path = match self.live_path(inode) {
            Ok(path) => path,
            Err(err) => return req.reply_error(err),
        };
        debug!(inode, path = %path, "opendir");
        let url = self.url(&path);
        match self.client.opendir(&url) {
            Ok(dir) => {
                let handle = self.handles.insert(OpenResource::Dir(dir));
                req.reply_open(handle);
            }
            Err(errno) => req.reply_error(FsError::remote("opendir", errno)),
        }
    }

    pub(crate) fn readdir<R: DirectoryRequest>(
        &mut self,
        mut req: R,
        inode: u64,
        handle: u64,
        offset: i64,
    ) {
        if req.is_cancelled() {
            return;
        }
        debug!(inode, handle, offset, "readdir");

        // The previous call already reached the end
        if offset < 0 {
            return req.reply_done();
        }

        let dir_path = match self.live_path(inode) {
            Ok(path) => path,
            Err(err) => return req.reply_error(err),
        };
        let Some(dir) = self.handles.dir(handle) else {
            return req.reply_error(FsError::BadHandle(handle));
        };
        if let Err(errno) = self.client.seekdir(dir, offset) {
            return req.reply_error(FsError::remote("seekdir", errno));
        }

        // Inodes handed out in this batch; an error reply delivers none of them
        let mut added = Vec::new();
        let failure = loop {
            let dirent = match self.client.readdir(dir) {
                Ok(Some(dirent)) => dirent,
                Ok(None) => break None,
                Err(errno) => break Some(FsError::remote("readdir", errno)),
            };
            if dirent.name == "." || dirent.name == ".." {
                continue;
            }

            let kind = match dirent.kind {
                DirentType::File => FileType::RegularFile,
                DirentType::Dir => FileType::Directory,
                other => {
                    debug!(name = %dirent.name, kind = ?other, "Skipping unsupported entry");
                    continue;
                }
            };

            let next_offset = match self.client.telldir(dir) {
                Ok(next) => next,
                Err(errno) => break Some(FsError::remote("telldir", errno)),
            };

            let child = self.inodes.acquire(&child_path(&dir_path, &dirent.name));
            let entry = DirEntry { inode: child, offset: next_offset, name: dirent.name, kind };
            if req.add_entry(&entry) {
                // Never reached the kernel; it will be listed again next call
                self.inodes.forget(child, 1);
                break None;
            }
            added.push(child);
        };

        match failure {
            Some(err) => {
                for child in added {
                    self.inodes.forget(child, 1);
                }
                req.reply_error(err);
            }
            None => req.reply_done(),
        }
    }

    pub(crate) fn releasedir<R: EmptyRequest>(&mut self, req: R, inode: u64, handle: u64) {
        if req.is_cancelled() {
            return;
        }
        debug!(inode, handle, "releasedir");

        let Some(dir) = self.handles.remove_dir(handle) else {
            return req.reply_error(FsError::BadHandle(handle));
        };
        match self.client.closedir(dir) {
            Ok(()) => req.reply_ok(),
            Err(errno) => req.reply_error(FsError::remote("closedir", errno)),
        }
    }

    pub(crate) fn mkdir<R: EntryRequest>(&mut self, req: R, parent: u64, name: String, mode: u32) {
        if req.is_cancelled() {
            return;
        }

        let path = match self.child(parent, &name) {
            Ok(path) => path,
            Err(err) => return req.reply_error(err),
        };
        debug!(path = %path, mode, "mkdir");
        let url = self.url(&path);
        match self.client.mkdir(&url, mode) {
            Ok(()) => {
                let inode = self.inodes.acquire(&path);
                let attr = FileAttr::synthesized(inode, FileType::Directory, mode, self.owner);
                req.reply_entry(ATTR_TIMEOUT, &attr);
            }
            Err(errno) => req.reply_error(FsError::remote("mkdir", errno)),
        }
    }

    pub(crate) fn rmdir<R: EmptyRequest>(&mut self, req: R, parent: u64, name: String) {
        if req.is_cancelled() {
            return;
        }

        let path = match self.child(parent, &name) {
            Ok(path) => path,
            Err(err) => return req.reply_error(err),
        };
        debug!(path = %path, "rmdir");
        let url = self.url(&path);
        match self.client.rmdir(&url) {
            Ok(()) => {
                self.inodes.detach(&path);
                req.reply_ok();
            }
            Err(errno) => req.reply_error(FsError::remote("rmdir", errno)),
        }
    }

    pub(crate) fn statfs<R: StatfsRequest>(&mut self, req: R, inode: u64) {
        if req.is_cancelled() {
            return;
        }

        let path = match self.live_path(inode) {
            Ok(path) => path,
            Err(err) => return req.reply_error(err),
        };
        let url = self.url(&path);
        match self.client.statvfs(&url) {
            Ok(st) => req.reply_statfs(&StatFs::from(st)),
            Err(errno) => req.reply_error(FsError::remote("statvfs", errno)),
        }
    }

    /// Open and close the share root to classify reachability.
    pub(crate) fn ensure_connected(&mut self) -> ConnectError {
        let url = self.address.current();
        let dir = match self.client.opendir(&url) {
            Ok(dir) => dir,
            Err(errno) => {
                let result = ConnectError::from_errno(errno);
                warn!(share = %url, %errno, ?result, "Share is not reachable");
                return result;
            }
        };
        if let Err(errno) = self.client.closedir(dir) {
            warn!(share = %url, %errno, "Failed to close share root");
        }
        ConnectError::Ok
    }

    #[cfg(test)]
    pub(crate) fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    #[cfg(test)]
    pub(crate) fn inodes_mut(&mut self) -> &mut InodeTable {
        &mut self.inodes
    }
}

impl<C: SmbClient> Drop for Session<C> {
    fn drop(&mut self) {
        let leaked = self.handles.drain();
        if !leaked.is_empty() {
            debug!(count = leaked.len(), "Closing handles left open at teardown");
        }
        for (handle, resource) in leaked {
            let closed = match resource {
                OpenResource::File(file) => self.client.close(file),
                OpenResource::Dir(dir) => self.client.closedir(dir),
            };
            if let Err(errno) = closed {
                error!(handle, %errno, "Failed to close handle at teardown");
            }
        }
    }
}
