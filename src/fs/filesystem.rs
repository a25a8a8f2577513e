// SMB filesystem facade
//
// Every public operation posts its work to the worker thread and returns at
// once; the reply arrives later through the request object. Only the share
// address is touched from the calling thread.

use super::attr::{Ownership, SetAttr};
use super::error::ConnectError;
use super::request::{
    AttrRequest, CreateRequest, DataRequest, DirectoryRequest, EmptyRequest, EntryRequest,
    OpenRequest, StatfsRequest, WriteRequest,
};
use super::session::Session;
use super::worker::Worker;
use crate::config::{ConfigError, FilesystemConfig};
use crate::smb::{AuthPolicy, Authenticator, ShareAddress, SmbClient, StaticCredentials};
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

const WORKER_THREAD_NAME: &str = "smbfs-worker";

/// Failure to construct a filesystem
#[derive(Error, Debug)]
pub enum InitError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to start worker thread: {0}")]
    Worker(#[from] io::Error),
}

/// Filesystem operations over one SMB share.
pub struct SmbFilesystem<C: SmbClient + 'static> {
    worker: Worker<Session<C>>,
    address: Arc<ShareAddress>,
}

impl<C: SmbClient + 'static> SmbFilesystem<C> {
    /// Validate `config` and start the worker.
    ///
    /// `connect` runs on the worker thread and builds the SMB client there, so
    /// the client never has to leave it.
    pub fn new<F>(config: &FilesystemConfig, connect: F) -> Result<Self, InitError>
    where
        F: FnOnce(Authenticator) -> C + Send + 'static,
    {
        config.validate()?;

        if !config.allow_ntlm {
            tracing::warn!(
                share = %config.share_path,
                "NTLM fallback disabled; only Kerberos authentication will be attempted"
            );
        }

        let policy = AuthPolicy { use_kerberos: config.use_kerberos, allow_ntlm: config.allow_ntlm };
        let auth =
            Authenticator::new(policy, Box::new(StaticCredentials::new(config.credentials.clone())));
        let owner = Ownership { uid: config.uid, gid: config.gid };
        let address = Arc::new(ShareAddress::new(config.share_path.clone()));

        let session_address = Arc::clone(&address);
        let worker = Worker::spawn(WORKER_THREAD_NAME, move || {
            Session::new(connect(auth), session_address, owner)
        })?;

        tracing::info!(
            share = %config.share_path,
            uid = owner.uid,
            gid = owner.gid,
            "SMB filesystem started"
        );
        Ok(Self { worker, address })
    }

    fn post<F>(&self, op: &'static str, task: F)
    where
        F: FnOnce(&mut Session<C>) + Send + 'static,
    {
        if !self.worker.post(task) {
            tracing::error!(op, "Worker has stopped; dropping request");
        }
    }

    pub fn lookup<R: EntryRequest>(&self, req: R, parent: u64, name: &str) {
        let name = name.to_string();
        self.post("lookup", move |s| s.lookup(req, parent, name));
    }

    /// Drop `count` kernel references to `inode`.
    pub fn forget(&self, inode: u64, count: u64) {
        self.post("forget", move |s| s.forget(inode, count));
    }

    pub fn getattr<R: AttrRequest>(&self, req: R, inode: u64) {
        self.post("getattr", move |s| s.getattr(req, inode));
    }

    /// Only size changes are supported.
    pub fn setattr<R: AttrRequest>(
        &self,
        req: R,
        inode: u64,
        handle: Option<u64>,
        changes: SetAttr,
    ) {
        self.post("setattr", move |s| s.setattr(req, inode, handle, changes));
    }

    pub fn open<R: OpenRequest>(&self, req: R, inode: u64, flags: i32) {
        self.post("open", move |s| s.open(req, inode, flags));
    }

    pub fn create<R: CreateRequest>(&self, req: R, parent: u64, name: &str, mode: u32, flags: i32) {
        let name = name.to_string();
        self.post("create", move |s| s.create(req, parent, name, mode, flags));
    }

    pub fn read<R: DataRequest>(&self, req: R, inode: u64, handle: u64, size: u32, offset: i64) {
        self.post("read", move |s| s.read(req, inode, handle, size, offset));
    }

    /// Replies with the number of bytes written, which may be short.
    pub fn write<R: WriteRequest>(
        &self,
        req: R,
        inode: u64,
        handle: u64,
        data: &[u8],
        offset: i64,
    ) {
        let data = data.to_vec();
        self.post("write", move |s| s.write(req, inode, handle, data, offset));
    }

    pub fn release<R: EmptyRequest>(&self, req: R, inode: u64, handle: u64) {
        self.post("release", move |s| s.release(req, inode, handle));
    }

    pub fn rename<R: EmptyRequest>(
        &self,
        req: R,
        old_parent: u64,
        old_name: &str,
        new_parent: u64,
        new_name: &str,
    ) {
        let (old_name, new_name) = (old_name.to_string(), new_name.to_string());
        self.post("rename", move |s| s.rename(req, old_parent, old_name, new_parent, new_name));
    }

    pub fn unlink<R: EmptyRequest>(&self, req: R, parent: u64, name: &str) {
        let name = name.to_string();
        self.post("unlink", move |s| s.unlink(req, parent, name));
    }

    pub fn opendir<R: OpenRequest>(&self, req: R, inode: u64, flags: i32) {
        self.post("opendir", move |s| s.opendir(req, inode, flags));
    }

    /// `offset` is the cursor token of the last entry delivered, or 0 to
    /// start from the beginning.
    pub fn readdir<R: DirectoryRequest>(&self, req: R, inode: u64, handle: u64, offset: i64) {
        self.post("readdir", move |s| s.readdir(req, inode, handle, offset));
    }

    pub fn releasedir<R: EmptyRequest>(&self, req: R, inode: u64, handle: u64) {
        self.post("releasedir", move |s| s.releasedir(req, inode, handle));
    }

    pub fn mkdir<R: EntryRequest>(&self, req: R, parent: u64, name: &str, mode: u32) {
        let name = name.to_string();
        self.post("mkdir", move |s| s.mkdir(req, parent, name, mode));
    }

    pub fn rmdir<R: EmptyRequest>(&self, req: R, parent: u64, name: &str) {
        let name = name.to_string();
        self.post("rmdir", move |s| s.rmdir(req, parent, name));
    }

    pub fn statfs<R: StatfsRequest>(&self, req: R, inode: u64) {
        self.post("statfs", move |s| s.statfs(req, inode));
    }

    /// Probe the share root and classify whether it can be reached.
    pub async fn ensure_connected(&self) -> ConnectError {
        let (tx, rx) = oneshot::channel();
        self.post("ensure_connected", move |s| {
            let _ = tx.send(s.ensure_connected());
        });
        rx.await.unwrap_or(ConnectError::UnknownError)
    }

    /// Point the share at a resolved address, or back at the configured
    /// hostname when `None`.
    pub fn set_resolved_address(&self, resolved: Option<IpAddr>) {
        self.address.set_resolved_address(resolved);
        tracing::debug!(address = %self.address.current(), "Share address updated");
    }

    pub fn share_address(&self) -> String {
        self.address.current()
    }

    /// Finish queued work, close leftover handles and disconnect.
    pub fn shutdown(&mut self) {
        self.worker.shutdown();
        tracing::info!(share = %self.address.original(), "SMB filesystem stopped");
    }

    #[cfg(test)]
    fn with_session<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut Session<C>) -> T + Send + 'static,
    {
        let (tx, rx) = std::sync::mpsc::channel();
        self.post("test", move |s| {
            let _ = tx.send(f(s));
        });
        rx.recv().expect("worker dropped test task")
    }
}
