// Request and reply abstraction
//
// Each inbound operation arrives as a request object that can tell whether the
// caller still wants an answer and knows how to deliver the typed reply. The
// filesystem never talks to the transport directly: the FUSE adapter
// implements these traits for fuser's reply types, and `ChannelRequest`
// implements them over a oneshot channel for embedders and tests.

use super::attr::{DirEntry, FileAttr, StatFs};
use super::error::FsError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

/// Common to every request
pub trait Request: Send + 'static {
    /// True once the originator has abandoned the request
    fn is_cancelled(&self) -> bool;
    fn reply_error(self, err: FsError);
}

pub trait EntryRequest: Request {
    fn reply_entry(self, ttl: Duration, attr: &FileAttr);
}

pub trait AttrRequest: Request {
    fn reply_attr(self, ttl: Duration, attr: &FileAttr);
}

pub trait OpenRequest: Request {
    fn reply_open(self, handle: u64);
}

pub trait CreateRequest: Request {
    fn reply_create(self, ttl: Duration, attr: &FileAttr, handle: u64);
}

pub trait DataRequest: Request {
    fn reply_data(self, data: &[u8]);
}

pub trait WriteRequest: Request {
    fn reply_written(self, written: u32);
}

pub trait EmptyRequest: Request {
    fn reply_ok(self);
}

pub trait DirectoryRequest: Request {
    /// Append an entry; returns true if the buffer was full and the entry
    /// was not added.
    fn add_entry(&mut self, entry: &DirEntry) -> bool;
    fn reply_done(self);
}

pub trait StatfsRequest: Request {
    fn reply_statfs(self, stats: &StatFs);
}

/// A delivered reply.
#[derive(Debug)]
pub enum Outcome {
    Error(FsError),
    Entry { ttl: Duration, attr: FileAttr },
    Attr { ttl: Duration, attr: FileAttr },
    Opened { handle: u64 },
    Created { ttl: Duration, attr: FileAttr, handle: u64 },
    Data(Vec<u8>),
    Written(u32),
    Ok,
    Directory(Vec<DirEntry>),
    Statfs(StatFs),
}

impl Outcome {
    /// The errno carried by an error reply
    pub fn errno(&self) -> Option<i32> {
        match self {
            Outcome::Error(err) => Some(err.to_errno()),
            _ => None,
        }
    }
}

/// Default number of entries a `ChannelRequest` accepts per directory reply
pub const DEFAULT_DIR_CAPACITY: usize = 128;

/// Request that delivers its reply over a oneshot channel.
#[derive(Debug)]
pub struct ChannelRequest {
    tx: oneshot::Sender<Outcome>,
    cancelled: Arc<AtomicBool>,
    entries: Vec<DirEntry>,
    dir_capacity: usize,
}

/// Receiving side of a `ChannelRequest`.
#[derive(Debug)]
pub struct PendingReply {
    rx: oneshot::Receiver<Outcome>,
    cancelled: Arc<AtomicBool>,
}

impl ChannelRequest {
    pub fn new() -> (Self, PendingReply) {
        let (tx, rx) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let request = Self {
            tx,
            cancelled: Arc::clone(&cancelled),
            entries: Vec::new(),
            dir_capacity: DEFAULT_DIR_CAPACITY,
        };
        (request, PendingReply { rx, cancelled })
    }

    /// Limit how many entries a single directory reply can carry
    pub fn with_dir_capacity(mut self, capacity: usize) -> Self {
        self.dir_capacity = capacity;
        self
    }

    fn send(self, outcome: Outcome) {
        // The receiver may have been dropped; nobody is waiting then
        let _ = self.tx.send(outcome);
    }
}

impl PendingReply {
    /// Abandon the request
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Wait for the reply; `None` if the request was dropped unanswered
    pub async fn outcome(self) -> Option<Outcome> {
        self.rx.await.ok()
    }

    /// Blocking variant of [`outcome`](Self::outcome), for callers outside
    /// an async runtime
    pub fn blocking_outcome(self) -> Option<Outcome> {
        self.rx.blocking_recv().ok()
    }
}

impl Request for ChannelRequest {
    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn reply_error(self, err: FsError) {
        self.send(Outcome::Error(err));
    }
}

impl EntryRequest for ChannelRequest {
    fn reply_entry(self, ttl: Duration, attr: &FileAttr) {
        self.send(Outcome::Entry { ttl, attr: attr.clone() });
    }
}

impl AttrRequest for ChannelRequest {
    fn reply_attr(self, ttl: Duration, attr: &FileAttr) {
        self.send(Outcome::Attr { ttl, attr: attr.clone() });
    }
}

impl OpenRequest for ChannelRequest {
    fn reply_open(self, handle: u64) {
        self.send(Outcome::Opened { handle });
    }
}

impl CreateRequest for ChannelRequest {
    fn reply_create(self, ttl: Duration, attr: &FileAttr, handle: u64) {
        self.send(Outcome::Created { ttl, attr: attr.clone(), handle });
    }
}

impl DataRequest for ChannelRequest {
    fn reply_data(self, data: &[u8]) {
        self.send(Outcome::Data(data.to_vec()));
    }
}

impl WriteRequest for ChannelRequest {
    fn reply_written(self, written: u32) {
        self.send(Outcome::Written(written));
    }
}

impl EmptyRequest for ChannelRequest {
    fn reply_ok(self) {
        self.send(Outcome::Ok);
    }
}

impl DirectoryRequest for ChannelRequest {
    fn add_entry(&mut self, entry: &DirEntry) -> bool {
        if self.entries.len() >= self.dir_capacity {
            return true;
        }
        self.entries.push(entry.clone());
        false
    }

    fn reply_done(mut self) {
        let entries = std::mem::take(&mut self.entries);
        self.send(Outcome::Directory(entries));
    }
}

impl StatfsRequest for ChannelRequest {
    fn reply_statfs(self, stats: &StatFs) {
        self.send(Outcome::Statfs(stats.clone()));
    }
}
