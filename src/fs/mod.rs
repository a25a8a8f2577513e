pub mod attr;
pub mod error;
pub mod filesystem;
pub mod handle;
pub mod inode;
pub mod request;
mod session;
pub mod worker;

pub use attr::{DirEntry, FileAttr, FileType, Ownership, SetAttr, StatFs, ATTR_TIMEOUT};
pub use error::{ConnectError, FsError, FsResult};
pub use filesystem::{InitError, SmbFilesystem};
pub use inode::{InodeTable, ROOT_INODE};
pub use request::{
    AttrRequest, ChannelRequest, CreateRequest, DataRequest, DirectoryRequest, EmptyRequest,
    EntryRequest, OpenRequest, Outcome, PendingReply, Request, StatfsRequest, WriteRequest,
};
