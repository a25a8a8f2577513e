// SMB client abstraction
//
// The translator never talks to an SMB library directly. Everything it needs
// from the remote share goes through `SmbClient`, whose methods mirror the
// blocking, context-bound primitives of a libsmbclient-style client. A client
// value and every native handle it returns are only ever touched from the
// filesystem worker thread.

use chrono::{DateTime, Utc};
use nix::errno::Errno;
#[cfg(any(test, feature = "mockall"))]
use mockall::automock;

/// Result type for SMB client calls. Failures carry the errno the client set.
pub type SmbResult<T> = Result<T, Errno>;

/// Remote stat as reported by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbStat {
    /// Full `st_mode`, including the file type bits
    pub mode: u32,
    pub size: u64,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
}

/// Entry types a remote directory listing can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirentType {
    Workgroup,
    Server,
    FileShare,
    PrinterShare,
    CommsShare,
    IpcShare,
    Dir,
    File,
    Link,
}

/// A raw remote directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbDirent {
    pub name: String,
    pub kind: DirentType,
}

impl SmbDirent {
    pub fn new(name: impl Into<String>, kind: DirentType) -> Self {
        Self { name: name.into(), kind }
    }
}

/// Remote filesystem statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatVfs {
    pub bsize: u64,
    pub frsize: u64,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub namemax: u64,
    /// False when the server does not speak the CIFS UNIX extensions. In that
    /// mode `frsize` is a multiplier of `bsize` rather than a byte count.
    pub unix_extensions: bool,
}

/// Blocking SMB client bound to a single connection context.
///
/// All URLs are full `smb://host/share/path` strings.
#[cfg_attr(any(test, feature = "mockall"), automock(type File = u32; type Dir = u32;))]
pub trait SmbClient {
    /// Native open file
    type File;
    /// Native open directory
    type Dir;

    fn stat(&mut self, url: &str) -> SmbResult<SmbStat>;

    fn open(&mut self, url: &str, flags: i32, mode: u32) -> SmbResult<Self::File>;
    fn read(&mut self, file: &mut Self::File, buf: &mut [u8]) -> SmbResult<usize>;
    fn write(&mut self, file: &mut Self::File, buf: &[u8]) -> SmbResult<usize>;
    /// Seek to an absolute offset, returning the new position
    fn seek(&mut self, file: &mut Self::File, offset: u64) -> SmbResult<u64>;
    fn truncate(&mut self, file: &mut Self::File, size: u64) -> SmbResult<()>;
    fn close(&mut self, file: Self::File) -> SmbResult<()>;

    fn opendir(&mut self, url: &str) -> SmbResult<Self::Dir>;
    /// Next raw entry. `Ok(None)` is the natural end of the stream.
    fn readdir(&mut self, dir: &mut Self::Dir) -> SmbResult<Option<SmbDirent>>;
    /// Opaque cursor token for the position after the last entry returned
    fn telldir(&mut self, dir: &mut Self::Dir) -> SmbResult<i64>;
    fn seekdir(&mut self, dir: &mut Self::Dir, offset: i64) -> SmbResult<()>;
    fn closedir(&mut self, dir: Self::Dir) -> SmbResult<()>;

    fn mkdir(&mut self, url: &str, mode: u32) -> SmbResult<()>;
    fn rmdir(&mut self, url: &str) -> SmbResult<()>;
    fn unlink(&mut self, url: &str) -> SmbResult<()>;
    fn rename(&mut self, from: &str, to: &str) -> SmbResult<()>;
    fn statvfs(&mut self, url: &str) -> SmbResult<StatVfs>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirent_construction() {
        let entry = SmbDirent::new("report.txt", DirentType::File);
        assert_eq!(entry.name, "report.txt");
        assert_eq!(entry.kind, DirentType::File);
    }

    #[test]
    fn test_statvfs_default_has_no_unix_extensions() {
        let st = StatVfs::default();
        assert!(!st.unix_extensions);
        assert_eq!(st.frsize, 0);
    }

    #[test]
    fn test_mock_client_open_and_close() {
        let mut client = MockSmbClient::new();
        client.expect_open().returning(|_, _, _| Ok(7));
        client.expect_close().withf(|file| *file == 7).times(1).returning(|_| Ok(()));

        let file = client.open("smb://host/share/a", libc::O_RDONLY, 0).unwrap();
        assert_eq!(file, 7);
        client.close(file).unwrap();
    }
}
