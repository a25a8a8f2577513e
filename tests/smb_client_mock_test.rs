// Integration tests for SmbFilesystem with a mocked SMB client
//
// These cover client behavior the in-memory share never produces: arbitrary
// cursor tokens, failures in the middle of a listing and failing closes.

use chrono::Utc;
use mockall::mock;
use mockall::predicate::*;
use nix::errno::Errno;
use smbfs::config::FilesystemConfig;
use smbfs::fs::{ChannelRequest, Outcome, ROOT_INODE, SmbFilesystem};
use smbfs::smb::{DirentType, SmbClient, SmbDirent, SmbResult, SmbStat, StatVfs};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

mock! {
    pub Client {}

    impl SmbClient for Client {
        type File = u32;
        type Dir = u32;

        fn stat(&mut self, url: &str) -> SmbResult<SmbStat>;
        fn open(&mut self, url: &str, flags: i32, mode: u32) -> SmbResult<u32>;
        fn read(&mut self, file: &mut u32, buf: &mut [u8]) -> SmbResult<usize>;
        fn write(&mut self, file: &mut u32, buf: &[u8]) -> SmbResult<usize>;
        fn seek(&mut self, file: &mut u32, offset: u64) -> SmbResult<u64>;
        fn truncate(&mut self, file: &mut u32, size: u64) -> SmbResult<()>;
        fn close(&mut self, file: u32) -> SmbResult<()>;
        fn opendir(&mut self, url: &str) -> SmbResult<u32>;
        fn readdir(&mut self, dir: &mut u32) -> SmbResult<Option<SmbDirent>>;
        fn telldir(&mut self, dir: &mut u32) -> SmbResult<i64>;
        fn seekdir(&mut self, dir: &mut u32, offset: i64) -> SmbResult<()>;
        fn closedir(&mut self, dir: u32) -> SmbResult<()>;
        fn mkdir(&mut self, url: &str, mode: u32) -> SmbResult<()>;
        fn rmdir(&mut self, url: &str) -> SmbResult<()>;
        fn unlink(&mut self, url: &str) -> SmbResult<()>;
        fn rename(&mut self, from: &str, to: &str) -> SmbResult<()>;
        fn statvfs(&mut self, url: &str) -> SmbResult<StatVfs>;
    }
}

const SHARE: &str = "smb://fileserver/share";

fn setup(client: MockClient) -> SmbFilesystem<MockClient> {
    let config = FilesystemConfig::new(SHARE, 1000, 1000);
    SmbFilesystem::new(&config, move |_| client).unwrap()
}

fn stat_with_mode(mode: u32) -> SmbStat {
    let now = Utc::now();
    SmbStat { mode, size: 42, atime: now, mtime: now, ctime: now }
}

async fn call(issue: impl FnOnce(ChannelRequest)) -> Outcome {
    let (req, pending) = ChannelRequest::new();
    issue(req);
    pending.outcome().await.expect("request dropped without a reply")
}

/// A directory stream that serves `entries` and reports `tokens` as cursors.
fn scripted_listing(client: &mut MockClient, entries: Vec<SmbDirent>, tokens: Vec<i64>) {
    let entries = Arc::new(Mutex::new(VecDeque::from(entries)));
    let tokens = Arc::new(Mutex::new(VecDeque::from(tokens)));

    client.expect_opendir().returning(|_| Ok(9));
    client.expect_seekdir().returning(|_, _| Ok(()));
    client.expect_readdir().returning(move |_| Ok(entries.lock().unwrap().pop_front()));
    client
        .expect_telldir()
        .returning(move |_| Ok(tokens.lock().unwrap().pop_front().unwrap_or(-1)));
    client.expect_closedir().returning(|_| Ok(()));
}

#[tokio::test]
async fn test_lookup_builds_full_url() {
    let mut client = MockClient::new();
    client
        .expect_stat()
        .with(eq("smb://fileserver/share/docs"))
        .times(1)
        .returning(|_| Ok(stat_with_mode(libc::S_IFDIR | 0o755)));

    let fs = setup(client);
    match call(|r| fs.lookup(r, ROOT_INODE, "docs")).await {
        Outcome::Entry { attr, .. } => {
            assert_eq!(attr.inode, 2);
            assert_eq!(attr.size, 42);
            assert_eq!(attr.mode, 0o750);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_symlink_stat_is_denied() {
    let mut client = MockClient::new();
    client.expect_stat().returning(|_| Ok(stat_with_mode(libc::S_IFLNK | 0o777)));

    let fs = setup(client);
    assert_eq!(call(|r| fs.lookup(r, ROOT_INODE, "link")).await.errno(), Some(libc::EACCES));
}

#[tokio::test]
async fn test_readdir_passes_cursor_tokens_through() {
    let mut client = MockClient::new();
    scripted_listing(
        &mut client,
        vec![
            SmbDirent::new(".", DirentType::Dir),
            SmbDirent::new("..", DirentType::Dir),
            SmbDirent::new("a.txt", DirentType::File),
            SmbDirent::new("share$", DirentType::IpcShare),
            SmbDirent::new("sub", DirentType::Dir),
        ],
        vec![70_001, 70_777],
    );

    let fs = setup(client);
    let handle = match call(|r| fs.opendir(r, ROOT_INODE, libc::O_RDONLY)).await {
        Outcome::Opened { handle } => handle,
        other => panic!("unexpected outcome: {:?}", other),
    };

    match call(|r| fs.readdir(r, ROOT_INODE, handle, 0)).await {
        Outcome::Directory(entries) => {
            let listed: Vec<(&str, i64)> =
                entries.iter().map(|e| (e.name.as_str(), e.offset)).collect();
            assert_eq!(listed, vec![("a.txt", 70_001), ("sub", 70_777)]);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}

#[tokio::test]
async fn test_readdir_seeks_to_offset() {
    let mut client = MockClient::new();
    client.expect_opendir().returning(|_| Ok(3));
    client.expect_seekdir().with(always(), eq(12_345)).times(1).returning(|_, _| Ok(()));
    client.expect_readdir().returning(|_| Ok(None));
    client.expect_closedir().returning(|_| Ok(()));

    let fs = setup(client);
    let handle = match call(|r| fs.opendir(r, ROOT_INODE, libc::O_RDONLY)).await {
        Outcome::Opened { handle } => handle,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert!(matches!(
        call(|r| fs.readdir(r, ROOT_INODE, handle, 12_345)).await,
        Outcome::Directory(entries) if entries.is_empty()
    ));
}

#[tokio::test]
async fn test_readdir_error_mid_stream() {
    let mut client = MockClient::new();
    let calls = Arc::new(Mutex::new(0));
    client.expect_opendir().returning(|_| Ok(9));
    client.expect_seekdir().returning(|_, _| Ok(()));
    client.expect_telldir().returning(|_| Ok(64));
    client.expect_closedir().returning(|_| Ok(()));
    client.expect_readdir().returning(move |_| {
        let mut calls = calls.lock().unwrap();
        *calls += 1;
        match *calls {
            1 => Ok(Some(SmbDirent::new("a.txt", DirentType::File))),
            _ => Err(Errno::ECONNRESET),
        }
    });

    let fs = setup(client);
    let handle = match call(|r| fs.opendir(r, ROOT_INODE, libc::O_RDONLY)).await {
        Outcome::Opened { handle } => handle,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(
        call(|r| fs.readdir(r, ROOT_INODE, handle, 0)).await.errno(),
        Some(libc::ECONNRESET)
    );
}

#[tokio::test]
async fn test_release_reports_close_failure_and_forgets_handle() {
    let mut client = MockClient::new();
    client.expect_stat().returning(|_| Ok(stat_with_mode(libc::S_IFREG | 0o644)));
    client.expect_open().returning(|_, _, _| Ok(5));
    client.expect_close().with(eq(5)).times(1).returning(|_| Err(Errno::EIO));

    let fs = setup(client);
    let inode = match call(|r| fs.lookup(r, ROOT_INODE, "a.txt")).await {
        Outcome::Entry { attr, .. } => attr.inode,
        other => panic!("unexpected outcome: {:?}", other),
    };
    let handle = match call(|r| fs.open(r, inode, libc::O_RDONLY)).await {
        Outcome::Opened { handle } => handle,
        other => panic!("unexpected outcome: {:?}", other),
    };

    assert_eq!(call(|r| fs.release(r, inode, handle)).await.errno(), Some(libc::EIO));
    assert_eq!(call(|r| fs.release(r, inode, handle)).await.errno(), Some(libc::EBADF));
}

#[tokio::test]
async fn test_write_seek_failure() {
    let mut client = MockClient::new();
    client.expect_stat().returning(|_| Ok(stat_with_mode(libc::S_IFREG | 0o644)));
    client.expect_open().returning(|_, _, _| Ok(5));
    client.expect_seek().returning(|_, _| Err(Errno::ESPIPE));
    client.expect_write().never();
    client.expect_close().returning(|_| Ok(()));

    let fs = setup(client);
    let inode = match call(|r| fs.lookup(r, ROOT_INODE, "a.txt")).await {
        Outcome::Entry { attr, .. } => attr.inode,
        other => panic!("unexpected outcome: {:?}", other),
    };
    let handle = match call(|r| fs.open(r, inode, libc::O_WRONLY)).await {
        Outcome::Opened { handle } => handle,
        other => panic!("unexpected outcome: {:?}", other),
    };
    assert_eq!(
        call(|r| fs.write(r, inode, handle, b"abc", 10)).await.errno(),
        Some(libc::ESPIPE)
    );
}

#[tokio::test]
async fn test_errno_zero_becomes_eio() {
    let mut client = MockClient::new();
    client.expect_stat().returning(|_| Err(Errno::UnknownErrno));

    let fs = setup(client);
    assert_eq!(call(|r| fs.getattr(r, ROOT_INODE)).await.errno(), Some(libc::EIO));
}

#[tokio::test]
async fn test_statfs_uses_inode_path() {
    let mut client = MockClient::new();
    client.expect_stat().returning(|_| Ok(stat_with_mode(libc::S_IFDIR | 0o755)));
    client
        .expect_statvfs()
        .with(eq("smb://fileserver/share/docs"))
        .times(1)
        .returning(|_| {
            Ok(StatVfs { bsize: 512, frsize: 8, unix_extensions: false, ..Default::default() })
        });

    let fs = setup(client);
    let inode = match call(|r| fs.lookup(r, ROOT_INODE, "docs")).await {
        Outcome::Entry { attr, .. } => attr.inode,
        other => panic!("unexpected outcome: {:?}", other),
    };
    match call(|r| fs.statfs(r, inode)).await {
        Outcome::Statfs(stats) => {
            assert_eq!(stats.bsize, 512);
            assert_eq!(stats.frsize, 4096);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
}
