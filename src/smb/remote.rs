// SMB client over libsmbclient
//
// Backed by pavao. A pavao context is bound to one server and share, so a
// context is opened lazily per `smb://host/share` the filesystem addresses; a
// rewritten share address simply opens another one. pavao files borrow their
// context, so an open file here records its URL and position and every
// transfer reopens it on the server. Directory listings are read in full at
// opendir and cursor tokens are positions in that listing.

use super::address::{SMB_URL_SCHEME, split_share_url};
use super::client::{DirentType, SmbClient, SmbDirent, SmbResult, SmbStat, StatVfs};
use super::credentials::Authenticator;
use nix::errno::Errno;
use pavao::{
    SmbClient as Context, SmbCredentials, SmbDirentType, SmbError, SmbFile, SmbMode,
    SmbOpenOptions, SmbOptions,
};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Where a URL points: the context that serves it and the path inside the share.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Location {
    /// `smb://host`
    server: String,
    /// `/share`
    share: String,
    /// Share-relative path, `/` for the share root
    path: String,
}

impl Location {
    fn parse(url: &str) -> SmbResult<Self> {
        let (host, suffix) = split_share_url(url).ok_or(Errno::EINVAL)?;
        let suffix = suffix.trim_start_matches('/');
        let (share, rest) = match suffix.find('/') {
            Some(idx) => suffix.split_at(idx),
            None => (suffix, ""),
        };
        if share.is_empty() {
            return Err(Errno::EINVAL);
        }
        let rest = rest.trim_end_matches('/');
        Ok(Self {
            server: format!("{}{}", SMB_URL_SCHEME, host),
            share: format!("/{}", share),
            path: if rest.is_empty() { "/".to_string() } else { rest.to_string() },
        })
    }

    fn host(&self) -> &str {
        &self.server[SMB_URL_SCHEME.len()..]
    }

    fn key(&self) -> String {
        format!("{}{}", self.server, self.share)
    }

    fn same_share(&self, other: &Location) -> bool {
        self.server == other.server && self.share == other.share
    }
}

/// Access requested by `open` flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct OpenMode {
    read: bool,
    write: bool,
    create: bool,
    truncate: bool,
    exclusive: bool,
}

impl OpenMode {
    fn from_flags(flags: i32) -> Self {
        let accmode = flags & libc::O_ACCMODE;
        Self {
            read: accmode == libc::O_RDONLY || accmode == libc::O_RDWR,
            write: accmode == libc::O_WRONLY || accmode == libc::O_RDWR,
            create: flags & libc::O_CREAT != 0,
            truncate: flags & libc::O_TRUNC != 0,
            exclusive: flags & libc::O_EXCL != 0,
        }
    }

    fn options(self, mode: u32) -> SmbOpenOptions {
        SmbOpenOptions::default()
            .read(self.read)
            .write(self.write)
            .create(self.create)
            .truncate(self.truncate)
            .exclusive(self.exclusive)
            .mode(mode & 0o7777)
    }
}

/// An open remote file.
#[derive(Debug)]
pub struct RemoteFile {
    location: Location,
    pos: u64,
    readable: bool,
    writable: bool,
}

/// An open remote directory listing.
#[derive(Debug)]
pub struct RemoteDir {
    entries: Vec<SmbDirent>,
    pos: usize,
}

impl RemoteDir {
    fn new(entries: Vec<SmbDirent>) -> Self {
        Self { entries, pos: 0 }
    }

    fn next_entry(&mut self) -> Option<SmbDirent> {
        let entry = self.entries.get(self.pos).cloned();
        if entry.is_some() {
            self.pos += 1;
        }
        entry
    }

    fn tell(&self) -> SmbResult<i64> {
        i64::try_from(self.pos).map_err(|_| Errno::EOVERFLOW)
    }

    fn seek(&mut self, offset: i64) -> SmbResult<()> {
        let pos = usize::try_from(offset).map_err(|_| Errno::EINVAL)?;
        self.pos = pos.min(self.entries.len());
        Ok(())
    }
}

/// An SMB client talking to real servers through libsmbclient.
pub struct RemoteClient {
    auth: Authenticator,
    contexts: HashMap<String, Context>,
}

impl RemoteClient {
    pub fn new(auth: Authenticator) -> Self {
        Self { auth, contexts: HashMap::new() }
    }

    fn context(&mut self, location: &Location) -> SmbResult<&Context> {
        match self.contexts.entry(location.key()) {
            Entry::Occupied(entry) => Ok(&*entry.into_mut()),
            Entry::Vacant(entry) => {
                let context = connect(&mut self.auth, location)?;
                Ok(&*entry.insert(context))
            }
        }
    }

    /// Reopen a file positioned at its cursor and run one transfer on it.
    fn transfer<T>(
        &mut self,
        file: &RemoteFile,
        mode: OpenMode,
        op: impl FnOnce(&mut SmbFile) -> io::Result<T>,
    ) -> SmbResult<T> {
        let context = self.context(&file.location)?;
        let mut handle =
            context.open_with(file.location.path.as_str(), mode.options(0)).map_err(from_smb)?;
        handle.seek(SeekFrom::Start(file.pos)).map_err(|err| from_io(&err))?;
        op(&mut handle).map_err(|err| from_io(&err))
    }
}

fn connect(auth: &mut Authenticator, location: &Location) -> SmbResult<Context> {
    let share_name = location.share.trim_start_matches('/');
    let creds = auth.credentials(location.host(), share_name);
    let policy = auth.policy();
    let anonymous = creds.is_anonymous();

    tracing::info!(
        server = %location.server,
        share = %location.share,
        username = %creds.username,
        kerberos = policy.use_kerberos,
        "Opening SMB context"
    );

    let credentials = SmbCredentials::default()
        .server(location.server.as_str())
        .share(location.share.as_str())
        .username(creds.username.as_str())
        .password(creds.password.as_str())
        .workgroup(creds.workgroup.as_str());
    let options = SmbOptions::default()
        .case_sensitive(true)
        .one_share_per_server(true)
        .use_kerberos(policy.use_kerberos)
        .fallback_after_kerberos(policy.allow_ntlm)
        .no_auto_anonymous_login(!anonymous);

    Context::new(credentials, options).map_err(from_smb)
}

fn from_io(err: &io::Error) -> Errno {
    err.raw_os_error().map(Errno::from_raw).unwrap_or(Errno::EIO)
}

fn from_smb(err: SmbError) -> Errno {
    match err {
        SmbError::Io(err) => from_io(&err),
        other => {
            tracing::debug!(error = %other, "SMB call failed without an errno");
            Errno::EIO
        }
    }
}

fn dirent_type(kind: SmbDirentType) -> DirentType {
    match kind {
        SmbDirentType::Workgroup => DirentType::Workgroup,
        SmbDirentType::Server => DirentType::Server,
        SmbDirentType::FileShare => DirentType::FileShare,
        SmbDirentType::PrinterShare => DirentType::PrinterShare,
        SmbDirentType::CommsShare => DirentType::CommsShare,
        SmbDirentType::IpcShare => DirentType::IpcShare,
        SmbDirentType::Dir => DirentType::Dir,
        SmbDirentType::File => DirentType::File,
        SmbDirentType::Link => DirentType::Link,
    }
}

/// `S_IFMT` bits for a listing entry type; zero for types with no file mode.
fn type_bits(kind: DirentType) -> u32 {
    match kind {
        DirentType::Dir | DirentType::FileShare => libc::S_IFDIR,
        DirentType::File => libc::S_IFREG,
        DirentType::Link => libc::S_IFLNK,
        _ => 0,
    }
}

/// Parent directory and entry name of a share-relative path
fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("/", path),
    }
}

/// Some servers report permission bits only. Recover the type from the
/// parent's listing.
fn lookup_type_bits(context: &Context, path: &str) -> SmbResult<u32> {
    if path == "/" {
        return Ok(libc::S_IFDIR);
    }
    let (parent, name) = split_parent(path);
    let listing = context.list_dir(parent).map_err(from_smb)?;
    listing
        .iter()
        .find(|entry| entry.name() == name)
        .map(|entry| type_bits(dirent_type(entry.get_type())))
        .ok_or(Errno::ENOENT)
}

impl SmbClient for RemoteClient {
    type File = RemoteFile;
    type Dir = RemoteDir;

    fn stat(&mut self, url: &str) -> SmbResult<SmbStat> {
        let location = Location::parse(url)?;
        let context = self.context(&location)?;
        let stat = context.stat(location.path.as_str()).map_err(from_smb)?;

        let mut mode = u32::from(stat.mode);
        if mode & libc::S_IFMT == 0 {
            mode |= lookup_type_bits(context, &location.path)?;
        }
        Ok(SmbStat {
            mode,
            size: u64::try_from(stat.size).map_err(|_| Errno::EOVERFLOW)?,
            atime: stat.accessed.into(),
            mtime: stat.modified.into(),
            ctime: stat.modified.into(),
        })
    }

    fn open(&mut self, url: &str, flags: i32, mode: u32) -> SmbResult<RemoteFile> {
        let location = Location::parse(url)?;
        let access = OpenMode::from_flags(flags);
        let context = self.context(&location)?;

        // Creation, truncation and exclusivity take effect here; transfers
        // reopen the file without them
        let file = context.open_with(location.path.as_str(), access.options(mode)).map_err(from_smb)?;
        drop(file);

        Ok(RemoteFile { location, pos: 0, readable: access.read, writable: access.write })
    }

    fn read(&mut self, file: &mut RemoteFile, buf: &mut [u8]) -> SmbResult<usize> {
        if !file.readable {
            return Err(Errno::EBADF);
        }
        let mode = OpenMode { read: true, ..Default::default() };
        let count = self.transfer(file, mode, |handle| handle.read(buf))?;
        file.pos += count as u64;
        Ok(count)
    }

    fn write(&mut self, file: &mut RemoteFile, buf: &[u8]) -> SmbResult<usize> {
        if !file.writable {
            return Err(Errno::EBADF);
        }
        let mode = OpenMode { write: true, ..Default::default() };
        let count = self.transfer(file, mode, |handle| handle.write(buf))?;
        file.pos += count as u64;
        Ok(count)
    }

    fn seek(&mut self, file: &mut RemoteFile, offset: u64) -> SmbResult<u64> {
        file.pos = offset;
        Ok(offset)
    }

    /// Only truncation to zero is available through pavao.
    fn truncate(&mut self, file: &mut RemoteFile, size: u64) -> SmbResult<()> {
        if !file.writable {
            return Err(Errno::EBADF);
        }
        if size != 0 {
            return Err(Errno::EOPNOTSUPP);
        }
        let mode = OpenMode { write: true, truncate: true, ..Default::default() };
        self.transfer(file, mode, |_| Ok(()))
    }

    fn close(&mut self, file: RemoteFile) -> SmbResult<()> {
        tracing::trace!(path = %file.location.path, "Closing remote file");
        Ok(())
    }

    fn opendir(&mut self, url: &str) -> SmbResult<RemoteDir> {
        let location = Location::parse(url)?;
        let context = self.context(&location)?;
        let listing = context.list_dir(location.path.as_str()).map_err(from_smb)?;
        let entries = listing
            .iter()
            .map(|entry| SmbDirent::new(entry.name(), dirent_type(entry.get_type())))
            .collect();
        Ok(RemoteDir::new(entries))
    }

    fn readdir(&mut self, dir: &mut RemoteDir) -> SmbResult<Option<SmbDirent>> {
        Ok(dir.next_entry())
    }

    fn telldir(&mut self, dir: &mut RemoteDir) -> SmbResult<i64> {
        dir.tell()
    }

    fn seekdir(&mut self, dir: &mut RemoteDir, offset: i64) -> SmbResult<()> {
        dir.seek(offset)
    }

    fn closedir(&mut self, _dir: RemoteDir) -> SmbResult<()> {
        Ok(())
    }

    fn mkdir(&mut self, url: &str, mode: u32) -> SmbResult<()> {
        let location = Location::parse(url)?;
        let context = self.context(&location)?;
        context.mkdir(location.path.as_str(), SmbMode::from(mode & 0o7777)).map_err(from_smb)
    }

    fn rmdir(&mut self, url: &str) -> SmbResult<()> {
        let location = Location::parse(url)?;
        self.context(&location)?.rmdir(location.path.as_str()).map_err(from_smb)
    }

    fn unlink(&mut self, url: &str) -> SmbResult<()> {
        let location = Location::parse(url)?;
        self.context(&location)?.unlink(location.path.as_str()).map_err(from_smb)
    }

    fn rename(&mut self, from: &str, to: &str) -> SmbResult<()> {
        let from = Location::parse(from)?;
        let to = Location::parse(to)?;
        if !from.same_share(&to) {
            return Err(Errno::EXDEV);
        }
        self.context(&from)?.rename(from.path.as_str(), to.path.as_str()).map_err(from_smb)
    }

    /// pavao has no statvfs; report no capacity the way an unimplemented
    /// FUSE statfs does.
    fn statvfs(&mut self, url: &str) -> SmbResult<StatVfs> {
        Location::parse(url)?;
        Ok(StatVfs {
            bsize: 512,
            frsize: 512,
            namemax: 255,
            unix_extensions: true,
            ..Default::default()
        })
    }
}
