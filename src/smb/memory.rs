// In-memory SMB share
//
// A complete `SmbClient` implementation backed by process memory. It behaves
// like a libsmbclient context talking to a single share: URLs must name a
// reachable host and the configured share, authentication follows the
// Kerberos/NTLM/guest policy, directory cursors hand out opaque tokens, and
// calls can be made to fail on demand. The share state is shared between
// clones so a caller can seed and inspect it while a client owns a session.

use super::address::split_share_url;
use super::client::{DirentType, SmbClient, SmbDirent, SmbResult, SmbStat, StatVfs};
use super::credentials::Authenticator;
use chrono::{DateTime, Utc};
use nix::errno::Errno;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Distance between consecutive directory cursor tokens.
const CURSOR_STRIDE: i64 = 32;

/// Largest file the share will hold unless configured otherwise.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1 << 30;

#[derive(Debug, Clone)]
enum NodeKind {
    File(Vec<u8>),
    Dir,
    Special(DirentType),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    mode: u32,
    /// Open file handles on this node
    opens: usize,
    /// Whether a path still names this node
    linked: bool,
    atime: DateTime<Utc>,
    mtime: DateTime<Utc>,
    ctime: DateTime<Utc>,
}

impl Node {
    fn new(kind: NodeKind, mode: u32) -> Self {
        let now = Utc::now();
        Self { kind, mode, opens: 0, linked: true, atime: now, mtime: now, ctime: now }
    }

    fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Dir)
    }

    fn dirent_type(&self) -> DirentType {
        match &self.kind {
            NodeKind::File(_) => DirentType::File,
            NodeKind::Dir => DirentType::Dir,
            NodeKind::Special(kind) => *kind,
        }
    }

    fn stat(&self) -> SmbStat {
        let size = match &self.kind {
            NodeKind::File(data) => data.len() as u64,
            _ => 0,
        };
        SmbStat { mode: self.mode, size, atime: self.atime, mtime: self.mtime, ctime: self.ctime }
    }
}

#[derive(Debug, Default)]
struct Access {
    /// username -> (workgroup, password)
    users: HashMap<String, (String, String)>,
    kerberos_users: HashSet<String>,
    guest_ok: bool,
}

#[derive(Debug)]
struct ShareState {
    hosts: HashSet<String>,
    /// Path of the share on the server, e.g. `/share`
    share_root: String,
    next_node: u64,
    paths: BTreeMap<String, u64>,
    nodes: HashMap<u64, Node>,
    access: Access,
    statvfs: StatVfs,
    faults: HashMap<&'static str, Errno>,
    max_transfer: Option<usize>,
    max_file_size: u64,
    urls: Vec<String>,
    open_handles: usize,
    open_at_disconnect: Option<usize>,
    sessions: usize,
}

impl ShareState {
    fn take_fault(&mut self, op: &'static str) -> SmbResult<()> {
        match self.faults.remove(op) {
            Some(errno) => Err(errno),
            None => Ok(()),
        }
    }

    fn node(&self, path: &str) -> SmbResult<&Node> {
        let id = self.paths.get(path).ok_or(Errno::ENOENT)?;
        self.nodes.get(id).ok_or(Errno::ENOENT)
    }

    fn insert_node(&mut self, path: String, node: Node) -> u64 {
        self.unlink_path(&path);
        let id = self.next_node;
        self.next_node += 1;
        self.nodes.insert(id, node);
        self.paths.insert(path, id);
        id
    }

    /// Remove a path. Its node is freed now, or on the last close if open.
    fn unlink_path(&mut self, path: &str) {
        let Some(id) = self.paths.remove(path) else {
            return;
        };
        if let Some(node) = self.nodes.get_mut(&id) {
            node.linked = false;
            if node.opens == 0 {
                self.nodes.remove(&id);
            }
        }
    }

    fn release_node(&mut self, id: u64) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.opens = node.opens.saturating_sub(1);
            if node.opens == 0 && !node.linked {
                self.nodes.remove(&id);
            }
        }
    }

    fn require_parent_dir(&self, path: &str) -> SmbResult<()> {
        let parent = parent_of(path);
        if self.node(parent)?.is_dir() { Ok(()) } else { Err(Errno::ENOTDIR) }
    }

    fn children(&self, dir: &str) -> Vec<(String, u64)> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{}/", dir) };
        self.paths
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| {
                let rest = &path[prefix.len()..];
                !rest.is_empty() && !rest.contains('/')
            })
            .map(|(path, id)| (path[prefix.len()..].to_string(), *id))
            .collect()
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Zero-extend `data` to `len` bytes, failing instead of aborting when memory runs out.
fn grow(data: &mut Vec<u8>, len: usize) -> SmbResult<()> {
    if data.len() < len {
        data.try_reserve(len - data.len()).map_err(|_| Errno::ENOSPC)?;
        data.resize(len, 0);
    }
    Ok(())
}

fn normalize(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

/// Handle to an in-memory share. Clones share the same state.
#[derive(Debug, Clone)]
pub struct MemoryShare {
    state: Arc<Mutex<ShareState>>,
}

impl MemoryShare {
    /// Create an empty share reachable at `share_url` (`smb://host/share`).
    ///
    /// Guest access is allowed until a user is registered.
    pub fn new(share_url: &str) -> Self {
        let (host, suffix) = split_share_url(share_url).unwrap_or(("localhost", "/share"));
        let mut state = ShareState {
            hosts: HashSet::from([host.to_string()]),
            share_root: normalize(suffix),
            next_node: 1,
            paths: BTreeMap::new(),
            nodes: HashMap::new(),
            access: Access { guest_ok: true, ..Default::default() },
            statvfs: StatVfs {
                bsize: 4096,
                frsize: 4096,
                blocks: 1_000_000,
                bfree: 500_000,
                bavail: 500_000,
                files: 100_000,
                ffree: 90_000,
                namemax: 255,
                unix_extensions: true,
            },
            faults: HashMap::new(),
            max_transfer: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            urls: Vec::new(),
            open_handles: 0,
            open_at_disconnect: None,
            sessions: 0,
        };
        state.insert_node("/".to_string(), Node::new(NodeKind::Dir, libc::S_IFDIR | 0o755));
        Self { state: Arc::new(Mutex::new(state)) }
    }

    /// Open a client session on this share.
    pub fn connect(&self, auth: Authenticator) -> MemoryClient {
        MemoryClient { state: Arc::clone(&self.state), auth, authenticated: false }
    }

    /// Accept connections addressed to `host` as well (e.g. a resolved IP).
    pub fn allow_host(&self, host: &str) {
        self.state.lock().hosts.insert(host.to_string());
    }

    pub fn add_dir(&self, path: &str) {
        let path = normalize(path);
        self.state.lock().insert_node(path, Node::new(NodeKind::Dir, libc::S_IFDIR | 0o755));
    }

    pub fn add_file(&self, path: &str, contents: &[u8]) {
        let path = normalize(path);
        self.state
            .lock()
            .insert_node(path, Node::new(NodeKind::File(contents.to_vec()), libc::S_IFREG | 0o644));
    }

    /// Add an entry that is neither a file nor a directory.
    pub fn add_special(&self, path: &str, kind: DirentType, mode: u32) {
        let path = normalize(path);
        self.state.lock().insert_node(path, Node::new(NodeKind::Special(kind), mode));
    }

    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        let state = self.state.lock();
        match state.node(&normalize(path)).ok().map(|n| &n.kind) {
            Some(NodeKind::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.state.lock().paths.contains_key(&normalize(path))
    }

    pub fn is_dir(&self, path: &str) -> bool {
        self.state.lock().node(&normalize(path)).map(Node::is_dir).unwrap_or(false)
    }

    /// Require NTLM credentials; disables guest access.
    pub fn add_user(&self, workgroup: &str, username: &str, password: &str) {
        let mut state = self.state.lock();
        state.access.guest_ok = false;
        state
            .access
            .users
            .insert(username.to_string(), (workgroup.to_string(), password.to_string()));
    }

    /// Accept `username` via Kerberos without a password.
    pub fn add_kerberos_user(&self, username: &str) {
        let mut state = self.state.lock();
        state.access.guest_ok = false;
        state.access.kerberos_users.insert(username.to_string());
    }

    pub fn set_guest_ok(&self, guest_ok: bool) {
        self.state.lock().access.guest_ok = guest_ok;
    }

    pub fn set_statvfs(&self, statvfs: StatVfs) {
        self.state.lock().statvfs = statvfs;
    }

    /// Make the next call of `op` (e.g. `"truncate"`) fail with `errno`.
    pub fn fail_next(&self, op: &'static str, errno: Errno) {
        self.state.lock().faults.insert(op, errno);
    }

    /// Cap the number of bytes a single read or write moves.
    pub fn set_max_transfer(&self, max: usize) {
        self.state.lock().max_transfer = Some(max);
    }

    /// Writes and truncates past `max` bytes fail with `EFBIG`.
    pub fn set_max_file_size(&self, max: u64) {
        self.state.lock().max_file_size = max;
    }

    /// Nodes held in memory, counting unlinked files that are still open.
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Every URL passed to the client, in call order.
    pub fn urls(&self) -> Vec<String> {
        self.state.lock().urls.clone()
    }

    /// Native file and directory handles currently open.
    pub fn open_handles(&self) -> usize {
        self.state.lock().open_handles
    }

    /// Handles still open when the last client was dropped.
    pub fn open_at_disconnect(&self) -> Option<usize> {
        self.state.lock().open_at_disconnect
    }

    /// Number of authenticated sessions established.
    pub fn sessions(&self) -> usize {
        self.state.lock().sessions
    }
}

/// An open file on a [`MemoryShare`].
#[derive(Debug)]
pub struct MemoryFile {
    node: u64,
    pos: u64,
    readable: bool,
    writable: bool,
}

/// An open directory listing on a [`MemoryShare`].
#[derive(Debug)]
pub struct MemoryDir {
    entries: Vec<SmbDirent>,
    pos: usize,
}

/// A client session on a [`MemoryShare`].
#[derive(Debug)]
pub struct MemoryClient {
    state: Arc<Mutex<ShareState>>,
    auth: Authenticator,
    authenticated: bool,
}

impl MemoryClient {
    /// Validate the URL, authenticate if needed, and return the
    /// share-relative path it names.
    fn resolve(&mut self, url: &str) -> SmbResult<String> {
        let (host, share_root, suffix) = {
            let mut state = self.state.lock();
            state.urls.push(url.to_string());
            let (host, suffix) = split_share_url(url).ok_or(Errno::EINVAL)?;
            if !state.hosts.contains(host) {
                return Err(Errno::EHOSTUNREACH);
            }
            (host.to_string(), state.share_root.clone(), normalize(suffix))
        };

        let relative = if suffix == share_root {
            "/".to_string()
        } else if let Some(rest) = suffix.strip_prefix(&format!("{}/", share_root)) {
            format!("/{}", rest)
        } else {
            return Err(Errno::ENODEV);
        };

        if !self.authenticated {
            self.authenticate(&host, &share_root)?;
        }
        Ok(relative)
    }

    fn authenticate(&mut self, host: &str, share_root: &str) -> SmbResult<()> {
        let share = share_root.trim_start_matches('/').split('/').next().unwrap_or_default();
        let creds = self.auth.credentials(host, share);
        let policy = self.auth.policy();

        let mut state = self.state.lock();
        state.take_fault("connect")?;

        let kerberos_ok = policy.use_kerberos && state.access.kerberos_users.contains(&creds.username);
        let granted = if kerberos_ok {
            true
        } else if policy.use_kerberos && !policy.allow_ntlm {
            false
        } else if creds.is_anonymous() {
            state.access.guest_ok
        } else {
            match state.access.users.get(&creds.username) {
                Some((workgroup, password)) => {
                    *password == creds.password
                        && (workgroup.is_empty() || workgroup.eq_ignore_ascii_case(&creds.workgroup))
                }
                None => state.access.guest_ok,
            }
        };

        if !granted {
            return Err(Errno::EACCES);
        }
        state.sessions += 1;
        self.authenticated = true;
        Ok(())
    }

    fn with_state<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut ShareState) -> SmbResult<T>,
    ) -> SmbResult<T> {
        let mut state = self.state.lock();
        state.take_fault(op)?;
        f(&mut state)
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.open_at_disconnect = Some(state.open_handles);
    }
}

impl SmbClient for MemoryClient {
    type File = MemoryFile;
    type Dir = MemoryDir;

    fn stat(&mut self, url: &str) -> SmbResult<SmbStat> {
        let path = self.resolve(url)?;
        self.with_state("stat", |state| Ok(state.node(&path)?.stat()))
    }

    fn open(&mut self, url: &str, flags: i32, mode: u32) -> SmbResult<MemoryFile> {
        let path = self.resolve(url)?;
        self.with_state("open", |state| {
            let accmode = flags & libc::O_ACCMODE;
            let readable = accmode == libc::O_RDONLY || accmode == libc::O_RDWR;
            let writable = accmode == libc::O_WRONLY || accmode == libc::O_RDWR;

            let node = match state.paths.get(&path).copied() {
                Some(_) if flags & libc::O_CREAT != 0 && flags & libc::O_EXCL != 0 => {
                    return Err(Errno::EEXIST);
                }
                Some(id) => id,
                None if flags & libc::O_CREAT != 0 => {
                    state.require_parent_dir(&path)?;
                    let perm = mode & 0o7777;
                    state.insert_node(
                        path.clone(),
                        Node::new(NodeKind::File(Vec::new()), libc::S_IFREG | perm),
                    )
                }
                None => return Err(Errno::ENOENT),
            };

            let entry = state.nodes.get_mut(&node).ok_or(Errno::ENOENT)?;
            match &mut entry.kind {
                NodeKind::File(data) => {
                    if flags & libc::O_TRUNC != 0 && writable {
                        data.clear();
                        entry.mtime = Utc::now();
                    }
                }
                NodeKind::Dir => return Err(Errno::EISDIR),
                NodeKind::Special(_) => return Err(Errno::EACCES),
            }

            entry.opens += 1;
            state.open_handles += 1;
            Ok(MemoryFile { node, pos: 0, readable, writable })
        })
    }

    fn read(&mut self, file: &mut MemoryFile, buf: &mut [u8]) -> SmbResult<usize> {
        self.with_state("read", |state| {
            if !file.readable {
                return Err(Errno::EBADF);
            }
            let limit = state.max_transfer.unwrap_or(usize::MAX).min(buf.len());
            let node = state.nodes.get_mut(&file.node).ok_or(Errno::EBADF)?;
            let NodeKind::File(data) = &node.kind else {
                return Err(Errno::EBADF);
            };
            let start = usize::try_from(file.pos).map_err(|_| Errno::EOVERFLOW)?;
            if start >= data.len() {
                return Ok(0);
            }
            let count = limit.min(data.len() - start);
            buf[..count].copy_from_slice(&data[start..start + count]);
            file.pos += count as u64;
            node.atime = Utc::now();
            Ok(count)
        })
    }

    fn write(&mut self, file: &mut MemoryFile, buf: &[u8]) -> SmbResult<usize> {
        self.with_state("write", |state| {
            if !file.writable {
                return Err(Errno::EBADF);
            }
            let limit = state.max_transfer.unwrap_or(usize::MAX).min(buf.len());
            let max_size = state.max_file_size;
            let node = state.nodes.get_mut(&file.node).ok_or(Errno::EBADF)?;
            let NodeKind::File(data) = &mut node.kind else {
                return Err(Errno::EBADF);
            };
            let start = usize::try_from(file.pos).map_err(|_| Errno::EFBIG)?;
            let end = start.checked_add(limit).ok_or(Errno::EFBIG)?;
            if end as u64 > max_size {
                return Err(Errno::EFBIG);
            }
            grow(data, end)?;
            data[start..end].copy_from_slice(&buf[..limit]);
            file.pos += limit as u64;
            node.mtime = Utc::now();
            Ok(limit)
        })
    }

    fn seek(&mut self, file: &mut MemoryFile, offset: u64) -> SmbResult<u64> {
        self.with_state("seek", |_| {
            file.pos = offset;
            Ok(offset)
        })
    }

    fn truncate(&mut self, file: &mut MemoryFile, size: u64) -> SmbResult<()> {
        self.with_state("truncate", |state| {
            if !file.writable {
                return Err(Errno::EBADF);
            }
            if size > state.max_file_size {
                return Err(Errno::EFBIG);
            }
            let node = state.nodes.get_mut(&file.node).ok_or(Errno::EBADF)?;
            let NodeKind::File(data) = &mut node.kind else {
                return Err(Errno::EISDIR);
            };
            let size = usize::try_from(size).map_err(|_| Errno::EFBIG)?;
            grow(data, size)?;
            data.truncate(size);
            node.mtime = Utc::now();
            Ok(())
        })
    }

    fn close(&mut self, file: MemoryFile) -> SmbResult<()> {
        let mut state = self.state.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
        state.release_node(file.node);
        state.take_fault("close")
    }

    fn opendir(&mut self, url: &str) -> SmbResult<MemoryDir> {
        let path = self.resolve(url)?;
        self.with_state("opendir", |state| {
            if !state.node(&path)?.is_dir() {
                return Err(Errno::ENOTDIR);
            }
            let mut entries =
                vec![SmbDirent::new(".", DirentType::Dir), SmbDirent::new("..", DirentType::Dir)];
            for (name, id) in state.children(&path) {
                if let Some(node) = state.nodes.get(&id) {
                    entries.push(SmbDirent::new(name, node.dirent_type()));
                }
            }
            state.open_handles += 1;
            Ok(MemoryDir { entries, pos: 0 })
        })
    }

    fn readdir(&mut self, dir: &mut MemoryDir) -> SmbResult<Option<SmbDirent>> {
        self.with_state("readdir", |_| {
            let entry = dir.entries.get(dir.pos).cloned();
            if entry.is_some() {
                dir.pos += 1;
            }
            Ok(entry)
        })
    }

    fn telldir(&mut self, dir: &mut MemoryDir) -> SmbResult<i64> {
        self.with_state("telldir", |_| {
            let pos = i64::try_from(dir.pos).map_err(|_| Errno::EOVERFLOW)?;
            Ok(pos * CURSOR_STRIDE)
        })
    }

    fn seekdir(&mut self, dir: &mut MemoryDir, offset: i64) -> SmbResult<()> {
        self.with_state("seekdir", |_| {
            if offset < 0 || offset % CURSOR_STRIDE != 0 {
                return Err(Errno::EINVAL);
            }
            let pos = usize::try_from(offset / CURSOR_STRIDE).map_err(|_| Errno::EINVAL)?;
            dir.pos = pos.min(dir.entries.len());
            Ok(())
        })
    }

    fn closedir(&mut self, _dir: MemoryDir) -> SmbResult<()> {
        let mut state = self.state.lock();
        state.open_handles = state.open_handles.saturating_sub(1);
        state.take_fault("closedir")
    }

    fn mkdir(&mut self, url: &str, mode: u32) -> SmbResult<()> {
        let path = self.resolve(url)?;
        self.with_state("mkdir", |state| {
            if state.paths.contains_key(&path) {
                return Err(Errno::EEXIST);
            }
            state.require_parent_dir(&path)?;
            state.insert_node(path, Node::new(NodeKind::Dir, libc::S_IFDIR | (mode & 0o7777)));
            Ok(())
        })
    }

    fn rmdir(&mut self, url: &str) -> SmbResult<()> {
        let path = self.resolve(url)?;
        self.with_state("rmdir", |state| {
            if path == "/" {
                return Err(Errno::EBUSY);
            }
            if !state.node(&path)?.is_dir() {
                return Err(Errno::ENOTDIR);
            }
            if !state.children(&path).is_empty() {
                return Err(Errno::ENOTEMPTY);
            }
            state.unlink_path(&path);
            Ok(())
        })
    }

    fn unlink(&mut self, url: &str) -> SmbResult<()> {
        let path = self.resolve(url)?;
        self.with_state("unlink", |state| {
            if state.node(&path)?.is_dir() {
                return Err(Errno::EISDIR);
            }
            state.unlink_path(&path);
            Ok(())
        })
    }

    fn rename(&mut self, from: &str, to: &str) -> SmbResult<()> {
        let from = self.resolve(from)?;
        let to = self.resolve(to)?;
        self.with_state("rename", |state| {
            let source_is_dir = state.node(&from)?.is_dir();
            state.require_parent_dir(&to)?;
            if from == to {
                return Ok(());
            }
            if let Ok(target) = state.node(&to) {
                match (source_is_dir, target.is_dir()) {
                    (true, false) => return Err(Errno::ENOTDIR),
                    (false, true) => return Err(Errno::EISDIR),
                    (true, true) if !state.children(&to).is_empty() => {
                        return Err(Errno::ENOTEMPTY);
                    }
                    _ => {}
                }
                state.unlink_path(&to);
            }

            let prefix = format!("{}/", from);
            let moved: Vec<(String, u64)> = state
                .paths
                .iter()
                .filter(|(path, _)| **path == from || path.starts_with(&prefix))
                .map(|(path, id)| (path.clone(), *id))
                .collect();
            for (path, id) in moved {
                state.paths.remove(&path);
                let renamed = format!("{}{}", to, &path[from.len()..]);
                state.paths.insert(renamed, id);
            }
            Ok(())
        })
    }

    fn statvfs(&mut self, url: &str) -> SmbResult<StatVfs> {
        self.resolve(url)?;
        self.with_state("statvfs", |state| Ok(state.statvfs.clone()))
    }
}
