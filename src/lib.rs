// smbfs - SMB shares as a FUSE filesystem

pub mod config;
pub mod fs;
pub mod fuse;
pub mod smb;

pub use config::{Config, ConfigError, FilesystemConfig, FuseConfig};
pub use fs::{ConnectError, FsError, FsResult, SmbFilesystem};
