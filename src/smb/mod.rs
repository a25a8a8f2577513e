// SMB client layer
//
// The client trait the filesystem drives, share addressing, authentication,
// a libsmbclient-backed client for real servers, and an in-memory share that
// implements the client end to end.

pub mod address;
pub mod client;
pub mod credentials;
pub mod memory;
#[cfg(feature = "smbclient")]
pub mod remote;

pub use address::{SMB_URL_SCHEME, ShareAddress, split_share_url};
#[cfg(any(test, feature = "mockall"))]
pub use client::MockSmbClient;
pub use client::{DirentType, SmbClient, SmbDirent, SmbResult, SmbStat, StatVfs};
pub use credentials::{
    AuthCredentials, AuthPolicy, Authenticator, CredentialSource, ShareCredentials,
    StaticCredentials,
};
pub use memory::{DEFAULT_MAX_FILE_SIZE, MemoryClient, MemoryShare};
#[cfg(feature = "smbclient")]
pub use remote::{RemoteClient, RemoteDir, RemoteFile};
