use crate::smb::{ShareCredentials, split_share_url};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Invalid filesystem construction options
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Share path must not be empty")]
    EmptySharePath,

    #[error("Share path must not end in '/': {0}")]
    TrailingSlash(String),

    #[error("Share path must look like smb://host/share: {0}")]
    InvalidSharePath(String),

    #[error("Owning uid must be greater than zero")]
    InvalidUid,

    #[error("Owning gid must be greater than zero")]
    InvalidGid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub share: FilesystemConfig,
    pub fuse: FuseConfig,
}

/// Options the filesystem is constructed with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemConfig {
    /// `smb://host/share[/path]`
    pub share_path: String,
    pub uid: u32,
    pub gid: u32,
    #[serde(default)]
    pub credentials: Option<ShareCredentials>,
    #[serde(default)]
    pub use_kerberos: bool,
    /// Fall back to NTLM when Kerberos authentication fails
    #[serde(default = "default_allow_ntlm")]
    pub allow_ntlm: bool,
}

fn default_allow_ntlm() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FuseConfig {
    pub mount_point: String,
    pub allow_other: bool,
}

impl FilesystemConfig {
    pub fn new(share_path: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            share_path: share_path.into(),
            uid,
            gid,
            credentials: None,
            use_kerberos: false,
            allow_ntlm: true,
        }
    }

    pub fn with_credentials(mut self, credentials: ShareCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.share_path.is_empty() {
            return Err(ConfigError::EmptySharePath);
        }
        if self.share_path.ends_with('/') {
            return Err(ConfigError::TrailingSlash(self.share_path.clone()));
        }
        if split_share_url(&self.share_path).is_none() {
            return Err(ConfigError::InvalidSharePath(self.share_path.clone()));
        }
        if self.uid == 0 {
            return Err(ConfigError::InvalidUid);
        }
        if self.gid == 0 {
            return Err(ConfigError::InvalidGid);
        }
        Ok(())
    }
}

impl Config {
    /// Load from an optional `smbfs.toml` (or `path`) and `SMBFS__*` environment variables
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name("smbfs").required(false),
        };

        let defaults = Config::default();
        let config = config::Config::builder()
            .set_default("share.share_path", defaults.share.share_path)?
            .set_default("share.uid", i64::from(defaults.share.uid))?
            .set_default("share.gid", i64::from(defaults.share.gid))?
            .set_default("fuse.mount_point", defaults.fuse.mount_point)?
            .set_default("fuse.allow_other", defaults.fuse.allow_other)?
            .add_source(file)
            .add_source(config::Environment::with_prefix("SMBFS").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            share: FilesystemConfig::new("smb://localhost/share", 1000, 1000),
            fuse: FuseConfig { mount_point: "/mnt/smbfs".to_string(), allow_other: false },
        }
    }
}
