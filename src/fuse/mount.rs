// FUSE mount management

use super::FuseAdapter;
use crate::fs::SmbFilesystem;
use crate::smb::SmbClient;
use anyhow::{Context, Result};
use std::path::Path;

/// Mount options for FUSE filesystem
#[derive(Debug, Clone)]
pub struct MountOptions {
    /// Allow other users to access the filesystem
    pub allow_other: bool,

    /// Allow root to access the filesystem
    pub allow_root: bool,

    /// Let the kernel enforce the reported permission bits
    pub default_permissions: bool,

    /// Filesystem name (for mtab)
    pub fsname: Option<String>,

    /// Auto-unmount on process exit
    pub auto_unmount: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            allow_other: false,
            allow_root: false,
            default_permissions: true,
            fsname: Some("smbfs".to_string()),
            auto_unmount: true,
        }
    }
}

impl MountOptions {
    /// Defaults, with the share URL as the mtab source
    pub fn for_share(share_path: &str) -> Self {
        Self { fsname: Some(share_path.to_string()), ..Default::default() }
    }

    fn to_fuser_options(&self) -> Vec<fuser::MountOption> {
        let mut options = vec![fuser::MountOption::Subtype("smbfs".to_string())];

        if self.allow_other {
            options.push(fuser::MountOption::AllowOther);
        }
        if self.allow_root {
            options.push(fuser::MountOption::AllowRoot);
        }
        if self.default_permissions {
            options.push(fuser::MountOption::DefaultPermissions);
        }
        if let Some(ref fsname) = self.fsname {
            options.push(fuser::MountOption::FSName(fsname.clone()));
        }
        if self.auto_unmount {
            options.push(fuser::MountOption::AutoUnmount);
        }

        options
    }
}

/// Mount `fs` at `mountpoint`.
///
/// The returned session keeps the filesystem mounted until dropped.
pub fn mount<C: SmbClient + 'static>(
    fs: SmbFilesystem<C>,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<fuser::BackgroundSession> {
    let mountpoint = mountpoint.as_ref();

    if !mountpoint.is_dir() {
        anyhow::bail!("Mount point is not a directory: {}", mountpoint.display());
    }

    tracing::info!(
        share = %fs.share_address(),
        mountpoint = %mountpoint.display(),
        "Mounting SMB share"
    );

    let session =
        fuser::spawn_mount2(FuseAdapter::new(fs), mountpoint, &options.to_fuser_options())
            .context("Failed to mount filesystem")?;

    tracing::info!("Filesystem mounted successfully");
    Ok(session)
}
