// FUSE interface
//
// Mounts an SmbFilesystem through fuser. The adapter only converts operands;
// all filesystem semantics live in crate::fs.

pub mod adapter;
pub mod mount;
mod reply;

pub use adapter::FuseAdapter;
pub use mount::{MountOptions, mount};
