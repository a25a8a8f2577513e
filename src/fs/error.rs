use nix::errno::Errno;
use thiserror::Error;

/// Result type for filesystem operations
pub type FsResult<T> = Result<T, FsError>;

/// Per-operation failures, each surfaced to the kernel as an errno.
#[derive(Error, Debug)]
pub enum FsError {
    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Is a directory: {0}")]
    IsDirectory(String),

    #[error("Not a directory: {0}")]
    NotDirectory(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Bad file handle: {0}")]
    BadHandle(u64),

    #[error("SMB {op} failed: {errno}")]
    Remote { op: &'static str, errno: Errno },
}

impl FsError {
    /// Wrap an errno reported by the SMB client
    pub fn remote(op: &'static str, errno: Errno) -> Self {
        FsError::Remote { op, errno }
    }

    /// Convert to POSIX errno
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::PermissionDenied(_) => libc::EACCES,
            FsError::IsDirectory(_) => libc::EISDIR,
            FsError::NotDirectory(_) => libc::ENOTDIR,
            FsError::NotSupported(_) => libc::ENOTSUP,
            FsError::InvalidArgument(_) => libc::EINVAL,
            FsError::BadHandle(_) => libc::EBADF,
            // A client that failed without setting errno still failed
            FsError::Remote { errno, .. } if *errno as i32 == 0 => libc::EIO,
            FsError::Remote { errno, .. } => *errno as i32,
        }
    }
}

/// Outcome of the mount-time connectivity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    Ok,
    NotFound,
    AccessDenied,
    ProtocolUnsupported,
    UnknownError,
}

impl ConnectError {
    /// Classify the errno from opening the share root
    pub fn from_errno(errno: Errno) -> Self {
        match errno {
            Errno::EACCES | Errno::EPERM => ConnectError::AccessDenied,
            Errno::ENOENT
            | Errno::ENODEV
            | Errno::ETIMEDOUT
            | Errno::ECONNREFUSED
            | Errno::EHOSTUNREACH
            | Errno::ENETUNREACH => ConnectError::NotFound,
            // Servers that only speak SMB1 drop the connection during negotiation
            Errno::ECONNABORTED => ConnectError::ProtocolUnsupported,
            _ => ConnectError::UnknownError,
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == ConnectError::Ok
    }
}

impl std::fmt::Display for ConnectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ConnectError::Ok => "connected",
            ConnectError::NotFound => "share not found",
            ConnectError::AccessDenied => "access denied",
            ConnectError::ProtocolUnsupported => "SMB protocol version not supported",
            ConnectError::UnknownError => "unknown error",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fserror_to_errno() {
        assert_eq!(FsError::NotFound("test".to_string()).to_errno(), libc::ENOENT);
        assert_eq!(FsError::PermissionDenied("test".to_string()).to_errno(), libc::EACCES);
        assert_eq!(FsError::IsDirectory("test".to_string()).to_errno(), libc::EISDIR);
        assert_eq!(FsError::NotDirectory("test".to_string()).to_errno(), libc::ENOTDIR);
        assert_eq!(FsError::NotSupported("test".to_string()).to_errno(), libc::ENOTSUP);
        assert_eq!(FsError::InvalidArgument("test".to_string()).to_errno(), libc::EINVAL);
        assert_eq!(FsError::BadHandle(3).to_errno(), libc::EBADF);
    }

    #[test]
    fn test_remote_errno_passes_through() {
        assert_eq!(FsError::remote("stat", Errno::ETIMEDOUT).to_errno(), libc::ETIMEDOUT);
        assert_eq!(FsError::remote("read", Errno::UnknownErrno).to_errno(), libc::EIO);
    }

    #[test]
    fn test_fserror_display() {
        let err = FsError::BadHandle(42);
        assert_eq!(err.to_string(), "Bad file handle: 42");

        let err = FsError::remote("rename", Errno::EEXIST);
        assert!(err.to_string().starts_with("SMB rename failed"));
    }

    #[test]
    fn test_connect_error_classification() {
        assert_eq!(ConnectError::from_errno(Errno::EACCES), ConnectError::AccessDenied);
        assert_eq!(ConnectError::from_errno(Errno::EPERM), ConnectError::AccessDenied);
        assert_eq!(ConnectError::from_errno(Errno::EHOSTUNREACH), ConnectError::NotFound);
        assert_eq!(ConnectError::from_errno(Errno::ETIMEDOUT), ConnectError::NotFound);
        assert_eq!(ConnectError::from_errno(Errno::ENODEV), ConnectError::NotFound);
        assert_eq!(ConnectError::from_errno(Errno::ECONNABORTED), ConnectError::ProtocolUnsupported);
        assert_eq!(ConnectError::from_errno(Errno::EIO), ConnectError::UnknownError);
    }

    #[test]
    fn test_connect_error_display() {
        assert_eq!(ConnectError::Ok.to_string(), "connected");
        assert!(ConnectError::Ok.is_ok());
        assert!(!ConnectError::AccessDenied.is_ok());
    }
}
