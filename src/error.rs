//! Error handling and errno mapping for the overlay filesystem.
//!
//! Verb handlers are the error boundary: every failure from the backing
//! store is converted to a POSIX error code here and returned through the
//! FUSE reply, never propagated further up.

use std::io;
use thiserror::Error;

/// Errors that can occur while servicing a filesystem operation.
#[derive(Debug, Error)]
pub enum RotfsError {
    /// Failure reported by the backing filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A raw errno from a backing syscall.
    #[error("system error: {0}")]
    Errno(nix::errno::Errno),

    /// The kernel referenced an inode this table does not know.
    #[error("invalid inode: {0}")]
    InvalidInode(u64),
}

impl RotfsError {
    /// Converts this error to a libc error code for FUSE.
    pub fn to_errno(&self) -> i32 {
        match self {
            RotfsError::Io(e) => io_error_to_errno(e),
            RotfsError::Errno(e) => *e as i32,
            RotfsError::InvalidInode(_) => libc::ENOENT,
        }
    }
}

impl From<nix::errno::Errno> for RotfsError {
    fn from(e: nix::errno::Errno) -> Self {
        RotfsError::Errno(e)
    }
}

/// Maps an `io::Error` to its underlying OS error code, with EIO as the
/// fallback for synthetic errors that carry none.
pub fn io_error_to_errno(e: &io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}

/// Result type for filesystem operations.
pub type RotfsResult<T> = Result<T, RotfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let e = io::Error::from_raw_os_error(libc::ENOENT);
        assert_eq!(io_error_to_errno(&e), libc::ENOENT);

        let e = io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(io_error_to_errno(&e), libc::EACCES);
    }

    #[test]
    fn test_io_error_mapping_without_os_error() {
        let e = io::Error::other("custom error");
        assert_eq!(io_error_to_errno(&e), libc::EIO);
    }

    #[test]
    fn test_error_conversion() {
        let e = RotfsError::InvalidInode(42);
        assert_eq!(e.to_errno(), libc::ENOENT);

        let e: RotfsError = io::Error::from_raw_os_error(libc::EPERM).into();
        assert_eq!(e.to_errno(), libc::EPERM);

        let e: RotfsError = nix::errno::Errno::ENOTEMPTY.into();
        assert_eq!(e.to_errno(), libc::ENOTEMPTY);
    }

    #[test]
    fn test_common_io_error_mappings() {
        let error_codes = [
            libc::ENOENT,
            libc::EACCES,
            libc::EEXIST,
            libc::ENOTDIR,
            libc::EISDIR,
            libc::EINVAL,
            libc::ENOSPC,
            libc::EROFS,
            libc::ENOTEMPTY,
        ];

        for code in error_codes {
            let e = io::Error::from_raw_os_error(code);
            assert_eq!(
                io_error_to_errno(&e),
                code,
                "IO error code {code} should map to same errno"
            );
        }
    }

    #[test]
    fn test_error_display() {
        let e = RotfsError::InvalidInode(7);
        assert!(e.to_string().contains('7'));
    }
}
