//! rotfs — a transparent ROT13 overlay filesystem.
//!
//! Mounts an existing directory through a FUSE mount point, applying a
//! fixed byte-substitution (ROT13 over ASCII letters, identity for every
//! other byte) to each path component and each content byte. Files read
//! through the mount appear in plaintext while the backing copies stay
//! obfuscated, and writes go the other way.
//!
//! The substitution is a publicly known involution, not a cipher: this is
//! an obfuscating shim, not an encryption system. Storage, locking and
//! durability are whatever the backing filesystem provides.
//!
//! # Usage
//!
//! ```ignore
//! use rotfs::{MountConfig, RotFs};
//!
//! let fs = RotFs::new(backing_root, MountConfig::default());
//! fuser::mount2(fs, mountpoint, &MountConfig::default().mount_options())?;
//! ```

pub mod config;
pub mod error;
pub mod filesystem;
pub mod inode;
pub mod paths;
pub mod table;

pub use config::MountConfig;
pub use error::{RotfsError, RotfsResult, io_error_to_errno};
pub use filesystem::RotFs;
pub use inode::{InodeEntry, InodeTable, ROOT_INODE};
pub use paths::PathMapper;
pub use table::SubstitutionTable;
