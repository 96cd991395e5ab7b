//! Mount configuration for the overlay filesystem.

use fuser::MountOption;
use std::time::Duration;

/// How long the kernel may cache attributes and entries.
///
/// The backing directory is a plain local filesystem that can be modified
/// out-of-band, so the TTL is kept short.
pub const DEFAULT_ATTR_TTL: Duration = Duration::from_secs(1);

/// Configuration options for a mount.
#[derive(Debug, Clone)]
pub struct MountConfig {
    /// Time-to-live for attributes and entries handed to the kernel.
    pub attr_ttl: Duration,
    /// Filesystem name reported to the kernel (`FSName` mount option).
    pub fsname: String,
    /// Mount read-only.
    pub read_only: bool,
    /// Allow other users to access the mount (`allow_other`).
    pub allow_other: bool,
}

impl Default for MountConfig {
    fn default() -> Self {
        Self {
            attr_ttl: DEFAULT_ATTR_TTL,
            fsname: "rotfs".to_string(),
            read_only: false,
            allow_other: false,
        }
    }
}

impl MountConfig {
    /// Sets the attribute TTL.
    #[must_use]
    pub fn attr_ttl(mut self, ttl: Duration) -> Self {
        self.attr_ttl = ttl;
        self
    }

    /// Sets the reported filesystem name.
    #[must_use]
    pub fn fsname(mut self, fsname: impl Into<String>) -> Self {
        self.fsname = fsname.into();
        self
    }

    /// Mounts read-only.
    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Allows other users to access the mount.
    #[must_use]
    pub fn allow_other(mut self, allow_other: bool) -> Self {
        self.allow_other = allow_other;
        self
    }

    /// Builds the fuser mount options for this configuration.
    pub fn mount_options(&self) -> Vec<MountOption> {
        let mut options = vec![
            MountOption::FSName(self.fsname.clone()),
            MountOption::Subtype("rotfs".to_string()),
            MountOption::AutoUnmount,
            MountOption::DefaultPermissions,
        ];
        if self.read_only {
            options.push(MountOption::RO);
        } else {
            options.push(MountOption::RW);
        }
        if self.allow_other {
            options.push(MountOption::AllowOther);
        }
        options
    }
}
