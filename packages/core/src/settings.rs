//! Environment settings for mount operations.
//!
//! Every path the mount engine touches on the host lives here so that tests
//! and unusual installations can point it elsewhere. The defaults are the
//! standard system locations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::executor::PrivilegeEscalation;
use crate::storage::StorageKind;

/// Default root under which each storage kind gets its fixed mount point.
pub const DEFAULT_MOUNT_ROOT: &str = "/mnt";

/// Default os-release location.
pub const DEFAULT_OS_RELEASE_PATH: &str = "/etc/os-release";

/// Default mount table location.
pub const DEFAULT_MOUNT_TABLE_PATH: &str = "/proc/mounts";

/// davfs2 secrets file. Must be provided by the davfs2 package.
pub const DEFAULT_DAVFS_SECRETS_PATH: &str = "/etc/davfs2/secrets";

/// s3fs credentials file. Created on demand.
pub const DEFAULT_S3FS_PASSWD_PATH: &str = "/etc/passwd-s3fs";

/// Default timeout for each external command (seconds).
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Settings consumed by [`crate::mount::MountManager`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MountSettings {
    pub mount_root: PathBuf,
    pub os_release_path: PathBuf,
    pub mount_table_path: PathBuf,
    pub davfs_secrets_path: PathBuf,
    pub s3fs_passwd_path: PathBuf,
    /// Per-command deadline. `0` disables the timeout.
    pub command_timeout_secs: u64,
    /// Treat any stderr output of mount/unmount commands as failure, even on exit code 0.
    pub strict_stderr: bool,
    pub escalation: PrivilegeEscalation,
}

impl Default for MountSettings {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            os_release_path: PathBuf::from(DEFAULT_OS_RELEASE_PATH),
            mount_table_path: PathBuf::from(DEFAULT_MOUNT_TABLE_PATH),
            davfs_secrets_path: PathBuf::from(DEFAULT_DAVFS_SECRETS_PATH),
            s3fs_passwd_path: PathBuf::from(DEFAULT_S3FS_PASSWD_PATH),
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            strict_stderr: true,
            escalation: PrivilegeEscalation::None,
        }
    }
}

impl MountSettings {
    /// Returns the fixed mount point of `kind`, `None` for local storage.
    pub fn mount_point(&self, kind: StorageKind) -> Option<PathBuf> {
        kind.mount_dir_name().map(|name| self.mount_root.join(name))
    }

    /// Returns the per-command timeout, if enabled.
    pub fn command_timeout(&self) -> Option<Duration> {
        (self.command_timeout_secs > 0).then(|| Duration::from_secs(self.command_timeout_secs))
    }

    /// Returns settings with every host path re-rooted under `root`.
    ///
    /// Useful for dry runs and tests.
    pub fn rooted_at(root: &Path) -> Self {
        let defaults = Self::default();
        let reroot = |p: &Path| root.join(p.strip_prefix("/").unwrap_or(p));
        Self {
            mount_root: reroot(&defaults.mount_root),
            os_release_path: reroot(&defaults.os_release_path),
            mount_table_path: reroot(&defaults.mount_table_path),
            davfs_secrets_path: reroot(&defaults.davfs_secrets_path),
            s3fs_passwd_path: reroot(&defaults.s3fs_passwd_path),
            ..defaults
        }
    }
}
