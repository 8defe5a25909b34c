//! Pre-mount hooks.
//!
//! Some mount helpers read credentials from a system file instead of the
//! command line. The hooks here write those credentials before the mount
//! command runs. Both are idempotent: an auth line that is already present is
//! not written again.

use std::fmt;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::executor::CommandRunner;
use crate::files::SystemFiles;
use crate::settings::MountSettings;
use crate::storage::StorageKind;

/// A preparation step that must succeed before mounting.
#[derive(Clone, PartialEq, Eq)]
pub enum PreMountHook {
    /// Append a `host:port user password` line to the davfs2 secrets file.
    CheckSecrets { auth_line: String },
    /// Append a `bucket:access_key:secret_key` line to the s3fs passwd file.
    CheckS3fsSecrets { auth_line: String },
}

impl PreMountHook {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CheckSecrets { .. } => "check_secrets",
            Self::CheckS3fsSecrets { .. } => "check_s3fs_secrets",
        }
    }
}

impl fmt::Debug for PreMountHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreMountHook")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Runs `hooks` in order, stopping at the first failure.
pub fn run_hooks<R: CommandRunner>(
    hooks: &[PreMountHook],
    storage: StorageKind,
    settings: &MountSettings,
    files: &SystemFiles<'_, R>,
) -> Result<()> {
    for hook in hooks {
        debug!("Running pre-mount hook '{}' for {}", hook.name(), storage);

        let outcome = match hook {
            PreMountHook::CheckSecrets { auth_line } => {
                check_secrets(files, &settings.davfs_secrets_path, auth_line)
            }
            PreMountHook::CheckS3fsSecrets { auth_line } => {
                check_s3fs_secrets(files, &settings.s3fs_passwd_path, auth_line)
            }
        };

        outcome.map_err(|message| Error::HookExecution {
            storage,
            hook: hook.name(),
            message,
        })?;
    }
    Ok(())
}

/// Records WebDAV credentials in the davfs2 secrets file.
///
/// The file must already exist; davfs2 ships it with restrictive permissions.
fn check_secrets<R: CommandRunner>(
    files: &SystemFiles<'_, R>,
    path: &Path,
    auth_line: &str,
) -> std::result::Result<(), String> {
    let exists = files.is_file(path).map_err(|e| e.to_string())?;
    if !exists {
        return Err(format!(
            "can't record the authentication information for 'webdav' resource: {} is not found",
            path.display()
        ));
    }

    let written = files.append_line_once(path, auth_line).map_err(|e| {
        format!(
            "can't write authentication information for 'webdav' resource: {}",
            e
        )
    })?;
    log_append(path, written);
    Ok(())
}

/// Records S3 credentials in the s3fs passwd file, creating it if needed.
fn check_s3fs_secrets<R: CommandRunner>(
    files: &SystemFiles<'_, R>,
    path: &Path,
    auth_line: &str,
) -> std::result::Result<(), String> {
    let written = files
        .create_private(path)
        .and_then(|()| files.append_line_once(path, auth_line))
        .map_err(|e| {
            format!(
                "can't write authentication information for 's3fs' resource: {}",
                e
            )
        })?;
    log_append(path, written);

    // s3fs refuses passwd files readable by others; older files may be.
    if let Err(e) = files.restrict_to_owner(path) {
        warn!("Failed to restrict permissions of {}: {}", path.display(), e);
    }
    Ok(())
}

fn log_append(path: &Path, written: bool) {
    if written {
        info!("Recorded authentication line in {}", path.display());
    } else {
        debug!("Auth line already present in {}", path.display());
    }
}
