//! Mount operations module.
//!
//! This module owns the mount/unmount lifecycle of a remote storage: package
//! verification, pre-mount hooks, busy mount point detection, the mount
//! command itself and the post-mount sanity check. The currently active mount
//! is recorded in a caller-owned [`MountSession`].

use std::fs;
use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::error::{
    Error, IoResultExt, JobSnafu, MountBusySnafu, MountPointCreationSnafu, PostMountCheckSnafu,
    Result,
};
use crate::executor::{CommandOutput, CommandRunner, CommandSpec, PrivilegeEscalation};
use crate::files::SystemFiles;
use crate::hooks;
use crate::plan::{MountPlan, build_plan};
use crate::platform::OsFamily;
use crate::settings::MountSettings;
use crate::storage::{StorageConfig, StorageKind};

/// A mount that succeeded and has not been unmounted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMount {
    pub job: String,
    pub kind: StorageKind,
    pub mount_point: PathBuf,
}

/// Record of the currently active mount, if any.
///
/// Owned by the caller and passed to [`MountManager::mount`] and
/// [`MountManager::unmount`]. A session holds at most one mount.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountSession {
    active: Option<ActiveMount>,
}

impl MountSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session for a mount made elsewhere, e.g. by a previous run.
    pub fn adopt(job: impl Into<String>, kind: StorageKind, mount_point: impl Into<PathBuf>) -> Self {
        Self {
            active: Some(ActiveMount {
                job: job.into(),
                kind,
                mount_point: mount_point.into(),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&ActiveMount> {
        self.active.as_ref()
    }

    pub fn mount_point(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.mount_point.as_path())
    }
}

/// Result of a successful [`MountManager::mount`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountOutcome {
    /// Local storage; nothing was mounted.
    Local,
    /// The storage is now mounted here.
    Mounted { mount_point: PathBuf },
}

/// Drives mount and unmount through a [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct MountManager<R> {
    runner: R,
    settings: MountSettings,
}

impl<R: CommandRunner> MountManager<R> {
    pub fn new(runner: R, settings: MountSettings) -> Self {
        Self { runner, settings }
    }

    pub fn settings(&self) -> &MountSettings {
        &self.settings
    }

    /// Detects the host family and builds the plan for `config`.
    ///
    /// An unsupported host is an error for every kind, local included.
    /// Returns `None` for local storage.
    pub fn plan(&self, config: &StorageConfig) -> Result<Option<MountPlan>> {
        let os_family = OsFamily::detect(&self.settings.os_release_path)?;
        Ok(build_plan(config, os_family, &self.settings.mount_root))
    }

    fn files(&self) -> SystemFiles<'_, R> {
        SystemFiles::new(&self.runner, self.settings.escalation)
    }

    /// Mounts the storage described by `config` and records it in `session`.
    ///
    /// On failure the session is left untouched.
    pub fn mount(&self, session: &mut MountSession, config: &StorageConfig) -> Result<MountOutcome> {
        self.try_mount(session, config).context(JobSnafu {
            job: config.job.as_str(),
            storage: config.kind(),
        })
    }

    fn try_mount(&self, session: &mut MountSession, config: &StorageConfig) -> Result<MountOutcome> {
        let Some(plan) = self.plan(config)? else {
            debug!("Storage of job '{}' is local, nothing to mount", config.job);
            return Ok(MountOutcome::Local);
        };

        if let Some(active) = session.active() {
            return Err(Error::SessionActive {
                mount_point: active.mount_point.clone(),
            });
        }

        if self.settings.escalation == PrivilegeEscalation::None && !nix::unistd::geteuid().is_root() {
            warn!("Not running as root; mounting {} will likely fail", plan.kind);
        }

        let files = self.files();
        self.check_packages(&plan)?;
        hooks::run_hooks(&plan.hooks, plan.kind, &self.settings, &files)?;

        if is_mounted(&self.settings.mount_table_path, &plan.mount_point)? {
            return MountBusySnafu {
                mount_point: plan.mount_point.as_path(),
            }
            .fail();
        }

        create_mount_point(&files, &plan.mount_point)?;

        info!("Mounting {} storage at {}", plan.kind, plan.mount_point.display());
        let output = self.runner.run(&plan.mount_command)?;
        if self.failed(&output, &plan.mount_command) {
            return Err(Error::MountCommand {
                command: plan.mount_command.to_string(),
                code: output.code,
                stderr: output.stderr,
            });
        }

        if plan.kind == StorageKind::S3 {
            files.list_dir(&plan.mount_point).context(PostMountCheckSnafu {
                mount_point: plan.mount_point.as_path(),
            })?;
        }

        session.active = Some(ActiveMount {
            job: config.job.clone(),
            kind: plan.kind,
            mount_point: plan.mount_point.clone(),
        });
        info!("Mounted {} storage at {}", plan.kind, plan.mount_point.display());

        Ok(MountOutcome::Mounted {
            mount_point: plan.mount_point,
        })
    }

    /// Force-unmounts the session's mount point and removes the directory.
    ///
    /// Does nothing when the session is idle.
    pub fn unmount(&self, session: &mut MountSession) -> Result<()> {
        let Some(active) = session.active.as_ref() else {
            debug!("No active mount, nothing to unmount");
            return Ok(());
        };

        self.try_unmount(&active.mount_point).context(JobSnafu {
            job: active.job.as_str(),
            storage: active.kind,
        })?;

        session.active = None;
        Ok(())
    }

    fn try_unmount(&self, mount_point: &Path) -> Result<()> {
        let command = CommandSpec::new("fusermount")
            .arg("-uz")
            .arg(mount_point.to_string_lossy());

        info!("Unmounting {}", mount_point.display());
        let output = self.runner.run(&command)?;
        if self.failed(&output, &command) {
            return Err(Error::UnmountCommand {
                command: command.to_string(),
                code: output.code,
                stderr: output.stderr,
            });
        }

        remove_mount_point(&self.files(), mount_point);
        Ok(())
    }

    fn check_packages(&self, plan: &MountPlan) -> Result<()> {
        for package in &plan.packages {
            let output = self.runner.run(&plan.package_check(package))?;
            if !output.success() {
                return Err(Error::PackageMissing {
                    package: package.clone(),
                });
            }
            debug!("Package '{}' is installed", package);
        }
        Ok(())
    }

    /// Exit code is always decisive; stderr only when `strict_stderr` is set.
    fn failed(&self, output: &CommandOutput, command: &CommandSpec) -> bool {
        if !output.success() {
            return true;
        }
        if output.stderr.is_empty() {
            return false;
        }
        if self.settings.strict_stderr {
            return true;
        }
        warn!("'{}' succeeded with stderr output: {}", command, output.stderr);
        false
    }
}

/// Creates a mount point directory if it doesn't exist.
fn create_mount_point<R: CommandRunner>(files: &SystemFiles<'_, R>, path: &Path) -> Result<()> {
    if !path.exists() {
        files
            .create_dir_all(path)
            .context(MountPointCreationSnafu { path })?;
    }
    Ok(())
}

/// Removes an unmounted, empty mount point directory.
fn remove_mount_point<R: CommandRunner>(files: &SystemFiles<'_, R>, path: &Path) {
    match files.remove_dir(path) {
        Ok(()) => debug!("Removed mount point {}", path.display()),
        Err(Error::FileAccess { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove mount point {}: {}", path.display(), e),
    }
}

/// Checks whether anything is mounted exactly at `mount_point`.
pub fn is_mounted(mount_table: &Path, mount_point: &Path) -> Result<bool> {
    let table = fs::read_to_string(mount_table).mount_table_context(mount_table)?;
    Ok(mount_points(&table).any(|mp| Path::new(&mp) == mount_point))
}

/// Mount points listed in a `/proc/mounts`-style table.
fn mount_points(table: &str) -> impl Iterator<Item = String> + '_ {
    table
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(unescape_mount_field)
}

/// Decodes the octal escapes (`\040` for space) used in mount tables.
fn unescape_mount_field(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\' && index + 3 < bytes.len() {
            let digits = &bytes[index + 1..index + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let code = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(byte) = u8::try_from(code) {
                    output.push(byte);
                    index += 4;
                    continue;
                }
            }
        }
        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}
