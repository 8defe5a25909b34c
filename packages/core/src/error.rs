//! Unified error types for the backup-mount-core library.
//!
//! Uses SNAFU for context-rich error handling, especially useful when the same
//! underlying error type (like `std::io::Error`) appears in different contexts.

use snafu::{ResultExt, Snafu};
use std::path::PathBuf;
use std::time::Duration;

use crate::storage::StorageKind;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all core library operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    /// A storage description is missing a required field or carries a bad value.
    #[snafu(display("{message} (job '{job}', storage '{storage}')"))]
    Validation {
        job: String,
        storage: String,
        message: String,
    },

    /// The host distribution has no known package manager mapping.
    #[snafu(display("this distribution of Linux: '{dist}' is not supported"))]
    UnsupportedPlatform { dist: String },

    /// The os-release file could not be read.
    #[snafu(display("failed to read os-release at {}", path.display()))]
    OsRelease {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A package required by the mount plan is not installed.
    #[snafu(display("required package '{package}' not installed"))]
    PackageMissing { package: String },

    /// A pre-mount hook failed.
    #[snafu(display("impossible to perform pre-mount operation '{hook}' for storage '{storage}': {message}"))]
    HookExecution {
        storage: StorageKind,
        hook: &'static str,
        message: String,
    },

    /// The mount point already has something mounted on it.
    #[snafu(display("mount point {} is busy", mount_point.display()))]
    MountBusy { mount_point: PathBuf },

    /// The session already tracks a different mount.
    #[snafu(display("a mount is already active at {}", mount_point.display()))]
    SessionActive { mount_point: PathBuf },

    /// The mount table could not be read.
    #[snafu(display("failed to read mount table at {}", path.display()))]
    MountTable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Mount point creation failed.
    #[snafu(display("failed to create mount point at {}: {source}", path.display()))]
    MountPointCreation {
        path: PathBuf,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// A file or directory on a system path could not be accessed.
    #[snafu(display("failed to access {}: {source}", path.display()))]
    FileAccess {
        path: PathBuf,
        source: std::io::Error,
    },

    /// An escalated file operation exited non-zero.
    #[snafu(display("'{command}' failed with code {code}: {stderr}"))]
    FileCommand {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The mount command exited non-zero or wrote to stderr.
    #[snafu(display("mount command '{command}' failed with code {code}: {stderr}"))]
    MountCommand {
        command: String,
        code: i32,
        stderr: String,
    },

    /// The mounted directory could not be accessed after mounting.
    #[snafu(display("incorrect authentication data: cannot access {}", mount_point.display()))]
    PostMountCheck {
        mount_point: PathBuf,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },

    /// The unmount command exited non-zero or wrote to stderr.
    #[snafu(display("unmount command '{command}' failed with code {code}: {stderr}"))]
    UnmountCommand {
        command: String,
        code: i32,
        stderr: String,
    },

    /// Failed to execute a system command.
    #[snafu(display("failed to execute command '{command}'"))]
    CommandExecution {
        command: String,
        source: std::io::Error,
    },

    /// A system command ran past its deadline and was killed.
    #[snafu(display("command '{command}' timed out after {}s", timeout.as_secs()))]
    CommandTimeout { command: String, timeout: Duration },

    /// Configuration file could not be read.
    #[snafu(display("failed to read configuration at {}", path.display()))]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[snafu(display("failed to parse configuration at {}", path.display()))]
    ConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// Any failure during a mount operation, tagged with the job and storage.
    #[snafu(display("job '{job}', storage '{storage}': {source}"))]
    Job {
        job: String,
        storage: StorageKind,
        #[snafu(source(from(Error, Box::new)))]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns the innermost error, skipping the job/storage tag.
    pub fn cause(&self) -> &Error {
        match self {
            Error::Job { source, .. } => source.cause(),
            other => other,
        }
    }
}

/// Extension trait for adding context to io::Error results.
pub trait IoResultExt<T> {
    /// Add context for command execution errors.
    fn command_context(self, command: impl Into<String>) -> Result<T>;

    /// Add context for file access errors on system paths.
    fn file_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for mount table read errors.
    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T>;

    /// Add context for configuration read errors.
    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::result::Result<T, std::io::Error> {
    fn command_context(self, command: impl Into<String>) -> Result<T> {
        self.context(CommandExecutionSnafu {
            command: command.into(),
        })
    }

    fn file_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(FileAccessSnafu { path: path.into() })
    }

    fn mount_table_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(MountTableSnafu { path: path.into() })
    }

    fn config_read_context(self, path: impl Into<PathBuf>) -> Result<T> {
        self.context(ConfigReadSnafu { path: path.into() })
    }
}
