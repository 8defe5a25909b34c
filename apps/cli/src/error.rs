//! CLI error type.

use snafu::Snafu;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(context(false), display("{source}"))]
    Core { source: backup_mount_core::Error },

    #[snafu(display("job '{job}' not found in configuration"))]
    JobNotFound { job: String },

    #[snafu(display("job '{job}' has no '{storage}' storage"))]
    StorageNotFound { job: String, storage: String },

    #[snafu(display("failed to serialize output"))]
    Output { source: serde_json::Error },

    #[snafu(display("failed to start '{command}'"))]
    Spawn {
        command: String,
        source: std::io::Error,
    },
}
