//! Job file loading.
//!
//! A job file is JSON: optional mount settings plus a list of jobs, each with
//! the raw storage mappings it backs up to.
//!
//! ```json
//! {
//!   "settings": { "command_timeout_secs": 120 },
//!   "jobs": [
//!     {
//!       "job": "nightly",
//!       "storages": [
//!         { "storage": "local", "backup_dir": "/var/backups" },
//!         { "storage": "nfs", "backup_dir": "/data", "host": "10.0.0.5" }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::fs;
use std::path::Path;

use backup_mount_core::error::{ConfigParseSnafu, IoResultExt};
use backup_mount_core::storage::{self, RawStorageConfig, StorageConfig, StorageKind};
use backup_mount_core::MountSettings;
use serde::Deserialize;
use snafu::ResultExt;

#[derive(Debug, Clone, Deserialize)]
pub struct JobFile {
    #[serde(default)]
    pub settings: MountSettings,
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    pub job: String,
    #[serde(default)]
    pub storages: Vec<RawStorageConfig>,
}

impl JobFile {
    pub fn load(path: &Path) -> backup_mount_core::Result<Self> {
        let content = fs::read_to_string(path).config_read_context(path)?;
        serde_json::from_str(&content).context(ConfigParseSnafu { path })
    }

    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|job| job.job == name)
    }
}

impl JobConfig {
    /// Validates every storage of the job, stopping at the first error.
    pub fn validated(&self) -> backup_mount_core::Result<Vec<StorageConfig>> {
        self.storages
            .iter()
            .map(|raw| storage::validate_raw(&self.job, raw))
            .collect()
    }

    /// Validates the first storage of the given kind.
    pub fn storage(&self, kind: StorageKind) -> Option<backup_mount_core::Result<StorageConfig>> {
        self.storages
            .iter()
            .find(|raw| raw.storage.parse::<StorageKind>().ok() == Some(kind))
            .map(|raw| storage::validate(&self.job, &raw.storage, raw))
    }
}
