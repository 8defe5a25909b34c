//! backup-mount-core: Core library for mounting remote backup storages.
//!
//! This library validates storage descriptions, builds mount plans for the
//! system FUSE/mount helpers, writes the credentials those helpers need and
//! drives the mount/unmount lifecycle.
//!
//! # Modules
//!
//! - [`storage`]: Storage kinds, raw configuration and validation
//! - [`platform`]: Host distribution (package ecosystem) detection
//! - [`plan`]: Mount plan construction
//! - [`hooks`]: Pre-mount credential hooks
//! - [`mount`]: Mount/unmount lifecycle and mount sessions
//! - [`executor`]: External command execution
//! - [`files`]: System file operations, escalated when configured
//! - [`settings`]: Host paths and execution settings
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```no_run
//! use backup_mount_core::{ExecutionContext, MountManager, MountSession, MountSettings};
//! use backup_mount_core::storage::{self, RawStorageConfig};
//!
//! let raw: RawStorageConfig = serde_json::from_str(
//!     r#"{"storage": "nfs", "backup_dir": "/data", "host": "10.0.0.5"}"#,
//! )
//! .unwrap();
//! let config = storage::validate("nightly", &raw.storage, &raw).unwrap();
//!
//! let settings = MountSettings::default();
//! let manager = MountManager::new(ExecutionContext::from_settings(&settings), settings);
//! let mut session = MountSession::new();
//!
//! // This would mount 10.0.0.5:/data on /mnt/nfs (requires root):
//! manager.mount(&mut session, &config).unwrap();
//! // ... write backups ...
//! manager.unmount(&mut session).unwrap();
//! ```

pub mod error;
pub mod executor;
pub mod files;
pub mod hooks;
pub mod mount;
pub mod plan;
pub mod platform;
pub mod settings;
pub mod storage;

// Re-export commonly used types
pub use error::{Error, Result};
pub use executor::{CommandRunner, CommandSpec, ExecutionContext};
pub use mount::{MountManager, MountOutcome, MountSession};
pub use plan::MountPlan;
pub use platform::OsFamily;
pub use settings::MountSettings;
pub use storage::{RawStorageConfig, StorageConfig, StorageKind};
