//! Storage descriptions and their validation.
//!
//! A raw storage mapping comes straight from the job configuration and may
//! carry any combination of keys. [`validate`] checks it against the rules of
//! its storage kind and produces a [`StorageConfig`] that holds exactly the
//! fields that kind uses.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Remote storage protocol/backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    S3,
    Scp,
    Ftp,
    Smb,
    Nfs,
    #[serde(rename = "webdav")]
    WebDav,
}

impl StorageKind {
    /// All kinds, in configuration order.
    pub const ALL: [StorageKind; 7] = [
        StorageKind::Local,
        StorageKind::S3,
        StorageKind::Scp,
        StorageKind::Ftp,
        StorageKind::Smb,
        StorageKind::Nfs,
        StorageKind::WebDav,
    ];

    /// Label used in job configuration files.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::S3 => "s3",
            Self::Scp => "scp",
            Self::Ftp => "ftp",
            Self::Smb => "smb",
            Self::Nfs => "nfs",
            Self::WebDav => "webdav",
        }
    }

    /// Directory name of this kind's fixed mount point, `None` for local storage.
    pub fn mount_dir_name(&self) -> Option<&'static str> {
        match self {
            Self::Local => None,
            Self::S3 => Some("s3"),
            Self::Scp => Some("sshfs"),
            Self::Ftp => Some("curlftpfs"),
            Self::Smb => Some("smbfs"),
            Self::Nfs => Some("nfs"),
            Self::WebDav => Some("davfs"),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        StorageKind::ALL
            .into_iter()
            .find(|kind| kind.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown storage type '{}'", s))
    }
}

/// Port as written in configuration: either a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPort {
    Number(u64),
    Text(String),
}

/// Storage mapping as it appears in a job configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStorageConfig {
    pub storage: String,
    pub backup_dir: Option<String>,
    pub host: Option<String>,
    pub port: Option<RawPort>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub path_to_key: Option<String>,
    pub extra_keys: Option<String>,
    pub share: Option<String>,
    pub bucket_name: Option<String>,
    pub s3fs_opts: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// How an SCP storage authenticates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScpAuth {
    /// Password fed to sshfs on stdin.
    Password(String),
    /// Identity file; a password, if also configured, is kept but unused.
    Key {
        path_to_key: PathBuf,
        password: Option<String>,
    },
}

/// Kind-specific fields of a validated storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Local,
    S3 {
        bucket_name: String,
        s3fs_opts: String,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
    },
    Scp {
        host: String,
        port: Option<u16>,
        user: String,
        auth: ScpAuth,
    },
    Ftp {
        host: String,
        port: Option<u16>,
        user: String,
        password: String,
    },
    Smb {
        host: String,
        port: Option<u16>,
        user: String,
        password: String,
        share: String,
    },
    Nfs {
        host: String,
        extra_keys: String,
    },
    WebDav {
        host: String,
        port: Option<u16>,
        user: String,
        password: String,
    },
}

/// A validated storage description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    /// Name of the job this storage belongs to.
    pub job: String,
    /// Remote path (local path for local storage).
    pub backup_dir: String,
    pub backend: Backend,
}

impl StorageConfig {
    pub fn kind(&self) -> StorageKind {
        match self.backend {
            Backend::Local => StorageKind::Local,
            Backend::S3 { .. } => StorageKind::S3,
            Backend::Scp { .. } => StorageKind::Scp,
            Backend::Ftp { .. } => StorageKind::Ftp,
            Backend::Smb { .. } => StorageKind::Smb,
            Backend::Nfs { .. } => StorageKind::Nfs,
            Backend::WebDav { .. } => StorageKind::WebDav,
        }
    }
}

/// Validates a raw storage mapping for `job` as a storage of kind `kind_label`.
///
/// Stops at the first missing required field.
pub fn validate(job: &str, kind_label: &str, raw: &RawStorageConfig) -> Result<StorageConfig> {
    let kind: StorageKind = kind_label.parse().map_err(|message| Error::Validation {
        job: job.to_string(),
        storage: kind_label.to_string(),
        message,
    })?;
    let f = Fields { job, kind, raw };

    let backup_dir = match kind {
        StorageKind::S3 => non_empty(&raw.backup_dir).unwrap_or_default(),
        _ => f.required("backup_dir", &raw.backup_dir)?,
    };

    // Struct fields are evaluated in order, so the first missing field wins.
    let backend = match kind {
        StorageKind::Local => Backend::Local,
        StorageKind::S3 => Backend::S3 {
            bucket_name: f.required("bucket_name", &raw.bucket_name)?,
            s3fs_opts: non_empty(&raw.s3fs_opts).unwrap_or_default(),
            access_key_id: non_empty(&raw.access_key_id),
            secret_access_key: non_empty(&raw.secret_access_key),
        },
        StorageKind::Nfs => Backend::Nfs {
            host: f.required("host", &raw.host)?,
            extra_keys: non_empty(&raw.extra_keys).unwrap_or_default(),
        },
        StorageKind::Scp => Backend::Scp {
            host: f.required("host", &raw.host)?,
            port: f.port()?,
            user: f.required("user", &raw.user)?,
            auth: f.scp_auth()?,
        },
        StorageKind::Ftp => Backend::Ftp {
            host: f.required("host", &raw.host)?,
            port: f.port()?,
            user: f.required("user", &raw.user)?,
            password: f.required("password", &raw.password)?,
        },
        StorageKind::Smb => Backend::Smb {
            host: f.required("host", &raw.host)?,
            port: f.port()?,
            user: f.required("user", &raw.user)?,
            password: f.required("password", &raw.password)?,
            share: f.required("share", &raw.share)?,
        },
        StorageKind::WebDav => Backend::WebDav {
            host: f.required("host", &raw.host)?,
            port: f.port()?,
            user: f.required("user", &raw.user)?,
            password: f.required("password", &raw.password)?,
        },
    };

    Ok(StorageConfig {
        job: job.to_string(),
        backup_dir,
        backend,
    })
}

/// Validates a raw mapping using its own `storage` key as the kind.
pub fn validate_raw(job: &str, raw: &RawStorageConfig) -> Result<StorageConfig> {
    validate(job, &raw.storage, raw)
}

struct Fields<'a> {
    job: &'a str,
    kind: StorageKind,
    raw: &'a RawStorageConfig,
}

impl Fields<'_> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::Validation {
            job: self.job.to_string(),
            storage: self.kind.to_string(),
            message: message.into(),
        }
    }

    fn required(&self, name: &str, value: &Option<String>) -> Result<String> {
        non_empty(value).ok_or_else(|| self.error(format!("field '{}' can't be empty", name)))
    }

    fn scp_auth(&self) -> Result<ScpAuth> {
        match (non_empty(&self.raw.password), non_empty(&self.raw.path_to_key)) {
            (None, None) => Err(self.error(
                "at least one of the fields 'path_to_key' or 'password' must be filled in",
            )),
            (Some(password), None) => Ok(ScpAuth::Password(password)),
            (password, Some(key)) => Ok(ScpAuth::Key {
                path_to_key: PathBuf::from(key),
                password,
            }),
        }
    }

    fn port(&self) -> Result<Option<u16>> {
        let parsed = match &self.raw.port {
            None => return Ok(None),
            Some(RawPort::Text(text)) if text.trim().is_empty() => return Ok(None),
            Some(RawPort::Number(n)) => u16::try_from(*n).ok(),
            Some(RawPort::Text(text)) => text.trim().parse::<u16>().ok(),
        };

        match parsed {
            Some(0) | None => Err(self.error("field 'port' must be a number between 1 and 65535")),
            Some(port) => Ok(Some(port)),
        }
    }
}

/// Blank values count as missing; anything else is kept verbatim.
fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.trim().is_empty())
}
