//! Mount plan construction.
//!
//! Turns a validated [`StorageConfig`] into the packages that must be
//! installed, the mount command to run and the pre-mount hooks to execute
//! first. Nothing here touches the system.

use std::path::{Path, PathBuf};

use crate::executor::CommandSpec;
use crate::hooks::PreMountHook;
use crate::platform::OsFamily;
use crate::storage::{Backend, ScpAuth, StorageConfig, StorageKind};

/// Package every FUSE-backed plan depends on.
pub const FUSE_PACKAGE: &str = "fuse";

pub const DEFAULT_SCP_PORT: u16 = 22;
pub const DEFAULT_SMB_PORT: u16 = 445;
pub const DEFAULT_WEBDAV_PORT: u16 = 443;

/// Everything needed to mount one storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPlan {
    pub kind: StorageKind,
    /// Packages to verify, in order. Always ends with [`FUSE_PACKAGE`].
    pub packages: Vec<String>,
    pub os_family: OsFamily,
    pub mount_command: CommandSpec,
    pub mount_point: PathBuf,
    /// Hooks to run before the mount command.
    pub hooks: Vec<PreMountHook>,
}

impl MountPlan {
    /// Command that verifies `package` is installed.
    pub fn package_check(&self, package: &str) -> CommandSpec {
        self.os_family.package_check_command(package)
    }
}

/// Builds the mount plan for `config`.
///
/// Returns `None` for local storage, which needs no mount.
pub fn build_plan(config: &StorageConfig, os_family: OsFamily, mount_root: &Path) -> Option<MountPlan> {
    let kind = config.kind();
    let mount_point = mount_root.join(kind.mount_dir_name()?);
    let mp = mount_point.to_string_lossy().into_owned();
    let backup_dir = config.backup_dir.as_str();
    let mut hooks = Vec::new();

    let (mut packages, mount_command) = match &config.backend {
        Backend::Local => return None,
        Backend::Scp {
            host,
            port,
            user,
            auth,
        } => {
            let port = port.unwrap_or(DEFAULT_SCP_PORT).to_string();
            let remote = format!("{}@{}:{}", user, host, backup_dir);
            let command = match auth {
                ScpAuth::Key { path_to_key, .. } => CommandSpec::new("sshfs").args([
                    "-o".to_string(),
                    format!(
                        "StrictHostKeyChecking=no,IdentityFile={}",
                        path_to_key.display()
                    ),
                    "-p".to_string(),
                    port,
                    remote,
                    mp,
                ]),
                ScpAuth::Password(password) => CommandSpec::new("sshfs")
                    .args([
                        "-o",
                        "StrictHostKeyChecking=no,password_stdin",
                        "-p",
                        port.as_str(),
                        remote.as_str(),
                        mp.as_str(),
                    ])
                    .stdin(format!("{}\n", password))
                    .secret(password.as_str()),
            };
            (vec!["openssh-client", "sshfs", "sshpass"], command)
        }
        Backend::Ftp {
            host,
            port,
            user,
            password,
        } => {
            let address = match port {
                Some(port) => format!("{}:{}", host, port),
                None => host.clone(),
            };
            // Userinfo must not carry raw '@', ':' or '/'.
            let password_part = urlencoding::encode(password);
            let command = CommandSpec::new("curlftpfs")
                .args([
                    "-o".to_string(),
                    "nonempty".to_string(),
                    format!(
                        "ftp://{}:{}@{}",
                        urlencoding::encode(user),
                        password_part,
                        address
                    ),
                    mp,
                ])
                .secret(password_part.as_ref())
                .secret(password.as_str());
            (vec!["curlftpfs"], command)
        }
        Backend::Smb {
            host,
            port,
            user,
            password,
            share,
        } => {
            let command = CommandSpec::new("mount")
                .args([
                    "-t".to_string(),
                    "cifs".to_string(),
                    "-o".to_string(),
                    format!(
                        "port={},noperm,username={},password={}",
                        port.unwrap_or(DEFAULT_SMB_PORT),
                        user,
                        password
                    ),
                    format!("//{}/{}", host, share),
                    mp,
                ])
                .secret(password.as_str());
            (vec!["cifs-utils"], command)
        }
        Backend::Nfs { host, extra_keys } => {
            let command = CommandSpec::new("mount")
                .args(["-t".to_string(), "nfs".to_string(), format!("{}:{}", host, backup_dir), mp])
                .args(extra_keys.split_whitespace());
            (vec![os_family.nfs_package()], command)
        }
        Backend::WebDav {
            host,
            port,
            user,
            password,
        } => {
            let address = format!("{}:{}", host, port.unwrap_or(DEFAULT_WEBDAV_PORT));
            hooks.push(PreMountHook::CheckSecrets {
                auth_line: format!("{} {} {}\n", address, user, password),
            });
            let command = CommandSpec::new("mount").args(["-t".to_string(), "davfs".to_string(), address, mp]);
            (vec!["davfs2"], command)
        }
        Backend::S3 {
            bucket_name,
            s3fs_opts,
            access_key_id,
            secret_access_key,
        } => {
            if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
                hooks.push(PreMountHook::CheckS3fsSecrets {
                    auth_line: format!("{}:{}:{}\n", bucket_name, key_id, secret),
                });
            }
            let command = CommandSpec::new("s3fs")
                .args([bucket_name.as_str(), mp.as_str()])
                .args(s3fs_opts.split_whitespace());
            (Vec::new(), command)
        }
    };

    packages.push(FUSE_PACKAGE);

    Some(MountPlan {
        kind,
        packages: packages.into_iter().map(str::to_string).collect(),
        os_family,
        mount_command,
        mount_point,
        hooks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{RawStorageConfig, validate_raw};

    fn config(json: &str) -> StorageConfig {
        let raw: RawStorageConfig = serde_json::from_str(json).unwrap();
        validate_raw("job1", &raw).unwrap()
    }

    fn plan(json: &str, os: OsFamily) -> MountPlan {
        build_plan(&config(json), os, Path::new("/mnt")).unwrap()
    }

    #[test]
    fn test_local_has_no_plan() {
        let local = config(r#"{"storage": "local", "backup_dir": "/var/backup"}"#);
        assert!(build_plan(&local, OsFamily::Deb, Path::new("/mnt")).is_none());
    }

    #[test]
    fn test_nfs_plan() {
        let json = r#"{"storage": "nfs", "backup_dir": "/data", "host": "10.0.0.5"}"#;

        let deb = plan(json, OsFamily::Deb);
        assert_eq!(deb.packages, ["nfs-common", "fuse"]);
        assert_eq!(
            deb.mount_command.argv(),
            ["mount", "-t", "nfs", "10.0.0.5:/data", "/mnt/nfs"]
        );
        assert_eq!(deb.mount_command.to_string(), "mount -t nfs 10.0.0.5:/data /mnt/nfs");
        assert_eq!(deb.mount_point, PathBuf::from("/mnt/nfs"));
        assert!(deb.hooks.is_empty());

        let rpm = plan(json, OsFamily::Rpm);
        assert_eq!(rpm.packages, ["nfs-utils", "fuse"]);
        assert_eq!(rpm.package_check("nfs-utils").argv(), ["rpm", "-q", "nfs-utils"]);
    }

    #[test]
    fn test_nfs_extra_keys_appended() {
        let plan = plan(
            r#"{"storage": "nfs", "backup_dir": "/data", "host": "h", "extra_keys": "-o vers=4,soft"}"#,
            OsFamily::Deb,
        );
        assert_eq!(
            plan.mount_command.argv(),
            ["mount", "-t", "nfs", "h:/data", "/mnt/nfs", "-o", "vers=4,soft"]
        );
    }

    #[test]
    fn test_s3_plan_without_keys() {
        let plan = plan(r#"{"storage": "s3", "bucket_name": "backups"}"#, OsFamily::Deb);
        assert_eq!(plan.packages, ["fuse"]);
        assert_eq!(plan.mount_command.argv(), ["s3fs", "backups", "/mnt/s3"]);
        assert_eq!(plan.mount_point, PathBuf::from("/mnt/s3"));
        assert!(plan.hooks.is_empty());
    }

    #[test]
    fn test_s3_plan_with_keys() {
        let plan = plan(
            r#"{"storage": "s3", "bucket_name": "b", "access_key_id": "AK", "secret_access_key": "SK", "s3fs_opts": "-o url=https://s3.example.com"}"#,
            OsFamily::Deb,
        );
        assert_eq!(
            plan.mount_command.argv(),
            ["s3fs", "b", "/mnt/s3", "-o", "url=https://s3.example.com"]
        );
        assert_eq!(
            plan.hooks,
            [PreMountHook::CheckS3fsSecrets {
                auth_line: "b:AK:SK\n".to_string()
            }]
        );
    }

    #[test]
    fn test_s3_single_key_registers_no_hook() {
        let plan = plan(
            r#"{"storage": "s3", "bucket_name": "b", "access_key_id": "AK"}"#,
            OsFamily::Deb,
        );
        assert!(plan.hooks.is_empty());
    }

    #[test]
    fn test_scp_password_plan() {
        let plan = plan(
            r#"{"storage": "scp", "backup_dir": "/srv", "host": "h", "user": "u", "password": "pw"}"#,
            OsFamily::Deb,
        );
        assert_eq!(plan.packages, ["openssh-client", "sshfs", "sshpass", "fuse"]);
        assert_eq!(
            plan.mount_command.argv(),
            [
                "sshfs",
                "-o",
                "StrictHostKeyChecking=no,password_stdin",
                "-p",
                "22",
                "u@h:/srv",
                "/mnt/sshfs"
            ]
        );
        assert_eq!(plan.mount_command.stdin_payload(), Some("pw\n"));
    }

    #[test]
    fn test_scp_key_plan() {
        let plan = plan(
            r#"{"storage": "scp", "backup_dir": "/srv", "host": "h", "user": "u", "port": 2222, "path_to_key": "/root/.ssh/id_ed25519", "password": "pw"}"#,
            OsFamily::Rpm,
        );
        assert_eq!(
            plan.mount_command.argv(),
            [
                "sshfs",
                "-o",
                "StrictHostKeyChecking=no,IdentityFile=/root/.ssh/id_ed25519",
                "-p",
                "2222",
                "u@h:/srv",
                "/mnt/sshfs"
            ]
        );
        assert_eq!(plan.mount_command.stdin_payload(), None);
    }

    #[test]
    fn test_ftp_plan() {
        let plan = plan(
            r#"{"storage": "ftp", "backup_dir": "/b", "host": "ftp.example.com", "user": "u", "password": "pw"}"#,
            OsFamily::Deb,
        );
        assert_eq!(plan.packages, ["curlftpfs", "fuse"]);
        assert_eq!(
            plan.mount_command.argv(),
            ["curlftpfs", "-o", "nonempty", "ftp://u:pw@ftp.example.com", "/mnt/curlftpfs"]
        );
        assert!(!plan.mount_command.to_string().contains("pw@"));
    }

    #[test]
    fn test_ftp_credentials_are_percent_encoded() {
        let plan = plan(
            r#"{"storage": "ftp", "backup_dir": "/b", "host": "f", "user": "me@corp", "password": "p@ss:w/rd"}"#,
            OsFamily::Deb,
        );
        assert_eq!(
            plan.mount_command.argv()[3],
            "ftp://me%40corp:p%40ss%3Aw%2Frd@f"
        );
        assert!(!plan.mount_command.to_string().contains("p%40ss"));
    }

    #[test]
    fn test_smb_plan() {
        let plan = plan(
            r#"{"storage": "smb", "backup_dir": "/b", "host": "nas", "user": "u", "password": "pw", "share": "backups"}"#,
            OsFamily::Deb,
        );
        assert_eq!(plan.packages, ["cifs-utils", "fuse"]);
        assert_eq!(
            plan.mount_command.argv(),
            [
                "mount",
                "-t",
                "cifs",
                "-o",
                "port=445,noperm,username=u,password=pw",
                "//nas/backups",
                "/mnt/smbfs"
            ]
        );
    }

    #[test]
    fn test_webdav_plan() {
        let plan = plan(
            r#"{"storage": "webdav", "backup_dir": "/b", "host": "dav.example.com", "user": "u", "password": "pw"}"#,
            OsFamily::Deb,
        );
        assert_eq!(plan.packages, ["davfs2", "fuse"]);
        assert_eq!(
            plan.mount_command.argv(),
            ["mount", "-t", "davfs", "dav.example.com:443", "/mnt/davfs"]
        );
        assert_eq!(
            plan.hooks,
            [PreMountHook::CheckSecrets {
                auth_line: "dav.example.com:443 u pw\n".to_string()
            }]
        );
    }

    #[test]
    fn test_explicit_ports_are_kept() {
        let smb = plan(
            r#"{"storage": "smb", "backup_dir": "/b", "host": "nas", "user": "u", "password": "pw", "share": "s", "port": "1445"}"#,
            OsFamily::Deb,
        );
        assert!(smb.mount_command.argv()[4].starts_with("port=1445,"));

        let dav = plan(
            r#"{"storage": "webdav", "backup_dir": "/b", "host": "dav", "user": "u", "password": "pw", "port": 8443}"#,
            OsFamily::Deb,
        );
        assert_eq!(dav.mount_command.argv()[3], "dav:8443");

        let ftp = plan(
            r#"{"storage": "ftp", "backup_dir": "/b", "host": "f", "user": "u", "password": "pw", "port": 2121}"#,
            OsFamily::Deb,
        );
        assert_eq!(ftp.mount_command.argv()[3], "ftp://u:pw@f:2121");
    }

    #[test]
    fn test_plan_is_deterministic() {
        let json = r#"{"storage": "smb", "backup_dir": "/b", "host": "nas", "user": "u", "password": "pw", "share": "s"}"#;
        assert_eq!(plan(json, OsFamily::Rpm), plan(json, OsFamily::Rpm));
    }

    #[test]
    fn test_every_remote_plan_ends_with_fuse() {
        let configs = [
            r#"{"storage": "s3", "bucket_name": "b"}"#,
            r#"{"storage": "nfs", "backup_dir": "/d", "host": "h"}"#,
            r#"{"storage": "ftp", "backup_dir": "/d", "host": "h", "user": "u", "password": "p"}"#,
        ];
        for json in configs {
            assert_eq!(plan(json, OsFamily::Deb).packages.last().map(String::as_str), Some("fuse"));
        }
    }
}
