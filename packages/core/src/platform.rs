//! Host distribution detection.
//!
//! The mount plan depends on the packaging ecosystem of the host: package
//! names differ between Debian and RPM distributions, as does the command
//! used to ask whether a package is installed.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tracing::debug;

use crate::error::{Error, OsReleaseSnafu, Result};
use crate::executor::CommandSpec;

/// Packaging ecosystem of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    /// Debian, Ubuntu and derivatives.
    Deb,
    /// CentOS, RHEL, Fedora and derivatives.
    Rpm,
}

impl OsFamily {
    /// Determines the family from the contents of an os-release file.
    ///
    /// `ID` is consulted first, then every entry of `ID_LIKE`.
    pub fn from_os_release(content: &str) -> Result<Self> {
        let mut id = None;
        let mut id_like = None;
        let mut pretty_name = None;

        for line in content.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"').trim_matches('\'');
            match key {
                "ID" => id = Some(value.to_lowercase()),
                "ID_LIKE" => id_like = Some(value.to_lowercase()),
                "PRETTY_NAME" => pretty_name = Some(value.to_string()),
                _ => {}
            }
        }

        let candidates = id
            .iter()
            .map(String::as_str)
            .chain(id_like.iter().flat_map(|like| like.split_whitespace()));

        for candidate in candidates {
            match candidate {
                "debian" | "ubuntu" => return Ok(OsFamily::Deb),
                "centos" | "rhel" | "fedora" => return Ok(OsFamily::Rpm),
                _ => {}
            }
        }

        Err(Error::UnsupportedPlatform {
            dist: pretty_name.or(id).unwrap_or_else(|| "unknown".to_string()),
        })
    }

    /// Reads and classifies the os-release file at `path`.
    pub fn detect(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).context(OsReleaseSnafu { path })?;
        let family = Self::from_os_release(&content)?;
        debug!("Detected {:?} family from {}", family, path.display());
        Ok(family)
    }

    /// Command that exits zero when `package` is installed.
    pub fn package_check_command(&self, package: &str) -> CommandSpec {
        match self {
            OsFamily::Deb => CommandSpec::new("dpkg").args(["-s", package]),
            OsFamily::Rpm => CommandSpec::new("rpm").args(["-q", package]),
        }
    }

    /// Name of the NFS client package.
    pub fn nfs_package(&self) -> &'static str {
        match self {
            OsFamily::Deb => "nfs-common",
            OsFamily::Rpm => "nfs-utils",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_debian_family() {
        let ubuntu = "NAME=\"Ubuntu\"\nID=ubuntu\nID_LIKE=debian\n";
        assert_eq!(OsFamily::from_os_release(ubuntu).unwrap(), OsFamily::Deb);

        let mint = "ID=linuxmint\nID_LIKE=\"ubuntu debian\"\n";
        assert_eq!(OsFamily::from_os_release(mint).unwrap(), OsFamily::Deb);
    }

    #[test]
    fn test_rpm_family() {
        let centos = "ID=\"centos\"\nID_LIKE=\"rhel fedora\"\n";
        assert_eq!(OsFamily::from_os_release(centos).unwrap(), OsFamily::Rpm);

        let rocky = "ID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\n";
        assert_eq!(OsFamily::from_os_release(rocky).unwrap(), OsFamily::Rpm);
    }

    #[test]
    fn test_unsupported_distribution() {
        let arch = "NAME=\"Arch Linux\"\nPRETTY_NAME=\"Arch Linux\"\nID=arch\n";
        let err = OsFamily::from_os_release(arch).unwrap_err();
        assert!(matches!(err, Error::UnsupportedPlatform { ref dist } if dist == "Arch Linux"));
    }

    #[test]
    fn test_detect_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"ID=debian\n").unwrap();
        assert_eq!(OsFamily::detect(file.path()).unwrap(), OsFamily::Deb);

        let err = OsFamily::detect(Path::new("/nonexistent/os-release")).unwrap_err();
        assert!(matches!(err, Error::OsRelease { .. }));
    }

    #[test]
    fn test_package_check_command() {
        assert_eq!(
            OsFamily::Deb.package_check_command("sshfs").argv(),
            ["dpkg", "-s", "sshfs"]
        );
        assert_eq!(
            OsFamily::Rpm.package_check_command("fuse").argv(),
            ["rpm", "-q", "fuse"]
        );
    }
}
