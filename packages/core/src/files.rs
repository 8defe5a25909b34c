//! File operations on system paths.
//!
//! Mount points live under `/mnt` and credential files under `/etc`, so an
//! unprivileged caller cannot touch them directly. When privilege escalation
//! is configured, every operation here is performed by a small coreutils
//! command sent through the [`CommandRunner`], which applies the escalation.
//! Otherwise the filesystem is used directly.

use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;

use crate::error::{FileCommandSnafu, IoResultExt, Result};
use crate::executor::{CommandOutput, CommandRunner, CommandSpec, PrivilegeEscalation};

/// Mode of credential files: owner read/write only.
const PRIVATE_MODE: u32 = 0o600;

/// Filesystem access that honours the configured privilege escalation.
pub struct SystemFiles<'a, R> {
    runner: &'a R,
    escalated: bool,
}

impl<'a, R: CommandRunner> SystemFiles<'a, R> {
    pub fn new(runner: &'a R, escalation: PrivilegeEscalation) -> Self {
        Self {
            runner,
            escalated: escalation != PrivilegeEscalation::None,
        }
    }

    pub fn create_dir_all(&self, path: &Path) -> Result<()> {
        if self.escalated {
            self.run_checked(CommandSpec::new("mkdir").arg("-p").arg(path.to_string_lossy()))?;
            return Ok(());
        }
        fs::create_dir_all(path).file_context(path)
    }

    /// Removes an empty directory.
    pub fn remove_dir(&self, path: &Path) -> Result<()> {
        if self.escalated {
            self.run_checked(CommandSpec::new("rmdir").arg(path.to_string_lossy()))?;
            return Ok(());
        }
        fs::remove_dir(path).file_context(path)
    }

    /// Lists a directory, failing if it cannot be read.
    pub fn list_dir(&self, path: &Path) -> Result<()> {
        if self.escalated {
            self.run_checked(CommandSpec::new("ls").arg("-A").arg(path.to_string_lossy()))?;
            return Ok(());
        }
        fs::read_dir(path).file_context(path)?;
        Ok(())
    }

    pub fn is_file(&self, path: &Path) -> Result<bool> {
        if self.escalated {
            let output = self
                .runner
                .run(&CommandSpec::new("test").arg("-f").arg(path.to_string_lossy()))?;
            return Ok(output.success());
        }
        Ok(path.is_file())
    }

    /// Creates an empty file only its owner can read, unless `path` exists.
    pub fn create_private(&self, path: &Path) -> Result<()> {
        if self.escalated {
            if !self.is_file(path)? {
                self.run_checked(CommandSpec::new("install").args([
                    "-m".to_string(),
                    format!("{:o}", PRIVATE_MODE),
                    "/dev/null".to_string(),
                    path.to_string_lossy().into_owned(),
                ]))?;
            }
            return Ok(());
        }
        OpenOptions::new()
            .append(true)
            .create(true)
            .mode(PRIVATE_MODE)
            .open(path)
            .file_context(path)?;
        Ok(())
    }

    /// Restricts an existing file to its owner.
    pub fn restrict_to_owner(&self, path: &Path) -> Result<()> {
        if self.escalated {
            self.run_checked(CommandSpec::new("chmod").args([
                format!("{:o}", PRIVATE_MODE),
                path.to_string_lossy().into_owned(),
            ]))?;
            return Ok(());
        }
        fs::set_permissions(path, fs::Permissions::from_mode(PRIVATE_MODE)).file_context(path)
    }

    /// Appends `line` to an existing file unless an identical line is present.
    ///
    /// Returns whether the line was written. A last line without a trailing
    /// newline is terminated first.
    pub fn append_line_once(&self, path: &Path, line: &str) -> Result<bool> {
        let wanted = line.trim_end_matches('\n');
        if self.escalated {
            return self.append_escalated(path, wanted);
        }
        append_direct(path, wanted).file_context(path)
    }

    fn append_escalated(&self, path: &Path, wanted: &str) -> Result<bool> {
        let target = path.to_string_lossy().into_owned();

        let lookup = CommandSpec::new("grep")
            .args(["-qxF", "--", wanted, target.as_str()])
            .secret(wanted);
        let found = self.runner.run(&lookup)?;
        match found.code {
            0 => return Ok(false),
            1 => {}
            _ => return fail(&lookup, found),
        }

        // Non-empty only when the last byte is not a newline.
        let last = self.run_checked(CommandSpec::new("tail").args(["-c", "1", target.as_str()]))?;
        let mut record = String::with_capacity(wanted.len() + 2);
        if !last.stdout.is_empty() {
            record.push('\n');
        }
        record.push_str(wanted);
        record.push('\n');

        self.run_checked(
            CommandSpec::new("tee")
                .args(["-a", target.as_str()])
                .stdin(record)
                .secret(wanted),
        )?;
        Ok(true)
    }

    fn run_checked(&self, command: CommandSpec) -> Result<CommandOutput> {
        let output = self.runner.run(&command)?;
        if !output.success() {
            return fail(&command, output);
        }
        Ok(output)
    }
}

fn fail<T>(command: &CommandSpec, output: CommandOutput) -> Result<T> {
    FileCommandSnafu {
        command: command.to_string(),
        code: output.code,
        stderr: output.stderr,
    }
    .fail()
}

fn append_direct(path: &Path, wanted: &str) -> std::io::Result<bool> {
    let mut file = OpenOptions::new().read(true).append(true).open(path)?;

    let mut content = String::new();
    file.read_to_string(&mut content)?;
    if content.lines().any(|existing| existing == wanted) {
        return Ok(false);
    }

    file.seek(SeekFrom::End(0))?;
    let mut record = String::with_capacity(wanted.len() + 2);
    if !content.is_empty() && !content.ends_with('\n') {
        record.push('\n');
    }
    record.push_str(wanted);
    record.push('\n');
    file.write_all(record.as_bytes())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::executor::ExecutionContext;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Records argv and stdin; exit codes come from a per-program table.
    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<(Vec<String>, Option<String>)>>,
        codes: HashMap<&'static str, i32>,
        tail: String,
    }

    impl CommandRunner for Recorder {
        fn run(&self, command: &CommandSpec) -> Result<CommandOutput> {
            self.calls.borrow_mut().push((
                command.argv().into_iter().map(str::to_string).collect(),
                command.stdin_payload().map(str::to_string),
            ));
            Ok(CommandOutput {
                code: self.codes.get(command.program()).copied().unwrap_or(0),
                stdout: if command.program() == "tail" {
                    self.tail.clone()
                } else {
                    String::new()
                },
                stderr: String::new(),
            })
        }
    }

    fn direct(runner: &ExecutionContext) -> SystemFiles<'_, ExecutionContext> {
        SystemFiles::new(runner, PrivilegeEscalation::None)
    }

    #[test]
    fn test_create_private_file_is_owner_only() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("passwd-s3fs");
        let runner = ExecutionContext::new();

        direct(&runner).create_private(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_append_terminates_last_line() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("secrets");
        fs::write(&path, "first").unwrap();
        let runner = ExecutionContext::new();
        let files = direct(&runner);

        assert!(files.append_line_once(&path, "second\n").unwrap());
        assert!(!files.append_line_once(&path, "second").unwrap());
        assert!(!files.append_line_once(&path, "first").unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_append_requires_existing_file() {
        let dir = TempDir::new().unwrap();
        let runner = ExecutionContext::new();

        let err = direct(&runner)
            .append_line_once(&dir.path().join("missing"), "line")
            .unwrap_err();
        assert!(matches!(err, Error::FileAccess { .. }));
    }

    #[test]
    fn test_escalated_operations_use_runner() {
        let runner = Recorder::default();
        let files = SystemFiles::new(&runner, PrivilegeEscalation::Sudo);
        let mount_point = Path::new("/mnt/nfs");

        files.create_dir_all(mount_point).unwrap();
        files.list_dir(mount_point).unwrap();
        files.remove_dir(mount_point).unwrap();

        let programs: Vec<String> = runner
            .calls
            .borrow()
            .iter()
            .map(|(argv, _)| argv.join(" "))
            .collect();
        assert_eq!(programs, ["mkdir -p /mnt/nfs", "ls -A /mnt/nfs", "rmdir /mnt/nfs"]);
    }

    #[test]
    fn test_escalated_append_writes_through_tee() {
        let runner = Recorder {
            codes: HashMap::from([("grep", 1)]),
            tail: "x".to_string(),
            ..Default::default()
        };
        let files = SystemFiles::new(&runner, PrivilegeEscalation::Sudo);

        assert!(files
            .append_line_once(Path::new("/etc/davfs2/secrets"), "dav:443 u pw\n")
            .unwrap());

        let calls = runner.calls.borrow();
        assert_eq!(calls[0].0, ["grep", "-qxF", "--", "dav:443 u pw", "/etc/davfs2/secrets"]);
        assert_eq!(calls[1].0, ["tail", "-c", "1", "/etc/davfs2/secrets"]);
        assert_eq!(calls[2].0, ["tee", "-a", "/etc/davfs2/secrets"]);
        assert_eq!(calls[2].1.as_deref(), Some("\ndav:443 u pw\n"));
    }

    #[test]
    fn test_escalated_append_skips_present_line() {
        let runner = Recorder::default();
        let files = SystemFiles::new(&runner, PrivilegeEscalation::Sudo);

        assert!(!files
            .append_line_once(Path::new("/etc/passwd-s3fs"), "b:AK:SK")
            .unwrap());
        assert_eq!(runner.calls.borrow().len(), 1);
    }

    #[test]
    fn test_escalated_failure_reports_command() {
        let runner = Recorder {
            codes: HashMap::from([("mkdir", 1)]),
            ..Default::default()
        };
        let files = SystemFiles::new(&runner, PrivilegeEscalation::Sudo);

        let err = files.create_dir_all(Path::new("/mnt/s3")).unwrap_err();
        assert!(matches!(err, Error::FileCommand { code: 1, .. }));
    }
}
