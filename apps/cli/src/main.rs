//! Backup Mount CLI - Command line interface for remote storage mounting.
//!
//! Loads a JSON job file, validates its storages and mounts/unmounts them
//! around a backup command.

mod config;
mod error;
mod logging;

use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};

use backup_mount_core::{
    ExecutionContext, MountManager, MountOutcome, MountPlan, MountSession, StorageConfig,
    StorageKind,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use snafu::ResultExt;
use tracing::{error, info, warn};

use crate::config::{JobConfig, JobFile};
use crate::error::{CliError, JobNotFoundSnafu, OutputSnafu, Result, SpawnSnafu, StorageNotFoundSnafu};

/// Backup storage mount tool.
#[derive(Parser)]
#[command(name = "backup-mount")]
#[command(about = "Mount remote backup storages around backup commands", long_about = None)]
struct Cli {
    /// Path to the JSON job file.
    #[arg(short, long, default_value = "/etc/backup-mount/jobs.json")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the storages of one job, or of every job.
    Validate {
        /// Job name; all jobs when omitted.
        #[arg(long)]
        job: Option<String>,
    },
    /// Print the mount plans of a job as JSON without touching the system.
    Plan {
        #[arg(long)]
        job: String,
    },
    /// Mount a storage, run a command inside the mount point, then unmount.
    Run {
        #[arg(long)]
        job: String,
        /// Storage kind (local, s3, scp, ftp, smb, nfs, webdav).
        #[arg(long)]
        storage: StorageKind,
        /// Command to run, after `--`.
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Force-unmount the fixed mount point of a storage kind.
    Unmount {
        #[arg(long)]
        storage: StorageKind,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let jobs = JobFile::load(&cli.config)?;
    let manager = MountManager::new(
        ExecutionContext::from_settings(&jobs.settings),
        jobs.settings.clone(),
    );

    match cli.command {
        Commands::Validate { job } => {
            let selected: Vec<&JobConfig> = match &job {
                Some(name) => vec![find_job(&jobs, name)?],
                None => jobs.jobs.iter().collect(),
            };
            for job in selected {
                let storages = job.validated()?;
                info!("Job '{}': {} storage(s) valid", job.job, storages.len());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Plan { job } => {
            let job = find_job(&jobs, &job)?;
            let mut views = Vec::new();
            for config in job.validated()? {
                let plan = manager.plan(&config)?;
                views.push(PlanView::new(&config, plan.as_ref()));
            }
            let json = serde_json::to_string_pretty(&views).context(OutputSnafu)?;
            println!("{}", json);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            job,
            storage,
            command,
        } => {
            let job = find_job(&jobs, &job)?;
            let config = job
                .storage(storage)
                .ok_or_else(|| {
                    StorageNotFoundSnafu {
                        job: job.job.as_str(),
                        storage: storage.label(),
                    }
                    .build()
                })??;
            run_mounted(&manager, &config, &command)
        }
        Commands::Unmount { storage } => {
            let Some(mount_point) = manager.settings().mount_point(storage) else {
                info!("Local storage has no mount point");
                return Ok(ExitCode::SUCCESS);
            };
            let mut session = MountSession::adopt("manual", storage, mount_point);
            manager.unmount(&mut session)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn find_job<'a>(jobs: &'a JobFile, name: &str) -> Result<&'a JobConfig> {
    jobs.job(name).ok_or_else(|| JobNotFoundSnafu { job: name }.build())
}

/// Mounts `config`, runs `command` in the mounted directory and always unmounts.
fn run_mounted(
    manager: &MountManager<ExecutionContext>,
    config: &StorageConfig,
    command: &[String],
) -> Result<ExitCode> {
    let mut session = MountSession::new();
    let workdir = match manager.mount(&mut session, config)? {
        MountOutcome::Local => PathBuf::from(&config.backup_dir),
        MountOutcome::Mounted { mount_point } => mount_point,
    };

    let status = spawn_in(&workdir, command);
    let unmounted = manager.unmount(&mut session);

    let status = status?;
    unmounted?;

    match status.code() {
        Some(0) => Ok(ExitCode::SUCCESS),
        Some(code) => {
            warn!("'{}' exited with code {}", command.join(" "), code);
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
        None => {
            warn!("'{}' was terminated by a signal", command.join(" "));
            Ok(ExitCode::FAILURE)
        }
    }
}

fn spawn_in(workdir: &Path, command: &[String]) -> Result<std::process::ExitStatus> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| CliError::Spawn {
            command: String::new(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
        })?;

    info!("Running '{}' in {}", command.join(" "), workdir.display());
    Command::new(program)
        .args(args)
        .current_dir(workdir)
        .status()
        .context(SpawnSnafu {
            command: program.as_str(),
        })
}

/// JSON view of a storage's plan; secrets are masked.
#[derive(Serialize)]
struct PlanView {
    job: String,
    storage: StorageKind,
    mount: Option<MountView>,
}

#[derive(Serialize)]
struct MountView {
    os_family: backup_mount_core::OsFamily,
    packages: Vec<String>,
    package_checks: Vec<String>,
    mount_command: String,
    mount_point: PathBuf,
    hooks: Vec<&'static str>,
}

impl PlanView {
    fn new(config: &StorageConfig, plan: Option<&MountPlan>) -> Self {
        Self {
            job: config.job.clone(),
            storage: config.kind(),
            mount: plan.map(|plan| MountView {
                os_family: plan.os_family,
                packages: plan.packages.clone(),
                package_checks: plan
                    .packages
                    .iter()
                    .map(|package| plan.package_check(package).to_string())
                    .collect(),
                mount_command: plan.mount_command.to_string(),
                mount_point: plan.mount_point.clone(),
                hooks: plan.hooks.iter().map(|hook| hook.name()).collect(),
            }),
        }
    }
}
