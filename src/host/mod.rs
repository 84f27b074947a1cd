//! Operating system mount and NFS export primitives.
//!
//! [`HostOps`] is the seam between the lifecycle steps and the machine they
//! run on. [`SystemHost`] implements it with the native tooling (`mount`,
//! `umount`, `sync`, `exportfs`, `showmount`) and reads the kernel mount
//! table directly; it never edits shared system files itself.

use std::collections::BTreeSet;
use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::debug;

use crate::runner::{CommandError, CommandOutput, CommandRunner};
use crate::tools::HostTools;

mod tables;

pub use tables::{parse_export_list, parse_mount_targets};

/// Default location of the kernel mount table.
pub const DEFAULT_MOUNT_TABLE: &str = "/proc/self/mounts";

const WRITE_PROBE_NAME: &str = ".bdsrotator-write-probe";

/// Errors raised by host primitives.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum HostError {
    /// Raised when a helper exits with a non-zero status.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Helper that failed.
        program: String,
        /// Exit status as reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the helper.
        stderr: String,
    },
    /// Raised when a helper cannot be run.
    #[error(transparent)]
    Runner(#[from] CommandError),
    /// Raised when the mount table cannot be read.
    #[error("failed to read mount table {path}: {message}")]
    MountTable {
        /// Mount table path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the backup directory is unusable.
    #[error("{path} {reason}")]
    InvalidBackupPath {
        /// Backup directory that failed validation.
        path: Utf8PathBuf,
        /// What is wrong with it.
        reason: String,
    },
    /// Raised when the volume cannot be touched to wake it.
    #[error("failed to wake {path}: {message}")]
    Wake {
        /// Mount point that was touched.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Mount, export and buffer primitives consumed by the lifecycle steps.
pub trait HostOps {
    /// Returns `true` when `mount_point` is an active mount target.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the mount table cannot be read.
    fn is_mounted(&self, mount_point: &Utf8Path) -> Result<bool, HostError>;

    /// Mounts `mount_point` using its fstab entry.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the helper fails.
    fn mount(&self, mount_point: &Utf8Path) -> Result<(), HostError>;

    /// Unmounts `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the helper fails.
    fn unmount(&self, mount_point: &Utf8Path) -> Result<(), HostError>;

    /// Lists every exported path.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the export table cannot be queried.
    fn list_exports(&self) -> Result<BTreeSet<Utf8PathBuf>, HostError>;

    /// Exports `path` to `client` with the given NFS options.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the helper fails.
    fn export(&self, path: &Utf8Path, client: &str, options: &str) -> Result<(), HostError>;

    /// Withdraws the export of `path` from `client`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the helper fails.
    fn unexport(&self, path: &Utf8Path, client: &str) -> Result<(), HostError>;

    /// Flushes dirty buffers to disk.
    ///
    /// # Errors
    ///
    /// Returns [`HostError`] when the helper fails.
    fn sync_buffers(&self) -> Result<(), HostError>;

    /// Touches the volume so a power-suspended disk spins up before detach.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Wake`] when the mount point cannot be listed.
    fn wake(&self, mount_point: &Utf8Path) -> Result<(), HostError>;

    /// Checks that `path` is a readable and writable directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::InvalidBackupPath`] describing the first problem.
    fn validate_backup_path(&self, path: &Utf8Path) -> Result<(), HostError>;
}

/// [`HostOps`] backed by the native tooling of a Linux NFS server.
#[derive(Clone, Debug)]
pub struct SystemHost<R: CommandRunner> {
    tools: HostTools,
    mount_table: Utf8PathBuf,
    runner: R,
}

impl<R: CommandRunner> SystemHost<R> {
    /// Creates a host adapter using resolved tools and a mount table path.
    #[must_use]
    pub const fn new(tools: HostTools, mount_table: Utf8PathBuf, runner: R) -> Self {
        Self {
            tools,
            mount_table,
            runner,
        }
    }

    fn run_checked(
        &self,
        program: &Utf8Path,
        args: &[OsString],
    ) -> Result<CommandOutput, HostError> {
        let output = self.runner.run(program.as_str(), args)?;
        if output.is_success() {
            return Ok(output);
        }

        Err(HostError::CommandFailure {
            program: program.to_string(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr.trim().to_owned(),
        })
    }

    fn read_mount_table(&self) -> Result<String, HostError> {
        let table_error = |message: String| HostError::MountTable {
            path: self.mount_table.clone(),
            message,
        };
        let parent = self
            .mount_table
            .parent()
            .ok_or_else(|| table_error(String::from("path has no parent directory")))?;
        let name = self
            .mount_table
            .file_name()
            .ok_or_else(|| table_error(String::from("path has no file name")))?;

        let dir = Dir::open_ambient_dir(parent, ambient_authority())
            .map_err(|err| table_error(err.to_string()))?;
        dir.read_to_string(name)
            .map_err(|err| table_error(err.to_string()))
    }
}

fn export_target(path: &Utf8Path, client: &str) -> OsString {
    OsString::from(format!("{client}:{path}"))
}

impl<R: CommandRunner> HostOps for SystemHost<R> {
    fn is_mounted(&self, mount_point: &Utf8Path) -> Result<bool, HostError> {
        let table = self.read_mount_table()?;
        let wanted = normalise(mount_point);
        Ok(parse_mount_targets(&table)
            .iter()
            .any(|target| normalise(target) == wanted))
    }

    fn mount(&self, mount_point: &Utf8Path) -> Result<(), HostError> {
        self.run_checked(&self.tools.mount, &[OsString::from(mount_point.as_str())])?;
        debug!(%mount_point, "mounted volume");
        Ok(())
    }

    fn unmount(&self, mount_point: &Utf8Path) -> Result<(), HostError> {
        self.run_checked(&self.tools.umount, &[OsString::from(mount_point.as_str())])?;
        debug!(%mount_point, "unmounted volume");
        Ok(())
    }

    fn list_exports(&self) -> Result<BTreeSet<Utf8PathBuf>, HostError> {
        let output = self.run_checked(
            &self.tools.showmount,
            &[OsString::from("-e"), OsString::from("--no-headers")],
        )?;
        Ok(parse_export_list(&output.stdout))
    }

    fn export(&self, path: &Utf8Path, client: &str, options: &str) -> Result<(), HostError> {
        // A per-client export target keeps exportfs from touching /etc/exports.
        self.run_checked(
            &self.tools.exportfs,
            &[
                OsString::from("-o"),
                OsString::from(options),
                export_target(path, client),
            ],
        )?;
        debug!(%path, client, "exported path");
        Ok(())
    }

    fn unexport(&self, path: &Utf8Path, client: &str) -> Result<(), HostError> {
        self.run_checked(
            &self.tools.exportfs,
            &[OsString::from("-u"), export_target(path, client)],
        )?;
        debug!(%path, client, "unexported path");
        Ok(())
    }

    fn sync_buffers(&self) -> Result<(), HostError> {
        self.run_checked(&self.tools.sync, &[])?;
        debug!("buffers synced");
        Ok(())
    }

    fn wake(&self, mount_point: &Utf8Path) -> Result<(), HostError> {
        let wake_error = |message: String| HostError::Wake {
            path: mount_point.to_path_buf(),
            message,
        };
        let dir = Dir::open_ambient_dir(mount_point, ambient_authority())
            .map_err(|err| wake_error(err.to_string()))?;
        let mut entries = dir.entries().map_err(|err| wake_error(err.to_string()))?;
        if let Some(entry) = entries.next() {
            entry.map_err(|err| wake_error(err.to_string()))?;
        }
        Ok(())
    }

    fn validate_backup_path(&self, path: &Utf8Path) -> Result<(), HostError> {
        validate_backup_dir(path)
    }
}

/// Checks that `path` exists, is a directory, and can be listed and
/// written to.
///
/// # Errors
///
/// Returns [`HostError::InvalidBackupPath`] describing the first problem.
pub fn validate_backup_dir(path: &Utf8Path) -> Result<(), HostError> {
    let invalid = |reason: &str| HostError::InvalidBackupPath {
        path: path.to_path_buf(),
        reason: reason.to_owned(),
    };

    if !path.is_dir() {
        return Err(invalid("not found"));
    }

    let dir = Dir::open_ambient_dir(path, ambient_authority())
        .map_err(|_| invalid("is not readable"))?;
    dir.entries().map_err(|_| invalid("is not readable"))?;
    dir.write(WRITE_PROBE_NAME, b"")
        .map_err(|_| invalid("is not writeable"))?;
    dir.remove_file(WRITE_PROBE_NAME)
        .map_err(|_| invalid("is not writeable"))?;

    debug!(%path, "backup disk validation passed");
    Ok(())
}

fn normalise(path: &Utf8Path) -> &str {
    let text = path.as_str();
    match text.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    }
}
