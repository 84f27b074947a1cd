//! Command-line interface definitions for the `bdsrotator` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `bdsrotator` binary.
#[derive(Debug, Parser)]
#[command(
    name = "bdsrotator",
    version,
    about = "Hand a removable backup disk to a backup appliance VM and take it back",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Mount and export the backup disk, then power the appliance on.
    #[command(
        name = "start",
        about = "Mount and export the backup disk, then power the appliance on"
    )]
    Start(LifecycleArgs),
    /// Shut the appliance down, then unexport and unmount the backup disk.
    #[command(
        name = "stop",
        about = "Shut the appliance down, then unexport and unmount the backup disk"
    )]
    Stop(LifecycleArgs),
}

/// Overrides shared by `start` and `stop`.
///
/// Every value can also come from `bdsrotator.toml` or a `BDSROTATOR_*`
/// environment variable; flags win. The control-plane password is never
/// accepted on the command line.
#[derive(Debug, Default, Args)]
pub(crate) struct LifecycleArgs {
    /// vCenter or ESXi host name or IP.
    #[arg(short = 's', long, value_name = "HOST")]
    pub(crate) viserver: Option<String>,
    /// Backup appliance host name or IP, used as the NFS client.
    #[arg(short = 'i', long, value_name = "HOST")]
    pub(crate) vaa_server: Option<String>,
    /// Backup appliance VM name in vSphere.
    #[arg(short = 'a', long, value_name = "NAME")]
    pub(crate) vaa_name: Option<String>,
    /// vCenter or ESXi user.
    #[arg(short = 'u', long, value_name = "USER")]
    pub(crate) username: Option<String>,
    /// netrc file holding the control-plane credentials.
    #[arg(short = 'n', long, value_name = "PATH")]
    pub(crate) netrc_file: Option<String>,
    /// Backup disk mount point.
    #[arg(short = 'd', long, value_name = "PATH")]
    pub(crate) backup_disk: Option<String>,
    /// Backup directory on the root of the backup disk.
    #[arg(short = 'b', long, value_name = "DIR")]
    pub(crate) backup_dir: Option<String>,
    /// NFS export options.
    #[arg(short = 'f', long, value_name = "OPTIONS")]
    pub(crate) nfs_opts: Option<String>,
    /// Log level (`debug`, `info`, `warning`, `error`, `critical`).
    #[arg(short = 'l', long, value_name = "LEVEL")]
    pub(crate) log_level: Option<String>,
    /// SMTP relay for failure mail (`HOST` or `HOST:PORT`).
    #[arg(short = 't', long, value_name = "HOST")]
    pub(crate) smtp_server: Option<String>,
    /// Sender address for failure mail.
    #[arg(short = 'e', long, value_name = "ADDRESS")]
    pub(crate) smtp_sender: Option<String>,
    /// Recipient address for failure mail.
    #[arg(short = 'r', long, value_name = "ADDRESS")]
    pub(crate) smtp_recipient: Option<String>,
    /// Subject line for failure mail.
    #[arg(long, value_name = "TEXT")]
    pub(crate) smtp_subject: Option<String>,
    /// Do not mail the log when the run fails.
    #[arg(long)]
    pub(crate) no_notify: bool,
}
