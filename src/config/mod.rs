//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, the `bdsrotator.toml` configuration file, and
//! `BDSROTATOR_*` environment variables. Command-line overrides are applied
//! afterwards through [`RotatorConfig::apply_overrides`].

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::host::DEFAULT_MOUNT_TABLE;
use crate::lifecycle::{LifecycleSettings, LifecycleTarget};
use crate::retry::RetryPolicy;
use crate::tools::DEFAULT_TOOL_SEARCH_PATH;

/// Default NFS export options.
pub const DEFAULT_NFS_OPTIONS: &str = "rw,no_root_squash,async,no_subtree_check";

/// Default location of the persisted run log.
pub const DEFAULT_LOG_FILE: &str = "/var/log/bdsrotator.log";

/// Rotator settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "BDSROTATOR",
    discovery(
        app_name = "bdsrotator",
        env_var = "BDSROTATOR_CONFIG_PATH",
        config_file_name = "bdsrotator.toml",
        dotfile_name = ".bdsrotator.toml",
        project_file_name = "bdsrotator.toml"
    )
)]
pub struct RotatorConfig {
    /// vCenter or ESXi host name or IP.
    pub viserver: Option<String>,
    /// Skip TLS certificate verification when talking to `viserver`.
    #[ortho_config(default = false)]
    pub viserver_insecure: bool,
    /// Host name or IP of the backup appliance, used as the NFS client.
    pub vaa_server: Option<String>,
    /// Inventory name of the backup appliance VM.
    pub vaa_name: Option<String>,
    /// Control-plane user. Falls back to the netrc entry for `viserver`.
    pub username: Option<String>,
    /// Control-plane password. Falls back to the netrc entry for `viserver`.
    pub password: Option<String>,
    /// netrc file consulted when credentials are not configured. Supports
    /// tilde expansion.
    #[ortho_config(default = "~/.netrc".to_owned())]
    pub netrc_file: String,
    /// Mount point of the backup volume, as listed in fstab.
    #[ortho_config(default = "/mnt/backup".to_owned())]
    pub backup_disk: String,
    /// Directory on the backup volume that is exported.
    #[ortho_config(default = "VBABACKUPS".to_owned())]
    pub backup_dir: String,
    /// NFS export options.
    #[ortho_config(default = DEFAULT_NFS_OPTIONS.to_owned())]
    pub nfs_opts: String,
    /// Log filter, either a level (`debug`, `info`, ...) or an `EnvFilter`
    /// directive.
    #[ortho_config(default = "info".to_owned())]
    pub log_level: String,
    /// Persisted log file, truncated at the start of every run.
    #[ortho_config(default = DEFAULT_LOG_FILE.to_owned())]
    pub log_file: String,
    /// Colon-separated directories searched for helper executables.
    #[ortho_config(default = DEFAULT_TOOL_SEARCH_PATH.to_owned())]
    pub tool_search_path: String,
    /// Kernel mount table consulted to detect mounted volumes.
    #[ortho_config(default = DEFAULT_MOUNT_TABLE.to_owned())]
    pub mount_table: String,
    /// Attempts allowed for detaching the volume.
    #[ortho_config(default = 5)]
    pub detach_attempts: u32,
    /// Seconds between detach attempts.
    #[ortho_config(default = 10)]
    pub detach_interval_secs: u64,
    /// Seconds allowed for the appliance to power off after shutdown.
    #[ortho_config(default = 300)]
    pub shutdown_timeout_secs: u64,
    /// Seconds between power-state polls while waiting for shutdown.
    #[ortho_config(default = 5)]
    pub shutdown_poll_secs: u64,
    /// Mail the run log when a run does not finish cleanly; unset means
    /// yes. Read through [`RotatorConfig::notify_on_failure`].
    pub notify_on_failure: Option<bool>,
    /// SMTP relay for failure mail. When unset, a local `sendmail` is used
    /// if one is installed, otherwise the relay on `localhost`.
    pub smtp_server: Option<String>,
    /// Sender address; defaults to `<user>@<host>`.
    pub smtp_sender: Option<String>,
    /// Recipient address; defaults to the local user.
    pub smtp_recipient: Option<String>,
    /// Subject line; defaults to naming the local host.
    pub smtp_subject: Option<String>,
}

/// Values supplied on the command line, applied over loaded configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConfigOverrides {
    /// Replaces `viserver`.
    pub viserver: Option<String>,
    /// Replaces `vaa_server`.
    pub vaa_server: Option<String>,
    /// Replaces `vaa_name`.
    pub vaa_name: Option<String>,
    /// Replaces `username`.
    pub username: Option<String>,
    /// Replaces `netrc_file`.
    pub netrc_file: Option<String>,
    /// Replaces `backup_disk`.
    pub backup_disk: Option<String>,
    /// Replaces `backup_dir`.
    pub backup_dir: Option<String>,
    /// Replaces `nfs_opts`.
    pub nfs_opts: Option<String>,
    /// Replaces `log_level`.
    pub log_level: Option<String>,
    /// Replaces `smtp_server`.
    pub smtp_server: Option<String>,
    /// Replaces `smtp_sender`.
    pub smtp_sender: Option<String>,
    /// Replaces `smtp_recipient`.
    pub smtp_recipient: Option<String>,
    /// Replaces `smtp_subject`.
    pub smtp_subject: Option<String>,
}

/// Longest accepted wait for the appliance to power off: one day.
pub const MAX_SHUTDOWN_TIMEOUT_SECS: u64 = 86_400;

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid configuration field {field}: {reason}")]
    InvalidField {
        /// Field name.
        field: String,
        /// What is wrong with it.
        reason: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    flag: &'static str,
}

const VISERVER: FieldMetadata = FieldMetadata {
    description: "vCenter or ESXi host",
    env_var: "BDSROTATOR_VISERVER",
    toml_key: "viserver",
    flag: "--viserver",
};

const VAA_SERVER: FieldMetadata = FieldMetadata {
    description: "backup appliance host",
    env_var: "BDSROTATOR_VAA_SERVER",
    toml_key: "vaa_server",
    flag: "--vaa-server",
};

const VAA_NAME: FieldMetadata = FieldMetadata {
    description: "backup appliance VM name",
    env_var: "BDSROTATOR_VAA_NAME",
    toml_key: "vaa_name",
    flag: "--vaa-name",
};

impl RotatorConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("bdsrotator")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Replaces loaded values with those given on the command line.
    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        let ConfigOverrides {
            viserver,
            vaa_server,
            vaa_name,
            username,
            netrc_file,
            backup_disk,
            backup_dir,
            nfs_opts,
            log_level,
            smtp_server,
            smtp_sender,
            smtp_recipient,
            smtp_subject,
        } = overrides;

        if viserver.is_some() {
            self.viserver = viserver;
        }
        if vaa_server.is_some() {
            self.vaa_server = vaa_server;
        }
        if vaa_name.is_some() {
            self.vaa_name = vaa_name;
        }
        if username.is_some() {
            self.username = username;
        }
        if let Some(value) = netrc_file {
            self.netrc_file = value;
        }
        if let Some(value) = backup_disk {
            self.backup_disk = value;
        }
        if let Some(value) = backup_dir {
            self.backup_dir = value;
        }
        if let Some(value) = nfs_opts {
            self.nfs_opts = value;
        }
        if let Some(value) = log_level {
            self.log_level = value;
        }
        for (slot, value) in [
            (&mut self.smtp_server, smtp_server),
            (&mut self.smtp_sender, smtp_sender),
            (&mut self.smtp_recipient, smtp_recipient),
            (&mut self.smtp_subject, smtp_subject),
        ] {
            if value.is_some() {
                *slot = value;
            }
        }
    }

    /// Whether failure mail is enabled; defaults to `true`.
    #[must_use]
    pub fn notify_on_failure(&self) -> bool {
        self.notify_on_failure.unwrap_or(true)
    }

    /// Checks that required fields are present and timings are usable.
    ///
    /// Error messages name the environment variable, configuration key and
    /// flag that supply each missing value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require(self.viserver.as_deref(), &VISERVER)?;
        Self::require(self.vaa_server.as_deref(), &VAA_SERVER)?;
        Self::require(self.vaa_name.as_deref(), &VAA_NAME)?;
        Self::require_value(&self.backup_disk, "backup_disk")?;
        Self::require_value(&self.backup_dir, "backup_dir")?;
        Self::require_value(&self.nfs_opts, "nfs_opts")?;
        Self::require_value(&self.log_file, "log_file")?;
        if self.backup_dir.contains('/') {
            return Err(ConfigError::InvalidField {
                field: String::from("backup_dir"),
                reason: String::from("must be a single directory name on the backup disk"),
            });
        }
        if self.detach_attempts == 0 {
            return Err(ConfigError::InvalidField {
                field: String::from("detach_attempts"),
                reason: String::from("must be at least 1"),
            });
        }
        if self.shutdown_timeout_secs > MAX_SHUTDOWN_TIMEOUT_SECS {
            return Err(ConfigError::InvalidField {
                field: String::from("shutdown_timeout_secs"),
                reason: format!("must be at most {MAX_SHUTDOWN_TIMEOUT_SECS}"),
            });
        }
        if self.shutdown_poll_secs == 0 {
            return Err(ConfigError::InvalidField {
                field: String::from("shutdown_poll_secs"),
                reason: String::from("must be at least 1"),
            });
        }
        Ok(())
    }

    fn require(value: Option<&str>, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        match value {
            Some(v) if !v.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::MissingField(format!(
                "missing {}: set {}, add {} to bdsrotator.toml, or pass {}",
                metadata.description, metadata.env_var, metadata.toml_key, metadata.flag
            ))),
        }
    }

    fn require_value(value: &str, field: &str) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(field.to_owned()));
        }
        Ok(())
    }

    /// Control-plane host; empty until validated.
    #[must_use]
    pub fn viserver(&self) -> &str {
        self.viserver.as_deref().unwrap_or_default()
    }

    /// Exported directory: `backup_dir` beneath `backup_disk`.
    #[must_use]
    pub fn backup_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(&self.backup_disk).join(&self.backup_dir)
    }

    /// Builds the resources a lifecycle acts on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn lifecycle_target(&self) -> Result<LifecycleTarget, ConfigError> {
        self.validate()?;
        Ok(LifecycleTarget {
            mount_point: Utf8PathBuf::from(&self.backup_disk),
            backup_path: self.backup_path(),
            nfs_client: self.vaa_server.clone().unwrap_or_default(),
            nfs_options: self.nfs_opts.clone(),
            appliance: self.vaa_name.clone().unwrap_or_default(),
        })
    }

    /// Detach retry and shutdown wait timings.
    #[must_use]
    pub const fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            detach: RetryPolicy::new(
                self.detach_attempts,
                Duration::from_secs(self.detach_interval_secs),
            ),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
            shutdown_poll_interval: Duration::from_secs(self.shutdown_poll_secs),
        }
    }
}

#[cfg(test)]
mod tests;
