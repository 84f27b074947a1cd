//! Unit tests for rotator configuration.

use std::fs;

use super::*;
use crate::test_support::EnvGuard;
use rstest::{fixture, rstest};
use tempfile::TempDir;

#[fixture]
fn config() -> RotatorConfig {
    RotatorConfig {
        viserver: Some(String::from("vcenter.example.test")),
        viserver_insecure: false,
        vaa_server: Some(String::from("vba.example.test")),
        vaa_name: Some(String::from("VBA")),
        username: None,
        password: None,
        netrc_file: String::from("~/.netrc"),
        backup_disk: String::from("/mnt/backup"),
        backup_dir: String::from("VBABACKUPS"),
        nfs_opts: String::from(DEFAULT_NFS_OPTIONS),
        log_level: String::from("info"),
        log_file: String::from(DEFAULT_LOG_FILE),
        tool_search_path: String::from(DEFAULT_TOOL_SEARCH_PATH),
        mount_table: String::from(DEFAULT_MOUNT_TABLE),
        detach_attempts: 5,
        detach_interval_secs: 10,
        shutdown_timeout_secs: 300,
        shutdown_poll_secs: 5,
        notify_on_failure: None,
        smtp_server: None,
        smtp_sender: None,
        smtp_recipient: None,
        smtp_subject: None,
    }
}

#[rstest]
fn lifecycle_target_joins_backup_path(config: RotatorConfig) {
    let target = config.lifecycle_target().expect("config is valid");

    assert_eq!(target.mount_point, Utf8PathBuf::from("/mnt/backup"));
    assert_eq!(
        target.backup_path,
        Utf8PathBuf::from("/mnt/backup/VBABACKUPS")
    );
    assert_eq!(target.nfs_client, "vba.example.test");
    assert_eq!(target.appliance, "VBA");
}

#[rstest]
fn lifecycle_settings_use_configured_timings(config: RotatorConfig) {
    let settings = config.lifecycle_settings();

    assert_eq!(settings.detach.attempts(), 5);
    assert_eq!(settings.detach.interval(), Duration::from_secs(10));
    assert_eq!(settings.shutdown_timeout, Duration::from_secs(300));
    assert_eq!(settings.shutdown_poll_interval, Duration::from_secs(5));
}

#[rstest]
#[case::viserver(|c: &mut RotatorConfig| c.viserver = None, "BDSROTATOR_VISERVER")]
#[case::vaa_server(
    |c: &mut RotatorConfig| c.vaa_server = Some(String::from("  ")),
    "BDSROTATOR_VAA_SERVER"
)]
#[case::vaa_name(|c: &mut RotatorConfig| c.vaa_name = None, "--vaa-name")]
fn validate_explains_missing_fields(
    mut config: RotatorConfig,
    #[case] mutate: fn(&mut RotatorConfig),
    #[case] hint: &str,
) {
    mutate(&mut config);

    let err = config.validate().expect_err("field is missing");

    assert!(matches!(err, ConfigError::MissingField(_)));
    assert!(err.to_string().contains(hint), "unexpected message: {err}");
}

#[rstest]
fn validate_rejects_nested_backup_dir(mut config: RotatorConfig) {
    config.backup_dir = String::from("a/b");

    let err = config.validate().expect_err("nested dir rejected");

    assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "backup_dir"));
}

#[rstest]
fn validate_rejects_zero_detach_budget(mut config: RotatorConfig) {
    config.detach_attempts = 0;

    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidField { .. })
    ));
}

#[rstest]
fn overrides_replace_only_given_values(mut config: RotatorConfig) {
    config.apply_overrides(ConfigOverrides {
        vaa_name: Some(String::from("VBA-02")),
        backup_dir: Some(String::from("ARCHIVE")),
        log_level: Some(String::from("debug")),
        ..ConfigOverrides::default()
    });

    assert_eq!(config.vaa_name.as_deref(), Some("VBA-02"));
    assert_eq!(config.viserver.as_deref(), Some("vcenter.example.test"));
    assert_eq!(
        config.backup_path(),
        Utf8PathBuf::from("/mnt/backup/ARCHIVE")
    );
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.nfs_opts, DEFAULT_NFS_OPTIONS);
}

#[rstest]
#[tokio::test]
async fn load_reads_explicit_config_file() {
    let tmp = TempDir::new().expect("temp dir");
    let path = tmp.path().join("bdsrotator.toml");
    fs::write(
        &path,
        concat!(
            "viserver = \"vcenter.example.test\"\n",
            "vaa_server = \"vba.example.test\"\n",
            "vaa_name = \"VBA\"\n",
            "detach_attempts = 3\n",
        ),
    )
    .expect("write config");
    let path_text = path.to_str().expect("utf8 path");
    let _guard = EnvGuard::set_vars(&[("BDSROTATOR_CONFIG_PATH", path_text)]).await;

    let config = RotatorConfig::load_without_cli_args().expect("config loads");

    assert_eq!(config.vaa_name.as_deref(), Some("VBA"));
    assert_eq!(config.detach_attempts, 3);
    assert_eq!(config.backup_disk, "/mnt/backup");
    assert_eq!(config.shutdown_timeout_secs, 300);
    assert_eq!(config.notify_on_failure, None);
    assert!(config.notify_on_failure());
    assert_eq!(config.smtp_server, None);
}

#[rstest]
#[case::unset(None, true)]
#[case::enabled(Some(true), true)]
#[case::disabled(Some(false), false)]
fn notify_on_failure_defaults_to_enabled(
    mut config: RotatorConfig,
    #[case] setting: Option<bool>,
    #[case] expected: bool,
) {
    config.notify_on_failure = setting;

    assert_eq!(config.notify_on_failure(), expected);
}

#[rstest]
#[case::at_limit(MAX_SHUTDOWN_TIMEOUT_SECS, true)]
#[case::over_limit(MAX_SHUTDOWN_TIMEOUT_SECS + 1, false)]
#[case::huge(u64::MAX, false)]
fn validate_bounds_shutdown_timeout(
    mut config: RotatorConfig,
    #[case] secs: u64,
    #[case] accepted: bool,
) {
    config.shutdown_timeout_secs = secs;

    let result = config.validate();

    assert_eq!(result.is_ok(), accepted, "unexpected result: {result:?}");
    if let Err(err) = result {
        assert!(matches!(
            err,
            ConfigError::InvalidField { ref field, .. } if field == "shutdown_timeout_secs"
        ));
    }
}

#[rstest]
fn overrides_replace_mail_settings(mut config: RotatorConfig) {
    config.smtp_subject = Some(String::from("from file"));
    config.apply_overrides(ConfigOverrides {
        smtp_server: Some(String::from("mail.example.test")),
        smtp_recipient: Some(String::from("ops@example.test")),
        ..ConfigOverrides::default()
    });

    assert_eq!(config.smtp_server.as_deref(), Some("mail.example.test"));
    assert_eq!(config.smtp_recipient.as_deref(), Some("ops@example.test"));
    assert_eq!(config.smtp_subject.as_deref(), Some("from file"));
    assert_eq!(config.smtp_sender, None);
}
