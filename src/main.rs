//! Binary entry point for the bdsrotator CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tracing::{error, warn};

use bdsrotator::{
    ConfigError, ConfigOverrides, CredentialError, GovcControlPlane, LifecycleOrchestrator,
    MailIdentity, MailTransport, Notifier, Operation, ProcessCommandRunner, RotatorConfig,
    RunReport, SendmailNotifier, SmtpNotifier, SystemHost, TelemetryError, TelemetryHandle,
    ToolError, ToolPaths, credentials, find_executable, telemetry,
};

mod cli;

use cli::{Cli, LifecycleArgs};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("{0}")]
    Tools(#[from] ToolError),
    #[error("credential error: {0}")]
    Credentials(#[from] CredentialError),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let (operation, args) = match cli {
        Cli::Start(args) => (Operation::Start, args),
        Cli::Stop(args) => (Operation::Stop, args),
    };
    let notify = !args.no_notify;

    let mut config = RotatorConfig::load_without_cli_args()?;
    config.apply_overrides(overrides_from(args));
    config.validate()?;
    let handle = telemetry::initialise(&config.log_level, &Utf8PathBuf::from(&config.log_file))?;

    match execute(&config, operation).await {
        Ok(report) => {
            let exit_code = report.exit_code();
            if exit_code != 0 {
                writeln!(io::stderr(), "{}", report.summary()).ok();
                if notify {
                    send_notification(&config, &handle, &report.summary());
                }
            }
            Ok(exit_code)
        }
        Err(err) => {
            error!(error = %err, "backup {operation} could not start");
            if notify {
                send_notification(&config, &handle, &format!("backup {operation} failed: {err}"));
            }
            Err(err)
        }
    }
}

async fn execute(config: &RotatorConfig, operation: Operation) -> Result<RunReport, CliError> {
    let target = config.lifecycle_target()?;
    let tools = ToolPaths::locate(&config.tool_search_path)?;
    let credentials = credentials::resolve(
        config.viserver(),
        config.username.as_deref(),
        config.password.as_deref(),
        &config.netrc_file,
    )?;

    let host = SystemHost::new(
        tools.host,
        Utf8PathBuf::from(&config.mount_table),
        ProcessCommandRunner,
    );
    let plane = GovcControlPlane::new(tools.govc, config.viserver_insecure, ProcessCommandRunner);
    let orchestrator =
        LifecycleOrchestrator::new(host, plane, config.viserver(), credentials, target)
            .with_settings(config.lifecycle_settings());

    Ok(orchestrator.run(operation).await)
}

fn overrides_from(args: LifecycleArgs) -> ConfigOverrides {
    let LifecycleArgs {
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
        ..
    } = args;
    ConfigOverrides {
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
    }
}

/// Mails the run log. Delivery problems are logged and otherwise ignored.
fn send_notification(config: &RotatorConfig, handle: &TelemetryHandle, summary: &str) {
    if !config.notify_on_failure() {
        return;
    }
    let transport = MailTransport::select(
        config.smtp_server.as_deref(),
        find_executable("sendmail", &config.tool_search_path),
    );

    let log = handle.read_log().unwrap_or_else(|err| {
        warn!(error = %err, "run log unavailable for notification");
        String::new()
    });
    let body = format!("{summary}\n\n{log}");
    let identity = MailIdentity::from_config(config);
    let subject = identity.subject.clone();
    let sent = match transport {
        MailTransport::Sendmail(sendmail) => {
            SendmailNotifier::new(sendmail, identity, ProcessCommandRunner).notify(&subject, &body)
        }
        MailTransport::Smtp(server) => SmtpNotifier::new(server, identity).notify(&subject, &body),
    };
    if let Err(err) = sent {
        warn!(error = %err, "failed to send failure notification");
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
