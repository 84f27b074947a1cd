//! Failure notification by mail.
//!
//! Mail goes to a configured SMTP relay, or to the local `sendmail` when no
//! relay is named and one is installed. `sendmail` runs with `-t -i`, so the
//! MTA reads recipients from the headers and a lone `.` line in the log body
//! does not end the message early.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use lettre::message::{Mailbox, header::ContentType};
use lettre::{Message, SmtpTransport, Transport as _};
use thiserror::Error;
use tracing::info;

use crate::config::RotatorConfig;
use crate::runner::{CommandError, CommandRunner, RunOptions};

/// Relay used when neither an SMTP server nor `sendmail` is configured.
pub const DEFAULT_SMTP_SERVER: &str = "localhost";

const HOSTNAME_SOURCES: [&str; 2] = ["/proc/sys/kernel/hostname", "/etc/hostname"];

/// Errors raised while sending a notification.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum NotifyError {
    /// Raised when the mail transport cannot be run.
    #[error(transparent)]
    Runner(#[from] CommandError),
    /// Raised when the mail transport rejects the message.
    #[error("sendmail exited with status {status_text}: {stderr}")]
    Rejected {
        /// Human readable exit status.
        status_text: String,
        /// Stderr captured from sendmail.
        stderr: String,
    },
    /// Raised when a sender or recipient is not a valid mailbox.
    #[error("invalid {field} address: {message}")]
    Address {
        /// Which identity field failed to parse.
        field: &'static str,
        /// Parser message.
        message: String,
    },
    /// Raised when the SMTP relay cannot be reached or refuses the message.
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),
}

/// Delivers a message about a run.
pub trait Notifier {
    /// Sends `body` with the given `subject`.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] when delivery fails.
    fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError>;
}

/// Envelope addresses and default subject for notifications.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MailIdentity {
    /// `From` address.
    pub sender: String,
    /// `To` address.
    pub recipient: String,
    /// `Subject` line.
    pub subject: String,
}

impl MailIdentity {
    /// Uses configured values, defaulting to the local user and host.
    #[must_use]
    pub fn from_config(config: &RotatorConfig) -> Self {
        let user = local_user();
        let host = local_host();
        Self {
            sender: config
                .smtp_sender
                .clone()
                .unwrap_or_else(|| format!("{user}@{host}")),
            recipient: config.smtp_recipient.clone().unwrap_or(user),
            subject: config
                .smtp_subject
                .clone()
                .unwrap_or_else(|| format!("bdsrotator on {host} encountered an error")),
        }
    }
}

/// [`Notifier`] that pipes the message into `sendmail`.
#[derive(Clone, Debug)]
pub struct SendmailNotifier<R: CommandRunner> {
    sendmail: Utf8PathBuf,
    identity: MailIdentity,
    runner: R,
}

impl<R: CommandRunner> SendmailNotifier<R> {
    /// Creates a notifier using the given `sendmail` binary.
    #[must_use]
    pub const fn new(sendmail: Utf8PathBuf, identity: MailIdentity, runner: R) -> Self {
        Self {
            sendmail,
            identity,
            runner,
        }
    }

    /// Addresses used for outgoing mail.
    #[must_use]
    pub const fn identity(&self) -> &MailIdentity {
        &self.identity
    }
}

impl<R: CommandRunner> Notifier for SendmailNotifier<R> {
    fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let message = compose(&self.identity, subject, body);
        let output = self.runner.run_with(
            self.sendmail.as_str(),
            &[OsString::from("-t"), OsString::from("-i")],
            &RunOptions::default().stdin(message),
        )?;
        if !output.is_success() {
            return Err(NotifyError::Rejected {
                status_text: output.status_text(),
                stderr: output.stderr.trim().to_owned(),
            });
        }
        info!(recipient = %self.identity.recipient, "notification sent");
        Ok(())
    }
}

/// How failure mail leaves the host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum MailTransport {
    /// Relay through the named SMTP server (`host` or `host:port`).
    Smtp(String),
    /// Pipe into the local `sendmail` binary.
    Sendmail(Utf8PathBuf),
}

impl MailTransport {
    /// Picks the configured relay, then a local `sendmail`, then the relay
    /// on [`DEFAULT_SMTP_SERVER`].
    #[must_use]
    pub fn select(smtp_server: Option<&str>, sendmail: Option<Utf8PathBuf>) -> Self {
        match (smtp_server.map(str::trim).filter(|s| !s.is_empty()), sendmail) {
            (Some(server), _) => Self::Smtp(server.to_owned()),
            (None, Some(path)) => Self::Sendmail(path),
            (None, None) => Self::Smtp(String::from(DEFAULT_SMTP_SERVER)),
        }
    }
}

/// [`Notifier`] that relays the message through an SMTP server.
#[derive(Clone, Debug)]
pub struct SmtpNotifier {
    server: String,
    identity: MailIdentity,
}

impl SmtpNotifier {
    /// Creates a notifier relaying through `server` (`host` or `host:port`).
    #[must_use]
    pub const fn new(server: String, identity: MailIdentity) -> Self {
        Self { server, identity }
    }

    fn transport(&self) -> Result<SmtpTransport, NotifyError> {
        let builder = match self.server.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|err| {
                    NotifyError::Smtp(format!("bad port in {}: {err}", self.server))
                })?;
                SmtpTransport::builder_dangerous(host).port(port)
            }
            None => SmtpTransport::builder_dangerous(self.server.as_str()),
        };
        Ok(builder.build())
    }
}

impl Notifier for SmtpNotifier {
    fn notify(&self, subject: &str, body: &str) -> Result<(), NotifyError> {
        let message = build_message(&self.identity, subject, body)?;
        self.transport()?
            .send(&message)
            .map_err(|err| NotifyError::Smtp(err.to_string()))?;
        info!(recipient = %self.identity.recipient, server = %self.server, "notification sent");
        Ok(())
    }
}

/// Builds the SMTP message. A bare user name is addressed at
/// [`DEFAULT_SMTP_SERVER`].
///
/// # Errors
///
/// Returns [`NotifyError::Address`] when the sender or recipient does not
/// parse as a mailbox.
pub fn build_message(
    identity: &MailIdentity,
    subject: &str,
    body: &str,
) -> Result<Message, NotifyError> {
    Message::builder()
        .from(mailbox("sender", &identity.sender)?)
        .to(mailbox("recipient", &identity.recipient)?)
        .subject(header_value(subject))
        .header(ContentType::TEXT_PLAIN)
        .body(body.to_owned())
        .map_err(|err| NotifyError::Smtp(err.to_string()))
}

fn mailbox(field: &'static str, value: &str) -> Result<Mailbox, NotifyError> {
    let address = if value.contains('@') {
        value.to_owned()
    } else {
        format!("{value}@{DEFAULT_SMTP_SERVER}")
    };
    address
        .parse::<Mailbox>()
        .map_err(|err| NotifyError::Address {
            field,
            message: err.to_string(),
        })
}

/// Renders an RFC 5322 message. Header values are flattened to one line.
#[must_use]
pub fn compose(identity: &MailIdentity, subject: &str, body: &str) -> String {
    format!(
        "From: {}\nTo: {}\nSubject: {}\n\n{body}",
        header_value(&identity.sender),
        header_value(&identity.recipient),
        header_value(subject),
    )
}

fn header_value(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch == '\r' || ch == '\n' { ' ' } else { ch })
        .collect()
}

fn local_user() -> String {
    ["USER", "LOGNAME"]
        .into_iter()
        .find_map(|key| std::env::var(key).ok().filter(|value| !value.is_empty()))
        .unwrap_or_else(|| String::from("root"))
}

fn local_host() -> String {
    HOSTNAME_SOURCES
        .into_iter()
        .find_map(|source| read_trimmed(Utf8Path::new(source)))
        .unwrap_or_else(|| String::from("localhost"))
}

fn read_trimmed(path: &Utf8Path) -> Option<String> {
    let dir = Dir::open_ambient_dir(path.parent()?, ambient_authority()).ok()?;
    let content = dir.read_to_string(path.file_name()?).ok()?;
    Some(content.trim().to_owned()).filter(|name| !name.is_empty())
}
