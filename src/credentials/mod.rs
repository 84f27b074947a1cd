//! Control-plane credential resolution.
//!
//! Configured values win. Anything missing is looked up in a netrc file
//! under the control-plane host name, falling back to its `default` entry.
//! There is no interactive prompt: an unattended rotation either has
//! credentials or fails before touching anything.

use std::io::ErrorKind;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;
use tracing::debug;

use crate::plane::Credentials;

/// Errors raised while resolving credentials.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CredentialError {
    /// Raised when no source supplies both a user and a password.
    #[error(
        "no credentials for {host}: set username and password, or add a \
         `machine {host}` entry to {netrc}"
    )]
    Missing {
        /// Control-plane host.
        host: String,
        /// netrc file that was consulted.
        netrc: Utf8PathBuf,
    },
    /// Raised when the netrc file exists but cannot be read.
    #[error("failed to read {path}: {message}")]
    Netrc {
        /// netrc file path.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Login and password from one netrc entry.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct NetrcEntry {
    /// `login` token.
    pub login: Option<String>,
    /// `password` token.
    pub password: Option<String>,
}

/// Parsed netrc content.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Netrc {
    machines: Vec<(String, NetrcEntry)>,
    default: Option<NetrcEntry>,
}

enum Slot {
    Machine(usize),
    Default,
    None,
}

impl Netrc {
    /// Parses netrc syntax. `account` values and `macdef` bodies are
    /// skipped; comment lines start with `#`.
    #[must_use]
    pub fn parse(content: &str) -> Self {
        let mut netrc = Self::default();
        let mut slot = Slot::None;
        let mut in_macdef = false;

        for line in content.lines() {
            if in_macdef {
                in_macdef = !line.trim().is_empty();
                continue;
            }
            if line.trim_start().starts_with('#') {
                continue;
            }

            let mut tokens = line.split_whitespace();
            while let Some(token) = tokens.next() {
                match token {
                    "machine" => {
                        let Some(name) = tokens.next() else { break };
                        netrc
                            .machines
                            .push((name.to_owned(), NetrcEntry::default()));
                        slot = Slot::Machine(netrc.machines.len() - 1);
                    }
                    "default" => {
                        netrc.default = Some(NetrcEntry::default());
                        slot = Slot::Default;
                    }
                    "login" | "password" => {
                        let Some(value) = tokens.next() else { break };
                        if let Some(entry) = netrc.slot_mut(&slot) {
                            let field = if token == "login" {
                                &mut entry.login
                            } else {
                                &mut entry.password
                            };
                            *field = Some(value.to_owned());
                        }
                    }
                    "account" => {
                        tokens.next();
                    }
                    "macdef" => {
                        in_macdef = true;
                        break;
                    }
                    _ => {}
                }
            }
        }
        netrc
    }

    fn slot_mut(&mut self, slot: &Slot) -> Option<&mut NetrcEntry> {
        match slot {
            Slot::Machine(index) => self.machines.get_mut(*index).map(|(_, entry)| entry),
            Slot::Default => self.default.as_mut(),
            Slot::None => None,
        }
    }

    /// Returns the first entry for `host`, or the `default` entry.
    #[must_use]
    pub fn lookup(&self, host: &str) -> Option<&NetrcEntry> {
        self.machines
            .iter()
            .find(|(name, _)| name == host)
            .map(|(_, entry)| entry)
            .or(self.default.as_ref())
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// The path is returned unchanged when `HOME` is not set.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Resolves control-plane credentials for `host`.
///
/// `username` and `password` are used when both are given. Otherwise the
/// netrc entry for `host` fills in whichever is missing. A missing netrc
/// file is treated as empty.
///
/// # Errors
///
/// Returns [`CredentialError::Missing`] when no complete pair is found, or
/// [`CredentialError::Netrc`] when the netrc file cannot be read.
pub fn resolve(
    host: &str,
    username: Option<&str>,
    password: Option<&str>,
    netrc_file: &str,
) -> Result<Credentials, CredentialError> {
    if let (Some(user), Some(pass)) = (username, password) {
        return Ok(Credentials::new(user, pass));
    }

    let netrc_path = Utf8PathBuf::from(expand_tilde(netrc_file));
    let netrc = read_netrc(&netrc_path)?.unwrap_or_default();
    let entry = netrc.lookup(host).cloned().unwrap_or_default();

    let login = username.map(str::to_owned).or(entry.login);
    let secret = password.map(str::to_owned).or(entry.password);
    match (login, secret) {
        (Some(user), Some(pass)) => {
            debug!(host, netrc = %netrc_path, "resolved control plane credentials");
            Ok(Credentials::new(user, pass))
        }
        _ => Err(CredentialError::Missing {
            host: host.to_owned(),
            netrc: netrc_path,
        }),
    }
}

fn read_netrc(path: &Utf8Path) -> Result<Option<Netrc>, CredentialError> {
    let netrc_error = |message: String| CredentialError::Netrc {
        path: path.to_path_buf(),
        message,
    };
    let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
        return Err(netrc_error(String::from("not a file path")));
    };
    let dir_path = if parent.as_str().is_empty() {
        Utf8Path::new(".")
    } else {
        parent
    };

    let dir = match Dir::open_ambient_dir(dir_path, ambient_authority()) {
        Ok(dir) => dir,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(netrc_error(err.to_string())),
    };
    match dir.read_to_string(name) {
        Ok(content) => Ok(Some(Netrc::parse(&content))),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(netrc = %path, "netrc file not present");
            Ok(None)
        }
        Err(err) => Err(netrc_error(err.to_string())),
    }
}
