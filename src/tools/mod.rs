//! Helper executable discovery.
//!
//! Tool locations are resolved once at startup against a fixed search path
//! and handed to the host and control-plane adapters as plain values.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Search path used when none is configured.
pub const DEFAULT_TOOL_SEARCH_PATH: &str =
    "/usr/local/sbin:/usr/local/bin:/sbin:/bin:/usr/sbin:/usr/bin";

/// Errors raised while locating helper executables.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ToolError {
    /// Raised when a required executable is not on the search path.
    #[error("{tool} executable not found in {search_path}, is it installed?")]
    Missing {
        /// Executable name.
        tool: String,
        /// Search path that was scanned.
        search_path: String,
    },
}

/// Executables used by the host adapter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostTools {
    /// `sync` binary.
    pub sync: Utf8PathBuf,
    /// `mount` binary.
    pub mount: Utf8PathBuf,
    /// `umount` binary.
    pub umount: Utf8PathBuf,
    /// `exportfs` binary.
    pub exportfs: Utf8PathBuf,
    /// `showmount` binary.
    pub showmount: Utf8PathBuf,
}

/// All helper executables resolved for one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ToolPaths {
    /// Mount, export and sync helpers.
    pub host: HostTools,
    /// vSphere CLI used to drive the appliance.
    pub govc: Utf8PathBuf,
}

impl ToolPaths {
    /// Locates every required executable on `search_path`.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Missing`] for the first executable that cannot be
    /// found.
    pub fn locate(search_path: &str) -> Result<Self, ToolError> {
        let require = |tool: &str| {
            find_executable(tool, search_path).ok_or_else(|| ToolError::Missing {
                tool: tool.to_owned(),
                search_path: search_path.to_owned(),
            })
        };

        Ok(Self {
            host: HostTools {
                exportfs: require("exportfs")?,
                showmount: require("showmount")?,
                sync: require("sync")?,
                mount: require("mount")?,
                umount: require("umount")?,
            },
            govc: require("govc")?,
        })
    }
}

/// Returns the first executable called `name` in the colon-separated
/// `search_path`. Empty entries are skipped rather than meaning the current
/// directory.
#[must_use]
pub fn find_executable(name: &str, search_path: &str) -> Option<Utf8PathBuf> {
    let dirs: Vec<&str> = search_path
        .split(':')
        .filter(|dir| !dir.trim().is_empty())
        .collect();
    if dirs.is_empty() {
        return None;
    }
    let found = which::which_in(name, Some(dirs.join(":")), "/").ok()?;
    Utf8PathBuf::from_path_buf(found).ok()
}
