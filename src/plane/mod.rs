//! Virtualization control-plane abstraction.
//!
//! The appliance is a VM managed by a vCenter or ESXi host. A
//! [`ControlPlane`] authenticates and hands back an [`ApplianceSession`]
//! used to look up the VM and drive its power state.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::runner::CommandError;

mod govc;

pub use govc::{GovcControlPlane, GovcSession};

/// Future returned by control-plane operations.
///
/// The rotator drives one session on a single thread, so futures are not
/// required to be `Send`.
pub type PlaneFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PlaneError>> + 'a>>;

/// Username and password for the control plane.
#[derive(Clone, Eq, PartialEq)]
pub struct Credentials {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl Credentials {
    /// Creates a credential pair.
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Power state reported for a VM.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PowerState {
    /// Running.
    On,
    /// Fully powered off.
    Off,
    /// Anything else (suspended, mid-transition, unrecognised).
    Unknown(String),
}

impl PowerState {
    /// Maps a vSphere `runtime.powerState` value.
    #[must_use]
    pub fn from_vsphere(value: &str) -> Self {
        match value {
            "poweredOn" => Self::On,
            "poweredOff" => Self::Off,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::On => f.write_str("powered on"),
            Self::Off => f.write_str("powered off"),
            Self::Unknown(state) => write!(f, "{state}"),
        }
    }
}

/// Reference to a VM found through an [`ApplianceSession`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VmHandle {
    /// Inventory name of the VM.
    pub name: String,
}

/// Errors raised by the control plane.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PlaneError {
    /// Raised when the control plane rejects the connection or credentials.
    #[error("failed to connect to {host}: {message}")]
    Auth {
        /// Control-plane host.
        host: String,
        /// Reason reported by the control plane.
        message: String,
    },
    /// Raised when the named VM does not exist.
    #[error("virtual machine {name} not found")]
    NotFound {
        /// VM name that was looked up.
        name: String,
    },
    /// Raised when a control-plane command fails.
    #[error("{action} failed for {name}: {message}")]
    Operation {
        /// Operation that failed (for example `power on`).
        action: String,
        /// VM name.
        name: String,
        /// Reason reported by the control plane.
        message: String,
    },
    /// Raised when control-plane output cannot be parsed.
    #[error("failed to parse control plane output: {message}")]
    Parse {
        /// Parser error message.
        message: String,
    },
    /// Raised when the control-plane client cannot be run.
    #[error(transparent)]
    Runner(#[from] CommandError),
}

/// Entry point to the virtualization control plane.
pub trait ControlPlane {
    /// Authenticated session type.
    type Session: ApplianceSession;

    /// Authenticates against `host`.
    fn connect<'a>(
        &'a self,
        host: &'a str,
        credentials: &'a Credentials,
    ) -> PlaneFuture<'a, Self::Session>;
}

/// Operations available once authenticated.
pub trait ApplianceSession {
    /// Looks up a VM by inventory name.
    fn find_vm<'a>(&'a self, name: &'a str) -> PlaneFuture<'a, VmHandle>;

    /// Reports the current power state of `vm`.
    fn power_state<'a>(&'a self, vm: &'a VmHandle) -> PlaneFuture<'a, PowerState>;

    /// Powers `vm` on.
    fn power_on<'a>(&'a self, vm: &'a VmHandle) -> PlaneFuture<'a, ()>;

    /// Requests a clean guest OS shutdown of `vm`.
    fn shutdown_guest<'a>(&'a self, vm: &'a VmHandle) -> PlaneFuture<'a, ()>;
}
