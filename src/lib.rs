//! Core library for the bdsrotator backup disk rotation tool.
//!
//! The crate hands a removable backup disk to a backup appliance VM and
//! takes it back: `start` mounts the volume, validates the backup directory,
//! exports it over NFS and powers the appliance on; `stop` shuts the
//! appliance down and releases the disk. Partial runs are rolled back for
//! whatever the run itself changed.

pub mod config;
pub mod credentials;
pub mod host;
pub mod lifecycle;
pub mod notify;
pub mod plane;
pub mod retry;
pub mod runner;
pub mod telemetry;
pub mod test_support;
pub mod tools;

pub use config::{ConfigError, ConfigOverrides, RotatorConfig};
pub use credentials::CredentialError;
pub use host::{HostError, HostOps, SystemHost};
pub use lifecycle::{
    LifecycleError, LifecycleOrchestrator, LifecycleSettings, LifecycleState, LifecycleTarget,
    Operation, RunReport, Step, StepOutcome,
};
pub use notify::{
    MailIdentity, MailTransport, Notifier, NotifyError, SendmailNotifier, SmtpNotifier,
};
pub use plane::{
    ApplianceSession, ControlPlane, Credentials, GovcControlPlane, PlaneError, PowerState,
    VmHandle,
};
pub use retry::{RetryExhausted, RetryPolicy};
pub use runner::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner, RunOptions};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use tools::{HostTools, ToolError, ToolPaths, find_executable};
