//! Start and stop sequences for the backup appliance.
//!
//! A start mounts the backup volume, checks the backup directory, exports
//! it over NFS and powers the appliance on. A stop reverses that. Every step
//! probes its resource first: a resource that is already in the target state
//! is reported as a soft warning and left alone, and only resources changed
//! by this invocation are rolled back when a later step fails.

use std::fmt;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::plane::PlaneError;
use crate::retry::RetryPolicy;

mod compensation;
mod orchestrator;
mod probe;
mod session;
mod step;

pub use compensation::{CompensationAction, CompensationPlan, CompensationPlanner};
pub use orchestrator::LifecycleOrchestrator;
pub use probe::{ObservedState, ProbeError, Resource, ResourceProbe};
pub use session::{LifecycleSession, LifecycleState, StepRecord};
pub use step::{MutationError, Step, StepError, StepExecutor, StepOutcome};

/// Default time allowed for the appliance to power off after a guest
/// shutdown request.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(300);

/// Default pause between power-state polls while waiting for shutdown.
pub const DEFAULT_SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Which sequence to run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Bring the backup path online and start the appliance.
    Start,
    /// Stop the appliance and take the backup path offline.
    Stop,
}

impl Operation {
    /// Steps run by this operation, in order.
    #[must_use]
    pub const fn steps(self) -> &'static [Step] {
        match self {
            Self::Start => &[Step::Mount, Step::ValidatePath, Step::Export, Step::PowerOn],
            Self::Stop => &[
                Step::Shutdown,
                Step::Unexport,
                Step::SyncBuffers,
                Step::Unmount,
            ],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
        })
    }
}

/// Resources a lifecycle acts on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LifecycleTarget {
    /// Mount point of the backup volume, as listed in fstab.
    pub mount_point: Utf8PathBuf,
    /// Directory exported to the appliance.
    pub backup_path: Utf8PathBuf,
    /// NFS client allowed to mount the export.
    pub nfs_client: String,
    /// NFS export options.
    pub nfs_options: String,
    /// Inventory name of the appliance VM.
    pub appliance: String,
}

/// Timing knobs for the detach retry and the shutdown wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LifecycleSettings {
    /// Budget for detaching the volume.
    pub detach: RetryPolicy,
    /// Time allowed for the appliance to power off.
    pub shutdown_timeout: Duration,
    /// Pause between power-state polls while waiting.
    pub shutdown_poll_interval: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            detach: RetryPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            shutdown_poll_interval: DEFAULT_SHUTDOWN_POLL_INTERVAL,
        }
    }
}

/// Reason a lifecycle run stopped early.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LifecycleError {
    /// Raised when the control plane rejects the login.
    #[error("control plane login failed: {0}")]
    Auth(#[source] PlaneError),
    /// Raised when the appliance VM cannot be found.
    #[error("appliance lookup failed: {0}")]
    ApplianceLookup(#[source] PlaneError),
    /// Raised when a step hard-fails.
    #[error("{step} failed: {source}")]
    Step {
        /// Step that failed.
        step: Step,
        /// Failure reported by the step.
        #[source]
        source: StepError,
    },
}

/// Result of one lifecycle invocation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunReport {
    /// Sequence that ran.
    pub operation: Operation,
    /// `true` when every step succeeded without a soft warning.
    pub ok: bool,
    /// Warnings raised by already-satisfied steps.
    pub warnings: Vec<String>,
    /// Fatal error, when the run stopped early.
    pub error: Option<LifecycleError>,
    /// Final state machine position.
    pub state: LifecycleState,
}

impl RunReport {
    fn from_session(session: &LifecycleSession, error: Option<LifecycleError>) -> Self {
        Self {
            operation: session.operation(),
            ok: error.is_none() && !session.soft_warning(),
            warnings: session.warnings().to_vec(),
            error,
            state: session.state(),
        }
    }

    /// Process exit status: zero only for a clean run.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.ok && self.warnings.is_empty() {
            0
        } else {
            1
        }
    }

    /// One-line summary suitable for a notification subject.
    #[must_use]
    pub fn summary(&self) -> String {
        match (&self.error, self.warnings.is_empty()) {
            (Some(err), _) => format!("backup {} failed: {err}", self.operation),
            (None, false) => format!(
                "backup {} completed with warnings: {}",
                self.operation,
                self.warnings.join("; ")
            ),
            (None, true) => format!("backup {} completed", self.operation),
        }
    }
}

#[cfg(test)]
mod tests;
