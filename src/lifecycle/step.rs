//! Individual lifecycle steps and their execution.

use std::fmt;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, info};

use crate::host::{HostError, HostOps};
use crate::plane::{ApplianceSession, PlaneError, PowerState, VmHandle};

use super::compensation::CompensationAction;
use super::probe::{ObservedState, ProbeError, Resource, ResourceProbe};
use super::session::LifecycleState;
use super::{LifecycleSettings, LifecycleTarget};

/// One operation in a lifecycle sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Step {
    /// Mount the backup volume.
    Mount,
    /// Check the backup directory is usable.
    ValidatePath,
    /// Export the backup directory to the appliance.
    Export,
    /// Power the appliance on.
    PowerOn,
    /// Shut the appliance's guest OS down.
    Shutdown,
    /// Withdraw the export.
    Unexport,
    /// Flush buffers to disk.
    SyncBuffers,
    /// Detach the backup volume.
    Unmount,
}

impl Step {
    /// Whether a successful run of this step changes a resource.
    #[must_use]
    pub const fn mutates(self) -> bool {
        !matches!(self, Self::ValidatePath | Self::SyncBuffers)
    }

    /// Actions that undo this step, in execution order.
    ///
    /// Power transitions have no automatic inverse, and neither do the
    /// teardown steps.
    #[must_use]
    pub const fn inverse(self) -> &'static [CompensationAction] {
        match self {
            Self::Mount => &[CompensationAction::SyncBuffers, CompensationAction::Unmount],
            Self::Export => &[CompensationAction::Unexport],
            Self::ValidatePath
            | Self::PowerOn
            | Self::Shutdown
            | Self::Unexport
            | Self::SyncBuffers
            | Self::Unmount => &[],
        }
    }

    /// State the lifecycle reaches once this step completes.
    #[must_use]
    pub const fn reached_state(self) -> LifecycleState {
        match self {
            Self::Mount => LifecycleState::VolumeMounted,
            Self::ValidatePath => LifecycleState::PathValidated,
            Self::Export => LifecycleState::Exported,
            Self::PowerOn => LifecycleState::PoweredOn,
            Self::Shutdown => LifecycleState::ApplianceShutdown,
            Self::Unexport => LifecycleState::Unexported,
            Self::SyncBuffers => LifecycleState::BufferSynced,
            Self::Unmount => LifecycleState::VolumeUnmounted,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Mount => "mount volume",
            Self::ValidatePath => "validate backup path",
            Self::Export => "export path",
            Self::PowerOn => "power on appliance",
            Self::Shutdown => "shut down appliance",
            Self::Unexport => "unexport path",
            Self::SyncBuffers => "sync buffers",
            Self::Unmount => "unmount volume",
        })
    }
}

/// Failure of an underlying mount, export, or power call.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum MutationError {
    /// Host primitive failed.
    #[error(transparent)]
    Host(#[from] HostError),
    /// Control-plane call failed.
    #[error(transparent)]
    Plane(#[from] PlaneError),
}

/// Reason a step hard-failed.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StepError {
    /// Resource state could not be determined.
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// The mutating call failed.
    #[error(transparent)]
    Mutation(#[from] MutationError),
    /// The appliance is in a state the step cannot act on.
    #[error("appliance {name} is in state {state}")]
    PowerState {
        /// VM name.
        name: String,
        /// Reported power state.
        state: String,
    },
    /// The appliance did not power off in time.
    #[error("appliance {name} still running {waited_secs}s after guest shutdown")]
    ShutdownTimeout {
        /// VM name.
        name: String,
        /// Seconds waited.
        waited_secs: u64,
    },
    /// Every detach attempt failed.
    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: HostError,
    },
}

impl From<HostError> for StepError {
    fn from(value: HostError) -> Self {
        Self::Mutation(MutationError::Host(value))
    }
}

impl From<PlaneError> for StepError {
    fn from(value: PlaneError) -> Self {
        Self::Mutation(MutationError::Plane(value))
    }
}

/// Classified result of executing one step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    /// The step changed the resource.
    Success,
    /// The resource was already in the target state; nothing was changed.
    AlreadySatisfied(String),
    /// The step failed.
    HardFailure(StepError),
}

impl StepOutcome {
    fn already(warning: &str) -> Self {
        Self::AlreadySatisfied(warning.to_owned())
    }
}

/// Probes, then mutates, one resource per step.
#[derive(Debug)]
pub struct StepExecutor<'a, H, S> {
    host: &'a H,
    session: &'a S,
    vm: &'a VmHandle,
    target: &'a LifecycleTarget,
    settings: &'a LifecycleSettings,
    probe: ResourceProbe<'a, H, S>,
}

impl<'a, H: HostOps, S: ApplianceSession> StepExecutor<'a, H, S> {
    /// Creates an executor for one lifecycle session.
    #[must_use]
    pub const fn new(
        host: &'a H,
        session: &'a S,
        vm: &'a VmHandle,
        target: &'a LifecycleTarget,
        settings: &'a LifecycleSettings,
    ) -> Self {
        Self {
            host,
            session,
            vm,
            target,
            settings,
            probe: ResourceProbe::new(host, session, vm, target),
        }
    }

    /// Runs `step` and classifies the result.
    pub async fn execute(&self, step: Step) -> StepOutcome {
        match self.try_execute(step).await {
            Ok(outcome) => outcome,
            Err(err) => StepOutcome::HardFailure(err),
        }
    }

    /// Runs one compensating action without probing first.
    ///
    /// # Errors
    ///
    /// Returns [`StepError`] when the action fails.
    pub async fn compensate(&self, action: CompensationAction) -> Result<(), StepError> {
        match action {
            CompensationAction::Unexport => Ok(self
                .host
                .unexport(&self.target.backup_path, &self.target.nfs_client)?),
            CompensationAction::SyncBuffers => Ok(self.host.sync_buffers()?),
            CompensationAction::Unmount => self.detach().await,
        }
    }

    async fn try_execute(&self, step: Step) -> Result<StepOutcome, StepError> {
        let target = self.target;
        match step {
            Step::Mount => {
                if self.probe.probe(Resource::StorageVolume).await? == ObservedState::Active {
                    return Ok(StepOutcome::already("volume already mounted"));
                }
                self.host.mount(&target.mount_point)?;
            }
            Step::ValidatePath => self.host.validate_backup_path(&target.backup_path)?,
            Step::Export => {
                if self.probe.probe(Resource::ExportEndpoint).await? == ObservedState::Active {
                    return Ok(StepOutcome::already("path already exported"));
                }
                self.host
                    .export(&target.backup_path, &target.nfs_client, &target.nfs_options)?;
            }
            Step::PowerOn => match self.probe.probe(Resource::ApplianceVm).await? {
                ObservedState::Active => {
                    return Ok(StepOutcome::already("appliance already powered on"));
                }
                ObservedState::Inactive => {
                    self.session.power_on(self.vm).await?;
                    info!(vm = %self.vm.name, "appliance power on initiated");
                }
                ObservedState::Indeterminate(state) => return Err(self.power_state_error(state)),
            },
            Step::Shutdown => match self.probe.probe(Resource::ApplianceVm).await? {
                ObservedState::Active => {
                    self.session.shutdown_guest(self.vm).await?;
                    info!(vm = %self.vm.name, "appliance shutdown initiated");
                    self.wait_for_power_off().await?;
                }
                ObservedState::Inactive => {
                    return Ok(StepOutcome::already("appliance already powered off"));
                }
                ObservedState::Indeterminate(state) => return Err(self.power_state_error(state)),
            },
            Step::Unexport => {
                if self.probe.probe(Resource::ExportEndpoint).await? == ObservedState::Inactive {
                    return Ok(StepOutcome::already("path not exported"));
                }
                self.host.unexport(&target.backup_path, &target.nfs_client)?;
            }
            Step::SyncBuffers => self.host.sync_buffers()?,
            Step::Unmount => {
                if self.probe.probe(Resource::StorageVolume).await? == ObservedState::Inactive {
                    return Ok(StepOutcome::already("volume already unmounted"));
                }
                self.detach().await?;
            }
        }
        Ok(StepOutcome::Success)
    }

    fn power_state_error(&self, state: String) -> StepError {
        StepError::PowerState {
            name: self.vm.name.clone(),
            state,
        }
    }

    /// Polls until the appliance reports powered off. A timeout too large
    /// to represent as an `Instant` waits without a deadline.
    async fn wait_for_power_off(&self) -> Result<(), StepError> {
        let started = Instant::now();
        let deadline = started.checked_add(self.settings.shutdown_timeout);
        loop {
            if self.session.power_state(self.vm).await? == PowerState::Off {
                info!(vm = %self.vm.name, "appliance powered off");
                return Ok(());
            }
            let poll = self.settings.shutdown_poll_interval;
            let pause = match deadline {
                Some(limit) if Instant::now() >= limit => {
                    return Err(StepError::ShutdownTimeout {
                        name: self.vm.name.clone(),
                        waited_secs: started.elapsed().as_secs(),
                    });
                }
                Some(limit) => poll.min(remaining(limit)),
                None => poll,
            };
            debug!(vm = %self.vm.name, "waiting for appliance to power off");
            sleep(pause).await;
        }
    }

    async fn detach(&self) -> Result<(), StepError> {
        let mount_point = &self.target.mount_point;
        self.settings
            .detach
            .run(|attempt| {
                if let Err(err) = self.host.wake(mount_point) {
                    debug!(attempt, error = %err, "wake signal failed");
                }
                self.host.unmount(mount_point)
            })
            .await
            .map_err(|exhausted| StepError::RetryExhausted {
                attempts: exhausted.attempts,
                last: exhausted.last,
            })
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}
