//! Read-only queries of managed resources.

use std::fmt;

use thiserror::Error;

use crate::host::{HostError, HostOps};
use crate::plane::{ApplianceSession, PlaneError, PowerState, VmHandle};

use super::LifecycleTarget;

/// A resource whose state the lifecycle manages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resource {
    /// The removable backup volume.
    StorageVolume,
    /// The NFS export of the backup directory.
    ExportEndpoint,
    /// The backup appliance VM.
    ApplianceVm,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StorageVolume => "storage volume",
            Self::ExportEndpoint => "export endpoint",
            Self::ApplianceVm => "appliance",
        })
    }
}

/// Observed condition of a resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ObservedState {
    /// Mounted, exported, or powered on.
    Active,
    /// Unmounted, not exported, or powered off.
    Inactive,
    /// Neither, for example a VM that is suspended or mid-transition.
    Indeterminate(String),
}

/// Raised when a resource's state cannot be determined.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProbeError {
    /// Host query failed.
    #[error("cannot determine {resource} state: {source}")]
    Host {
        /// Resource being probed.
        resource: Resource,
        /// Underlying host failure.
        #[source]
        source: HostError,
    },
    /// Control-plane query failed.
    #[error("cannot determine {resource} state: {source}")]
    Plane {
        /// Resource being probed.
        resource: Resource,
        /// Underlying control-plane failure.
        #[source]
        source: PlaneError,
    },
}

/// Queries resource state without mutating anything.
#[derive(Debug)]
pub struct ResourceProbe<'a, H, S> {
    host: &'a H,
    session: &'a S,
    vm: &'a VmHandle,
    target: &'a LifecycleTarget,
}

impl<'a, H: HostOps, S: ApplianceSession> ResourceProbe<'a, H, S> {
    /// Creates a probe over the given host and control-plane session.
    #[must_use]
    pub const fn new(
        host: &'a H,
        session: &'a S,
        vm: &'a VmHandle,
        target: &'a LifecycleTarget,
    ) -> Self {
        Self {
            host,
            session,
            vm,
            target,
        }
    }

    /// Reports the current state of `resource`.
    ///
    /// The export endpoint matches the backup path exactly; a longer path
    /// sharing the same prefix does not count.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] only when the query itself fails.
    pub async fn probe(&self, resource: Resource) -> Result<ObservedState, ProbeError> {
        let host_error = |source| ProbeError::Host { resource, source };
        let state = match resource {
            Resource::StorageVolume => active_if(
                self.host
                    .is_mounted(&self.target.mount_point)
                    .map_err(host_error)?,
            ),
            Resource::ExportEndpoint => active_if(
                self.host
                    .list_exports()
                    .map_err(host_error)?
                    .contains(&self.target.backup_path),
            ),
            Resource::ApplianceVm => {
                match self
                    .session
                    .power_state(self.vm)
                    .await
                    .map_err(|source| ProbeError::Plane { resource, source })?
                {
                    PowerState::On => ObservedState::Active,
                    PowerState::Off => ObservedState::Inactive,
                    PowerState::Unknown(state) => ObservedState::Indeterminate(state),
                }
            }
        };
        tracing::info!(%resource, ?state, "probed resource");
        Ok(state)
    }
}

const fn active_if(active: bool) -> ObservedState {
    if active {
        ObservedState::Active
    } else {
        ObservedState::Inactive
    }
}
