//! [`ControlPlane`] implementation driving the `govc` vSphere CLI.
//!
//! Credentials travel through the `GOVC_*` environment variables so they
//! never appear in the argument vector.

use std::ffi::OsString;

use camino::Utf8PathBuf;
use serde::Deserialize;
use tracing::{debug, info};

use super::{
    ApplianceSession, ControlPlane, Credentials, PlaneError, PlaneFuture, PowerState, VmHandle,
};
use crate::runner::{CommandOutput, CommandRunner, RunOptions};

/// Control plane reached through `govc`.
#[derive(Clone, Debug)]
pub struct GovcControlPlane<R: CommandRunner + Clone> {
    govc_bin: Utf8PathBuf,
    insecure: bool,
    runner: R,
}

impl<R: CommandRunner + Clone> GovcControlPlane<R> {
    /// Creates a control plane using the given `govc` binary.
    ///
    /// `insecure` skips TLS certificate verification (`GOVC_INSECURE`).
    #[must_use]
    pub const fn new(govc_bin: Utf8PathBuf, insecure: bool, runner: R) -> Self {
        Self {
            govc_bin,
            insecure,
            runner,
        }
    }
}

/// Authenticated `govc` session.
#[derive(Clone, Debug)]
pub struct GovcSession<R: CommandRunner + Clone> {
    govc_bin: Utf8PathBuf,
    options: RunOptions,
    runner: R,
}

impl<R: CommandRunner + Clone> ControlPlane for GovcControlPlane<R> {
    type Session = GovcSession<R>;

    fn connect<'a>(
        &'a self,
        host: &'a str,
        credentials: &'a Credentials,
    ) -> PlaneFuture<'a, Self::Session> {
        Box::pin(async move {
            let mut options = RunOptions::default()
                .env("GOVC_URL", host)
                .env("GOVC_USERNAME", credentials.username.as_str())
                .env("GOVC_PASSWORD", credentials.password.as_str());
            if self.insecure {
                options = options.env("GOVC_INSECURE", "1");
            }

            let session = GovcSession {
                govc_bin: self.govc_bin.clone(),
                options,
                runner: self.runner.clone(),
            };
            let output = session.run(&["about"])?;
            if !output.is_success() {
                return Err(PlaneError::Auth {
                    host: host.to_owned(),
                    message: failure_message(&output),
                });
            }

            info!(host, "connected to control plane");
            Ok(session)
        })
    }
}

impl<R: CommandRunner + Clone> GovcSession<R> {
    fn run(&self, args: &[&str]) -> Result<CommandOutput, PlaneError> {
        let os_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        Ok(self
            .runner
            .run_with(self.govc_bin.as_str(), &os_args, &self.options)?)
    }

    fn run_vm_action(&self, action: &str, args: &[&str], vm: &VmHandle) -> Result<(), PlaneError> {
        let output = self.run(args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(PlaneError::Operation {
            action: action.to_owned(),
            name: vm.name.clone(),
            message: failure_message(&output),
        })
    }

    fn vm_info(&self, name: &str) -> Result<Option<VmInfo>, PlaneError> {
        let output = self.run(&["vm.info", "-json", name])?;
        if !output.is_success() {
            return Err(PlaneError::Operation {
                action: String::from("vm.info"),
                name: name.to_owned(),
                message: failure_message(&output),
            });
        }

        let response: VmInfoResponse =
            serde_json::from_str(&output.stdout).map_err(|err| PlaneError::Parse {
                message: err.to_string(),
            })?;
        Ok(response
            .virtual_machines
            .unwrap_or_default()
            .into_iter()
            .find(|vm| vm.name == name))
    }
}

impl<R: CommandRunner + Clone> ApplianceSession for GovcSession<R> {
    fn find_vm<'a>(&'a self, name: &'a str) -> PlaneFuture<'a, VmHandle> {
        Box::pin(async move {
            self.vm_info(name)?
                .map(|vm| VmHandle { name: vm.name })
                .ok_or_else(|| PlaneError::NotFound {
                    name: name.to_owned(),
                })
        })
    }

    fn power_state<'a>(&'a self, vm: &'a VmHandle) -> PlaneFuture<'a, PowerState> {
        Box::pin(async move {
            let info = self.vm_info(&vm.name)?.ok_or_else(|| PlaneError::NotFound {
                name: vm.name.clone(),
            })?;
            let state = PowerState::from_vsphere(&info.runtime.power_state);
            debug!(vm = %vm.name, %state, "queried power state");
            Ok(state)
        })
    }

    fn power_on<'a>(&'a self, vm: &'a VmHandle) -> PlaneFuture<'a, ()> {
        Box::pin(async move {
            self.run_vm_action("power on", &["vm.power", "-on", vm.name.as_str()], vm)
        })
    }

    fn shutdown_guest<'a>(&'a self, vm: &'a VmHandle) -> PlaneFuture<'a, ()> {
        Box::pin(async move {
            self.run_vm_action("guest shutdown", &["vm.power", "-s", vm.name.as_str()], vm)
        })
    }
}

fn failure_message(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        format!("govc exited with status {}", output.status_text())
    } else {
        stderr.to_owned()
    }
}

#[derive(Debug, Deserialize)]
struct VmInfoResponse {
    #[serde(default, rename = "virtualMachines", alias = "VirtualMachines")]
    virtual_machines: Option<Vec<VmInfo>>,
}

#[derive(Debug, Deserialize)]
struct VmInfo {
    #[serde(rename = "name", alias = "Name")]
    name: String,
    #[serde(rename = "runtime", alias = "Runtime")]
    runtime: VmRuntime,
}

#[derive(Debug, Deserialize)]
struct VmRuntime {
    #[serde(rename = "powerState", alias = "PowerState")]
    power_state: String,
}
