//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::{Mutex, MutexGuard};

use crate::host::{HostError, HostOps};
use crate::plane::{
    ApplianceSession, ControlPlane, Credentials, PlaneError, PlaneFuture, PowerState, VmHandle,
};
use crate::runner::{CommandError, CommandOutput, CommandRunner, RunOptions};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Environment and stdin supplied with the call.
    pub options: RunOptions,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Looks up an environment variable passed with the call.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.options
            .env
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        self.run_with(program, args, &RunOptions::default())
    }

    fn run_with(
        &self,
        program: &str,
        args: &[OsString],
        options: &RunOptions,
    ) -> Result<CommandOutput, CommandError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            options: options.clone(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Produces a minimal JSON payload matching `govc vm.info -json`.
#[must_use]
pub fn json_vm_info(vms: &[(&str, &str)]) -> String {
    let items = vms
        .iter()
        .map(|(name, state)| {
            format!("{{\"name\":\"{name}\",\"runtime\":{{\"powerState\":\"{state}\"}}}}")
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("{{\"virtualMachines\":[{items}]}}")
}

/// Host primitive recorded by [`FakeHost`].
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum HostCall {
    /// Mount table query.
    IsMounted,
    /// Volume mount.
    Mount,
    /// Volume unmount.
    Unmount,
    /// Export table query.
    ListExports,
    /// Path export.
    Export,
    /// Path unexport.
    Unexport,
    /// Buffer flush.
    SyncBuffers,
    /// Volume wake signal.
    Wake,
    /// Backup directory validation.
    ValidatePath,
}

impl HostCall {
    const fn is_query(self) -> bool {
        matches!(self, Self::IsMounted | Self::ListExports | Self::Wake)
    }
}

#[derive(Debug, Default)]
struct HostState {
    mounted: bool,
    exports: BTreeSet<Utf8PathBuf>,
    failures: BTreeMap<HostCall, u32>,
    calls: Vec<HostCall>,
}

/// In-memory [`HostOps`] with injectable failures.
#[derive(Clone, Debug, Default)]
pub struct FakeHost {
    state: Rc<RefCell<HostState>>,
}

impl FakeHost {
    /// Creates a host with the volume unmounted and nothing exported.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the volume as already mounted.
    pub fn set_mounted(&self, mounted: bool) {
        self.state.borrow_mut().mounted = mounted;
    }

    /// Marks `path` as already exported.
    pub fn add_export(&self, path: impl Into<Utf8PathBuf>) {
        self.state.borrow_mut().exports.insert(path.into());
    }

    /// Makes the next `times` invocations of `call` fail.
    pub fn fail_next(&self, call: HostCall, times: u32) {
        self.state.borrow_mut().failures.insert(call, times);
    }

    /// Makes every invocation of `call` fail.
    pub fn fail_always(&self, call: HostCall) {
        self.fail_next(call, u32::MAX);
    }

    /// Returns `true` while the volume is mounted.
    #[must_use]
    pub fn is_volume_mounted(&self) -> bool {
        self.state.borrow().mounted
    }

    /// Returns `true` while `path` is exported.
    #[must_use]
    pub fn is_exported(&self, path: &Utf8Path) -> bool {
        self.state.borrow().exports.contains(path)
    }

    /// Returns every recorded call, queries included.
    #[must_use]
    pub fn calls(&self) -> Vec<HostCall> {
        self.state.borrow().calls.clone()
    }

    /// Returns recorded calls that are not pure queries.
    #[must_use]
    pub fn mutating_calls(&self) -> Vec<HostCall> {
        self.calls()
            .into_iter()
            .filter(|call| !call.is_query())
            .collect()
    }

    fn enter(&self, call: HostCall) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        state.calls.push(call);
        let Some(remaining) = state.failures.get_mut(&call) else {
            return Ok(());
        };
        if *remaining == 0 {
            return Ok(());
        }
        if *remaining != u32::MAX {
            *remaining -= 1;
        }
        Err(HostError::CommandFailure {
            program: format!("{call:?}").to_lowercase(),
            status: Some(32),
            status_text: String::from("32"),
            stderr: String::from("simulated failure"),
        })
    }
}

impl HostOps for FakeHost {
    fn is_mounted(&self, _mount_point: &Utf8Path) -> Result<bool, HostError> {
        self.enter(HostCall::IsMounted)?;
        Ok(self.state.borrow().mounted)
    }

    fn mount(&self, _mount_point: &Utf8Path) -> Result<(), HostError> {
        self.enter(HostCall::Mount)?;
        self.state.borrow_mut().mounted = true;
        Ok(())
    }

    fn unmount(&self, _mount_point: &Utf8Path) -> Result<(), HostError> {
        self.enter(HostCall::Unmount)?;
        self.state.borrow_mut().mounted = false;
        Ok(())
    }

    fn list_exports(&self) -> Result<BTreeSet<Utf8PathBuf>, HostError> {
        self.enter(HostCall::ListExports)?;
        Ok(self.state.borrow().exports.clone())
    }

    fn export(&self, path: &Utf8Path, _client: &str, _options: &str) -> Result<(), HostError> {
        self.enter(HostCall::Export)?;
        self.state.borrow_mut().exports.insert(path.to_path_buf());
        Ok(())
    }

    fn unexport(&self, path: &Utf8Path, _client: &str) -> Result<(), HostError> {
        self.enter(HostCall::Unexport)?;
        self.state.borrow_mut().exports.remove(path);
        Ok(())
    }

    fn sync_buffers(&self) -> Result<(), HostError> {
        self.enter(HostCall::SyncBuffers)
    }

    fn wake(&self, _mount_point: &Utf8Path) -> Result<(), HostError> {
        self.enter(HostCall::Wake)
    }

    fn validate_backup_path(&self, path: &Utf8Path) -> Result<(), HostError> {
        self.enter(HostCall::ValidatePath).map_err(|_| HostError::InvalidBackupPath {
            path: path.to_path_buf(),
            reason: String::from("not found"),
        })
    }
}

/// Control-plane operation recorded by [`FakeControlPlane`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PlaneCall {
    /// Authentication.
    Connect,
    /// VM lookup.
    FindVm,
    /// Power state query.
    PowerState,
    /// Power on request.
    PowerOn,
    /// Guest shutdown request.
    Shutdown,
}

#[derive(Debug)]
struct PlaneState {
    vm_name: String,
    power: PowerState,
    reject_auth: bool,
    fail_power_on: bool,
    fail_shutdown: bool,
    ignore_shutdown: bool,
    calls: Vec<PlaneCall>,
}

/// In-memory [`ControlPlane`] hosting a single appliance VM.
#[derive(Clone, Debug)]
pub struct FakeControlPlane {
    state: Rc<RefCell<PlaneState>>,
}

/// Session handed out by [`FakeControlPlane`].
#[derive(Clone, Debug)]
pub struct FakeSession {
    state: Rc<RefCell<PlaneState>>,
}

impl FakeControlPlane {
    /// Creates a plane with one powered-off VM called `vm_name`.
    #[must_use]
    pub fn new(vm_name: impl Into<String>) -> Self {
        Self {
            state: Rc::new(RefCell::new(PlaneState {
                vm_name: vm_name.into(),
                power: PowerState::Off,
                reject_auth: false,
                fail_power_on: false,
                fail_shutdown: false,
                ignore_shutdown: false,
                calls: Vec::new(),
            })),
        }
    }

    /// Sets the reported power state.
    pub fn set_power(&self, power: PowerState) {
        self.state.borrow_mut().power = power;
    }

    /// Rejects every connection attempt.
    pub fn reject_auth(&self) {
        self.state.borrow_mut().reject_auth = true;
    }

    /// Makes power-on requests fail.
    pub fn fail_power_on(&self) {
        self.state.borrow_mut().fail_power_on = true;
    }

    /// Makes guest shutdown requests fail.
    pub fn fail_shutdown(&self) {
        self.state.borrow_mut().fail_shutdown = true;
    }

    /// Accepts shutdown requests but leaves the VM running.
    pub fn ignore_shutdown(&self) {
        self.state.borrow_mut().ignore_shutdown = true;
    }

    /// Returns the current power state.
    #[must_use]
    pub fn power(&self) -> PowerState {
        self.state.borrow().power.clone()
    }

    /// Returns every recorded call.
    #[must_use]
    pub fn calls(&self) -> Vec<PlaneCall> {
        self.state.borrow().calls.clone()
    }
}

impl ControlPlane for FakeControlPlane {
    type Session = FakeSession;

    fn connect<'a>(
        &'a self,
        host: &'a str,
        _credentials: &'a Credentials,
    ) -> PlaneFuture<'a, Self::Session> {
        Box::pin(async move {
            let mut state = self.state.borrow_mut();
            state.calls.push(PlaneCall::Connect);
            if state.reject_auth {
                return Err(PlaneError::Auth {
                    host: host.to_owned(),
                    message: String::from("incorrect user name or password"),
                });
            }
            Ok(FakeSession {
                state: Rc::clone(&self.state),
            })
        })
    }
}

impl FakeSession {
    fn record(&self, call: PlaneCall) {
        self.state.borrow_mut().calls.push(call);
    }
}

impl ApplianceSession for FakeSession {
    fn find_vm<'a>(&'a self, name: &'a str) -> PlaneFuture<'a, VmHandle> {
        Box::pin(async move {
            self.record(PlaneCall::FindVm);
            if self.state.borrow().vm_name == name {
                Ok(VmHandle {
                    name: name.to_owned(),
                })
            } else {
                Err(PlaneError::NotFound {
                    name: name.to_owned(),
                })
            }
        })
    }

    fn power_state<'a>(&'a self, _vm: &'a VmHandle) -> PlaneFuture<'a, PowerState> {
        Box::pin(async move {
            self.record(PlaneCall::PowerState);
            Ok(self.state.borrow().power.clone())
        })
    }

    fn power_on<'a>(&'a self, vm: &'a VmHandle) -> PlaneFuture<'a, ()> {
        Box::pin(async move {
            self.record(PlaneCall::PowerOn);
            let mut state = self.state.borrow_mut();
            if state.fail_power_on {
                return Err(PlaneError::Operation {
                    action: String::from("power on"),
                    name: vm.name.clone(),
                    message: String::from("simulated failure"),
                });
            }
            state.power = PowerState::On;
            Ok(())
        })
    }

    fn shutdown_guest<'a>(&'a self, vm: &'a VmHandle) -> PlaneFuture<'a, ()> {
        Box::pin(async move {
            self.record(PlaneCall::Shutdown);
            let mut state = self.state.borrow_mut();
            if state.fail_shutdown {
                return Err(PlaneError::Operation {
                    action: String::from("guest shutdown"),
                    name: vm.name.clone(),
                    message: String::from("simulated failure"),
                });
            }
            if !state.ignore_shutdown {
                state.power = PowerState::Off;
            }
            Ok(())
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
