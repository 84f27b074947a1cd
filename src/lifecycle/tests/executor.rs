//! Probe-first step execution.

use rstest::rstest;

use super::super::*;
use super::{APPLIANCE, BACKUP_PATH, backup_path, settings, target};
use crate::host::HostError;
use crate::plane::{ApplianceSession, ControlPlane, Credentials, PowerState, VmHandle};
use crate::test_support::{FakeControlPlane, FakeHost, FakeSession, HostCall, PlaneCall};

async fn open(plane: &FakeControlPlane) -> (FakeSession, VmHandle) {
    let credentials = Credentials::new("backup-operator", "secret");
    let session = plane
        .connect("vcenter.example.test", &credentials)
        .await
        .expect("fake plane accepts login");
    let vm = session.find_vm(APPLIANCE).await.expect("appliance exists");
    (session, vm)
}

#[rstest]
#[tokio::test]
async fn mount_on_mounted_volume_is_already_satisfied(
    target: LifecycleTarget,
    settings: LifecycleSettings,
) {
    let host = FakeHost::new();
    host.set_mounted(true);
    let plane = FakeControlPlane::new(APPLIANCE);
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(Step::Mount).await;

    assert_eq!(
        outcome,
        StepOutcome::AlreadySatisfied(String::from("volume already mounted"))
    );
    assert!(host.mutating_calls().is_empty());
}

#[rstest]
#[tokio::test]
async fn export_matches_exact_path_only(target: LifecycleTarget, settings: LifecycleSettings) {
    let host = FakeHost::new();
    host.add_export(format!("{BACKUP_PATH}-old"));
    let plane = FakeControlPlane::new(APPLIANCE);
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(Step::Export).await;

    assert_eq!(outcome, StepOutcome::Success);
    assert!(host.is_exported(&backup_path()));
}

#[rstest]
#[case(Step::Export, "path already exported")]
#[case(Step::Unmount, "volume already unmounted")]
#[tokio::test]
async fn warnings_name_the_resource(
    target: LifecycleTarget,
    settings: LifecycleSettings,
    #[case] step: Step,
    #[case] warning: &str,
) {
    let host = FakeHost::new();
    host.add_export(backup_path());
    let plane = FakeControlPlane::new(APPLIANCE);
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(step).await;

    assert_eq!(outcome, StepOutcome::AlreadySatisfied(warning.to_owned()));
}

#[rstest]
#[tokio::test]
async fn unexport_of_unexported_path_is_already_satisfied(
    target: LifecycleTarget,
    settings: LifecycleSettings,
) {
    let host = FakeHost::new();
    let plane = FakeControlPlane::new(APPLIANCE);
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(Step::Unexport).await;

    assert_eq!(
        outcome,
        StepOutcome::AlreadySatisfied(String::from("path not exported"))
    );
    assert!(!host.calls().contains(&HostCall::Unexport));
}

#[rstest]
#[tokio::test]
async fn power_on_skips_running_appliance(target: LifecycleTarget, settings: LifecycleSettings) {
    let host = FakeHost::new();
    let plane = FakeControlPlane::new(APPLIANCE);
    plane.set_power(PowerState::On);
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(Step::PowerOn).await;

    assert_eq!(
        outcome,
        StepOutcome::AlreadySatisfied(String::from("appliance already powered on"))
    );
    assert!(!plane.calls().contains(&PlaneCall::PowerOn));
}

#[rstest]
#[tokio::test]
async fn suspended_appliance_is_a_hard_failure(
    target: LifecycleTarget,
    settings: LifecycleSettings,
) {
    let host = FakeHost::new();
    let plane = FakeControlPlane::new(APPLIANCE);
    plane.set_power(PowerState::Unknown(String::from("suspended")));
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(Step::PowerOn).await;

    assert_eq!(
        outcome,
        StepOutcome::HardFailure(StepError::PowerState {
            name: String::from(APPLIANCE),
            state: String::from("suspended"),
        })
    );
}

#[rstest]
#[tokio::test]
async fn shutdown_waits_for_power_off(target: LifecycleTarget, settings: LifecycleSettings) {
    let host = FakeHost::new();
    let plane = FakeControlPlane::new(APPLIANCE);
    plane.set_power(PowerState::On);
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(Step::Shutdown).await;

    assert_eq!(outcome, StepOutcome::Success);
    assert_eq!(plane.power(), PowerState::Off);
}

#[rstest]
#[tokio::test]
async fn shutdown_times_out_when_appliance_keeps_running(
    target: LifecycleTarget,
    settings: LifecycleSettings,
) {
    let host = FakeHost::new();
    let plane = FakeControlPlane::new(APPLIANCE);
    plane.set_power(PowerState::On);
    plane.ignore_shutdown();
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(Step::Shutdown).await;

    assert!(
        matches!(
            outcome,
            StepOutcome::HardFailure(StepError::ShutdownTimeout { ref name, .. })
                if name == APPLIANCE
        ),
        "unexpected outcome: {outcome:?}"
    );
}

#[rstest]
#[tokio::test]
async fn unmount_succeeds_on_final_attempt(target: LifecycleTarget, settings: LifecycleSettings) {
    let host = FakeHost::new();
    host.set_mounted(true);
    host.fail_next(HostCall::Unmount, 4);
    let plane = FakeControlPlane::new(APPLIANCE);
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(Step::Unmount).await;

    assert_eq!(outcome, StepOutcome::Success);
    assert!(!host.is_volume_mounted());
    let calls = host.calls();
    let count = |wanted: HostCall| calls.iter().filter(|call| **call == wanted).count();
    assert_eq!(count(HostCall::Unmount), 5);
    assert_eq!(count(HostCall::Wake), 5);
}

#[rstest]
#[tokio::test]
async fn unmount_reports_exhausted_budget(target: LifecycleTarget, settings: LifecycleSettings) {
    let host = FakeHost::new();
    host.set_mounted(true);
    host.fail_always(HostCall::Unmount);
    let plane = FakeControlPlane::new(APPLIANCE);
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(Step::Unmount).await;

    assert!(
        matches!(
            outcome,
            StepOutcome::HardFailure(StepError::RetryExhausted {
                attempts: 5,
                last: HostError::CommandFailure { .. },
            })
        ),
        "unexpected outcome: {outcome:?}"
    );
    assert!(host.is_volume_mounted());
}

#[rstest]
#[tokio::test]
async fn probe_failure_is_a_hard_failure(target: LifecycleTarget, settings: LifecycleSettings) {
    let host = FakeHost::new();
    host.fail_next(HostCall::ListExports, 1);
    let plane = FakeControlPlane::new(APPLIANCE);
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(Step::Export).await;

    assert!(
        matches!(
            outcome,
            StepOutcome::HardFailure(StepError::Probe(ProbeError::Host {
                resource: Resource::ExportEndpoint,
                ..
            }))
        ),
        "unexpected outcome: {outcome:?}"
    );
    assert!(!host.calls().contains(&HostCall::Export));
}

#[rstest]
#[tokio::test]
async fn compensation_unmount_uses_retry(target: LifecycleTarget, settings: LifecycleSettings) {
    let host = FakeHost::new();
    host.set_mounted(true);
    host.fail_next(HostCall::Unmount, 2);
    let plane = FakeControlPlane::new(APPLIANCE);
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    executor
        .compensate(CompensationAction::Unmount)
        .await
        .expect("third attempt succeeds");

    assert!(!host.is_volume_mounted());
}

#[derive(Clone, Default)]
struct CapturedLog(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("log buffer lock").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CapturedLog {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().expect("log buffer lock").clone()).expect("utf8 log")
    }
}

#[rstest]
#[tokio::test]
async fn observed_state_is_logged_at_info(target: LifecycleTarget, settings: LifecycleSettings) {
    let log = CapturedLog::default();
    let writer = log.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_ansi(false)
        .with_target(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);
    let host = FakeHost::new();
    host.set_mounted(true);
    let plane = FakeControlPlane::new(APPLIANCE);
    let (session, vm) = open(&plane).await;
    let executor = StepExecutor::new(&host, &session, &vm, &target, &settings);

    let outcome = executor.execute(Step::Mount).await;

    assert!(matches!(outcome, StepOutcome::AlreadySatisfied(_)));
    let text = log.text();
    let line = text
        .lines()
        .find(|line| line.contains("probed resource"))
        .unwrap_or_else(|| panic!("no resource state logged in: {text}"));
    assert!(line.contains("INFO"), "line: {line}");
    assert!(line.contains("state=Active"), "line: {line}");
}
