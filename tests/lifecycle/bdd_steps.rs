//! BDD step definitions for the backup rotation lifecycle.

use bdsrotator::test_support::{HostCall, PlaneCall};
use bdsrotator::{LifecycleError, Operation, PowerState, RunReport};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Builder;

use super::test_helpers::{RotationContext, backup_path};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn report(rotation_context: &RotationContext) -> Result<&RunReport, StepError> {
    rotation_context
        .report
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing run report")))
}

fn check(condition: bool, message: impl Into<String>) -> Result<(), StepError> {
    if condition {
        Ok(())
    } else {
        Err(StepError::Assertion(message.into()))
    }
}

#[given("an unmounted backup volume")]
fn unmounted_volume(rotation_context: RotationContext) -> RotationContext {
    rotation_context.host.set_mounted(false);
    rotation_context
}

#[given("a backup volume that is already mounted")]
fn mounted_volume(rotation_context: RotationContext) -> RotationContext {
    rotation_context.host.set_mounted(true);
    rotation_context
}

#[given("the backup path is exported")]
fn path_exported(rotation_context: RotationContext) -> RotationContext {
    rotation_context.host.add_export(backup_path());
    rotation_context
}

#[given("the appliance is powered off")]
fn appliance_off(rotation_context: RotationContext) -> RotationContext {
    rotation_context.plane.set_power(PowerState::Off);
    rotation_context
}

#[given("the appliance is powered on")]
fn appliance_on(rotation_context: RotationContext) -> RotationContext {
    rotation_context.plane.set_power(PowerState::On);
    rotation_context
}

#[given("exporting the backup path fails")]
fn export_fails(rotation_context: RotationContext) -> RotationContext {
    rotation_context.host.fail_always(HostCall::Export);
    rotation_context
}

#[given("unmounting fails \"{times}\" times")]
fn unmount_fails(rotation_context: RotationContext, times: u32) -> RotationContext {
    rotation_context.host.fail_next(HostCall::Unmount, times);
    rotation_context
}

#[given("powering the appliance on fails")]
fn power_on_fails(rotation_context: RotationContext) -> RotationContext {
    rotation_context.plane.fail_power_on();
    rotation_context
}

#[given("the appliance ignores shutdown requests")]
fn shutdown_ignored(rotation_context: RotationContext) -> RotationContext {
    rotation_context.plane.ignore_shutdown();
    rotation_context
}

#[given("the control plane rejects the credentials")]
fn credentials_rejected(rotation_context: RotationContext) -> RotationContext {
    rotation_context.plane.reject_auth();
    rotation_context
}

fn run(
    rotation_context: RotationContext,
    operation: Operation,
) -> Result<RotationContext, StepError> {
    let runtime = Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = rotation_context.orchestrator();
    let report = runtime.block_on(orchestrator.run(operation));
    Ok(RotationContext {
        report: Some(report),
        ..rotation_context
    })
}

#[when("I start the backup")]
fn start_backup(rotation_context: RotationContext) -> Result<RotationContext, StepError> {
    run(rotation_context, Operation::Start)
}

#[when("I stop the backup")]
fn stop_backup(rotation_context: RotationContext) -> Result<RotationContext, StepError> {
    run(rotation_context, Operation::Stop)
}

#[then("the run succeeds without warnings")]
fn run_succeeds(rotation_context: &RotationContext) -> Result<(), StepError> {
    let report = report(rotation_context)?;
    check(
        report.ok && report.warnings.is_empty() && report.exit_code() == 0,
        format!("expected a clean run, got: {}", report.summary()),
    )
}

#[then("the run completes with warning \"{warning}\"")]
fn run_warns(rotation_context: &RotationContext, warning: String) -> Result<(), StepError> {
    let report = report(rotation_context)?;
    check(
        !report.ok && report.error.is_none() && report.warnings == vec![warning.clone()],
        format!("expected only warning {warning:?}, got: {}", report.summary()),
    )
}

#[then("the exit code is \"{code}\"")]
fn exit_code(rotation_context: &RotationContext, code: i32) -> Result<(), StepError> {
    let actual = report(rotation_context)?.exit_code();
    check(actual == code, format!("expected exit code {code}, got {actual}"))
}

#[then("the run fails at step \"{step}\"")]
fn run_fails_at(rotation_context: &RotationContext, step: String) -> Result<(), StepError> {
    let report = report(rotation_context)?;
    match &report.error {
        Some(LifecycleError::Step { step: failed, .. }) if failed.to_string() == step => Ok(()),
        _ => Err(StepError::Assertion(format!(
            "expected failure at {step:?}, got: {}",
            report.summary()
        ))),
    }
}

#[then("the run fails authentication")]
fn run_fails_auth(rotation_context: &RotationContext) -> Result<(), StepError> {
    let report = report(rotation_context)?;
    check(
        matches!(report.error, Some(LifecycleError::Auth(_))),
        format!("expected an authentication failure, got: {}", report.summary()),
    )
}

#[then("the backup path is shared with the appliance")]
fn path_is_exported(rotation_context: &RotationContext) -> Result<(), StepError> {
    check(
        rotation_context.host.is_exported(&backup_path()),
        "backup path should be exported",
    )
}

#[then("the backup path is not exported")]
fn path_is_not_exported(rotation_context: &RotationContext) -> Result<(), StepError> {
    check(
        !rotation_context.host.is_exported(&backup_path()),
        "backup path should not be exported",
    )
}

#[then("the volume is unmounted")]
fn volume_unmounted(rotation_context: &RotationContext) -> Result<(), StepError> {
    check(
        !rotation_context.host.is_volume_mounted(),
        "volume should be unmounted",
    )
}

#[then("the volume is still mounted")]
fn volume_still_mounted(rotation_context: &RotationContext) -> Result<(), StepError> {
    check(
        rotation_context.host.is_volume_mounted(),
        "volume should still be mounted",
    )?;
    check(
        !rotation_context.host.calls().contains(&HostCall::Unmount),
        "unmount should not be attempted",
    )
}

#[then("the appliance is running")]
fn appliance_is_on(rotation_context: &RotationContext) -> Result<(), StepError> {
    let power = rotation_context.plane.power();
    check(power == PowerState::On, format!("expected power on, got {power:?}"))
}

#[then("the appliance is stopped")]
fn appliance_is_off(rotation_context: &RotationContext) -> Result<(), StepError> {
    let power = rotation_context.plane.power();
    check(power == PowerState::Off, format!("expected power off, got {power:?}"))
}

#[then("the appliance was not powered on")]
fn appliance_not_powered_on(rotation_context: &RotationContext) -> Result<(), StepError> {
    check(
        !rotation_context.plane.calls().contains(&PlaneCall::PowerOn),
        "power on should not be requested",
    )
}

#[then("the host synced buffers and unmounted the volume after the failure")]
fn rollback_sync_then_unmount(rotation_context: &RotationContext) -> Result<(), StepError> {
    let calls = rotation_context.host.mutating_calls();
    let expected = [
        HostCall::Mount,
        HostCall::ValidatePath,
        HostCall::Export,
        HostCall::SyncBuffers,
        HostCall::Unmount,
    ];
    check(
        calls == expected,
        format!("expected {expected:?}, got {calls:?}"),
    )
}

#[then("unmount was attempted \"{times}\" times")]
fn unmount_attempts(rotation_context: &RotationContext, times: usize) -> Result<(), StepError> {
    let attempts = rotation_context
        .host
        .calls()
        .into_iter()
        .filter(|call| *call == HostCall::Unmount)
        .count();
    check(
        attempts == times,
        format!("expected {times} unmount attempts, got {attempts}"),
    )
}

#[then("the host was not touched")]
fn host_untouched(rotation_context: &RotationContext) -> Result<(), StepError> {
    let calls = rotation_context.host.calls();
    check(calls.is_empty(), format!("expected no host calls, got {calls:?}"))
}
