//! BDD scenarios for the start and stop sequences.

use rstest_bdd_macros::scenario;

use super::test_helpers::{RotationContext, rotation_context};

#[scenario(
    path = "tests/features/start.feature",
    name = "Clean start brings the appliance online"
)]
fn scenario_clean_start(rotation_context: RotationContext) {
    drop(rotation_context);
}

#[scenario(
    path = "tests/features/start.feature",
    name = "Pre-mounted volume is reported as a warning"
)]
fn scenario_pre_mounted_start(rotation_context: RotationContext) {
    drop(rotation_context);
}

#[scenario(
    path = "tests/features/start.feature",
    name = "Pre-mounted volume is kept when a later step fails"
)]
fn scenario_pre_mounted_kept(rotation_context: RotationContext) {
    drop(rotation_context);
}

#[scenario(
    path = "tests/features/start.feature",
    name = "Export failure rolls back a fresh mount"
)]
fn scenario_export_failure(rotation_context: RotationContext) {
    drop(rotation_context);
}

#[scenario(
    path = "tests/features/start.feature",
    name = "Rejected credentials touch nothing"
)]
fn scenario_rejected_credentials(rotation_context: RotationContext) {
    drop(rotation_context);
}

#[scenario(
    path = "tests/features/stop.feature",
    name = "Clean stop takes everything offline"
)]
fn scenario_clean_stop(rotation_context: RotationContext) {
    drop(rotation_context);
}

#[scenario(
    path = "tests/features/stop.feature",
    name = "Stop with the appliance already off"
)]
fn scenario_stop_already_off(rotation_context: RotationContext) {
    drop(rotation_context);
}

#[scenario(
    path = "tests/features/stop.feature",
    name = "Busy volume is detached after retries"
)]
fn scenario_busy_volume(rotation_context: RotationContext) {
    drop(rotation_context);
}

#[scenario(
    path = "tests/features/stop.feature",
    name = "Appliance that ignores shutdown stops the run"
)]
fn scenario_shutdown_timeout(rotation_context: RotationContext) {
    drop(rotation_context);
}
