//! Unit tests for the lifecycle sequences.

use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::fixture;

use super::*;
use crate::plane::Credentials;
use crate::test_support::{FakeControlPlane, FakeHost};

mod executor;

pub(super) const APPLIANCE: &str = "VBA";
pub(super) const BACKUP_PATH: &str = "/mnt/backup/VBABACKUPS";

pub(super) fn backup_path() -> Utf8PathBuf {
    Utf8PathBuf::from(BACKUP_PATH)
}

pub(super) fn make_target() -> LifecycleTarget {
    LifecycleTarget {
        mount_point: Utf8PathBuf::from("/mnt/backup"),
        backup_path: backup_path(),
        nfs_client: String::from("vba.example.test"),
        nfs_options: String::from("rw,no_root_squash"),
        appliance: String::from(APPLIANCE),
    }
}

pub(super) fn make_settings() -> LifecycleSettings {
    LifecycleSettings {
        detach: RetryPolicy::new(5, Duration::ZERO),
        shutdown_timeout: Duration::ZERO,
        shutdown_poll_interval: Duration::ZERO,
    }
}

pub(super) fn orchestrator(
    host: &FakeHost,
    plane: &FakeControlPlane,
) -> LifecycleOrchestrator<FakeHost, FakeControlPlane> {
    LifecycleOrchestrator::new(
        host.clone(),
        plane.clone(),
        "vcenter.example.test",
        Credentials::new("backup-operator", "secret"),
        make_target(),
    )
    .with_settings(make_settings())
}

#[fixture]
pub(super) fn target() -> LifecycleTarget {
    make_target()
}

#[fixture]
pub(super) fn settings() -> LifecycleSettings {
    make_settings()
}
