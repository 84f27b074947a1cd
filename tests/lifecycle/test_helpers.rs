//! Shared fixtures for lifecycle BDD scenarios.

use std::time::Duration;

use bdsrotator::test_support::{FakeControlPlane, FakeHost};
use bdsrotator::{
    Credentials, LifecycleOrchestrator, LifecycleSettings, LifecycleTarget, RetryPolicy,
    RunReport,
};
use camino::Utf8PathBuf;
use rstest::fixture;

pub const APPLIANCE: &str = "VBA";
pub const BACKUP_PATH: &str = "/mnt/backup/VBABACKUPS";

#[derive(Clone, Debug)]
pub struct RotationContext {
    pub host: FakeHost,
    pub plane: FakeControlPlane,
    pub report: Option<RunReport>,
}

impl RotationContext {
    pub fn orchestrator(&self) -> LifecycleOrchestrator<FakeHost, FakeControlPlane> {
        LifecycleOrchestrator::new(
            self.host.clone(),
            self.plane.clone(),
            "vcenter.example.test",
            Credentials::new("backup-operator", "secret"),
            target(),
        )
        .with_settings(LifecycleSettings {
            detach: RetryPolicy::new(5, Duration::ZERO),
            shutdown_timeout: Duration::ZERO,
            shutdown_poll_interval: Duration::ZERO,
        })
    }
}

pub fn backup_path() -> Utf8PathBuf {
    Utf8PathBuf::from(BACKUP_PATH)
}

fn target() -> LifecycleTarget {
    LifecycleTarget {
        mount_point: Utf8PathBuf::from("/mnt/backup"),
        backup_path: backup_path(),
        nfs_client: String::from("vba.example.test"),
        nfs_options: String::from("rw,no_root_squash"),
        appliance: String::from(APPLIANCE),
    }
}

#[fixture]
pub fn rotation_context() -> RotationContext {
    RotationContext {
        host: FakeHost::new(),
        plane: FakeControlPlane::new(APPLIANCE),
        report: None,
    }
}
