//! Drives a start or stop sequence to completion or rollback.

use tracing::{Instrument, error, info, info_span, warn};

use crate::host::HostOps;
use crate::plane::{ApplianceSession, ControlPlane, Credentials};

use super::compensation::CompensationPlanner;
use super::session::LifecycleSession;
use super::step::{StepExecutor, StepOutcome};
use super::{LifecycleError, LifecycleSettings, LifecycleTarget, Operation, RunReport};

/// Runs lifecycle sequences against a host and a control plane.
#[derive(Debug)]
pub struct LifecycleOrchestrator<H, P> {
    host: H,
    plane: P,
    endpoint: String,
    credentials: Credentials,
    target: LifecycleTarget,
    settings: LifecycleSettings,
}

impl<H: HostOps, P: ControlPlane> LifecycleOrchestrator<H, P> {
    /// Creates an orchestrator with default timings.
    #[must_use]
    pub fn new(
        host: H,
        plane: P,
        endpoint: impl Into<String>,
        credentials: Credentials,
        target: LifecycleTarget,
    ) -> Self {
        Self {
            host,
            plane,
            endpoint: endpoint.into(),
            credentials,
            target,
            settings: LifecycleSettings::default(),
        }
    }

    /// Overrides the detach retry and shutdown wait timings.
    #[must_use]
    pub const fn with_settings(mut self, settings: LifecycleSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Mounts, validates, exports, then powers the appliance on.
    pub async fn run_start(&self) -> RunReport {
        self.run(Operation::Start).await
    }

    /// Shuts the appliance down, unexports, syncs, then unmounts.
    pub async fn run_stop(&self) -> RunReport {
        self.run(Operation::Stop).await
    }

    /// Runs `operation` and reports how it ended.
    ///
    /// Failures never escape as `Err`; they are carried in
    /// [`RunReport::error`] after any compensation has been attempted.
    pub async fn run(&self, operation: Operation) -> RunReport {
        let mut session = LifecycleSession::new(operation);
        let span = info_span!(
            "lifecycle",
            session = %session.id(),
            %operation,
            appliance = %self.target.appliance
        );
        let result = self.drive(&mut session).instrument(span.clone()).await;
        let report = RunReport::from_session(&session, result.err());

        let _entered = span.enter();
        match (&report.error, report.warnings.is_empty()) {
            (Some(err), _) => error!(error = %err, "{operation} failed"),
            (None, false) => warn!(
                warnings = ?report.warnings,
                "{operation} completed with warnings"
            ),
            (None, true) => info!("{operation} completed"),
        }
        report
    }

    async fn drive(&self, session: &mut LifecycleSession) -> Result<(), LifecycleError> {
        let plane = self
            .plane
            .connect(&self.endpoint, &self.credentials)
            .await
            .map_err(LifecycleError::Auth)?;
        let vm = plane
            .find_vm(&self.target.appliance)
            .await
            .map_err(LifecycleError::ApplianceLookup)?;
        session.authenticated();
        info!(endpoint = %self.endpoint, "authenticated with control plane");

        let executor = StepExecutor::new(&self.host, &plane, &vm, &self.target, &self.settings);
        for &step in session.operation().steps() {
            info!(%step, "running step");
            let outcome = executor.execute(step).await;
            let failure = match &outcome {
                StepOutcome::Success => {
                    info!(%step, "step succeeded");
                    None
                }
                StepOutcome::AlreadySatisfied(warning) => {
                    warn!(%step, warning = %warning, "resource already in target state");
                    None
                }
                StepOutcome::HardFailure(err) => {
                    error!(%step, error = %err, "step failed");
                    Some(err.clone())
                }
            };
            let index = session.record(step, outcome);
            if let Some(source) = failure {
                compensate(&executor, session, index).await;
                return Err(LifecycleError::Step { step, source });
            }
        }
        session.finish();
        Ok(())
    }
}

/// Undoes what this session changed before the step at `failed_index`.
///
/// Every action is attempted; a failing action is logged and the rest
/// still run.
async fn compensate<H: HostOps, S: ApplianceSession>(
    executor: &StepExecutor<'_, H, S>,
    session: &LifecycleSession,
    failed_index: usize,
) {
    let plan = CompensationPlanner::plan(session, failed_index);
    for step in &plan.uncompensated {
        warn!(%step, "change has no automatic rollback and is left in place");
    }
    if plan.is_empty() {
        info!("nothing to roll back");
        return;
    }

    warn!(actions = ?plan.actions, "rolling back changes made by this run");
    for action in plan.actions {
        match executor.compensate(action).await {
            Ok(()) => info!(%action, "rollback action succeeded"),
            Err(err) => error!(%action, error = %err, "rollback action failed, continuing"),
        }
    }
}
