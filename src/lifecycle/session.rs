//! Per-invocation record of step outcomes.

use uuid::Uuid;

use super::Operation;
use super::step::{Step, StepOutcome};

/// Position in the start or stop state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LifecycleState {
    /// Control plane not contacted yet.
    Pending,
    /// Control-plane login and appliance lookup succeeded.
    Authenticated,
    /// Backup volume mounted.
    VolumeMounted,
    /// Backup directory checked.
    PathValidated,
    /// Backup directory exported.
    Exported,
    /// Appliance running.
    PoweredOn,
    /// Appliance powered off.
    ApplianceShutdown,
    /// Export withdrawn.
    Unexported,
    /// Buffers flushed.
    BufferSynced,
    /// Backup volume detached.
    VolumeUnmounted,
    /// Every step completed.
    Done,
    /// The named step hard-failed.
    Failed(Step),
}

/// Outcome of one executed step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StepRecord {
    /// Step that ran.
    pub step: Step,
    /// Classified result.
    pub outcome: StepOutcome,
    /// Whether this invocation changed the resource.
    pub provenance: bool,
}

/// Ordered outcomes and accumulated warnings for one invocation.
#[derive(Clone, Debug)]
pub struct LifecycleSession {
    id: Uuid,
    operation: Operation,
    records: Vec<StepRecord>,
    warnings: Vec<String>,
    state: LifecycleState,
}

impl LifecycleSession {
    /// Opens a session for `operation` with a fresh identifier.
    #[must_use]
    pub fn new(operation: Operation) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation,
            records: Vec::new(),
            warnings: Vec::new(),
            state: LifecycleState::Pending,
        }
    }

    /// Identifier attached to every log line of this invocation.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Sequence this session runs.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.operation
    }

    /// Marks the control-plane login as complete.
    pub const fn authenticated(&mut self) {
        self.state = LifecycleState::Authenticated;
    }

    /// Appends a step outcome and returns its index.
    ///
    /// Provenance is only set when a mutating step reports
    /// [`StepOutcome::Success`]; an already-satisfied step never claims the
    /// resource.
    pub fn record(&mut self, step: Step, outcome: StepOutcome) -> usize {
        self.state = match &outcome {
            StepOutcome::Success => step.reached_state(),
            StepOutcome::AlreadySatisfied(warning) => {
                self.warnings.push(warning.clone());
                step.reached_state()
            }
            StepOutcome::HardFailure(_) => LifecycleState::Failed(step),
        };
        let provenance = step.mutates() && outcome == StepOutcome::Success;
        self.records.push(StepRecord {
            step,
            outcome,
            provenance,
        });
        self.records.len() - 1
    }

    /// Marks the sequence as complete unless a step failed.
    pub const fn finish(&mut self) {
        if !matches!(self.state, LifecycleState::Failed(_)) {
            self.state = LifecycleState::Done;
        }
    }

    /// Recorded outcomes in execution order.
    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Warnings raised by already-satisfied steps, in order.
    #[must_use]
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Whether any step found its resource already in the target state.
    #[must_use]
    pub fn soft_warning(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Current state machine position.
    #[must_use]
    pub const fn state(&self) -> LifecycleState {
        self.state
    }
}
