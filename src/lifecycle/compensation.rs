//! Rollback planning after a failed step.

use std::fmt;

use super::session::LifecycleSession;
use super::step::Step;

/// A single undo action.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompensationAction {
    /// Withdraw an export this invocation created.
    Unexport,
    /// Flush buffers ahead of a detach.
    SyncBuffers,
    /// Detach a volume this invocation mounted.
    Unmount,
}

impl fmt::Display for CompensationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unexport => "unexport path",
            Self::SyncBuffers => "sync buffers",
            Self::Unmount => "unmount volume",
        })
    }
}

/// Ordered undo actions plus the changes left in place.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CompensationPlan {
    /// Actions to run, in order.
    pub actions: Vec<CompensationAction>,
    /// Steps that changed a resource but have no automatic inverse.
    pub uncompensated: Vec<Step>,
}

impl CompensationPlan {
    /// Whether there is nothing to undo.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Derives a [`CompensationPlan`] from a session's provenance.
#[derive(Clone, Copy, Debug, Default)]
pub struct CompensationPlanner;

impl CompensationPlanner {
    /// Plans rollback of every step before `failed_index`.
    ///
    /// Only steps with provenance are undone, newest first. A resource that
    /// was already in place before this invocation is never touched.
    #[must_use]
    pub fn plan(session: &LifecycleSession, failed_index: usize) -> CompensationPlan {
        let mut plan = CompensationPlan::default();
        for record in session
            .records()
            .iter()
            .take(failed_index)
            .rev()
            .filter(|record| record.provenance)
        {
            let inverse = record.step.inverse();
            if inverse.is_empty() {
                plan.uncompensated.push(record.step);
            } else {
                plan.actions.extend_from_slice(inverse);
            }
        }
        plan
    }
}
