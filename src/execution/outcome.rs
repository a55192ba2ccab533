/*!
 * Terminal Outcomes
 * What a completion handler is told, at most once per execution
 */

use serde::{Deserialize, Serialize};

/// Why an execution terminated without its action running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotRunReason {
    /// Cancellation was requested before the predicate held.
    Cancelled,
    /// The attempt ceiling was reached with the predicate never holding.
    Exhausted,
}

/// Terminal result delivered to a completion handler.
///
/// `NotRun` is deliberately distinct from `Failed`: an action error means the
/// gate opened and the work itself failed, while `NotRun` means the action
/// was never started at all. Action errors are never retried.
#[derive(Debug)]
pub enum Outcome<R, E> {
    /// The predicate held and the action produced a value.
    Done(R),
    /// The predicate held but the action returned an error.
    Failed(E),
    /// Terminated without running the action.
    NotRun(NotRunReason),
}

impl<R, E> Outcome<R, E> {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn is_not_run(&self) -> bool {
        matches!(self, Self::NotRun(_))
    }

    /// Collapse to the action's result, `None` when the action never ran.
    pub fn into_result(self) -> Option<Result<R, E>> {
        match self {
            Self::Done(value) => Some(Ok(value)),
            Self::Failed(err) => Some(Err(err)),
            Self::NotRun(_) => None,
        }
    }

    /// Variant name, for logging.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Done(_) => "done",
            Self::Failed(_) => "failed",
            Self::NotRun(NotRunReason::Cancelled) => "cancelled",
            Self::NotRun(NotRunReason::Exhausted) => "exhausted",
        }
    }
}
