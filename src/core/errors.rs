/*!
 * Error Types
 * Context-surface errors with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the execution-context API.
///
/// Action failures never appear here: they flow to the completion handler as
/// an [`Outcome::Failed`](crate::execution::Outcome::Failed) and are never
/// retried or re-thrown at the scheduler.
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ContextError {
    #[error("execution context is closed")]
    #[diagnostic(
        code(context::closed),
        help("The context thread has shut down. Schedule onto a live context.")
    )]
    Closed,

    #[error("failed to spawn context thread: {0}")]
    #[diagnostic(
        code(context::spawn_failed),
        help("Check OS thread limits and available memory.")
    )]
    SpawnFailed(String),
}
