/*!
 * asap-exec
 * Condition-gated deferred execution: re-evaluate a predicate on a dedicated
 * single-threaded context until it holds, then run an action exactly once
 */

pub mod context;
pub mod core;
pub mod execution;

// Re-exports
pub use crate::context::{ContextHandle, ExecContext};
pub use crate::core::{ContextError, ExecId};
pub use crate::execution::{ExecutionHandle, NotRunReason, Outcome, Until, When};
