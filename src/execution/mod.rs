/*!
 * Deferred Execution Factories
 *
 * `When` runs an action as soon as a predicate holds, retrying on its
 * context until it does. `Until` inverts the gate: it repeats a callback for
 * every attempt on which the predicate does not hold and stops once it does.
 * Both share one retry state machine; see [`machine`].
 */

mod machine;
mod outcome;

pub use outcome::{NotRunReason, Outcome};

use crate::context::ContextHandle;
use crate::core::id::next_exec_id;
use crate::core::{ContextError, ExecId};
use machine::{Core, Execution, Mode};
use std::convert::Infallible;
use std::time::Duration;
use tracing::warn;

/// Handle to a live (scheduled) execution.
///
/// Dropping the handle does not cancel anything: the execution keeps itself
/// alive through its context's registry until it reaches a terminal state.
#[derive(Clone)]
pub struct ExecutionHandle {
    id: ExecId,
    ctx: ContextHandle,
}

impl ExecutionHandle {
    pub fn id(&self) -> ExecId {
        self.id
    }

    /// Request cancellation. Callable from any thread and idempotent; a
    /// no-op once the execution is terminal.
    ///
    /// The effect is always applied on the execution's own context: the
    /// pending timer is dropped and one final pass delivers
    /// [`Outcome::NotRun`] with [`NotRunReason::Cancelled`]. An action that
    /// is already running is never interrupted.
    pub fn cancel(&self) {
        let id = self.id;
        if self.ctx.enqueue(move || machine::request_cancel(id)).is_err() {
            // Context gone means the drain already cancelled everything.
            warn!(id = %id, "cancel requested on a closed context");
        }
    }
}

/// Builder for "run this action once the predicate holds".
///
/// # Example
///
/// ```ignore
/// let ctx = ExecContext::spawn("worker")?;
/// let handle = When::new(|| service.is_ready(), move || service.flush())
///     .retry_delay(Duration::from_millis(50))
///     .max_try_count(20)
///     .completion(|outcome| log_outcome(outcome))
///     .schedule(&ctx.handle())?;
/// ```
pub struct When<R, E> {
    predicate: Box<dyn FnMut() -> bool + Send>,
    action: Box<dyn FnOnce() -> Result<R, E> + Send>,
    completion: Option<Box<dyn FnOnce(Outcome<R, E>) + Send>>,
    retry_delay: Option<Duration>,
    max_try_count: Option<u32>,
    skip_sync_try: bool,
}

impl<R: 'static, E: 'static> When<R, E> {
    pub fn new(
        predicate: impl FnMut() -> bool + Send + 'static,
        action: impl FnOnce() -> Result<R, E> + Send + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            action: Box::new(action),
            completion: None,
            retry_delay: None,
            max_try_count: None,
            skip_sync_try: false,
        }
    }

    /// Terminal notification, called at most once, on the context thread
    /// (or synchronously on the calling thread for the fast path).
    pub fn completion(mut self, completion: impl FnOnce(Outcome<R, E>) + Send + 'static) -> Self {
        self.completion = Some(Box::new(completion));
        self
    }

    /// Wait between attempts. Unset means retry on the very next loop
    /// iteration with no added wait.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Ceiling on total attempts, the synchronous pre-check included. Once
    /// reached the execution terminates with [`NotRunReason::Exhausted`].
    pub fn max_try_count(mut self, count: u32) -> Self {
        self.max_try_count = Some(count);
        self
    }

    /// Force deferral even if the predicate already holds.
    pub fn skip_sync_try(mut self) -> Self {
        self.skip_sync_try = true;
        self
    }

    /// Try to resolve synchronously, otherwise install a live execution on
    /// `ctx` and return its handle.
    ///
    /// The fast path (skip flag unset, predicate true) evaluates predicate
    /// and action on the calling thread, performs no allocation and no
    /// scheduling, and returns `Ok(None)`. Everything after the fast path is
    /// confined to the context thread.
    pub fn schedule(mut self, ctx: &ContextHandle) -> Result<Option<ExecutionHandle>, ContextError> {
        if !self.skip_sync_try && (self.predicate)() {
            let outcome = match (self.action)() {
                Ok(value) => Outcome::Done(value),
                Err(err) => Outcome::Failed(err),
            };
            if let Some(completion) = self.completion {
                completion(outcome);
            }
            return Ok(None);
        }

        let id = next_exec_id();
        let core = Core {
            mode: Mode::TerminateOnTrue,
            predicate: self.predicate,
            action: Some(self.action),
            on_repeat: None,
            completion: self.completion,
            retry_delay: self.retry_delay,
            current_try: if self.skip_sync_try { 0 } else { 1 },
            max_try_count: self.max_try_count,
        };
        ctx.enqueue(move || Execution::install(id, core))?;
        Ok(Some(ExecutionHandle {
            id,
            ctx: ctx.clone(),
        }))
    }
}

impl<R: 'static> When<R, Infallible> {
    /// Convenience for actions that cannot fail.
    pub fn infallible(
        predicate: impl FnMut() -> bool + Send + 'static,
        action: impl FnOnce() -> R + Send + 'static,
    ) -> Self {
        Self::new(predicate, move || Ok(action()))
    }
}

/// Builder for "repeat this callback while the predicate does not hold".
///
/// The terminal action of the loop is a no-op; `on_repeat` runs once per
/// failed attempt, before the next retry is scheduled. The completion
/// handler receives `true` when the loop was interrupted (cancelled or
/// exhausted) and `false` when it ended because the predicate held.
pub struct Until {
    predicate: Box<dyn FnMut() -> bool + Send>,
    on_repeat: Box<dyn FnMut() + Send>,
    completion: Option<Box<dyn FnOnce(bool) + Send>>,
    retry_delay: Option<Duration>,
    max_try_count: Option<u32>,
    skip_sync_try: bool,
}

impl Until {
    pub fn new(
        predicate: impl FnMut() -> bool + Send + 'static,
        on_repeat: impl FnMut() + Send + 'static,
    ) -> Self {
        Self {
            predicate: Box::new(predicate),
            on_repeat: Box::new(on_repeat),
            completion: None,
            retry_delay: None,
            max_try_count: None,
            skip_sync_try: false,
        }
    }

    /// Terminal notification: `true` = interrupted, `false` = predicate held.
    pub fn completion(mut self, completion: impl FnOnce(bool) + Send + 'static) -> Self {
        self.completion = Some(Box::new(completion));
        self
    }

    /// Wait between attempts. Unset means retry on the next loop iteration.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Ceiling on total attempts, the synchronous pre-check included.
    pub fn max_try_count(mut self, count: u32) -> Self {
        self.max_try_count = Some(count);
        self
    }

    /// Force deferral even if the predicate already holds.
    pub fn skip_sync_try(mut self) -> Self {
        self.skip_sync_try = true;
        self
    }

    /// Try to resolve synchronously, otherwise install a live execution.
    ///
    /// A failed synchronous check is a full attempt: `on_repeat` runs once
    /// on the calling thread before the live object is installed.
    pub fn schedule(mut self, ctx: &ContextHandle) -> Result<Option<ExecutionHandle>, ContextError> {
        if !self.skip_sync_try {
            if (self.predicate)() {
                if let Some(completion) = self.completion {
                    completion(false);
                }
                return Ok(None);
            }
            (self.on_repeat)();
        }

        let id = next_exec_id();
        let completion = self.completion.map(|f| {
            Box::new(move |outcome: Outcome<(), Infallible>| f(outcome.is_not_run()))
                as Box<dyn FnOnce(Outcome<(), Infallible>) + Send>
        });
        let core: Core<(), Infallible> = Core {
            mode: Mode::RepeatUntilTrue,
            predicate: self.predicate,
            action: Some(Box::new(|| Ok(()))),
            on_repeat: Some(self.on_repeat),
            completion,
            retry_delay: self.retry_delay,
            current_try: if self.skip_sync_try { 0 } else { 1 },
            max_try_count: self.max_try_count,
        };
        ctx.enqueue(move || Execution::install(id, core))?;
        Ok(Some(ExecutionHandle {
            id,
            ctx: ctx.clone(),
        }))
    }
}
