/*!
 * Retry State Machine
 *
 * One machine drives both factory modes: `TerminateOnTrue` runs the action
 * once the predicate holds, `RepeatUntilTrue` re-runs `on_repeat` for every
 * attempt on which it does not. All mutable state lives on the loop thread;
 * the only cross-thread traffic is the initial install of a [`Core`] and
 * `ExecId`-carrying cancellation jobs.
 */

use super::outcome::{NotRunReason, Outcome};
use crate::context::registry::{self, Finalize};
use crate::core::ExecId;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Gate polarity shared by the two factory modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// `when`: the first attempt on which the predicate holds runs the
    /// action once, then the machine stops.
    TerminateOnTrue,
    /// `until`: every attempt on which the predicate does not hold runs
    /// `on_repeat`; the machine stops once it does.
    RepeatUntilTrue,
}

/// Lifecycle phase. `Terminal` gates every finalization path, so completion
/// fires at most once even when a cancel request and an in-flight callback
/// race to finish the same execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Fresh,
    Scheduled,
    Evaluating,
    Terminal,
}

/// Everything the factory ships onto the loop thread.
///
/// Call contracts: `predicate` is called once per attempt and must tolerate
/// repeated, idempotent invocation; `action` and `completion` are consumed at
/// most once; `on_repeat` fires once per failed attempt and only in
/// [`Mode::RepeatUntilTrue`].
pub(crate) struct Core<R, E> {
    pub(crate) mode: Mode,
    pub(crate) predicate: Box<dyn FnMut() -> bool + Send>,
    pub(crate) action: Option<Box<dyn FnOnce() -> Result<R, E> + Send>>,
    pub(crate) on_repeat: Option<Box<dyn FnMut() + Send>>,
    pub(crate) completion: Option<Box<dyn FnOnce(Outcome<R, E>) + Send>>,
    pub(crate) retry_delay: Option<Duration>,
    /// Attempts already consumed. Seeded by the factory: 1 when the
    /// synchronous try ran and failed, 0 when it was skipped.
    pub(crate) current_try: u32,
    /// Ceiling on total attempts, the synchronous pre-check included.
    pub(crate) max_try_count: Option<u32>,
}

struct State<R, E> {
    core: Core<R, E>,
    phase: Phase,
    cancelled: bool,
    /// At most one outstanding scheduled callback. The handle is consumed
    /// (fired or aborted) before a new one is ever stored.
    pending: Option<JoinHandle<()>>,
}

/// A live execution, owned by the context's registry until terminal.
pub(crate) struct Execution<R, E> {
    id: ExecId,
    state: RefCell<State<R, E>>,
}

impl<R: 'static, E: 'static> Execution<R, E> {
    /// Install a freshly shipped core and schedule its first attempt.
    /// Must run on the loop thread, inside the context's `LocalSet`.
    pub(crate) fn install(id: ExecId, core: Core<R, E>) {
        let exec = Rc::new(Execution {
            id,
            state: RefCell::new(State {
                core,
                phase: Phase::Fresh,
                cancelled: false,
                pending: None,
            }),
        });
        registry::insert(id, exec.clone());
        debug!(id = %id, "execution installed");
        exec.schedule_next();
    }

    fn schedule_next(self: Rc<Self>) {
        let delay = self.state.borrow().core.retry_delay;
        let this = Rc::clone(&self);
        let task = tokio::task::spawn_local(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            this.run_attempt();
        });
        let mut state = self.state.borrow_mut();
        state.pending = Some(task);
        state.phase = Phase::Scheduled;
        trace!(id = %self.id, consumed = state.core.current_try, "attempt scheduled");
    }

    /// One pass of the attempt protocol. Entered when a scheduled callback
    /// fires, or when a cancellation forces the final pass.
    ///
    /// User closures called from here cannot re-enter this state
    /// synchronously: every external mutation path (cancel included) hops
    /// through the context channel and lands on a later loop iteration.
    fn run_attempt(self: Rc<Self>) {
        let mut state = self.state.borrow_mut();
        if state.phase == Phase::Terminal {
            // Stale callback that lost a finalization race.
            return;
        }
        state.phase = Phase::Evaluating;
        state.pending = None;

        // Termination preconditions come before the predicate: a cancelled
        // or already-exhausted execution never evaluates again.
        if state.cancelled {
            drop(state);
            self.finalize(Outcome::NotRun(NotRunReason::Cancelled));
            return;
        }
        if let Some(max) = state.core.max_try_count {
            if state.core.current_try >= max {
                drop(state);
                self.finalize(Outcome::NotRun(NotRunReason::Exhausted));
                return;
            }
        }

        state.core.current_try += 1;
        let holds = (state.core.predicate)();

        if holds {
            let action = state.core.action.take();
            drop(state);
            match action {
                Some(action) => match action() {
                    Ok(value) => self.finalize(Outcome::Done(value)),
                    Err(err) => self.finalize(Outcome::Failed(err)),
                },
                // Action already consumed; the Terminal gate makes this
                // unreachable, but a second run must not re-fire completion.
                None => {}
            }
            return;
        }

        if state.core.mode == Mode::RepeatUntilTrue {
            if let Some(on_repeat) = state.core.on_repeat.as_mut() {
                on_repeat();
            }
        }

        let exhausted = state
            .core
            .max_try_count
            .map_or(false, |max| state.core.current_try >= max);
        drop(state);
        if exhausted {
            self.finalize(Outcome::NotRun(NotRunReason::Exhausted));
        } else {
            self.schedule_next();
        }
    }

    /// Terminal transition. Exactly one caller wins; everyone else sees
    /// `Phase::Terminal` and backs off.
    fn finalize(self: Rc<Self>, outcome: Outcome<R, E>) {
        let mut state = self.state.borrow_mut();
        if state.phase == Phase::Terminal {
            return;
        }
        state.phase = Phase::Terminal;
        if let Some(pending) = state.pending.take() {
            pending.abort();
        }
        let completion = state.core.completion.take();
        drop(state);

        // Releasing the registry entry is the self-retain release: nothing
        // keeps this execution alive past the completion call below.
        registry::remove(self.id);
        debug!(id = %self.id, outcome = outcome.kind(), "execution terminal");
        if let Some(completion) = completion {
            completion(outcome);
        }
    }
}

impl<R: 'static, E: 'static> Finalize for Execution<R, E> {
    fn cancel_now(self: Rc<Self>) {
        {
            let mut state = self.state.borrow_mut();
            if state.phase == Phase::Terminal {
                return;
            }
            state.cancelled = true;
            if let Some(pending) = state.pending.take() {
                pending.abort();
            }
        }
        // One final pass so the completion handler observes the cancellation
        // and the self-retain is released on this thread.
        self.run_attempt();
    }
}

/// Loop-thread entry point for a cross-thread cancel request. Unknown ids
/// are already terminal; cancelling them is a no-op.
pub(crate) fn request_cancel(id: ExecId) {
    if let Some(exec) = registry::get(id) {
        exec.cancel_now();
    } else {
        trace!(id = %id, "cancel for terminal execution ignored");
    }
}
