/*!
 * Live-Execution Registry
 *
 * Thread-local table that keeps pending executions alive. The loop thread
 * owns every entry: an execution is inserted when it is installed and
 * removed exactly once, at its terminal transition. Other threads only ever
 * hold an `ExecId`, so a cancellation request hops onto the loop thread and
 * looks its target up here. A missing entry means the execution already went
 * terminal, which makes stale cancels and stale callbacks naturally inert.
 */

use crate::core::ExecId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Loop-thread view of a live execution. Object-safe so one table can hold
/// executions of any result type.
pub(crate) trait Finalize {
    /// Apply a cancellation request on the loop thread.
    fn cancel_now(self: Rc<Self>);
}

thread_local! {
    static LIVE: RefCell<HashMap<ExecId, Rc<dyn Finalize>>> = RefCell::new(HashMap::new());
}

pub(crate) fn insert(id: ExecId, exec: Rc<dyn Finalize>) {
    LIVE.with(|live| live.borrow_mut().insert(id, exec));
}

/// Release the table's hold on `id`. Returns false when the entry was
/// already gone (terminal, or never installed on this thread).
pub(crate) fn remove(id: ExecId) -> bool {
    LIVE.with(|live| live.borrow_mut().remove(&id).is_some())
}

pub(crate) fn get(id: ExecId) -> Option<Rc<dyn Finalize>> {
    LIVE.with(|live| live.borrow().get(&id).cloned())
}

/// Cancel everything still pending. Runs while the context drains at
/// shutdown so every outstanding completion handler still fires exactly once.
pub(crate) fn cancel_all() {
    let drained: Vec<Rc<dyn Finalize>> =
        LIVE.with(|live| live.borrow_mut().drain().map(|(_, exec)| exec).collect());
    for exec in drained {
        exec.cancel_now();
    }
}
