/*!
 * Execution Context
 *
 * The confinement domain every execution is bound to: one named OS thread
 * driving a tokio current-thread runtime inside a `LocalSet`. Jobs arrive
 * over a flume channel and run strictly in order on that thread. Loop-side
 * code schedules follow-ups with `spawn_local`, so a "next iteration" retry
 * is asynchronous but never re-entrant with the stack that requested it.
 */

pub(crate) mod registry;

use crate::core::ContextError;
use parking_lot::Mutex;
use std::thread;
use tracing::{debug, error};

/// A unit of work shipped onto the loop thread.
enum Job {
    Run(Box<dyn FnOnce() + Send + 'static>),
    Shutdown,
}

/// Owning side of a context. Dropping it shuts the loop down; executions
/// still pending at that point are cancelled during drain so their
/// completion handlers fire exactly once.
pub struct ExecContext {
    handle: ContextHandle,
    join: Mutex<Option<thread::JoinHandle<()>>>,
}

/// Cheap cloneable handle for scheduling work from any thread.
#[derive(Clone)]
pub struct ContextHandle {
    tx: flume::Sender<Job>,
}

impl ExecContext {
    /// Spawn a named context thread.
    pub fn spawn(name: impl Into<String>) -> Result<Self, ContextError> {
        let (tx, rx) = flume::unbounded();
        let name = name.into();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(rx))
            .map_err(|e| ContextError::SpawnFailed(e.to_string()))?;
        debug!(context = %name, "execution context started");
        Ok(Self {
            handle: ContextHandle { tx },
            join: Mutex::new(Some(join)),
        })
    }

    /// Handle for scheduling onto this context.
    pub fn handle(&self) -> ContextHandle {
        self.handle.clone()
    }

    /// Stop the loop thread and wait for it to drain. Idempotent.
    ///
    /// Live executions are cancelled during the drain, so each pending
    /// completion handler still observes exactly one terminal call (with the
    /// no-action outcome) before this returns. Must not be called from the
    /// context's own thread.
    pub fn shutdown(&self) {
        let _ = self.handle.tx.send(Job::Shutdown);
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }
}

impl Drop for ExecContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ContextHandle {
    /// Run `job` on the next iteration of the loop.
    ///
    /// Asynchronous even when called from the loop thread itself: the job is
    /// appended behind everything already queued.
    pub(crate) fn enqueue(
        &self,
        job: impl FnOnce() + Send + 'static,
    ) -> Result<(), ContextError> {
        self.tx
            .send(Job::Run(Box::new(job)))
            .map_err(|_| ContextError::Closed)
    }
}

fn run_loop(rx: flume::Receiver<Job>) {
    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("failed to build context runtime: {}", e);
            return;
        }
    };

    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, async move {
        while let Ok(job) = rx.recv_async().await {
            match job {
                Job::Run(f) => f(),
                Job::Shutdown => break,
            }
        }
        // Drain: anything still live gets its terminal call now.
        registry::cancel_all();
    });
    debug!("execution context stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn jobs_run_in_order_on_the_named_thread() {
        let ctx = ExecContext::spawn("asap-ctx-test").unwrap();
        let handle = ctx.handle();
        let (tx, rx) = mpsc::channel();

        for i in 0..3 {
            let tx = tx.clone();
            handle
                .enqueue(move || {
                    let name = thread::current().name().map(str::to_owned);
                    tx.send((i, name)).unwrap();
                })
                .unwrap();
        }

        for expected in 0..3 {
            let (i, name) = rx.recv_timeout(Duration::from_secs(1)).unwrap();
            assert_eq!(i, expected);
            assert_eq!(name.as_deref(), Some("asap-ctx-test"));
        }
    }

    #[test]
    fn enqueue_after_shutdown_reports_closed() {
        let ctx = ExecContext::spawn("asap-ctx-closed").unwrap();
        let handle = ctx.handle();
        ctx.shutdown();

        let result = handle.enqueue(|| {});
        assert_eq!(result, Err(crate::core::ContextError::Closed));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let ctx = ExecContext::spawn("asap-ctx-twice").unwrap();
        ctx.shutdown();
        ctx.shutdown();
    }
}
