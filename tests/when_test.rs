/*!
 * When-Mode Tests
 * Fast path, retry loop, try counting, exhaustion, and cancellation
 */

use asap_exec::{ExecContext, NotRunReason, Outcome, When};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

#[test]
fn sync_fast_path_runs_action_without_scheduling() {
    let ctx = ExecContext::spawn("asap-sync").unwrap();
    let (tx, rx) = mpsc::channel();

    let handle = When::new(|| true, || Ok::<_, ()>(41 + 1))
        .completion(move |outcome| tx.send(outcome).unwrap())
        .schedule(&ctx.handle())
        .unwrap();

    // No live object on the fast path, and the outcome is already there.
    assert!(handle.is_none());
    let outcome = rx.try_recv().unwrap();
    assert!(matches!(outcome, Outcome::Done(42)));
}

#[test]
fn skip_sync_try_defers_even_when_predicate_holds() {
    let ctx = ExecContext::spawn("asap-worker").unwrap();
    let (tx, rx) = mpsc::channel();

    let handle = When::new(
        || true,
        || Ok::<_, ()>(std::thread::current().name().map(str::to_owned)),
    )
    .skip_sync_try()
    .completion(move |outcome| tx.send(outcome).unwrap())
    .schedule(&ctx.handle())
    .unwrap();

    assert!(handle.is_some());
    // Deferred attempts are confined to the context thread.
    match rx.recv_timeout(Duration::from_secs(1)).unwrap() {
        Outcome::Done(name) => assert_eq!(name.as_deref(), Some("asap-worker")),
        other => panic!("expected Done, got {:?}", other),
    }
}

#[test]
fn retries_until_predicate_flips() {
    let ctx = ExecContext::spawn("asap-flip").unwrap();
    let cond = Arc::new(AtomicBool::new(false));
    let tries = Arc::new(AtomicU32::new(0));
    let (tx, rx) = mpsc::channel();

    let predicate = {
        let cond = cond.clone();
        let tries = tries.clone();
        move || {
            tries.fetch_add(1, Ordering::SeqCst);
            cond.load(Ordering::SeqCst)
        }
    };
    When::new(predicate, || Ok::<_, ()>(()))
        .completion(move |outcome| tx.send(outcome).unwrap())
        .schedule(&ctx.handle())
        .unwrap()
        .expect("predicate is false, must defer");

    // Condition still false: the loop keeps retrying instead of completing.
    std::thread::sleep(Duration::from_millis(250));
    assert!(rx.try_recv().is_err());

    cond.store(true, Ordering::SeqCst);
    let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(outcome, Outcome::Done(())));
    // In 250ms of next-iteration retries far more than one attempt ran.
    assert!(tries.load(Ordering::SeqCst) > 1);
}

#[test]
fn max_try_count_evaluates_exactly_n_times() {
    let ctx = ExecContext::spawn("asap-max").unwrap();
    let tries = Arc::new(AtomicU32::new(0));
    let (tx, rx) = mpsc::channel();

    let predicate = {
        let tries = tries.clone();
        move || {
            tries.fetch_add(1, Ordering::SeqCst);
            false
        }
    };
    When::new(predicate, || Ok::<_, ()>(()))
        .max_try_count(3)
        .completion(move |outcome| tx.send(outcome).unwrap())
        .schedule(&ctx.handle())
        .unwrap()
        .expect("must defer");

    let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(outcome, Outcome::NotRun(NotRunReason::Exhausted)));
    // Total attempts include the synchronous pre-check: never N+1, never N-1.
    assert_eq!(tries.load(Ordering::SeqCst), 3);
}

#[test]
fn action_error_surfaces_as_failed() {
    let ctx = ExecContext::spawn("asap-fail").unwrap();
    let (tx, rx) = mpsc::channel();

    When::new(|| true, || Err::<(), _>("boom"))
        .skip_sync_try()
        .completion(move |outcome| tx.send(outcome).unwrap())
        .schedule(&ctx.handle())
        .unwrap()
        .expect("deferral forced");

    let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(outcome, Outcome::Failed("boom")));
}

#[test]
fn cancel_is_idempotent() {
    let ctx = ExecContext::spawn("asap-cancel").unwrap();
    let ran = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();

    let handle = When::new(|| false, {
        let ran = ran.clone();
        move || {
            ran.store(true, Ordering::SeqCst);
            Ok::<_, ()>(())
        }
    })
    .retry_delay(Duration::from_secs(10))
    .completion(move |outcome| tx.send(outcome).unwrap())
    .schedule(&ctx.handle())
    .unwrap()
    .expect("must defer");

    handle.cancel();
    handle.cancel();

    let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(outcome, Outcome::NotRun(NotRunReason::Cancelled)));
    assert!(!ran.load(Ordering::SeqCst));

    // The second cancel must not produce a second completion call.
    std::thread::sleep(Duration::from_millis(50));
    assert!(rx.try_recv().is_err());
}

#[test]
fn cancel_before_first_attempt_skips_the_timer() {
    let ctx = ExecContext::spawn("asap-early-cancel").unwrap();
    let ran = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();

    let handle = When::new(|| true, {
        let ran = ran.clone();
        move || {
            ran.store(true, Ordering::SeqCst);
            Ok::<_, ()>(())
        }
    })
    .skip_sync_try()
    .retry_delay(Duration::from_secs(30))
    .completion(move |outcome| tx.send(outcome).unwrap())
    .schedule(&ctx.handle())
    .unwrap()
    .expect("deferral forced");

    handle.cancel();

    // Well before the 30s timer: cancellation aborted it.
    let outcome = rx.recv_timeout(Duration::from_secs(1)).unwrap();
    assert!(matches!(outcome, Outcome::NotRun(NotRunReason::Cancelled)));
    assert!(!ran.load(Ordering::SeqCst));
}

#[test]
fn infallible_actions_need_no_error_type() {
    let ctx = ExecContext::spawn("asap-infallible").unwrap();
    let (tx, rx) = mpsc::channel();

    let handle = When::infallible(|| true, || "ready")
        .completion(move |outcome| tx.send(outcome).unwrap())
        .schedule(&ctx.handle())
        .unwrap();

    assert!(handle.is_none());
    assert!(matches!(rx.try_recv().unwrap(), Outcome::Done("ready")));
}

#[test]
fn scheduled_executions_get_distinct_ids() {
    let ctx = ExecContext::spawn("asap-ids").unwrap();
    let handle = ctx.handle();

    let a = When::new(|| false, || Ok::<_, ()>(()))
        .retry_delay(Duration::from_secs(60))
        .schedule(&handle)
        .unwrap()
        .expect("must defer");
    let b = When::new(|| false, || Ok::<_, ()>(()))
        .retry_delay(Duration::from_secs(60))
        .schedule(&handle)
        .unwrap()
        .expect("must defer");

    assert_ne!(a.id(), b.id());
    a.cancel();
    b.cancel();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    /// `max_try_count = N` means exactly N predicate evaluations whether or
    /// not the first attempt was consumed synchronously.
    #[test]
    fn exhaustion_counts_total_attempts(n in 1u32..=8, skip in any::<bool>()) {
        let ctx = ExecContext::spawn("asap-prop").unwrap();
        let tries = Arc::new(AtomicU32::new(0));
        let (tx, rx) = mpsc::channel();

        let predicate = {
            let tries = tries.clone();
            move || {
                tries.fetch_add(1, Ordering::SeqCst);
                false
            }
        };
        let mut when = When::new(predicate, || Ok::<_, ()>(()))
            .max_try_count(n)
            .completion(move |outcome| tx.send(outcome).unwrap());
        if skip {
            when = when.skip_sync_try();
        }
        let handle = when.schedule(&ctx.handle()).unwrap();
        prop_assert!(handle.is_some());

        let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        prop_assert!(matches!(outcome, Outcome::NotRun(NotRunReason::Exhausted)));
        prop_assert_eq!(tries.load(Ordering::SeqCst), n);
    }
}
