//! Tests for `retry` and `reacquire`.

use pretty_assertions::assert_eq;
use trystack::{ASSERTION_ERROR, Context, ExceptionType, Raise, RuntimeLimits, Termination, throw};

static FLAKY: ExceptionType = ExceptionType::new("FLAKY", "flaky operation failed");
static BUSY: ExceptionType = ExceptionType::new("BUSY", "resource busy");
static GAVE_UP: ExceptionType = ExceptionType::new("GAVE_UP", "gave up");

// =============================================================================
// 1. Retry
// =============================================================================

/// Three failures, retried from finally with max 3: the try body runs four times.
#[test]
fn retry_from_finally_runs_try_four_times() {
    let mut ctx = Context::new();
    let (mut tries, mut finally_runs) = (0, 0);
    ctx.try_block(|ctx| {
        if ctx.enter_trying() {
            tries += 1;
            if tries <= 3 {
                throw!(ctx, FLAKY, "attempt {tries}");
            }
        } else if ctx.enter_finally() {
            finally_runs += 1;
            if ctx.is_uncaught() {
                ctx.retry(3, Raise::new(&GAVE_UP))?;
            }
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(tries, 4);
    assert_eq!(finally_runs, 4);
    assert_eq!(ctx.exception_stats().live_exceptions, 0);
    ctx.close().unwrap();
}

/// Once the attempts are used up the fallback is thrown, caused by the last failure.
#[test]
fn retry_exhaustion_throws_fallback() {
    let mut ctx = Context::new();
    let mut tries = 0;
    let mut outcome = None;
    ctx.try_block(|ctx| {
        if ctx.enter_trying() {
            ctx.try_block(|ctx| {
                if ctx.enter_trying() {
                    tries += 1;
                    throw!(ctx, FLAKY, "attempt {tries}");
                } else if ctx.catch(&FLAKY) {
                    ctx.retry(2, Raise::new(&GAVE_UP).message(format_args!("after {tries} tries")))?;
                }
                Ok(())
            })?;
        } else if ctx.catch(&GAVE_UP) {
            let gave_up = ctx.exception().unwrap();
            outcome = Some((gave_up.message().to_owned(), gave_up.cause().map(|c| c.to_string())));
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(tries, 3);
    assert_eq!(
        outcome,
        Some(("after 3 tries".to_owned(), Some("FLAKY: attempt 3".to_owned())))
    );
    ctx.close().unwrap();
}

/// Exhausting a retry from a finally body chains the fallback to the last
/// failure, which is then released together with it.
#[test]
fn retry_exhaustion_from_finally_chains_last_failure() {
    let mut ctx = Context::new();
    let mut tries = 0;
    let mut outcome = None;
    ctx.try_block(|ctx| {
        if ctx.enter_trying() {
            ctx.try_block(|ctx| {
                if ctx.enter_trying() {
                    tries += 1;
                    throw!(ctx, FLAKY, "attempt {tries}");
                } else if ctx.enter_finally() && ctx.is_uncaught() {
                    ctx.retry(1, Raise::new(&GAVE_UP))?;
                }
                Ok(())
            })?;
        } else if ctx.catch(&GAVE_UP) {
            let gave_up = ctx.exception().unwrap();
            outcome = Some((
                gave_up.cause().map(|cause| cause.to_string()),
                gave_up.cause().map(|cause| cause.ref_count()),
            ));
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(tries, 2);
    assert_eq!(outcome, Some((Some("FLAKY: attempt 2".to_owned()), Some(1))));
    assert_eq!(ctx.exception_stats().live_exceptions, 0);
    ctx.close().unwrap();
}

/// Exhausting a reacquire from a finally body chains the failed acquisition.
#[test]
fn reacquire_exhaustion_from_finally_chains_last_failure() {
    let mut ctx = Context::new();
    let mut acquisitions = 0;
    let mut cause = None;
    ctx.try_block(|ctx| {
        if ctx.enter_trying() {
            ctx.with_block(|ctx| {
                if ctx.enter_acquiring() {
                    acquisitions += 1;
                    throw!(ctx, BUSY, "acquisition {acquisitions}");
                } else if ctx.enter_finally() && ctx.is_uncaught() {
                    ctx.reacquire(2, Raise::new(&GAVE_UP))?;
                }
                Ok(())
            })?;
        } else if ctx.catch(&GAVE_UP) {
            cause = ctx.exception().unwrap().cause().map(|cause| cause.to_string());
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(acquisitions, 3);
    assert_eq!(cause.as_deref(), Some("BUSY: acquisition 3"));
    ctx.close().unwrap();
}

/// A restarted block starts with a clean slate: no exception, nothing uncaught.
#[test]
fn retry_clears_held_exception() {
    let mut ctx = Context::new();
    let mut observed = Vec::new();
    let mut tries = 0;
    ctx.try_block(|ctx| {
        if ctx.enter_trying() {
            tries += 1;
            observed.push((ctx.exception().is_some(), ctx.is_uncaught()));
            if tries == 1 {
                throw!(ctx, FLAKY);
            }
        } else if ctx.catch(&FLAKY) {
            ctx.retry(1, Raise::new(&GAVE_UP))?;
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(observed, [(false, false), (false, false)]);
    ctx.close().unwrap();
}

/// The runtime limit caps the attempts a caller may ask for.
#[test]
fn limits_cap_retry_attempts() {
    let mut ctx = Context::new().with_limits(RuntimeLimits::new().max_retry_attempts(1));
    let mut tries = 0;
    let mut gave_up = false;
    ctx.try_block(|ctx| {
        if ctx.enter_trying() {
            ctx.try_block(|ctx| {
                if ctx.enter_trying() {
                    tries += 1;
                    throw!(ctx, FLAKY);
                } else if ctx.catch(&FLAKY) {
                    ctx.retry(10, Raise::new(&GAVE_UP))?;
                }
                Ok(())
            })?;
        } else if ctx.catch(&GAVE_UP) {
            gave_up = true;
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(tries, 2);
    assert!(gave_up);
    ctx.close().unwrap();
}

// =============================================================================
// 2. Reacquire
// =============================================================================

/// Acquisition fails three times, reacquired with max 3: four acquisitions,
/// one use, one disposal.
#[test]
fn reacquire_from_catch() {
    let mut ctx = Context::new();
    let (mut acquisitions, mut uses, mut disposals) = (0, 0, 0);
    ctx.with_block(|ctx| {
        if ctx.enter_acquiring() {
            acquisitions += 1;
            if acquisitions <= 3 {
                throw!(ctx, BUSY, "attempt {acquisitions}");
            }
        } else if ctx.enter_trying() {
            uses += 1;
        } else if ctx.enter_disposing() {
            disposals += 1;
        } else if ctx.catch(&BUSY) {
            ctx.reacquire(3, Raise::new(&GAVE_UP))?;
        }
        Ok(())
    })
    .unwrap();
    assert_eq!((acquisitions, uses, disposals), (4, 1, 1));
    ctx.close().unwrap();
}

/// Retry and reacquire keep separate counters.
#[test]
fn retry_and_reacquire_count_separately() {
    let mut ctx = Context::new();
    let (mut acquisitions, mut uses) = (0, 0);
    ctx.with_block(|ctx| {
        if ctx.enter_acquiring() {
            acquisitions += 1;
            if acquisitions == 1 {
                throw!(ctx, BUSY);
            }
        } else if ctx.enter_trying() {
            uses += 1;
            if uses == 1 {
                throw!(ctx, FLAKY);
            }
        } else if ctx.catch(&BUSY) {
            ctx.reacquire(1, Raise::new(&GAVE_UP))?;
        } else if ctx.catch(&FLAKY) {
            ctx.retry(1, Raise::new(&GAVE_UP))?;
        }
        Ok(())
    })
    .unwrap();
    assert_eq!((acquisitions, uses), (2, 2));
    ctx.close().unwrap();
}

// =============================================================================
// 3. Uncatchable exceptions
// =============================================================================

/// Retry refuses to discard an uncatchable exception: it returns normally and
/// the exception keeps propagating.
#[test]
fn retry_refuses_uncatchable_exception() {
    let outcome = std::thread::spawn(|| {
        let mut ctx = Context::new()
            .with_diagnostics(trystack::NoDiagnostics)
            .on_termination(Termination::ExitThread);
        let mut tries = 0;
        let mut retry_returned = false;
        let mut wildcard_matched = false;
        let escaped = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            ctx.try_block(|ctx| {
                if ctx.enter_trying() {
                    tries += 1;
                    ctx.assert_that(tries > 1, "first attempt")?;
                } else if ctx.catch_all() {
                    wildcard_matched = true;
                } else if ctx.enter_finally() {
                    let is_assertion = ctx.exception().is_some_and(|e| e.is_instance_of(&ASSERTION_ERROR));
                    ctx.retry(3, Raise::new(&GAVE_UP))?;
                    retry_returned = is_assertion;
                }
                Ok(())
            })
        }))
        .is_err();
        (tries, retry_returned, wildcard_matched, escaped)
    })
    .join()
    .unwrap();
    assert_eq!(outcome, (1, true, false, true));
}
