//! Misuse of the block protocol is fatal: each of these aborts the process with
//! a `[runtime]` message instead of being thrown as an exception.
//!
//! Every test runs its body in a child process, see `common::run_aborting`.

mod common;

use std::panic::{self, AssertUnwindSafe};

use common::run_aborting;
use trystack::{Context, ExceptionType, Raise, RuntimeLimits, UsageError, fatal};

static OOPS: ExceptionType = ExceptionType::new("OOPS", "Oops");

/// Asserts that `stderr` holds exactly one `[runtime]` report with `message`.
fn assert_reported(stderr: &str, message: &str) {
    let expected = format!("[runtime] {message}\n");
    assert!(stderr.contains(&expected), "missing {expected:?} in:\n{stderr}");
    assert_eq!(stderr.matches("[runtime]").count(), 1, "unexpected reports in:\n{stderr}");
}

// =============================================================================
// 1. Restarts
// =============================================================================

/// `retry` outside any block has nothing to repeat.
#[test]
fn retry_outside_block() {
    let stderr = run_aborting("retry_outside_block", || {
        let mut ctx = Context::new();
        let _ = ctx.retry(3, Raise::new(&OOPS));
    });
    assert_reported(&stderr, "no enclosing try/with block to repeat");
}

/// `reacquire` outside any block has nothing to repeat either.
#[test]
fn reacquire_outside_block() {
    let stderr = run_aborting("reacquire_outside_block", || {
        let mut ctx = Context::new();
        let _ = ctx.reacquire(3, Raise::new(&OOPS));
    });
    assert_reported(&stderr, "no enclosing try/with block to repeat");
}

/// Restarting is only allowed from a catch clause or a finally body.
#[test]
fn retry_from_try_body() {
    let stderr = run_aborting("retry_from_try_body", || {
        let mut ctx = Context::new();
        let _ = ctx.try_block(|ctx| {
            if ctx.enter_trying() {
                ctx.retry(1, Raise::new(&OOPS))?;
            }
            Ok(())
        });
    });
    assert_reported(&stderr, "retry is not allowed while the block is TRYING");
}

/// Reacquiring while the resource is being disposed is rejected as well.
#[test]
fn reacquire_from_dispose_body() {
    let stderr = run_aborting("reacquire_from_dispose_body", || {
        let mut ctx = Context::new();
        let _ = ctx.with_block(|ctx| {
            if ctx.enter_disposing() {
                ctx.reacquire(1, Raise::new(&OOPS))?;
            }
            Ok(())
        });
    });
    assert_reported(&stderr, "reacquire is not allowed while the block is DISPOSING");
}

// =============================================================================
// 2. Block stack
// =============================================================================

/// Opening more blocks than the configured depth is fatal.
#[test]
fn depth_limit() {
    let stderr = run_aborting("depth_limit", || {
        let mut ctx = Context::new().with_limits(RuntimeLimits::new().max_block_depth(2));
        let _ = ctx.try_block(|ctx| {
            if ctx.enter_trying() {
                ctx.try_block(|ctx| {
                    if ctx.enter_trying() {
                        ctx.try_block(|_| Ok(()))?;
                    }
                    Ok(())
                })?;
            }
            Ok(())
        });
    });
    assert_reported(&stderr, "maximum block depth exceeded (2)");
}

/// Stage queries need an open block.
#[test]
fn stage_outside_block() {
    let stderr = run_aborting("stage_outside_block", || {
        let ctx = Context::new();
        let _ = ctx.stage();
    });
    assert_reported(&stderr, "stage called outside any try/with block");
}

/// Catch clauses need an open block.
#[test]
fn catch_outside_block() {
    let stderr = run_aborting("catch_outside_block", || {
        let mut ctx = Context::new();
        let _ = ctx.catch(&OOPS);
    });
    assert_reported(&stderr, "catch called outside any try/with block");
}

/// An unwind handed to a loop it is not addressed to is fatal.
#[test]
fn foreign_unwind() {
    let stderr = run_aborting("foreign_unwind", || {
        let mut ctx = Context::new();
        let outer = ctx.start(false);
        assert!(ctx.next().unwrap());
        let _inner = ctx.start(false);
        assert!(ctx.next().unwrap());
        let unwind = ctx.throw_default(&OOPS);
        ctx.resume(outer, unwind);
    });
    assert_reported(&stderr, "unwind addressed to block 1 reached the loop of block 0");
}

// =============================================================================
// 3. Reporting
// =============================================================================

/// `catch_unwind` does not intercept a usage error, so the context can never
/// be reused with a broken block stack.
#[test]
fn usage_error_is_not_unwound() {
    let stderr = run_aborting("usage_error_is_not_unwound", || {
        let mut ctx = Context::new();
        let caught = panic::catch_unwind(AssertUnwindSafe(|| ctx.retry(1, Raise::new(&OOPS))));
        eprintln!("survived: {}", caught.is_err());
        let _ = ctx.depth();
    });
    assert_reported(&stderr, "no enclosing try/with block to repeat");
    assert!(!stderr.contains("survived"), "usage error was unwound:\n{stderr}");
}

/// The report names the caller's location.
#[test]
fn report_includes_location() {
    let expected_line = line!() + 2;
    let stderr = run_aborting("report_includes_location", || {
        fatal(UsageError::NoContext);
    });
    assert_reported(&stderr, "no exception context available");
    let origin = format!("    reported at {}:{expected_line}:", file!());
    assert!(stderr.contains(&origin), "missing {origin:?} in:\n{stderr}");
}
