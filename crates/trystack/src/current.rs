//! Per-thread default context.
//!
//! Code that cannot pass a `&mut Context` around can use the context of the
//! calling thread instead. It is created on first use with default hooks and
//! dropped when the thread exits, where a block still open is reported as
//! dangling.

use std::cell::RefCell;

use crate::{
    context::Context,
    error::{UsageError, fatal},
};

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// Runs `f` with the calling thread's context, creating it if needed.
///
/// Calls must not nest: the context is exclusively borrowed for the duration of
/// `f`, and a nested call is a fatal usage error, as is a call made while the
/// thread is tearing its context down.
#[track_caller]
pub fn with_current<R>(f: impl FnOnce(&mut Context) -> R) -> R {
    CURRENT
        .try_with(|current| {
            let Ok(mut current) = current.try_borrow_mut() else {
                fatal(UsageError::NoContext)
            };
            f(current.get_or_insert_with(Context::new))
        })
        .unwrap_or_else(|_| fatal(UsageError::NoContext))
}

/// Installs `context` as the calling thread's context, e.g. to configure hooks.
///
/// Returns the previous context, if one had been created.
#[track_caller]
pub fn install(context: Context) -> Option<Context> {
    swap(Some(context))
}

/// Removes the calling thread's context so it can be closed explicitly.
#[track_caller]
pub fn take() -> Option<Context> {
    swap(None)
}

#[track_caller]
fn swap(context: Option<Context>) -> Option<Context> {
    CURRENT
        .try_with(|current| match current.try_borrow_mut() {
            Ok(mut current) => std::mem::replace(&mut *current, context),
            Err(_) => fatal(UsageError::NoContext),
        })
        .unwrap_or_else(|_| fatal(UsageError::NoContext))
}
