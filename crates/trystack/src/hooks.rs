//! Pluggable callbacks invoked by a [`Context`](crate::Context).
//!
//! Every hook is optional. Hooks run on the thread that owns the context and
//! may not re-enter the context: they receive the exception, not the context.

use std::fmt;

use crate::exception::{Exception, ExceptionRef};

pub(crate) type InitializeHook = Box<dyn Fn(&mut Exception)>;
pub(crate) type ExceptionHook = Box<dyn Fn(ExceptionRef<'_>)>;

/// What happens after an exception escapes every block.
#[derive(Default)]
pub enum Termination {
    /// Exit the process with a failure status.
    #[default]
    ExitProcess,
    /// End only the calling thread by unwinding it with a [`ThreadTerminated`]
    /// payload. The thread's joiner observes a panic.
    ///
    /// On the main thread the unwind ends the process with the panic exit
    /// status (101 on most platforms), not the status 1 of `ExitProcess`.
    ExitThread,
    /// Runs the closure; if it returns, the process exits as with `ExitProcess`.
    Custom(Box<dyn Fn()>),
}

impl Termination {
    pub(crate) fn terminate(&self) -> ! {
        match self {
            Self::ExitProcess => {}
            Self::ExitThread => std::panic::resume_unwind(Box::new(ThreadTerminated)),
            Self::Custom(handler) => handler(),
        }
        std::process::exit(1)
    }
}

impl fmt::Debug for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExitProcess => f.write_str("ExitProcess"),
            Self::ExitThread => f.write_str("ExitThread"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Unwind payload of a thread ended by [`Termination::ExitThread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadTerminated;

#[derive(Default)]
pub(crate) struct Hooks {
    /// Runs once per exception, right after it is created and linked to its cause.
    pub initialize: Option<InitializeHook>,
    /// Runs once per exception, right before it is freed.
    pub finalize: Option<ExceptionHook>,
    /// Replaces the default trace printed when an exception escapes every block.
    pub uncaught: Option<ExceptionHook>,
    pub termination: Termination,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("initialize", &self.initialize.is_some())
            .field("finalize", &self.finalize.is_some())
            .field("uncaught", &self.uncaught.is_some())
            .field("termination", &self.termination)
            .finish()
    }
}
