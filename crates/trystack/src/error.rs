use std::{
    fmt,
    io::{self, Write as _},
    panic::Location,
};

use crate::{block::ResumptionPoint, stage::Stage};

/// Misuse of the block protocol.
///
/// These are programming errors, not exceptions: they cannot be caught and are
/// reported through [`fatal`], which aborts. Only [`Context::close`](crate::Context::close)
/// returns one, for the dangling-block case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    /// An operation that needs an open block was called outside any block.
    NoBlock { operation: &'static str },
    /// A restart was attempted from a stage that does not allow it.
    InvalidStage { operation: &'static str, stage: Stage },
    /// `retry`/`reacquire` outside any try/with block.
    NothingToRepeat,
    /// Opening another block would exceed the configured maximum nesting.
    DepthExceeded { limit: usize },
    /// A block loop received an unwind addressed to another block.
    ForeignUnwind { expected: ResumptionPoint, found: ResumptionPoint },
    /// The context was torn down with blocks still open.
    DanglingBlock { depth: usize },
    /// The per-thread context is unavailable (already borrowed, or being torn down).
    NoContext,
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoBlock { operation } => write!(f, "{operation} called outside any try/with block"),
            Self::InvalidStage { operation, stage } => {
                write!(f, "{operation} is not allowed while the block is {stage}")
            }
            Self::NothingToRepeat => write!(f, "no enclosing try/with block to repeat"),
            Self::DepthExceeded { limit } => write!(f, "maximum block depth exceeded ({limit})"),
            Self::ForeignUnwind { expected, found } => {
                write!(f, "unwind addressed to {found} reached the loop of {expected}")
            }
            Self::DanglingBlock { .. } => write!(f, "dangling block leaked"),
            Self::NoContext => write!(f, "no exception context available"),
        }
    }
}

impl std::error::Error for UsageError {}

/// Reports a usage error on stderr as `[runtime] <message>` and aborts the process.
///
/// The block stack is no longer trustworthy once the protocol is broken, so
/// there is no unwinding: `catch_unwind` cannot intercept a usage error, and
/// no destructor runs.
#[cold]
#[track_caller]
pub fn fatal(error: UsageError) -> ! {
    let location = Location::caller();
    let mut stderr = io::stderr().lock();
    // the process is going down either way
    let _ = writeln!(stderr, "[runtime] {error}\n    reported at {location}");
    let _ = stderr.flush();
    std::process::abort()
}
