use std::fmt;

use crate::{arena::ExceptionId, stage::Stage};

/// Identifies the block a loop belongs to: its index in the context's block stack.
///
/// Returned by [`Context::start`](crate::Context::start) and carried by every
/// [`Unwind`] so the receiving loop can check that the jump is addressed to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct ResumptionPoint(usize);

impl ResumptionPoint {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Stack index of the block, 0 for the outermost.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ResumptionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block {}", self.0)
    }
}

/// Non-local jump back to a block loop.
///
/// Produced by a throw or a restart. Bodies must propagate it unchanged with `?`
/// until it reaches the loop that owns [`Unwind::target`]; that loop resumes at
/// its next stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "an Unwind must be returned to its block loop"]
pub struct Unwind {
    target: ResumptionPoint,
}

impl Unwind {
    pub(crate) fn to(target: ResumptionPoint) -> Self {
        Self { target }
    }

    #[must_use]
    pub fn target(self) -> ResumptionPoint {
        self.target
    }
}

impl fmt::Display for Unwind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unwind to {}", self.target)
    }
}

/// Result of code running inside a block body.
pub type Flow<T = ()> = Result<T, Unwind>;

/// One open try/with scope.
#[derive(Debug)]
pub(crate) struct Block {
    pub stage: Stage,
    /// Set while the held exception has been thrown and not yet caught.
    pub uncaught: bool,
    pub exception: Option<ExceptionId>,
    pub retry_attempts: u32,
    pub reacquire_attempts: u32,
}

impl Block {
    pub fn new(should_acquire: bool) -> Self {
        Self {
            stage: if should_acquire { Stage::Beginning } else { Stage::Acquiring },
            uncaught: false,
            exception: None,
            retry_attempts: 0,
            reacquire_attempts: 0,
        }
    }

    /// Exception that would be matched by a catch clause in this block.
    pub fn pending(&self) -> Option<ExceptionId> {
        self.exception.filter(|_| self.uncaught)
    }
}
