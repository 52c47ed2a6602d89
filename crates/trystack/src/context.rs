//! The block stack, its state machine and the propagation engine.
//!
//! A [`Context`] owns every open block and every live exception of one thread.
//! Client code opens a block with [`Context::try_block`] or [`Context::with_block`];
//! the block's body closure is called once per stage and branches on the stage
//! it is in:
//!
//! ```
//! use trystack::{Context, ExceptionType, throw};
//!
//! static OOPS: ExceptionType = ExceptionType::new("OOPS", "Oops");
//!
//! let mut ctx = Context::new();
//! let mut caught = false;
//! ctx.try_block(|ctx| {
//!     if ctx.enter_trying() {
//!         throw!(ctx, OOPS, "x");
//!     } else if ctx.catch(&OOPS) {
//!         caught = ctx.exception().is_some_and(|oops| oops.message() == "x");
//!     }
//!     Ok(())
//! })
//! .unwrap();
//!
//! assert!(caught);
//! assert!(ctx.exception().is_none());
//! ctx.close().unwrap();
//! ```
//!
//! A throw stores the exception on the innermost block and returns an
//! [`Unwind`]. The body hands it back to the block loop with `?`, and the loop
//! carries on at the next stage: disposal, then catch clauses, then finally.

use std::{fmt, mem, panic::Location};

use smallvec::SmallVec;

use crate::{
    arena::{ExceptionArena, ExceptionId, ExceptionStats},
    block::{Block, Flow, ResumptionPoint, Unwind},
    error::{UsageError, fatal},
    exception::{Exception, ExceptionRef, Raise},
    exception_type::{ASSERTION_ERROR, ExceptionType},
    hooks::{Hooks, Termination},
    io::{DiagnosticSink, NoDiagnostics, StderrSink},
    limits::RuntimeLimits,
    stage::Stage,
    tracer::{BlockTracer, NoopTracer},
};

/// Blocks stored inline before the stack spills to the heap.
const INLINE_BLOCKS: usize = 8;

/// One execution environment: a block stack, the exceptions it holds and the
/// hooks that observe them.
///
/// A context belongs to a single thread. Dropping a context that still has open
/// blocks aborts the process; use [`Context::close`] to check for that instead.
pub struct Context<Tr: BlockTracer = NoopTracer> {
    blocks: SmallVec<[Block; INLINE_BLOCKS]>,
    exceptions: ExceptionArena,
    hooks: Hooks,
    limits: RuntimeLimits,
    diagnostics: Box<dyn DiagnosticSink>,
    tracer: Tr,
    /// Set once the context has been torn down by `close` or moved into a new tracer type.
    closed: bool,
}

impl Context {
    /// Creates a context with no hooks, default limits and diagnostics on stderr.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blocks: SmallVec::new(),
            exceptions: ExceptionArena::default(),
            hooks: Hooks::default(),
            limits: RuntimeLimits::default(),
            diagnostics: Box::new(StderrSink),
            tracer: NoopTracer,
            closed: false,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl<Tr: BlockTracer> Context<Tr> {
    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    /// Sets the hook run on every new exception, e.g. to attach a payload.
    #[must_use]
    pub fn on_initialize(mut self, hook: impl Fn(&mut Exception) + 'static) -> Self {
        self.hooks.initialize = Some(Box::new(hook));
        self
    }

    /// Sets the hook run on every exception right before it is freed.
    #[must_use]
    pub fn on_finalize(mut self, hook: impl Fn(ExceptionRef<'_>) + 'static) -> Self {
        self.hooks.finalize = Some(Box::new(hook));
        self
    }

    /// Replaces the trace written when an exception escapes every block.
    #[must_use]
    pub fn on_uncaught(mut self, hook: impl Fn(ExceptionRef<'_>) + 'static) -> Self {
        self.hooks.uncaught = Some(Box::new(hook));
        self
    }

    /// Sets what happens after an exception escapes every block.
    #[must_use]
    pub fn on_termination(mut self, termination: Termination) -> Self {
        self.hooks.termination = termination;
        self
    }

    /// Replaces the block depth and retry limits.
    #[must_use]
    pub fn with_limits(mut self, limits: RuntimeLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sends uncaught traces and the dangling-block report to `sink`.
    #[must_use]
    pub fn with_diagnostics(mut self, sink: impl DiagnosticSink + 'static) -> Self {
        self.diagnostics = Box::new(sink);
        self
    }

    /// Moves the configuration into a context traced by `tracer`.
    ///
    /// Meant for a context that has no open blocks yet.
    #[must_use]
    pub fn with_tracer<T: BlockTracer>(mut self, tracer: T) -> Context<T> {
        self.closed = true;
        Context {
            blocks: mem::take(&mut self.blocks),
            exceptions: mem::take(&mut self.exceptions),
            hooks: mem::take(&mut self.hooks),
            limits: mem::take(&mut self.limits),
            diagnostics: mem::replace(&mut self.diagnostics, Box::new(NoDiagnostics)),
            tracer,
            closed: false,
        }
    }

    #[must_use]
    pub fn tracer(&self) -> &Tr {
        &self.tracer
    }

    pub fn tracer_mut(&mut self) -> &mut Tr {
        &mut self.tracer
    }

    #[must_use]
    pub fn limits(&self) -> &RuntimeLimits {
        &self.limits
    }

    // ------------------------------------------------------------------------
    // Block loops
    // ------------------------------------------------------------------------

    /// Runs a try/catch/finally block.
    ///
    /// `body` is called in the TRYING, DISPOSING, CATCHING (only when an
    /// exception is pending) and FINALIZING stages. Returns `Err` when an
    /// exception escapes into an enclosing block; the caller must propagate it
    /// with `?`. An exception escaping the outermost block never returns.
    pub fn try_block(&mut self, body: impl FnMut(&mut Self) -> Flow) -> Flow {
        self.run_block(false, body)
    }

    /// Runs a with/use block: acquire, use, dispose.
    ///
    /// Like [`Context::try_block`] with an extra ACQUIRING stage first. If
    /// acquisition throws, the block skips both use and disposal.
    pub fn with_block(&mut self, body: impl FnMut(&mut Self) -> Flow) -> Flow {
        self.run_block(true, body)
    }

    fn run_block(&mut self, should_acquire: bool, mut body: impl FnMut(&mut Self) -> Flow) -> Flow {
        let point = self.start(should_acquire);
        while self.next()? {
            if let Err(unwind) = body(self) {
                self.resume(point, unwind);
            }
        }
        Ok(())
    }

    /// Pushes a new block and returns the point its loop resumes at.
    ///
    /// Low-level entry used by the block loops: the caller must then drive the
    /// block with [`Context::next`] until it returns `Ok(false)` or `Err`, and
    /// pass every `Unwind` its body produces to [`Context::resume`].
    #[track_caller]
    pub fn start(&mut self, should_acquire: bool) -> ResumptionPoint {
        let limit = self.limits.max_block_depth;
        if self.blocks.len() >= limit {
            fatal(UsageError::DepthExceeded { limit });
        }
        let point = ResumptionPoint::new(self.blocks.len());
        let block = Block::new(should_acquire);
        self.tracer.on_block_start(point, block.stage);
        self.blocks.push(block);
        point
    }

    /// Advances the innermost block to its next stage.
    ///
    /// Returns `Ok(true)` while the block has a stage left to run. Once it is
    /// done the block is popped: a caught exception is released, an uncaught one
    /// moves to the outer block (returned as `Err`) or escapes to the top level.
    #[track_caller]
    pub fn next(&mut self) -> Flow<bool> {
        let point = self.innermost_point("next");
        let block = &mut self.blocks[point.index()];
        let from = block.stage;
        let to = from.next(block.pending().is_some());
        block.stage = to;
        self.tracer.on_stage_change(point, from, to);
        if to < Stage::Done {
            return Ok(true);
        }

        let Some(block) = self.blocks.pop() else {
            unreachable!("innermost block checked above");
        };
        let propagated = block.pending().is_some();
        self.tracer.on_block_end(point, propagated);
        match block.exception {
            Some(id) if propagated => Err(self.propagate(id)),
            Some(id) => {
                self.release(id);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Accepts an `Unwind` returned by the body of the block at `point`.
    ///
    /// An unwind addressed to any other block is a fatal usage error.
    #[track_caller]
    #[expect(clippy::unused_self)]
    pub fn resume(&self, point: ResumptionPoint, unwind: Unwind) {
        if unwind.target() != point {
            fatal(UsageError::ForeignUnwind {
                expected: point,
                found: unwind.target(),
            });
        }
    }

    // ------------------------------------------------------------------------
    // Stage queries
    // ------------------------------------------------------------------------

    /// Stage of the innermost block.
    #[track_caller]
    #[must_use]
    pub fn stage(&self) -> Stage {
        self.blocks[self.innermost_point("stage").index()].stage
    }

    #[track_caller]
    #[must_use]
    pub fn enter_acquiring(&self) -> bool {
        self.stage() == Stage::Acquiring
    }

    #[track_caller]
    #[must_use]
    pub fn enter_trying(&self) -> bool {
        self.stage() == Stage::Trying
    }

    #[track_caller]
    #[must_use]
    pub fn enter_disposing(&self) -> bool {
        self.stage() == Stage::Disposing
    }

    #[track_caller]
    #[must_use]
    pub fn enter_finally(&self) -> bool {
        self.stage() == Stage::Finalizing
    }

    /// Catch clause: true if the pending exception is an instance of `exception_type`.
    ///
    /// Only matches in the CATCHING stage and never matches an uncatchable
    /// exception. A match marks the exception as caught, so later clauses of the
    /// same block don't run.
    #[track_caller]
    pub fn catch(&mut self, exception_type: &ExceptionType) -> bool {
        self.catch_matching("catch", |exception| exception.is_instance_of(exception_type))
    }

    /// Wildcard catch clause: matches any catchable pending exception.
    #[track_caller]
    pub fn catch_all(&mut self) -> bool {
        self.catch_matching("catch_all", |_| true)
    }

    #[track_caller]
    fn catch_matching(&mut self, operation: &'static str, filter: impl FnOnce(ExceptionRef<'_>) -> bool) -> bool {
        let point = self.innermost_point(operation);
        let block = &self.blocks[point.index()];
        if !block.stage.is_catching() {
            return false;
        }
        let Some(id) = block.pending() else {
            return false;
        };
        let exception = ExceptionRef::new(&self.exceptions, id);
        if !exception.exception_type().is_catchable() || !filter(exception) {
            return false;
        }
        self.tracer.on_catch(point, exception.name());
        self.blocks[point.index()].uncaught = false;
        true
    }

    // ------------------------------------------------------------------------
    // Throwing
    // ------------------------------------------------------------------------

    /// Throws an exception built from `raise`.
    ///
    /// The returned `Unwind` must be returned from the current block body. When
    /// no block is open the exception is uncaught and this never returns.
    #[track_caller]
    pub fn raise(&mut self, raise: Raise<'_>) -> Unwind {
        let cause = self.capture_cause();
        self.raise_with_cause(raise, cause)
    }

    /// Throws an exception chained to `cause`, whose reference the new
    /// exception takes over.
    #[track_caller]
    fn raise_with_cause(&mut self, raise: Raise<'_>, cause: Option<ExceptionId>) -> Unwind {
        let raise = raise.located_or(Location::caller());
        let id = self.exceptions.allocate(Exception::new(raise, cause));
        let exception = ExceptionRef::new(&self.exceptions, id);
        self.tracer
            .on_throw(exception.name(), exception.cause().map(ExceptionRef::name));
        if let Some(initialize) = &self.hooks.initialize {
            initialize(self.exceptions.get_mut(id));
        }
        self.propagate(id)
    }

    /// Throws `exception_type` with a formatted message.
    #[track_caller]
    pub fn throw(&mut self, exception_type: &'static ExceptionType, message: fmt::Arguments<'_>) -> Unwind {
        self.raise(Raise::new(exception_type).message(message))
    }

    /// Throws `exception_type` with its default message.
    #[track_caller]
    pub fn throw_default(&mut self, exception_type: &'static ExceptionType) -> Unwind {
        self.raise(Raise::new(exception_type))
    }

    /// Throws the uncatchable [`ASSERTION_ERROR`] unless `condition` holds.
    #[track_caller]
    pub fn assert_that(&mut self, condition: bool, message: &str) -> Flow {
        if condition {
            return Ok(());
        }
        Err(self.raise(Raise::new(&ASSERTION_ERROR).message(format_args!("{message}"))))
    }

    /// Picks the exception the next throw is chained to.
    ///
    /// The innermost block's own uncaught exception is about to be superseded by
    /// the new one and is skipped unless the block is catching it.
    fn capture_cause(&mut self) -> Option<ExceptionId> {
        let innermost = self.blocks.len().checked_sub(1)?;
        let cause = self.blocks.iter().enumerate().rev().find_map(|(index, block)| {
            let id = block.exception?;
            (block.stage.is_catching() || (block.uncaught && index != innermost)).then_some(id)
        })?;
        self.exceptions.inc_ref(cause);
        Some(cause)
    }

    /// Hands a thrown exception to the innermost block.
    fn propagate(&mut self, id: ExceptionId) -> Unwind {
        let Some(index) = self.blocks.len().checked_sub(1) else {
            self.escape(id)
        };
        let point = ResumptionPoint::new(index);
        let block = &mut self.blocks[index];
        let superseded = block.exception.replace(id).filter(|&previous| previous != id);
        block.uncaught = true;
        if block.stage == Stage::Acquiring {
            // the resource was never acquired: skip both use and disposal
            block.stage = Stage::Disposing;
        }
        if let Some(previous) = superseded {
            self.release(previous);
        }
        self.tracer
            .on_propagate(Some(point), ExceptionRef::new(&self.exceptions, id).name());
        Unwind::to(point)
    }

    /// Top-level path for an exception that escaped every block.
    fn escape(&mut self, id: ExceptionId) -> ! {
        let exception = ExceptionRef::new(&self.exceptions, id);
        self.tracer.on_propagate(None, exception.name());
        match &self.hooks.uncaught {
            Some(uncaught) => uncaught(exception),
            None => self
                .diagnostics
                .write_diagnostic(&exception.to_report().render_trace()),
        }
        self.release(id);
        self.hooks.termination.terminate()
    }

    // ------------------------------------------------------------------------
    // Retry / reacquire
    // ------------------------------------------------------------------------

    /// Runs the innermost block again, from TRYING (`retry`) or from ACQUIRING
    /// (`reacquire`), discarding its exception.
    ///
    /// Call it from a catch clause or a finally body. Once the block has been
    /// restarted `max_attempts` times this throws `fallback` instead, with the
    /// held exception as its cause. An uncatchable exception is never
    /// discarded: the call returns `Ok(())` and the exception keeps propagating.
    #[track_caller]
    pub fn restart(&mut self, should_reacquire: bool, max_attempts: u32, fallback: Raise<'_>) -> Flow {
        let operation = if should_reacquire { "reacquire" } else { "retry" };
        let Some(index) = self.blocks.len().checked_sub(1) else {
            fatal(UsageError::NothingToRepeat)
        };
        let block = &self.blocks[index];
        if !block.stage.allows_restart() {
            fatal(UsageError::InvalidStage {
                operation,
                stage: block.stage,
            });
        }
        if let Some(id) = block.exception
            && !self.exceptions.get(id).exception_type().is_catchable()
        {
            return Ok(());
        }
        let attempts = if should_reacquire {
            block.reacquire_attempts
        } else {
            block.retry_attempts
        };
        if attempts >= self.limits.clamp_attempts(max_attempts) {
            // the fallback is caused by the exception it replaces, even from a finally body
            let held = block.exception;
            let cause = match held {
                Some(id) => {
                    self.exceptions.inc_ref(id);
                    Some(id)
                }
                None => self.capture_cause(),
            };
            return Err(self.raise_with_cause(fallback, cause));
        }

        let point = ResumptionPoint::new(index);
        let block = &mut self.blocks[index];
        let attempt = attempts + 1;
        if should_reacquire {
            block.reacquire_attempts = attempt;
            block.stage = Stage::Beginning;
        } else {
            block.retry_attempts = attempt;
            block.stage = Stage::Acquiring;
        }
        block.uncaught = false;
        let discarded = block.exception.take();
        if let Some(id) = discarded {
            self.release(id);
        }
        self.tracer.on_restart(point, should_reacquire, attempt);
        Err(Unwind::to(point))
    }

    /// Re-runs the try stage of the innermost block, up to `max_attempts` times.
    #[track_caller]
    pub fn retry(&mut self, max_attempts: u32, fallback: Raise<'_>) -> Flow {
        self.restart(false, max_attempts, fallback)
    }

    /// Re-runs the acquisition of the innermost with-block, up to `max_attempts` times.
    #[track_caller]
    pub fn reacquire(&mut self, max_attempts: u32, fallback: Raise<'_>) -> Flow {
        self.restart(true, max_attempts, fallback)
    }

    // ------------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------------

    /// Exception held by the innermost block, if any.
    ///
    /// Inside a catch clause this is the exception being handled; after the
    /// outermost block completes it is `None`.
    #[must_use]
    pub fn exception(&self) -> Option<ExceptionRef<'_>> {
        let id = self.blocks.last()?.exception?;
        Some(ExceptionRef::new(&self.exceptions, id))
    }

    /// True if the innermost block holds an exception no catch clause has matched.
    #[must_use]
    pub fn is_uncaught(&self) -> bool {
        self.blocks.last().is_some_and(|block| block.pending().is_some())
    }

    /// Number of open blocks.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn exception_stats(&self) -> ExceptionStats {
        self.exceptions.stats()
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    /// Tears the context down, releasing every exception it still holds.
    ///
    /// Returns [`UsageError::DanglingBlock`] if blocks were left open.
    pub fn close(mut self) -> Result<(), UsageError> {
        let depth = self.blocks.len();
        self.release_all();
        self.closed = true;
        if depth == 0 {
            Ok(())
        } else {
            Err(UsageError::DanglingBlock { depth })
        }
    }

    fn release_all(&mut self) {
        while let Some(block) = self.blocks.pop() {
            if let Some(id) = block.exception {
                self.release(id);
            }
        }
    }

    /// Drops one owner of `id`, running the finalize hook for everything freed.
    fn release(&mut self, id: ExceptionId) {
        let Self {
            exceptions, hooks, tracer, ..
        } = self;
        exceptions.dec_ref(id, |exception| {
            tracer.on_release(exception.name());
            if let Some(finalize) = &hooks.finalize {
                finalize(exception);
            }
        });
    }

    #[track_caller]
    fn innermost_point(&self, operation: &'static str) -> ResumptionPoint {
        match self.blocks.len().checked_sub(1) {
            Some(index) => ResumptionPoint::new(index),
            None => fatal(UsageError::NoBlock { operation }),
        }
    }
}

impl<Tr: BlockTracer> Drop for Context<Tr> {
    fn drop(&mut self) {
        if self.closed || std::thread::panicking() {
            return;
        }
        if self.blocks.is_empty() {
            self.release_all();
            return;
        }
        let error = UsageError::DanglingBlock {
            depth: self.blocks.len(),
        };
        self.diagnostics.write_diagnostic(&format!("[runtime] {error}\n"));
        std::process::abort();
    }
}

impl<Tr: BlockTracer> fmt::Debug for Context<Tr> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("blocks", &self.blocks)
            .field("exceptions", &self.exceptions.stats())
            .field("hooks", &self.hooks)
            .field("limits", &self.limits)
            .field("tracer", &self.tracer)
            .finish_non_exhaustive()
    }
}
