//! Block execution tracing.
//!
//! A [`Context`](crate::Context) is parameterized by a [`BlockTracer`] and calls
//! it at every block event. With the default [`NoopTracer`] all hooks compile
//! away through monomorphization.
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | Zero-cost no-op (default) |
//! | [`StderrTracer`] | Human-readable block log to stderr |
//! | [`ProfilingTracer`] | Per-type throw/catch counters and nesting depth |
//! | [`RecordingTracer`] | Full event recording for assertions or post-mortem |
//!
//! ```
//! use trystack::{Context, ProfilingTracer};
//!
//! let mut ctx = Context::new().with_tracer(ProfilingTracer::new());
//! ctx.try_block(|_ctx| Ok(())).unwrap();
//! assert_eq!(ctx.tracer().report().blocks_opened, 1);
//! # ctx.close().unwrap();
//! ```

use std::fmt;

use ahash::AHashMap;

use crate::{block::ResumptionPoint, stage::Stage};

/// Trace event emitted by a context.
///
/// Used by [`RecordingTracer`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TraceEvent {
    /// A block was pushed.
    BlockStart {
        point: ResumptionPoint,
        /// Stage the block starts at.
        stage: Stage,
    },
    /// The innermost block advanced.
    StageChange {
        point: ResumptionPoint,
        from: Stage,
        to: Stage,
    },
    /// A block finished and was popped.
    BlockEnd {
        point: ResumptionPoint,
        /// True if its exception escaped to the outer block or top level.
        propagated: bool,
    },
    /// An exception was created.
    Throw {
        name: String,
        /// Name of the exception chained as cause, if any.
        cause: Option<String>,
    },
    /// A catch clause matched.
    Catch { point: ResumptionPoint, name: String },
    /// An exception reached a block, or the top level when `point` is `None`.
    Propagate { point: Option<ResumptionPoint>, name: String },
    /// A block was rewound by retry or reacquire.
    Restart {
        point: ResumptionPoint,
        reacquire: bool,
        /// Attempt count after the restart.
        attempt: u32,
    },
    /// An exception was freed.
    Release { name: String },
}

/// Hooks called by a context at block events.
///
/// All methods default to no-ops; implementations override the ones they need.
pub trait BlockTracer: fmt::Debug {
    #[inline(always)]
    fn on_block_start(&mut self, _point: ResumptionPoint, _stage: Stage) {}

    #[inline(always)]
    fn on_stage_change(&mut self, _point: ResumptionPoint, _from: Stage, _to: Stage) {}

    #[inline(always)]
    fn on_block_end(&mut self, _point: ResumptionPoint, _propagated: bool) {}

    /// Called after an exception is created, before the initialize hook.
    #[inline(always)]
    fn on_throw(&mut self, _name: &str, _cause: Option<&str>) {}

    #[inline(always)]
    fn on_catch(&mut self, _point: ResumptionPoint, _name: &str) {}

    /// `point` is `None` when the exception escaped every block.
    #[inline(always)]
    fn on_propagate(&mut self, _point: Option<ResumptionPoint>, _name: &str) {}

    #[inline(always)]
    fn on_restart(&mut self, _point: ResumptionPoint, _reacquire: bool, _attempt: u32) {}

    /// Called right before an exception is freed.
    #[inline(always)]
    fn on_release(&mut self, _name: &str) {}
}

// ============================================================================
// NoopTracer
// ============================================================================

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl BlockTracer for NoopTracer {}

// ============================================================================
// StderrTracer
// ============================================================================

/// Tracer that prints a human-readable block log to stderr.
///
/// ```text
///   >>> START   block 0 at ACQUIRING
/// [block 0] ACQUIRING -> TRYING
///   !!! THROW   OOPS
///   --> block 0 receives OOPS
/// [block 0] TRYING -> DISPOSING
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Maximum number of lines to print. None = unlimited.
    limit: Option<usize>,
    count: usize,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that goes quiet after `limit` lines.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            count: 0,
        }
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        if self.limit.is_some_and(|limit| self.count >= limit) {
            return;
        }
        eprintln!("{args}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count == limit
        {
            eprintln!("--- trace limit reached ({limit} lines) ---");
        }
    }
}

impl BlockTracer for StderrTracer {
    fn on_block_start(&mut self, point: ResumptionPoint, stage: Stage) {
        self.line(format_args!("  >>> START   {point} at {stage}"));
    }

    fn on_stage_change(&mut self, point: ResumptionPoint, from: Stage, to: Stage) {
        self.line(format_args!("[{point}] {from} -> {to}"));
    }

    fn on_block_end(&mut self, point: ResumptionPoint, propagated: bool) {
        let suffix = if propagated { " (propagating)" } else { "" };
        self.line(format_args!("  <<< END     {point}{suffix}"));
    }

    fn on_throw(&mut self, name: &str, cause: Option<&str>) {
        match cause {
            Some(cause) => self.line(format_args!("  !!! THROW   {name} caused by {cause}")),
            None => self.line(format_args!("  !!! THROW   {name}")),
        }
    }

    fn on_catch(&mut self, point: ResumptionPoint, name: &str) {
        self.line(format_args!("  ... CATCH   {name} in {point}"));
    }

    fn on_propagate(&mut self, point: Option<ResumptionPoint>, name: &str) {
        match point {
            Some(point) => self.line(format_args!("  --> {point} receives {name}")),
            None => self.line(format_args!("  --> {name} escaped every block")),
        }
    }

    fn on_restart(&mut self, point: ResumptionPoint, reacquire: bool, attempt: u32) {
        let kind = if reacquire { "REACQUIRE" } else { "RETRY" };
        self.line(format_args!("  ~~~ {kind:<7} {point} attempt={attempt}"));
    }

    fn on_release(&mut self, name: &str) {
        self.line(format_args!("  xxx FREE    {name}"));
    }
}

// ============================================================================
// ProfilingTracer
// ============================================================================

/// Tracer that counts block activity.
///
/// Retrieve results via [`ProfilingTracer::report`].
#[derive(Debug, Default)]
pub struct ProfilingTracer {
    /// Throws per exception name.
    throws: AHashMap<String, u64>,
    /// Catches per exception name.
    catches: AHashMap<String, u64>,
    blocks_opened: u64,
    max_depth: usize,
    restarts: u64,
    escaped: u64,
    released: u64,
}

/// Summary report from a [`ProfilingTracer`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ProfilingReport {
    /// Throw counts per exception name, most frequent first.
    pub throws: Vec<(String, u64)>,
    /// Catch counts per exception name, most frequent first.
    pub catches: Vec<(String, u64)>,
    pub blocks_opened: u64,
    /// Deepest block nesting observed (1 for a single block).
    pub max_depth: usize,
    pub restarts: u64,
    /// Exceptions that escaped every block.
    pub escaped: u64,
    pub released: u64,
}

impl ProfilingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Generates a report from the collected counters.
    #[must_use]
    pub fn report(&self) -> ProfilingReport {
        ProfilingReport {
            throws: sorted_counts(&self.throws),
            catches: sorted_counts(&self.catches),
            blocks_opened: self.blocks_opened,
            max_depth: self.max_depth,
            restarts: self.restarts,
            escaped: self.escaped,
            released: self.released,
        }
    }
}

fn sorted_counts(counts: &AHashMap<String, u64>) -> Vec<(String, u64)> {
    let mut sorted: Vec<_> = counts.iter().map(|(name, &count)| (name.clone(), count)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
}

impl BlockTracer for ProfilingTracer {
    fn on_block_start(&mut self, point: ResumptionPoint, _stage: Stage) {
        self.blocks_opened += 1;
        self.max_depth = self.max_depth.max(point.index() + 1);
    }

    fn on_throw(&mut self, name: &str, _cause: Option<&str>) {
        *self.throws.entry(name.to_owned()).or_insert(0) += 1;
    }

    fn on_catch(&mut self, _point: ResumptionPoint, name: &str) {
        *self.catches.entry(name.to_owned()).or_insert(0) += 1;
    }

    fn on_propagate(&mut self, point: Option<ResumptionPoint>, _name: &str) {
        if point.is_none() {
            self.escaped += 1;
        }
    }

    fn on_restart(&mut self, _point: ResumptionPoint, _reacquire: bool, _attempt: u32) {
        self.restarts += 1;
    }

    fn on_release(&mut self, _name: &str) {
        self.released += 1;
    }
}

impl fmt::Display for ProfilingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Block Profiling Report ===")?;
        writeln!(f, "Blocks opened:      {}", self.blocks_opened)?;
        writeln!(f, "Max block depth:    {}", self.max_depth)?;
        writeln!(f, "Restarts:           {}", self.restarts)?;
        writeln!(f, "Escaped:            {}", self.escaped)?;
        writeln!(f, "Released:           {}", self.released)?;
        let total_throws: u64 = self.throws.iter().map(|(_, count)| count).sum();
        writeln!(f)?;
        writeln!(f, "--- Throws ---")?;
        for (name, count) in &self.throws {
            let pct = (*count as f64 / total_throws as f64) * 100.0;
            let caught = self
                .catches
                .iter()
                .find(|(caught, _)| caught == name)
                .map_or(0, |(_, count)| *count);
            writeln!(f, "  {name:<24} {count:>8}  ({pct:>5.1}%)  caught {caught}")?;
        }
        Ok(())
    }
}

// ============================================================================
// RecordingTracer
// ============================================================================

/// Tracer that records every event.
///
/// Allocates per event, so use it for tests and short runs.
#[derive(Debug, Default)]
pub struct RecordingTracer {
    events: Vec<TraceEvent>,
    /// Optional limit on number of events recorded.
    limit: Option<usize>,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a recording tracer that stops recording after `limit` events.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            events: Vec::with_capacity(limit.min(1024)),
            limit: Some(limit),
        }
    }

    #[must_use]
    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    #[must_use]
    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    /// Forgets everything recorded so far.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    fn record(&mut self, event: TraceEvent) {
        if self.limit.is_some_and(|limit| self.events.len() >= limit) {
            return;
        }
        self.events.push(event);
    }
}

impl BlockTracer for RecordingTracer {
    fn on_block_start(&mut self, point: ResumptionPoint, stage: Stage) {
        self.record(TraceEvent::BlockStart { point, stage });
    }

    fn on_stage_change(&mut self, point: ResumptionPoint, from: Stage, to: Stage) {
        self.record(TraceEvent::StageChange { point, from, to });
    }

    fn on_block_end(&mut self, point: ResumptionPoint, propagated: bool) {
        self.record(TraceEvent::BlockEnd { point, propagated });
    }

    fn on_throw(&mut self, name: &str, cause: Option<&str>) {
        self.record(TraceEvent::Throw {
            name: name.to_owned(),
            cause: cause.map(str::to_owned),
        });
    }

    fn on_catch(&mut self, point: ResumptionPoint, name: &str) {
        self.record(TraceEvent::Catch {
            point,
            name: name.to_owned(),
        });
    }

    fn on_propagate(&mut self, point: Option<ResumptionPoint>, name: &str) {
        self.record(TraceEvent::Propagate {
            point,
            name: name.to_owned(),
        });
    }

    fn on_restart(&mut self, point: ResumptionPoint, reacquire: bool, attempt: u32) {
        self.record(TraceEvent::Restart {
            point,
            reacquire,
            attempt,
        });
    }

    fn on_release(&mut self, name: &str) {
        self.record(TraceEvent::Release { name: name.to_owned() });
    }
}
