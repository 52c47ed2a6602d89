#![doc = include_str!("../../../README.md")]

mod arena;
mod block;
mod context;
pub mod current;
mod error;
mod exception;
mod exception_type;
mod hooks;
mod io;
mod limits;
mod macros;
mod stage;
pub mod tracer;

pub use crate::{
    arena::{ExceptionId, ExceptionStats},
    block::{Flow, ResumptionPoint, Unwind},
    context::Context,
    current::with_current,
    error::{UsageError, fatal},
    exception::{CodeLoc, Exception, ExceptionRef, ExceptionReport, MESSAGE_CAPACITY, Raise},
    exception_type::{ASSERTION_ERROR, ExceptionType, MAX_HIERARCHY_DEPTH, Supertypes},
    hooks::{Termination, ThreadTerminated},
    io::{CollectDiagnostics, DiagnosticSink, NoDiagnostics, StderrSink},
    limits::{DEFAULT_MAX_BLOCK_DEPTH, RuntimeLimits},
    stage::Stage,
    tracer::{BlockTracer, NoopTracer, ProfilingReport, ProfilingTracer, RecordingTracer, StderrTracer, TraceEvent},
};
