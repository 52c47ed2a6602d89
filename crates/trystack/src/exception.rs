use std::{
    any::Any,
    borrow::Cow,
    fmt::{self, Write},
    panic::Location,
};

use serde::{Deserialize, Serialize};

use crate::{
    arena::{ExceptionArena, ExceptionId},
    exception_type::ExceptionType,
};

/// Size of the message buffer, terminator included.
///
/// Formatted messages longer than `MESSAGE_CAPACITY - 1` bytes are cut at the last
/// character boundary that fits. Truncation is silent.
pub const MESSAGE_CAPACITY: usize = 256;

/// Source location of a throw, used only for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeLoc {
    pub file: Cow<'static, str>,
    pub line: u32,
    pub column: u32,
    /// Enclosing function or module path, when the caller supplied one.
    pub function: Option<Cow<'static, str>>,
}

impl CodeLoc {
    #[must_use]
    pub const fn new(file: &'static str, line: u32, column: u32, function: Option<&'static str>) -> Self {
        let function = match function {
            Some(function) => Some(Cow::Borrowed(function)),
            None => None,
        };
        Self {
            file: Cow::Borrowed(file),
            line,
            column,
            function,
        }
    }

    /// Location of the caller, as recorded by `#[track_caller]`.
    #[must_use]
    pub fn from_caller(location: &'static Location<'static>) -> Self {
        Self::new(location.file(), location.line(), location.column(), None)
    }
}

impl fmt::Display for CodeLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(function) => write!(f, "{function} ({}:{})", self.file, self.line),
            None => write!(f, "{}:{}", self.file, self.line),
        }
    }
}

/// A thrown occurrence, as stored in the context's arena.
///
/// Client code reads exceptions through [`ExceptionRef`]; the initialize hook is
/// the only place that receives `&mut Exception`, so it can attach a payload.
pub struct Exception {
    exception_type: &'static ExceptionType,
    name: Cow<'static, str>,
    message: String,
    location: Option<CodeLoc>,
    error_code: i32,
    pub(crate) cause: Option<ExceptionId>,
    payload: Option<Box<dyn Any>>,
}

impl Exception {
    pub(crate) fn new(raise: Raise<'_>, cause: Option<ExceptionId>) -> Self {
        let message = match raise.message {
            Some(arguments) => bounded_message(arguments),
            None => raise.exception_type.default_message().to_owned(),
        };
        Self {
            exception_type: raise.exception_type,
            name: raise.name.unwrap_or(Cow::Borrowed(raise.exception_type.name())),
            message,
            location: raise.location,
            error_code: raise.error_code.unwrap_or_else(last_os_error_code),
            cause,
            payload: None,
        }
    }

    #[must_use]
    pub fn exception_type(&self) -> &'static ExceptionType {
        self.exception_type
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn location(&self) -> Option<&CodeLoc> {
        self.location.as_ref()
    }

    /// OS error code observed when the exception was thrown, 0 if none.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        self.error_code
    }

    #[must_use]
    pub fn is_instance_of(&self, exception_type: &ExceptionType) -> bool {
        self.exception_type.is_subtype_of(exception_type)
    }

    /// Attaches custom data, replacing any previous payload.
    pub fn set_payload<T: Any>(&mut self, payload: T) {
        self.payload = Some(Box::new(payload));
    }

    #[must_use]
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_deref()?.downcast_ref()
    }
}

impl fmt::Debug for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Exception")
            .field("type", &self.exception_type.name())
            .field("name", &self.name)
            .field("message", &self.message)
            .field("location", &self.location)
            .field("error_code", &self.error_code)
            .field("cause", &self.cause)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

/// Everything needed to throw: type, display name, origin, error code and message.
///
/// `Raise::new(&T)` uses the type's name, the type's default message and the
/// current OS error code; each builder method overrides one of those.
#[derive(Debug, Clone)]
pub struct Raise<'a> {
    exception_type: &'static ExceptionType,
    name: Option<Cow<'static, str>>,
    location: Option<CodeLoc>,
    error_code: Option<i32>,
    message: Option<fmt::Arguments<'a>>,
}

impl<'a> Raise<'a> {
    #[must_use]
    pub fn new(exception_type: &'static ExceptionType) -> Self {
        Self {
            exception_type,
            name: None,
            location: None,
            error_code: None,
            message: None,
        }
    }

    /// Display name shown instead of the type name (e.g. a stringified path).
    #[must_use]
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn at(mut self, location: CodeLoc) -> Self {
        self.location = Some(location);
        self
    }

    #[must_use]
    pub fn error_code(mut self, error_code: i32) -> Self {
        self.error_code = Some(error_code);
        self
    }

    #[must_use]
    pub fn message(mut self, message: fmt::Arguments<'a>) -> Self {
        self.message = Some(message);
        self
    }

    #[must_use]
    pub fn exception_type(&self) -> &'static ExceptionType {
        self.exception_type
    }

    pub(crate) fn located_or(mut self, location: &'static Location<'static>) -> Self {
        if self.location.is_none() {
            self.location = Some(CodeLoc::from_caller(location));
        }
        self
    }
}

/// Borrowed view of an exception held by a [`Context`](crate::Context).
///
/// The view borrows the context, so it cannot outlive the catch or finally body
/// it was obtained in. Use [`ExceptionRef::to_report`] to keep a copy.
#[derive(Clone, Copy)]
pub struct ExceptionRef<'a> {
    arena: &'a ExceptionArena,
    id: ExceptionId,
}

impl<'a> ExceptionRef<'a> {
    pub(crate) fn new(arena: &'a ExceptionArena, id: ExceptionId) -> Self {
        Self { arena, id }
    }

    #[must_use]
    pub fn id(self) -> ExceptionId {
        self.id
    }

    #[must_use]
    pub fn get(self) -> &'a Exception {
        self.arena.get(self.id)
    }

    #[must_use]
    pub fn exception_type(self) -> &'static ExceptionType {
        self.get().exception_type
    }

    #[must_use]
    pub fn name(self) -> &'a str {
        self.get().name()
    }

    #[must_use]
    pub fn message(self) -> &'a str {
        self.get().message()
    }

    #[must_use]
    pub fn location(self) -> Option<&'a CodeLoc> {
        self.get().location()
    }

    #[must_use]
    pub fn error_code(self) -> i32 {
        self.get().error_code
    }

    #[must_use]
    pub fn payload<T: Any>(self) -> Option<&'a T> {
        self.get().payload()
    }

    #[must_use]
    pub fn is_instance_of(self, exception_type: &ExceptionType) -> bool {
        self.get().is_instance_of(exception_type)
    }

    /// The exception that was being handled when this one was thrown.
    #[must_use]
    pub fn cause(self) -> Option<Self> {
        self.get().cause.map(|id| Self::new(self.arena, id))
    }

    /// Iterates this exception followed by its causes, innermost first.
    pub fn chain(self) -> impl Iterator<Item = ExceptionRef<'a>> {
        std::iter::successors(Some(self), |exception| exception.cause())
    }

    /// Number of owners: the holding block plus every exception naming it as cause.
    #[must_use]
    pub fn ref_count(self) -> usize {
        self.arena.refcount(self.id)
    }

    /// Deep copy of this exception and its cause chain.
    #[must_use]
    pub fn to_report(self) -> ExceptionReport {
        let record = self.get();
        ExceptionReport {
            type_name: record.exception_type.name().to_owned(),
            name: record.name.to_string(),
            message: record.message.clone(),
            location: record.location.clone(),
            error_code: record.error_code,
            catchable: record.exception_type.is_catchable(),
            cause: self.cause().map(|cause| Box::new(cause.to_report())),
        }
    }
}

impl fmt::Debug for ExceptionRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.get(), f)
    }
}

impl fmt::Display for ExceptionRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name(), self.message())
    }
}

/// Owned copy of an exception and its causes.
///
/// Unlike [`ExceptionRef`], a report is `Send`, can be kept after the block that
/// produced it is done, and serializes with serde.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionReport {
    pub type_name: String,
    pub name: String,
    pub message: String,
    pub location: Option<CodeLoc>,
    pub error_code: i32,
    pub catchable: bool,
    pub cause: Option<Box<ExceptionReport>>,
}

impl ExceptionReport {
    /// Iterates this report followed by its causes.
    pub fn chain(&self) -> impl Iterator<Item = &Self> {
        std::iter::successors(Some(self), |report| report.cause.as_deref())
    }

    /// Renders the uncaught-exception trace written at top level.
    #[must_use]
    pub fn render_trace(&self) -> String {
        let mut out = String::new();
        for (index, report) in self.chain().enumerate() {
            if index == 0 {
                let heading = if report.catchable { "Uncaught" } else { "Fatal" };
                // writing to a String cannot fail
                let _ = writeln!(out, "\n\n{heading} {}: {}", report.name, report.message);
            } else {
                let _ = writeln!(out, "Caused by: {}: {}", report.name, report.message);
            }
            if let Some(location) = &report.location {
                let _ = writeln!(out, "    thrown at {location}");
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for ExceptionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Formats `arguments` into at most `MESSAGE_CAPACITY - 1` bytes.
fn bounded_message(arguments: fmt::Arguments<'_>) -> String {
    let mut writer = BoundedWriter {
        buffer: String::new(),
        remaining: MESSAGE_CAPACITY - 1,
    };
    // BoundedWriter never reports an error; overflow is dropped silently
    let _ = writer.write_fmt(arguments);
    writer.buffer
}

struct BoundedWriter {
    buffer: String,
    remaining: usize,
}

impl Write for BoundedWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if s.len() <= self.remaining {
            self.buffer.push_str(s);
            self.remaining -= s.len();
        } else {
            let mut end = self.remaining;
            while !s.is_char_boundary(end) {
                end -= 1;
            }
            self.buffer.push_str(&s[..end]);
            self.remaining = 0;
        }
        Ok(())
    }
}

fn last_os_error_code() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_message_is_kept() {
        assert_eq!(bounded_message(format_args!("value {}", 7)), "value 7");
    }

    #[test]
    fn long_message_is_truncated_to_capacity() {
        let long = "x".repeat(MESSAGE_CAPACITY * 2);
        let message = bounded_message(format_args!("{long}"));
        assert_eq!(message.len(), MESSAGE_CAPACITY - 1);
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(MESSAGE_CAPACITY);
        let message = bounded_message(format_args!("{long}"));
        assert!(message.len() <= MESSAGE_CAPACITY - 1);
        assert_eq!(message.len() % 2, 0);
        assert!(message.chars().all(|c| c == 'é'));
    }

    #[test]
    fn code_loc_display() {
        let with_function = CodeLoc::new("src/io.rs", 12, 5, Some("io::read"));
        assert_eq!(with_function.to_string(), "io::read (src/io.rs:12)");
        let without_function = CodeLoc::new("src/io.rs", 12, 5, None);
        assert_eq!(without_function.to_string(), "src/io.rs:12");
    }
}
