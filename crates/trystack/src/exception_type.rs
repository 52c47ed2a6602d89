use std::{fmt, ptr};

/// Upper bound on supertype links followed by [`ExceptionType::is_subtype_of`].
///
/// Hierarchies are `'static` data written by hand, so a chain this long can only
/// mean two types point at each other. Traversal stops here instead of looping.
pub const MAX_HIERARCHY_DEPTH: usize = 64;

/// A node in the exception type forest.
///
/// Types are declared as `static` items and compared by address, never by name:
///
/// ```
/// use trystack::ExceptionType;
///
/// static IO_ERROR: ExceptionType = ExceptionType::new("IO_ERROR", "I/O failed");
/// static NOT_FOUND: ExceptionType = ExceptionType::with_supertype("NOT_FOUND", &IO_ERROR, "Not found");
///
/// assert!(NOT_FOUND.is_subtype_of(&IO_ERROR));
/// assert!(!IO_ERROR.is_subtype_of(&NOT_FOUND));
/// ```
///
/// A type whose supertype is `None`, or a reference to itself, is a root.
pub struct ExceptionType {
    name: &'static str,
    supertype: Option<&'static ExceptionType>,
    default_message: &'static str,
    catchable: bool,
}

/// Raised by [`Context::assert_that`](crate::Context::assert_that).
///
/// Uncatchable: no `catch` matches it, not even `catch_all`, and retry/reacquire
/// refuse to discard it.
pub static ASSERTION_ERROR: ExceptionType = ExceptionType::uncatchable("ASSERTION_ERROR", None, "Assertion failed");

impl ExceptionType {
    /// Creates a root type.
    #[must_use]
    pub const fn new(name: &'static str, default_message: &'static str) -> Self {
        Self {
            name,
            supertype: None,
            default_message,
            catchable: true,
        }
    }

    /// Creates a type whose instances are also instances of `supertype`.
    #[must_use]
    pub const fn with_supertype(
        name: &'static str,
        supertype: &'static ExceptionType,
        default_message: &'static str,
    ) -> Self {
        Self {
            name,
            supertype: Some(supertype),
            default_message,
            catchable: true,
        }
    }

    /// Creates a type reserved for runtime-level failures that client code must
    /// not be able to swallow.
    #[must_use]
    pub const fn uncatchable(
        name: &'static str,
        supertype: Option<&'static ExceptionType>,
        default_message: &'static str,
    ) -> Self {
        Self {
            name,
            supertype,
            default_message,
            catchable: false,
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Message used when an exception of this type is thrown without one.
    #[must_use]
    pub fn default_message(&self) -> &'static str {
        self.default_message
    }

    #[must_use]
    pub fn is_catchable(&self) -> bool {
        self.catchable
    }

    /// Returns the direct supertype, or `None` for a root.
    ///
    /// A self-referencing sentinel is reported as a root.
    #[must_use]
    pub fn supertype(&'static self) -> Option<&'static Self> {
        self.supertype.filter(|parent| !ptr::eq(*parent, self))
    }

    /// Returns true if `self` is `ancestor` or appears below it in the hierarchy.
    ///
    /// Walks the supertype chain starting at `self`. A root is only a subtype of
    /// itself.
    #[must_use]
    pub fn is_subtype_of(&'static self, ancestor: &Self) -> bool {
        self.supertypes().any(|candidate| ptr::eq(candidate, ancestor))
    }

    /// Iterates `self` followed by each supertype up to the root.
    ///
    /// Stops at a self-referencing root and after [`MAX_HIERARCHY_DEPTH`] links.
    pub fn supertypes(&'static self) -> Supertypes {
        Supertypes {
            next: Some(self),
            remaining: MAX_HIERARCHY_DEPTH,
        }
    }
}

impl PartialEq for ExceptionType {
    fn eq(&self, other: &Self) -> bool {
        ptr::eq(self, other)
    }
}

impl Eq for ExceptionType {}

impl fmt::Debug for ExceptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExceptionType")
            .field("name", &self.name)
            .field("supertype", &self.supertype.map(|parent| parent.name))
            .field("catchable", &self.catchable)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for ExceptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Iterator returned by [`ExceptionType::supertypes`].
#[derive(Debug, Clone)]
pub struct Supertypes {
    next: Option<&'static ExceptionType>,
    remaining: usize,
}

impl Iterator for Supertypes {
    type Item = &'static ExceptionType;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.next = current.supertype();
        Some(current)
    }
}
