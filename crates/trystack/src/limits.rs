/// Maximum nesting of open blocks used when no other limit is configured.
pub const DEFAULT_MAX_BLOCK_DEPTH: usize = 256;

/// Configuration for runtime limits.
///
/// Use `RuntimeLimits::default()` for the defaults, or adjust them with the
/// builder methods.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RuntimeLimits {
    /// Maximum number of blocks open at once in one context.
    pub max_block_depth: usize,
    /// Maximum retries a single block may perform, regardless of what the
    /// caller passes to `retry`. `None` leaves it to the caller.
    #[serde(default)]
    pub max_retry_attempts: Option<u32>,
}

impl RuntimeLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum block nesting depth.
    #[must_use]
    pub fn max_block_depth(mut self, limit: usize) -> Self {
        self.max_block_depth = limit;
        self
    }

    /// Caps the attempts accepted by `retry` and `reacquire`.
    #[must_use]
    pub fn max_retry_attempts(mut self, limit: u32) -> Self {
        self.max_retry_attempts = Some(limit);
        self
    }

    /// Applies the attempt cap to a caller-supplied maximum.
    pub(crate) fn clamp_attempts(&self, requested: u32) -> u32 {
        self.max_retry_attempts.map_or(requested, |cap| requested.min(cap))
    }
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        Self {
            max_block_depth: DEFAULT_MAX_BLOCK_DEPTH,
            max_retry_attempts: None,
        }
    }
}
