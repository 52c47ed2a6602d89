/// Position of a block within one pass of its loop.
///
/// Stages are totally ordered. A pass visits them in declaration order, except
/// that [`Stage::Catching`] is skipped when there is nothing to catch and an
/// explicit retry/reacquire rewinds the block to an earlier stage.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::IntoStaticStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    /// Freshly opened with-block, before its resource is acquired.
    Beginning,
    Acquiring,
    Trying,
    Disposing,
    Catching,
    Finalizing,
    /// Terminal: the block is popped on the next advance.
    Done,
}

impl Stage {
    /// Returns the stage that follows `self`.
    ///
    /// `catch_pending` is true when the block holds an exception that has not
    /// been caught yet. Without one, the catch stage is skipped. `Done` is
    /// absorbing.
    #[must_use]
    pub const fn next(self, catch_pending: bool) -> Self {
        match self {
            Self::Beginning => Self::Acquiring,
            Self::Acquiring => Self::Trying,
            Self::Trying => Self::Disposing,
            Self::Disposing if catch_pending => Self::Catching,
            Self::Disposing | Self::Catching => Self::Finalizing,
            Self::Finalizing | Self::Done => Self::Done,
        }
    }

    /// Returns true for stages in which a catch clause may match.
    #[must_use]
    pub const fn is_catching(self) -> bool {
        matches!(self, Self::Catching)
    }

    /// Returns true for the stages from which a block may be restarted.
    #[must_use]
    pub const fn allows_restart(self) -> bool {
        matches!(self, Self::Catching | Self::Finalizing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_pass_with_pending_exception() {
        let mut stage = Stage::Beginning;
        let mut visited = vec![stage];
        while stage != Stage::Done {
            stage = stage.next(true);
            visited.push(stage);
        }
        assert_eq!(
            visited,
            [
                Stage::Beginning,
                Stage::Acquiring,
                Stage::Trying,
                Stage::Disposing,
                Stage::Catching,
                Stage::Finalizing,
                Stage::Done,
            ]
        );
    }

    #[test]
    fn catch_is_skipped_without_pending_exception() {
        assert_eq!(Stage::Disposing.next(false), Stage::Finalizing);
    }

    #[test]
    fn catching_always_moves_to_finalizing() {
        assert_eq!(Stage::Catching.next(true), Stage::Finalizing);
        assert_eq!(Stage::Catching.next(false), Stage::Finalizing);
    }

    #[test]
    fn done_is_absorbing() {
        assert_eq!(Stage::Done.next(true), Stage::Done);
        assert_eq!(Stage::Done.next(false), Stage::Done);
    }

    #[test]
    fn stages_are_ordered() {
        assert!(Stage::Beginning < Stage::Acquiring);
        assert!(Stage::Catching < Stage::Finalizing);
        assert!(Stage::Finalizing < Stage::Done);
    }

    #[test]
    fn display_uses_screaming_case() {
        assert_eq!(Stage::Finalizing.to_string(), "FINALIZING");
        let name: &'static str = Stage::Beginning.into();
        assert_eq!(name, "BEGINNING");
    }
}
