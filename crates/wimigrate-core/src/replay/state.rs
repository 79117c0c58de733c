//! Replay scheduler states.

/// Where a replay run is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    /// Not started.
    Idle,
    /// Reading mapping tables, node maps and the entity map.
    Loading,
    /// Applying pending operations.
    Draining {
        /// 1-based pass number within the current attempt.
        pass: u32,
    },
    /// Backing off after a transient fault.
    Retrying {
        /// 1-based retry number.
        attempt: u32,
    },
    /// All pending operations were processed.
    Done,
    /// The run stopped early; the ledger remains resumable.
    Aborted,
}

impl ReplayState {
    /// Check whether the run has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReplayState::Done | ReplayState::Aborted)
    }
}

impl std::fmt::Display for ReplayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplayState::Idle => write!(f, "idle"),
            ReplayState::Loading => write!(f, "loading"),
            ReplayState::Draining { pass } => write!(f, "draining (pass {pass})"),
            ReplayState::Retrying { attempt } => write!(f, "retrying (attempt {attempt})"),
            ReplayState::Done => write!(f, "done"),
            ReplayState::Aborted => write!(f, "aborted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(ReplayState::Done.is_terminal());
        assert!(ReplayState::Aborted.is_terminal());
        assert!(!ReplayState::Draining { pass: 1 }.is_terminal());
        assert!(!ReplayState::Retrying { attempt: 2 }.is_terminal());
        assert_eq!(ReplayState::Retrying { attempt: 2 }.to_string(), "retrying (attempt 2)");
    }
}
