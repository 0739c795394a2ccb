//! Outcome status of a run result or artifact.
//!
//! Statuses form a small state machine: any status may leave `Undefined`,
//! non-failure statuses may be overwritten, and the failure statuses are
//! terminal.

use serde::{Deserialize, Serialize};

use crate::errors::FlickerError;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    /// Nothing has happened yet
    #[default]
    Undefined,
    /// The run completed but nothing has been checked
    RunExecuted,
    /// Provisionally successful; assertions may still fail it
    AssertionSucceeded,
    /// A lifecycle phase failed while this evidence was being produced
    RunFailed,
    /// The trace was captured but could not be parsed
    ParsingFailed,
    /// An assertion failed against this evidence
    AssertionFailed,
}

impl RunStatus {
    pub fn all() -> &'static [RunStatus] {
        &[
            RunStatus::Undefined,
            RunStatus::RunExecuted,
            RunStatus::AssertionSucceeded,
            RunStatus::RunFailed,
            RunStatus::ParsingFailed,
            RunStatus::AssertionFailed,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Undefined => "UNDEFINED",
            RunStatus::RunExecuted => "RUN_EXECUTED",
            RunStatus::AssertionSucceeded => "ASSERTION_SUCCESS",
            RunStatus::RunFailed => "RUN_FAILED",
            RunStatus::ParsingFailed => "PARSING_FAILURE",
            RunStatus::AssertionFailed => "ASSERTION_FAILED",
        }
    }

    /// File name prefix marking an artifact with this status.
    pub fn prefix(&self) -> &'static str {
        match self {
            RunStatus::Undefined => "UNDEFINED_",
            RunStatus::RunExecuted => "EXECUTED_",
            RunStatus::AssertionSucceeded => "PASS_",
            RunStatus::RunFailed => "FAIL_RUN_",
            RunStatus::ParsingFailed => "FAIL_PARSING_",
            RunStatus::AssertionFailed => "FAIL_ASSERTION_",
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RunStatus::RunFailed | RunStatus::ParsingFailed | RunStatus::AssertionFailed
        )
    }

    /// Check that moving from `self` to `to` is allowed.
    pub fn check_transition(self, to: RunStatus) -> Result<(), FlickerError> {
        if self == to || !self.is_failure() {
            Ok(())
        } else {
            Err(FlickerError::InvalidStatusTransition { from: self, to })
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            RunStatus::AssertionFailed => 5,
            RunStatus::RunFailed => 4,
            RunStatus::ParsingFailed => 3,
            RunStatus::AssertionSucceeded => 2,
            RunStatus::RunExecuted => 1,
            RunStatus::Undefined => 0,
        }
    }

    /// Merge many statuses into one: the most severe wins.
    pub fn merge<I>(statuses: I) -> RunStatus
    where
        I: IntoIterator<Item = RunStatus>,
    {
        statuses
            .into_iter()
            .max_by_key(|s| s.precedence())
            .unwrap_or_default()
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_statuses_are_terminal() {
        for from in RunStatus::all().iter().filter(|s| s.is_failure()) {
            for to in RunStatus::all() {
                let result = from.check_transition(*to);
                if from == to {
                    assert!(result.is_ok(), "{from} -> {to} should be a no-op");
                } else {
                    assert!(result.is_err(), "{from} -> {to} should be rejected");
                }
            }
        }
    }

    #[test]
    fn test_undefined_can_move_anywhere() {
        for to in RunStatus::all() {
            assert!(RunStatus::Undefined.check_transition(*to).is_ok());
        }
    }

    #[test]
    fn test_same_status_is_noop() {
        for status in RunStatus::all() {
            assert!(status.check_transition(*status).is_ok());
        }
    }

    #[test]
    fn test_non_failure_can_be_overwritten() {
        assert!(
            RunStatus::AssertionSucceeded
                .check_transition(RunStatus::RunFailed)
                .is_ok()
        );
        assert!(
            RunStatus::RunExecuted
                .check_transition(RunStatus::AssertionSucceeded)
                .is_ok()
        );
    }

    #[test]
    fn test_merge_precedence() {
        use RunStatus::*;
        assert_eq!(RunStatus::merge([AssertionSucceeded, RunFailed]), RunFailed);
        assert_eq!(
            RunStatus::merge([RunFailed, AssertionFailed, AssertionSucceeded]),
            AssertionFailed
        );
        assert_eq!(
            RunStatus::merge([Undefined, AssertionSucceeded]),
            AssertionSucceeded
        );
        assert_eq!(RunStatus::merge([ParsingFailed, AssertionSucceeded]), ParsingFailed);
        assert_eq!(RunStatus::merge(Vec::new()), Undefined);
    }

    #[test]
    fn test_prefixes_are_unique() {
        let mut prefixes: Vec<&str> = RunStatus::all().iter().map(|s| s.prefix()).collect();
        prefixes.sort();
        prefixes.dedup();
        assert_eq!(prefixes.len(), RunStatus::all().len());
    }

    #[test]
    fn test_serde_uses_screaming_case() {
        let json = serde_json::to_string(&RunStatus::AssertionFailed).unwrap();
        assert_eq!(json, "\"ASSERTION_FAILED\"");
    }
}
