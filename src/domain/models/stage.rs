//! Pipeline stage state machine.
//!
//! The happy path is a straight line from `Question` to `Completed`. Only the
//! two guardrail stages may short-circuit to `Rejected`, and every non-terminal
//! stage may fall through to `Failed`.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A state of the question-answering pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Question,
    Checking,
    Retrieving,
    Reranking,
    Enhancing,
    UsingTools,
    Generating,
    FinalChecking,
    Completed,
    Rejected,
    Failed,
}

/// Error returned when a transition is not in the transition table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal stage transition: {from} -> {to}")]
pub struct IllegalTransition {
    pub from: Stage,
    pub to: Stage,
}

impl Stage {
    /// The seven processing stages, in pipeline order.
    pub const PROCESSING: [Self; 7] = [
        Self::Checking,
        Self::Retrieving,
        Self::Reranking,
        Self::Enhancing,
        Self::UsingTools,
        Self::Generating,
        Self::FinalChecking,
    ];

    /// Every state, initial and terminal included.
    pub const ALL: [Self; 11] = [
        Self::Question,
        Self::Checking,
        Self::Retrieving,
        Self::Reranking,
        Self::Enhancing,
        Self::UsingTools,
        Self::Generating,
        Self::FinalChecking,
        Self::Completed,
        Self::Rejected,
        Self::Failed,
    ];

    pub const fn initial() -> Self {
        Self::Question
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Rejected | Self::Failed)
    }

    /// True for the seven stages that do work against a collaborator.
    pub const fn is_processing(self) -> bool {
        !self.is_terminal() && !matches!(self, Self::Question)
    }

    /// Guardrail stages are the only ones allowed to reject a request.
    pub const fn may_reject(self) -> bool {
        matches!(self, Self::Checking | Self::FinalChecking)
    }

    /// Next stage on the happy path.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Question => Some(Self::Checking),
            Self::Checking => Some(Self::Retrieving),
            Self::Retrieving => Some(Self::Reranking),
            Self::Reranking => Some(Self::Enhancing),
            Self::Enhancing => Some(Self::UsingTools),
            Self::UsingTools => Some(Self::Generating),
            Self::Generating => Some(Self::FinalChecking),
            Self::FinalChecking => Some(Self::Completed),
            Self::Completed | Self::Rejected | Self::Failed => None,
        }
    }

    /// Whether `self -> to` appears in the transition table.
    pub fn can_transition_to(self, to: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            Self::Failed => true,
            Self::Rejected => self.may_reject(),
            _ => self.next() == Some(to),
        }
    }

    /// Validate and perform a transition.
    pub fn transition(self, to: Self) -> Result<Self, IllegalTransition> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(IllegalTransition { from: self, to })
        }
    }

    /// Position of a processing stage in the pipeline, 1-based.
    pub fn ordinal(self) -> Option<usize> {
        Self::PROCESSING
            .iter()
            .position(|s| *s == self)
            .map(|i| i + 1)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Checking => "checking",
            Self::Retrieving => "retrieving",
            Self::Reranking => "reranking",
            Self::Enhancing => "enhancing",
            Self::UsingTools => "using_tools",
            Self::Generating => "generating",
            Self::FinalChecking => "final_checking",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_walks_every_stage_once() {
        let mut stage = Stage::initial();
        let mut visited = vec![stage];
        while let Some(next) = stage.next() {
            stage = stage.transition(next).unwrap();
            visited.push(stage);
        }
        assert_eq!(stage, Stage::Completed);
        assert_eq!(visited.len(), 9);
        assert_eq!(&visited[1..8], &Stage::PROCESSING);
    }

    #[test]
    fn test_only_guardrail_stages_may_reject() {
        for stage in Stage::ALL {
            let allowed = stage.can_transition_to(Stage::Rejected);
            assert_eq!(
                allowed,
                matches!(stage, Stage::Checking | Stage::FinalChecking),
                "{stage} rejection permission"
            );
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [Stage::Completed, Stage::Rejected, Stage::Failed] {
            for to in Stage::ALL {
                assert!(from.transition(to).is_err());
            }
        }
    }

    #[test]
    fn test_skipping_a_stage_is_illegal() {
        let err = Stage::Checking.transition(Stage::Reranking).unwrap_err();
        assert_eq!(err.from, Stage::Checking);
        assert_eq!(err.to, Stage::Reranking);
        assert_eq!(err.to_string(), "illegal stage transition: checking -> reranking");
    }

    #[test]
    fn test_ordinal_and_parse() {
        assert_eq!(Stage::Checking.ordinal(), Some(1));
        assert_eq!(Stage::FinalChecking.ordinal(), Some(7));
        assert_eq!(Stage::Question.ordinal(), None);
        assert_eq!("using_tools".parse::<Stage>(), Ok(Stage::UsingTools));
        assert!("bogus".parse::<Stage>().is_err());
    }
}
