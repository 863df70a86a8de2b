//! Per-request pipeline state machine.
//!
//! ```text
//! Idle -> Validating -> Rendering -> Compiling -> Rasterizing -> Loading -> Cleaning -> Done
//!            \____________\___________\_____________\_____________\-> Cleaning -> Failed
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage of a single pipeline execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Validating,
    Rendering,
    Compiling,
    Rasterizing,
    Loading,
    Cleaning,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineStage::Done | PipelineStage::Failed)
    }

    /// Whether `next` may follow `self`.
    ///
    /// `Cleaning` may be entered from any working stage (the error path);
    /// `Failed` only from `Cleaning`, so cleanup always precedes failure.
    pub fn can_transition_to(self, next: PipelineStage) -> bool {
        use PipelineStage::*;
        match (self, next) {
            (Idle, Validating)
            | (Validating, Rendering)
            | (Rendering, Compiling)
            | (Compiling, Rasterizing)
            | (Rasterizing, Loading)
            | (Loading, Cleaning)
            | (Cleaning, Done)
            | (Cleaning, Failed) => true,
            (Validating | Rendering | Compiling | Rasterizing, Cleaning) => true,
            _ => false,
        }
    }

    /// Short label for progress output
    pub fn label(self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Validating => "validating input",
            PipelineStage::Rendering => "rendering template",
            PipelineStage::Compiling => "compiling document",
            PipelineStage::Rasterizing => "extracting first page",
            PipelineStage::Loading => "loading preview",
            PipelineStage::Cleaning => "cleaning up",
            PipelineStage::Done => "finished",
            PipelineStage::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Tracks the current stage and enforces legal transitions
#[derive(Debug, Clone)]
pub struct StageMachine {
    current: PipelineStage,
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StageMachine {
    pub fn new() -> Self {
        Self {
            current: PipelineStage::Idle,
        }
    }

    pub fn current(&self) -> PipelineStage {
        self.current
    }

    /// Move to `next`, returning the previous stage.
    ///
    /// Illegal transitions are a programming error; they trip a debug
    /// assertion and are otherwise applied as-is.
    pub fn advance(&mut self, next: PipelineStage) -> PipelineStage {
        debug_assert!(
            self.current.can_transition_to(next),
            "illegal stage transition {:?} -> {:?}",
            self.current,
            next
        );
        std::mem::replace(&mut self.current, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineStage::*;

    #[test]
    fn test_happy_path_is_legal() {
        let path = [
            Idle,
            Validating,
            Rendering,
            Compiling,
            Rasterizing,
            Loading,
            Cleaning,
            Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_failure_always_passes_through_cleaning() {
        for stage in [Validating, Rendering, Compiling, Rasterizing, Loading] {
            assert!(!stage.can_transition_to(Failed), "{:?}", stage);
            assert!(stage.can_transition_to(Cleaning), "{:?}", stage);
        }
        assert!(Cleaning.can_transition_to(Failed));
        assert!(!Idle.can_transition_to(Cleaning));
    }

    #[test]
    fn test_terminal_stages() {
        assert!(Done.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Done.can_transition_to(Validating));
        assert!(!Cleaning.is_terminal());
    }

    #[test]
    fn test_machine_advances() {
        let mut machine = StageMachine::new();
        assert_eq!(machine.advance(Validating), Idle);
        assert_eq!(machine.advance(Cleaning), Validating);
        machine.advance(Failed);
        assert_eq!(machine.current(), Failed);
    }
}
