//! 问题生命周期状态机与提交状态
//!
//! 正常路径：Created → Deployed → Injected → Running → Submitted → Evaluated → Recovered → CleanedUp。
//! 出错时：故障已注入（或正在注入）则先到 Recovered，再到 CleanedUp；否则直接 CleanedUp。

use serde::Serialize;

use crate::core::OrchestratorError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemPhase {
    Created,
    Deployed,
    Injected,
    Running,
    Submitted,
    Evaluated,
    Recovered,
    CleanedUp,
}

impl ProblemPhase {
    pub fn can_transition_to(self, next: ProblemPhase) -> bool {
        use ProblemPhase::*;
        matches!(
            (self, next),
            (Created, Deployed)
                | (Deployed, Injected)
                | (Injected, Running)
                | (Running, Submitted)
                | (Submitted, Evaluated)
                | (Evaluated, Recovered)
                | (Recovered, CleanedUp)
                | (Created, CleanedUp)
                | (Deployed, CleanedUp)
                | (Deployed, Recovered)
                | (Injected, Recovered)
                | (Running, Recovered)
                | (Submitted, Recovered)
        )
    }

    /// 集群处于故障状态（需要恢复）的阶段
    pub fn fault_active(self) -> bool {
        matches!(
            self,
            ProblemPhase::Injected
                | ProblemPhase::Running
                | ProblemPhase::Submitted
                | ProblemPhase::Evaluated
        )
    }

    pub fn is_terminal(self) -> bool {
        self == ProblemPhase::CleanedUp
    }
}

/// 当前阶段 + 合法性检查
#[derive(Debug)]
pub struct PhaseTracker {
    problem_id: String,
    phase: ProblemPhase,
}

impl PhaseTracker {
    pub fn new(problem_id: impl Into<String>) -> Self {
        Self {
            problem_id: problem_id.into(),
            phase: ProblemPhase::Created,
        }
    }

    pub fn phase(&self) -> ProblemPhase {
        self.phase
    }

    pub fn advance(&mut self, next: ProblemPhase) -> Result<(), OrchestratorError> {
        if !self.phase.can_transition_to(next) {
            return Err(OrchestratorError::Lifecycle(format!(
                "{:?} -> {:?} for {}",
                self.phase, next, self.problem_id
            )));
        }
        tracing::info!(problem = %self.problem_id, from = ?self.phase, to = ?next, "Phase transition");
        self.phase = next;
        Ok(())
    }
}

/// Agent 提交后的判定
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum SubmissionStatus {
    #[serde(rename = "VALID_SUBMISSION")]
    Valid,
    #[serde(rename = "INVALID_SUBMISSION")]
    Invalid,
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionStatus::Valid => f.write_str("VALID_SUBMISSION"),
            SubmissionStatus::Invalid => f.write_str("INVALID_SUBMISSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submission_status_serializes_as_displayed() {
        for status in [SubmissionStatus::Valid, SubmissionStatus::Invalid] {
            assert_eq!(
                serde_json::to_value(status).unwrap(),
                serde_json::Value::String(status.to_string())
            );
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut tracker = PhaseTracker::new("p");
        for next in [
            ProblemPhase::Deployed,
            ProblemPhase::Injected,
            ProblemPhase::Running,
            ProblemPhase::Submitted,
            ProblemPhase::Evaluated,
            ProblemPhase::Recovered,
            ProblemPhase::CleanedUp,
        ] {
            tracker.advance(next).unwrap();
        }
        assert!(tracker.phase().is_terminal());
    }

    #[test]
    fn test_error_path_goes_through_recovered() {
        let mut tracker = PhaseTracker::new("p");
        tracker.advance(ProblemPhase::Deployed).unwrap();
        tracker.advance(ProblemPhase::Injected).unwrap();
        tracker.advance(ProblemPhase::Running).unwrap();
        assert!(tracker.phase().fault_active());
        assert!(tracker.advance(ProblemPhase::CleanedUp).is_err());
        tracker.advance(ProblemPhase::Recovered).unwrap();
        tracker.advance(ProblemPhase::CleanedUp).unwrap();
    }

    #[test]
    fn test_out_of_order_is_rejected() {
        let mut tracker = PhaseTracker::new("p");
        let err = tracker.advance(ProblemPhase::Running).unwrap_err();
        assert!(matches!(err, OrchestratorError::Lifecycle(_)));
        assert_eq!(tracker.phase(), ProblemPhase::Created);
    }
}
