//! 错误恢复引擎
//!
//! 根据 OrchestratorError 类型返回 RecoveryAction：动作层面的错误变成下一轮 Observation，
//! 生命周期错误则中止本次运行。

use crate::core::{OrchestratorError, RecoveryAction};

/// 将错误映射为可执行动作（继续观察 / 终止）
#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &OrchestratorError) -> RecoveryAction {
        match err {
            OrchestratorError::Parsing(_)
            | OrchestratorError::InvalidAction(_)
            | OrchestratorError::InvalidArguments { .. }
            | OrchestratorError::SubmissionInvalid(_)
            | OrchestratorError::CommandFailed(_)
            | OrchestratorError::Io(_)
            | OrchestratorError::Json(_)
            | OrchestratorError::Other(_) => RecoveryAction::Observe(err.to_string()),
            OrchestratorError::Timeout(_)
            | OrchestratorError::Agent(_)
            | OrchestratorError::Interrupted
            | OrchestratorError::ProblemNotFound(_)
            | OrchestratorError::Lifecycle(_)
            | OrchestratorError::Config(_)
            | OrchestratorError::Session(_) => RecoveryAction::Abort,
        }
    }

    /// 动作分发边界：除中断外的任何错误都转成文本，保证循环不会被动作错误静默终止
    pub fn to_observation(&self, err: &OrchestratorError) -> Option<String> {
        match (self.handle(err), err) {
            (RecoveryAction::Observe(text), _) => Some(text),
            (RecoveryAction::Abort, OrchestratorError::Interrupted) => None,
            (RecoveryAction::Abort, other) => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::react::ParseError;

    #[test]
    fn test_recovery_parse_error_is_observed() {
        let engine = RecoveryEngine::new();
        let err = OrchestratorError::from(ParseError::new("unterminated string", "'abc"));
        match engine.handle(&err) {
            RecoveryAction::Observe(msg) => {
                assert!(msg.contains("Error parsing response"));
                assert!(msg.contains("'abc"));
            }
            _ => panic!("Expected Observe"),
        }
    }

    #[test]
    fn test_recovery_invalid_action_is_observed() {
        let engine = RecoveryEngine::new();
        let err = OrchestratorError::InvalidAction("rm_everything".to_string());
        assert_eq!(
            engine.handle(&err),
            RecoveryAction::Observe("Invalid action: rm_everything".to_string())
        );
    }

    #[test]
    fn test_recovery_timeout_aborts() {
        let engine = RecoveryEngine::new();
        let err = OrchestratorError::Timeout("pods not ready".to_string());
        assert_eq!(engine.handle(&err), RecoveryAction::Abort);
    }

    #[test]
    fn test_dispatch_boundary_keeps_interrupt() {
        let engine = RecoveryEngine::new();
        assert_eq!(engine.to_observation(&OrchestratorError::Interrupted), None);
        let timeout = OrchestratorError::Timeout("x".to_string());
        assert_eq!(engine.to_observation(&timeout), Some("Timeout: x".to_string()));
    }
}
