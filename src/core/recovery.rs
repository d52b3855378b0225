//! 错误恢复引擎
//!
//! 根据模型错误 / 工具失败给出 RecoveryAction，供任务循环决定是重试、把失败回喂模型，还是终止任务。

use std::time::Duration;

use crate::config::EngineSection;
use crate::core::FailureReason;
use crate::llm::LlmError;
use crate::tools::ToolErrorKind;

/// 恢复引擎给出的建议动作
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryAction {
    /// 等待后重新请求模型
    Retry { after: Duration },
    /// 作为失败的工具结果回喂模型，循环继续
    FeedBack,
    /// 终止任务并记录原因
    Abort(FailureReason),
}

#[derive(Debug, Clone)]
pub struct RecoveryEngine {
    model_retries: u32,
    backoff: Duration,
    tool_failure_retries: u32,
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(500), 1)
    }
}

impl RecoveryEngine {
    pub fn new(model_retries: u32, backoff: Duration, tool_failure_retries: u32) -> Self {
        Self {
            model_retries,
            backoff,
            tool_failure_retries,
        }
    }

    pub fn from_config(engine: &EngineSection) -> Self {
        Self::new(
            engine.model_retries,
            Duration::from_millis(engine.model_retry_backoff_ms),
            engine.tool_failure_retries,
        )
    }

    /// attempt 从 0 开始计数：第 attempt 次失败后的动作
    pub fn on_model_error(&self, err: &LlmError, attempt: u32) -> RecoveryAction {
        if err.is_transient() && attempt < self.model_retries {
            return RecoveryAction::Retry {
                after: self.backoff * (attempt + 1),
            };
        }
        let message = err.to_string();
        match err {
            LlmError::Unreachable(_) | LlmError::Timeout | LlmError::RateLimited(_) => {
                RecoveryAction::Abort(FailureReason::ModelUnavailable { message })
            }
            LlmError::InvalidResponse(_) | LlmError::Provider(_) => {
                RecoveryAction::Abort(FailureReason::ModelError { message })
            }
        }
    }

    /// occurrences：同一工具、同一参数以该种类失败的累计次数（含本次）
    pub fn on_tool_failure(
        &self,
        tool: &str,
        kind: ToolErrorKind,
        message: &str,
        occurrences: u32,
    ) -> RecoveryAction {
        if kind.is_retryable() || occurrences <= self.tool_failure_retries {
            return RecoveryAction::FeedBack;
        }
        let reason = match kind {
            ToolErrorKind::SandboxViolation => FailureReason::ToolDenied {
                tool: tool.to_string(),
                message: message.to_string(),
            },
            _ => FailureReason::ToolFailed {
                tool: tool.to_string(),
                kind,
                message: message.to_string(),
            },
        };
        RecoveryAction::Abort(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_model_error_retries_then_aborts() {
        let engine = RecoveryEngine::new(2, Duration::from_millis(10), 1);
        let err = LlmError::Unreachable("connection refused".into());
        assert_eq!(
            engine.on_model_error(&err, 0),
            RecoveryAction::Retry { after: Duration::from_millis(10) }
        );
        assert_eq!(
            engine.on_model_error(&err, 1),
            RecoveryAction::Retry { after: Duration::from_millis(20) }
        );
        match engine.on_model_error(&err, 2) {
            RecoveryAction::Abort(FailureReason::ModelUnavailable { message }) => {
                assert!(message.contains("connection refused"));
            }
            other => panic!("Expected ModelUnavailable abort, got {other:?}"),
        }
    }

    #[test]
    fn test_provider_error_aborts_immediately() {
        let engine = RecoveryEngine::default();
        let err = LlmError::Provider("bad request".into());
        assert!(matches!(
            engine.on_model_error(&err, 0),
            RecoveryAction::Abort(FailureReason::ModelError { .. })
        ));
    }

    #[test]
    fn test_repeated_sandbox_violation_aborts_after_one_retry() {
        let engine = RecoveryEngine::default();
        let kind = ToolErrorKind::SandboxViolation;
        assert_eq!(engine.on_tool_failure("write_file", kind, "escape", 1), RecoveryAction::FeedBack);
        assert!(matches!(
            engine.on_tool_failure("write_file", kind, "escape", 2),
            RecoveryAction::Abort(FailureReason::ToolDenied { .. })
        ));
    }

    #[test]
    fn test_recoverable_tool_failures_always_fed_back() {
        let engine = RecoveryEngine::default();
        for kind in [
            ToolErrorKind::Validation,
            ToolErrorKind::NotFound,
            ToolErrorKind::Timeout,
            ToolErrorKind::Declined,
            ToolErrorKind::CommandFailed,
        ] {
            assert_eq!(engine.on_tool_failure("t", kind, "m", 10), RecoveryAction::FeedBack);
        }
    }
}
