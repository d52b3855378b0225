//! 引擎错误类型与任务失败原因
//!
//! `EngineError` 面向控制面调用方（误用 / 并发冲突 / 模型不可用）；`FailureReason` 记录在失败的任务上，
//! 供调用方区分「迭代上限」「沙箱拒绝」「模型不可达」等情况并给出不同提示。

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::TaskStatus;
use crate::task::TaskId;
use crate::tools::ToolErrorKind;

/// 控制面错误：立即返回给调用方，不会被静默吞掉
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Another task is already active: {0}")]
    AlreadyRunning(TaskId),

    #[error("Invalid state for task {id}: expected {expected}, found {actual}")]
    InvalidState {
        id: TaskId,
        expected: &'static str,
        actual: TaskStatus,
    },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus },

    #[error("Model provider unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model provider failed: {0}")]
    ModelFailed(String),

    #[error("Config error: {0}")]
    ConfigError(String),
}

/// 任务进入 failed 时记录的原因（人类可读）
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("The model could not complete the task within {limit} iterations")]
    IterationLimitExceeded { limit: usize },

    #[error("The model provider was unreachable: {message}")]
    ModelUnavailable { message: String },

    #[error("The model provider returned an error: {message}")]
    ModelError { message: String },

    #[error("Tool '{tool}' was denied by sandbox policy: {message}")]
    ToolDenied { tool: String, message: String },

    #[error("Tool '{tool}' kept failing ({kind}): {message}")]
    ToolFailed {
        tool: String,
        #[serde(rename = "error_kind")]
        kind: ToolErrorKind,
        message: String,
    },
}

impl FailureReason {
    /// 稳定的机器可读标识，便于观测
    pub fn code(&self) -> &'static str {
        match self {
            Self::IterationLimitExceeded { .. } => "iteration_limit_exceeded",
            Self::ModelUnavailable { .. } => "model_unavailable",
            Self::ModelError { .. } => "model_error",
            Self::ToolDenied { .. } => "tool_denied",
            Self::ToolFailed { .. } => "tool_failed",
        }
    }
}
