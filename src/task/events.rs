//! 任务生命周期事件：纯数据消息，可经任意传输层转发
//!
//! 序列化形如 `{"task_id": .., "timestamp": .., "event": "progress", "payload": {..}}`。

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::FailureReason;
use crate::task::{TaskId, ToolInvocation};
use crate::tools::SideEffectClass;

#[derive(Debug, Clone, Serialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TaskEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum TaskEventKind {
    Created {
        workspace_root: PathBuf,
    },
    Started {
        max_iterations: usize,
    },
    /// 每轮模型请求前发出
    Progress {
        iteration: usize,
        max_iterations: usize,
        message: String,
    },
    ApprovalRequired {
        tool_name: String,
        parameters: serde_json::Value,
        side_effect: SideEffectClass,
    },
    ToolExecuted {
        invocation: ToolInvocation,
    },
    Completed {
        result: String,
    },
    Failed {
        reason: FailureReason,
        message: String,
    },
    Cancelled {
        reason: String,
    },
}

impl TaskEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Started { .. } => "started",
            Self::Progress { .. } => "progress",
            Self::ApprovalRequired { .. } => "approvalRequired",
            Self::ToolExecuted { .. } => "toolExecuted",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled { .. })
    }
}

impl TaskEvent {
    pub fn new(task_id: TaskId, kind: TaskEventKind) -> Self {
        Self {
            task_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}
