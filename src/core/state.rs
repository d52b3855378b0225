//! 任务状态与迁移表
//!
//! pending → running → {awaiting_approval ⇄ running} → completed | failed | cancelled；
//! 任意非终态都可 → cancelled；终态吸收，不允许再迁移。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    AwaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// running 或 awaiting_approval：占用管理器唯一的活跃名额
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::AwaitingApproval)
    }

    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, to) {
            (Pending, Running) => true,
            (Running, AwaitingApproval) | (AwaitingApproval, Running) => true,
            (Running, Completed) | (Running, Failed) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// 校验迁移；非法迁移（包括任何离开终态的尝试）返回 InvalidStateTransition
    pub fn check_transition(&self, to: TaskStatus) -> Result<(), EngineError> {
        if self.can_transition_to(to) {
            Ok(())
        } else {
            Err(EngineError::InvalidStateTransition { from: *self, to })
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
