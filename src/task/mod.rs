//! 任务：一条用户指令及其与模型、工具的完整交互
//!
//! Task 只由 TaskManager 持有；所有状态变化经 `transition` 校验迁移表，终态之后拒绝任何修改。

pub mod events;
pub mod history;
pub mod manager;
pub mod runner;

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{EngineError, FailureReason, TaskStatus};

pub use events::{TaskEvent, TaskEventKind};
pub use history::{ExchangeHistory, ModelTurn, ToolInvocation, Turn};
pub use manager::{ApprovalDecision, TaskManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    pub mime_type: String,
    /// base64 编码内容
    pub data: String,
}

/// 用户指令，创建后不可变
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInput {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageAttachment>,
}

impl TaskInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        self.images.push(ImageAttachment {
            mime_type: mime_type.into(),
            data: data.into(),
        });
        self
    }
}

impl From<&str> for TaskInput {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for TaskInput {
    fn from(s: String) -> Self {
        Self::text(s)
    }
}

/// 创建任务时的可选覆盖项；未设置时取引擎配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    pub workspace_root: Option<PathBuf>,
    pub max_iterations: Option<usize>,
}

impl TaskConfig {
    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn with_max_iterations(mut self, n: usize) -> Self {
        self.max_iterations = Some(n);
        self
    }
}

/// 终态结果：result 与 error 互斥，且只写一次
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    Result(String),
    Error(FailureReason),
}

/// 任务快照（`get_task` / `list_tasks` 返回克隆，调用方修改不影响管理器内的任务）
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub input: TaskInput,
    pub workspace_root: PathBuf,
    pub max_iterations: usize,
    status: TaskStatus,
    history: ExchangeHistory,
    pub created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    outcome: Option<TaskOutcome>,
}

impl Task {
    pub(crate) fn new(input: TaskInput, workspace_root: PathBuf, max_iterations: usize) -> Self {
        Self {
            id: TaskId::new(),
            input,
            workspace_root,
            max_iterations,
            status: TaskStatus::Pending,
            history: ExchangeHistory::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            outcome: None,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn history(&self) -> &ExchangeHistory {
        &self.history
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn result(&self) -> Option<&str> {
        match &self.outcome {
            Some(TaskOutcome::Result(r)) => Some(r),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&FailureReason> {
        match &self.outcome {
            Some(TaskOutcome::Error(e)) => Some(e),
            _ => None,
        }
    }

    /// 校验并执行状态迁移，同时写入对应的时间戳（各自只写一次）
    pub(crate) fn transition(&mut self, to: TaskStatus) -> Result<(), EngineError> {
        self.status.check_transition(to)?;
        let now = Utc::now();
        if to == TaskStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = to;
        Ok(())
    }

    pub(crate) fn complete(&mut self, result: String) -> Result<(), EngineError> {
        self.transition(TaskStatus::Completed)?;
        self.outcome = Some(TaskOutcome::Result(result));
        Ok(())
    }

    pub(crate) fn fail(&mut self, reason: FailureReason) -> Result<(), EngineError> {
        self.transition(TaskStatus::Failed)?;
        self.outcome = Some(TaskOutcome::Error(reason));
        Ok(())
    }

    /// 终态之后的追加视为非法迁移
    pub(crate) fn append(&mut self, turn: Turn) -> Result<(), EngineError> {
        if self.status.is_terminal() {
            return Err(EngineError::InvalidState {
                id: self.id,
                expected: "non-terminal",
                actual: self.status,
            });
        }
        self.history.push(turn);
        Ok(())
    }
}
