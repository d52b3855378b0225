//! 任务管理器：唯一的并发闸门
//!
//! 任务表是唯一的共享可变结构，所有修改都在同一把 tokio Mutex 下串行完成；
//! 事件也在持锁期间发出，保证监听方看到的顺序与状态迁移顺序一致。
//! 单活跃任务约束在 `execute_task` 入口处显式检查，违反时返回 `AlreadyRunning`。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{EngineError, RecoveryEngine, TaskStatus};
use crate::llm::ModelClient;
use crate::platform::{Logger, PlatformCapabilities};
use crate::task::runner::TaskRunner;
use crate::task::{Task, TaskConfig, TaskEvent, TaskEventKind, TaskId, TaskInput};
use crate::tools::ToolRegistry;

/// 审批决定
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ApprovalDecision {
    pub approved: bool,
}

impl ApprovalDecision {
    pub fn approve() -> Self {
        Self { approved: true }
    }

    pub fn reject() -> Self {
        Self { approved: false }
    }
}

pub(crate) struct TaskSlot {
    pub(crate) task: Task,
    pub(crate) cancel: CancellationToken,
    pub(crate) approval_tx: Option<oneshot::Sender<ApprovalDecision>>,
}

/// 管理器级设置（来自 [engine] 段与 [app].workspace_root）
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub default_root: PathBuf,
    pub max_iterations: usize,
    pub approval_timeout: Option<Duration>,
    pub notify_on_approval: bool,
    pub event_buffer: usize,
}

impl ManagerSettings {
    pub fn from_config(config: &AppConfig, platform: &PlatformCapabilities) -> Self {
        let default_root = config
            .app
            .workspace_root
            .clone()
            .or_else(|| platform.workspace.primary_root())
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            default_root,
            max_iterations: config.engine.max_iterations,
            approval_timeout: config.engine.approval_timeout_secs.map(Duration::from_secs),
            notify_on_approval: config.engine.notify_on_approval,
            event_buffer: config.engine.event_buffer.max(1),
        }
    }
}

pub(crate) struct ManagerInner {
    pub(crate) tasks: Mutex<HashMap<TaskId, TaskSlot>>,
    events: broadcast::Sender<TaskEvent>,
    pub(crate) model: Arc<dyn ModelClient>,
    pub(crate) registry: Arc<ToolRegistry>,
    pub(crate) platform: PlatformCapabilities,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) settings: ManagerSettings,
    pub(crate) logger: Arc<dyn Logger>,
}

#[derive(Clone)]
pub struct TaskManager {
    pub(crate) inner: Arc<ManagerInner>,
}

impl TaskManager {
    pub fn new(
        platform: PlatformCapabilities,
        model: Arc<dyn ModelClient>,
        registry: Arc<ToolRegistry>,
        recovery: RecoveryEngine,
        settings: ManagerSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(settings.event_buffer.max(1));
        let logger = platform.logger.child("task-manager");
        Self {
            inner: Arc::new(ManagerInner {
                tasks: Mutex::new(HashMap::new()),
                events,
                model,
                registry,
                platform,
                recovery,
                settings,
                logger,
            }),
        }
    }

    /// 订阅全部任务事件
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.inner.events.subscribe()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, TaskSlot>> {
        self.inner.tasks.lock().await
    }

    /// 只能在持有任务表锁时调用，保证事件顺序
    pub(crate) fn emit(&self, task_id: TaskId, kind: TaskEventKind) {
        tracing::debug!(task_id = %task_id, event = kind.name(), "task event");
        // 没有订阅者时 send 返回 Err，忽略
        let _ = self.inner.events.send(TaskEvent::new(task_id, kind));
    }

    /// 创建任务（pending），不会自动开始执行
    pub async fn create_task(&self, input: impl Into<TaskInput>, config: TaskConfig) -> Task {
        let settings = &self.inner.settings;
        let root = config
            .workspace_root
            .unwrap_or_else(|| settings.default_root.clone());
        let max_iterations = config.max_iterations.unwrap_or(settings.max_iterations);
        let task = Task::new(input.into(), root, max_iterations);
        let snapshot = task.clone();

        let mut tasks = self.lock().await;
        self.emit(
            task.id,
            TaskEventKind::Created {
                workspace_root: task.workspace_root.clone(),
            },
        );
        tasks.insert(
            task.id,
            TaskSlot {
                task,
                cancel: CancellationToken::new(),
                approval_tx: None,
            },
        );
        drop(tasks);

        self.inner.logger.info(&format!("created task {}", snapshot.id));
        snapshot
    }

    /// 执行任务直到终态
    ///
    /// 工具层错误不会从这里返回；只有管理器误用（`NotFound` / `AlreadyRunning` / `InvalidState`）
    /// 和模型提供方的不可恢复错误会返回 Err，后者返回前任务已记录为 failed。
    pub async fn execute_task(&self, id: TaskId) -> Result<Task, EngineError> {
        let (cancel, workspace_root, max_iterations) = {
            let mut tasks = self.lock().await;
            if let Some(active) = tasks.values().find(|s| s.task.status().is_active()) {
                return Err(EngineError::AlreadyRunning(active.task.id));
            }
            let slot = tasks.get_mut(&id).ok_or(EngineError::NotFound(id))?;
            if slot.task.status() != TaskStatus::Pending {
                return Err(EngineError::InvalidState {
                    id,
                    expected: "pending",
                    actual: slot.task.status(),
                });
            }
            slot.task.transition(TaskStatus::Running)?;
            let max_iterations = slot.task.max_iterations;
            self.emit(id, TaskEventKind::Started { max_iterations });
            (slot.cancel.clone(), slot.task.workspace_root.clone(), max_iterations)
        };
        self.inner.logger.info(&format!("executing task {id}"));

        let runner = TaskRunner::new(self.clone(), id, cancel, &workspace_root, max_iterations);
        // 执行循环跑在独立的 tokio 任务上，调用方的 future 被丢弃后仍会响应取消并走到终态
        let result = match tokio::spawn(async move { runner.run().await }).await {
            Ok(result) => result,
            Err(e) => {
                self.abandon(id, &format!("runner aborted: {e}")).await;
                Ok(())
            }
        };

        let snapshot = self.get_task(id).await?;
        self.inner
            .logger
            .info(&format!("task {} finished with status {}", id, snapshot.status()));
        result.map(|_| snapshot)
    }

    /// 执行循环异常退出时把仍处于活跃状态的任务收尾为 cancelled
    async fn abandon(&self, id: TaskId, reason: &str) {
        let mut tasks = self.lock().await;
        let Some(slot) = tasks.get_mut(&id) else { return };
        if slot.task.status().is_terminal() {
            return;
        }
        slot.cancel.cancel();
        slot.approval_tx = None;
        if slot.task.transition(TaskStatus::Cancelled).is_ok() {
            tracing::warn!(task_id = %id, reason, "task runner exited before a terminal state");
            self.emit(
                id,
                TaskEventKind::Cancelled {
                    reason: reason.to_string(),
                },
            );
        }
    }

    /// 只在 awaiting_approval 时有效
    pub async fn resolve_approval(&self, id: TaskId, decision: ApprovalDecision) -> Result<(), EngineError> {
        let mut tasks = self.lock().await;
        let slot = tasks.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        if slot.task.status() != TaskStatus::AwaitingApproval {
            return Err(EngineError::InvalidState {
                id,
                expected: "awaiting_approval",
                actual: slot.task.status(),
            });
        }
        slot.task.transition(TaskStatus::Running)?;
        if let Some(tx) = slot.approval_tx.take() {
            // 接收端已结束（例如审批超时刚好触发）时忽略
            let _ = tx.send(decision);
        }
        drop(tasks);
        self.inner.logger.info(&format!(
            "task {} approval {}",
            id,
            if decision.approved { "granted" } else { "rejected" }
        ));
        Ok(())
    }

    /// 幂等取消：终态任务直接返回 Ok
    ///
    /// pending / awaiting_approval 立即进入 cancelled；running 只设置取消标记，
    /// 由执行循环在下一个挂起点收尾，进行中的工具调用允许执行完。
    pub async fn cancel_task(&self, id: TaskId) -> Result<(), EngineError> {
        let mut tasks = self.lock().await;
        let slot = tasks.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        let status = slot.task.status();
        if status.is_terminal() {
            return Ok(());
        }
        slot.cancel.cancel();
        match status {
            TaskStatus::Pending | TaskStatus::AwaitingApproval => {
                slot.task.transition(TaskStatus::Cancelled)?;
                slot.approval_tx = None;
                self.emit(
                    id,
                    TaskEventKind::Cancelled {
                        reason: "cancelled by request".to_string(),
                    },
                );
            }
            _ => {}
        }
        drop(tasks);
        self.inner.logger.info(&format!("cancellation requested for task {id} ({status})"));
        Ok(())
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task, EngineError> {
        let tasks = self.lock().await;
        tasks
            .get(&id)
            .map(|s| s.task.clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// 按创建时间排序的快照
    pub async fn list_tasks(&self) -> Vec<Task> {
        let tasks = self.lock().await;
        let mut list: Vec<Task> = tasks.values().map(|s| s.task.clone()).collect();
        list.sort_by_key(|t| t.created_at);
        list
    }

    /// 显式清理：只允许移除非活跃任务
    pub async fn remove_task(&self, id: TaskId) -> Result<Task, EngineError> {
        let mut tasks = self.lock().await;
        let status = tasks
            .get(&id)
            .map(|s| s.task.status())
            .ok_or(EngineError::NotFound(id))?;
        if status.is_active() {
            return Err(EngineError::InvalidState {
                id,
                expected: "inactive",
                actual: status,
            });
        }
        let slot = tasks.remove(&id).ok_or(EngineError::NotFound(id))?;
        slot.cancel.cancel();
        drop(tasks);
        self.inner.logger.debug(&format!("removed task {id}"));
        Ok(slot.task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ModelResponse, ScriptedModel};

    fn manager(dir: &std::path::Path, model: ScriptedModel) -> TaskManager {
        let platform = PlatformCapabilities::local(dir);
        let config = AppConfig::default();
        let settings = ManagerSettings::from_config(&config, &platform);
        let registry = ToolRegistry::from_config(&config).with_builtins().unwrap();
        TaskManager::new(platform, Arc::new(model), Arc::new(registry), RecoveryEngine::default(), settings)
    }

    #[tokio::test]
    async fn test_create_does_not_start() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), ScriptedModel::repeating(ModelResponse::text("ok")));
        let mut events = m.subscribe();
        let task = m.create_task("hello", TaskConfig::default()).await;
        assert_eq!(task.status(), TaskStatus::Pending);
        assert_eq!(task.max_iterations, 10);
        assert_eq!(events.recv().await.unwrap().name(), "created");
        assert_eq!(m.get_task(task.id).await.unwrap().status(), TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_execute_twice_is_invalid_state() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), ScriptedModel::repeating(ModelResponse::text("ok")));
        let task = m.create_task("hello", TaskConfig::default()).await;
        let done = m.execute_task(task.id).await.unwrap();
        assert_eq!(done.status(), TaskStatus::Completed);
        assert!(matches!(
            m.execute_task(task.id).await,
            Err(EngineError::InvalidState { expected: "pending", .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_approval_requires_awaiting_state() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), ScriptedModel::repeating(ModelResponse::text("ok")));
        let task = m.create_task("hello", TaskConfig::default()).await;
        let err = m.resolve_approval(task.id, ApprovalDecision::approve()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState { actual: TaskStatus::Pending, .. }));
        assert!(matches!(
            m.resolve_approval(TaskId::new(), ApprovalDecision::approve()).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_pending_then_remove() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), ScriptedModel::repeating(ModelResponse::text("ok")));
        let task = m.create_task("hello", TaskConfig::default()).await;
        m.cancel_task(task.id).await.unwrap();
        m.cancel_task(task.id).await.unwrap();
        let t = m.get_task(task.id).await.unwrap();
        assert_eq!(t.status(), TaskStatus::Cancelled);
        assert!(t.started_at().is_none());

        let removed = m.remove_task(task.id).await.unwrap();
        assert_eq!(removed.id, task.id);
        assert!(m.list_tasks().await.is_empty());
        assert!(matches!(m.get_task(task.id).await, Err(EngineError::NotFound(_))));
    }
}
