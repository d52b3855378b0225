//! 任务主循环：请求模型 → 执行工具 → 把结果回喂模型，直到终态
//!
//! 每一轮先检查取消标记与迭代上限，再请求模型；模型返回纯文本即完成，返回工具调用则逐个
//! 经注册表流水线执行（必要时挂起等待审批），每次调用都以一条工具结果记入历史后才进入下一轮。
//! 模型请求与取消标记竞争；工具执行不会被打断，避免留下半完成的文件修改。

use std::path::Path;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::config::RejectBehavior;
use crate::core::{EngineError, FailureReason, RecoveryAction, TaskStatus};
use crate::llm::{ModelRequest, ModelResponse, ToolCallRequest};
use crate::platform::NotificationLevel;
use crate::task::manager::ApprovalDecision;
use crate::task::{TaskEventKind, TaskId, TaskManager, ToolInvocation, Turn};
use crate::tools::{PreparedCall, ToolContext, ToolOutcome};

/// 审批等待的结果
enum ApprovalWait {
    Approved,
    Rejected(&'static str),
    /// 等待期间任务被取消（已由管理器迁移到 cancelled）
    Cancelled,
}

/// 一次工具调用的处理结果
enum CallStep {
    Resolved(ToolOutcome),
    /// 拒绝后按配置终止任务
    Terminate(ToolOutcome),
    Cancelled,
}

/// 单轮收尾
enum Flow {
    Continue,
    Stop,
}

pub(crate) struct TaskRunner {
    manager: TaskManager,
    id: TaskId,
    cancel: CancellationToken,
    ctx: ToolContext,
    max_iterations: usize,
}

impl TaskRunner {
    pub(crate) fn new(
        manager: TaskManager,
        id: TaskId,
        cancel: CancellationToken,
        workspace_root: &Path,
        max_iterations: usize,
    ) -> Self {
        let ctx = ToolContext::new(workspace_root, manager.inner.platform.clone());
        Self {
            manager,
            id,
            cancel,
            ctx,
            max_iterations,
        }
    }

    pub(crate) async fn run(&self) -> Result<(), EngineError> {
        let mut iteration = 0usize;
        loop {
            if self.cancel.is_cancelled() {
                self.finish_cancelled("cancelled by request").await;
                return Ok(());
            }
            if iteration >= self.max_iterations {
                tracing::warn!(task_id = %self.id, limit = self.max_iterations, "iteration limit exceeded");
                self.finish_failed(FailureReason::IterationLimitExceeded {
                    limit: self.max_iterations,
                })
                .await;
                return Ok(());
            }
            iteration += 1;

            let Some(request) = self.begin_iteration(iteration).await? else {
                return Ok(());
            };
            let response = match self.request_model(&request).await {
                Ok(Some(r)) => r,
                Ok(None) => {
                    self.finish_cancelled("cancelled by request").await;
                    return Ok(());
                }
                Err(reason) => {
                    let err = match &reason {
                        FailureReason::ModelUnavailable { message } => EngineError::ModelUnavailable(message.clone()),
                        other => EngineError::ModelFailed(other.to_string()),
                    };
                    self.finish_failed(reason).await;
                    return Err(err);
                }
            };

            let is_final = response.is_final();
            let text = response.text.clone();
            let calls = response.tool_calls.clone();
            if !self.record(Turn::Model(response.into()), None).await {
                return Ok(());
            }
            if is_final {
                self.finish_completed(text).await;
                return Ok(());
            }

            for call in &calls {
                if self.cancel.is_cancelled() {
                    self.finish_cancelled("cancelled by request").await;
                    return Ok(());
                }
                if let Flow::Stop = self.handle_call(call).await? {
                    return Ok(());
                }
            }
        }
    }

    /// 发出 progress 并基于当前历史构造模型请求；任务已进入终态时返回 None
    async fn begin_iteration(&self, iteration: usize) -> Result<Option<ModelRequest>, EngineError> {
        let inner = &self.manager.inner;
        let tasks = self.manager.lock().await;
        let slot = tasks.get(&self.id).ok_or(EngineError::NotFound(self.id))?;
        if slot.task.status().is_terminal() {
            return Ok(None);
        }
        self.manager.emit(
            self.id,
            TaskEventKind::Progress {
                iteration,
                max_iterations: self.max_iterations,
                message: format!("Requesting model response ({iteration}/{})", self.max_iterations),
            },
        );
        Ok(Some(ModelRequest {
            task_id: self.id,
            input: slot.task.input.clone(),
            history: slot.task.history().as_slice().to_vec(),
            tools: inner.registry.descriptors(),
            workspace_root: self.ctx.sandbox.root().to_path_buf(),
            environment: inner.platform.system.snapshot(),
        }))
    }

    /// 请求模型；瞬时错误按恢复引擎重试。取消时返回 Ok(None)
    async fn request_model(&self, request: &ModelRequest) -> Result<Option<ModelResponse>, FailureReason> {
        let inner = &self.manager.inner;
        let mut attempt = 0u32;
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(None),
                r = inner.model.respond(request) => r,
            };
            let err = match result {
                Ok(r) => return Ok(Some(r)),
                Err(e) => e,
            };
            match inner.recovery.on_model_error(&err, attempt) {
                RecoveryAction::Retry { after } => {
                    tracing::warn!(task_id = %self.id, attempt, error = %err, "model request failed, retrying");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(None),
                        _ = tokio::time::sleep(after) => {}
                    }
                    attempt += 1;
                }
                RecoveryAction::Abort(reason) => {
                    tracing::error!(task_id = %self.id, error = %err, "model request failed");
                    return Err(reason);
                }
                RecoveryAction::FeedBack => {
                    return Err(FailureReason::ModelError {
                        message: err.to_string(),
                    })
                }
            }
        }
    }

    async fn handle_call(&self, call: &ToolCallRequest) -> Result<Flow, EngineError> {
        let requested_at = Utc::now();
        let step = self.run_tool(call).await?;
        let (outcome, terminate) = match step {
            CallStep::Resolved(o) => (o, false),
            CallStep::Terminate(o) => (o, true),
            CallStep::Cancelled => {
                self.finish_cancelled("cancelled by request").await;
                return Ok(Flow::Stop);
            }
        };

        let invocation = ToolInvocation::resolved(call, requested_at, outcome);
        let failure = invocation.outcome.error_kind;
        let message = invocation.outcome.message.clone().unwrap_or_default();
        if !self.record(Turn::ToolResult(invocation.clone()), Some(invocation)).await {
            return Ok(Flow::Stop);
        }

        if terminate {
            self.finish_cancelled("approval rejected").await;
            return Ok(Flow::Stop);
        }

        if let Some(kind) = failure {
            let occurrences = {
                let tasks = self.manager.lock().await;
                tasks
                    .get(&self.id)
                    .map(|s| s.task.history().failure_count(call, kind))
                    .unwrap_or(0)
            };
            let action = self
                .manager
                .inner
                .recovery
                .on_tool_failure(&call.tool_name, kind, &message, occurrences);
            if let RecoveryAction::Abort(reason) = action {
                tracing::warn!(task_id = %self.id, tool = %call.tool_name, kind = %kind, "aborting after repeated tool failure");
                self.finish_failed(reason).await;
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    /// 流水线：prepare（校验/沙箱/命令安全）→ 审批 → 执行
    async fn run_tool(&self, call: &ToolCallRequest) -> Result<CallStep, EngineError> {
        let registry = &self.manager.inner.registry;
        let prepared = match registry.prepare(call, &self.ctx) {
            Ok(p) => p,
            Err(outcome) => return Ok(CallStep::Resolved(outcome)),
        };

        if registry.requires_approval(&prepared) {
            match self.await_approval(call, &prepared).await? {
                ApprovalWait::Approved => {}
                ApprovalWait::Cancelled => return Ok(CallStep::Cancelled),
                ApprovalWait::Rejected(why) => {
                    tracing::info!(task_id = %self.id, tool = %call.tool_name, why, "tool call declined");
                    let outcome = ToolOutcome::declined(&call.tool_name);
                    return Ok(match registry.approval_policy().on_reject() {
                        RejectBehavior::Continue => CallStep::Resolved(outcome),
                        RejectBehavior::Terminate => CallStep::Terminate(outcome),
                    });
                }
            }
        }

        tracing::info!(task_id = %self.id, tool = %call.tool_name, "executing tool");
        Ok(CallStep::Resolved(registry.execute(&prepared, &self.ctx).await))
    }

    async fn await_approval(&self, call: &ToolCallRequest, prepared: &PreparedCall) -> Result<ApprovalWait, EngineError> {
        let inner = &self.manager.inner;
        let (tx, mut rx) = oneshot::channel::<ApprovalDecision>();
        {
            let mut tasks = self.manager.lock().await;
            let slot = tasks.get_mut(&self.id).ok_or(EngineError::NotFound(self.id))?;
            // cancel_task 在同一把锁下设置标记，这里检查不会漏掉
            if slot.task.status().is_terminal() || slot.cancel.is_cancelled() {
                return Ok(ApprovalWait::Cancelled);
            }
            slot.task.transition(TaskStatus::AwaitingApproval)?;
            slot.approval_tx = Some(tx);
            self.manager.emit(
                self.id,
                TaskEventKind::ApprovalRequired {
                    tool_name: call.tool_name.clone(),
                    parameters: prepared.params.clone(),
                    side_effect: prepared.descriptor.side_effect,
                },
            );
        }

        if inner.settings.notify_on_approval {
            inner
                .platform
                .notifier
                .show(
                    NotificationLevel::Info,
                    &format!(
                        "Task {} wants to run {} ({}); approval required",
                        self.id, call.tool_name, prepared.descriptor.side_effect
                    ),
                )
                .await;
        }

        let received = match inner.settings.approval_timeout {
            None => (&mut rx).await.ok(),
            Some(limit) => match tokio::time::timeout(limit, &mut rx).await {
                Ok(r) => r.ok(),
                Err(_) => return self.expire_approval(rx).await,
            },
        };

        Ok(match received {
            Some(d) if d.approved => ApprovalWait::Approved,
            Some(_) => ApprovalWait::Rejected("rejected by user"),
            // 发送端被丢弃：任务在等待期间被取消
            None => ApprovalWait::Cancelled,
        })
    }

    /// 审批超时按拒绝处理；与 resolve_approval / cancel_task 的竞争在锁内判定
    async fn expire_approval(&self, mut rx: oneshot::Receiver<ApprovalDecision>) -> Result<ApprovalWait, EngineError> {
        let mut tasks = self.manager.lock().await;
        let slot = tasks.get_mut(&self.id).ok_or(EngineError::NotFound(self.id))?;
        match slot.task.status() {
            TaskStatus::AwaitingApproval => {
                slot.task.transition(TaskStatus::Running)?;
                slot.approval_tx = None;
                Ok(ApprovalWait::Rejected("approval timed out"))
            }
            TaskStatus::Running => Ok(match rx.try_recv() {
                Ok(d) if d.approved => ApprovalWait::Approved,
                _ => ApprovalWait::Rejected("rejected by user"),
            }),
            _ => Ok(ApprovalWait::Cancelled),
        }
    }

    /// 追加一轮历史；工具结果同时发出 toolExecuted。任务已终态时返回 false
    async fn record(&self, turn: Turn, executed: Option<ToolInvocation>) -> bool {
        let mut tasks = self.manager.lock().await;
        let Some(slot) = tasks.get_mut(&self.id) else {
            return false;
        };
        if slot.task.append(turn).is_err() {
            return false;
        }
        if let Some(invocation) = executed {
            self.manager.emit(self.id, TaskEventKind::ToolExecuted { invocation });
        }
        true
    }

    async fn finish_completed(&self, result: String) {
        let mut tasks = self.manager.lock().await;
        if let Some(slot) = tasks.get_mut(&self.id) {
            if slot.task.complete(result.clone()).is_ok() {
                tracing::info!(task_id = %self.id, "task completed");
                self.manager.emit(self.id, TaskEventKind::Completed { result });
            }
        }
    }

    async fn finish_failed(&self, reason: FailureReason) {
        let mut tasks = self.manager.lock().await;
        if let Some(slot) = tasks.get_mut(&self.id) {
            if slot.task.fail(reason.clone()).is_ok() {
                tracing::warn!(task_id = %self.id, reason = reason.code(), "task failed");
                let message = reason.to_string();
                self.manager.emit(self.id, TaskEventKind::Failed { reason, message });
            }
        }
    }

    /// 已被管理器直接取消（pending / awaiting_approval）时不再重复迁移
    async fn finish_cancelled(&self, reason: &str) {
        let mut tasks = self.manager.lock().await;
        if let Some(slot) = tasks.get_mut(&self.id) {
            if slot.task.status().is_terminal() {
                return;
            }
            if slot.task.transition(TaskStatus::Cancelled).is_ok() {
                slot.approval_tx = None;
                tracing::info!(task_id = %self.id, reason, "task cancelled");
                self.manager.emit(
                    self.id,
                    TaskEventKind::Cancelled {
                        reason: reason.to_string(),
                    },
                );
            }
        }
    }
}
