//! 引擎构建器：组合根
//!
//! 把平台能力、模型客户端、工具注册表与配置装配成 `Engine`；宿主（IDE 扩展或独立服务器）
//! 只需提供 `PlatformCapabilities` 和模型，核心不持有任何全局宿主引用。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::AppConfig;
use crate::core::{EngineError, RecoveryEngine, TaskStatus};
use crate::llm::{LlmClient, ModelClient, TextModelAdapter};
use crate::platform::PlatformCapabilities;
use crate::task::manager::ManagerSettings;
use crate::task::{ApprovalDecision, Task, TaskConfig, TaskEvent, TaskId, TaskInput, TaskManager};
use crate::tools::{CustomTool, ToolDescriptor, ToolHandler, ToolRegistry};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are Bee, a coding agent. Work inside the workspace using the tools below, one call at a time.";
/// prompt_approval 在未配置审批超时时使用的提问超时
const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(300);
const APPROVE: &str = "Approve";
const REJECT: &str = "Reject";

pub struct EngineBuilder {
    config: AppConfig,
    platform: PlatformCapabilities,
    model: Option<Arc<dyn ModelClient>>,
    llm: Option<Arc<dyn LlmClient>>,
    system_prompt: String,
    custom_tools: Vec<(ToolDescriptor, ToolHandler)>,
}

impl EngineBuilder {
    pub fn new(platform: PlatformCapabilities, config: AppConfig) -> Self {
        Self {
            config,
            platform,
            model: None,
            llm: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            custom_tools: Vec::new(),
        }
    }

    /// 结构化模型客户端（优先于 with_llm）
    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    /// 纯文本 LLM，构建时用 TextModelAdapter 包装
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// 从 config/prompts/system.md 加载系统提示词，找不到时保留当前值
    pub fn with_system_prompt_from_file(mut self) -> Self {
        if let Some(prompt) = ["config/prompts/system.md", "../config/prompts/system.md"]
            .into_iter()
            .find_map(|p| std::fs::read_to_string(p).ok())
        {
            self.system_prompt = prompt;
        }
        self
    }

    pub fn with_custom_tool(mut self, descriptor: ToolDescriptor, tool: impl CustomTool + 'static) -> Self {
        self.custom_tools
            .push((descriptor, ToolHandler::Custom(Arc::new(tool))));
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 内置工具 + 宿主注册的自定义工具
    pub fn build_tool_registry(&self) -> Result<ToolRegistry, EngineError> {
        let mut registry = ToolRegistry::from_config(&self.config).with_builtins()?;
        for (descriptor, handler) in &self.custom_tools {
            registry.register(descriptor.clone(), handler.clone())?;
        }
        Ok(registry)
    }

    fn build_model(&self) -> Result<Arc<dyn ModelClient>, EngineError> {
        if let Some(model) = &self.model {
            return Ok(model.clone());
        }
        match &self.llm {
            Some(llm) => Ok(Arc::new(TextModelAdapter::new(llm.clone(), self.system_prompt.clone()))),
            None => Err(EngineError::ConfigError(
                "no model client configured; call with_model or with_llm".to_string(),
            )),
        }
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let model = self.build_model()?;
        let registry = Arc::new(self.build_tool_registry()?);
        let settings = ManagerSettings::from_config(&self.config, &self.platform);
        let recovery = RecoveryEngine::from_config(&self.config.engine);
        tracing::info!(
            tools = registry.tool_names().len(),
            default_root = %settings.default_root.display(),
            max_iterations = settings.max_iterations,
            "engine built"
        );
        let manager = TaskManager::new(self.platform.clone(), model, registry, recovery, settings);
        Ok(Engine {
            manager,
            platform: self.platform,
            config: Arc::new(self.config),
        })
    }
}

/// 引擎：控制面 + 事件面
#[derive(Clone)]
pub struct Engine {
    manager: TaskManager,
    platform: PlatformCapabilities,
    config: Arc<AppConfig>,
}

impl Engine {
    pub fn new(platform: PlatformCapabilities, model: Arc<dyn ModelClient>, config: AppConfig) -> Result<Self, EngineError> {
        EngineBuilder::new(platform, config).with_model(model).build()
    }

    pub fn builder(platform: PlatformCapabilities, config: AppConfig) -> EngineBuilder {
        EngineBuilder::new(platform, config)
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    pub fn platform(&self) -> &PlatformCapabilities {
        &self.platform
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn create_task(&self, input: impl Into<TaskInput>, config: TaskConfig) -> Task {
        self.manager.create_task(input, config).await
    }

    pub async fn execute_task(&self, id: TaskId) -> Result<Task, EngineError> {
        self.manager.execute_task(id).await
    }

    pub async fn resolve_approval(&self, id: TaskId, decision: ApprovalDecision) -> Result<(), EngineError> {
        self.manager.resolve_approval(id, decision).await
    }

    pub async fn cancel_task(&self, id: TaskId) -> Result<(), EngineError> {
        self.manager.cancel_task(id).await
    }

    pub async fn get_task(&self, id: TaskId) -> Result<Task, EngineError> {
        self.manager.get_task(id).await
    }

    pub async fn list_tasks(&self) -> Vec<Task> {
        self.manager.list_tasks().await
    }

    pub async fn remove_task(&self, id: TaskId) -> Result<Task, EngineError> {
        self.manager.remove_task(id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.manager.subscribe()
    }

    /// 通过 Notifier 询问用户是否批准待执行的工具调用
    ///
    /// 选择 Approve / Reject 后转交 `resolve_approval`；无人选择时返回 Ok(None)，任务继续等待。
    pub async fn prompt_approval(&self, id: TaskId) -> Result<Option<ApprovalDecision>, EngineError> {
        let task = self.manager.get_task(id).await?;
        if task.status() != TaskStatus::AwaitingApproval {
            return Err(EngineError::InvalidState {
                id,
                expected: "awaiting_approval",
                actual: task.status(),
            });
        }
        let call = task.history().pending_tool_call();
        let message = match call {
            Some(c) => format!("Allow task {} to run {} with {}?", id, c.tool_name, c.parameters),
            None => format!("Allow task {id} to run the pending tool?"),
        };
        let options = vec![APPROVE.to_string(), REJECT.to_string()];
        let timeout = self
            .config
            .engine
            .approval_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_PROMPT_TIMEOUT);

        // 宿主 Notifier 未遵守超时时同样视为无人选择
        let answer = tokio::time::timeout(timeout, self.platform.notifier.ask(&message, &options, timeout))
            .await
            .unwrap_or_else(|_| {
                tracing::warn!(task_id = %id, "approval prompt exceeded its timeout");
                None
            });
        let decision = match answer {
            Some(0) => ApprovalDecision::approve(),
            Some(_) => ApprovalDecision::reject(),
            None => return Ok(None),
        };
        self.manager.resolve_approval(id, decision).await?;
        Ok(Some(decision))
    }
}

/// 便捷函数：从默认路径加载配置并以本地平台实现创建构建器
pub fn create_engine_builder(config_path: Option<PathBuf>) -> EngineBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let workspace = config
        .app
        .workspace_root
        .clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let workspace = workspace.canonicalize().unwrap_or(workspace);

    EngineBuilder::new(PlatformCapabilities::local(&workspace), config).with_system_prompt_from_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, ModelResponse, ScriptedModel};

    #[tokio::test]
    async fn test_build_requires_model() {
        let dir = tempfile::tempdir().unwrap();
        let result = EngineBuilder::new(PlatformCapabilities::local(dir.path()), AppConfig::default()).build();
        assert!(matches!(result, Err(EngineError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_text_llm_engine_completes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        let llm = MockLlmClient::new(vec![
            r#"{"tool": "read_file", "args": {"path": "a.txt"}}"#.to_string(),
            "The file says alpha.".to_string(),
        ]);
        let engine = EngineBuilder::new(PlatformCapabilities::local(dir.path()), AppConfig::default())
            .with_llm(Arc::new(llm))
            .build()
            .unwrap();
        let task = engine
            .create_task("what is in a.txt?", TaskConfig::default().with_workspace_root(dir.path()))
            .await;
        let done = engine.execute_task(task.id).await.unwrap();
        assert_eq!(done.status(), TaskStatus::Completed);
        assert_eq!(done.result(), Some("The file says alpha."));
        let inv = done.history().iter().find_map(|t| t.as_tool_result()).unwrap();
        assert_eq!(inv.outcome.output.as_deref(), Some("alpha"));
    }

    #[tokio::test]
    async fn test_prompt_approval_outside_waiting_state() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::new(
            PlatformCapabilities::local(dir.path()),
            Arc::new(ScriptedModel::repeating(ModelResponse::text("ok"))),
            AppConfig::default(),
        )
        .unwrap();
        let task = engine.create_task("hi", TaskConfig::default()).await;
        assert!(matches!(
            engine.prompt_approval(task.id).await,
            Err(EngineError::InvalidState { .. })
        ));
    }
}
