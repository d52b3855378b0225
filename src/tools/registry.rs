//! 工具注册表与安全流水线
//!
//! 每个工具是一条扁平记录 `{descriptor, validator, handler}`，按名存放在同一个 map 中。
//! 调用经过：schema 校验 → 路径包含 → 命令/域名安全 → 审批门控（由任务决定）→ 执行。
//! 任何结果都以 ToolOutcome 返回，不会以 Err 穿出任务边界；每次执行输出结构化审计日志（JSON）。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::timeout;

use crate::config::AppConfig;
use crate::core::EngineError;
use crate::llm::ToolCallRequest;
use crate::platform::PlatformCapabilities;
use crate::tools::builtin::{Builtin, BuiltinSettings};
use crate::tools::sandbox::{ApprovalPolicy, PathSandbox};
use crate::tools::{SideEffectClass, ToolDescriptor, ToolError, ToolErrorKind, ToolOutcome};

/// 单个任务的工具执行上下文：沙箱根 + 平台能力
#[derive(Clone)]
pub struct ToolContext {
    pub sandbox: PathSandbox,
    pub platform: PlatformCapabilities,
}

impl ToolContext {
    pub fn new(workspace_root: impl AsRef<Path>, platform: PlatformCapabilities) -> Self {
        Self {
            sandbox: PathSandbox::new(workspace_root),
            platform,
        }
    }
}

/// 宿主扩展的自定义工具
#[async_trait]
pub trait CustomTool: Send + Sync {
    async fn call(&self, call: &PreparedCall, ctx: &ToolContext) -> Result<String, ToolError>;
}

#[derive(Clone)]
pub enum ToolHandler {
    Builtin(Builtin),
    Custom(Arc<dyn CustomTool>),
}

struct RegisteredTool {
    descriptor: ToolDescriptor,
    validator: jsonschema::Validator,
    handler: ToolHandler,
}

/// 通过了校验、等待（审批后）执行的调用
#[derive(Clone)]
pub struct PreparedCall {
    pub descriptor: ToolDescriptor,
    pub params: Value,
    paths: HashMap<String, PathBuf>,
    handler: ToolHandler,
}

impl PreparedCall {
    /// 沙箱解析后的路径参数
    pub fn path(&self, name: &str) -> Option<&Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }
}

pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    settings: BuiltinSettings,
    approval: ApprovalPolicy,
    timeout: Duration,
    max_output_chars: usize,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(BuiltinSettings::default(), ApprovalPolicy::default(), Duration::from_secs(30), 20_000)
    }
}

impl ToolRegistry {
    pub fn new(
        settings: BuiltinSettings,
        approval: ApprovalPolicy,
        timeout: Duration,
        max_output_chars: usize,
    ) -> Self {
        Self {
            tools: HashMap::new(),
            settings,
            approval,
            timeout,
            max_output_chars,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            BuiltinSettings::from_config(config),
            ApprovalPolicy::from_config(&config.tools.approval),
            Duration::from_secs(config.tools.tool_timeout_secs),
            config.tools.max_output_chars,
        )
    }

    /// 注册全部内置工具
    pub fn with_builtins(mut self) -> Result<Self, EngineError> {
        for b in Builtin::ALL {
            self.register(b.descriptor(), ToolHandler::Builtin(b))?;
        }
        Ok(self)
    }

    /// 注册（或替换）一个工具；schema 无法编译时报错
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: ToolHandler) -> Result<(), EngineError> {
        let validator = jsonschema::validator_for(&descriptor.parameter_schema).map_err(|e| {
            EngineError::ConfigError(format!("invalid schema for tool {}: {}", descriptor.name, e))
        })?;
        self.tools.insert(
            descriptor.name.clone(),
            RegisteredTool {
                descriptor,
                validator,
                handler,
            },
        );
        Ok(())
    }

    pub fn register_custom(
        &mut self,
        descriptor: ToolDescriptor,
        tool: impl CustomTool + 'static,
    ) -> Result<(), EngineError> {
        self.register(descriptor, ToolHandler::Custom(Arc::new(tool)))
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|t| &t.descriptor)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 工具目录（按名称排序），供模型请求使用
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut list: Vec<ToolDescriptor> = self.tools.values().map(|t| t.descriptor.clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn approval_policy(&self) -> &ApprovalPolicy {
        &self.approval
    }

    pub fn requires_approval(&self, call: &PreparedCall) -> bool {
        self.approval.requires_approval(&call.descriptor)
    }

    /// 流水线前三步：schema 校验、路径包含、命令/域名安全；任何一步失败都不会产生副作用
    pub fn prepare(&self, request: &ToolCallRequest, ctx: &ToolContext) -> Result<PreparedCall, ToolOutcome> {
        let name = request.tool_name.as_str();
        let Some(tool) = self.tools.get(name) else {
            return Err(ToolOutcome::fail(
                ToolErrorKind::Validation,
                format!("Unknown tool: {}. Available tools: {}", name, self.tool_names().join(", ")),
            ));
        };

        let params = if request.parameters.is_null() {
            serde_json::json!({})
        } else {
            request.parameters.clone()
        };
        let errors: Vec<String> = tool.validator.iter_errors(&params).map(|e| e.to_string()).collect();
        if !errors.is_empty() {
            return Err(ToolOutcome::fail(
                ToolErrorKind::Validation,
                format!("Invalid parameters for {}: {}", name, errors.join("; ")),
            ));
        }

        let mut paths = HashMap::new();
        for param in &tool.descriptor.path_params {
            let Some(raw) = params.get(param).and_then(Value::as_str) else {
                continue;
            };
            match ctx.sandbox.resolve(raw) {
                Ok(resolved) => {
                    paths.insert(param.clone(), resolved);
                }
                Err(e) => return Err(self.reject(name, &params, e)),
            }
        }

        let policy_check = match tool.descriptor.side_effect {
            SideEffectClass::Execute => params
                .get("command")
                .and_then(Value::as_str)
                .map(|c| self.settings.command_policy.check(c)),
            SideEffectClass::Network => params
                .get("url")
                .and_then(Value::as_str)
                .map(|u| self.settings.domain_policy.check(u).map(|_| ())),
            _ => None,
        };
        if let Some(Err(e)) = policy_check {
            return Err(self.reject(name, &params, e));
        }

        Ok(PreparedCall {
            descriptor: tool.descriptor.clone(),
            params,
            paths,
            handler: tool.handler.clone(),
        })
    }

    fn reject(&self, tool: &str, params: &Value, e: ToolError) -> ToolOutcome {
        if e.kind == ToolErrorKind::SandboxViolation {
            let audit = serde_json::json!({
                "event": "sandbox_violation",
                "tool": tool,
                "reason": e.message,
                "args_preview": args_preview(params),
            });
            tracing::warn!(target: "bee_engine::audit", audit = %audit, "sandbox violation");
        }
        e.into()
    }

    /// 流水线最后一步：在超时内执行，统一转为 ToolOutcome 并截断过长输出
    pub async fn execute(&self, call: &PreparedCall, ctx: &ToolContext) -> ToolOutcome {
        let start = Instant::now();
        let tool_name = call.descriptor.name.as_str();
        let run = async {
            match &call.handler {
                ToolHandler::Builtin(b) => b.run(call, ctx, &self.settings).await,
                ToolHandler::Custom(t) => t.call(call, ctx).await,
            }
        };
        let result = timeout(self.timeout, run).await;

        let outcome = match result {
            Ok(Ok(content)) => ToolOutcome::ok(truncate_output(content, self.max_output_chars)),
            Ok(Err(e)) => e.into(),
            Err(_) => ToolOutcome::fail(
                ToolErrorKind::Timeout,
                format!("Tool {} timed out after {}s", tool_name, self.timeout.as_secs()),
            ),
        };

        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": outcome.success,
            "outcome": outcome.error_kind.map(|k| k.as_str()).unwrap_or("ok"),
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.params),
        });
        tracing::info!(audit = %audit, "tool");
        outcome
    }

    /// 不经审批直接走完整流水线（宿主直接调用工具时使用）
    pub async fn invoke(&self, request: &ToolCallRequest, ctx: &ToolContext) -> ToolOutcome {
        match self.prepare(request, ctx) {
            Ok(call) => self.execute(&call, ctx).await,
            Err(outcome) => outcome,
        }
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

fn truncate_output(content: String, max_chars: usize) -> String {
    if content.chars().count() > max_chars {
        content.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        content
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::PlatformCapabilities;

    fn setup() -> (tempfile::TempDir, ToolRegistry, ToolContext) {
        let dir = tempfile::tempdir().unwrap();
        let registry = ToolRegistry::default().with_builtins().unwrap();
        let ctx = ToolContext::new(dir.path(), PlatformCapabilities::local(dir.path()));
        (dir, registry, ctx)
    }

    fn call(name: &str, params: Value) -> ToolCallRequest {
        ToolCallRequest::new(name, params)
    }

    #[tokio::test]
    async fn test_write_then_read_inside_workspace() {
        let (dir, registry, ctx) = setup();
        let out = registry
            .invoke(&call("write_file", serde_json::json!({"path": "notes/a.txt", "content": "hello"})), &ctx)
            .await;
        assert!(out.success, "{out:?}");
        assert_eq!(std::fs::read_to_string(dir.path().join("notes/a.txt")).unwrap(), "hello");

        let out = registry
            .invoke(&call("read_file", serde_json::json!({"path": "notes/a.txt"})), &ctx)
            .await;
        assert_eq!(out.output.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_traversal_write_is_sandbox_violation_without_io() {
        let (dir, registry, ctx) = setup();
        let out = registry
            .invoke(
                &call("write_file", serde_json::json!({"path": "../../etc/passwd", "content": "x"})),
                &ctx,
            )
            .await;
        assert!(!out.success);
        assert!(out.is_kind(ToolErrorKind::SandboxViolation));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_schema_violation_fails_fast() {
        let (_dir, registry, ctx) = setup();
        let out = registry.invoke(&call("read_file", serde_json::json!({"file": "a"})), &ctx).await;
        assert!(out.is_kind(ToolErrorKind::Validation), "{out:?}");
        let out = registry.invoke(&call("read_file", serde_json::json!({"path": 3})), &ctx).await;
        assert!(out.is_kind(ToolErrorKind::Validation));
        let out = registry.invoke(&call("no_such_tool", serde_json::json!({})), &ctx).await;
        assert!(out.is_kind(ToolErrorKind::Validation));
        assert!(out.message.unwrap().contains("read_file"));
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let (_dir, registry, ctx) = setup();
        let out = registry.invoke(&call("read_file", serde_json::json!({"path": "nope.txt"})), &ctx).await;
        assert!(out.is_kind(ToolErrorKind::NotFound), "{out:?}");
    }

    #[tokio::test]
    async fn test_command_injection_rejected_before_approval() {
        let (_dir, registry, ctx) = setup();
        let res = registry.prepare(&call("execute_command", serde_json::json!({"command": "ls; rm -r x"})), &ctx);
        match res {
            Err(out) => assert!(out.is_kind(ToolErrorKind::SandboxViolation)),
            Ok(_) => panic!("Expected SandboxViolation"),
        }
        let prepared = registry
            .prepare(&call("execute_command", serde_json::json!({"command": "echo hi"})), &ctx)
            .ok()
            .unwrap();
        assert!(registry.requires_approval(&prepared));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_command_runs_in_workspace() {
        let (dir, registry, ctx) = setup();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let out = registry.invoke(&call("execute_command", serde_json::json!({"command": "ls"})), &ctx).await;
        assert!(out.output.unwrap().contains("marker.txt"));
        let out = registry.invoke(&call("execute_command", serde_json::json!({"command": "false"})), &ctx).await;
        assert!(out.is_kind(ToolErrorKind::CommandFailed));
    }

    #[tokio::test]
    async fn test_list_search_and_diff() {
        let (dir, registry, ctx) = setup();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn answer() -> u32 {\n    41\n}\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "answer docs\n").unwrap();

        let out = registry
            .invoke(&call("list_files", serde_json::json!({"recursive": true})), &ctx)
            .await;
        assert_eq!(out.output.as_deref(), Some("README.md\nsrc/\nsrc/lib.rs"));

        let out = registry
            .invoke(&call("list_files", serde_json::json!({"recursive": true, "pattern": "*.rs"})), &ctx)
            .await;
        assert_eq!(out.output.as_deref(), Some("src/lib.rs"));

        let out = registry
            .invoke(
                &call("search_files", serde_json::json!({"pattern": "answer", "file_pattern": "*.rs"})),
                &ctx,
            )
            .await;
        assert_eq!(out.output.as_deref(), Some("src/lib.rs:1: pub fn answer() -> u32 {"));

        let diff = "<<<<<<< SEARCH\n    41\n=======\n    42\n>>>>>>> REPLACE\n";
        let out = registry
            .invoke(&call("apply_diff", serde_json::json!({"path": "src/lib.rs", "diff": diff})), &ctx)
            .await;
        assert!(out.success, "{out:?}");
        assert!(std::fs::read_to_string(dir.path().join("src/lib.rs")).unwrap().contains("42"));
    }

    #[tokio::test]
    async fn test_browse_url_outside_allowlist_rejected() {
        let (_dir, registry, ctx) = setup();
        let out = registry
            .invoke(&call("browse_url", serde_json::json!({"url": "https://evil.example/"})), &ctx)
            .await;
        assert!(out.is_kind(ToolErrorKind::SandboxViolation));
    }

    #[tokio::test]
    async fn test_browse_url_does_not_follow_redirect_off_allowlist() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = vec![0u8; 4096];
                let n = sock.read(&mut buf).await.unwrap_or(0);
                let resp = if String::from_utf8_lossy(&buf[..n]).starts_with("GET /internal") {
                    "HTTP/1.1 200 OK\r\nContent-Length: 18\r\nConnection: close\r\n\r\nINTERNAL-ONLY-DATA".to_string()
                } else {
                    format!(
                        "HTTP/1.1 302 Found\r\nLocation: http://localhost:{port}/internal\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                    )
                };
                let _ = sock.write_all(resp.as_bytes()).await;
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.tools.browser.allowed_domains = vec!["127.0.0.1".into()];
        let registry = ToolRegistry::from_config(&config).with_builtins().unwrap();
        let ctx = ToolContext::new(dir.path(), PlatformCapabilities::local(dir.path()));

        let out = registry
            .invoke(
                &call("browse_url", serde_json::json!({"url": format!("http://127.0.0.1:{port}/")})),
                &ctx,
            )
            .await;
        assert!(out.is_kind(ToolErrorKind::SandboxViolation), "{out:?}");
        assert!(out.output.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_search_skips_symlink_outside_workspace() {
        let (dir, registry, ctx) = setup();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "TOPSECRET=hunter2\n").unwrap();
        std::os::unix::fs::symlink(outside.path().join("secret.txt"), dir.path().join("notes.txt")).unwrap();
        std::fs::write(dir.path().join("plain.txt"), "TOPSECRET=visible\n").unwrap();

        let out = registry
            .invoke(&call("search_files", serde_json::json!({"pattern": "TOPSECRET"})), &ctx)
            .await;
        assert_eq!(out.output.as_deref(), Some("plain.txt:1: TOPSECRET=visible"));

        let out = registry
            .invoke(&call("list_files", serde_json::json!({})), &ctx)
            .await;
        assert_eq!(out.output.as_deref(), Some("plain.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_delete_symlink_removes_link_not_target() {
        let (dir, registry, ctx) = setup();
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/keep.txt"), "keep").unwrap();
        std::os::unix::fs::symlink(dir.path().join("data"), dir.path().join("link")).unwrap();

        let out = registry
            .invoke(&call("delete_file", serde_json::json!({"path": "link"})), &ctx)
            .await;
        assert!(out.success, "{out:?}");
        assert!(dir.path().join("link").symlink_metadata().is_err());
        assert_eq!(std::fs::read_to_string(dir.path().join("data/keep.txt")).unwrap(), "keep");
    }

    struct SlowTool;

    #[async_trait]
    impl CustomTool for SlowTool {
        async fn call(&self, _call: &PreparedCall, _ctx: &ToolContext) -> Result<String, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    #[tokio::test]
    async fn test_custom_tool_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = ToolRegistry::new(
            BuiltinSettings::default(),
            ApprovalPolicy::default(),
            Duration::from_millis(50),
            100,
        );
        registry
            .register_custom(
                ToolDescriptor {
                    name: "slow".into(),
                    description: "sleeps".into(),
                    parameter_schema: serde_json::json!({"type": "object"}),
                    side_effect: SideEffectClass::Read,
                    path_params: vec![],
                },
                SlowTool,
            )
            .unwrap();
        let ctx = ToolContext::new(dir.path(), PlatformCapabilities::local(dir.path()));
        let out = registry.invoke(&call("slow", Value::Null), &ctx).await;
        assert!(out.is_kind(ToolErrorKind::Timeout));
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("abcdef".into(), 3), "abc\n...[truncated]");
        assert_eq!(truncate_output("abc".into(), 3), "abc");
    }
}
