//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `BEE__*` 覆盖（双下划线表示嵌套，如 `BEE__ENGINE__MAX_ITERATIONS=5`）。
//! 每个键都有默认值，空配置即可运行。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub engine: EngineSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、默认工作区根目录
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 创建任务时未指定根目录则使用它；再未设置时用平台工作区的主根
    pub workspace_root: Option<PathBuf>,
}

/// [engine] 段：循环上限、模型重试、审批等待、事件缓冲
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    /// 模型 ⇄ 工具 往返次数上限，防止死循环
    pub max_iterations: usize,
    /// 瞬时模型错误的重试次数
    pub model_retries: u32,
    pub model_retry_backoff_ms: u64,
    /// 同一调用以不可重试错误失败时容忍的重试次数
    pub tool_failure_retries: u32,
    /// 审批等待超时（秒）；None 表示无限等待，超时按拒绝处理
    pub approval_timeout_secs: Option<u64>,
    /// 事件广播通道容量
    pub event_buffer: usize,
    /// 需要审批时是否通过 Notifier 提示用户
    pub notify_on_approval: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            model_retries: 2,
            model_retry_backoff_ms: 500,
            tool_failure_retries: 1,
            approval_timeout_secs: None,
            event_buffer: 256,
            notify_on_approval: true,
        }
    }
}

/// [tools] 段：超时、输出截断、审批策略、Shell 与浏览器策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    pub tool_timeout_secs: u64,
    /// 工具输出超过此字符数时截断
    pub max_output_chars: usize,
    pub approval: ApprovalSection,
    pub shell: ShellSection,
    pub browser: BrowserSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 120,
            max_output_chars: 20_000,
            approval: ApprovalSection::default(),
            shell: ShellSection::default(),
            browser: BrowserSection::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalMode {
    /// write / execute / network 类工具执行前需要人工确认
    #[default]
    Ask,
    /// 全部自动批准
    AutoApprove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RejectBehavior {
    /// 拒绝结果回喂模型，循环继续
    #[default]
    Continue,
    /// 记录拒绝结果后结束任务（cancelled）
    Terminate,
}

/// [tools.approval] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ApprovalSection {
    pub mode: ApprovalMode,
    /// 预先批准的工具名
    pub pre_approved: Vec<String>,
    pub on_reject: RejectBehavior,
}

/// [tools.shell] 段：是否允许 shell 连接符、命令名白名单（空表示不限）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ShellSection {
    pub allow_operators: bool,
    pub allowed_commands: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for ShellSection {
    fn default() -> Self {
        Self {
            allow_operators: false,
            allowed_commands: Vec::new(),
            timeout_secs: 60,
        }
    }
}

/// [tools.browser] 段：抓取 URL 的超时、最大字符数、允许的域名白名单（空表示全部拒绝）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSection {
    pub allowed_domains: Vec<String>,
    pub timeout_secs: u64,
    pub max_result_chars: usize,
}

impl Default for BrowserSection {
    fn default() -> Self {
        Self {
            allowed_domains: vec![
                "docs.rs".into(),
                "crates.io".into(),
                "doc.rust-lang.org".into(),
                "github.com".into(),
                "raw.githubusercontent.com".into(),
                "developer.mozilla.org".into(),
                "stackoverflow.com".into(),
            ],
            timeout_secs: 15,
            max_result_chars: 8000,
        }
    }
}

/// 从 config 目录加载配置，环境变量 BEE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 BEE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("BEE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("tools.approval.pre_approved")
            .with_list_parse_key("tools.shell.allowed_commands")
            .with_list_parse_key("tools.browser.allowed_domains")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置（宿主可在运行时调用并决定是否用新配置重建引擎）
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = AppConfig::default();
        assert_eq!(c.engine.max_iterations, 10);
        assert_eq!(c.engine.approval_timeout_secs, None);
        assert_eq!(c.tools.approval.mode, ApprovalMode::Ask);
        assert_eq!(c.tools.approval.on_reject, RejectBehavior::Continue);
        assert!(!c.tools.shell.allow_operators);
    }

    #[test]
    fn test_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bee.toml");
        std::fs::write(
            &path,
            r#"
[engine]
max_iterations = 4
approval_timeout_secs = 30

[tools.approval]
mode = "auto_approve"
pre_approved = ["write_file"]
on_reject = "terminate"

[tools.shell]
allow_operators = true
"#,
        )
        .unwrap();
        let c = load_config(Some(path)).unwrap();
        assert_eq!(c.engine.max_iterations, 4);
        assert_eq!(c.engine.model_retries, 2);
        assert_eq!(c.engine.approval_timeout_secs, Some(30));
        assert_eq!(c.tools.approval.mode, ApprovalMode::AutoApprove);
        assert_eq!(c.tools.approval.pre_approved, vec!["write_file".to_string()]);
        assert_eq!(c.tools.approval.on_reject, RejectBehavior::Terminate);
        assert!(c.tools.shell.allow_operators);
        assert_eq!(c.tools.tool_timeout_secs, 120);
    }
}
