//! 内置工具：扁平的标签枚举，每个变体对应一条 `{name, schema, side_effect, handler}` 记录
//!
//! 参数结构体用 schemars 生成 JSON Schema，注册表据此校验；执行时经平台抽象层做 I/O。

mod browser;
mod diff;
mod filesystem;
mod search;
mod shell;

use std::time::Duration;

use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::AppConfig;
use crate::tools::sandbox::{CommandPolicy, DomainPolicy};
use crate::tools::{PreparedCall, SideEffectClass, ToolContext, ToolDescriptor, ToolError};

pub use diff::{apply_search_replace, parse_search_replace, SearchReplaceBlock};

/// 内置工具的共享设置（由组合根从配置构造）
#[derive(Debug, Clone)]
pub struct BuiltinSettings {
    pub command_policy: CommandPolicy,
    pub domain_policy: DomainPolicy,
    pub shell_timeout: Duration,
    pub browser_timeout: Duration,
    pub browser_max_chars: usize,
    http: reqwest::Client,
}

impl BuiltinSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let browser_timeout = Duration::from_secs(config.tools.browser.timeout_secs);
        let domain_policy = DomainPolicy::from_config(&config.tools.browser);
        // 命令超时必须先于注册表的整体超时触发，才能返回带命令信息的超时错误
        let tool_timeout = Duration::from_secs(config.tools.tool_timeout_secs);
        let shell_timeout = Duration::from_secs(config.tools.shell.timeout_secs)
            .min(tool_timeout.saturating_sub(Duration::from_secs(1)))
            .max(Duration::from_secs(1));
        Self {
            command_policy: CommandPolicy::from_config(&config.tools.shell),
            http: browser::build_client(browser_timeout, domain_policy.clone()),
            domain_policy,
            shell_timeout,
            browser_timeout,
            browser_max_chars: config.tools.browser.max_result_chars,
        }
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

impl Default for BuiltinSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    ReadFile,
    WriteFile,
    ListFiles,
    DeleteFile,
    SearchFiles,
    ApplyDiff,
    ExecuteCommand,
    BrowseUrl,
}

/// read_file 参数
#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ReadFileParams {
    /// 相对工作区的文件路径
    pub path: String,
    /// 起始行（从 0 开始）
    pub offset: Option<usize>,
    /// 最多读取的行数
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct WriteFileParams {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ListFilesParams {
    /// 目录，默认工作区根
    pub path: Option<String>,
    pub recursive: Option<bool>,
    /// glob 过滤，如 `*.rs`
    pub pattern: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct DeleteFileParams {
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SearchFilesParams {
    /// 正则表达式
    pub pattern: String,
    pub path: Option<String>,
    /// 文件名 glob 过滤
    pub file_pattern: Option<String>,
    pub max_results: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ApplyDiffParams {
    pub path: String,
    /// 一个或多个 `<<<<<<< SEARCH / ======= / >>>>>>> REPLACE` 块
    pub diff: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ExecuteCommandParams {
    pub command: String,
    /// 工作目录，默认工作区根
    pub cwd: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct BrowseUrlParams {
    pub url: String,
    pub max_chars: Option<usize>,
}

fn schema_value<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 校验通过后把参数反序列化为具体结构
pub(crate) fn parse_params<T: DeserializeOwned>(call: &PreparedCall) -> Result<T, ToolError> {
    serde_json::from_value(call.params.clone())
        .map_err(|e| ToolError::validation(format!("Invalid parameters for {}: {}", call.descriptor.name, e)))
}

impl Builtin {
    pub const ALL: [Builtin; 8] = [
        Builtin::ReadFile,
        Builtin::WriteFile,
        Builtin::ListFiles,
        Builtin::DeleteFile,
        Builtin::SearchFiles,
        Builtin::ApplyDiff,
        Builtin::ExecuteCommand,
        Builtin::BrowseUrl,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ReadFile => "read_file",
            Self::WriteFile => "write_file",
            Self::ListFiles => "list_files",
            Self::DeleteFile => "delete_file",
            Self::SearchFiles => "search_files",
            Self::ApplyDiff => "apply_diff",
            Self::ExecuteCommand => "execute_command",
            Self::BrowseUrl => "browse_url",
        }
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        let (description, schema, side_effect, path_params): (&str, _, _, Vec<&str>) = match self {
            Self::ReadFile => (
                "Read a text file in the workspace, optionally a window of lines.",
                schema_value::<ReadFileParams>(),
                SideEffectClass::Read,
                vec!["path"],
            ),
            Self::WriteFile => (
                "Create or overwrite a file in the workspace with the given content.",
                schema_value::<WriteFileParams>(),
                SideEffectClass::Write,
                vec!["path"],
            ),
            Self::ListFiles => (
                "List a directory in the workspace (directories end with '/').",
                schema_value::<ListFilesParams>(),
                SideEffectClass::Read,
                vec!["path"],
            ),
            Self::DeleteFile => (
                "Delete a file or directory in the workspace.",
                schema_value::<DeleteFileParams>(),
                SideEffectClass::Write,
                vec!["path"],
            ),
            Self::SearchFiles => (
                "Search workspace files with a regular expression; returns path:line: text.",
                schema_value::<SearchFilesParams>(),
                SideEffectClass::Read,
                vec!["path"],
            ),
            Self::ApplyDiff => (
                "Edit a file with SEARCH/REPLACE blocks; each SEARCH must match exactly once.",
                schema_value::<ApplyDiffParams>(),
                SideEffectClass::Write,
                vec!["path"],
            ),
            Self::ExecuteCommand => (
                "Run a single shell command in the workspace (no chaining, pipes or redirection).",
                schema_value::<ExecuteCommandParams>(),
                SideEffectClass::Execute,
                vec!["cwd"],
            ),
            Self::BrowseUrl => (
                "Fetch a web page from an allowlisted domain and return its readable text.",
                schema_value::<BrowseUrlParams>(),
                SideEffectClass::Network,
                vec![],
            ),
        };
        ToolDescriptor {
            name: self.name().to_string(),
            description: description.to_string(),
            parameter_schema: schema,
            side_effect,
            path_params: path_params.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub async fn run(
        &self,
        call: &PreparedCall,
        ctx: &ToolContext,
        settings: &BuiltinSettings,
    ) -> Result<String, ToolError> {
        match self {
            Self::ReadFile => filesystem::read_file(call, ctx).await,
            Self::WriteFile => filesystem::write_file(call, ctx).await,
            Self::ListFiles => filesystem::list_files(call, ctx).await,
            Self::DeleteFile => filesystem::delete_file(call, ctx).await,
            Self::SearchFiles => search::search_files(call, ctx).await,
            Self::ApplyDiff => diff::apply_diff(call, ctx).await,
            Self::ExecuteCommand => shell::execute_command(call, ctx, settings).await,
            Self::BrowseUrl => browser::browse_url(call, settings).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptors_have_object_schemas() {
        for b in Builtin::ALL {
            let d = b.descriptor();
            assert_eq!(d.name, b.name());
            assert_eq!(d.parameter_schema["type"], "object", "{}", d.name);
            for p in &d.path_params {
                assert!(d.parameter_schema["properties"].get(p).is_some(), "{} lacks {}", d.name, p);
            }
        }
    }

    #[test]
    fn test_shell_timeout_stays_below_tool_timeout() {
        let defaults = BuiltinSettings::from_config(&AppConfig::default());
        assert_eq!(defaults.shell_timeout, Duration::from_secs(60));

        let mut config = AppConfig::default();
        config.tools.tool_timeout_secs = 30;
        config.tools.shell.timeout_secs = 60;
        let capped = BuiltinSettings::from_config(&config);
        assert_eq!(capped.shell_timeout, Duration::from_secs(29));
    }

    #[test]
    fn test_side_effect_classes() {
        assert_eq!(Builtin::ReadFile.descriptor().side_effect, SideEffectClass::Read);
        assert_eq!(Builtin::ApplyDiff.descriptor().side_effect, SideEffectClass::Write);
        assert_eq!(Builtin::ExecuteCommand.descriptor().side_effect, SideEffectClass::Execute);
        assert_eq!(Builtin::BrowseUrl.descriptor().side_effect, SideEffectClass::Network);
    }
}
