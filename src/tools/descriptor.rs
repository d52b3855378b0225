//! 工具描述与统一结果
//!
//! ToolDescriptor 是注册表中的数据记录（名称、参数 schema、副作用类别、哪些参数是路径）；
//! ToolOutcome 是回喂模型的统一结果 `{success, output | error_kind + message}`。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::platform::PlatformError;

/// 副作用类别：决定执行前是否需要人工审批
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectClass {
    Read,
    Write,
    Execute,
    Network,
}

impl SideEffectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Execute => "execute",
            Self::Network => "network",
        }
    }

    pub fn mutates(&self) -> bool {
        !matches!(self, Self::Read)
    }
}

impl fmt::Display for SideEffectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameter_schema: serde_json::Value,
    pub side_effect: SideEffectClass,
    /// 需要做工作区包含校验的参数名
    #[serde(default)]
    pub path_params: Vec<String>,
}

/// 工具失败种类；任务循环按种类分支，不解析消息文本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Validation,
    SandboxViolation,
    NotFound,
    PermissionDenied,
    Timeout,
    Unavailable,
    /// 命令以非零码退出
    CommandFailed,
    /// 用户拒绝了审批
    Declined,
}

impl ToolErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation_error",
            Self::SandboxViolation => "sandbox_violation",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::CommandFailed => "command_failed",
            Self::Declined => "declined",
        }
    }

    /// 原样重试也可能成功（或模型可以据此自我修正）的失败
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::SandboxViolation | Self::PermissionDenied)
    }
}

impl fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 工具内部错误（handler 返回），由注册表转成 ToolOutcome
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ToolError {
    pub kind: ToolErrorKind,
    pub message: String,
}

impl ToolError {
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::Validation, message)
    }

    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::SandboxViolation, message)
    }
}

impl From<PlatformError> for ToolError {
    fn from(e: PlatformError) -> Self {
        let kind = match &e {
            PlatformError::NotFound(_) => ToolErrorKind::NotFound,
            PlatformError::PermissionDenied(_) => ToolErrorKind::PermissionDenied,
            PlatformError::Timeout(_) => ToolErrorKind::Timeout,
            PlatformError::Unavailable(_) => ToolErrorKind::Unavailable,
        };
        Self::new(kind, e.to_string())
    }
}

/// 回喂模型的工具结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ToolOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: Some(output.into()),
            error_kind: None,
            message: None,
        }
    }

    pub fn fail(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error_kind: Some(kind),
            message: Some(message.into()),
        }
    }

    pub fn declined(tool: &str) -> Self {
        Self::fail(
            ToolErrorKind::Declined,
            format!("The user declined to run '{tool}'. Choose another approach or ask for guidance."),
        )
    }

    pub fn is_kind(&self, kind: ToolErrorKind) -> bool {
        self.error_kind == Some(kind)
    }
}

impl From<ToolError> for ToolOutcome {
    fn from(e: ToolError) -> Self {
        Self::fail(e.kind, e.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_wire_shape() {
        let ok = serde_json::to_value(ToolOutcome::ok("done")).unwrap();
        assert_eq!(ok, serde_json::json!({"success": true, "output": "done"}));

        let fail = serde_json::to_value(ToolOutcome::fail(ToolErrorKind::SandboxViolation, "escape")).unwrap();
        assert_eq!(
            fail,
            serde_json::json!({"success": false, "error_kind": "sandbox_violation", "message": "escape"})
        );
    }

    #[test]
    fn test_platform_errors_map_to_kinds() {
        let e: ToolError = PlatformError::NotFound("a.txt".into()).into();
        assert_eq!(e.kind, ToolErrorKind::NotFound);
        let e: ToolError = PlatformError::Timeout("slow".into()).into();
        assert_eq!(e.kind, ToolErrorKind::Timeout);
    }
}
