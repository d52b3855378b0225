//! 模型协作方抽象
//!
//! `ModelClient` 是任务循环唯一依赖的模型接口：输入完整交互历史与工具目录，返回文本 + 结构化工具调用。
//! 只会输出文本的后端实现 `LlmClient`，再由 `TextModelAdapter` 解析出工具调用。

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::SystemSnapshot;
use crate::task::{TaskId, TaskInput, Turn};
use crate::tools::ToolDescriptor;

/// 模型后端错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("Provider unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid model response: {0}")]
    InvalidResponse(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

impl LlmError {
    /// 网络类、超时、限流可以重试
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Timeout | Self::RateLimited(_))
    }
}

/// 模型请求执行的工具调用 `{toolName, parameters}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRequest {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(tool_name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
        }
    }
}

/// 模型一轮回复：没有工具调用即视为最终答案
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(tool_name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![ToolCallRequest::new(tool_name, parameters)],
        }
    }

    pub fn is_final(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

/// 一次模型请求的全部上下文
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub task_id: TaskId,
    pub input: TaskInput,
    pub history: Vec<Turn>,
    pub tools: Vec<ToolDescriptor>,
    pub workspace_root: PathBuf,
    pub environment: SystemSnapshot,
}

/// 结构化模型客户端
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn respond(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError>;
}

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
    System,
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 纯文本 LLM 客户端（OpenAI 兼容等后端由宿主实现）
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;
}
