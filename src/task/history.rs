//! 交互历史：只追加的轮次序列
//!
//! 每一轮要么是模型回复（文本 + 零个或多个工具调用请求），要么是一次工具调用的结果记录。
//! 追加后不可修改；不提供删除与重排。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::llm::{ModelResponse, ToolCallRequest};
use crate::tools::ToolOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTurn {
    pub text: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRequest>,
    pub at: DateTime<Utc>,
}

impl From<ModelResponse> for ModelTurn {
    fn from(r: ModelResponse) -> Self {
        Self {
            text: r.text,
            tool_calls: r.tool_calls,
            at: Utc::now(),
        }
    }
}

/// 一次工具调用及其结果（仅存在于所属任务的历史中）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub parameters: serde_json::Value,
    pub requested_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub outcome: ToolOutcome,
}

impl ToolInvocation {
    pub fn resolved(request: &ToolCallRequest, requested_at: DateTime<Utc>, outcome: ToolOutcome) -> Self {
        Self {
            tool_name: request.tool_name.clone(),
            parameters: request.parameters.clone(),
            requested_at,
            completed_at: Utc::now(),
            outcome,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    Model(ModelTurn),
    ToolResult(ToolInvocation),
}

impl Turn {
    pub fn as_tool_result(&self) -> Option<&ToolInvocation> {
        match self {
            Turn::ToolResult(inv) => Some(inv),
            Turn::Model(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExchangeHistory {
    turns: Vec<Turn>,
}

impl ExchangeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn as_slice(&self) -> &[Turn] {
        &self.turns
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// 最近一次模型回复中尚未得到结果的第一个工具调用
    pub fn pending_tool_call(&self) -> Option<&ToolCallRequest> {
        let last_model = self.turns.iter().rposition(|t| matches!(t, Turn::Model(_)))?;
        let resolved = self.turns.len() - last_model - 1;
        match &self.turns[last_model] {
            Turn::Model(m) => m.tool_calls.get(resolved),
            Turn::ToolResult(_) => None,
        }
    }

    /// 同一工具、同一参数以指定种类失败的次数
    pub fn failure_count(&self, request: &ToolCallRequest, kind: crate::tools::ToolErrorKind) -> u32 {
        self.turns
            .iter()
            .filter_map(Turn::as_tool_result)
            .filter(|inv| {
                inv.tool_name == request.tool_name
                    && inv.parameters == request.parameters
                    && inv.outcome.is_kind(kind)
            })
            .count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolErrorKind;

    #[test]
    fn test_failure_count_matches_tool_and_params() {
        let req = ToolCallRequest::new("write_file", serde_json::json!({"path": "../x"}));
        let other = ToolCallRequest::new("write_file", serde_json::json!({"path": "y"}));
        let mut h = ExchangeHistory::new();
        let denied = ToolOutcome::fail(ToolErrorKind::SandboxViolation, "escapes");
        h.push(Turn::ToolResult(ToolInvocation::resolved(&req, Utc::now(), denied.clone())));
        h.push(Turn::ToolResult(ToolInvocation::resolved(&other, Utc::now(), denied)));
        h.push(Turn::Model(ModelResponse::text("hi").into()));
        assert_eq!(h.len(), 3);
        assert_eq!(h.failure_count(&req, ToolErrorKind::SandboxViolation), 1);
        assert_eq!(h.failure_count(&req, ToolErrorKind::NotFound), 0);
    }

    #[test]
    fn test_pending_tool_call() {
        let mut h = ExchangeHistory::new();
        assert!(h.pending_tool_call().is_none());
        let resp = ModelResponse {
            text: String::new(),
            tool_calls: vec![
                ToolCallRequest::new("read_file", serde_json::json!({"path": "a"})),
                ToolCallRequest::new("execute_command", serde_json::json!({"command": "ls"})),
            ],
        };
        h.push(Turn::Model(resp.clone().into()));
        assert_eq!(h.pending_tool_call().unwrap().tool_name, "read_file");
        h.push(Turn::ToolResult(ToolInvocation::resolved(
            &resp.tool_calls[0],
            Utc::now(),
            ToolOutcome::ok("x"),
        )));
        assert_eq!(h.pending_tool_call().unwrap().tool_name, "execute_command");
    }

    #[test]
    fn test_turn_serialises_with_type_tag() {
        let turn = Turn::Model(ModelResponse::text("done").into());
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["type"], "model");
        assert_eq!(json["text"], "done");
    }
}
