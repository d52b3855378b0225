//! 文本模型适配器：把只会输出文本的 LlmClient 包装成结构化 ModelClient
//!
//! system prompt 中注入工具目录（名称 / 描述 / 参数 schema）与环境信息；回复若含 JSON
//! `{"tool": "...", "args": {...}}`（可包在 ```json 代码块中）则解析为工具调用，否则为最终答案。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::{LlmClient, LlmError, Message, ModelClient, ModelRequest, ModelResponse, ToolCallRequest};
use crate::task::Turn;

/// 文本中的工具调用格式
#[derive(Debug, Deserialize)]
struct TextToolCall {
    tool: String,
    #[serde(default)]
    args: serde_json::Value,
}

/// 解析 LLM 输出：若含有效 JSON 且 tool 非空则为工具调用，否则为最终答案
pub fn parse_model_output(output: &str) -> Result<ModelResponse, LlmError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim())
    } else if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            &trimmed[start..=end]
        } else {
            return Ok(ModelResponse::text(trimmed));
        }
    } else {
        return Ok(ModelResponse::text(trimmed));
    };

    // 只有看起来像工具调用的 JSON 才需要严格解析
    if !json_str.contains("\"tool\"") {
        return Ok(ModelResponse::text(trimmed));
    }

    let parsed: TextToolCall = serde_json::from_str(json_str)
        .map_err(|e| LlmError::InvalidResponse(format!("{}: {}", e, json_str)))?;

    if parsed.tool.is_empty() {
        return Ok(ModelResponse::text(trimmed));
    }
    let args = if parsed.args.is_null() {
        serde_json::json!({})
    } else {
        parsed.args
    };
    Ok(ModelResponse {
        text: trimmed.to_string(),
        tool_calls: vec![ToolCallRequest::new(parsed.tool, args)],
    })
}

pub struct TextModelAdapter {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl TextModelAdapter {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    fn system_message(&self, request: &ModelRequest) -> String {
        let tools: Vec<serde_json::Value> = request
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "side_effect": t.side_effect,
                    "parameters": t.parameter_schema,
                })
            })
            .collect();
        let tools = serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string());
        let env = &request.environment;
        format!(
            "{}\n\n## Environment\nHost: {} {}\nPlatform: {}\nLocale: {}\nWorkspace root: {}\n\n\
             ## Tools\nTo call a tool, output only one JSON object: {{\"tool\": \"name\", \"args\": {{...}}}}.\n\
             Any other output is treated as your final answer.\n```json\n{}\n```",
            self.system_prompt,
            env.host_name,
            env.host_version,
            env.platform,
            env.locale,
            request.workspace_root.display(),
            tools
        )
    }

    /// 交互历史 → 对话消息
    pub fn to_messages(&self, request: &ModelRequest) -> Vec<Message> {
        let mut messages = vec![
            Message::system(self.system_message(request)),
            Message::user(request.input.text.clone()),
        ];
        for turn in &request.history {
            match turn {
                Turn::Model(m) => {
                    let content = match m.tool_calls.first() {
                        Some(call) if m.text.is_empty() => serde_json::json!({
                            "tool": call.tool_name,
                            "args": call.parameters,
                        })
                        .to_string(),
                        _ => m.text.clone(),
                    };
                    messages.push(Message::assistant(content));
                }
                Turn::ToolResult(inv) => {
                    let body = if inv.outcome.success {
                        inv.outcome.output.clone().unwrap_or_default()
                    } else {
                        format!(
                            "Error ({}): {}",
                            inv.outcome.error_kind.map(|k| k.as_str()).unwrap_or("unknown"),
                            inv.outcome.message.clone().unwrap_or_default()
                        )
                    };
                    messages.push(Message::user(format!("Observation from {}: {}", inv.tool_name, body)));
                }
            }
        }
        messages
    }
}

#[async_trait]
impl ModelClient for TextModelAdapter {
    async fn respond(&self, request: &ModelRequest) -> Result<ModelResponse, LlmError> {
        let messages = self.to_messages(request);
        let output = self.llm.complete(&messages).await?;
        parse_model_output(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_final_answer() {
        let r = parse_model_output("All files listed, done.").unwrap();
        assert!(r.is_final());
        assert_eq!(r.text, "All files listed, done.");
    }

    #[test]
    fn test_fenced_tool_call() {
        let r = parse_model_output(
            "I'll read it.\n```json\n{\"tool\": \"read_file\", \"args\": {\"path\": \"a.txt\"}}\n```",
        )
        .unwrap();
        assert_eq!(r.tool_calls.len(), 1);
        assert_eq!(r.tool_calls[0].tool_name, "read_file");
        assert_eq!(r.tool_calls[0].parameters["path"], "a.txt");
    }

    #[test]
    fn test_bare_tool_call_without_args() {
        let r = parse_model_output(r#"{"tool": "list_files"}"#).unwrap();
        assert_eq!(r.tool_calls[0].tool_name, "list_files");
        assert!(r.tool_calls[0].parameters.is_object());
    }

    #[test]
    fn test_malformed_tool_json_is_invalid_response() {
        let err = parse_model_output(r#"{"tool": "read_file", "args": }"#).unwrap_err();
        assert!(matches!(err, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn test_non_tool_json_is_text() {
        let r = parse_model_output(r#"Result: {"count": 3}"#).unwrap();
        assert!(r.is_final());
    }
}
