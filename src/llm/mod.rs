//! 模型层：结构化 ModelClient 契约、文本适配器与 Mock

pub mod mock;
pub mod text;
pub mod traits;

pub use mock::{MockLlmClient, ScriptedModel};
pub use text::{parse_model_output, TextModelAdapter};
pub use traits::{LlmClient, LlmError, Message, ModelClient, ModelRequest, ModelResponse, Role, ToolCallRequest};
