//! 工具层：描述、沙箱策略、内置工具与注册表

pub mod builtin;
pub mod descriptor;
pub mod registry;
pub mod sandbox;

pub use builtin::{Builtin, BuiltinSettings};
pub use descriptor::{SideEffectClass, ToolDescriptor, ToolError, ToolErrorKind, ToolOutcome};
pub use registry::{CustomTool, PreparedCall, ToolContext, ToolHandler, ToolRegistry};
pub use sandbox::{ApprovalPolicy, CommandPolicy, DomainPolicy, PathSandbox};
