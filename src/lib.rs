//! Bee Engine - 与宿主无关的编码智能体任务编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误、任务状态迁移表、恢复策略、Engine 组合根
//! - **llm**: 模型协作方契约（结构化 / 纯文本适配）与测试替身
//! - **observability**: tracing 初始化
//! - **platform**: 宿主能力接口（文件、工作区、通知、日志、剪贴板、进程、系统信息）及本地实现
//! - **task**: Task、交互历史、生命周期事件、TaskManager 与执行循环
//! - **tools**: 工具描述、沙箱策略、内置工具与注册表

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod platform;
pub mod task;
pub mod tools;

pub use crate::core::{Engine, EngineBuilder, EngineError, FailureReason, TaskStatus};
pub use crate::platform::PlatformCapabilities;
pub use crate::task::{ApprovalDecision, Task, TaskConfig, TaskEvent, TaskId, TaskInput, TaskManager};
