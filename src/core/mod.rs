//! 核心层：错误与失败原因、任务状态迁移表、恢复策略、组合根

pub mod builder;
pub mod error;
pub mod recovery;
pub mod state;

pub use builder::{create_engine_builder, Engine, EngineBuilder};
pub use error::{EngineError, FailureReason};
pub use recovery::{RecoveryAction, RecoveryEngine};
pub use state::TaskStatus;
