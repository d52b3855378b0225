//! 平台抽象层：把宿主能力（文件、工作区、通知、日志、剪贴板、进程、系统信息）表达为 trait
//!
//! 引擎核心只依赖这里的 trait 对象，不引用任何宿主运行时符号；具体实现通过 `PlatformCapabilities`
//! 在组合根（`core::builder`）注入。本层只做 I/O，不做沙箱校验（那是 `tools::sandbox` 的职责）。

pub mod fs;
pub mod host;
pub mod process;
pub mod workspace;

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fs::LocalFileSystem;
pub use host::{HeadlessNotifier, LocalSystemInfo, MemoryClipboard, TracingLogger};
pub use process::LocalProcessRunner;
pub use workspace::LocalWorkspace;

/// 平台能力调用的类型化错误；调用方按种类分支，不解析消息文本
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for PlatformError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => Self::NotFound(e.to_string()),
            ErrorKind::PermissionDenied => Self::PermissionDenied(e.to_string()),
            ErrorKind::TimedOut => Self::Timeout(e.to_string()),
            _ => Self::Unavailable(e.to_string()),
        }
    }
}

pub type PlatformResult<T> = Result<T, PlatformError>;

// ---------------------------------------------------------------------------
// 文件系统
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchEventKind {
    Created,
    Changed,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub path: PathBuf,
}

pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// 文件系统能力：路径由调用方给出，本层不校验是否越界
#[async_trait]
pub trait FileSystem: Send + Sync {
    async fn read(&self, path: &Path) -> PlatformResult<String>;

    /// 写入文件；父目录不存在时创建
    async fn write(&self, path: &Path, content: &str) -> PlatformResult<()>;

    async fn exists(&self, path: &Path) -> bool;

    /// 列出目录直接子项（按名称排序）
    async fn list(&self, path: &Path) -> PlatformResult<Vec<DirEntry>>;

    async fn stat(&self, path: &Path) -> PlatformResult<FileStat>;

    async fn delete(&self, path: &Path) -> PlatformResult<()>;

    /// 监听路径（递归），返回 created / changed / deleted 事件流；丢弃流即停止监听
    fn watch(&self, path: &Path) -> PlatformResult<WatchStream>;
}

// ---------------------------------------------------------------------------
// 工作区
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigScope {
    Global,
    Project,
}

/// 工作区能力：根目录解析、绝对/相对路径互转、按作用域的配置读写
pub trait Workspace: Send + Sync {
    fn roots(&self) -> Vec<PathBuf>;

    fn primary_root(&self) -> Option<PathBuf> {
        self.roots().into_iter().next()
    }

    /// 绝对路径转为相对某个根的路径；不在任何根下时返回 None
    fn to_relative(&self, path: &Path) -> Option<String>;

    fn to_absolute(&self, relative: &str) -> Option<PathBuf>;

    /// 读取配置：Project 作用域优先于 Global
    fn get_setting(&self, key: &str) -> Option<serde_json::Value>;

    fn set_setting(&self, key: &str, value: serde_json::Value, scope: ConfigScope) -> PlatformResult<()>;
}

// ---------------------------------------------------------------------------
// 通知
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// 通知能力：向人展示消息，并可在 N 个选项中收集一个选择
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(&self, level: NotificationLevel, message: &str);

    /// 返回被选中的选项下标；超时或无人选择时返回 None，绝不无限阻塞
    async fn ask(&self, message: &str, options: &[String], timeout: Duration) -> Option<usize>;
}

// ---------------------------------------------------------------------------
// 日志
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// 分级日志接收器；实现不得 panic
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    /// 创建带组件前缀的子日志器
    fn child(&self, prefix: &str) -> Arc<dyn Logger>;

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

// ---------------------------------------------------------------------------
// 剪贴板
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn read_text(&self) -> PlatformResult<String>;

    async fn write_text(&self, text: &str) -> PlatformResult<()>;
}

// ---------------------------------------------------------------------------
// 进程执行
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    /// 交给 shell 执行的完整命令行
    pub command: String,
    pub cwd: PathBuf,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// 被信号终止时为 None
    pub exit_code: Option<i32>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// 进程执行能力；超时时子进程被杀死并返回 `PlatformError::Timeout`
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, request: ProcessRequest) -> PlatformResult<ProcessOutput>;
}

// ---------------------------------------------------------------------------
// 系统信息
// ---------------------------------------------------------------------------

/// 宿主只读快照，用于诊断与提示词定制
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub host_name: String,
    pub host_version: String,
    pub platform: String,
    pub locale: String,
}

pub trait SystemInfo: Send + Sync {
    fn snapshot(&self) -> SystemSnapshot;
}

// ---------------------------------------------------------------------------
// 能力集合
// ---------------------------------------------------------------------------

/// 组合根注入的平台能力集合；克隆只复制 Arc
#[derive(Clone)]
pub struct PlatformCapabilities {
    pub fs: Arc<dyn FileSystem>,
    pub workspace: Arc<dyn Workspace>,
    pub notifier: Arc<dyn Notifier>,
    pub logger: Arc<dyn Logger>,
    pub clipboard: Arc<dyn Clipboard>,
    pub process: Arc<dyn ProcessRunner>,
    pub system: Arc<dyn SystemInfo>,
}

impl PlatformCapabilities {
    /// 独立服务器形态下的本地实现：真实文件系统与进程，tracing 日志，无人值守通知
    pub fn local(workspace_root: impl AsRef<Path>) -> Self {
        Self {
            fs: Arc::new(LocalFileSystem::new()),
            workspace: Arc::new(LocalWorkspace::new(vec![workspace_root.as_ref().to_path_buf()])),
            notifier: Arc::new(HeadlessNotifier::default()),
            logger: Arc::new(TracingLogger::new("bee")),
            clipboard: Arc::new(MemoryClipboard::default()),
            process: Arc::new(LocalProcessRunner),
            system: Arc::new(LocalSystemInfo::new(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_process_runner(mut self, process: Arc<dyn ProcessRunner>) -> Self {
        self.process = process;
        self
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_typed_kind() {
        let e: PlatformError = std::io::Error::new(std::io::ErrorKind::NotFound, "x").into();
        assert!(matches!(e, PlatformError::NotFound(_)));
        let e: PlatformError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "x").into();
        assert!(matches!(e, PlatformError::PermissionDenied(_)));
        let e: PlatformError = std::io::Error::new(std::io::ErrorKind::TimedOut, "x").into();
        assert!(matches!(e, PlatformError::Timeout(_)));
        let e: PlatformError = std::io::Error::new(std::io::ErrorKind::Other, "x").into();
        assert!(matches!(e, PlatformError::Unavailable(_)));
    }
}
