//! 独立运行时的宿主能力：tracing 日志、无人值守通知、内存剪贴板、系统信息

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::System;
use tokio::sync::RwLock;

use super::{
    Clipboard, LogLevel, Logger, NotificationLevel, Notifier, PlatformResult, SystemInfo,
    SystemSnapshot,
};

/// 转发到 tracing 的日志器，component 字段即前缀
#[derive(Debug, Clone)]
pub struct TracingLogger {
    component: String,
}

impl TracingLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let component = self.component.as_str();
        match level {
            LogLevel::Debug => tracing::debug!(component, "{}", message),
            LogLevel::Info => tracing::info!(component, "{}", message),
            LogLevel::Warn => tracing::warn!(component, "{}", message),
            LogLevel::Error => tracing::error!(component, "{}", message),
        }
    }

    fn child(&self, prefix: &str) -> Arc<dyn Logger> {
        Arc::new(Self::new(format!("{}.{}", self.component, prefix)))
    }
}

/// 无人值守通知：消息写日志；ask 按预置答案依次作答，没有预置答案时立即返回 None
#[derive(Debug, Default)]
pub struct HeadlessNotifier {
    answers: Mutex<VecDeque<Option<usize>>>,
}

impl HeadlessNotifier {
    pub fn with_answers(answers: Vec<Option<usize>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
        }
    }
}

#[async_trait]
impl Notifier for HeadlessNotifier {
    async fn show(&self, level: NotificationLevel, message: &str) {
        match level {
            NotificationLevel::Info => tracing::info!(notification = %message),
            NotificationLevel::Warning => tracing::warn!(notification = %message),
            NotificationLevel::Error => tracing::error!(notification = %message),
        }
    }

    async fn ask(&self, message: &str, options: &[String], _timeout: Duration) -> Option<usize> {
        let answer = self
            .answers
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .flatten();
        tracing::info!(question = %message, ?options, ?answer, "headless notifier ask");
        answer.filter(|i| *i < options.len())
    }
}

/// 进程内剪贴板（服务器形态没有系统剪贴板）
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    text: RwLock<String>,
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn read_text(&self) -> PlatformResult<String> {
        Ok(self.text.read().await.clone())
    }

    async fn write_text(&self, text: &str) -> PlatformResult<()> {
        *self.text.write().await = text.to_string();
        Ok(())
    }
}

/// 系统信息：宿主名与版本由组合根给出，平台与区域从运行环境读取
#[derive(Debug, Clone)]
pub struct LocalSystemInfo {
    host_name: String,
    host_version: String,
}

impl LocalSystemInfo {
    pub fn new(host_name: impl Into<String>, host_version: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            host_version: host_version.into(),
        }
    }
}

fn detect_locale() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|k| std::env::var(k).ok())
        .find(|v| !v.is_empty() && v != "C" && v != "POSIX")
        .map(|v| v.split('.').next().unwrap_or(&v).replace('_', "-"))
        .unwrap_or_else(|| "en-US".to_string())
}

impl SystemInfo for LocalSystemInfo {
    fn snapshot(&self) -> SystemSnapshot {
        let os = System::long_os_version().unwrap_or_else(|| std::env::consts::OS.to_string());
        SystemSnapshot {
            host_name: self.host_name.clone(),
            host_version: self.host_version.clone(),
            platform: format!("{} ({})", os, std::env::consts::ARCH),
            locale: detect_locale(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_headless_notifier_answers_then_none() {
        let n = HeadlessNotifier::with_answers(vec![Some(1), Some(7)]);
        let opts = vec!["Approve".to_string(), "Reject".to_string()];
        assert_eq!(n.ask("q", &opts, Duration::from_secs(1)).await, Some(1));
        // 越界答案视为未选择
        assert_eq!(n.ask("q", &opts, Duration::from_secs(1)).await, None);
        assert_eq!(n.ask("q", &opts, Duration::from_secs(1)).await, None);
    }

    #[tokio::test]
    async fn test_memory_clipboard() {
        let c = MemoryClipboard::default();
        assert_eq!(c.read_text().await.unwrap(), "");
        c.write_text("copied").await.unwrap();
        assert_eq!(c.read_text().await.unwrap(), "copied");
    }

    #[test]
    fn test_child_logger_prefix() {
        let root = TracingLogger::new("bee");
        let child = root.child("task-manager");
        child.info("never panics");
        child.child("runner").error("still fine");
    }

    #[test]
    fn test_system_snapshot() {
        let snap = LocalSystemInfo::new("bee-engine", "0.1.0").snapshot();
        assert_eq!(snap.host_name, "bee-engine");
        assert_eq!(snap.host_version, "0.1.0");
        assert!(snap.platform.contains(std::env::consts::ARCH));
        assert!(!snap.locale.is_empty());
    }
}
