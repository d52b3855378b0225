//! 本地进程执行：sh -c / cmd /C，带超时；超时后子进程随 kill_on_drop 被杀死

use async_trait::async_trait;
use tokio::process::Command;

use super::{PlatformError, PlatformResult, ProcessOutput, ProcessRequest, ProcessRunner};

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalProcessRunner;

fn shell_command(command: &str) -> Command {
    if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = Command::new("sh");
        c.args(["-c", command]);
        c
    }
}

#[async_trait]
impl ProcessRunner for LocalProcessRunner {
    async fn run(&self, request: ProcessRequest) -> PlatformResult<ProcessOutput> {
        let mut cmd = shell_command(&request.command);
        cmd.current_dir(&request.cwd).kill_on_drop(true);

        tracing::debug!(command = %request.command, cwd = %request.cwd.display(), "spawn process");

        let output = match request.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output())
                .await
                .map_err(|_| {
                    PlatformError::Timeout(format!("command timed out after {}s", limit.as_secs()))
                })??,
            None => cmd.output().await?,
        };

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = LocalProcessRunner
            .run(ProcessRequest {
                command: "echo hi; echo oops 1>&2; exit 3".to_string(),
                cwd: dir.path().to_path_buf(),
                timeout: Some(Duration::from_secs(10)),
            })
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hi");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, Some(3));
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_run_timeout_is_typed() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalProcessRunner
            .run(ProcessRequest {
                command: "sleep 5".to_string(),
                cwd: dir.path().to_path_buf(),
                timeout: Some(Duration::from_millis(100)),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PlatformError::Timeout(_)));
    }
}
