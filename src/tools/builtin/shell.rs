//! execute_command：经平台进程能力执行单条命令
//!
//! 命令安全检查（元字符、危险子串、白名单）已在注册表流水线中完成；这里再检查一次，
//! 保证绕过 prepare 直接调用时也不会执行被拒绝的命令。

use std::time::Duration;

use super::filesystem::resolved_or_root;
use super::{parse_params, BuiltinSettings, ExecuteCommandParams};
use crate::platform::ProcessRequest;
use crate::tools::{PreparedCall, ToolContext, ToolError, ToolErrorKind};

pub(super) async fn execute_command(
    call: &PreparedCall,
    ctx: &ToolContext,
    settings: &BuiltinSettings,
) -> Result<String, ToolError> {
    let params: ExecuteCommandParams = parse_params(call)?;
    let command = params.command.trim();
    settings.command_policy.check(command)?;

    let cwd = resolved_or_root(call, ctx, "cwd");
    let timeout = params
        .timeout_secs
        .map(Duration::from_secs)
        .map(|t| t.min(settings.shell_timeout))
        .unwrap_or(settings.shell_timeout);

    tracing::info!(command = %command, cwd = %cwd.display(), "execute_command tool execute");

    let output = ctx
        .platform
        .process
        .run(ProcessRequest {
            command: command.to_string(),
            cwd,
            timeout: Some(timeout),
        })
        .await?;

    let stdout = output.stdout.trim_end();
    let stderr = output.stderr.trim_end();
    let mut report = String::new();
    if !stdout.is_empty() {
        report.push_str(stdout);
    }
    if !stderr.is_empty() {
        if !report.is_empty() {
            report.push('\n');
        }
        report.push_str("stderr: ");
        report.push_str(stderr);
    }

    if output.success() {
        Ok(if report.is_empty() {
            "(no output)".to_string()
        } else {
            report
        })
    } else {
        let code = output
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        Err(ToolError::new(
            ToolErrorKind::CommandFailed,
            format!("Exit {code}\n{report}"),
        ))
    }
}
