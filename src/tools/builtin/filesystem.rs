//! 文件工具：read_file / write_file / list_files / delete_file
//!
//! 路径已由注册表在沙箱中解析（`PreparedCall::path`），这里只经平台文件系统做 I/O。

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use super::{parse_params, DeleteFileParams, ListFilesParams, ReadFileParams, WriteFileParams};
use crate::tools::{PreparedCall, ToolContext, ToolError, ToolErrorKind};

/// 递归列目录的条目上限
const MAX_LIST_ENTRIES: usize = 1000;
/// 单行最大字符数
const MAX_LINE_CHARS: usize = 2000;

pub(super) fn resolved_or_root(call: &PreparedCall, ctx: &ToolContext, name: &str) -> PathBuf {
    call.path(name)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| ctx.sandbox.root().to_path_buf())
}

fn required_path<'a>(call: &'a PreparedCall, name: &str) -> Result<&'a Path, ToolError> {
    call.path(name)
        .ok_or_else(|| ToolError::validation(format!("Missing path parameter '{name}'")))
}

pub(super) async fn read_file(call: &PreparedCall, ctx: &ToolContext) -> Result<String, ToolError> {
    let params: ReadFileParams = parse_params(call)?;
    let path = required_path(call, "path")?;
    tracing::info!(path = %params.path, "read_file tool execute");
    let content = ctx.platform.fs.read(path).await?;

    if params.offset.is_none() && params.limit.is_none() {
        return Ok(content);
    }
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();
    let offset = params.offset.unwrap_or(0);
    if offset >= total {
        return Ok(format!(
            "File '{}' has {} lines. Requested offset {} is beyond end.",
            params.path, total, offset
        ));
    }
    let end = params.limit.map(|l| (offset + l).min(total)).unwrap_or(total);
    let mut out = format!("File: {} (lines {}-{} of {})\n", params.path, offset + 1, end, total);
    for (i, line) in lines[offset..end].iter().enumerate() {
        let line: String = line.chars().take(MAX_LINE_CHARS).collect();
        out.push_str(&format!("{:4}: {}\n", offset + i + 1, line));
    }
    Ok(out)
}

pub(super) async fn write_file(call: &PreparedCall, ctx: &ToolContext) -> Result<String, ToolError> {
    let params: WriteFileParams = parse_params(call)?;
    let path = required_path(call, "path")?;
    tracing::info!(path = %params.path, bytes = params.content.len(), "write_file tool execute");
    if ctx.platform.fs.stat(path).await.map(|s| s.is_dir).unwrap_or(false) {
        return Err(ToolError::validation(format!("'{}' is a directory", params.path)));
    }
    ctx.platform.fs.write(path, &params.content).await?;
    Ok(format!("Wrote {} bytes to {}", params.content.len(), ctx.sandbox.relative(path)))
}

pub(super) async fn delete_file(call: &PreparedCall, ctx: &ToolContext) -> Result<String, ToolError> {
    let params: DeleteFileParams = parse_params(call)?;
    let path = required_path(call, "path")?;
    if path == ctx.sandbox.root() {
        return Err(ToolError::sandbox("Refusing to delete the workspace root"));
    }
    tracing::info!(path = %params.path, "delete_file tool execute");
    ctx.platform.fs.delete(path).await?;
    Ok(format!("Deleted {}", ctx.sandbox.relative(path)))
}

/// 列出 base 下的文件（跳过隐藏项），返回 (相对路径, 是否目录)
///
/// 每个条目都重新经过沙箱解析，经符号链接指向根外的条目被跳过；符号链接目录不递归。
pub(super) async fn walk(
    ctx: &ToolContext,
    base: &Path,
    recursive: bool,
    limit: usize,
) -> Result<Vec<(PathBuf, bool)>, ToolError> {
    let mut out = Vec::new();
    let mut queue = VecDeque::from([base.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        for entry in ctx.platform.fs.list(&dir).await? {
            if entry.name.starts_with('.') {
                continue;
            }
            let full = dir.join(&entry.name);
            if let Err(e) = ctx.sandbox.resolve(&full.to_string_lossy()) {
                tracing::warn!(
                    target: "bee_engine::audit",
                    path = %full.display(),
                    error = %e.message,
                    "walk skipped entry outside workspace"
                );
                continue;
            }
            if entry.is_dir && recursive {
                queue.push_back(full.clone());
            }
            out.push((full, entry.is_dir));
            if out.len() >= limit {
                return Ok(out);
            }
        }
    }
    Ok(out)
}

pub(super) async fn list_files(call: &PreparedCall, ctx: &ToolContext) -> Result<String, ToolError> {
    let params: ListFilesParams = parse_params(call)?;
    let base = resolved_or_root(call, ctx, "path");
    let recursive = params.recursive.unwrap_or(false);
    let pattern = params
        .pattern
        .as_deref()
        .map(glob::Pattern::new)
        .transpose()
        .map_err(|e| ToolError::validation(format!("Invalid glob pattern: {e}")))?;
    tracing::info!(path = %base.display(), recursive, "list_files tool execute");

    let stat = ctx.platform.fs.stat(&base).await?;
    if !stat.is_dir {
        return Err(ToolError::new(
            ToolErrorKind::Validation,
            format!("'{}' is not a directory", ctx.sandbox.relative(&base)),
        ));
    }

    let entries = walk(ctx, &base, recursive, MAX_LIST_ENTRIES).await?;
    let truncated = entries.len() >= MAX_LIST_ENTRIES;
    let mut lines: Vec<String> = entries
        .into_iter()
        .filter(|(path, is_dir)| match &pattern {
            Some(p) => {
                !is_dir
                    && (p.matches(&ctx.sandbox.relative(path))
                        || path.file_name().map(|n| p.matches(&n.to_string_lossy())).unwrap_or(false))
            }
            None => true,
        })
        .map(|(path, is_dir)| {
            let rel = ctx.sandbox.relative(&path);
            if is_dir {
                format!("{rel}/")
            } else {
                rel
            }
        })
        .collect();
    lines.sort();
    if lines.is_empty() {
        return Ok("(empty)".to_string());
    }
    if truncated {
        lines.push(format!("...[listing truncated at {MAX_LIST_ENTRIES} entries]"));
    }
    Ok(lines.join("\n"))
}
