//! search_files：在工作区内按正则搜索文本文件

use regex::Regex;

use super::filesystem::{resolved_or_root, walk};
use super::{parse_params, SearchFilesParams};
use crate::tools::{PreparedCall, ToolContext, ToolError};

const DEFAULT_MAX_RESULTS: usize = 100;
const MAX_RESULTS_CAP: usize = 500;
/// 超过此大小的文件不搜索
const MAX_FILE_BYTES: u64 = 1024 * 1024;
const MAX_FILES: usize = 5000;
const MAX_MATCH_LINE_CHARS: usize = 300;

pub(super) async fn search_files(call: &PreparedCall, ctx: &ToolContext) -> Result<String, ToolError> {
    let params: SearchFilesParams = parse_params(call)?;
    let re = Regex::new(&params.pattern)
        .map_err(|e| ToolError::validation(format!("Invalid regex '{}': {}", params.pattern, e)))?;
    let file_filter = params
        .file_pattern
        .as_deref()
        .map(glob::Pattern::new)
        .transpose()
        .map_err(|e| ToolError::validation(format!("Invalid glob pattern: {e}")))?;
    let max_results = params.max_results.unwrap_or(DEFAULT_MAX_RESULTS).clamp(1, MAX_RESULTS_CAP);
    let base = resolved_or_root(call, ctx, "path");
    tracing::info!(pattern = %params.pattern, path = %base.display(), "search_files tool execute");

    let files: Vec<_> = if ctx.platform.fs.stat(&base).await?.is_dir {
        walk(ctx, &base, true, MAX_FILES)
            .await?
            .into_iter()
            .filter(|(_, is_dir)| !is_dir)
            .map(|(p, _)| p)
            .collect()
    } else {
        vec![base.clone()]
    };

    let mut matches = Vec::new();
    'files: for path in files {
        if let Some(filter) = &file_filter {
            let name = path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
            if !filter.matches(&name) && !filter.matches(&ctx.sandbox.relative(&path)) {
                continue;
            }
        }
        match ctx.platform.fs.stat(&path).await {
            Ok(s) if s.size <= MAX_FILE_BYTES => {}
            _ => continue,
        }
        // 非 UTF-8（二进制）文件读取失败，直接跳过
        let Ok(content) = ctx.platform.fs.read(&path).await else {
            continue;
        };
        let rel = ctx.sandbox.relative(&path);
        for (i, line) in content.lines().enumerate() {
            if re.is_match(line) {
                let line: String = line.trim().chars().take(MAX_MATCH_LINE_CHARS).collect();
                matches.push(format!("{}:{}: {}", rel, i + 1, line));
                if matches.len() >= max_results {
                    break 'files;
                }
            }
        }
    }

    if matches.is_empty() {
        return Ok(format!("No matches found for '{}'", params.pattern));
    }
    let capped = matches.len() >= max_results;
    let mut out = matches.join("\n");
    if capped {
        out.push_str(&format!("\n...[results capped at {max_results}]"));
    }
    Ok(out)
}
