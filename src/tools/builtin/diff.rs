//! apply_diff：SEARCH/REPLACE 块编辑
//!
//! 格式：
//! ```text
//! <<<<<<< SEARCH
//! 原文
//! =======
//! 新文
//! >>>>>>> REPLACE
//! ```
//! 每个 SEARCH 必须恰好匹配一次；精确匹配失败时退回到「忽略行首尾空白」的逐行匹配（缩进容错）。

use super::{parse_params, ApplyDiffParams};
use crate::tools::{PreparedCall, ToolContext, ToolError};

const SEARCH_MARKER: &str = "<<<<<<< SEARCH";
const DIVIDER: &str = "=======";
const REPLACE_MARKER: &str = ">>>>>>> REPLACE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchReplaceBlock {
    pub search: String,
    pub replace: String,
}

enum ParseState {
    Outside,
    Search(Vec<String>),
    Replace(Vec<String>, Vec<String>),
}

pub fn parse_search_replace(diff: &str) -> Result<Vec<SearchReplaceBlock>, ToolError> {
    let mut blocks = Vec::new();
    let mut state = ParseState::Outside;
    for line in diff.lines() {
        let marker = line.trim_end();
        state = match state {
            ParseState::Outside if marker == SEARCH_MARKER => ParseState::Search(Vec::new()),
            ParseState::Outside => ParseState::Outside,
            ParseState::Search(search) if marker == DIVIDER => ParseState::Replace(search, Vec::new()),
            ParseState::Search(mut search) => {
                search.push(line.to_string());
                ParseState::Search(search)
            }
            ParseState::Replace(search, replace) if marker == REPLACE_MARKER => {
                blocks.push(SearchReplaceBlock {
                    search: search.join("\n"),
                    replace: replace.join("\n"),
                });
                ParseState::Outside
            }
            ParseState::Replace(search, mut replace) => {
                replace.push(line.to_string());
                ParseState::Replace(search, replace)
            }
        };
    }
    if !matches!(state, ParseState::Outside) {
        return Err(ToolError::validation("Unterminated SEARCH/REPLACE block"));
    }
    if blocks.is_empty() {
        return Err(ToolError::validation(format!(
            "No SEARCH/REPLACE blocks found; expected '{SEARCH_MARKER}' ... '{DIVIDER}' ... '{REPLACE_MARKER}'"
        )));
    }
    Ok(blocks)
}

/// 忽略行首尾空白的逐行匹配，返回所有匹配的起始行号
fn fuzzy_positions(lines: &[&str], search: &[&str]) -> Vec<usize> {
    if search.is_empty() || search.len() > lines.len() {
        return Vec::new();
    }
    (0..=lines.len() - search.len())
        .filter(|&start| {
            search
                .iter()
                .enumerate()
                .all(|(i, s)| lines[start + i].trim() == s.trim())
        })
        .collect()
}

pub fn apply_search_replace(content: &str, blocks: &[SearchReplaceBlock]) -> Result<String, ToolError> {
    let mut current = content.to_string();
    for (n, block) in blocks.iter().enumerate() {
        let n = n + 1;
        if block.search.trim().is_empty() {
            return Err(ToolError::validation(format!("SEARCH block {n} is empty")));
        }
        match current.matches(block.search.as_str()).count() {
            1 => {
                current = current.replacen(block.search.as_str(), &block.replace, 1);
                continue;
            }
            0 => {}
            k => {
                return Err(ToolError::validation(format!(
                    "SEARCH block {n} matches {k} times; add surrounding lines to make it unique"
                )))
            }
        }

        let lines: Vec<&str> = current.lines().collect();
        let search: Vec<&str> = block.search.lines().collect();
        let positions = fuzzy_positions(&lines, &search);
        match positions.as_slice() {
            [start] => {
                let mut out: Vec<&str> = Vec::with_capacity(lines.len());
                out.extend_from_slice(&lines[..*start]);
                out.extend(block.replace.lines());
                out.extend_from_slice(&lines[start + search.len()..]);
                let mut joined = out.join("\n");
                if current.ends_with('\n') {
                    joined.push('\n');
                }
                current = joined;
            }
            [] => {
                return Err(ToolError::validation(format!(
                    "SEARCH block {n} not found in file"
                )))
            }
            many => {
                return Err(ToolError::validation(format!(
                    "SEARCH block {n} matches {} times (ignoring whitespace); add surrounding lines",
                    many.len()
                )))
            }
        }
    }
    Ok(current)
}

pub(super) async fn apply_diff(call: &PreparedCall, ctx: &ToolContext) -> Result<String, ToolError> {
    let params: ApplyDiffParams = parse_params(call)?;
    let path = call
        .path("path")
        .ok_or_else(|| ToolError::validation("Missing path parameter 'path'"))?;
    let blocks = parse_search_replace(&params.diff)?;
    tracing::info!(path = %params.path, blocks = blocks.len(), "apply_diff tool execute");

    let original = ctx.platform.fs.read(path).await?;
    let updated = apply_search_replace(&original, &blocks)?;
    ctx.platform.fs.write(path, &updated).await?;
    Ok(format!(
        "Applied {} edit(s) to {}",
        blocks.len(),
        ctx.sandbox.relative(path)
    ))
}
