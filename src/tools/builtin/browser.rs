//! browse_url：抓取白名单域名的网页并提取可读文本
//!
//! GET 请求带超时与 User-Agent；HTML 响应用 html2text 转为文本，超过上限截断并追加 ...[truncated]。

use std::time::Duration;

use html2text::from_read;
use reqwest::redirect::Policy;
use reqwest::Client;

use super::{parse_params, BrowseUrlParams, BuiltinSettings};
use crate::tools::{DomainPolicy, PreparedCall, ToolError, ToolErrorKind};

const USER_AGENT: &str = concat!("bee-engine/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 10;

/// 只跟随指向白名单域名的重定向；其余重定向停在 3xx 响应上
fn redirect_policy(domains: DomainPolicy) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if domains.check(attempt.url().as_str()).is_ok() {
            attempt.follow()
        } else {
            attempt.stop()
        }
    })
}

pub(super) fn build_client(timeout: Duration, domains: DomainPolicy) -> Client {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .redirect(redirect_policy(domains))
        .build()
        .unwrap_or_default()
}

/// 判断内容是否像 HTML（需提取可读文本）
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.starts_with("<html")
        || s.starts_with("<HTML")
        || (s.len() > 20 && s.contains('<') && (s.contains("</") || s.contains("<head")))
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn html_to_text(html: &str) -> String {
    match from_read(html.as_bytes(), 120) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(html),
    }
}

fn request_error(e: reqwest::Error) -> ToolError {
    let kind = if e.is_timeout() {
        ToolErrorKind::Timeout
    } else {
        ToolErrorKind::Unavailable
    };
    ToolError::new(kind, format!("Request failed: {e}"))
}

pub(super) async fn browse_url(call: &PreparedCall, settings: &BuiltinSettings) -> Result<String, ToolError> {
    let params: BrowseUrlParams = parse_params(call)?;
    let url = settings.domain_policy.check(&params.url)?;
    tracing::info!(url = %url, "browse_url tool fetch");

    let resp = settings.http().get(url).send().await.map_err(request_error)?;
    // 最终地址同样必须在白名单内
    settings.domain_policy.check(resp.url().as_str())?;
    let status = resp.status();
    if status.is_redirection() {
        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("<none>");
        return Err(ToolError::sandbox(format!("Redirect not permitted: {location}")));
    }
    if !status.is_success() {
        let kind = match status.as_u16() {
            404 | 410 => ToolErrorKind::NotFound,
            401 | 403 => ToolErrorKind::PermissionDenied,
            _ => ToolErrorKind::Unavailable,
        };
        return Err(ToolError::new(kind, format!("HTTP {status}")));
    }
    let body = resp.text().await.map_err(request_error)?;
    let body = body.trim_start_matches('\u{FEFF}');
    let text = if looks_like_html(body) {
        html_to_text(body)
    } else {
        body.to_string()
    };

    let max = params.max_chars.unwrap_or(settings.browser_max_chars).min(settings.browser_max_chars);
    if text.chars().count() > max {
        Ok(text.chars().take(max).collect::<String>() + "\n...[truncated]")
    } else {
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_detection_and_strip() {
        assert!(looks_like_html("<!DOCTYPE html><html></html>"));
        assert!(!looks_like_html("plain text body"));
        assert_eq!(strip_html_tags("<p>Hello <b>world</b></p>"), "Hello world");
    }
}
