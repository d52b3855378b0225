//! 沙箱策略：路径包含、命令安全、域名白名单、审批门控
//!
//! PathSandbox 绑定工作区根目录，任何 `..`、根外绝对路径或经符号链接逃逸的路径都返回 SandboxViolation，
//! 且不做任何写操作。CommandPolicy 拒绝 shell 连接/注入元字符（可配置放开）与危险子串。

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use crate::config::{ApprovalMode, ApprovalSection, BrowserSection, RejectBehavior, ShellSection};
use crate::tools::{SideEffectClass, ToolDescriptor, ToolError};

/// 工作区路径沙箱
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
}

impl PathSandbox {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 把调用方给出的路径解析为根下的绝对路径
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let raw = raw.trim();
        if raw.contains('\0') {
            return Err(ToolError::sandbox(format!("Path contains NUL byte: {raw:?}")));
        }
        let candidate = Path::new(if raw.is_empty() { "." } else { raw });
        if candidate.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(ToolError::sandbox(format!("Path traversal is not allowed: {raw}")));
        }

        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.root.join(candidate)
        };
        let normalized: PathBuf = joined
            .components()
            .filter(|c| !matches!(c, Component::CurDir))
            .collect();
        if !normalized.starts_with(&self.root) {
            return Err(ToolError::sandbox(format!("Path is outside the workspace root: {raw}")));
        }

        // 从最深的已存在祖先开始规范化，检查符号链接是否指向根外
        let mut probe = normalized.as_path();
        loop {
            if probe.symlink_metadata().is_ok() {
                let canonical = probe.canonicalize().map_err(|_| {
                    ToolError::sandbox(format!("Path resolves through a dangling link: {raw}"))
                })?;
                if !canonical.starts_with(&self.root) {
                    return Err(ToolError::sandbox(format!(
                        "Path resolves outside the workspace root: {raw}"
                    )));
                }
                let rest = normalized.strip_prefix(probe).unwrap_or_else(|_| Path::new(""));
                if !rest.as_os_str().is_empty() {
                    return Ok(canonical.join(rest));
                }
                return self.keep_final_link(probe, canonical, raw);
            }
            match probe.parent() {
                Some(parent) if parent.starts_with(&self.root) => probe = parent,
                _ => break,
            }
        }
        Ok(normalized)
    }

    /// 最后一段是指向根内的符号链接时返回链接本身的路径（删除链接而不是目标）
    fn keep_final_link(&self, path: &Path, canonical: PathBuf, raw: &str) -> Result<PathBuf, ToolError> {
        let is_link = path
            .symlink_metadata()
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return Ok(canonical);
        };
        if !is_link {
            return Ok(canonical);
        }
        let parent = parent
            .canonicalize()
            .map_err(|_| ToolError::sandbox(format!("Path resolves through a dangling link: {raw}")))?;
        if !parent.starts_with(&self.root) {
            return Err(ToolError::sandbox(format!(
                "Path resolves outside the workspace root: {raw}"
            )));
        }
        Ok(parent.join(name))
    }

    /// 根下绝对路径 → 相对路径（用于输出）
    pub fn relative(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => path.display().to_string(),
        }
    }
}

/// 连接 / 替换 / 重定向类元字符（按匹配优先级排列）
const OPERATOR_PATTERNS: &[(&str, &str)] = &[
    ("&&", "command chaining (&&)"),
    ("||", "command chaining (||)"),
    (";", "command separator (;)"),
    ("|", "pipe (|)"),
    ("`", "backtick substitution"),
    ("$(", "command substitution $()"),
    (">", "output redirection (>)"),
    ("<", "input redirection (<)"),
    ("&", "background operator (&)"),
    ("\n", "embedded newline"),
    ("\r", "embedded newline"),
];

/// 禁止的命令/子串（即使放开元字符也不允许）
const FORBIDDEN_SUBSTR: &[&str] = &[
    "rm -rf",
    "rm -fr",
    "wget ",
    "curl | sh",
    "chmod 777",
    "chmod +s",
    "mkfs",
    "dd if=",
    "> /dev/sd",
    ":(){ :|:& };:", // fork bomb
];

/// execute 类工具的命令安全策略
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    allow_operators: bool,
    allowed_commands: HashSet<String>,
}

impl CommandPolicy {
    pub fn new(allow_operators: bool, allowed_commands: Vec<String>) -> Self {
        Self {
            allow_operators,
            allowed_commands: allowed_commands.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    pub fn from_config(shell: &ShellSection) -> Self {
        Self::new(shell.allow_operators, shell.allowed_commands.clone())
    }

    pub fn check(&self, command: &str) -> Result<(), ToolError> {
        let command = command.trim();
        if command.is_empty() {
            return Err(ToolError::validation("Empty command"));
        }
        let lower = command.to_lowercase();
        for forbidden in FORBIDDEN_SUBSTR {
            if lower.contains(forbidden) {
                return Err(ToolError::sandbox(format!("Forbidden pattern: {forbidden}")));
            }
        }
        if !self.allow_operators {
            if let Some((_, what)) = OPERATOR_PATTERNS.iter().find(|(p, _)| command.contains(p)) {
                return Err(ToolError::sandbox(format!("Shell operator not permitted: {what}")));
            }
        }
        if !self.allowed_commands.is_empty() {
            let program = lower.split_whitespace().next().unwrap_or("");
            if !self.allowed_commands.contains(program) {
                return Err(ToolError::sandbox(format!("Command '{program}' not in allowlist")));
            }
        }
        Ok(())
    }
}

/// network 类工具的域名白名单；空列表表示全部拒绝
#[derive(Debug, Clone, Default)]
pub struct DomainPolicy {
    allowed_domains: HashSet<String>,
}

impl DomainPolicy {
    pub fn new(allowed_domains: Vec<String>) -> Self {
        Self {
            allowed_domains: allowed_domains.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    pub fn from_config(browser: &BrowserSection) -> Self {
        Self::new(browser.allowed_domains.clone())
    }

    pub fn check(&self, url: &str) -> Result<reqwest::Url, ToolError> {
        let parsed = reqwest::Url::parse(url.trim())
            .map_err(|e| ToolError::validation(format!("Invalid URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ToolError::sandbox(format!("Scheme not permitted: {}", parsed.scheme())));
        }
        let host = parsed
            .host_str()
            .map(|h| h.to_lowercase())
            .ok_or_else(|| ToolError::validation(format!("URL has no host: {url}")))?;
        let allowed = self
            .allowed_domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")));
        if allowed {
            Ok(parsed)
        } else {
            Err(ToolError::sandbox(format!("Domain not in allowlist: {host}")))
        }
    }
}

/// 审批门控策略
#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    mode: ApprovalMode,
    pre_approved: HashSet<String>,
    on_reject: RejectBehavior,
}

impl ApprovalPolicy {
    pub fn new(mode: ApprovalMode, pre_approved: Vec<String>, on_reject: RejectBehavior) -> Self {
        Self {
            mode,
            pre_approved: pre_approved.into_iter().collect(),
            on_reject,
        }
    }

    pub fn from_config(approval: &ApprovalSection) -> Self {
        Self::new(approval.mode, approval.pre_approved.clone(), approval.on_reject)
    }

    pub fn requires_approval(&self, descriptor: &ToolDescriptor) -> bool {
        descriptor.side_effect != SideEffectClass::Read
            && self.mode == ApprovalMode::Ask
            && !self.pre_approved.contains(&descriptor.name)
    }

    pub fn on_reject(&self) -> RejectBehavior {
        self.on_reject
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolErrorKind;

    fn assert_violation(r: Result<PathBuf, ToolError>) {
        match r {
            Err(e) => assert_eq!(e.kind, ToolErrorKind::SandboxViolation, "{e}"),
            Ok(p) => panic!("Expected SandboxViolation, resolved to {}", p.display()),
        }
    }

    #[test]
    fn test_resolve_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let sb = PathSandbox::new(dir.path());
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        assert_eq!(sb.resolve("src").unwrap(), sb.root().join("src"));
        assert_eq!(sb.resolve("./src/new.rs").unwrap(), sb.root().join("src/new.rs"));
        assert_eq!(sb.resolve("").unwrap(), sb.root().to_path_buf());
        let abs = sb.root().join("src/lib.rs");
        assert_eq!(sb.resolve(abs.to_str().unwrap()).unwrap(), abs);
    }

    #[test]
    fn test_traversal_and_outside_paths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sb = PathSandbox::new(dir.path());
        assert_violation(sb.resolve("../../etc/passwd"));
        assert_violation(sb.resolve("src/../../x"));
        assert_violation(sb.resolve("src/../inside.txt"));
        assert_violation(sb.resolve("/etc/passwd"));
        assert_violation(sb.resolve("a\0b"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("dangling")).unwrap();
        let sb = PathSandbox::new(dir.path());
        assert_violation(sb.resolve("link"));
        assert_violation(sb.resolve("link/new.txt"));
        assert_violation(sb.resolve("dangling"));
    }

    #[test]
    fn test_command_policy_operators() {
        let p = CommandPolicy::default();
        assert!(p.check("cargo test --lib").is_ok());
        for bad in ["ls; rm x", "make && make install", "cat a | sh", "echo `id`", "echo $(id)", "ls > out", "sleep 1 &"] {
            let err = p.check(bad).unwrap_err();
            assert_eq!(err.kind, ToolErrorKind::SandboxViolation, "{bad}");
        }
        let open = CommandPolicy::new(true, vec![]);
        assert!(open.check("cargo build && cargo test").is_ok());
        assert!(open.check("rm -rf /").is_err());
        assert_eq!(p.check("  ").unwrap_err().kind, ToolErrorKind::Validation);
    }

    #[test]
    fn test_command_allowlist() {
        let p = CommandPolicy::new(false, vec!["cargo".into(), "ls".into()]);
        assert!(p.check("cargo check").is_ok());
        assert!(p.check("python -c 1").is_err());
    }

    #[test]
    fn test_domain_policy() {
        let p = DomainPolicy::new(vec!["docs.rs".into()]);
        assert!(p.check("https://docs.rs/tokio").is_ok());
        assert!(p.check("https://www.docs.rs/tokio").is_ok());
        assert_eq!(p.check("https://evil.example/x").unwrap_err().kind, ToolErrorKind::SandboxViolation);
        assert_eq!(p.check("file:///etc/passwd").unwrap_err().kind, ToolErrorKind::SandboxViolation);
        assert_eq!(p.check("not a url").unwrap_err().kind, ToolErrorKind::Validation);
        assert!(DomainPolicy::default().check("https://docs.rs").is_err());
    }

    #[test]
    fn test_approval_policy() {
        let desc = |name: &str, side_effect| ToolDescriptor {
            name: name.into(),
            description: String::new(),
            parameter_schema: serde_json::json!({}),
            side_effect,
            path_params: vec![],
        };
        let ask = ApprovalPolicy::new(ApprovalMode::Ask, vec!["write_file".into()], RejectBehavior::Continue);
        assert!(!ask.requires_approval(&desc("read_file", SideEffectClass::Read)));
        assert!(!ask.requires_approval(&desc("write_file", SideEffectClass::Write)));
        assert!(ask.requires_approval(&desc("execute_command", SideEffectClass::Execute)));
        assert!(ask.requires_approval(&desc("browse_url", SideEffectClass::Network)));
        let auto = ApprovalPolicy::new(ApprovalMode::AutoApprove, vec![], RejectBehavior::Continue);
        assert!(!auto.requires_approval(&desc("execute_command", SideEffectClass::Execute)));
    }
}
