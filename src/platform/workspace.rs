//! 本地工作区：固定根目录列表 + 内存中的作用域配置

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use super::{ConfigScope, PlatformError, PlatformResult, Workspace};

#[derive(Debug, Default)]
pub struct LocalWorkspace {
    roots: Vec<PathBuf>,
    settings: RwLock<HashMap<ConfigScope, HashMap<String, serde_json::Value>>>,
}

impl LocalWorkspace {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let roots = roots
            .into_iter()
            .map(|r| r.canonicalize().unwrap_or(r))
            .collect();
        Self {
            roots,
            settings: RwLock::new(HashMap::new()),
        }
    }
}

impl Workspace for LocalWorkspace {
    fn roots(&self) -> Vec<PathBuf> {
        self.roots.clone()
    }

    fn to_relative(&self, path: &Path) -> Option<String> {
        self.roots.iter().find_map(|root| {
            path.strip_prefix(root).ok().map(|rel| {
                let s = rel.to_string_lossy().replace('\\', "/");
                if s.is_empty() {
                    ".".to_string()
                } else {
                    s
                }
            })
        })
    }

    fn to_absolute(&self, relative: &str) -> Option<PathBuf> {
        let rel = Path::new(relative);
        if rel.is_absolute() {
            return Some(rel.to_path_buf());
        }
        self.roots.first().map(|root| root.join(relative.trim_start_matches("./")))
    }

    fn get_setting(&self, key: &str) -> Option<serde_json::Value> {
        let guard = self.settings.read().ok()?;
        [ConfigScope::Project, ConfigScope::Global]
            .iter()
            .find_map(|scope| guard.get(scope).and_then(|m| m.get(key)).cloned())
    }

    fn set_setting(&self, key: &str, value: serde_json::Value, scope: ConfigScope) -> PlatformResult<()> {
        let mut guard = self
            .settings
            .write()
            .map_err(|_| PlatformError::Unavailable("settings lock poisoned".to_string()))?;
        guard.entry(scope).or_default().insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_absolute_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ws = LocalWorkspace::new(vec![dir.path().to_path_buf()]);
        let root = ws.primary_root().unwrap();
        let abs = ws.to_absolute("./src/main.rs").unwrap();
        assert_eq!(abs, root.join("src/main.rs"));
        assert_eq!(ws.to_relative(&abs).as_deref(), Some("src/main.rs"));
        assert_eq!(ws.to_relative(&root).as_deref(), Some("."));
        assert_eq!(ws.to_relative(Path::new("/definitely/elsewhere")), None);
    }

    #[test]
    fn test_project_scope_overrides_global() {
        let ws = LocalWorkspace::new(vec![]);
        ws.set_setting("model", "a".into(), ConfigScope::Global).unwrap();
        assert_eq!(ws.get_setting("model"), Some("a".into()));
        ws.set_setting("model", "b".into(), ConfigScope::Project).unwrap();
        assert_eq!(ws.get_setting("model"), Some("b".into()));
        assert_eq!(ws.get_setting("missing"), None);
    }
}
