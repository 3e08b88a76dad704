//! 工作区文件工具：沙箱内的列表 / 读取 / 写入
//!
//! 所有路径经 WorkspaceGuard 校验：拒绝绝对路径与 `..` 分量，已存在的路径再做一次
//! canonicalize 复核，任何越界尝试返回 "Invalid path ..."（确定性失败，不重试）。
//! 写入限定在沙箱根下，需要时自动创建父目录；删除不在能力范围内。

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::tools::Tool;

/// 沙箱守卫：绑定根目录，所有文件操作的路径必须解析到根之下
#[derive(Debug, Clone)]
pub struct WorkspaceGuard {
    root: PathBuf,
}

impl WorkspaceGuard {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let root = root.canonicalize().unwrap_or(root);
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 校验相对路径并拼到根下；目标可以不存在（供写入使用）
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let path = path.trim().trim_start_matches("./");
        if path.is_empty() {
            return Ok(self.root.clone());
        }

        let relative = Path::new(path);
        if relative.is_absolute() {
            return Err(format!("Invalid path '{}': absolute paths not allowed", path));
        }
        for component in relative.components() {
            if matches!(component, Component::ParentDir) {
                return Err(format!("Invalid path '{}': outside workspace", path));
            }
        }

        let full = self.root.join(relative);
        // 已存在的路径复核一次真实位置（符号链接仍可能指向外部）
        if let Ok(canonical) = full.canonicalize() {
            if !canonical.starts_with(&self.root) {
                return Err(format!("Invalid path '{}': outside workspace", path));
            }
            return Ok(canonical);
        }
        Ok(full)
    }
}

/// 列出工作区文件，目录以 `/` 结尾，按名称排序
pub struct WorkspaceListTool {
    guard: WorkspaceGuard,
}

impl WorkspaceListTool {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self { guard }
    }

    fn collect(&self, dir: &Path, prefix: &str, recursive: bool, out: &mut Vec<String>) -> Result<(), String> {
        let entries = std::fs::read_dir(dir).map_err(|e| format!("List failed: {}", e))?;
        for entry in entries {
            let entry = entry.map_err(|e| format!("List failed: {}", e))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            let display = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            if is_dir {
                out.push(format!("{}/", display));
                if recursive {
                    self.collect(&entry.path(), &display, true, out)?;
                }
            } else {
                out.push(display);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Tool for WorkspaceListTool {
    fn name(&self) -> &str {
        "workspace_list"
    }

    fn description(&self) -> &str {
        "List files in the workspace. Args: {\"path\": \"optional subdirectory\", \"recursive\": true|false}."
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let path = args.get("path").and_then(|v| v.as_str()).unwrap_or("");
        let recursive = args.get("recursive").and_then(|v| v.as_bool()).unwrap_or(false);
        let base = self.guard.resolve(path)?;
        if !base.exists() {
            return Ok("(empty workspace)".to_string());
        }

        let mut entries = Vec::new();
        self.collect(&base, "", recursive, &mut entries)?;
        entries.sort();
        if entries.is_empty() {
            Ok("(empty workspace)".to_string())
        } else {
            Ok(entries.join("\n"))
        }
    }
}

/// 读取工作区文件内容
pub struct WorkspaceReadTool {
    guard: WorkspaceGuard,
}

impl WorkspaceReadTool {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for WorkspaceReadTool {
    fn name(&self) -> &str {
        "workspace_read"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Args: {\"filename\": \"notes.txt\"}."
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let filename = args
            .get("filename")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if filename.is_empty() {
            return Err("Missing filename".to_string());
        }

        let path = self.guard.resolve(filename)?;
        tracing::info!(filename = %filename, "workspace read");
        std::fs::read_to_string(&path).map_err(|e| format!("Read failed for '{}': {}", filename, e))
    }
}

/// 写入（或覆盖）工作区文件
pub struct WorkspaceWriteTool {
    guard: WorkspaceGuard,
}

impl WorkspaceWriteTool {
    pub fn new(guard: WorkspaceGuard) -> Self {
        Self { guard }
    }
}

#[async_trait]
impl Tool for WorkspaceWriteTool {
    fn name(&self) -> &str {
        "workspace_write"
    }

    fn description(&self) -> &str {
        "Write or overwrite a file in the workspace. Args: {\"filename\": \"notes.txt\", \"content\": \"...\"}."
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let filename = args
            .get("filename")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if filename.is_empty() {
            return Err("Missing filename".to_string());
        }
        let content = args.get("content").and_then(|v| v.as_str()).unwrap_or("");

        let path = self.guard.resolve(filename)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Write failed for '{}': {}", filename, e))?;
        }
        std::fs::write(&path, content)
            .map_err(|e| format!("Write failed for '{}': {}", filename, e))?;

        tracing::info!(filename = %filename, bytes = content.len(), "workspace write");
        Ok(format!("Wrote {} bytes to {}", content.len(), filename))
    }
}
