//! Task workspace
//!
//! Every task gets its own directory `<root>/<task_id>`. Ability paths are
//! relative to that directory and may not leave it.

use async_trait::async_trait;
use sdk::ability::WorkspaceHandleImpl;
use sdk::errors::EngineError;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub mod process;

pub use process::ProcessRunner;

/// Workspace rooted at a local directory
#[derive(Debug, Clone)]
pub struct LocalWorkspace {
    root: PathBuf,
}

impl LocalWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory of a task; not created
    pub fn get_cwd_path(&self, task_id: &str) -> Result<PathBuf, EngineError> {
        let mut components = Path::new(task_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(task_id)),
            _ => Err(EngineError::Workspace(format!(
                "Invalid task id for workspace: {:?}",
                task_id
            ))),
        }
    }

    /// Create the task directory if absent
    pub async fn ensure_task_dir(&self, task_id: &str) -> Result<PathBuf, EngineError> {
        let dir = self.get_cwd_path(task_id)?;
        if tokio::fs::try_exists(&dir).await.unwrap_or(false) {
            debug!("Workspace directory {:?} already exists", dir);
        } else {
            tokio::fs::create_dir_all(&dir).await?;
            debug!("Workspace directory {:?} created", dir);
        }
        Ok(dir)
    }

    /// Map a task-relative path to an absolute path inside the task directory.
    ///
    /// Absolute paths and `..` components are rejected before touching the
    /// file system. The deepest part of the path that already exists is then
    /// canonicalized and re-checked, so neither an existing entry nor a new
    /// file under a symlinked directory can land outside the task directory.
    pub async fn resolve_path(
        &self,
        task_id: &str,
        relative: &str,
    ) -> Result<PathBuf, EngineError> {
        let base = self.get_cwd_path(task_id)?;
        let rel = Path::new(relative);

        for component in rel.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(EngineError::PathOutsideWorkspace(rel.to_path_buf()));
                }
            }
        }

        let full = base.join(rel);

        // Nothing below a missing task directory can be a link
        let canonical_base = match tokio::fs::canonicalize(&base).await {
            Ok(path) => path,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(full),
            Err(e) => return Err(io_context(relative, e)),
        };

        let existing = deepest_existing(&full).await;
        match tokio::fs::canonicalize(&existing).await {
            Ok(canonical) if canonical.starts_with(&canonical_base) => Ok(full),
            Ok(canonical) => Err(EngineError::PathOutsideWorkspace(canonical)),
            // A dangling link
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(EngineError::PathOutsideWorkspace(existing))
            }
            Err(e) => Err(io_context(relative, e)),
        }
    }
}

/// Longest prefix of `path` that exists, links included
async fn deepest_existing(path: &Path) -> PathBuf {
    let mut current = path;
    loop {
        if tokio::fs::symlink_metadata(current).await.is_ok() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return current.to_path_buf(),
        }
    }
}

fn io_context(path: &str, e: std::io::Error) -> EngineError {
    EngineError::Workspace(format!("{}: {}", path, e))
}

#[async_trait]
impl WorkspaceHandleImpl for LocalWorkspace {
    async fn read(&self, task_id: &str, path: &str) -> Result<Vec<u8>, EngineError> {
        let full = self.resolve_path(task_id, path).await?;
        tokio::fs::read(&full).await.map_err(|e| io_context(path, e))
    }

    async fn write(&self, task_id: &str, path: &str, data: &[u8]) -> Result<(), EngineError> {
        let full = self.resolve_path(task_id, path).await?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_context(path, e))?;
        }
        tokio::fs::write(&full, data)
            .await
            .map_err(|e| io_context(path, e))?;
        debug!("Wrote {} bytes to {:?}", data.len(), full);
        Ok(())
    }

    async fn list(&self, task_id: &str, path: &str) -> Result<Vec<String>, EngineError> {
        let full = self.resolve_path(task_id, path).await?;
        let mut entries = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| io_context(path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_context(path, e))? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn resolve(&self, task_id: &str, path: &str) -> Result<PathBuf, EngineError> {
        self.resolve_path(task_id, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> (TempDir, LocalWorkspace) {
        let dir = TempDir::new().unwrap();
        let ws = LocalWorkspace::new(dir.path());
        (dir, ws)
    }

    #[tokio::test]
    async fn test_ensure_task_dir_is_idempotent() {
        let (_dir, ws) = workspace();
        let first = ws.ensure_task_dir("task-1").await.unwrap();
        let second = ws.ensure_task_dir("task-1").await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_dir());
    }

    #[tokio::test]
    async fn test_write_read_list() {
        let (_dir, ws) = workspace();
        ws.ensure_task_dir("t").await.unwrap();

        ws.write("t", "out/hello.txt", b"hello").await.unwrap();
        ws.write("t", "a.txt", b"a").await.unwrap();

        assert_eq!(ws.read("t", "out/hello.txt").await.unwrap(), b"hello");
        assert_eq!(ws.list("t", ".").await.unwrap(), vec!["a.txt", "out"]);
        assert_eq!(ws.list("t", "out").await.unwrap(), vec!["hello.txt"]);
    }

    #[tokio::test]
    async fn test_rejects_escapes() {
        let (_dir, ws) = workspace();

        assert!(matches!(
            ws.resolve_path("t", "../other/file").await,
            Err(EngineError::PathOutsideWorkspace(_))
        ));
        assert!(matches!(
            ws.resolve_path("t", "/etc/passwd").await,
            Err(EngineError::PathOutsideWorkspace(_))
        ));
        assert!(ws.resolve_path("t", "nested/./file").await.is_ok());
    }

    #[test]
    fn test_rejects_bad_task_ids() {
        let (_dir, ws) = workspace();
        assert!(ws.get_cwd_path("..").is_err());
        assert!(ws.get_cwd_path("a/b").is_err());
        assert!(ws.get_cwd_path("").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rejects_symlink_escape() {
        let (dir, ws) = workspace();
        let task_dir = ws.ensure_task_dir("t").await.unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, task_dir.join("link")).unwrap();

        assert!(matches!(
            ws.resolve_path("t", "link").await,
            Err(EngineError::PathOutsideWorkspace(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_new_file_under_symlinked_dir_stays_inside() {
        let (dir, ws) = workspace();
        let task_dir = ws.ensure_task_dir("t").await.unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, task_dir.join("link")).unwrap();

        assert!(matches!(
            ws.write("t", "link/new.txt", b"escaped").await,
            Err(EngineError::PathOutsideWorkspace(_))
        ));
        assert!(matches!(
            ws.write("t", "link/deeper/new.txt", b"escaped").await,
            Err(EngineError::PathOutsideWorkspace(_))
        ));
        assert!(!outside.join("new.txt").exists());
        assert!(!outside.join("deeper").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rejects_dangling_symlink() {
        let (dir, ws) = workspace();
        let task_dir = ws.ensure_task_dir("t").await.unwrap();
        let target = dir.path().join("outside.txt");
        std::os::unix::fs::symlink(&target, task_dir.join("dangling")).unwrap();

        assert!(ws.write("t", "dangling", b"escaped").await.is_err());
        assert!(!target.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_inside_task_is_allowed() {
        let (_dir, ws) = workspace();
        let task_dir = ws.ensure_task_dir("t").await.unwrap();
        std::fs::create_dir_all(task_dir.join("real")).unwrap();
        std::os::unix::fs::symlink(task_dir.join("real"), task_dir.join("alias")).unwrap();

        ws.write("t", "alias/new.txt", b"ok").await.unwrap();
        assert_eq!(std::fs::read(task_dir.join("real/new.txt")).unwrap(), b"ok");
    }

    #[tokio::test]
    async fn test_missing_file_is_workspace_error() {
        let (_dir, ws) = workspace();
        ws.ensure_task_dir("t").await.unwrap();
        assert!(matches!(
            ws.read("t", "nope.txt").await,
            Err(EngineError::Workspace(_))
        ));
    }
}
