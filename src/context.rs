//! Project context packing for the judge
//!
//! The judge reviews candidates against a bounded text blob describing the
//! surrounding project. Packing never fails: when the requested scope
//! cannot be served (no git repo, unreadable paths), a fallback blob is
//! returned and marked so the engine can log the downgrade.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::{AuditScope, SessionConfig};
use crate::subprocess::{ProcessCommandBuilder, ProcessRunner};

/// Default cap on the packed blob, in characters
pub const DEFAULT_MAX_CHARS: usize = 50_000;
/// Files larger than this are never inlined
pub const DEFAULT_MAX_FILE_BYTES: u64 = 1_048_576;

const SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "py", "go", "java", "c", "h", "cpp", "hpp", "rb", "sh",
    "toml", "json", "yaml", "yml", "md",
];

const SKIP_DIRS: &[&str] = &["target", "node_modules", "dist", "build", "vendor"];

/// A bounded text blob describing the project around the candidate
#[derive(Debug, Clone)]
pub struct ContextPack {
    pub content: String,
    /// The requested scope could not be served and a fallback was produced
    pub fallback: bool,
    pub truncated: bool,
    pub files_included: usize,
}

impl ContextPack {
    fn fallback_blob(reason: &str) -> Self {
        Self {
            content: format!("No project context available ({reason})."),
            fallback: true,
            truncated: false,
            files_included: 0,
        }
    }
}

#[async_trait]
pub trait ContextPacker: Send + Sync {
    async fn pack(&self, config: &SessionConfig, working_dir: &Path) -> ContextPack;
}

/// Filesystem-backed packer with diff, path-list, and workspace scopes
pub struct FsContextPacker {
    runner: Arc<dyn ProcessRunner>,
    max_chars: usize,
    max_file_bytes: u64,
}

impl FsContextPacker {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            runner,
            max_chars: DEFAULT_MAX_CHARS,
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }

    pub fn with_limits(mut self, max_chars: usize, max_file_bytes: u64) -> Self {
        self.max_chars = max_chars;
        self.max_file_bytes = max_file_bytes;
        self
    }

    async fn pack_diff(&self, working_dir: &Path) -> Option<ContextPack> {
        let output = self
            .runner
            .run(
                ProcessCommandBuilder::new("git")
                    .args(["diff", "HEAD"])
                    .current_dir(working_dir)
                    .timeout(Duration::from_secs(10))
                    .build(),
            )
            .await
            .ok()?;
        if !output.status.success() || output.stdout.trim().is_empty() {
            return None;
        }
        let (content, truncated) = truncate_chars(output.stdout, self.max_chars);
        Some(ContextPack {
            content,
            fallback: false,
            truncated,
            files_included: 0,
        })
    }

    fn pack_paths(&self, paths: &[String], working_dir: &Path) -> Option<ContextPack> {
        let mut content = String::new();
        let mut included = 0;
        let mut truncated = false;

        for path in paths {
            let absolute = working_dir.join(path);
            let metadata = match std::fs::metadata(&absolute) {
                Ok(m) if m.is_file() => m,
                _ => {
                    warn!("context path {path} is missing or not a file, skipping");
                    continue;
                }
            };
            if metadata.len() > self.max_file_bytes {
                warn!("context path {path} exceeds the file cap, skipping");
                continue;
            }
            let Ok(text) = std::fs::read_to_string(&absolute) else {
                warn!("context path {path} is unreadable, skipping");
                continue;
            };
            content.push_str(&format!("=== {path} ===\n{text}\n"));
            included += 1;
            if content.len() >= self.max_chars {
                truncated = true;
                break;
            }
        }

        if included == 0 {
            return None;
        }
        let (content, clipped) = truncate_chars(content, self.max_chars);
        Some(ContextPack {
            content,
            fallback: false,
            truncated: truncated || clipped,
            files_included: included,
        })
    }

    fn pack_workspace(&self, working_dir: &Path) -> Option<ContextPack> {
        let mut content = String::new();
        let mut included = 0;
        let mut truncated = false;

        let walker = WalkDir::new(working_dir)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let name = entry.file_name().to_string_lossy();
                !(name.starts_with('.') && name.len() > 1)
                    && !SKIP_DIRS.contains(&name.as_ref())
            });

        for entry in walker.flatten() {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if !SOURCE_EXTENSIONS.contains(&extension) {
                continue;
            }
            if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX) > self.max_file_bytes {
                continue;
            }
            let Ok(text) = std::fs::read_to_string(path) else {
                continue;
            };
            let display = path
                .strip_prefix(working_dir)
                .unwrap_or(path)
                .to_string_lossy();
            content.push_str(&format!("=== {display} ===\n{text}\n"));
            included += 1;
            if content.len() >= self.max_chars {
                truncated = true;
                break;
            }
        }

        if included == 0 {
            return None;
        }
        let (content, clipped) = truncate_chars(content, self.max_chars);
        Some(ContextPack {
            content,
            fallback: false,
            truncated: truncated || clipped,
            files_included: included,
        })
    }
}

#[async_trait]
impl ContextPacker for FsContextPacker {
    async fn pack(&self, config: &SessionConfig, working_dir: &Path) -> ContextPack {
        let packed = match config.scope {
            AuditScope::Diff => match self.pack_diff(working_dir).await {
                Some(pack) => Some(pack),
                None => {
                    debug!("no usable diff, falling back to workspace scan");
                    self.pack_workspace(working_dir).map(|mut pack| {
                        pack.fallback = true;
                        pack
                    })
                }
            },
            AuditScope::Paths => match self.pack_paths(&config.paths, working_dir) {
                Some(pack) => Some(pack),
                None => self.pack_workspace(working_dir).map(|mut pack| {
                    pack.fallback = true;
                    pack
                }),
            },
            AuditScope::Workspace => self.pack_workspace(working_dir),
        };

        packed.unwrap_or_else(|| ContextPack::fallback_blob("workspace scan found no source files"))
    }
}

fn truncate_chars(text: String, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text, false);
    }
    (text.chars().take(max_chars).collect(), true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subprocess::MockProcessRunner;
    use tempfile::TempDir;

    fn packer(mock: &MockProcessRunner) -> FsContextPacker {
        FsContextPacker::new(Arc::new(mock.clone()))
    }

    #[tokio::test]
    async fn diff_scope_uses_git_output() {
        let dir = TempDir::new().unwrap();
        let mock = MockProcessRunner::new();
        mock.expect_success("git", "diff --git a/src/lib.rs b/src/lib.rs\n+added line\n");
        let config = SessionConfig::default();
        let pack = packer(&mock).pack(&config, dir.path()).await;
        assert!(!pack.fallback);
        assert!(pack.content.contains("+added line"));
    }

    #[tokio::test]
    async fn empty_diff_falls_back_to_workspace() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").unwrap();
        let mock = MockProcessRunner::new();
        mock.expect_success("git", "");
        let config = SessionConfig::default();
        let pack = packer(&mock).pack(&config, dir.path()).await;
        assert!(pack.fallback);
        assert!(pack.content.contains("fn main() {}"));
    }

    #[tokio::test]
    async fn paths_scope_reads_listed_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.rs"), "pub fn a() {}\n").unwrap();
        std::fs::write(dir.path().join("b.rs"), "pub fn b() {}\n").unwrap();
        let mock = MockProcessRunner::new();
        let config = SessionConfig {
            scope: AuditScope::Paths,
            paths: vec!["a.rs".to_string(), "missing.rs".to_string(), "b.rs".to_string()],
            ..SessionConfig::default()
        };
        let pack = packer(&mock).pack(&config, dir.path()).await;
        assert!(!pack.fallback);
        assert_eq!(pack.files_included, 2);
        assert!(pack.content.contains("=== a.rs ==="));
        assert!(pack.content.contains("pub fn b()"));
    }

    #[tokio::test]
    async fn all_paths_missing_yields_marked_fallback() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("real.rs"), "fn real() {}\n").unwrap();
        let mock = MockProcessRunner::new();
        let config = SessionConfig {
            scope: AuditScope::Paths,
            paths: vec!["ghost.rs".to_string()],
            ..SessionConfig::default()
        };
        let pack = packer(&mock).pack(&config, dir.path()).await;
        assert!(pack.fallback);
        assert!(pack.content.contains("fn real()"));
    }

    #[tokio::test]
    async fn empty_workspace_never_fails() {
        let dir = TempDir::new().unwrap();
        let mock = MockProcessRunner::new();
        let config = SessionConfig {
            scope: AuditScope::Workspace,
            ..SessionConfig::default()
        };
        let pack = packer(&mock).pack(&config, dir.path()).await;
        assert!(pack.fallback);
        assert!(pack.content.contains("No project context available"));
    }

    #[tokio::test]
    async fn blob_is_capped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.rs"), "x".repeat(10_000)).unwrap();
        let mock = MockProcessRunner::new();
        let config = SessionConfig {
            scope: AuditScope::Workspace,
            ..SessionConfig::default()
        };
        let pack = packer(&mock)
            .with_limits(1_000, DEFAULT_MAX_FILE_BYTES)
            .pack(&config, dir.path())
            .await;
        assert!(pack.truncated);
        assert!(pack.content.chars().count() <= 1_000);
    }
}
