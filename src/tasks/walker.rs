//! Gitignore-aware discovery of indexable source files

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};

/// Files larger than this are skipped by default
pub const DEFAULT_MAX_FILE_SIZE: u64 = 2 * 1024 * 1024;

/// A discovered text file and its content
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub content: String,
}

pub struct SourceWalker {
    pub(crate) root: PathBuf,
    pub(crate) max_file_size: u64,
    pub(crate) exclude_patterns: Vec<String>,
}

impl SourceWalker {
    pub fn new(root: impl AsRef<Path>, max_file_size: u64) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            max_file_size,
            exclude_patterns: vec![],
        }
    }

    /// Skip paths containing any of these substrings
    pub fn with_excludes(mut self, exclude_patterns: Vec<String>) -> Self {
        self.exclude_patterns = exclude_patterns;
        self
    }

    /// Walk the root (a directory or a single file) and collect readable text files
    pub fn walk(&self) -> Result<Vec<SourceFile>> {
        if !self.root.exists() {
            anyhow::bail!("Path does not exist: {:?}", self.root);
        }

        let mut files = Vec::new();
        let walker = WalkBuilder::new(&self.root)
            .standard_filters(true)
            .hidden(false)
            .require_git(false)
            .build();

        for entry in walker {
            let entry = entry.context("Failed to read directory entry")?;
            let path = entry.path();

            if path.is_dir() {
                continue;
            }
            if path.components().any(|c| c.as_os_str() == ".git") {
                continue;
            }
            if self.is_excluded(path) {
                continue;
            }
            if let Ok(metadata) = fs::metadata(path)
                && metadata.len() > self.max_file_size
            {
                tracing::debug!("Skipping large file: {:?}", path);
                continue;
            }

            let bytes = match fs::read(path) {
                Ok(b) => b,
                Err(e) => {
                    tracing::debug!("Skipping unreadable file {:?}: {}", path, e);
                    continue;
                }
            };
            if !is_text(&bytes) {
                tracing::debug!("Skipping binary file: {:?}", path);
                continue;
            }
            let Ok(content) = String::from_utf8(bytes) else {
                tracing::debug!("Skipping non UTF-8 file: {:?}", path);
                continue;
            };

            files.push(SourceFile {
                path: path.to_path_buf(),
                content,
            });
        }

        tracing::info!("Found {} files under {:?}", files.len(), self.root);
        Ok(files)
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.exclude_patterns
            .iter()
            .any(|pattern| path_str.contains(pattern.as_str()))
    }
}

/// More than 30% control bytes means binary
pub(crate) fn is_text(content: &[u8]) -> bool {
    if content.is_empty() {
        return true;
    }
    let non_printable = content
        .iter()
        .filter(|&&b| b < 0x20 && b != b'\n' && b != b'\r' && b != b'\t')
        .count();
    (non_printable as f64 / content.len() as f64) < 0.3
}
