//! Index-file task: parse one source file and persist its symbol index.

use crate::error::TaskError;
use crate::parser::chunking::sha256_hex;
use crate::parser::index_file::{self, IndexFile};
use crate::parser::{FileParser, ParserRegistry, RawSymbol};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct IndexFileRequest {
    pub file_path: String,
    /// File content; read from `file_path` when `None`
    pub content: Option<String>,
    pub index_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexFileOutcome {
    /// A new index was written
    Indexed { sha256: String, symbols: usize },
    /// The existing index already matches the content
    UpToDate { sha256: String },
    Failed { message: String },
}

pub(crate) fn read_content(file_path: &str, content: Option<String>) -> Result<String, TaskError> {
    match content {
        Some(c) => Ok(c),
        None => fs::read_to_string(file_path).map_err(|e| TaskError::ReadFailed {
            file: file_path.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// Parse `content` and atomically write the index; returns the extracted symbols
pub(crate) fn write_index(
    parser: &dyn FileParser,
    file_path: &str,
    content: &str,
    sha256: &str,
    index_path: &Path,
) -> Result<Vec<RawSymbol>, TaskError> {
    let symbols = parser.parse_source(content, file_path);
    let index = IndexFile::new(sha256, parser.format_version(), file_path, symbols);
    index
        .write_atomic(index_path)
        .map_err(|e| TaskError::WriteFailed {
            file: index_path.display().to_string(),
            reason: format!("{:#}", e),
        })?;
    Ok(index.into_symbols())
}

/// Run the index-file task. Never panics on bad input; failures become
/// [`IndexFileOutcome::Failed`].
pub fn index_file(request: IndexFileRequest) -> IndexFileOutcome {
    let IndexFileRequest {
        file_path,
        content,
        index_path,
    } = request;

    let content = match read_content(&file_path, content) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("{}", e);
            return IndexFileOutcome::Failed {
                message: e.to_string(),
            };
        }
    };

    let sha256 = sha256_hex(&content);
    let parser = ParserRegistry::global().for_path(&file_path);

    if index_file::is_up_to_date(&index_path, &sha256, parser.format_version()) {
        tracing::debug!("Index for {} is up to date", file_path);
        return IndexFileOutcome::UpToDate { sha256 };
    }

    match write_index(parser, &file_path, &content, &sha256, &index_path) {
        Ok(symbols) => {
            tracing::debug!(
                "Indexed {} with {} parser ({} symbols)",
                file_path,
                parser.name(),
                symbols.len()
            );
            IndexFileOutcome::Indexed {
                sha256,
                symbols: symbols.len(),
            }
        }
        Err(e) => {
            tracing::warn!("{}", e);
            IndexFileOutcome::Failed {
                message: e.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(dir: &TempDir, file_path: &str, content: &str) -> IndexFileRequest {
        IndexFileRequest {
            file_path: file_path.to_string(),
            content: Some(content.to_string()),
            index_path: dir.path().join("index").join("a.idx"),
        }
    }

    #[test]
    fn test_index_then_up_to_date() {
        let dir = TempDir::new().unwrap();
        let source = "void Player::play() { }\n";

        let first = index_file(request(&dir, "/src/player.cpp", source));
        let IndexFileOutcome::Indexed { sha256, symbols } = first else {
            panic!("expected Indexed, got {:?}", first);
        };
        assert_eq!(symbols, 1);
        assert_eq!(sha256, sha256_hex(source));

        let second = index_file(request(&dir, "/src/player.cpp", source));
        assert_eq!(second, IndexFileOutcome::UpToDate { sha256 });
    }

    #[test]
    fn test_changed_content_reindexes() {
        let dir = TempDir::new().unwrap();
        index_file(request(&dir, "/src/a.cpp", "int a() { return 1; }\n"));
        let outcome = index_file(request(&dir, "/src/a.cpp", "int a() { return 2; }\n"));
        assert!(matches!(outcome, IndexFileOutcome::Indexed { .. }));
    }

    #[test]
    fn test_unknown_extension_gets_empty_index() {
        let dir = TempDir::new().unwrap();
        let req = request(&dir, "/src/notes.txt", "just some words\n");
        let index_path = req.index_path.clone();

        let outcome = index_file(req);
        assert!(matches!(outcome, IndexFileOutcome::Indexed { symbols: 0, .. }));

        let index = IndexFile::load(&index_path).unwrap();
        assert!(index.symbols().is_empty());
        assert_eq!(index.file_path(), "/src/notes.txt");
    }

    #[test]
    fn test_reads_from_disk() {
        let dir = TempDir::new().unwrap();
        let source_path = dir.path().join("guide.md");
        fs::write(&source_path, "# Guide\n\nText.\n").unwrap();

        let outcome = index_file(IndexFileRequest {
            file_path: source_path.to_string_lossy().to_string(),
            content: None,
            index_path: dir.path().join("guide.idx"),
        });
        assert!(matches!(outcome, IndexFileOutcome::Indexed { symbols: 1, .. }));
    }

    #[test]
    fn test_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let outcome = index_file(IndexFileRequest {
            file_path: "/nonexistent/file.cpp".to_string(),
            content: None,
            index_path: dir.path().join("x.idx"),
        });
        let IndexFileOutcome::Failed { message } = outcome else {
            panic!("expected Failed");
        };
        assert!(message.contains("/nonexistent/file.cpp"));
    }
}
