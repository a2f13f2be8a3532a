//! Compute-chunks task: chunk one file from its stored symbol index.
//!
//! A missing, stale or unreadable index is regenerated first.

use super::index_file::{read_content, write_index};
use crate::parser::chunking::sha256_hex;
use crate::parser::{Chunk, FileParser, IndexFile, ParserRegistry, RawSymbol};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ComputeChunksRequest {
    pub file_path: String,
    /// File content; read from `file_path` when `None`
    pub content: Option<String>,
    pub index_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ComputeChunksOutcome {
    Chunks { sha256: String, chunks: Vec<Chunk> },
    Failed { message: String },
}

fn stored_symbols(
    parser: &dyn FileParser,
    index_path: &Path,
    sha256: &str,
) -> Option<Vec<RawSymbol>> {
    let index = IndexFile::load(index_path).ok()?;
    if index.sha256() != sha256 || index.format_version() != parser.format_version() {
        return None;
    }
    Some(index.into_symbols())
}

pub fn compute_chunks(request: ComputeChunksRequest) -> ComputeChunksOutcome {
    let ComputeChunksRequest {
        file_path,
        content,
        index_path,
    } = request;

    let content = match read_content(&file_path, content) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("{}", e);
            return ComputeChunksOutcome::Failed {
                message: e.to_string(),
            };
        }
    };
    let sha256 = sha256_hex(&content);
    let parser = ParserRegistry::global().for_path(&file_path);

    let raw = match stored_symbols(parser, &index_path, &sha256) {
        Some(raw) => raw,
        None => {
            tracing::debug!("Index for {} is missing or stale, regenerating", file_path);
            match write_index(parser, &file_path, &content, &sha256, &index_path) {
                Ok(raw) => raw,
                Err(e) => {
                    // Chunking does not need the file on disk; carry on with a fresh parse.
                    tracing::warn!("{}", e);
                    parser.parse_source(&content, &file_path)
                }
            }
        }
    };

    let symbols = parser.read_index(&raw);
    let lines: Vec<&str> = content.lines().collect();
    let chunks = parser.compute_chunks(&lines, &symbols, &file_path);
    tracing::debug!("Computed {} chunks for {}", chunks.len(), file_path);

    ComputeChunksOutcome::Chunks { sha256, chunks }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::index_file::{IndexFileRequest, index_file};
    use std::fs;
    use tempfile::TempDir;

    const PLAYER: &str = r#"#include <string>

void Player::play() {
    int volume = compute_volume(current_track, master_gain);
    start_playback(current_track, volume);
}
"#;

    fn chunks_of(outcome: ComputeChunksOutcome) -> Vec<Chunk> {
        match outcome {
            ComputeChunksOutcome::Chunks { chunks, .. } => chunks,
            ComputeChunksOutcome::Failed { message } => panic!("failed: {}", message),
        }
    }

    #[test]
    fn test_uses_existing_index() {
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("p.idx");
        index_file(IndexFileRequest {
            file_path: "/src/player.cpp".to_string(),
            content: Some(PLAYER.to_string()),
            index_path: index_path.clone(),
        });
        let written = fs::read(&index_path).unwrap();

        let chunks = chunks_of(compute_chunks(ComputeChunksRequest {
            file_path: "/src/player.cpp".to_string(),
            content: Some(PLAYER.to_string()),
            index_path: index_path.clone(),
        }));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.starts_with(
            "// File: /src/player.cpp\n// Function: Player::play\nvoid Player::play()"
        ));
        // Index untouched
        assert_eq!(fs::read(&index_path).unwrap(), written);
    }

    #[test]
    fn test_regenerates_missing_index() {
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("p.idx");

        let chunks = chunks_of(compute_chunks(ComputeChunksRequest {
            file_path: "/src/player.cpp".to_string(),
            content: Some(PLAYER.to_string()),
            index_path: index_path.clone(),
        }));
        assert_eq!(chunks.len(), 1);

        let index = IndexFile::load(&index_path).unwrap();
        assert_eq!(index.sha256(), sha256_hex(PLAYER));
    }

    #[test]
    fn test_regenerates_stale_index() {
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("p.idx");
        index_file(IndexFileRequest {
            file_path: "/src/player.cpp".to_string(),
            content: Some("int old() { return 0; }\n".to_string()),
            index_path: index_path.clone(),
        });

        let outcome = compute_chunks(ComputeChunksRequest {
            file_path: "/src/player.cpp".to_string(),
            content: Some(PLAYER.to_string()),
            index_path: index_path.clone(),
        });
        let ComputeChunksOutcome::Chunks { sha256, chunks } = outcome else {
            panic!("expected chunks");
        };
        assert_eq!(sha256, sha256_hex(PLAYER));
        assert!(chunks[0].text.contains("Player::play"));
        assert_eq!(IndexFile::load(&index_path).unwrap().sha256(), sha256);
    }

    #[test]
    fn test_corrupt_index_is_regenerated() {
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("p.idx");
        fs::write(&index_path, "not json").unwrap();

        let chunks = chunks_of(compute_chunks(ComputeChunksRequest {
            file_path: "/src/player.cpp".to_string(),
            content: Some(PLAYER.to_string()),
            index_path,
        }));
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let outcome = compute_chunks(ComputeChunksRequest {
            file_path: "/nonexistent/player.cpp".to_string(),
            content: None,
            index_path: dir.path().join("p.idx"),
        });
        assert!(matches!(outcome, ComputeChunksOutcome::Failed { .. }));
    }
}
