//! Fallback parser for files no structural parser claims.
//!
//! Produces an empty symbol index and chunks the whole file as one gap.

use super::chunking::{self, ChunkStrategy, PrefixContext};
use super::types::{Chunk, IndexSymbol, RawSymbol, SymbolType};
use super::{FileParser, Grammar};
use tree_sitter::Node;

pub const DEFAULT_FORMAT_VERSION: u32 = 1;

struct PlainTextStrategy;

impl ChunkStrategy for PlainTextStrategy {
    fn is_container(&self, _symbol_type: SymbolType) -> bool {
        false
    }

    fn gap_prefix(&self, file_path: &str) -> String {
        format!("File: {}\n", file_path)
    }

    fn container_prefix(&self, ctx: &PrefixContext<'_>) -> String {
        self.gap_prefix(ctx.file_path)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultParser;

impl FileParser for DefaultParser {
    fn name(&self) -> &'static str {
        "default"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[]
    }

    fn grammar(&self) -> Option<Grammar> {
        None
    }

    fn format_version(&self) -> u32 {
        DEFAULT_FORMAT_VERSION
    }

    fn parse_cst(
        &self,
        _root: Option<Node<'_>>,
        _source: &str,
        _file_path: &str,
    ) -> Vec<RawSymbol> {
        Vec::new()
    }

    fn compute_chunks(
        &self,
        lines: &[&str],
        symbols: &[IndexSymbol],
        file_path: &str,
    ) -> Vec<Chunk> {
        chunking::chunk_by_structure(&PlainTextStrategy, lines, symbols, file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_symbols() {
        let raw = DefaultParser.parse_source("anything at all", "notes.txt");
        assert!(raw.is_empty());
        assert!(DefaultParser.read_index(&raw).is_empty());
    }

    #[test]
    fn test_whole_file_windows() {
        let owned: Vec<String> = (0..200)
            .map(|i| format!("plain text line number {} with some filler words", i))
            .collect();
        let lines: Vec<&str> = owned.iter().map(String::as_str).collect();
        let chunks = DefaultParser.compute_chunks(&lines, &[], "notes.txt");

        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 150));
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (136, 200));
        assert!(chunks.iter().all(|c| c.text.starts_with("File: notes.txt\n")));
    }

    #[test]
    fn test_short_file_has_no_chunks() {
        let chunks = DefaultParser.compute_chunks(&["tiny"], &[], "tiny.txt");
        assert!(chunks.is_empty());
    }
}
