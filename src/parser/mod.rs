//! Structural parsers: CST → compact symbol index → context-prefixed chunks.
//!
//! Each supported format implements [`FileParser`]. The three stages are kept apart so
//! that chunking only ever needs the persisted index, never a re-parse:
//!
//! 1. [`FileParser::parse_cst`] walks a tree-sitter tree and emits [`RawSymbol`]s
//! 2. [`FileParser::read_index`] hydrates them into uniform [`IndexSymbol`]s
//! 3. [`FileParser::compute_chunks`] splits the file along symbol boundaries

pub mod chunking;
pub mod cpp;
pub mod default;
pub mod grammar;
pub mod index_file;
pub mod markdown;
pub mod registry;
pub mod types;

pub use cpp::CppParser;
pub use default::DefaultParser;
pub use grammar::Grammar;
pub use index_file::IndexFile;
pub use markdown::MarkdownParser;
pub use registry::ParserRegistry;
pub use types::{AttrKey, AttrValue, Chunk, IndexSymbol, RawSymbol, SymbolType};

use tree_sitter::Node;

/// Contract every language parser fulfils
pub trait FileParser: Send + Sync {
    /// Parser name for logging
    fn name(&self) -> &'static str;

    /// Lowercase file extensions (without the dot) handled by this parser
    fn supported_extensions(&self) -> &'static [&'static str];

    /// Grammar to build the CST with, `None` for parsers that work on plain text
    fn grammar(&self) -> Option<Grammar>;

    /// Version of the symbol layout this parser writes.
    ///
    /// Bump when existing indexes must be regenerated; purely additive tagged fields
    /// do not require a bump.
    fn format_version(&self) -> u32;

    /// Extract symbols from a CST. `root` is `None` when no tree is available, in which
    /// case the result is empty.
    fn parse_cst(&self, root: Option<Node<'_>>, source: &str, file_path: &str) -> Vec<RawSymbol>;

    /// Hydrate stored symbols, preserving order. Unknown symbol types are skipped.
    fn read_index(&self, raw: &[RawSymbol]) -> Vec<IndexSymbol> {
        raw.iter().filter_map(RawSymbol::hydrate).collect()
    }

    /// Split a file into chunks using previously extracted symbols
    fn compute_chunks(&self, lines: &[&str], symbols: &[IndexSymbol], file_path: &str)
    -> Vec<Chunk>;

    /// Parse `source` with this parser's grammar and extract its symbols
    fn parse_source(&self, source: &str, file_path: &str) -> Vec<RawSymbol> {
        grammar::with_tree(self.grammar(), source, |root| {
            self.parse_cst(root, source, file_path)
        })
    }
}

/// Line-start byte offsets, for turning byte offsets back into (row, column)
pub(crate) struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self { starts }
    }

    /// Position of byte `offset` as 0-based (row, byte column)
    pub(crate) fn position(&self, offset: usize) -> (u32, u32) {
        let row = self.starts.partition_point(|&s| s <= offset).saturating_sub(1);
        (row as u32, (offset - self.starts[row]) as u32)
    }
}

/// End position of `node` with trailing line breaks excluded.
///
/// Several grammars let directives, comments and sections swallow the newline that
/// terminates them, which would report an end on the following line at column 0.
pub(crate) fn content_end(node: Node<'_>, source: &str, lines: &LineIndex) -> (u32, u32) {
    let bytes = source.as_bytes();
    let start = node.start_byte();
    let mut end = node.end_byte().min(bytes.len());
    while end > start && matches!(bytes[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    if end == node.end_byte() {
        let p = node.end_position();
        return (p.row as u32, p.column as u32);
    }
    lines.position(end)
}
