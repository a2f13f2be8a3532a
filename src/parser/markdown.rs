//! Markdown heading extraction and section chunking.
//!
//! Only the block grammar is used. A heading's extent is the `section` node the grammar
//! wraps around it, so a level-1 section spans every level-2 section below it.

use super::chunking::{self, ChunkStrategy, PrefixContext};
use super::types::{Chunk, IndexSymbol, RawSymbol, SymbolType};
use super::{FileParser, Grammar, LineIndex, content_end};
use std::collections::BTreeMap;
use tree_sitter::Node;

/// Symbol layout version of Markdown index files
pub const MARKDOWN_FORMAT_VERSION: u32 = 1;

/// Level of an ATX heading; deeper levels are not indexed
fn heading_type(heading: Node<'_>) -> Option<SymbolType> {
    let mut cursor = heading.walk();
    heading
        .children(&mut cursor)
        .find_map(|child| match child.kind() {
            "atx_h1_marker" => Some(SymbolType::Heading1),
            "atx_h2_marker" => Some(SymbolType::Heading2),
            _ => None,
        })
}

fn collect_headings(node: Node<'_>, source: &str, lines: &LineIndex, out: &mut Vec<IndexSymbol>) {
    if node.kind() == "atx_heading"
        && let Some(symbol_type) = heading_type(node)
    {
        let extent = node
            .parent()
            .filter(|p| p.kind() == "section")
            .unwrap_or(node);
        let content = node.child_by_field_name("heading_content");
        let name = content
            .and_then(|c| source.get(c.start_byte()..c.end_byte()))
            .map(str::trim)
            .unwrap_or_default();

        let start = extent.start_position();
        let (end_line, end_column) = content_end(extent, source, lines);
        let (name_start, name_end) = match content {
            Some(c) => (c.start_position(), c.end_position()),
            None => (node.start_position(), node.start_position()),
        };

        out.push(IndexSymbol {
            symbol_type,
            name: name.to_string(),
            start_line: start.row as u32,
            start_column: start.column as u32,
            end_line,
            end_column,
            name_start_line: name_start.row as u32,
            name_start_column: name_start.column as u32,
            name_end_line: name_end.row as u32,
            name_end_column: name_end.column as u32,
            attrs: BTreeMap::new(),
        });
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_headings(child, source, lines, out);
    }
}

/// Extract level-1 and level-2 headings in document order
pub fn extract_headings(root: Node<'_>, source: &str) -> Vec<IndexSymbol> {
    let lines = LineIndex::new(source);
    let mut headings = Vec::new();
    collect_headings(root, source, &lines, &mut headings);
    headings
}

/// Chain of heading names whose sections contain `line`, outermost first
pub fn breadcrumb(symbols: &[IndexSymbol], line: usize) -> Vec<&str> {
    let line = line as u32;
    let mut enclosing: Vec<&IndexSymbol> = symbols
        .iter()
        .filter(|s| matches!(s.symbol_type, SymbolType::Heading1 | SymbolType::Heading2))
        .filter(|s| s.start_line <= line && line <= s.end_line)
        .collect();
    enclosing.sort_by_key(|s| (s.start_line, s.symbol_type));
    enclosing.into_iter().map(|s| s.name.as_str()).collect()
}

pub struct MarkdownChunkStrategy;

impl ChunkStrategy for MarkdownChunkStrategy {
    fn is_container(&self, symbol_type: SymbolType) -> bool {
        matches!(symbol_type, SymbolType::Heading1 | SymbolType::Heading2)
    }

    fn gap_prefix(&self, file_path: &str) -> String {
        format!("---\nfile: {}\n---\n", file_path)
    }

    fn container_prefix(&self, ctx: &PrefixContext<'_>) -> String {
        let mut trail = breadcrumb(ctx.symbols, ctx.chunk_start);
        if trail.is_empty() {
            trail.push(&ctx.container.name);
        }
        format!(
            "---\nfile: {}\nsection: {}\n---\n",
            ctx.file_path,
            trail.join(" > ")
        )
    }
}

/// Parser for Markdown documents
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkdownParser;

impl FileParser for MarkdownParser {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &["md", "markdown"]
    }

    fn grammar(&self) -> Option<Grammar> {
        Some(Grammar::Markdown)
    }

    fn format_version(&self) -> u32 {
        MARKDOWN_FORMAT_VERSION
    }

    fn parse_cst(&self, root: Option<Node<'_>>, source: &str, file_path: &str) -> Vec<RawSymbol> {
        let Some(root) = root else {
            return Vec::new();
        };
        let headings = extract_headings(root, source);
        tracing::debug!("Extracted {} headings from {}", headings.len(), file_path);
        headings.iter().map(RawSymbol::encode).collect()
    }

    fn compute_chunks(
        &self,
        lines: &[&str],
        symbols: &[IndexSymbol],
        file_path: &str,
    ) -> Vec<Chunk> {
        chunking::chunk_by_structure(&MarkdownChunkStrategy, lines, symbols, file_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUIDE: &str = "# Guide\n\nIntro paragraph for the guide.\n\n## Install `tool`\n\nRun the installer.\n\n### Details\n\nDeep detail.\n\n## Use **it**\n\nUsage notes.\n";

    fn parse(source: &str) -> Vec<IndexSymbol> {
        let parser = MarkdownParser;
        let raw = parser.parse_source(source, "guide.md");
        parser.read_index(&raw)
    }

    #[test]
    fn test_extracts_h1_and_h2_only() {
        let symbols = parse(GUIDE);
        let names: Vec<(SymbolType, &str)> = symbols
            .iter()
            .map(|s| (s.symbol_type, s.name.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                (SymbolType::Heading1, "Guide"),
                (SymbolType::Heading2, "Install `tool`"),
                (SymbolType::Heading2, "Use **it**"),
            ]
        );
    }

    #[test]
    fn test_section_extents() {
        let symbols = parse(GUIDE);
        let guide = &symbols[0];
        assert_eq!(guide.start(), (0, 0));
        assert_eq!(guide.end_line, 14);

        let install = &symbols[1];
        assert_eq!(install.start_line, 4);
        // Runs through its level-3 subsection, up to the next level-2 heading
        assert_eq!(install.end_line, 10);

        for s in &symbols {
            assert!(s.start() <= s.name_start());
            assert!(s.name_start() <= s.name_end());
            assert!(s.name_end() <= s.end());
        }
    }

    #[test]
    fn test_breadcrumb() {
        let symbols = parse(GUIDE);
        assert_eq!(breadcrumb(&symbols, 2), vec!["Guide"]);
        assert_eq!(breadcrumb(&symbols, 6), vec!["Guide", "Install `tool`"]);
        assert_eq!(breadcrumb(&symbols, 14), vec!["Guide", "Use **it**"]);
    }

    #[test]
    fn test_read_index_round_trip() {
        let parser = MarkdownParser;
        let raw = parser.parse_source(GUIDE, "guide.md");
        let hydrated = parser.read_index(&raw);
        let reencoded: Vec<RawSymbol> = hydrated.iter().map(RawSymbol::encode).collect();
        assert_eq!(reencoded, raw);
        assert_eq!(parser.read_index(&reencoded), hydrated);
    }

    #[test]
    fn test_chunks_carry_front_matter() {
        let mut source = String::from("# Manual\n\n");
        for i in 0..3 {
            source.push_str(&format!(
                "This paragraph number {} explains a part of the manual in some detail.\n",
                i
            ));
        }
        let symbols = parse(&source);
        let lines: Vec<&str> = source.lines().collect();
        let chunks = MarkdownParser.compute_chunks(&lines, &symbols, "docs/manual.md");

        assert_eq!(chunks.len(), 1);
        assert!(
            chunks[0]
                .text
                .starts_with("---\nfile: docs/manual.md\nsection: Manual\n---\n# Manual")
        );
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn test_text_before_first_heading_is_a_gap() {
        let mut source = String::new();
        for i in 0..3 {
            source.push_str(&format!(
                "Preface line {} with enough words to be worth embedding on its own.\n",
                i
            ));
        }
        source.push_str("\n# Title\n\nshort\n");
        let symbols = parse(&source);
        let lines: Vec<&str> = source.lines().collect();
        let chunks = MarkdownParser.compute_chunks(&lines, &symbols, "notes.md");

        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.starts_with("---\nfile: notes.md\n---\nPreface"));
    }
}
