//! Structure-aware chunking shared by every parser.
//!
//! Everything in here works on 0-based, end-exclusive line numbers. Conversion to the
//! public 1-based inclusive [`Chunk`] coordinates happens once, in [`finalize_chunk`].

use super::types::{Chunk, IndexSymbol, SymbolType};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Maximum number of lines in one chunk window
pub const MAX_CHUNK_LINES: usize = 150;
/// Lines shared between consecutive windows
pub const OVERLAP_LINES: usize = 15;
/// Windows whose trimmed text is shorter than this are dropped
pub const MIN_CHUNK_CHARS: usize = 75;

const STRIDE: usize = MAX_CHUNK_LINES - OVERLAP_LINES;

/// A window of raw source text before any prefix is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChunk {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// A top-level, non-overlapping container range
#[derive(Debug, Clone)]
pub struct ContainerRange<'a> {
    pub start: usize,
    pub end: usize,
    /// Metadata of the outermost container that produced this range
    pub symbol: &'a IndexSymbol,
}

/// Everything a prefix builder may look at for one container chunk
pub struct PrefixContext<'a> {
    pub file_path: &'a str,
    pub container: &'a IndexSymbol,
    /// Position of the chunk among the chunks of its container
    pub chunk_index: usize,
    /// 0-based first line of the chunk's raw text
    pub chunk_start: usize,
    pub symbols: &'a [IndexSymbol],
}

/// Language-specific knobs of the chunking algorithm
pub trait ChunkStrategy {
    /// Whether symbols of this type start a chunk boundary
    fn is_container(&self, symbol_type: SymbolType) -> bool;

    /// First line after the file's preamble (license header, include block...)
    fn preamble_end(&self, _lines: &[&str]) -> usize {
        0
    }

    /// Text that carries no retrievable meaning on its own
    fn is_boilerplate(&self, _text: &str) -> bool {
        false
    }

    /// Prefix for chunks outside any container
    fn gap_prefix(&self, file_path: &str) -> String;

    /// Prefix for chunks inside a container
    fn container_prefix(&self, ctx: &PrefixContext<'_>) -> String;
}

/// SHA-256 of `text` as lowercase hex
pub fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

/// Slide a window over `lines[start..end]`.
///
/// Each window is at most [`MAX_CHUNK_LINES`] long and overlaps the previous one by
/// [`OVERLAP_LINES`]. Blank edge lines are trimmed; windows that end up too short or
/// that `is_boilerplate` rejects are dropped.
pub fn split_range(
    lines: &[&str],
    start: usize,
    end: usize,
    is_boilerplate: &dyn Fn(&str) -> bool,
) -> Vec<RawChunk> {
    let end = end.min(lines.len());
    let mut chunks = Vec::new();
    if start >= end {
        return chunks;
    }

    let mut window_start = start;
    loop {
        let window_end = (window_start + MAX_CHUNK_LINES).min(end);

        let mut s = window_start;
        while s < window_end && is_blank(lines[s]) {
            s += 1;
        }
        let mut e = window_end;
        while e > s && is_blank(lines[e - 1]) {
            e -= 1;
        }

        if s < e {
            let text = lines[s..e].join("\n");
            if text.trim().len() >= MIN_CHUNK_CHARS && !is_boilerplate(&text) {
                chunks.push(RawChunk {
                    start: s,
                    end: e,
                    text,
                });
            }
        }

        if window_end >= end {
            break;
        }
        window_start += STRIDE;
    }

    chunks
}

/// Apply `prefix` and convert to 1-based inclusive lines.
///
/// The hash covers only the raw text so identical code hashes identically no matter
/// where it sits.
pub fn finalize_chunk(raw: &RawChunk, prefix: &str) -> Option<Chunk> {
    let start_line = raw.start + 1;
    let end_line = raw.end;
    if end_line < start_line {
        return None;
    }
    Some(Chunk {
        start_line: start_line as u32,
        end_line: end_line as u32,
        text: format!("{}{}", prefix, raw.text),
        sha256: sha256_hex(&raw.text),
    })
}

/// Collapse container symbols into sorted, non-overlapping top-level ranges.
///
/// A symbol that starts inside the current range is absorbed into it; the range
/// keeps the metadata of its outermost container.
pub fn collapse_containers<'a>(
    symbols: impl IntoIterator<Item = &'a IndexSymbol>,
) -> Vec<ContainerRange<'a>> {
    let mut sorted: Vec<&IndexSymbol> = symbols.into_iter().collect();
    sorted.sort_by(|a, b| {
        a.start_line
            .cmp(&b.start_line)
            .then_with(|| b.end_line.cmp(&a.end_line))
    });

    let mut ranges: Vec<ContainerRange<'a>> = Vec::new();
    for symbol in sorted {
        let start = symbol.start_line as usize;
        let end = symbol.end_line as usize + 1;
        match ranges.last_mut() {
            Some(current) if start < current.end => {
                current.end = current.end.max(end);
            }
            _ => ranges.push(ContainerRange { start, end, symbol }),
        }
    }
    ranges
}

/// Pull each range's start back over directly attached comments and decorators.
///
/// Stops at a blank line or at the end of the previous range.
pub fn absorb_leading_context(lines: &[&str], ranges: &mut [ContainerRange<'_>]) {
    let mut floor = 0;
    for range in ranges.iter_mut() {
        while range.start > floor && !is_blank(lines[range.start - 1]) {
            range.start -= 1;
        }
        floor = range.end;
    }
}

/// Chunk a file along the container structure described by `strategy`.
pub fn chunk_by_structure(
    strategy: &dyn ChunkStrategy,
    lines: &[&str],
    symbols: &[IndexSymbol],
    file_path: &str,
) -> Vec<Chunk> {
    let total = lines.len();
    let boilerplate = |text: &str| strategy.is_boilerplate(text);

    let mut ranges = collapse_containers(
        symbols
            .iter()
            .filter(|s| strategy.is_container(s.symbol_type))
            .filter(|s| (s.start_line as usize) < total),
    );
    for range in ranges.iter_mut() {
        range.end = range.end.min(total);
    }
    absorb_leading_context(lines, &mut ranges);

    let preamble_end = strategy.preamble_end(lines).min(total);
    let gap_prefix = strategy.gap_prefix(file_path);

    let mut chunks = Vec::new();
    let mut seen = HashSet::new();
    let mut push = |chunk: Option<Chunk>, chunks: &mut Vec<Chunk>| {
        if let Some(chunk) = chunk
            && seen.insert((chunk.start_line, chunk.end_line))
        {
            chunks.push(chunk);
        }
    };

    let mut cursor = preamble_end;
    for range in &ranges {
        if range.start > cursor {
            for raw in split_range(lines, cursor, range.start, &boilerplate) {
                push(finalize_chunk(&raw, &gap_prefix), &mut chunks);
            }
        }

        let raws = split_range(lines, range.start, range.end, &boilerplate);
        for (chunk_index, raw) in raws.iter().enumerate() {
            let prefix = strategy.container_prefix(&PrefixContext {
                file_path,
                container: range.symbol,
                chunk_index,
                chunk_start: raw.start,
                symbols,
            });
            push(finalize_chunk(raw, &prefix), &mut chunks);
        }

        cursor = cursor.max(range.end);
    }

    if cursor < total {
        for raw in split_range(lines, cursor, total, &boilerplate) {
            push(finalize_chunk(&raw, &gap_prefix), &mut chunks);
        }
    }

    tracing::debug!(
        "Chunked {} into {} chunks ({} container ranges)",
        file_path,
        chunks.len(),
        ranges.len()
    );
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn never(_: &str) -> bool {
        false
    }

    fn numbered_lines(count: usize) -> Vec<String> {
        (1..=count)
            .map(|i| format!("let value_{:04} = compute_something_long({});", i, i))
            .collect()
    }

    fn symbol(symbol_type: SymbolType, name: &str, start: u32, end: u32) -> IndexSymbol {
        IndexSymbol {
            symbol_type,
            name: name.to_string(),
            start_line: start,
            start_column: 0,
            end_line: end,
            end_column: 1,
            name_start_line: start,
            name_start_column: 0,
            name_end_line: start,
            name_end_column: 0,
            attrs: BTreeMap::new(),
        }
    }

    struct TestStrategy;

    impl ChunkStrategy for TestStrategy {
        fn is_container(&self, symbol_type: SymbolType) -> bool {
            symbol_type.is_callable() || symbol_type == SymbolType::Class
        }

        fn gap_prefix(&self, file_path: &str) -> String {
            format!("# {}\n", file_path)
        }

        fn container_prefix(&self, ctx: &PrefixContext<'_>) -> String {
            format!("# {}\n# {}\n", ctx.file_path, ctx.container.name)
        }
    }

    #[test]
    fn test_split_short_range_single_window() {
        let owned = numbered_lines(10);
        let lines: Vec<&str> = owned.iter().map(String::as_str).collect();
        let chunks = split_range(&lines, 0, 10, &never);
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (0, 10));
    }

    #[test]
    fn test_split_uses_stride_and_overlap() {
        let owned = numbered_lines(300);
        let lines: Vec<&str> = owned.iter().map(String::as_str).collect();
        let chunks = split_range(&lines, 0, 300, &never);

        let spans: Vec<(usize, usize)> = chunks.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(spans, vec![(0, 150), (135, 285), (270, 300)]);
        assert_eq!(chunks[0].end - chunks[1].start, OVERLAP_LINES);
    }

    #[test]
    fn test_split_trims_blank_edges() {
        let mut owned = vec![String::new(), "   ".to_string()];
        owned.extend(numbered_lines(3));
        owned.push(String::new());
        let lines: Vec<&str> = owned.iter().map(String::as_str).collect();

        let chunks = split_range(&lines, 0, lines.len(), &never);
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start, chunks[0].end), (2, 5));
        assert!(!chunks[0].text.starts_with('\n'));
    }

    #[test]
    fn test_split_drops_short_and_boilerplate() {
        let lines = vec!["int x;", "}"];
        assert!(split_range(&lines, 0, 2, &never).is_empty());

        let owned = numbered_lines(5);
        let lines: Vec<&str> = owned.iter().map(String::as_str).collect();
        let reject_all = |_: &str| true;
        assert!(split_range(&lines, 0, 5, &reject_all).is_empty());
    }

    #[test]
    fn test_split_empty_and_inverted_ranges() {
        let owned = numbered_lines(5);
        let lines: Vec<&str> = owned.iter().map(String::as_str).collect();
        assert!(split_range(&lines, 3, 3, &never).is_empty());
        assert!(split_range(&lines, 4, 2, &never).is_empty());
        assert!(split_range(&[], 0, 10, &never).is_empty());
    }

    #[test]
    fn test_finalize_converts_coordinates_and_hashes_raw_text() {
        let raw = RawChunk {
            start: 4,
            end: 9,
            text: "body".to_string(),
        };
        let a = finalize_chunk(&raw, "// File: a.cpp\n").unwrap();
        let b = finalize_chunk(&raw, "// File: b.cpp\n// Function: f\n").unwrap();

        assert_eq!((a.start_line, a.end_line), (5, 9));
        assert_eq!(a.sha256, b.sha256);
        assert_ne!(a.text, b.text);
        assert_eq!(a.sha256, sha256_hex("body"));
    }

    #[test]
    fn test_finalize_drops_zero_length() {
        let raw = RawChunk {
            start: 4,
            end: 4,
            text: String::new(),
        };
        assert!(finalize_chunk(&raw, "").is_none());
    }

    #[test]
    fn test_collapse_absorbs_nested_into_outermost() {
        let class = symbol(SymbolType::Class, "Player", 2, 20);
        let method = symbol(SymbolType::Method, "play", 5, 8);
        let free = symbol(SymbolType::Function, "main", 25, 30);
        let straddle = symbol(SymbolType::Function, "odd", 19, 23);

        let ranges = collapse_containers([&method, &free, &class, &straddle]);
        assert_eq!(ranges.len(), 2);
        assert_eq!((ranges[0].start, ranges[0].end), (2, 24));
        assert_eq!(ranges[0].symbol.name, "Player");
        assert_eq!((ranges[1].start, ranges[1].end), (25, 31));
    }

    #[test]
    fn test_collapse_prefers_larger_symbol_on_same_start() {
        let inner = symbol(SymbolType::Function, "inner", 4, 6);
        let outer = symbol(SymbolType::Class, "Outer", 4, 12);
        let ranges = collapse_containers([&inner, &outer]);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].symbol.name, "Outer");
        assert_eq!(ranges[0].end, 13);
    }

    #[test]
    fn test_absorb_leading_context_stops_at_blank_and_previous_range() {
        let lines = vec![
            "int a() {",   // 0
            "}",           // 1
            "// doc one",  // 2
            "int b() {",   // 3
            "}",           // 4
            "",            // 5
            "// doc two",  // 6
            "// more doc", // 7
            "int c() {",   // 8
            "}",           // 9
        ];
        let a = symbol(SymbolType::Function, "a", 0, 1);
        let b = symbol(SymbolType::Function, "b", 3, 4);
        let c = symbol(SymbolType::Function, "c", 8, 9);
        let mut ranges = collapse_containers([&a, &b, &c]);
        absorb_leading_context(&lines, &mut ranges);

        assert_eq!(ranges[0].start, 0);
        assert_eq!(ranges[1].start, 2);
        assert_eq!(ranges[2].start, 6);
    }

    #[test]
    fn test_chunk_by_structure_gap_range_trailing() {
        let mut owned: Vec<String> = numbered_lines(3);
        owned.push(String::new());
        owned.push("fn work() {".to_string());
        owned.extend(numbered_lines(3));
        owned.push("}".to_string());
        owned.push(String::new());
        owned.extend(numbered_lines(3));
        let lines: Vec<&str> = owned.iter().map(String::as_str).collect();

        let work = symbol(SymbolType::Function, "work", 4, 8);
        let chunks = chunk_by_structure(&TestStrategy, &lines, &[work], "src/lib.rs");

        assert_eq!(chunks.len(), 3);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 3));
        assert!(chunks[0].text.starts_with("# src/lib.rs\nlet"));
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (5, 9));
        assert!(chunks[1].text.starts_with("# src/lib.rs\n# work\nfn work()"));
        assert_eq!((chunks[2].start_line, chunks[2].end_line), (11, 13));
    }

    #[test]
    fn test_chunk_by_structure_without_containers() {
        let owned = numbered_lines(20);
        let lines: Vec<&str> = owned.iter().map(String::as_str).collect();
        let chunks = chunk_by_structure(&TestStrategy, &lines, &[], "notes.txt");
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 20));
    }
}
