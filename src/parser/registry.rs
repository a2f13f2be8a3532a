//! Extension → parser dispatch.
//!
//! Lookups always resolve: anything without a dedicated parser goes to
//! [`DefaultParser`].

use super::{CppParser, DefaultParser, FileParser, MarkdownParser};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;

pub struct ParserRegistry {
    parsers: Vec<Box<dyn FileParser>>,
    by_extension: HashMap<&'static str, usize>,
    fallback: DefaultParser,
}

impl ParserRegistry {
    /// Registry with every built-in parser
    pub fn new() -> Self {
        let mut registry = Self {
            parsers: Vec::new(),
            by_extension: HashMap::new(),
            fallback: DefaultParser,
        };
        registry.register(Box::new(CppParser));
        registry.register(Box::new(MarkdownParser));
        registry
    }

    /// Process-wide registry
    pub fn global() -> &'static ParserRegistry {
        static REGISTRY: LazyLock<ParserRegistry> = LazyLock::new(ParserRegistry::new);
        &REGISTRY
    }

    fn register(&mut self, parser: Box<dyn FileParser>) {
        let idx = self.parsers.len();
        for ext in parser.supported_extensions() {
            self.by_extension.insert(*ext, idx);
        }
        self.parsers.push(parser);
    }

    /// Parser for a file extension, with or without the leading dot, any case
    pub fn for_extension(&self, extension: &str) -> &dyn FileParser {
        let ext = extension.trim_start_matches('.').to_lowercase();
        match self.by_extension.get(ext.as_str()) {
            Some(&idx) => self.parsers[idx].as_ref(),
            None => &self.fallback,
        }
    }

    /// Parser for a file path, chosen by its extension
    pub fn for_path(&self, path: &str) -> &dyn FileParser {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        self.for_extension(ext)
    }

    /// Every registered parser, without the fallback
    pub fn parsers(&self) -> impl Iterator<Item = &dyn FileParser> {
        self.parsers.iter().map(|p| p.as_ref())
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}
