//! Tree-sitter grammar loading and parser reuse.
//!
//! Languages are loaded once per process and cached by [`Grammar`]. `Parser` objects
//! are not `Sync`, so each thread keeps its own set, created on first use. Trees never
//! outlive [`with_tree`]: they are dropped as soon as the extraction callback returns
//! (or unwinds).

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};
use tree_sitter::{Language, Node, Parser};

/// Grammars known to this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grammar {
    Cpp,
    Markdown,
}

impl Grammar {
    /// Grammar name, used as the cache key in log output
    pub fn name(self) -> &'static str {
        match self {
            Grammar::Cpp => "tree-sitter-cpp",
            Grammar::Markdown => "tree-sitter-markdown",
        }
    }

    fn load(self) -> Language {
        match self {
            Grammar::Cpp => tree_sitter_cpp::LANGUAGE.into(),
            Grammar::Markdown => tree_sitter_md::LANGUAGE.into(),
        }
    }

    /// Cached tree-sitter language for this grammar
    pub fn language(self) -> Language {
        static LANGUAGES: LazyLock<Mutex<HashMap<Grammar, Language>>> =
            LazyLock::new(|| Mutex::new(HashMap::new()));

        let mut languages = LANGUAGES.lock().unwrap_or_else(|e| e.into_inner());
        languages
            .entry(self)
            .or_insert_with(|| {
                tracing::debug!("Loading grammar {}", self.name());
                self.load()
            })
            .clone()
    }
}

thread_local! {
    static PARSERS: RefCell<HashMap<Grammar, Parser>> = RefCell::new(HashMap::new());
}

fn parse(grammar: Grammar, source: &str) -> Option<tree_sitter::Tree> {
    PARSERS.with(|parsers| {
        let mut parsers = parsers.borrow_mut();
        if !parsers.contains_key(&grammar) {
            let mut parser = Parser::new();
            if let Err(e) = parser.set_language(&grammar.language()) {
                tracing::warn!("Failed to set language {}: {}", grammar.name(), e);
                return None;
            }
            parsers.insert(grammar, parser);
        }
        let parser = parsers.get_mut(&grammar)?;
        let tree = parser.parse(source, None);
        if tree.is_none() {
            // A failed parse can leave the parser mid-way; start clean next time.
            parser.reset();
        }
        tree
    })
}

/// Parse `source` with `grammar` and hand the root node to `f`.
///
/// `f` receives `None` when there is no grammar or parsing failed. The tree is
/// released when this function returns.
pub fn with_tree<R>(
    grammar: Option<Grammar>,
    source: &str,
    f: impl FnOnce(Option<Node<'_>>) -> R,
) -> R {
    let Some(grammar) = grammar else {
        return f(None);
    };
    match parse(grammar, source) {
        Some(tree) => f(Some(tree.root_node())),
        None => f(None),
    }
}
