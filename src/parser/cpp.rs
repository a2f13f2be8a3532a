//! C and C++ symbol extraction and chunking.
//!
//! Extraction walks the CST in pre-order and tests every node against an ordered
//! pattern table; the first matching pattern wins. Results therefore come out in
//! document order, with pattern order as the tie-break for a single node.
//!
//! Known limitation: a signature split across `#if`/`#else`/`#endif` does not form a
//! `function_definition` in the grammar and produces no function symbol.

use super::chunking::{self, ChunkStrategy, PrefixContext};
use super::types::{AttrKey, AttrValue, Chunk, IndexSymbol, RawSymbol, SymbolType};
use super::{FileParser, Grammar, LineIndex, content_end};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tree_sitter::Node;

/// Symbol layout version of C/C++ index files
pub const CPP_FORMAT_VERSION: u32 = 1;

const ANONYMOUS_NAMESPACE: &str = "(anonymous namespace)";
const ANONYMOUS: &str = "(anonymous)";

/// Boilerplate windows are never longer than this
const BOILERPLATE_MAX_CHARS: usize = 200;

/// Node kinds accepted as the leaf name of a function declarator
const NAME_KINDS: &[&str] = &[
    "identifier",
    "field_identifier",
    "destructor_name",
    "operator_name",
];

/// How a prototype's function declarator is wrapped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wrapper {
    Plain,
    Pointer,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pattern {
    Comment,
    Include,
    ObjectMacro,
    FunctionMacro,
    Container,
    FunctionDefinition,
    /// `member` selects `field_declaration` over `declaration`
    Prototype { member: bool, wrapper: Wrapper },
}

const PATTERNS: &[Pattern] = &[
    Pattern::Comment,
    Pattern::Include,
    Pattern::ObjectMacro,
    Pattern::FunctionMacro,
    Pattern::Container,
    Pattern::FunctionDefinition,
    Pattern::Prototype { member: false, wrapper: Wrapper::Plain },
    Pattern::Prototype { member: false, wrapper: Wrapper::Pointer },
    Pattern::Prototype { member: false, wrapper: Wrapper::Reference },
    Pattern::Prototype { member: true, wrapper: Wrapper::Plain },
    Pattern::Prototype { member: true, wrapper: Wrapper::Pointer },
    Pattern::Prototype { member: true, wrapper: Wrapper::Reference },
];

impl Pattern {
    fn matches(self, node: Node<'_>) -> bool {
        match self {
            Pattern::Comment => node.kind() == "comment",
            Pattern::Include => node.kind() == "preproc_include",
            Pattern::ObjectMacro => node.kind() == "preproc_def",
            Pattern::FunctionMacro => node.kind() == "preproc_function_def",
            Pattern::Container => {
                container_type(node.kind()).is_some() && node.child_by_field_name("body").is_some()
            }
            Pattern::FunctionDefinition => {
                node.kind() == "function_definition"
                    && node
                        .child_by_field_name("declarator")
                        .and_then(CallableName::resolve)
                        .is_some()
            }
            Pattern::Prototype { member, wrapper } => {
                let kind = if member { "field_declaration" } else { "declaration" };
                if node.kind() != kind {
                    return false;
                }
                let Some(declarator) = node.child_by_field_name("declarator") else {
                    return false;
                };
                let outer = match wrapper {
                    Wrapper::Plain => "function_declarator",
                    Wrapper::Pointer => "pointer_declarator",
                    Wrapper::Reference => "reference_declarator",
                };
                declarator.kind() == outer && CallableName::resolve(declarator).is_some()
            }
        }
    }
}

fn container_type(kind: &str) -> Option<SymbolType> {
    match kind {
        "namespace_definition" => Some(SymbolType::Namespace),
        "class_specifier" => Some(SymbolType::Class),
        "struct_specifier" => Some(SymbolType::Struct),
        "union_specifier" => Some(SymbolType::Union),
        "enum_specifier" => Some(SymbolType::Enum),
        _ => None,
    }
}

fn is_record(kind: &str) -> bool {
    matches!(kind, "class_specifier" | "struct_specifier" | "union_specifier")
}

/// Name parts of a function declarator, found by drilling through wrappers
struct CallableName<'t> {
    /// Leaf `function_declarator`
    function: Node<'t>,
    /// The declarator's own name part (`Player::play` in `void Player::play()`)
    target: Node<'t>,
    /// Leaf name node (`play`)
    name: Node<'t>,
    /// Scope segments written in the declarator (`Player`)
    qualifier: Vec<Node<'t>>,
}

impl<'t> CallableName<'t> {
    fn resolve(declarator: Node<'t>) -> Option<Self> {
        let mut function = declarator;
        loop {
            match function.kind() {
                "function_declarator" => break,
                "pointer_declarator" => function = function.child_by_field_name("declarator")?,
                "reference_declarator" => {
                    let mut cursor = function.walk();
                    let inner = function.named_children(&mut cursor).last()?;
                    function = inner;
                }
                _ => return None,
            }
        }

        let target = function.child_by_field_name("declarator")?;
        let mut qualifier = Vec::new();
        let mut name = target;
        loop {
            match name.kind() {
                "qualified_identifier" => {
                    if let Some(scope) = name.child_by_field_name("scope") {
                        qualifier.push(scope);
                    }
                    name = name.child_by_field_name("name")?;
                }
                "template_function" => name = name.child_by_field_name("name")?,
                kind if NAME_KINDS.contains(&kind) => break,
                _ => return None,
            }
        }

        Some(Self {
            function,
            target,
            name,
            qualifier,
        })
    }
}

fn has_descendant(node: Node<'_>, kind: &str) -> bool {
    if node.kind() == kind {
        return true;
    }
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .any(|child| has_descendant(child, kind))
}

/// Whether `node` sits directly in a class/struct/union body (template wrappers aside)
fn in_record_body(node: Node<'_>) -> bool {
    let mut parent = node.parent();
    while let Some(p) = parent {
        if p.kind() != "template_declaration" {
            break;
        }
        parent = p.parent();
    }
    parent.is_some_and(|p| {
        p.kind() == "field_declaration_list" && p.parent().is_some_and(|r| is_record(r.kind()))
    })
}

struct Extractor<'s> {
    source: &'s str,
    lines: LineIndex,
    symbols: Vec<IndexSymbol>,
    /// Last symbol is a standalone `//` comment that a following one may extend
    open_line_comment: bool,
}

impl<'s> Extractor<'s> {
    fn new(source: &'s str) -> Self {
        Self {
            source,
            lines: LineIndex::new(source),
            symbols: Vec::new(),
            open_line_comment: false,
        }
    }

    fn text(&self, node: Node<'_>) -> &'s str {
        self.source
            .get(node.start_byte()..node.end_byte())
            .unwrap_or_default()
    }

    fn walk(&mut self, node: Node<'_>) {
        if let Some(pattern) = PATTERNS.iter().copied().find(|p| p.matches(node)) {
            self.emit(pattern, node);
        }
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child);
        }
    }

    fn emit(&mut self, pattern: Pattern, node: Node<'_>) {
        if pattern == Pattern::Comment {
            self.comment(node);
            return;
        }
        self.open_line_comment = false;

        match pattern {
            Pattern::Include => {
                let path = node.child_by_field_name("path");
                let name = path.map(|p| self.text(p)).unwrap_or_default();
                self.push(SymbolType::SourceInclude, node, path, name, BTreeMap::new());
            }
            Pattern::ObjectMacro | Pattern::FunctionMacro => {
                let name_node = node.child_by_field_name("name");
                let name = name_node.map(|n| self.text(n)).unwrap_or_default();
                self.push(SymbolType::Macro, node, name_node, name, BTreeMap::new());
            }
            Pattern::Container => self.container(node),
            Pattern::FunctionDefinition => self.callable(node, false),
            Pattern::Prototype { .. } => self.callable(node, true),
            Pattern::Comment => {}
        }
    }

    fn push(
        &mut self,
        symbol_type: SymbolType,
        node: Node<'_>,
        name_node: Option<Node<'_>>,
        name: &str,
        attrs: BTreeMap<AttrKey, AttrValue>,
    ) {
        let start = node.start_position();
        let (end_line, end_column) = content_end(node, self.source, &self.lines);
        let (name_start, name_end) = match name_node {
            Some(n) => (n.start_position(), n.end_position()),
            None => (start, start),
        };

        self.symbols.push(IndexSymbol {
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
            attrs,
        });
    }

    fn comment(&mut self, node: Node<'_>) {
        let start = node.start_position();
        let line_start = node.start_byte() - start.column;
        let standalone = self.text(node).starts_with("//")
            && self
                .source
                .get(line_start..node.start_byte())
                .is_some_and(|prefix| prefix.trim().is_empty());

        if standalone
            && self.open_line_comment
            && let Some(prev) = self.symbols.last_mut()
            && prev.start_column == start.column as u32
            && prev.end_line + 1 == start.row as u32
        {
            let (end_line, end_column) = content_end(node, self.source, &self.lines);
            prev.end_line = end_line;
            prev.end_column = end_column;
            return;
        }

        self.push(SymbolType::Comment, node, None, "", BTreeMap::new());
        self.open_line_comment = standalone;
    }

    /// Enclosing namespace and record names, outermost first
    fn ancestor_scope(&self, node: Node<'_>) -> Vec<&'s str> {
        let mut parts = Vec::new();
        let mut current = node.parent();
        while let Some(n) = current {
            if n.kind() == "namespace_definition" {
                parts.push(
                    n.child_by_field_name("name")
                        .map(|name| self.text(name))
                        .unwrap_or(ANONYMOUS_NAMESPACE),
                );
            } else if is_record(n.kind())
                && let Some(name) = n.child_by_field_name("name")
            {
                parts.push(self.text(name));
            }
            current = n.parent();
        }
        parts.reverse();
        parts
    }

    fn scope_attrs(scope: &[&str], name: &str) -> BTreeMap<AttrKey, AttrValue> {
        let mut attrs = BTreeMap::new();
        let scope = scope.join("::");
        let fqn = if scope.is_empty() {
            name.to_string()
        } else {
            format!("{}::{}", scope, name)
        };
        if !scope.is_empty() {
            attrs.insert(AttrKey::Scope, AttrValue::Text(scope));
        }
        attrs.insert(AttrKey::FullyQualifiedName, AttrValue::Text(fqn));
        attrs
    }

    fn container(&mut self, node: Node<'_>) {
        let Some(symbol_type) = container_type(node.kind()) else {
            return;
        };
        let name_node = node.child_by_field_name("name");
        let name = match name_node {
            Some(n) => self.text(n),
            None if symbol_type == SymbolType::Namespace => ANONYMOUS_NAMESPACE,
            None => ANONYMOUS,
        };

        let mut attrs = Self::scope_attrs(&self.ancestor_scope(node), name);
        if let Some(body) = node.child_by_field_name("body") {
            let p = body.start_position();
            attrs.insert(AttrKey::ContainerHeaderEndLine, AttrValue::Number(p.row as u32));
            attrs.insert(
                AttrKey::ContainerHeaderEndColumn,
                AttrValue::Number(p.column as u32),
            );
        }

        self.push(symbol_type, node, name_node, name, attrs);
    }

    fn callable(&mut self, node: Node<'_>, prototype: bool) {
        let Some(declarator) = node.child_by_field_name("declarator") else {
            return;
        };
        let Some(callable) = CallableName::resolve(declarator) else {
            return;
        };

        let symbol_type = if prototype {
            SymbolType::Prototype
        } else {
            let in_record = in_record_body(node);
            if node.child_by_field_name("type").is_none() {
                if has_descendant(callable.target, "destructor_name") {
                    SymbolType::Destructor
                } else if in_record || self.text(declarator).contains("::") {
                    SymbolType::Constructor
                } else {
                    SymbolType::Function
                }
            } else if in_record {
                SymbolType::Method
            } else {
                SymbolType::Function
            }
        };

        let name = self.text(callable.name);
        let mut scope = self.ancestor_scope(node);
        scope.extend(callable.qualifier.iter().map(|q| self.text(*q)));
        let mut attrs = Self::scope_attrs(&scope, name);

        let signature = self
            .source
            .get(node.start_byte()..callable.function.end_byte())
            .unwrap_or_default();
        attrs.insert(AttrKey::Signature, AttrValue::Text(signature.to_string()));

        self.push(symbol_type, node, Some(callable.name), name, attrs);
    }
}

/// Extract hydrated symbols from a C/C++ tree
pub fn extract_symbols(root: Node<'_>, source: &str) -> Vec<IndexSymbol> {
    let mut extractor = Extractor::new(source);
    extractor.walk(root);
    extractor.symbols
}

static BOILERPLATE_LINE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(//.*|\}[\s;]*(//.*)?|#\s*(endif|pragma\s+once|if|ifdef|ifndef|elif|else)\b.*)?$",
    )
    .ok()
});

/// Chunking rules for C/C++ sources
pub struct CppChunkStrategy;

impl CppChunkStrategy {
    fn is_directive(trimmed: &str) -> bool {
        let Some(rest) = trimmed.strip_prefix('#') else {
            return trimmed.starts_with("using ");
        };
        let rest = rest.trim_start();
        rest.starts_with("include") || rest.starts_with("pragma") || rest.starts_with("import")
    }

    /// Macro tested by an include guard opener: `#ifndef NAME` or `#if !defined(NAME)`
    fn guard_macro(trimmed: &str) -> Option<&str> {
        let rest = trimmed.strip_prefix('#')?.trim_start();
        let name = if let Some(name) = rest.strip_prefix("ifndef") {
            name
        } else {
            let cond = rest.strip_prefix("if")?.trim_start().strip_prefix('!')?;
            cond.trim_start().strip_prefix("defined")?
        };
        let name = name.trim().trim_start_matches('(').trim_end_matches(')').trim();
        (!name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_'))
            .then_some(name)
    }

    /// `#define NAME` with no replacement text
    fn defines_guard(trimmed: &str, guard: &str) -> bool {
        trimmed
            .strip_prefix('#')
            .map(str::trim_start)
            .and_then(|rest| rest.strip_prefix("define"))
            .is_some_and(|name| name.trim() == guard)
    }
}

impl ChunkStrategy for CppChunkStrategy {
    fn is_container(&self, symbol_type: SymbolType) -> bool {
        matches!(
            symbol_type,
            SymbolType::Class | SymbolType::Struct | SymbolType::Union | SymbolType::Enum
        ) || symbol_type.is_callable()
    }

    /// End of the license/comment header and include block.
    ///
    /// Comments directly attached to the first line of code stay out of the preamble.
    fn preamble_end(&self, lines: &[&str]) -> usize {
        let mut floor = 0;
        let mut first_code = lines.len();
        let mut in_block_comment = false;

        let mut guard_seen = false;
        let mut i = 0;
        while i < lines.len() {
            let trimmed = lines[i].trim();
            if in_block_comment {
                in_block_comment = !trimmed.contains("*/");
                i += 1;
                continue;
            }
            if trimmed.is_empty() || trimmed.starts_with("//") {
                i += 1;
                continue;
            }
            if trimmed.starts_with("/*") {
                in_block_comment = !trimmed.contains("*/");
                i += 1;
                continue;
            }
            if Self::is_directive(trimmed) {
                floor = i + 1;
                i += 1;
                continue;
            }
            // Only the first guard, and only when the next line defines its macro
            if !guard_seen
                && let Some(guard) = Self::guard_macro(trimmed)
                && lines
                    .get(i + 1)
                    .is_some_and(|next| Self::defines_guard(next.trim(), guard))
            {
                guard_seen = true;
                floor = i + 2;
                i += 2;
                continue;
            }
            first_code = i;
            break;
        }

        let mut end = first_code;
        while end > floor && !lines[end - 1].trim().is_empty() {
            end -= 1;
        }
        end
    }

    fn is_boilerplate(&self, text: &str) -> bool {
        let Some(line_re) = BOILERPLATE_LINE.as_ref() else {
            return false;
        };
        text.len() <= BOILERPLATE_MAX_CHARS && text.lines().all(|line| line_re.is_match(line))
    }

    fn gap_prefix(&self, file_path: &str) -> String {
        format!("// File: {}\n", file_path)
    }

    fn container_prefix(&self, ctx: &PrefixContext<'_>) -> String {
        let container = ctx.container;
        let mut prefix = format!(
            "// File: {}\n// {}: {}\n",
            ctx.file_path,
            container.symbol_type.label(),
            container.qualified_name()
        );
        if ctx.chunk_index > 0
            && container.symbol_type.is_callable()
            && let Some(signature) = container.attr_text(AttrKey::Signature)
        {
            let signature = signature.split_whitespace().collect::<Vec<_>>().join(" ");
            prefix.push_str(&format!("// Signature: {}\n", signature));
        }
        prefix
    }
}

/// Parser for C and C++ sources and headers
#[derive(Debug, Default, Clone, Copy)]
pub struct CppParser;

impl FileParser for CppParser {
    fn name(&self) -> &'static str {
        "cpp"
    }

    fn supported_extensions(&self) -> &'static [&'static str] {
        &[
            "c", "h", "cc", "cpp", "cxx", "c++", "hh", "hpp", "hxx", "h++", "inl", "ipp",
        ]
    }

    fn grammar(&self) -> Option<Grammar> {
        Some(Grammar::Cpp)
    }

    fn format_version(&self) -> u32 {
        CPP_FORMAT_VERSION
    }

    fn parse_cst(&self, root: Option<Node<'_>>, source: &str, file_path: &str) -> Vec<RawSymbol> {
        let Some(root) = root else {
            return Vec::new();
        };
        let symbols = extract_symbols(root, source);
        tracing::debug!("Extracted {} symbols from {}", symbols.len(), file_path);
        symbols.iter().map(RawSymbol::encode).collect()
    }

    fn compute_chunks(
        &self,
        lines: &[&str],
        symbols: &[IndexSymbol],
        file_path: &str,
    ) -> Vec<Chunk> {
        chunking::chunk_by_structure(&CppChunkStrategy, lines, symbols, file_path)
    }
}
