//! Symbol model shared by every language parser.
//!
//! `RawSymbol` is the compact positional form written to disk, `IndexSymbol` the
//! uniform hydrated form every consumer works with.

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of an extracted symbol.
///
/// The numeric values are persisted in index files. Bands are spaced by ten so new
/// kinds can be inserted next to their relatives; never reorder or reuse a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolType {
    Namespace,
    Class,
    Struct,
    Union,
    Enum,
    Function,
    Method,
    Constructor,
    Destructor,
    Prototype,
    SourceInclude,
    Comment,
    Macro,
    Heading1,
    Heading2,
}

impl SymbolType {
    /// Persisted numeric tag
    pub fn code(self) -> i64 {
        match self {
            // containers
            Self::Namespace => 10,
            Self::Class => 11,
            Self::Struct => 12,
            Self::Union => 13,
            Self::Enum => 14,
            // callables
            Self::Function => 20,
            Self::Method => 21,
            Self::Constructor => 22,
            Self::Destructor => 23,
            Self::Prototype => 24,
            // directives
            Self::SourceInclude => 30,
            // misc
            Self::Comment => 40,
            Self::Macro => 41,
            // documents
            Self::Heading1 => 50,
            Self::Heading2 => 51,
        }
    }

    /// Inverse of [`SymbolType::code`]; `None` for tags this build does not know
    pub fn from_code(code: i64) -> Option<Self> {
        let ty = match code {
            10 => Self::Namespace,
            11 => Self::Class,
            12 => Self::Struct,
            13 => Self::Union,
            14 => Self::Enum,
            20 => Self::Function,
            21 => Self::Method,
            22 => Self::Constructor,
            23 => Self::Destructor,
            24 => Self::Prototype,
            30 => Self::SourceInclude,
            40 => Self::Comment,
            41 => Self::Macro,
            50 => Self::Heading1,
            51 => Self::Heading2,
            _ => return None,
        };
        Some(ty)
    }

    /// Function-like symbols that have a body and a signature
    pub fn is_callable(self) -> bool {
        matches!(
            self,
            Self::Function | Self::Method | Self::Constructor | Self::Destructor
        )
    }

    /// Human readable label, used in chunk prefixes
    pub fn label(self) -> &'static str {
        match self {
            Self::Namespace => "Namespace",
            Self::Class => "Class",
            Self::Struct => "Struct",
            Self::Union => "Union",
            Self::Enum => "Enum",
            Self::Function => "Function",
            Self::Method => "Method",
            Self::Constructor => "Constructor",
            Self::Destructor => "Destructor",
            Self::Prototype => "Prototype",
            Self::SourceInclude => "Include",
            Self::Comment => "Comment",
            Self::Macro => "Macro",
            Self::Heading1 => "Heading",
            Self::Heading2 => "Heading",
        }
    }
}

/// Keys of the type-specific attribute map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttrKey {
    Scope,
    FullyQualifiedName,
    Signature,
    ContainerHeaderEndLine,
    ContainerHeaderEndColumn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Text(String),
    Number(u32),
}

impl AttrValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(s) => Some(s),
            AttrValue::Number(_) => None,
        }
    }

    pub fn as_number(&self) -> Option<u32> {
        match self {
            AttrValue::Number(n) => Some(*n),
            AttrValue::Text(_) => None,
        }
    }
}

/// Hydrated symbol. Positions are 0-based, columns end-exclusive.
///
/// Every symbol has the same field set; anything type-specific lives in `attrs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSymbol {
    pub symbol_type: SymbolType,
    pub name: String,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub name_start_line: u32,
    pub name_start_column: u32,
    pub name_end_line: u32,
    pub name_end_column: u32,
    pub attrs: BTreeMap<AttrKey, AttrValue>,
}

impl IndexSymbol {
    pub fn start(&self) -> (u32, u32) {
        (self.start_line, self.start_column)
    }

    pub fn end(&self) -> (u32, u32) {
        (self.end_line, self.end_column)
    }

    pub fn name_start(&self) -> (u32, u32) {
        (self.name_start_line, self.name_start_column)
    }

    pub fn name_end(&self) -> (u32, u32) {
        (self.name_end_line, self.name_end_column)
    }

    pub fn attr_text(&self, key: AttrKey) -> Option<&str> {
        self.attrs.get(&key).and_then(AttrValue::as_text)
    }

    /// Fully qualified name when present, the bare name otherwise
    pub fn qualified_name(&self) -> &str {
        self.attr_text(AttrKey::FullyQualifiedName)
            .unwrap_or(&self.name)
    }
}

/// Width of the fixed positional prefix of every `nums` array
pub const NUMS_PREFIX_LEN: usize = 9;

/// Tagged optional fields that may follow the positional prefix.
///
/// String payloads are indexes into the symbol's `strings` array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumsField {
    Scope(usize),
    FullyQualifiedName(usize),
    Signature(usize),
    ContainerHeaderEnd { line: u32, column: u32 },
}

impl NumsField {
    pub const SCOPE: i64 = 1;
    pub const FULLY_QUALIFIED_NAME: i64 = 2;
    pub const SIGNATURE: i64 = 3;
    pub const CONTAINER_HEADER_END: i64 = 4;

    /// Payload width for a marker, `None` if the marker is unknown
    pub fn payload_width(marker: i64) -> Option<usize> {
        match marker {
            Self::SCOPE | Self::FULLY_QUALIFIED_NAME | Self::SIGNATURE => Some(1),
            Self::CONTAINER_HEADER_END => Some(2),
            _ => None,
        }
    }

    fn decode(marker: i64, payload: &[i64]) -> Option<Self> {
        let field = match marker {
            Self::SCOPE => Self::Scope(usize::try_from(payload[0]).ok()?),
            Self::FULLY_QUALIFIED_NAME => {
                Self::FullyQualifiedName(usize::try_from(payload[0]).ok()?)
            }
            Self::SIGNATURE => Self::Signature(usize::try_from(payload[0]).ok()?),
            Self::CONTAINER_HEADER_END => Self::ContainerHeaderEnd {
                line: u32::try_from(payload[0]).ok()?,
                column: u32::try_from(payload[1]).ok()?,
            },
            _ => return None,
        };
        Some(field)
    }

    fn encode(self, out: &mut Vec<i64>) {
        match self {
            Self::Scope(idx) => out.extend([Self::SCOPE, idx as i64]),
            Self::FullyQualifiedName(idx) => out.extend([Self::FULLY_QUALIFIED_NAME, idx as i64]),
            Self::Signature(idx) => out.extend([Self::SIGNATURE, idx as i64]),
            Self::ContainerHeaderEnd { line, column } => {
                out.extend([Self::CONTAINER_HEADER_END, line as i64, column as i64])
            }
        }
    }
}

/// On-disk symbol: `[nums]` or `[nums, strings]`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RawSymbol {
    pub nums: Vec<i64>,
    pub strings: Vec<String>,
}

impl RawSymbol {
    /// Encode a hydrated symbol. `strings[0]` is always the name.
    pub fn encode(symbol: &IndexSymbol) -> Self {
        let mut nums = Vec::with_capacity(NUMS_PREFIX_LEN + 6);
        nums.extend(
            [
                symbol.start_line,
                symbol.start_column,
                symbol.end_line,
                symbol.end_column,
                symbol.name_start_line,
                symbol.name_start_column,
                symbol.name_end_line,
                symbol.name_end_column,
            ]
            .map(i64::from),
        );
        nums.insert(0, symbol.symbol_type.code());

        let mut strings = vec![symbol.name.clone()];
        let push_text = |key: AttrKey, strings: &mut Vec<String>| {
            symbol.attr_text(key).map(|text| {
                strings.push(text.to_string());
                strings.len() - 1
            })
        };

        if let Some(idx) = push_text(AttrKey::Scope, &mut strings) {
            NumsField::Scope(idx).encode(&mut nums);
        }
        if let Some(idx) = push_text(AttrKey::FullyQualifiedName, &mut strings) {
            NumsField::FullyQualifiedName(idx).encode(&mut nums);
        }
        if let Some(idx) = push_text(AttrKey::Signature, &mut strings) {
            NumsField::Signature(idx).encode(&mut nums);
        }
        let header_line = symbol
            .attrs
            .get(&AttrKey::ContainerHeaderEndLine)
            .and_then(AttrValue::as_number);
        let header_column = symbol
            .attrs
            .get(&AttrKey::ContainerHeaderEndColumn)
            .and_then(AttrValue::as_number);
        if let (Some(line), Some(column)) = (header_line, header_column) {
            NumsField::ContainerHeaderEnd { line, column }.encode(&mut nums);
        }

        Self { nums, strings }
    }

    /// Tagged fields following the positional prefix, in order.
    ///
    /// Stops at the first unknown marker or truncated payload.
    pub fn fields(&self) -> Vec<NumsField> {
        let mut fields = Vec::new();
        let mut pos = NUMS_PREFIX_LEN;
        while pos < self.nums.len() {
            let marker = self.nums[pos];
            let Some(width) = NumsField::payload_width(marker) else {
                break;
            };
            let payload_end = pos + 1 + width;
            if payload_end > self.nums.len() {
                break;
            }
            let Some(field) = NumsField::decode(marker, &self.nums[pos + 1..payload_end]) else {
                break;
            };
            fields.push(field);
            pos = payload_end;
        }
        fields
    }

    /// Hydrate into an [`IndexSymbol`]. `None` for short arrays or unknown types.
    pub fn hydrate(&self) -> Option<IndexSymbol> {
        if self.nums.len() < NUMS_PREFIX_LEN {
            return None;
        }
        let symbol_type = SymbolType::from_code(self.nums[0])?;
        let mut pos = [0u32; 8];
        for (slot, value) in pos.iter_mut().zip(&self.nums[1..NUMS_PREFIX_LEN]) {
            *slot = u32::try_from(*value).ok()?;
        }

        let text = |idx: usize| self.strings.get(idx).cloned().map(AttrValue::Text);
        let mut attrs = BTreeMap::new();
        for field in self.fields() {
            match field {
                NumsField::Scope(idx) => {
                    if let Some(v) = text(idx) {
                        attrs.insert(AttrKey::Scope, v);
                    }
                }
                NumsField::FullyQualifiedName(idx) => {
                    if let Some(v) = text(idx) {
                        attrs.insert(AttrKey::FullyQualifiedName, v);
                    }
                }
                NumsField::Signature(idx) => {
                    if let Some(v) = text(idx) {
                        attrs.insert(AttrKey::Signature, v);
                    }
                }
                NumsField::ContainerHeaderEnd { line, column } => {
                    attrs.insert(AttrKey::ContainerHeaderEndLine, AttrValue::Number(line));
                    attrs.insert(AttrKey::ContainerHeaderEndColumn, AttrValue::Number(column));
                }
            }
        }

        Some(IndexSymbol {
            symbol_type,
            name: self.strings.first().cloned().unwrap_or_default(),
            start_line: pos[0],
            start_column: pos[1],
            end_line: pos[2],
            end_column: pos[3],
            name_start_line: pos[4],
            name_start_column: pos[5],
            name_end_line: pos[6],
            name_end_column: pos[7],
            attrs,
        })
    }
}

impl Serialize for RawSymbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.strings.is_empty() { 1 } else { 2 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.nums)?;
        if !self.strings.is_empty() {
            seq.serialize_element(&self.strings)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for RawSymbol {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawSymbolVisitor;

        impl<'de> Visitor<'de> for RawSymbolVisitor {
            type Value = RawSymbol;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("[nums] or [nums, strings]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<RawSymbol, A::Error> {
                let nums: Vec<i64> = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let strings: Vec<String> = seq.next_element()?.unwrap_or_default();
                // Trailing elements written by newer formats are ignored.
                while seq.next_element::<de::IgnoredAny>()?.is_some() {}
                Ok(RawSymbol { nums, strings })
            }
        }

        deserializer.deserialize_seq(RawSymbolVisitor)
    }
}

/// A text slice of a file, ready for embedding. Lines are 1-based inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub start_line: u32,
    pub end_line: u32,
    /// Context prefix followed by the raw text
    pub text: String,
    /// SHA-256 (hex) of the raw text, independent of the prefix
    pub sha256: String,
}
