//! On-disk symbol index: `[sha256, format_version, file_path, [symbols...]]`.
//!
//! Files are written to a temporary sibling and renamed into place, so readers never
//! observe a half-written index.

use super::types::RawSymbol;
use crate::error::ParseError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Bytes read by the staleness fast path
pub const HEADER_PEEK_LEN: u64 = 80;

const SHA256_HEX_LEN: usize = 64;

/// A parsed index file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFile(pub String, pub u32, pub String, pub Vec<RawSymbol>);

impl IndexFile {
    pub fn new(
        sha256: impl Into<String>,
        format_version: u32,
        file_path: impl Into<String>,
        symbols: Vec<RawSymbol>,
    ) -> Self {
        Self(sha256.into(), format_version, file_path.into(), symbols)
    }

    pub fn sha256(&self) -> &str {
        &self.0
    }

    pub fn format_version(&self) -> u32 {
        self.1
    }

    pub fn file_path(&self) -> &str {
        &self.2
    }

    pub fn symbols(&self) -> &[RawSymbol] {
        &self.3
    }

    pub fn into_symbols(self) -> Vec<RawSymbol> {
        self.3
    }

    /// Read and parse a whole index file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read index file {:?}", path))?;
        serde_json::from_str(&content).map_err(|e| {
            anyhow::Error::new(ParseError::MalformedIndex {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
        })
    }

    /// Write atomically: serialize to `<path>.tmp`, then rename over `path`.
    pub fn write_atomic(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create index directory")?;
        }

        let content = serde_json::to_vec(self).context("Failed to serialize index file")?;
        let tmp = temp_path(path);
        {
            let mut file = File::create(&tmp)
                .with_context(|| format!("Failed to create temporary index {:?}", tmp))?;
            file.write_all(&content)
                .context("Failed to write temporary index")?;
            file.sync_all().context("Failed to sync temporary index")?;
        }
        if let Err(e) = fs::rename(&tmp, path) {
            let _ = fs::remove_file(&tmp);
            return Err(e).with_context(|| format!("Failed to move index into place at {:?}", path));
        }

        tracing::debug!("Wrote index {:?} ({} symbols)", path, self.3.len());
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// The leading `sha256` and `format_version` of an index file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    pub sha256: String,
    pub format_version: u32,
}

/// Extract the header from the first bytes of an index file without parsing the rest.
///
/// Expects `["<64 hex>",<version>,` and returns `None` for anything else.
pub fn parse_header(bytes: &[u8]) -> Option<IndexHeader> {
    let rest = bytes.strip_prefix(b"[\"")?;
    if rest.len() < SHA256_HEX_LEN {
        return None;
    }
    let (hash, rest) = rest.split_at(SHA256_HEX_LEN);
    if !hash.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let rest = rest.strip_prefix(b"\",")?;
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || rest.get(digits) != Some(&b',') {
        return None;
    }
    let format_version = std::str::from_utf8(&rest[..digits]).ok()?.parse().ok()?;

    Some(IndexHeader {
        sha256: String::from_utf8(hash.to_vec()).ok()?,
        format_version,
    })
}

/// Read only the header of the index at `path`. `None` if missing or unrecognized.
pub fn read_header(path: &Path) -> Option<IndexHeader> {
    let file = File::open(path).ok()?;
    let mut head = Vec::with_capacity(HEADER_PEEK_LEN as usize);
    file.take(HEADER_PEEK_LEN).read_to_end(&mut head).ok()?;
    parse_header(&head)
}

/// Whether the index at `path` matches the given content hash and format version
pub fn is_up_to_date(path: &Path, sha256: &str, format_version: u32) -> bool {
    read_header(path)
        .is_some_and(|h| h.sha256 == sha256 && h.format_version == format_version)
}

/// Index location for a source file: `<index_dir>/<first 16 hex of sha256(path)>.idx`
pub fn index_path_for(index_dir: &Path, file_path: &str) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    index_dir.join(format!("{}.idx", &hash[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::chunking::sha256_hex;
    use tempfile::TempDir;

    fn sample() -> IndexFile {
        IndexFile::new(
            sha256_hex("int main() {}"),
            3,
            "/src/main.cpp",
            vec![RawSymbol {
                nums: vec![20, 0, 0, 0, 13, 0, 4, 0, 8],
                strings: vec!["main".to_string()],
            }],
        )
    }

    #[test]
    fn test_write_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("a.idx");
        let index = sample();
        index.write_atomic(&path).unwrap();

        let loaded = IndexFile::load(&path).unwrap();
        assert_eq!(loaded, index);
        assert_eq!(loaded.file_path(), "/src/main.cpp");

        // No temporary file left behind
        let entries: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_header_fast_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.idx");
        let index = sample();
        index.write_atomic(&path).unwrap();

        let header = read_header(&path).unwrap();
        assert_eq!(header.sha256, index.sha256());
        assert_eq!(header.format_version, 3);
        assert!(is_up_to_date(&path, index.sha256(), 3));
        assert!(!is_up_to_date(&path, index.sha256(), 4));
        assert!(!is_up_to_date(&path, &sha256_hex("other"), 3));
    }

    #[test]
    fn test_parse_header_rejects_garbage() {
        assert!(parse_header(b"").is_none());
        assert!(parse_header(b"{\"sha\":1}").is_none());
        assert!(parse_header(b"[\"abc\",1,").is_none());

        let bad_hex = format!("[\"{}\",1,", "z".repeat(64));
        assert!(parse_header(bad_hex.as_bytes()).is_none());

        let no_version = format!("[\"{}\",,", "a".repeat(64));
        assert!(parse_header(no_version.as_bytes()).is_none());

        // Version cut off by the header window
        let truncated = format!("[\"{}\",12", "a".repeat(64));
        assert!(parse_header(truncated.as_bytes()).is_none());
    }

    #[test]
    fn test_missing_index_is_stale() {
        let dir = TempDir::new().unwrap();
        assert!(read_header(&dir.path().join("missing.idx")).is_none());
        assert!(!is_up_to_date(&dir.path().join("missing.idx"), "abc", 1));
    }

    #[test]
    fn test_load_malformed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.idx");
        fs::write(&path, "[\"abc\", \"not a number\"]").unwrap();
        let err = IndexFile::load(&path).unwrap_err();
        assert!(err.to_string().contains("Malformed index file"));
    }

    #[test]
    fn test_index_path_for_is_stable() {
        let dir = Path::new("/tmp/idx");
        let a = index_path_for(dir, "/src/a.cpp");
        let b = index_path_for(dir, "/src/a.cpp");
        let c = index_path_for(dir, "/src/b.cpp");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.file_name().unwrap().len(), 16 + 4);
    }
}
