//! Normalized vector storage.
//!
//! Five tables: `vectors`, `file_paths`, `file_chunks`, `links` and `shadow_chunks`.
//! Every vector belongs to exactly one file chunk or shadow chunk and is reachable
//! through at least one link; search resolves raw vector hits through the links back to
//! file chunks. Multi-step writes are not transactional, [`VectorDatabase::check_integrity`]
//! with `repair = true` is the recovery path.

pub mod lance_client;
pub use lance_client::LanceVectorDB;

use anyhow::Result;
use serde::Serialize;

/// A file chunk to insert, with its embedding
#[derive(Debug, Clone)]
pub struct NewFileChunk {
    pub file_path: String,
    /// 1-based inclusive
    pub start_line: u32,
    pub end_line: u32,
    pub sha256: String,
    pub vector: Vec<f32>,
}

/// An extra embedding (summary, docstring...) that resolves to an existing file chunk
#[derive(Debug, Clone)]
pub struct NewShadowChunk {
    pub file_chunk_id: u64,
    pub text: String,
    pub vector: Vec<f32>,
}

/// A stored file chunk row with its path resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileChunkRecord {
    pub id: u64,
    pub file_path_id: u64,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub sha256: String,
    pub vector_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileChunkSearchResult {
    pub file_chunk_id: u64,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub sha256: String,
    /// Cosine distance of the closest vector linked to this chunk
    pub distance: f32,
}

/// Row counts per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub vectors: usize,
    pub file_paths: usize,
    pub file_chunks: usize,
    pub links: usize,
    pub shadow_chunks: usize,
}

/// Referential-integrity findings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Vectors owned by no chunk or reachable through no link
    pub orphaned_vectors: usize,
    /// Links pointing at a missing vector or file chunk
    pub dangling_links: usize,
    /// Shadow chunks whose file chunk is gone
    pub orphaned_shadow_chunks: usize,
    /// Paths no file chunk refers to
    pub orphaned_file_paths: usize,
    /// File chunks whose path or vector is gone
    pub dangling_file_chunks: usize,
    pub repaired: bool,
}

impl IntegrityReport {
    pub fn total(&self) -> usize {
        self.orphaned_vectors
            + self.dangling_links
            + self.orphaned_shadow_chunks
            + self.orphaned_file_paths
            + self.dangling_file_chunks
    }

    pub fn is_clean(&self) -> bool {
        self.total() == 0
    }
}

/// Trait for the normalized vector store
#[async_trait::async_trait]
pub trait VectorDatabase: Send + Sync {
    /// Embedding width every vector must have
    fn dimensions(&self) -> usize;

    /// Insert file chunks and their vectors; returns the new file chunk ids in order
    async fn add_file_chunks(&self, chunks: Vec<NewFileChunk>) -> Result<Vec<u64>>;

    /// Insert shadow chunks; returns the new vector ids in order.
    ///
    /// Fails with `FileChunkNotFound` before writing anything if a target chunk is missing.
    async fn add_shadow_chunks(&self, shadows: Vec<NewShadowChunk>) -> Result<Vec<u64>>;

    /// File chunks of one path, sorted by start line
    async fn get_file_chunks_for_path(&self, file_path: &str) -> Result<Vec<FileChunkRecord>>;

    /// Patch the line range of a chunk after an edit shifted it
    async fn update_file_chunk_lines(&self, id: u64, start_line: u32, end_line: u32)
    -> Result<()>;

    /// Delete file chunks with their vectors, links and shadow chunks, plus any path
    /// left without chunks. Returns the number of file chunks that existed.
    async fn delete_file_chunks(&self, ids: &[u64]) -> Result<usize>;

    /// Delete every chunk of a path, then the path itself
    async fn delete_file_chunks_for_path(&self, file_path: &str) -> Result<usize>;

    /// Nearest file chunks to `query`, closest first
    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<FileChunkSearchResult>>;

    async fn count_file_chunks(&self) -> Result<usize>;

    async fn count_vectors(&self) -> Result<usize>;

    async fn statistics(&self) -> Result<DatabaseStats>;

    /// Scan foreign keys for violations; delete offenders when `repair` is set
    async fn check_integrity(&self, repair: bool) -> Result<IntegrityReport>;

    /// Compact every table
    async fn compact(&self) -> Result<()>;

    /// Delete all rows from every table
    async fn clear(&self) -> Result<()>;
}
