//! # Symbol RAG - structural indexing and vector storage for code retrieval
//!
//! Parses source files into structural symbols with tree-sitter, derives overlapping
//! chunks aligned to that structure for embedding, and stores the embeddings in a
//! normalized LanceDB schema with referential-integrity checking. A separate in-memory
//! slot cache keeps raw vectors in one contiguous buffer for cheap cross-thread reads.
//!
//! ## Architecture
//!
//! ```text
//!  source file ──► parser (C/C++, Markdown, plain text) ──► .idx symbol index
//!                                                              │
//!                              compute_chunks ◄────────────────┘
//!                                    │
//!                              Chunk { text, lines, sha256 }
//!                                    │  (embedded by the caller)
//!                    ┌───────────────┴───────────────┐
//!                    ▼                               ▼
//!        LanceVectorDB (5 tables)            VectorCache (slots)
//! ```
//!
//! ## Modules
//!
//! - [`parser`]: grammars, symbol extraction, index files and structure-aware chunking
//! - [`tasks`]: the index-file and compute-chunks tasks plus the source walker
//! - [`vector_db`]: normalized vector storage over LanceDB
//! - [`vector_cache`]: contiguous slot cache with save/load
//! - [`config`]: configuration with environment variable overrides
//! - [`error`]: error types
//! - [`paths`]: platform default locations
//!
//! ## Usage Example
//!
//! ```no_run
//! use symbol_rag::tasks::{ComputeChunksOutcome, ComputeChunksRequest, compute_chunks};
//!
//! let outcome = compute_chunks(ComputeChunksRequest {
//!     file_path: "/src/player.cpp".to_string(),
//!     content: None,
//!     index_path: "/tmp/index/player.idx".into(),
//! });
//! if let ComputeChunksOutcome::Chunks { chunks, .. } = outcome {
//!     for chunk in chunks {
//!         println!("{}-{} {}", chunk.start_line, chunk.end_line, chunk.sha256);
//!     }
//! }
//! ```

/// Configuration management with environment variable overrides
pub mod config;

/// Error types
pub mod error;

/// Source parsers, symbol index files and chunking
pub mod parser;

/// Platform-specific default locations
pub mod paths;

/// Worker tasks and the source walker
pub mod tasks;

/// In-memory contiguous vector cache
pub mod vector_cache;

/// Normalized vector database
pub mod vector_db;
