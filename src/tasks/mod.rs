//! Worker tasks: index a file, compute a file's chunks.
//!
//! The task functions are synchronous and CPU-bound. Async callers use the `spawn_*`
//! wrappers, which run them on tokio's blocking pool; batch callers use the rayon
//! helpers.

pub mod compute_chunks;
pub mod index_file;
pub mod walker;

pub use compute_chunks::{ComputeChunksOutcome, ComputeChunksRequest, compute_chunks};
pub use index_file::{IndexFileOutcome, IndexFileRequest, index_file};
pub use walker::{SourceFile, SourceWalker};

use crate::error::TaskError;
use rayon::prelude::*;

/// Run [`index_file`] on the blocking pool
pub async fn spawn_index_file(request: IndexFileRequest) -> IndexFileOutcome {
    match tokio::task::spawn_blocking(move || index_file(request)).await {
        Ok(outcome) => outcome,
        Err(e) => IndexFileOutcome::Failed {
            message: TaskError::Panicked(e.to_string()).to_string(),
        },
    }
}

/// Run [`compute_chunks`] on the blocking pool
pub async fn spawn_compute_chunks(request: ComputeChunksRequest) -> ComputeChunksOutcome {
    match tokio::task::spawn_blocking(move || compute_chunks(request)).await {
        Ok(outcome) => outcome,
        Err(e) => ComputeChunksOutcome::Failed {
            message: TaskError::Panicked(e.to_string()).to_string(),
        },
    }
}

/// Index many files in parallel; outcomes are returned in request order
pub fn index_files(requests: Vec<IndexFileRequest>) -> Vec<IndexFileOutcome> {
    requests.into_par_iter().map(index_file).collect()
}

/// Summary of a batch of [`IndexFileOutcome`]s
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IndexSummary {
    pub indexed: usize,
    pub up_to_date: usize,
    pub failed: usize,
    pub symbols: usize,
}

impl IndexSummary {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a IndexFileOutcome>) -> Self {
        outcomes
            .into_iter()
            .fold(Self::default(), |mut summary, outcome| {
                match outcome {
                    IndexFileOutcome::Indexed { symbols, .. } => {
                        summary.indexed += 1;
                        summary.symbols += symbols;
                    }
                    IndexFileOutcome::UpToDate { .. } => summary.up_to_date += 1,
                    IndexFileOutcome::Failed { .. } => summary.failed += 1,
                }
                summary
            })
    }
}
