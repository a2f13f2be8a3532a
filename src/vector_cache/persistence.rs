//! `vectors.bin` + `vectors_metadata.json`.
//!
//! `vectors.bin` holds raw native-endian `f32`s, one live run per file, in the order the
//! files are listed in the metadata. The saved layout is always compacted.

use super::{FileVectorEntries, VectorCache, VectorCacheOptions};
use crate::error::CacheError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

pub const CACHE_FORMAT_VERSION: u32 = 1;
pub const VECTORS_FILE: &str = "vectors.bin";
pub const METADATA_FILE: &str = "vectors_metadata.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedFile {
    pub file_path: String,
    pub ranges: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub version: u32,
    pub dims: usize,
    pub total_slots: usize,
    pub files: Vec<CachedFile>,
}

fn save_failed(dir: &Path, e: impl std::fmt::Display) -> CacheError {
    CacheError::SaveFailed {
        path: dir.display().to_string(),
        reason: e.to_string(),
    }
}

impl VectorCache {
    /// Write the live vectors and their metadata to `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| save_failed(dir, e))?;

        let files = self.files();
        let buffer = self.read_buffer()?;

        let vectors_path = dir.join(VECTORS_FILE);
        let file = File::create(&vectors_path).map_err(|e| save_failed(dir, e))?;
        let mut writer = BufWriter::new(file);
        for entry in &files {
            let run = buffer
                .slots(entry.start_slot as usize, entry.ranges.len())
                .ok_or(CacheError::SlotOutOfBounds {
                    slot: entry.start_slot as usize + entry.ranges.len(),
                    total: buffer.capacity(),
                })?;
            writer
                .write_all(bytemuck::cast_slice(run))
                .map_err(|e| save_failed(dir, e))?;
        }
        writer
            .into_inner()
            .map_err(|e| save_failed(dir, e))?
            .sync_all()
            .map_err(|e| save_failed(dir, e))?;

        let metadata = CacheMetadata {
            version: CACHE_FORMAT_VERSION,
            dims: self.dims,
            total_slots: self.live_count(),
            files: files
                .iter()
                .map(|f| CachedFile {
                    file_path: f.file_path.clone(),
                    ranges: f.ranges.clone(),
                })
                .collect(),
        };
        let json = serde_json::to_string(&metadata).context("Failed to serialize cache metadata")?;
        fs::write(dir.join(METADATA_FILE), json).map_err(|e| save_failed(dir, e))?;

        tracing::info!(
            "Saved vector cache to {:?} ({} vectors, {} files)",
            dir,
            metadata.total_slots,
            metadata.files.len()
        );
        Ok(())
    }

    /// Load a saved cache. `Ok(None)` when there is nothing usable in `dir` (missing
    /// files, other version or dimensions, inconsistent sizes); the caller rebuilds.
    pub fn load(dir: &Path, dims: usize, options: VectorCacheOptions) -> Result<Option<Self>> {
        let metadata_path = dir.join(METADATA_FILE);
        let Ok(json) = fs::read_to_string(&metadata_path) else {
            return Ok(None);
        };
        let metadata: CacheMetadata = match serde_json::from_str(&json) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Ignoring unreadable {:?}: {}", metadata_path, e);
                return Ok(None);
            }
        };
        if metadata.version != CACHE_FORMAT_VERSION || metadata.dims != dims {
            tracing::info!(
                "Vector cache at {:?} is version {} with {} dims, expected version {} with {} dims; rebuilding",
                dir,
                metadata.version,
                metadata.dims,
                CACHE_FORMAT_VERSION,
                dims
            );
            return Ok(None);
        }
        let listed: usize = metadata.files.iter().map(|f| f.ranges.len()).sum();
        let unique: HashSet<&str> = metadata.files.iter().map(|f| f.file_path.as_str()).collect();
        if listed != metadata.total_slots || unique.len() != metadata.files.len() {
            tracing::warn!(
                "Vector cache metadata is inconsistent ({} ranges for {} slots, {} files, {} distinct); rebuilding",
                listed,
                metadata.total_slots,
                metadata.files.len(),
                unique.len()
            );
            return Ok(None);
        }

        let vectors_path = dir.join(VECTORS_FILE);
        let Some(expected_bytes) = metadata
            .total_slots
            .checked_mul(dims)
            .and_then(|floats| floats.checked_mul(std::mem::size_of::<f32>()))
        else {
            tracing::warn!(
                "Vector cache size {} x {} overflows; rebuilding",
                metadata.total_slots,
                dims
            );
            return Ok(None);
        };
        let expected_bytes = expected_bytes as u64;
        match fs::metadata(&vectors_path) {
            Ok(m) if m.len() == expected_bytes => {}
            Ok(m) => {
                tracing::warn!(
                    "{:?} is {} bytes, expected {}; rebuilding",
                    vectors_path,
                    m.len(),
                    expected_bytes
                );
                return Ok(None);
            }
            Err(_) => return Ok(None),
        }

        let slots = metadata.total_slots.max(options.initial_slots);
        let mut cache = VectorCache::new(dims, VectorCacheOptions {
            initial_slots: slots,
            ..options
        })?;
        {
            let mut buffer = super::write_lock(&cache.buffer)?;
            let mut file = File::open(&vectors_path)
                .with_context(|| format!("Failed to open {:?}", vectors_path))?;
            file.read_exact(bytemuck::cast_slice_mut(
                &mut buffer.data[..metadata.total_slots * dims],
            ))
            .with_context(|| format!("Failed to read {:?}", vectors_path))?;
        }

        let mut next = 0usize;
        for file in metadata.files {
            let len = file.ranges.len();
            let owner: Arc<str> = Arc::from(file.file_path.as_str());
            for slot in &mut cache.owners[next..next + len] {
                *slot = Some(Arc::clone(&owner));
            }
            cache.files.insert(
                file.file_path.clone(),
                FileVectorEntries {
                    file_path: file.file_path,
                    start_slot: next as u32,
                    ranges: file.ranges,
                },
            );
            next += len;
        }
        cache.cursor = next;

        tracing::info!(
            "Loaded vector cache from {:?} ({} vectors, {} files)",
            dir,
            next,
            cache.files.len()
        );
        Ok(Some(cache))
    }
}
