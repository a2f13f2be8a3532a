//! In-memory vector cache: one contiguous `f32` buffer of fixed-width slots.
//!
//! Each file owns a contiguous run of slots. Re-adding a file with no more vectors than
//! before overwrites its run in place; otherwise the old run is released and the new
//! vectors are appended at the cursor. Released slots stay dead until [`VectorCache::compact`].
//!
//! Readers obtain a [`VectorBufferHandle`] and read slots under a shared read guard.
//! Every reallocation or compaction bumps the buffer epoch, which handle holders can
//! observe through a `tokio::sync::watch` channel.

mod persistence;

pub use persistence::{CACHE_FORMAT_VERSION, CacheMetadata, CachedFile, METADATA_FILE, VECTORS_FILE};

use crate::error::CacheError;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

pub const DEFAULT_INITIAL_SLOTS: usize = 1024;
pub const DEFAULT_GROWTH_FACTOR: f64 = 2.0;

/// Sizing knobs for a [`VectorCache`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorCacheOptions {
    pub initial_slots: usize,
    /// Capacity multiplier on growth, must be > 1.0
    pub growth_factor: f64,
}

impl Default for VectorCacheOptions {
    fn default() -> Self {
        Self {
            initial_slots: DEFAULT_INITIAL_SLOTS,
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }
}

/// The shared slot buffer
#[derive(Debug)]
pub struct SlotBuffer {
    epoch: u64,
    dims: usize,
    data: Vec<f32>,
}

impl SlotBuffer {
    fn new(dims: usize, slots: usize) -> Self {
        Self {
            epoch: 0,
            dims,
            data: vec![0.0; slots * dims],
        }
    }

    /// Bumped on every reallocation or compaction
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Allocated slots
    pub fn capacity(&self) -> usize {
        self.data.len() / self.dims
    }

    /// Raw slot contents, live or dead
    pub fn slot(&self, slot: usize) -> Option<&[f32]> {
        let start = slot.checked_mul(self.dims)?;
        self.data.get(start..start + self.dims)
    }

    /// Contiguous view over `count` slots starting at `start`
    pub fn slots(&self, start: usize, count: usize) -> Option<&[f32]> {
        self.data
            .get(start * self.dims..(start + count) * self.dims)
    }

    fn slot_mut(&mut self, slot: usize) -> &mut [f32] {
        let start = slot * self.dims;
        &mut self.data[start..start + self.dims]
    }
}

/// Cheap, cloneable read access to a cache's buffer.
///
/// The handle points at the shared lock rather than at a particular allocation, so it
/// stays valid across growth and compaction.
#[derive(Debug, Clone)]
pub struct VectorBufferHandle {
    buffer: Arc<RwLock<SlotBuffer>>,
    epoch: watch::Receiver<u64>,
}

impl VectorBufferHandle {
    pub fn read(&self) -> Result<RwLockReadGuard<'_, SlotBuffer>, CacheError> {
        self.buffer
            .read()
            .map_err(|e| CacheError::LockPoisoned(e.to_string()))
    }

    /// Latest published epoch
    pub fn epoch(&self) -> u64 {
        *self.epoch.borrow()
    }

    /// Whether the epoch moved since this handle last observed it
    pub fn has_changed(&self) -> bool {
        self.epoch.has_changed().unwrap_or(true)
    }

    /// Wait for the next epoch bump
    pub async fn changed(&mut self) -> Result<u64, CacheError> {
        self.epoch.changed().await.map_err(|_| CacheError::Closed)?;
        Ok(*self.epoch.borrow_and_update())
    }
}

fn write_lock(buffer: &RwLock<SlotBuffer>) -> Result<RwLockWriteGuard<'_, SlotBuffer>, CacheError> {
    buffer
        .write()
        .map_err(|e| CacheError::LockPoisoned(e.to_string()))
}

/// One file's contiguous run of slots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileVectorEntries {
    pub file_path: String,
    pub start_slot: u32,
    /// `ranges[i]` is the (start_line, end_line) of the vector in slot `start_slot + i`
    pub ranges: Vec<(u32, u32)>,
}

impl FileVectorEntries {
    pub fn slot_range(&self) -> std::ops::Range<usize> {
        let start = self.start_slot as usize;
        start..start + self.ranges.len()
    }
}

/// Contiguous-slot vector cache
#[derive(Debug)]
pub struct VectorCache {
    dims: usize,
    growth_factor: f64,
    buffer: Arc<RwLock<SlotBuffer>>,
    epoch_tx: watch::Sender<u64>,
    files: HashMap<String, FileVectorEntries>,
    /// Slot → owning file, `None` when dead or unused
    owners: Vec<Option<Arc<str>>>,
    /// First never-written slot
    cursor: usize,
}

impl VectorCache {
    pub fn new(dims: usize, options: VectorCacheOptions) -> Result<Self, CacheError> {
        if dims == 0 {
            return Err(CacheError::DimensionMismatch {
                expected: 1,
                actual: 0,
            });
        }
        let growth_factor = if options.growth_factor > 1.0 {
            options.growth_factor
        } else {
            tracing::warn!(
                "Growth factor {} is not above 1.0, using {}",
                options.growth_factor,
                DEFAULT_GROWTH_FACTOR
            );
            DEFAULT_GROWTH_FACTOR
        };
        let (epoch_tx, _) = watch::channel(0);

        Ok(Self {
            dims,
            growth_factor,
            buffer: Arc::new(RwLock::new(SlotBuffer::new(dims, options.initial_slots))),
            epoch_tx,
            files: HashMap::new(),
            owners: vec![None; options.initial_slots],
            cursor: 0,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn handle(&self) -> VectorBufferHandle {
        VectorBufferHandle {
            buffer: Arc::clone(&self.buffer),
            epoch: self.epoch_tx.subscribe(),
        }
    }

    pub fn epoch(&self) -> u64 {
        *self.epoch_tx.borrow()
    }

    pub fn capacity(&self) -> usize {
        self.owners.len()
    }

    /// Slots ever written since the last compaction (live + dead)
    pub fn used_slots(&self) -> usize {
        self.cursor
    }

    pub fn live_count(&self) -> usize {
        self.files.values().map(|f| f.ranges.len()).sum()
    }

    pub fn dead_count(&self) -> usize {
        self.cursor - self.live_count()
    }

    /// Dead slots over used slots; 0.0 when nothing has been written
    pub fn fragmentation_ratio(&self) -> f64 {
        if self.cursor == 0 {
            return 0.0;
        }
        self.dead_count() as f64 / self.cursor as f64
    }

    pub fn entries(&self, file_path: &str) -> Option<&FileVectorEntries> {
        self.files.get(file_path)
    }

    /// All files, in slot order
    pub fn files(&self) -> Vec<&FileVectorEntries> {
        let mut files: Vec<&FileVectorEntries> = self.files.values().collect();
        files.sort_by_key(|f| f.start_slot);
        files
    }

    /// File owning `slot`, if the slot is live
    pub fn owner(&self, slot: usize) -> Option<&str> {
        self.owners.get(slot)?.as_deref()
    }

    /// Copy of a live slot's vector; `Ok(None)` for a dead slot
    pub fn vector(&self, slot: usize) -> Result<Option<Vec<f32>>, CacheError> {
        if slot >= self.cursor {
            return Err(CacheError::SlotOutOfBounds {
                slot,
                total: self.cursor,
            });
        }
        if self.owners[slot].is_none() {
            return Ok(None);
        }
        let buffer = self.read_buffer()?;
        Ok(buffer.slot(slot).map(<[f32]>::to_vec))
    }

    fn read_buffer(&self) -> Result<RwLockReadGuard<'_, SlotBuffer>, CacheError> {
        self.buffer
            .read()
            .map_err(|e| CacheError::LockPoisoned(e.to_string()))
    }

    fn publish_epoch(&self, buffer: &mut SlotBuffer) {
        buffer.epoch += 1;
        self.epoch_tx.send_replace(buffer.epoch);
    }

    /// Store a file's vectors, replacing whatever it had. Returns the file's start slot.
    pub fn add(
        &mut self,
        file_path: &str,
        vectors: &[Vec<f32>],
        ranges: &[(u32, u32)],
    ) -> Result<u32, CacheError> {
        if vectors.len() != ranges.len() {
            return Err(CacheError::RangeCountMismatch {
                vectors: vectors.len(),
                ranges: ranges.len(),
            });
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(CacheError::DimensionMismatch {
                expected: self.dims,
                actual: bad.len(),
            });
        }
        if vectors.is_empty() {
            self.delete_file(file_path);
            return Ok(self.cursor as u32);
        }

        if let Some(existing) = self.files.get(file_path)
            && vectors.len() <= existing.ranges.len()
        {
            let start = existing.start_slot as usize;
            let old_len = existing.ranges.len();
            {
                let mut buffer = write_lock(&self.buffer)?;
                for (i, vector) in vectors.iter().enumerate() {
                    buffer.slot_mut(start + i).copy_from_slice(vector);
                }
            }
            for owner in &mut self.owners[start + vectors.len()..start + old_len] {
                *owner = None;
            }
            if let Some(entry) = self.files.get_mut(file_path) {
                entry.ranges = ranges.to_vec();
            }
            tracing::debug!(
                "Overwrote {} vectors for {} in place ({} slots released)",
                vectors.len(),
                file_path,
                old_len - vectors.len()
            );
            return Ok(start as u32);
        }

        self.delete_file(file_path);
        let start = self.cursor;
        self.ensure_capacity(start + vectors.len())?;
        {
            let mut buffer = write_lock(&self.buffer)?;
            for (i, vector) in vectors.iter().enumerate() {
                buffer.slot_mut(start + i).copy_from_slice(vector);
            }
        }

        let owner: Arc<str> = Arc::from(file_path);
        for slot in &mut self.owners[start..start + vectors.len()] {
            *slot = Some(Arc::clone(&owner));
        }
        self.cursor += vectors.len();
        self.files.insert(
            file_path.to_string(),
            FileVectorEntries {
                file_path: file_path.to_string(),
                start_slot: start as u32,
                ranges: ranges.to_vec(),
            },
        );
        tracing::debug!("Appended {} vectors for {} at slot {}", vectors.len(), file_path, start);
        Ok(start as u32)
    }

    /// Forget a file. Its slots become dead; the data stays until compaction.
    pub fn delete_file(&mut self, file_path: &str) -> bool {
        let Some(entry) = self.files.remove(file_path) else {
            return false;
        };
        for owner in &mut self.owners[entry.slot_range()] {
            *owner = None;
        }
        true
    }

    fn ensure_capacity(&mut self, required: usize) -> Result<(), CacheError> {
        let capacity = self.capacity();
        if required <= capacity {
            return Ok(());
        }
        let grown = (capacity as f64 * self.growth_factor).ceil() as usize;
        let new_capacity = grown.max(required);

        let mut buffer = write_lock(&self.buffer)?;
        buffer.data.resize(new_capacity * self.dims, 0.0);
        self.owners.resize(new_capacity, None);
        self.publish_epoch(&mut buffer);
        tracing::debug!(
            "Grew vector cache from {} to {} slots (epoch {})",
            capacity,
            new_capacity,
            buffer.epoch
        );
        Ok(())
    }

    /// Move every live run to the front of the buffer, in slot order
    pub fn compact(&mut self) -> Result<(), CacheError> {
        let mut order: Vec<(u32, String)> = self
            .files
            .values()
            .map(|f| (f.start_slot, f.file_path.clone()))
            .collect();
        order.sort_unstable();

        let dims = self.dims;
        let mut buffer = write_lock(&self.buffer)?;
        let mut owners: Vec<Option<Arc<str>>> = vec![None; self.owners.len()];
        let mut next = 0usize;
        for (_, path) in order {
            let Some(entry) = self.files.get_mut(&path) else {
                continue;
            };
            let len = entry.ranges.len();
            let from = entry.start_slot as usize;
            if from != next {
                // next < from, so the forward copy never clobbers unread data
                buffer
                    .data
                    .copy_within(from * dims..(from + len) * dims, next * dims);
            }
            let owner: Arc<str> = Arc::from(path.as_str());
            for slot in &mut owners[next..next + len] {
                *slot = Some(Arc::clone(&owner));
            }
            entry.start_slot = next as u32;
            next += len;
        }

        let reclaimed = self.cursor - next;
        self.owners = owners;
        self.cursor = next;
        self.publish_epoch(&mut buffer);
        tracing::info!(
            "Compacted vector cache: {} live slots, {} reclaimed (epoch {})",
            next,
            reclaimed,
            buffer.epoch
        );
        Ok(())
    }
}
