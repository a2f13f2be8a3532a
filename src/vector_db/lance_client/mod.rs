//! LanceDB implementation of the normalized vector store
//!
//! Ids are allocated from three in-memory counters. `close` persists them to
//! `meta.json`; `open` reads that file and deletes it straight away, so a crash between
//! open and close leaves no stale counters behind and the next open recovers them by
//! scanning for the largest id instead.

mod integrity;

use crate::error::VectorDbError;
use crate::vector_db::{
    DatabaseStats, FileChunkRecord, FileChunkSearchResult, IntegrityReport, NewFileChunk,
    NewShadowChunk, VectorDatabase,
};
use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
    UInt32Array, UInt64Array, types::Float32Type,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use fs2::FileExt;
use futures::stream::TryStreamExt;
use lancedb::Table;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

pub const VECTORS_TABLE: &str = "vectors";
pub const FILE_PATHS_TABLE: &str = "file_paths";
pub const FILE_CHUNKS_TABLE: &str = "file_chunks";
pub const LINKS_TABLE: &str = "links";
pub const SHADOW_CHUNKS_TABLE: &str = "shadow_chunks";

const META_FILE: &str = "meta.json";
const LOCK_FILE: &str = ".lock";

/// Raw nearest-neighbour hits fetched per requested result
pub const DEFAULT_SEARCH_OVERSAMPLE: usize = 3;

/// Ids per `IN (...)` filter
const IN_LIST_BATCH: usize = 1000;

/// Persisted id counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Counters {
    next_vector_id: u64,
    next_file_path_id: u64,
    next_file_chunk_id: u64,
}

/// Bidirectional path ↔ id cache
#[derive(Debug, Default)]
struct PathCache {
    by_path: HashMap<String, u64>,
    by_id: HashMap<u64, String>,
}

impl PathCache {
    fn insert(&mut self, path: String, id: u64) {
        self.by_id.insert(id, path.clone());
        self.by_path.insert(path, id);
    }

    fn evict_id(&mut self, id: u64) {
        if let Some(path) = self.by_id.remove(&id) {
            self.by_path.remove(&path);
        }
    }
}

struct Tables {
    vectors: Table,
    file_paths: Table,
    file_chunks: Table,
    links: Table,
    shadow_chunks: Table,
}

impl Tables {
    fn all(&self) -> [(&'static str, &Table); 5] {
        [
            (VECTORS_TABLE, &self.vectors),
            (FILE_PATHS_TABLE, &self.file_paths),
            (FILE_CHUNKS_TABLE, &self.file_chunks),
            (LINKS_TABLE, &self.links),
            (SHADOW_CHUNKS_TABLE, &self.shadow_chunks),
        ]
    }
}

/// LanceDB vector store (embedded, no server required).
///
/// Only obtainable through [`LanceVectorDB::open`], which holds an exclusive lock on the
/// database directory until the value is closed or dropped.
pub struct LanceVectorDB {
    _connection: Connection,
    tables: Tables,
    db_path: PathBuf,
    dimensions: usize,
    search_oversample: usize,
    next_vector_id: AtomicU64,
    next_file_path_id: AtomicU64,
    next_file_chunk_id: AtomicU64,
    path_cache: RwLock<PathCache>,
    /// Serializes multi-table writes within this process
    write_lock: tokio::sync::Mutex<()>,
    _lock_file: File,
}

fn vectors_schema(dimensions: usize) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                dimensions as i32,
            ),
            false,
        ),
    ]))
}

fn file_paths_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("path", DataType::Utf8, false),
    ]))
}

fn file_chunks_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, false),
        Field::new("file_path_id", DataType::UInt64, false),
        Field::new("start_line", DataType::UInt32, false),
        Field::new("end_line", DataType::UInt32, false),
        Field::new("sha256", DataType::Utf8, false),
        Field::new("vector_id", DataType::UInt64, false),
    ]))
}

fn links_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("vector_id", DataType::UInt64, false),
        Field::new("file_chunk_id", DataType::UInt64, false),
    ]))
}

fn shadow_chunks_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("text", DataType::Utf8, false),
        Field::new("vector_id", DataType::UInt64, false),
        Field::new("file_chunk_id", DataType::UInt64, false),
    ]))
}

/// Quote a string literal for a LanceDB filter
fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `column IN (...)` filters, at most [`IN_LIST_BATCH`] values each
fn in_filters<T: ToString>(column: &str, values: &[T]) -> Vec<String> {
    values
        .chunks(IN_LIST_BATCH)
        .map(|batch| {
            let list: Vec<String> = batch.iter().map(ToString::to_string).collect();
            format!("{} IN ({})", column, list.join(", "))
        })
        .collect()
}

fn u64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt64Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| VectorDbError::MissingColumn(String::new(), name.to_string()))?
        .as_any()
        .downcast_ref::<UInt64Array>()
        .with_context(|| format!("Invalid {} type", name))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| VectorDbError::MissingColumn(String::new(), name.to_string()))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .with_context(|| format!("Invalid {} type", name))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| VectorDbError::MissingColumn(String::new(), name.to_string()))?
        .as_any()
        .downcast_ref::<StringArray>()
        .with_context(|| format!("Invalid {} type", name))
}

async fn append(table: &Table, batch: RecordBatch) -> Result<()> {
    let schema = batch.schema();
    let batches = RecordBatchIterator::new(vec![batch].into_iter().map(Ok), schema);
    table
        .add(Box::new(batches))
        .execute()
        .await
        .with_context(|| format!("Failed to add records to table {}", table.name()))?;
    Ok(())
}

/// Select `columns` from rows matching `filter` (all rows when `None`)
async fn select(
    table: &Table,
    columns: &[&str],
    filter: Option<String>,
) -> Result<Vec<RecordBatch>> {
    let mut query = table
        .query()
        .select(Select::Columns(columns.iter().map(|c| c.to_string()).collect()));
    if let Some(filter) = filter {
        query = query.only_if(filter);
    }
    let stream = query
        .execute()
        .await
        .with_context(|| format!("Failed to query table {}", table.name()))?;
    stream
        .try_collect()
        .await
        .with_context(|| format!("Failed to collect rows from table {}", table.name()))
}

/// Select `columns` for every row whose `column` is in `ids`, batching the id list
async fn select_in(
    table: &Table,
    columns: &[&str],
    column: &str,
    ids: &[u64],
) -> Result<Vec<RecordBatch>> {
    let mut batches = Vec::new();
    for filter in in_filters(column, ids) {
        batches.extend(select(table, columns, Some(filter)).await?);
    }
    Ok(batches)
}

async fn delete_in(table: &Table, column: &str, ids: &[u64]) -> Result<()> {
    for filter in in_filters(column, ids) {
        table
            .delete(&filter)
            .await
            .with_context(|| format!("Failed to delete from table {}", table.name()))?;
    }
    Ok(())
}

/// Every value of a u64 column
async fn scan_u64(table: &Table, column: &str) -> Result<Vec<u64>> {
    let batches = select(table, &[column], None).await?;
    let mut values = Vec::new();
    for batch in &batches {
        values.extend(u64_column(batch, column)?.values().iter().copied());
    }
    Ok(values)
}

async fn next_id_by_scan(table: &Table) -> Result<u64> {
    let max = scan_u64(table, "id").await?.into_iter().max();
    Ok(max.map_or(0, |m| m + 1))
}

impl LanceVectorDB {
    /// Open (creating if needed) the store at `db_path` for `dimensions`-wide vectors.
    ///
    /// Fails with [`VectorDbError::Locked`] when another process holds the directory.
    pub async fn open(db_path: impl AsRef<Path>, dimensions: usize) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if dimensions == 0 {
            anyhow::bail!(VectorDbError::DimensionMismatch {
                expected: 1,
                actual: 0
            });
        }
        tracing::info!("Opening vector database at {:?} ({} dims)", db_path, dimensions);

        fs::create_dir_all(&db_path).map_err(|e| VectorDbError::OpenFailed {
            path: db_path.display().to_string(),
            reason: e.to_string(),
        })?;

        let lock_file =
            File::create(db_path.join(LOCK_FILE)).context("Failed to create lock file")?;
        match lock_file.try_lock_exclusive() {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(VectorDbError::Locked(db_path.display().to_string()).into());
            }
            Err(e) => return Err(e).context("Failed to acquire database lock"),
        }

        let connection = lancedb::connect(&db_path.to_string_lossy())
            .execute()
            .await
            .map_err(|e| VectorDbError::OpenFailed {
                path: db_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let existing = connection
            .table_names()
            .execute()
            .await
            .context("Failed to list tables")?;

        let open = |name: &'static str, schema: SchemaRef| {
            Self::open_or_create(&connection, &existing, name, schema)
        };
        let tables = Tables {
            vectors: open(VECTORS_TABLE, vectors_schema(dimensions)).await?,
            file_paths: open(FILE_PATHS_TABLE, file_paths_schema()).await?,
            file_chunks: open(FILE_CHUNKS_TABLE, file_chunks_schema()).await?,
            links: open(LINKS_TABLE, links_schema()).await?,
            shadow_chunks: open(SHADOW_CHUNKS_TABLE, shadow_chunks_schema()).await?,
        };

        Self::check_stored_dimensions(&tables.vectors, dimensions).await?;
        let counters = Self::load_counters(&db_path, &tables).await?;
        tracing::debug!("Id counters after open: {:?}", counters);

        Ok(Self {
            _connection: connection,
            tables,
            db_path,
            dimensions,
            search_oversample: DEFAULT_SEARCH_OVERSAMPLE,
            next_vector_id: AtomicU64::new(counters.next_vector_id),
            next_file_path_id: AtomicU64::new(counters.next_file_path_id),
            next_file_chunk_id: AtomicU64::new(counters.next_file_chunk_id),
            path_cache: RwLock::new(PathCache::default()),
            write_lock: tokio::sync::Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Raw hits fetched per requested search result (at least 1)
    pub fn with_search_oversample(mut self, oversample: usize) -> Self {
        self.search_oversample = oversample.max(1);
        self
    }

    /// Persist the id counters and release the directory lock
    pub fn close(self) -> Result<()> {
        let counters = self.counters();
        let content =
            serde_json::to_string_pretty(&counters).context("Failed to serialize counters")?;
        fs::write(self.db_path.join(META_FILE), content).context("Failed to write meta.json")?;
        tracing::info!("Closed vector database at {:?}", self.db_path);
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn counters(&self) -> Counters {
        Counters {
            next_vector_id: self.next_vector_id.load(Ordering::SeqCst),
            next_file_path_id: self.next_file_path_id.load(Ordering::SeqCst),
            next_file_chunk_id: self.next_file_chunk_id.load(Ordering::SeqCst),
        }
    }

    async fn open_or_create(
        connection: &Connection,
        existing: &[String],
        name: &str,
        schema: SchemaRef,
    ) -> Result<Table> {
        if existing.iter().any(|t| t == name) {
            return connection
                .open_table(name)
                .execute()
                .await
                .with_context(|| format!("Failed to open table {}", name));
        }

        let empty_batch = RecordBatch::new_empty(schema.clone());
        let batches = RecordBatchIterator::new(vec![empty_batch].into_iter().map(Ok), schema);
        let table = connection
            .create_table(name, Box::new(batches))
            .execute()
            .await
            .with_context(|| format!("Failed to create table {}", name))?;
        tracing::info!("Created table '{}'", name);
        Ok(table)
    }

    async fn check_stored_dimensions(vectors: &Table, dimensions: usize) -> Result<()> {
        let schema = vectors.schema().await.context("Failed to read vectors schema")?;
        let field = schema
            .field_with_name("vector")
            .map_err(|_| {
                VectorDbError::MissingColumn(VECTORS_TABLE.to_string(), "vector".to_string())
            })?;
        if let DataType::FixedSizeList(_, stored) = field.data_type()
            && *stored as usize != dimensions
        {
            return Err(VectorDbError::DimensionMismatch {
                expected: *stored as usize,
                actual: dimensions,
            }
            .into());
        }
        Ok(())
    }

    async fn load_counters(db_path: &Path, tables: &Tables) -> Result<Counters> {
        let meta_path = db_path.join(META_FILE);
        if let Ok(content) = fs::read_to_string(&meta_path) {
            // Consumed on read so a crash before close forces a rescan.
            if let Err(e) = fs::remove_file(&meta_path) {
                tracing::warn!("Failed to remove {:?}: {}", meta_path, e);
            }
            match serde_json::from_str::<Counters>(&content) {
                Ok(counters) => return Ok(counters),
                Err(e) => tracing::warn!("Ignoring unreadable {:?}: {}", meta_path, e),
            }
        }

        tracing::info!("Recovering id counters by scanning tables");
        Ok(Counters {
            next_vector_id: next_id_by_scan(&tables.vectors).await?,
            next_file_path_id: next_id_by_scan(&tables.file_paths).await?,
            next_file_chunk_id: next_id_by_scan(&tables.file_chunks).await?,
        })
    }

    fn check_dimensions<'a>(&self, vectors: impl IntoIterator<Item = &'a Vec<f32>>) -> Result<()> {
        for vector in vectors {
            if vector.len() != self.dimensions {
                return Err(VectorDbError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: vector.len(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn allocate(counter: &AtomicU64, count: usize) -> Vec<u64> {
        let first = counter.fetch_add(count as u64, Ordering::SeqCst);
        (first..first + count as u64).collect()
    }

    fn cached_path_ids(&self) -> Result<std::sync::RwLockReadGuard<'_, PathCache>> {
        self.path_cache
            .read()
            .map_err(|e| anyhow::anyhow!("Failed to acquire path cache read lock: {}", e))
    }

    fn cached_path_ids_mut(&self) -> Result<std::sync::RwLockWriteGuard<'_, PathCache>> {
        self.path_cache
            .write()
            .map_err(|e| anyhow::anyhow!("Failed to acquire path cache write lock: {}", e))
    }

    async fn insert_vectors(&self, ids: &[u64], vectors: Vec<Vec<f32>>) -> Result<()> {
        let vector_array = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
            vectors.into_iter().map(|v| Some(v.into_iter().map(Some))),
            self.dimensions as i32,
        );
        let batch = RecordBatch::try_new(
            vectors_schema(self.dimensions),
            vec![
                Arc::new(UInt64Array::from(ids.to_vec())),
                Arc::new(vector_array),
            ],
        )
        .context("Failed to create vectors RecordBatch")?;
        append(&self.tables.vectors, batch).await
    }

    async fn insert_links(&self, vector_ids: &[u64], file_chunk_ids: &[u64]) -> Result<()> {
        let batch = RecordBatch::try_new(
            links_schema(),
            vec![
                Arc::new(UInt64Array::from(vector_ids.to_vec())),
                Arc::new(UInt64Array::from(file_chunk_ids.to_vec())),
            ],
        )
        .context("Failed to create links RecordBatch")?;
        append(&self.tables.links, batch).await
    }

    /// Look up a path id: cache first, then the table
    async fn find_file_path_id(&self, file_path: &str) -> Result<Option<u64>> {
        let cached = self.cached_path_ids()?.by_path.get(file_path).copied();
        if cached.is_some() {
            return Ok(cached);
        }
        let batches = select(
            &self.tables.file_paths,
            &["id"],
            Some(format!("path = {}", sql_quote(file_path))),
        )
        .await?;
        for batch in &batches {
            let ids = u64_column(batch, "id")?;
            if !ids.is_empty() {
                let id = ids.value(0);
                self.cached_path_ids_mut()?.insert(file_path.to_string(), id);
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Ids for every path, inserting unknown ones in a single batch
    async fn resolve_file_path_ids<'a>(
        &self,
        paths: impl IntoIterator<Item = &'a str>,
    ) -> Result<HashMap<String, u64>> {
        let unique: HashSet<&str> = paths.into_iter().collect();
        let mut resolved = HashMap::new();
        let mut missing = Vec::new();

        for path in unique {
            match self.find_file_path_id(path).await? {
                Some(id) => {
                    resolved.insert(path.to_string(), id);
                }
                None => missing.push(path.to_string()),
            }
        }

        if !missing.is_empty() {
            missing.sort();
            let ids = Self::allocate(&self.next_file_path_id, missing.len());
            let batch = RecordBatch::try_new(
                file_paths_schema(),
                vec![
                    Arc::new(UInt64Array::from(ids.clone())),
                    Arc::new(StringArray::from(missing.clone())),
                ],
            )
            .context("Failed to create file_paths RecordBatch")?;
            append(&self.tables.file_paths, batch).await?;

            let mut cache = self.cached_path_ids_mut()?;
            for (path, id) in missing.into_iter().zip(ids) {
                cache.insert(path.clone(), id);
                resolved.insert(path, id);
            }
        }

        Ok(resolved)
    }

    /// Paths for the given ids: cache first, then one batched query for the rest
    async fn file_paths_by_id(&self, ids: &[u64]) -> Result<HashMap<u64, String>> {
        let mut found = HashMap::new();
        let mut missing = Vec::new();
        {
            let cache = self.cached_path_ids()?;
            for id in ids {
                match cache.by_id.get(id) {
                    Some(path) => {
                        found.insert(*id, path.clone());
                    }
                    None => missing.push(*id),
                }
            }
        }

        if !missing.is_empty() {
            let batches =
                select_in(&self.tables.file_paths, &["id", "path"], "id", &missing).await?;
            let mut cache = self.cached_path_ids_mut()?;
            for batch in &batches {
                let id_col = u64_column(batch, "id")?;
                let path_col = string_column(batch, "path")?;
                for i in 0..batch.num_rows() {
                    let path = path_col.value(i).to_string();
                    cache.insert(path.clone(), id_col.value(i));
                    found.insert(id_col.value(i), path);
                }
            }
        }
        Ok(found)
    }

    fn chunk_records(
        batches: &[RecordBatch],
        paths: &HashMap<u64, String>,
    ) -> Result<Vec<FileChunkRecord>> {
        let mut records = Vec::new();
        for batch in batches {
            let id = u64_column(batch, "id")?;
            let file_path_id = u64_column(batch, "file_path_id")?;
            let start_line = u32_column(batch, "start_line")?;
            let end_line = u32_column(batch, "end_line")?;
            let sha256 = string_column(batch, "sha256")?;
            let vector_id = u64_column(batch, "vector_id")?;

            for i in 0..batch.num_rows() {
                records.push(FileChunkRecord {
                    id: id.value(i),
                    file_path_id: file_path_id.value(i),
                    file_path: paths.get(&file_path_id.value(i)).cloned().unwrap_or_default(),
                    start_line: start_line.value(i),
                    end_line: end_line.value(i),
                    sha256: sha256.value(i).to_string(),
                    vector_id: vector_id.value(i),
                });
            }
        }
        Ok(records)
    }

    /// Cascade delete without taking the write lock
    async fn delete_file_chunks_unlocked(&self, ids: &[u64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        // Shadow chunks: links, vectors, rows
        let shadow_batches =
            select_in(&self.tables.shadow_chunks, &["vector_id"], "file_chunk_id", ids).await?;
        let mut shadow_vectors = Vec::new();
        for batch in &shadow_batches {
            shadow_vectors.extend(u64_column(batch, "vector_id")?.values().iter().copied());
        }
        delete_in(&self.tables.links, "vector_id", &shadow_vectors).await?;
        delete_in(&self.tables.vectors, "id", &shadow_vectors).await?;
        delete_in(&self.tables.shadow_chunks, "file_chunk_id", ids).await?;

        // File chunks: links, vectors, rows
        let chunk_batches = select_in(
            &self.tables.file_chunks,
            &["id", "file_path_id", "vector_id"],
            "id",
            ids,
        )
        .await?;
        let mut chunk_vectors = Vec::new();
        let mut path_ids = Vec::new();
        let mut existing = 0;
        for batch in &chunk_batches {
            existing += batch.num_rows();
            chunk_vectors.extend(u64_column(batch, "vector_id")?.values().iter().copied());
            path_ids.extend(u64_column(batch, "file_path_id")?.values().iter().copied());
        }
        delete_in(&self.tables.links, "vector_id", &chunk_vectors).await?;
        delete_in(&self.tables.links, "file_chunk_id", ids).await?;
        delete_in(&self.tables.vectors, "id", &chunk_vectors).await?;
        delete_in(&self.tables.file_chunks, "id", ids).await?;

        // Paths left without chunks
        path_ids.sort_unstable();
        path_ids.dedup();
        let still_used: HashSet<u64> =
            select_in(&self.tables.file_chunks, &["file_path_id"], "file_path_id", &path_ids)
                .await?
                .iter()
                .map(|batch| u64_column(batch, "file_path_id").map(|c| c.values().to_vec()))
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect();
        let unused: Vec<u64> = path_ids.into_iter().filter(|id| !still_used.contains(id)).collect();
        self.delete_file_paths(&unused).await?;

        tracing::debug!(
            "Deleted {} file chunks and {} shadow vectors",
            existing,
            shadow_vectors.len()
        );
        Ok(existing)
    }

    async fn delete_file_paths(&self, ids: &[u64]) -> Result<()> {
        delete_in(&self.tables.file_paths, "id", ids).await?;
        let mut cache = self.cached_path_ids_mut()?;
        for id in ids {
            cache.evict_id(*id);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorDatabase for LanceVectorDB {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn add_file_chunks(&self, chunks: Vec<NewFileChunk>) -> Result<Vec<u64>> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dimensions(chunks.iter().map(|c| &c.vector))?;
        let _guard = self.write_lock.lock().await;

        let vector_ids = Self::allocate(&self.next_vector_id, chunks.len());
        let chunk_ids = Self::allocate(&self.next_file_chunk_id, chunks.len());

        let path_ids = self
            .resolve_file_path_ids(chunks.iter().map(|c| c.file_path.as_str()))
            .await?;

        let mut file_path_col = Vec::with_capacity(chunks.len());
        let mut start_col = Vec::with_capacity(chunks.len());
        let mut end_col = Vec::with_capacity(chunks.len());
        let mut sha_col = Vec::with_capacity(chunks.len());
        let mut vectors = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let path_id = path_ids
                .get(&chunk.file_path)
                .copied()
                .with_context(|| format!("No id resolved for path {}", chunk.file_path))?;
            file_path_col.push(path_id);
            start_col.push(chunk.start_line);
            end_col.push(chunk.end_line);
            sha_col.push(chunk.sha256);
            vectors.push(chunk.vector);
        }

        self.insert_vectors(&vector_ids, vectors).await?;

        let batch = RecordBatch::try_new(
            file_chunks_schema(),
            vec![
                Arc::new(UInt64Array::from(chunk_ids.clone())),
                Arc::new(UInt64Array::from(file_path_col)),
                Arc::new(UInt32Array::from(start_col)),
                Arc::new(UInt32Array::from(end_col)),
                Arc::new(StringArray::from(sha_col)),
                Arc::new(UInt64Array::from(vector_ids.clone())),
            ],
        )
        .context("Failed to create file_chunks RecordBatch")?;
        append(&self.tables.file_chunks, batch).await?;

        self.insert_links(&vector_ids, &chunk_ids).await?;

        tracing::debug!("Stored {} file chunks", chunk_ids.len());
        Ok(chunk_ids)
    }

    async fn add_shadow_chunks(&self, shadows: Vec<NewShadowChunk>) -> Result<Vec<u64>> {
        if shadows.is_empty() {
            return Ok(Vec::new());
        }
        self.check_dimensions(shadows.iter().map(|s| &s.vector))?;
        let _guard = self.write_lock.lock().await;

        let mut wanted: Vec<u64> = shadows.iter().map(|s| s.file_chunk_id).collect();
        wanted.sort_unstable();
        wanted.dedup();
        let mut found = HashSet::new();
        for batch in select_in(&self.tables.file_chunks, &["id"], "id", &wanted).await? {
            found.extend(u64_column(&batch, "id")?.values().iter().copied());
        }
        if let Some(missing) = wanted.iter().find(|id| !found.contains(*id)) {
            return Err(VectorDbError::FileChunkNotFound(*missing).into());
        }

        let vector_ids = Self::allocate(&self.next_vector_id, shadows.len());
        let mut texts = Vec::with_capacity(shadows.len());
        let mut chunk_ids = Vec::with_capacity(shadows.len());
        let mut vectors = Vec::with_capacity(shadows.len());
        for shadow in shadows {
            texts.push(shadow.text);
            chunk_ids.push(shadow.file_chunk_id);
            vectors.push(shadow.vector);
        }

        self.insert_vectors(&vector_ids, vectors).await?;

        let batch = RecordBatch::try_new(
            shadow_chunks_schema(),
            vec![
                Arc::new(StringArray::from(texts)),
                Arc::new(UInt64Array::from(vector_ids.clone())),
                Arc::new(UInt64Array::from(chunk_ids.clone())),
            ],
        )
        .context("Failed to create shadow_chunks RecordBatch")?;
        append(&self.tables.shadow_chunks, batch).await?;

        self.insert_links(&vector_ids, &chunk_ids).await?;

        tracing::debug!("Stored {} shadow chunks", vector_ids.len());
        Ok(vector_ids)
    }

    async fn get_file_chunks_for_path(&self, file_path: &str) -> Result<Vec<FileChunkRecord>> {
        let Some(path_id) = self.find_file_path_id(file_path).await? else {
            return Ok(Vec::new());
        };
        let batches = select(
            &self.tables.file_chunks,
            &["id", "file_path_id", "start_line", "end_line", "sha256", "vector_id"],
            Some(format!("file_path_id = {}", path_id)),
        )
        .await?;

        let paths = HashMap::from([(path_id, file_path.to_string())]);
        let mut records = Self::chunk_records(&batches, &paths)?;
        records.sort_by_key(|r| (r.start_line, r.end_line, r.id));
        Ok(records)
    }

    async fn update_file_chunk_lines(&self, id: u64, start_line: u32, end_line: u32) -> Result<()> {
        let filter = format!("id = {}", id);
        let count = self
            .tables
            .file_chunks
            .count_rows(Some(filter.clone()))
            .await
            .context("Failed to count file chunks")?;
        if count == 0 {
            return Err(VectorDbError::FileChunkNotFound(id).into());
        }

        self.tables
            .file_chunks
            .update()
            .only_if(filter)
            .column("start_line", start_line.to_string())
            .column("end_line", end_line.to_string())
            .execute()
            .await
            .context("Failed to update file chunk lines")?;
        Ok(())
    }

    async fn delete_file_chunks(&self, ids: &[u64]) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        self.delete_file_chunks_unlocked(ids).await
    }

    async fn delete_file_chunks_for_path(&self, file_path: &str) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let Some(path_id) = self.find_file_path_id(file_path).await? else {
            return Ok(0);
        };

        let ids = scan_ids_where(
            &self.tables.file_chunks,
            format!("file_path_id = {}", path_id),
        )
        .await?;
        let deleted = self.delete_file_chunks_unlocked(&ids).await?;
        self.delete_file_paths(&[path_id]).await?;

        tracing::info!("Deleted {} chunks for {}", deleted, file_path);
        Ok(deleted)
    }

    async fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<FileChunkSearchResult>> {
        if top_k == 0 {
            return Err(VectorDbError::InvalidTopK.into());
        }
        if query.len() != self.dimensions {
            return Err(VectorDbError::DimensionMismatch {
                expected: self.dimensions,
                actual: query.len(),
            }
            .into());
        }
        if self.tables.vectors.count_rows(None).await.context("Failed to count vectors")? == 0 {
            return Ok(Vec::new());
        }

        let stream = self
            .tables
            .vectors
            .vector_search(query.to_vec())
            .context("Failed to create vector search")?
            .distance_type(lancedb::DistanceType::Cosine)
            .select(Select::Columns(vec!["id".to_string()]))
            .limit(top_k * self.search_oversample)
            .execute()
            .await
            .context("Failed to execute search")?;
        let hits: Vec<RecordBatch> = stream
            .try_collect()
            .await
            .context("Failed to collect search results")?;

        let mut vector_distance: HashMap<u64, f32> = HashMap::new();
        for batch in &hits {
            let ids = u64_column(batch, "id")?;
            let distances = batch
                .column_by_name("_distance")
                .context("Missing _distance column")?
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("Invalid _distance type")?;
            for i in 0..batch.num_rows() {
                vector_distance.insert(ids.value(i), distances.value(i));
            }
        }
        if vector_distance.is_empty() {
            return Ok(Vec::new());
        }

        // Resolve vectors to file chunks, keeping the closest distance per chunk
        let vector_ids: Vec<u64> = vector_distance.keys().copied().collect();
        let link_batches = select_in(
            &self.tables.links,
            &["vector_id", "file_chunk_id"],
            "vector_id",
            &vector_ids,
        )
        .await?;
        let mut chunk_distance: HashMap<u64, f32> = HashMap::new();
        for batch in &link_batches {
            let vector_col = u64_column(batch, "vector_id")?;
            let chunk_col = u64_column(batch, "file_chunk_id")?;
            for i in 0..batch.num_rows() {
                let Some(&distance) = vector_distance.get(&vector_col.value(i)) else {
                    continue;
                };
                chunk_distance
                    .entry(chunk_col.value(i))
                    .and_modify(|d| *d = d.min(distance))
                    .or_insert(distance);
            }
        }

        let chunk_ids: Vec<u64> = chunk_distance.keys().copied().collect();
        let chunk_batches = select_in(
            &self.tables.file_chunks,
            &["id", "file_path_id", "start_line", "end_line", "sha256", "vector_id"],
            "id",
            &chunk_ids,
        )
        .await?;
        let mut path_ids = Vec::new();
        for batch in &chunk_batches {
            path_ids.extend(u64_column(batch, "file_path_id")?.values().iter().copied());
        }
        path_ids.sort_unstable();
        path_ids.dedup();
        let paths = self.file_paths_by_id(&path_ids).await?;

        let mut results: Vec<FileChunkSearchResult> = Self::chunk_records(&chunk_batches, &paths)?
            .into_iter()
            .filter_map(|record| {
                let distance = *chunk_distance.get(&record.id)?;
                Some(FileChunkSearchResult {
                    file_chunk_id: record.id,
                    file_path: record.file_path,
                    start_line: record.start_line,
                    end_line: record.end_line,
                    sha256: record.sha256,
                    distance,
                })
            })
            .collect();
        results.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.file_chunk_id.cmp(&b.file_chunk_id))
        });
        results.truncate(top_k);
        Ok(results)
    }

    async fn count_file_chunks(&self) -> Result<usize> {
        self.tables
            .file_chunks
            .count_rows(None)
            .await
            .context("Failed to count file chunks")
    }

    async fn count_vectors(&self) -> Result<usize> {
        self.tables
            .vectors
            .count_rows(None)
            .await
            .context("Failed to count vectors")
    }

    async fn statistics(&self) -> Result<DatabaseStats> {
        let mut counts = [0usize; 5];
        for (slot, (name, table)) in counts.iter_mut().zip(self.tables.all()) {
            *slot = table
                .count_rows(None)
                .await
                .with_context(|| format!("Failed to count rows in {}", name))?;
        }
        let [vectors, file_paths, file_chunks, links, shadow_chunks] = counts;
        Ok(DatabaseStats {
            vectors,
            file_paths,
            file_chunks,
            links,
            shadow_chunks,
        })
    }

    async fn check_integrity(&self, repair: bool) -> Result<IntegrityReport> {
        let _guard = self.write_lock.lock().await;
        self.check_integrity_unlocked(repair).await
    }

    async fn compact(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for (name, table) in self.tables.all() {
            table
                .optimize(lancedb::table::OptimizeAction::All)
                .await
                .with_context(|| format!("Failed to optimize table {}", name))?;
        }
        tracing::info!("Compacted vector database at {:?}", self.db_path);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        for (name, table) in self.tables.all() {
            table
                .delete("true")
                .await
                .with_context(|| format!("Failed to clear table {}", name))?;
        }
        let mut cache = self.cached_path_ids_mut()?;
        *cache = PathCache::default();
        tracing::info!("Cleared vector database at {:?}", self.db_path);
        Ok(())
    }
}

/// Ids of the rows matching `filter`
async fn scan_ids_where(table: &Table, filter: String) -> Result<Vec<u64>> {
    let batches = select(table, &["id"], Some(filter)).await?;
    let mut ids = Vec::new();
    for batch in &batches {
        ids.extend(u64_column(batch, "id")?.values().iter().copied());
    }
    Ok(ids)
}

#[cfg(test)]
mod tests;
