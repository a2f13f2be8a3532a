use super::*;
use tempfile::TempDir;

const DIMS: usize = 4;

fn chunk(path: &str, start: u32, end: u32, vector: [f32; DIMS]) -> NewFileChunk {
    NewFileChunk {
        file_path: path.to_string(),
        start_line: start,
        end_line: end,
        sha256: format!("sha-{}-{}", start, end),
        vector: vector.to_vec(),
    }
}

fn shadow(file_chunk_id: u64, text: &str, vector: [f32; DIMS]) -> NewShadowChunk {
    NewShadowChunk {
        file_chunk_id,
        text: text.to_string(),
        vector: vector.to_vec(),
    }
}

async fn open_db(dir: &TempDir) -> LanceVectorDB {
    LanceVectorDB::open(dir.path().join("db"), DIMS).await.unwrap()
}

fn db_error(err: &anyhow::Error) -> &VectorDbError {
    err.downcast_ref::<VectorDbError>()
        .unwrap_or_else(|| panic!("not a VectorDbError: {:#}", err))
}

#[tokio::test]
async fn test_open_creates_tables() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;

    let names = db._connection.table_names().execute().await.unwrap();
    for table in [
        VECTORS_TABLE,
        FILE_PATHS_TABLE,
        FILE_CHUNKS_TABLE,
        LINKS_TABLE,
        SHADOW_CHUNKS_TABLE,
    ] {
        assert!(names.contains(&table.to_string()), "missing {}", table);
    }
    assert_eq!(db.statistics().await.unwrap(), DatabaseStats::default());
    assert_eq!(db.dimensions(), DIMS);
}

#[tokio::test]
async fn test_open_rejects_zero_dimensions() {
    let dir = TempDir::new().unwrap();
    assert!(LanceVectorDB::open(dir.path().join("db"), 0).await.is_err());
}

#[tokio::test]
async fn test_second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let _db = open_db(&dir).await;

    let err = LanceVectorDB::open(dir.path().join("db"), DIMS)
        .await
        .err()
        .unwrap();
    assert!(matches!(db_error(&err), VectorDbError::Locked(_)));
}

#[tokio::test]
async fn test_reopen_with_other_dimensions_fails() {
    let dir = TempDir::new().unwrap();
    open_db(&dir).await.close().unwrap();

    let err = LanceVectorDB::open(dir.path().join("db"), 8)
        .await
        .err()
        .unwrap();
    assert!(matches!(
        db_error(&err),
        VectorDbError::DimensionMismatch {
            expected: 4,
            actual: 8
        }
    ));
}

#[tokio::test]
async fn test_counters_survive_clean_close() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let ids = db
        .add_file_chunks(vec![
            chunk("/src/a.cpp", 1, 10, [1.0, 0.0, 0.0, 0.0]),
            chunk("/src/a.cpp", 11, 20, [0.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();
    assert_eq!(ids, vec![0, 1]);
    db.close().unwrap();

    let meta = dir.path().join("db").join(META_FILE);
    assert!(meta.exists());

    let db = open_db(&dir).await;
    // Consumed on open
    assert!(!meta.exists());
    assert_eq!(
        db.counters(),
        Counters {
            next_vector_id: 2,
            next_file_path_id: 1,
            next_file_chunk_id: 2,
        }
    );

    let ids = db
        .add_file_chunks(vec![chunk("/src/b.cpp", 1, 5, [0.0, 0.0, 1.0, 0.0])])
        .await
        .unwrap();
    assert_eq!(ids, vec![2]);
}

#[tokio::test]
async fn test_counters_recovered_by_scan_after_crash() {
    let dir = TempDir::new().unwrap();
    {
        let db = open_db(&dir).await;
        let ids = db
            .add_file_chunks(vec![
                chunk("/src/a.cpp", 1, 10, [1.0, 0.0, 0.0, 0.0]),
                chunk("/src/b.cpp", 1, 10, [0.0, 1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap();
        db.add_shadow_chunks(vec![shadow(ids[0], "summary", [0.0, 0.0, 1.0, 0.0])])
            .await
            .unwrap();
        // Dropped without close
    }

    let db = open_db(&dir).await;
    assert_eq!(
        db.counters(),
        Counters {
            next_vector_id: 3,
            next_file_path_id: 2,
            next_file_chunk_id: 2,
        }
    );
}

#[tokio::test]
async fn test_add_and_get_file_chunks() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;

    db.add_file_chunks(vec![
        chunk("/src/it's.cpp", 30, 40, [1.0, 0.0, 0.0, 0.0]),
        chunk("/src/it's.cpp", 1, 12, [0.0, 1.0, 0.0, 0.0]),
        chunk("/src/other.cpp", 1, 3, [0.0, 0.0, 1.0, 0.0]),
    ])
    .await
    .unwrap();
    // Same path in a later batch reuses the path row
    db.add_file_chunks(vec![chunk("/src/other.cpp", 4, 9, [0.0, 0.0, 0.0, 1.0])])
        .await
        .unwrap();

    let records = db.get_file_chunks_for_path("/src/it's.cpp").await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!((records[0].start_line, records[0].end_line), (1, 12));
    assert_eq!((records[1].start_line, records[1].end_line), (30, 40));
    assert!(records.iter().all(|r| r.file_path == "/src/it's.cpp"));
    assert_eq!(records[0].sha256, "sha-1-12");

    let stats = db.statistics().await.unwrap();
    assert_eq!(stats.file_paths, 2);
    assert_eq!(stats.file_chunks, 4);
    assert_eq!(stats.vectors, 4);
    assert_eq!(stats.links, 4);

    assert!(db.get_file_chunks_for_path("/src/none.cpp").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_add_rejects_wrong_dimensions() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;

    let err = db
        .add_file_chunks(vec![NewFileChunk {
            file_path: "/src/a.cpp".to_string(),
            start_line: 1,
            end_line: 2,
            sha256: "x".to_string(),
            vector: vec![1.0, 0.0],
        }])
        .await
        .unwrap_err();
    assert!(matches!(
        db_error(&err),
        VectorDbError::DimensionMismatch {
            expected: 4,
            actual: 2
        }
    ));
    assert_eq!(db.count_vectors().await.unwrap(), 0);
}

#[tokio::test]
async fn test_update_file_chunk_lines() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let ids = db
        .add_file_chunks(vec![chunk("/src/a.cpp", 5, 9, [1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap();

    db.update_file_chunk_lines(ids[0], 7, 11).await.unwrap();
    let records = db.get_file_chunks_for_path("/src/a.cpp").await.unwrap();
    assert_eq!((records[0].start_line, records[0].end_line), (7, 11));

    let err = db.update_file_chunk_lines(999, 1, 2).await.unwrap_err();
    assert!(matches!(db_error(&err), VectorDbError::FileChunkNotFound(999)));
}

#[tokio::test]
async fn test_delete_cascades_to_shadows_links_and_paths() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let ids = db
        .add_file_chunks(vec![
            chunk("/src/a.cpp", 1, 10, [1.0, 0.0, 0.0, 0.0]),
            chunk("/src/b.cpp", 1, 10, [0.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();
    db.add_shadow_chunks(vec![
        shadow(ids[0], "plays a track", [0.0, 0.0, 1.0, 0.0]),
        shadow(ids[0], "audio entry point", [0.0, 0.0, 0.0, 1.0]),
    ])
    .await
    .unwrap();
    assert_eq!(db.count_vectors().await.unwrap(), 4);

    let deleted = db.delete_file_chunks(&[ids[0], 12345]).await.unwrap();
    assert_eq!(deleted, 1);

    assert_eq!(
        db.statistics().await.unwrap(),
        DatabaseStats {
            vectors: 1,
            file_paths: 1,
            file_chunks: 1,
            links: 1,
            shadow_chunks: 0,
        }
    );
    assert!(db.check_integrity(false).await.unwrap().is_clean());
    assert!(db.get_file_chunks_for_path("/src/a.cpp").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_file_chunks_for_path() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let ids = db
        .add_file_chunks(vec![
            chunk("/src/a.cpp", 1, 10, [1.0, 0.0, 0.0, 0.0]),
            chunk("/src/a.cpp", 11, 20, [0.0, 1.0, 0.0, 0.0]),
            chunk("/src/b.cpp", 1, 10, [0.0, 0.0, 1.0, 0.0]),
        ])
        .await
        .unwrap();
    db.add_shadow_chunks(vec![shadow(ids[1], "note", [0.0, 0.0, 0.0, 1.0])])
        .await
        .unwrap();

    assert_eq!(db.delete_file_chunks_for_path("/src/a.cpp").await.unwrap(), 2);
    assert_eq!(db.delete_file_chunks_for_path("/src/a.cpp").await.unwrap(), 0);
    assert!(!db.cached_path_ids().unwrap().by_path.contains_key("/src/a.cpp"));

    let stats = db.statistics().await.unwrap();
    assert_eq!(stats.file_paths, 1);
    assert_eq!(stats.file_chunks, 1);
    assert_eq!(stats.vectors, 1);
    assert_eq!(stats.shadow_chunks, 0);
    assert!(db.check_integrity(false).await.unwrap().is_clean());

    // A re-added path gets a fresh id
    db.add_file_chunks(vec![chunk("/src/a.cpp", 1, 4, [1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap();
    let records = db.get_file_chunks_for_path("/src/a.cpp").await.unwrap();
    assert_eq!(records[0].file_path_id, 2);
}

#[tokio::test]
async fn test_search_resolves_shadow_to_owning_chunk_once() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let ids = db
        .add_file_chunks(vec![
            chunk("/src/player.cpp", 3, 6, [1.0, 0.0, 0.0, 0.0]),
            chunk("/src/mixer.cpp", 1, 9, [0.0, 0.0, 0.0, 1.0]),
        ])
        .await
        .unwrap();
    db.add_shadow_chunks(vec![shadow(ids[0], "starts playback", [0.0, 1.0, 0.0, 0.0])])
        .await
        .unwrap();

    let results = db.search(&[0.1, 1.0, 0.0, 0.0], 5).await.unwrap();
    assert_eq!(results.len(), 2);

    let first = &results[0];
    assert_eq!(first.file_chunk_id, ids[0]);
    assert_eq!(first.file_path, "/src/player.cpp");
    assert_eq!((first.start_line, first.end_line), (3, 6));
    assert_eq!(
        results.iter().filter(|r| r.file_chunk_id == ids[0]).count(),
        1
    );
    assert!(results[0].distance <= results[1].distance);

    let top = db.search(&[0.1, 1.0, 0.0, 0.0], 1).await.unwrap();
    assert_eq!(top.len(), 1);
    assert_eq!(top[0].file_chunk_id, ids[0]);
}

#[tokio::test]
async fn test_shadow_for_missing_chunk_is_rejected() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let ids = db
        .add_file_chunks(vec![chunk("/src/a.cpp", 1, 10, [1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap();

    let err = db
        .add_shadow_chunks(vec![
            shadow(ids[0], "fine", [0.0, 1.0, 0.0, 0.0]),
            shadow(42, "dangling", [0.0, 0.0, 1.0, 0.0]),
        ])
        .await
        .unwrap_err();
    assert!(matches!(db_error(&err), VectorDbError::FileChunkNotFound(42)));

    // Nothing from the rejected batch was written
    let stats = db.statistics().await.unwrap();
    assert_eq!(stats.shadow_chunks, 0);
    assert_eq!(stats.vectors, 1);
    assert_eq!(stats.links, 1);
}

#[tokio::test]
async fn test_search_edge_cases() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;

    assert!(db.search(&[1.0, 0.0, 0.0, 0.0], 3).await.unwrap().is_empty());

    let err = db.search(&[1.0, 0.0, 0.0, 0.0], 0).await.unwrap_err();
    assert!(matches!(db_error(&err), VectorDbError::InvalidTopK));

    let err = db.search(&[1.0, 0.0], 3).await.unwrap_err();
    assert!(matches!(db_error(&err), VectorDbError::DimensionMismatch { .. }));
}

#[tokio::test]
async fn test_integrity_detects_and_repairs_unlinked_chunk() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let ids = db
        .add_file_chunks(vec![
            chunk("/src/a.cpp", 1, 10, [1.0, 0.0, 0.0, 0.0]),
            chunk("/src/b.cpp", 1, 10, [0.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();

    // Simulate a crash between the chunk insert and the link insert
    delete_in(&db.tables.links, "file_chunk_id", &[ids[0]])
        .await
        .unwrap();

    let report = db.check_integrity(false).await.unwrap();
    assert_eq!(report.dangling_file_chunks, 1);
    assert_eq!(report.orphaned_vectors, 1);
    assert!(!report.repaired);
    // Detection alone mutates nothing
    assert_eq!(db.count_file_chunks().await.unwrap(), 2);

    let report = db.check_integrity(true).await.unwrap();
    assert!(report.repaired);
    assert_eq!(report.dangling_file_chunks, 1);

    assert!(db.check_integrity(false).await.unwrap().is_clean());
    assert_eq!(
        db.statistics().await.unwrap(),
        DatabaseStats {
            vectors: 1,
            file_paths: 1,
            file_chunks: 1,
            links: 1,
            shadow_chunks: 0,
        }
    );
}

#[tokio::test]
async fn test_integrity_repairs_chunk_linked_to_another_chunk() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let ids = db
        .add_file_chunks(vec![
            chunk("/src/a.cpp", 1, 10, [1.0, 0.0, 0.0, 0.0]),
            chunk("/src/b.cpp", 1, 10, [0.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();
    let vector_id = db.get_file_chunks_for_path("/src/a.cpp").await.unwrap()[0].vector_id;

    // The chunk's only link now points at a chunk that never existed
    delete_in(&db.tables.links, "file_chunk_id", &[ids[0]])
        .await
        .unwrap();
    db.insert_links(&[vector_id], &[999]).await.unwrap();

    let report = db.check_integrity(false).await.unwrap();
    assert_eq!(report.dangling_file_chunks, 1);
    assert_eq!(report.dangling_links, 1);

    db.check_integrity(true).await.unwrap();
    assert!(db.check_integrity(false).await.unwrap().is_clean());
    assert!(db.get_file_chunks_for_path("/src/a.cpp").await.unwrap().is_empty());
    assert_eq!(
        db.statistics().await.unwrap(),
        DatabaseStats {
            vectors: 1,
            file_paths: 1,
            file_chunks: 1,
            links: 1,
            shadow_chunks: 0,
        }
    );
}

#[tokio::test]
async fn test_integrity_repairs_orphaned_vector_and_shadow() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    let ids = db
        .add_file_chunks(vec![chunk("/src/a.cpp", 1, 10, [1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap();
    db.add_shadow_chunks(vec![shadow(ids[0], "note", [0.0, 1.0, 0.0, 0.0])])
        .await
        .unwrap();

    // A vector with no owner and a shadow whose chunk row vanished
    db.insert_vectors(&[500], vec![vec![0.0, 0.0, 1.0, 0.0]])
        .await
        .unwrap();
    delete_in(&db.tables.file_chunks, "id", &ids).await.unwrap();

    let report = db.check_integrity(false).await.unwrap();
    assert_eq!(report.orphaned_shadow_chunks, 1);
    assert_eq!(report.orphaned_file_paths, 1);
    // Vector 500 plus the chunk's own vector
    assert_eq!(report.orphaned_vectors, 2);
    // Chunk link and shadow link both point at the missing chunk
    assert_eq!(report.dangling_links, 2);

    db.check_integrity(true).await.unwrap();
    assert!(db.check_integrity(false).await.unwrap().is_clean());
    assert_eq!(db.statistics().await.unwrap(), DatabaseStats::default());
}

#[tokio::test]
async fn test_clear_keeps_counters_monotonic() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    db.add_file_chunks(vec![chunk("/src/a.cpp", 1, 10, [1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap();

    db.clear().await.unwrap();
    assert_eq!(db.statistics().await.unwrap(), DatabaseStats::default());

    let ids = db
        .add_file_chunks(vec![chunk("/src/a.cpp", 1, 10, [1.0, 0.0, 0.0, 0.0])])
        .await
        .unwrap();
    assert_eq!(ids, vec![1]);
    assert_eq!(
        db.get_file_chunks_for_path("/src/a.cpp").await.unwrap()[0].file_path_id,
        1
    );
}

#[tokio::test]
async fn test_compact_preserves_rows() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir).await;
    for i in 0..3u32 {
        db.add_file_chunks(vec![chunk(
            "/src/a.cpp",
            i * 10 + 1,
            i * 10 + 10,
            [1.0, i as f32, 0.0, 0.0],
        )])
        .await
        .unwrap();
    }
    db.delete_file_chunks(&[1]).await.unwrap();

    db.compact().await.unwrap();
    let stats = db.statistics().await.unwrap();
    assert_eq!(stats.file_chunks, 2);
    assert_eq!(stats.vectors, 2);
    assert!(db.check_integrity(false).await.unwrap().is_clean());
}

#[test]
fn test_in_filters_batch() {
    let ids: Vec<u64> = (0..2500).collect();
    let filters = in_filters("id", &ids);
    assert_eq!(filters.len(), 3);
    assert!(filters[0].starts_with("id IN (0, 1, 2"));
    assert!(filters[2].ends_with("2499)"));
    assert!(in_filters::<u64>("id", &[]).is_empty());
}

#[test]
fn test_sql_quote_escapes() {
    assert_eq!(sql_quote("/src/it's.cpp"), "'/src/it''s.cpp'");
}
