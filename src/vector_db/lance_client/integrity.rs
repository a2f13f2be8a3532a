//! Foreign-key scan and repair

use super::{LanceVectorDB, delete_in, scan_u64, select, u64_column};
use crate::vector_db::IntegrityReport;
use anyhow::Result;
use std::collections::HashSet;

/// Id and foreign-key columns of every table
#[derive(Debug, Default)]
struct Snapshot {
    vectors: HashSet<u64>,
    file_paths: HashSet<u64>,
    /// (id, file_path_id, vector_id)
    file_chunks: Vec<(u64, u64, u64)>,
    /// (vector_id, file_chunk_id)
    links: Vec<(u64, u64)>,
    /// (vector_id, file_chunk_id)
    shadow_chunks: Vec<(u64, u64)>,
}

/// Rows violating a foreign key
#[derive(Debug, Default)]
struct Findings {
    orphaned_vectors: Vec<u64>,
    /// Link vector ids that point at a missing vector
    link_missing_vectors: Vec<u64>,
    /// Link chunk ids that point at a missing file chunk
    link_missing_chunks: Vec<u64>,
    dangling_links: usize,
    /// (vector_id, file_chunk_id) of shadows whose chunk is gone or whose vector is
    /// missing or not linked to that chunk
    orphaned_shadow_chunks: Vec<(u64, u64)>,
    orphaned_file_paths: Vec<u64>,
    dangling_file_chunks: Vec<u64>,
}

impl Snapshot {
    fn findings(&self) -> Findings {
        let chunk_ids: HashSet<u64> = self.file_chunks.iter().map(|c| c.0).collect();
        let linked: HashSet<u64> = self.links.iter().map(|l| l.0).collect();
        let link_pairs: HashSet<(u64, u64)> = self.links.iter().copied().collect();
        // The vector exists and a link leads from it to its owning chunk
        let usable = |vector_id: u64, chunk_id: u64| {
            self.vectors.contains(&vector_id) && link_pairs.contains(&(vector_id, chunk_id))
        };
        let mut findings = Findings::default();

        for &(id, path_id, vector_id) in &self.file_chunks {
            if !self.file_paths.contains(&path_id) || !usable(vector_id, id) {
                findings.dangling_file_chunks.push(id);
            }
        }

        for &(vector_id, chunk_id) in &self.shadow_chunks {
            if !chunk_ids.contains(&chunk_id) || !usable(vector_id, chunk_id) {
                findings.orphaned_shadow_chunks.push((vector_id, chunk_id));
            }
        }

        let mut missing_vectors = HashSet::new();
        let mut missing_chunks = HashSet::new();
        for &(vector_id, chunk_id) in &self.links {
            let vector_gone = !self.vectors.contains(&vector_id);
            let chunk_gone = !chunk_ids.contains(&chunk_id);
            if vector_gone {
                missing_vectors.insert(vector_id);
            }
            if chunk_gone {
                missing_chunks.insert(chunk_id);
            }
            if vector_gone || chunk_gone {
                findings.dangling_links += 1;
            }
        }
        findings.link_missing_vectors = missing_vectors.into_iter().collect();
        findings.link_missing_chunks = missing_chunks.into_iter().collect();

        let owned: HashSet<u64> = self
            .file_chunks
            .iter()
            .map(|c| c.2)
            .chain(self.shadow_chunks.iter().map(|s| s.0))
            .collect();
        findings.orphaned_vectors = self
            .vectors
            .iter()
            .filter(|v| !owned.contains(v) || !linked.contains(v))
            .copied()
            .collect();

        let referenced: HashSet<u64> = self.file_chunks.iter().map(|c| c.1).collect();
        findings.orphaned_file_paths = self
            .file_paths
            .iter()
            .filter(|p| !referenced.contains(p))
            .copied()
            .collect();

        for ids in [
            &mut findings.orphaned_vectors,
            &mut findings.orphaned_file_paths,
            &mut findings.dangling_file_chunks,
            &mut findings.link_missing_vectors,
            &mut findings.link_missing_chunks,
        ] {
            ids.sort_unstable();
        }
        findings
    }
}

impl Findings {
    fn report(&self, repaired: bool) -> IntegrityReport {
        IntegrityReport {
            orphaned_vectors: self.orphaned_vectors.len(),
            dangling_links: self.dangling_links,
            orphaned_shadow_chunks: self.orphaned_shadow_chunks.len(),
            orphaned_file_paths: self.orphaned_file_paths.len(),
            dangling_file_chunks: self.dangling_file_chunks.len(),
            repaired,
        }
    }
}

async fn pairs(table: &lancedb::Table, columns: [&str; 2]) -> Result<Vec<(u64, u64)>> {
    let batches = select(table, &columns, None).await?;
    let mut rows = Vec::new();
    for batch in &batches {
        let left = u64_column(batch, columns[0])?;
        let right = u64_column(batch, columns[1])?;
        rows.extend((0..batch.num_rows()).map(|i| (left.value(i), right.value(i))));
    }
    Ok(rows)
}

impl LanceVectorDB {
    async fn snapshot(&self) -> Result<Snapshot> {
        let tables = &self.tables;

        let chunk_batches = select(
            &tables.file_chunks,
            &["id", "file_path_id", "vector_id"],
            None,
        )
        .await?;
        let mut file_chunks = Vec::new();
        for batch in &chunk_batches {
            let id = u64_column(batch, "id")?;
            let path_id = u64_column(batch, "file_path_id")?;
            let vector_id = u64_column(batch, "vector_id")?;
            file_chunks.extend(
                (0..batch.num_rows()).map(|i| (id.value(i), path_id.value(i), vector_id.value(i))),
            );
        }

        Ok(Snapshot {
            vectors: scan_u64(&tables.vectors, "id").await?.into_iter().collect(),
            file_paths: scan_u64(&tables.file_paths, "id").await?.into_iter().collect(),
            file_chunks,
            links: pairs(&tables.links, ["vector_id", "file_chunk_id"]).await?,
            shadow_chunks: pairs(&tables.shadow_chunks, ["vector_id", "file_chunk_id"]).await?,
        })
    }

    /// Scan, log and optionally repair. The report always describes the state found
    /// before any repair.
    pub(super) async fn check_integrity_unlocked(&self, repair: bool) -> Result<IntegrityReport> {
        let initial = self.snapshot().await?.findings();
        log_findings(&initial);
        let report = initial.report(repair);
        if !repair || report.is_clean() {
            return Ok(report);
        }

        // Dangling chunks go first; their cascade takes links and shadows with them.
        if !initial.dangling_file_chunks.is_empty() {
            self.delete_file_chunks_unlocked(&initial.dangling_file_chunks)
                .await?;
        }

        let findings = self.snapshot().await?.findings();
        if !findings.orphaned_shadow_chunks.is_empty() {
            let vector_ids: Vec<u64> = findings
                .orphaned_shadow_chunks
                .iter()
                .map(|s| s.0)
                .collect();
            delete_in(&self.tables.links, "vector_id", &vector_ids).await?;
            delete_in(&self.tables.vectors, "id", &vector_ids).await?;
            delete_in(&self.tables.shadow_chunks, "vector_id", &vector_ids).await?;
        }

        let findings = self.snapshot().await?.findings();
        delete_in(&self.tables.links, "vector_id", &findings.link_missing_vectors).await?;
        delete_in(&self.tables.links, "file_chunk_id", &findings.link_missing_chunks).await?;
        delete_in(&self.tables.vectors, "id", &findings.orphaned_vectors).await?;
        self.delete_file_paths(&findings.orphaned_file_paths).await?;

        tracing::info!("Repaired {} integrity violations", report.total());
        Ok(report)
    }
}

fn log_findings(findings: &Findings) {
    if !findings.dangling_file_chunks.is_empty() {
        tracing::warn!(
            "{} file chunks reference a missing path or vector: {:?}",
            findings.dangling_file_chunks.len(),
            findings.dangling_file_chunks
        );
    }
    if !findings.orphaned_shadow_chunks.is_empty() {
        tracing::warn!(
            "{} shadow chunks reference a missing file chunk",
            findings.orphaned_shadow_chunks.len()
        );
    }
    if findings.dangling_links > 0 {
        tracing::warn!("{} links are dangling", findings.dangling_links);
    }
    if !findings.orphaned_vectors.is_empty() {
        tracing::warn!(
            "{} vectors have no owner: {:?}",
            findings.orphaned_vectors.len(),
            findings.orphaned_vectors
        );
    }
    if !findings.orphaned_file_paths.is_empty() {
        tracing::warn!(
            "{} file paths are unreferenced",
            findings.orphaned_file_paths.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_findings_on_consistent_snapshot() {
        let snapshot = Snapshot {
            vectors: HashSet::from([0, 1, 2]),
            file_paths: HashSet::from([0]),
            file_chunks: vec![(0, 0, 0), (1, 0, 1)],
            links: vec![(0, 0), (1, 1), (2, 0)],
            shadow_chunks: vec![(2, 0)],
        };
        assert!(snapshot.findings().report(false).is_clean());
    }

    #[test]
    fn test_findings_classify_each_violation() {
        let snapshot = Snapshot {
            // vector 9 is orphaned, vector 1 is missing
            vectors: HashSet::from([0, 2, 9]),
            // path 5 is unreferenced, path 7 is missing
            file_paths: HashSet::from([0, 5]),
            file_chunks: vec![(0, 0, 0), (1, 0, 1), (3, 7, 2)],
            links: vec![(0, 0), (1, 1), (2, 3), (4, 8)],
            // shadow of the missing chunk 6
            shadow_chunks: vec![(4, 6)],
        };
        let findings = snapshot.findings();

        assert_eq!(findings.dangling_file_chunks, vec![1, 3]);
        assert_eq!(findings.orphaned_shadow_chunks, vec![(4, 6)]);
        assert_eq!(findings.orphaned_vectors, vec![9]);
        assert_eq!(findings.orphaned_file_paths, vec![5]);
        // (1, 1): vector 1 missing; (4, 8): both missing
        assert_eq!(findings.dangling_links, 2);
        assert_eq!(findings.link_missing_vectors, vec![1, 4]);
        assert_eq!(findings.link_missing_chunks, vec![8]);
    }

    #[test]
    fn test_link_to_another_chunk_does_not_count() {
        // Chunk 0 owns vector 0, but the only link for vector 0 points at missing chunk 5
        let snapshot = Snapshot {
            vectors: HashSet::from([0, 1]),
            file_paths: HashSet::from([0]),
            file_chunks: vec![(0, 0, 0), (1, 0, 1)],
            links: vec![(0, 5), (1, 1)],
            shadow_chunks: vec![],
        };
        let findings = snapshot.findings();

        assert_eq!(findings.dangling_file_chunks, vec![0]);
        assert_eq!(findings.dangling_links, 1);
        assert_eq!(findings.link_missing_chunks, vec![5]);
        assert!(findings.orphaned_vectors.is_empty());
    }
}
