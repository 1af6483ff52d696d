// ==============================================================================
// index/store.rs - Sample Index Storage
// ==============================================================================
// Description: Storage trait for index entries plus the in-memory implementation
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

use super::entry::{ChunkKey, SampleIndexEntry};
use crate::error::{IndexError, Result};
use crate::models::{Region, SampleId};
use crate::schema::SampleIndexSchema;

/// Point and range access to sample index entries
///
/// Every call is scoped to a study and the schema version the entries were
/// (or will be) written with.
#[async_trait]
pub trait SampleIndexStore: Send + Sync {
    async fn read_entry(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        key: &ChunkKey,
    ) -> Result<Option<SampleIndexEntry>>;

    /// Write (insert or replace) a batch of entries
    async fn write_entries(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        entries: Vec<SampleIndexEntry>,
    ) -> Result<()>;

    /// Entries of one sample in chunk order, optionally restricted to a region
    async fn scan(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        sample: SampleId,
        region: Option<&Region>,
    ) -> Result<Vec<SampleIndexEntry>>;

    /// Contiguous regions covered by existing entries of `samples`
    async fn region_bounds(
        &self,
        _study: &str,
        _schema: &SampleIndexSchema,
        _samples: &[SampleId],
    ) -> Result<Vec<Region>> {
        Err(IndexError::NotSupported(
            "region bounds for this sample index backend".to_string(),
        ))
    }

    /// Count indexed variants of a sample, optionally by region and genotype
    ///
    /// An empty `gts` counts every genotype.
    async fn count(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        sample: SampleId,
        region: Option<&Region>,
        gts: &[String],
    ) -> Result<u64> {
        let entries = self.scan(study, schema, sample, region).await?;
        let mut total = 0u64;
        for entry in &entries {
            for (gt, gt_entry) in &entry.gts {
                if !gts.is_empty() && !gts.contains(gt) {
                    continue;
                }
                match region {
                    Some(region) => {
                        for variant in entry.variants(gt)? {
                            if region.contains(&variant.chromosome, variant.start) {
                                total += 1;
                            }
                        }
                    }
                    None => total += gt_entry.variants.len() as u64,
                }
            }
        }
        Ok(total)
    }
}

/// Whether a chunk intersects a region
pub(crate) fn chunk_in_region(
    schema: &SampleIndexSchema,
    chromosome: &str,
    chunk_start: u64,
    region: Option<&Region>,
) -> bool {
    match region {
        None => true,
        Some(region) => region.overlaps_range(
            chromosome,
            chunk_start,
            chunk_start + schema.chunk_size() - 1,
        ),
    }
}

/// Widest region reported by `region_bounds`, in chunks
///
/// Callers load every entry of a region at once, so runs of adjacent chunks
/// are split at this width.
pub const MAX_REGION_CHUNKS: u64 = 16;

/// Merge chunk keys into contiguous regions, ordered by chromosome then start
pub(crate) fn merge_chunk_bounds<'a>(
    schema: &SampleIndexSchema,
    chunks: impl IntoIterator<Item = (&'a str, u64)>,
) -> Vec<Region> {
    let mut by_chromosome: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
    for (chromosome, chunk_start) in chunks {
        by_chromosome.entry(chromosome).or_default().push(chunk_start);
    }

    let size = schema.chunk_size();
    let mut regions = Vec::new();
    for (chromosome, mut starts) in by_chromosome {
        starts.sort_unstable();
        starts.dedup();
        let mut current: Option<Region> = None;
        for start in starts {
            if let Some(region) = current.as_mut() {
                if region.end + 1 == start && (start - region.start) / size < MAX_REGION_CHUNKS {
                    region.end = start + size - 1;
                    continue;
                }
            }
            if let Some(done) = current.take() {
                regions.push(done);
            }
            current = Some(Region::new(chromosome, start, start + size - 1));
        }
        regions.extend(current);
    }
    regions
}

type StoreKey = (String, u32, ChunkKey);

/// In-memory store for tests and single-process runs
#[derive(Debug, Default)]
pub struct MemorySampleIndexStore {
    entries: RwLock<BTreeMap<StoreKey, SampleIndexEntry>>,
    write_calls: AtomicUsize,
}

impl MemorySampleIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `write_entries` calls so far
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Every stored key of a study/version, in order
    pub async fn keys(&self, study: &str, version: u32) -> Vec<ChunkKey> {
        self.entries
            .read()
            .await
            .keys()
            .filter(|(s, v, _)| s == study && *v == version)
            .map(|(_, _, k)| k.clone())
            .collect()
    }
}

#[async_trait]
impl SampleIndexStore for MemorySampleIndexStore {
    async fn read_entry(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        key: &ChunkKey,
    ) -> Result<Option<SampleIndexEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(study.to_string(), schema.version(), key.clone()))
            .cloned())
    }

    async fn write_entries(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        entries: Vec<SampleIndexEntry>,
    ) -> Result<()> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.entries.write().await;
        for entry in entries {
            if entry.schema_version != schema.version() {
                return Err(IndexError::Schema(format!(
                    "Entry built with schema version {} written as version {}",
                    entry.schema_version,
                    schema.version()
                ))
                .for_entry(entry.sample_id, &entry.chromosome, entry.chunk_start, schema.version()));
            }
            stored.insert((study.to_string(), schema.version(), entry.key()), entry);
        }
        Ok(())
    }

    async fn scan(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        sample: SampleId,
        region: Option<&Region>,
    ) -> Result<Vec<SampleIndexEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|((s, v, k), _)| {
                s == study
                    && *v == schema.version()
                    && k.sample_id == sample
                    && chunk_in_region(schema, &k.chromosome, k.chunk_start, region)
            })
            .map(|(_, e)| e.clone())
            .collect())
    }

    async fn region_bounds(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        samples: &[SampleId],
    ) -> Result<Vec<Region>> {
        let entries = self.entries.read().await;
        let chunks = entries
            .keys()
            .filter(|(s, v, k)| s == study && *v == schema.version() && samples.contains(&k.sample_id))
            .map(|(_, _, k)| (k.chromosome.as_str(), k.chunk_start));
        Ok(merge_chunk_bounds(schema, chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::codec::encode_position_key;
    use crate::index::entry::{SampleIndexEntryBuilder, SampleIndexVariant};
    use crate::models::Variant;
    use crate::schema::SampleIndexConfiguration;

    fn schema() -> SampleIndexSchema {
        SampleIndexSchema::new(1, SampleIndexConfiguration::default()).unwrap()
    }

    fn entry(sample: SampleId, chromosome: &str, positions: &[(u64, &str)]) -> SampleIndexEntry {
        let schema = schema();
        let chunk = schema.chunk_start(positions[0].0);
        let mut builder = SampleIndexEntryBuilder::new(sample, 1, chromosome, chunk);
        for (pos, gt) in positions {
            let key = encode_position_key(&Variant::new(chromosome, *pos, "A", "G"), chunk).unwrap();
            builder.add(gt, SampleIndexVariant::new(key));
        }
        builder.build()
    }

    #[test]
    fn test_merge_chunk_bounds() {
        let schema = schema();
        let regions = merge_chunk_bounds(
            &schema,
            vec![("1", 0), ("1", 1_000_000), ("1", 3_000_000), ("2", 0), ("1", 0)],
        );
        assert_eq!(
            regions,
            vec![
                Region::new("1", 0, 1_999_999),
                Region::new("1", 3_000_000, 3_999_999),
                Region::new("2", 0, 999_999),
            ]
        );
    }

    #[test]
    fn test_merge_chunk_bounds_caps_region_width() {
        let schema = schema();
        let size = schema.chunk_size();
        let chunks: Vec<(&str, u64)> = (0..MAX_REGION_CHUNKS * 2 + 1).map(|i| ("1", i * size)).collect();
        let regions = merge_chunk_bounds(&schema, chunks);

        assert_eq!(regions.len(), 3);
        assert_eq!(regions[0], Region::new("1", 0, MAX_REGION_CHUNKS * size - 1));
        assert_eq!(regions[1].start, MAX_REGION_CHUNKS * size);
        assert_eq!(regions[2], Region::new("1", 2 * MAX_REGION_CHUNKS * size, (2 * MAX_REGION_CHUNKS + 1) * size - 1));
        // Contiguous, no gaps or overlap
        for pair in regions.windows(2) {
            assert_eq!(pair[0].end + 1, pair[1].start);
        }
    }

    #[tokio::test]
    async fn test_write_read_scan() {
        let store = MemorySampleIndexStore::new();
        let schema = schema();
        store
            .write_entries(
                "study",
                &schema,
                vec![
                    entry(1, "1", &[(10, "0/1")]),
                    entry(1, "1", &[(2_000_010, "1/1")]),
                    entry(2, "1", &[(10, "0/1")]),
                ],
            )
            .await
            .unwrap();

        let read = store
            .read_entry("study", &schema, &ChunkKey::new(1, "1", 2_000_000))
            .await
            .unwrap()
            .unwrap();
        assert!(read.gts.contains_key("1/1"));

        let all = store.scan("study", &schema, 1, None).await.unwrap();
        assert_eq!(all.len(), 2);
        let first_chunk = store
            .scan("study", &schema, 1, Some(&Region::new("1", 1, 500)))
            .await
            .unwrap();
        assert_eq!(first_chunk.len(), 1);

        let bounds = store.region_bounds("study", &schema, &[1]).await.unwrap();
        assert_eq!(
            bounds,
            vec![Region::new("1", 0, 999_999), Region::new("1", 2_000_000, 2_999_999)]
        );
    }

    #[tokio::test]
    async fn test_count() {
        let store = MemorySampleIndexStore::new();
        let schema = schema();
        store
            .write_entries(
                "study",
                &schema,
                vec![entry(1, "1", &[(10, "0/1"), (20, "1/1"), (30, "0/1")])],
            )
            .await
            .unwrap();

        assert_eq!(store.count("study", &schema, 1, None, &[]).await.unwrap(), 3);
        assert_eq!(
            store.count("study", &schema, 1, None, &["0/1".to_string()]).await.unwrap(),
            2
        );
        assert_eq!(
            store
                .count("study", &schema, 1, Some(&Region::new("1", 15, 25)), &[])
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_version_mismatch_has_context() {
        let store = MemorySampleIndexStore::new();
        let v2 = SampleIndexSchema::new(2, SampleIndexConfiguration::default()).unwrap();
        let err = store
            .write_entries("study", &v2, vec![entry(5, "3", &[(7, "0/1")])])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Entry { sample: 5, .. }));
    }
}
