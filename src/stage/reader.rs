// ==============================================================================
// stage/reader.rs - Stage Reader
// ==============================================================================
// Description: Batched, position-ordered reads that never split an overlap group
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use super::document::StageDocument;
use super::store::{StageFilter, StageStore};
use crate::error::Result;

const DEFAULT_FETCH_SIZE: usize = 1000;

/// Single-consumer reader over the stage documents of a study
pub struct StageReader {
    store: Arc<dyn StageStore>,
    filter: StageFilter,
    fetch_size: usize,
    cursor: Option<String>,
    fetched: VecDeque<StageDocument>,
    exhausted: bool,
    /// Lookahead held back from the previous batch
    pending: Option<StageDocument>,
}

impl StageReader {
    pub fn new(store: Arc<dyn StageStore>, filter: StageFilter) -> Self {
        Self {
            store,
            filter,
            fetch_size: DEFAULT_FETCH_SIZE,
            cursor: None,
            fetched: VecDeque::new(),
            exhausted: false,
            pending: None,
        }
    }

    /// Documents requested from the store per round trip
    pub fn fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    /// Matching documents in the store
    pub async fn count(&self) -> Result<u64> {
        self.store.count(&self.filter).await
    }

    async fn pull(&mut self) -> Result<Option<StageDocument>> {
        if self.fetched.is_empty() && !self.exhausted {
            let page = self
                .store
                .scan(&self.filter, self.cursor.as_deref(), self.fetch_size)
                .await?;
            if page.len() < self.fetch_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.cursor = Some(last.id.clone());
            }
            self.fetched.extend(page);
        }
        Ok(self.fetched.pop_front())
    }

    /// Next batch of about `size` documents; empty once the reader is drained
    ///
    /// A document overlapping the last one of a full batch is appended to it,
    /// so the batch can grow beyond `size`.
    pub async fn next_batch(&mut self, size: usize) -> Result<Vec<StageDocument>> {
        let size = size.max(1);
        let mut batch = Vec::with_capacity(size);
        if let Some(doc) = self.pending.take() {
            batch.push(doc);
        }
        while batch.len() < size {
            match self.pull().await? {
                Some(doc) => batch.push(doc),
                None => return Ok(batch),
            }
        }

        while let Some(next) = self.pull().await? {
            let overlaps = batch.last().map(|last| last.overlaps(&next)).unwrap_or(false);
            if overlaps {
                batch.push(next);
            } else {
                self.pending = Some(next);
                break;
            }
        }
        if batch.len() > size {
            debug!("Batch grew to {} documents to keep overlapping variants together", batch.len());
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Variant, VariantRecord};
    use crate::stage::converter::StageConverter;
    use crate::stage::loader::StageLoader;
    use crate::stage::store::MemoryStageStore;

    async fn load(store: &Arc<MemoryStageStore>, file: &str, variants: &[Variant]) {
        let records: Vec<VariantRecord> = variants.iter().cloned().map(VariantRecord::new).collect();
        let batch = StageConverter::default().convert(&records).unwrap();
        StageLoader::new(store.clone(), "study", file).load(&batch).await.unwrap();
    }

    fn starts(batch: &[StageDocument]) -> Vec<u64> {
        batch.iter().map(|d| d.start).collect()
    }

    #[tokio::test]
    async fn test_overlap_kept_in_one_batch() {
        let store = Arc::new(MemoryStageStore::new());
        load(
            &store,
            "f1",
            &[
                Variant::new("1", 100, "ACGTA", "A"),
                Variant::new("1", 102, "G", "T"),
                Variant::new("1", 200, "C", "T"),
            ],
        )
        .await;

        let mut reader = StageReader::new(store.clone(), StageFilter::new("study"));
        assert_eq!(starts(&reader.next_batch(1).await.unwrap()), vec![100, 102]);
        assert_eq!(starts(&reader.next_batch(1).await.unwrap()), vec![200]);
        assert!(reader.next_batch(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_overlap_chain_across_fetch_pages() {
        let store = Arc::new(MemoryStageStore::new());
        load(
            &store,
            "f1",
            &[
                Variant::new("1", 10, "A", "G"),
                Variant::new("1", 20, "ACGTACGT", "A"),
                Variant::new("1", 25, "GTAC", "G"),
                Variant::new("1", 27, "A", "C"),
                Variant::new("1", 40, "T", "C"),
                Variant::new("2", 5, "T", "C"),
            ],
        )
        .await;

        let mut reader = StageReader::new(store.clone(), StageFilter::new("study")).fetch_size(2);
        assert_eq!(reader.count().await.unwrap(), 6);
        assert_eq!(starts(&reader.next_batch(2).await.unwrap()), vec![10, 20, 25, 27]);
        assert_eq!(starts(&reader.next_batch(2).await.unwrap()), vec![40, 5]);
        assert!(reader.next_batch(2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_and_chromosome_filters() {
        let store = Arc::new(MemoryStageStore::new());
        load(&store, "f1", &[Variant::new("1", 10, "A", "G"), Variant::new("2", 10, "A", "G")]).await;
        load(&store, "f2", &[Variant::new("1", 30, "A", "G")]).await;

        let filter = StageFilter::new("study")
            .files(&["f1".to_string()])
            .chromosomes(&["1".to_string()]);
        let mut reader = StageReader::new(store.clone(), filter);
        assert_eq!(reader.count().await.unwrap(), 1);
        assert_eq!(starts(&reader.next_batch(10).await.unwrap()), vec![10]);
        assert!(reader.next_batch(10).await.unwrap().is_empty());
    }
}
