// ==============================================================================
// stage/loader.rs - Stage Loader
// ==============================================================================
// Description: Conflict-safe batch loading of one (study, file) into staging
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Write protocol:
//   1. Group payloads by document key (one operation per key)
//   2. Upsert the whole batch
//   3. Keys reported as duplicate-key conflicts are retried once, as updates
//      only, since the racing writer has created those documents
//   4. A conflict during the retry is fatal (StageWriteConflict)
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::converter::{ConvertedBatch, StageConverter};
use super::store::{StageStore, StageUpsert, UpsertMode, UpsertOutcome, UpsertReport};
use crate::error::{IndexError, Result};
use crate::metadata::{MetadataStore, TaskStatus};
use crate::models::VariantRecord;

/// Write statistics of one or more loaded batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageWriteResult {
    /// Documents created by this writer
    pub new_variants: u64,
    /// Existing documents that received this file's first payload
    pub updated_variants: u64,
    /// Payloads appended next to an earlier payload of the same file
    pub duplicated_variants: u64,
    /// Records dropped by the converter's skip set
    pub skipped_variants: u64,
    /// Keys that went through the duplicate-key retry
    pub retried_keys: u64,
}

impl StageWriteResult {
    pub fn merge(&mut self, other: &StageWriteResult) -> &mut Self {
        self.new_variants += other.new_variants;
        self.updated_variants += other.updated_variants;
        self.duplicated_variants += other.duplicated_variants;
        self.skipped_variants += other.skipped_variants;
        self.retried_keys += other.retried_keys;
        self
    }

    /// Count what the store actually appended; payloads skipped in resume
    /// mode are not duplicates
    fn account(&mut self, report: &UpsertReport) {
        for (_, outcome) in &report.outcomes {
            match *outcome {
                UpsertOutcome::Inserted { appended } => {
                    self.new_variants += 1;
                    self.duplicated_variants += (appended as u64).saturating_sub(1);
                }
                UpsertOutcome::Updated {
                    previous_file_entries: 0,
                    appended,
                } if appended > 0 => {
                    self.updated_variants += 1;
                    self.duplicated_variants += appended as u64 - 1;
                }
                UpsertOutcome::Updated {
                    previous_file_entries: 0,
                    ..
                } => {}
                UpsertOutcome::Updated { appended, .. } => self.duplicated_variants += appended as u64,
            }
        }
    }
}

impl fmt::Display for StageWriteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "new: {}, updated: {}, duplicated: {}, skipped: {}, retried: {}",
            self.new_variants,
            self.updated_variants,
            self.duplicated_variants,
            self.skipped_variants,
            self.retried_keys
        )
    }
}

pub struct StageLoader {
    store: Arc<dyn StageStore>,
    study: String,
    file: String,
    resume: bool,
}

impl StageLoader {
    pub fn new(store: Arc<dyn StageStore>, study: &str, file: &str) -> Self {
        Self {
            store,
            study: study.to_string(),
            file: file.to_string(),
            resume: false,
        }
    }

    /// Append payloads only if not already stored for this file
    pub fn resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Load one converted batch
    ///
    /// # Returns
    /// * `Ok(StageWriteResult)` - Counts for this batch
    /// * `Err(IndexError::StageWriteConflict)` - Conflict persisted through the retry
    pub async fn load(&self, batch: &ConvertedBatch) -> Result<StageWriteResult> {
        let mut grouped: BTreeMap<&str, StageUpsert> = BTreeMap::new();
        for staged in &batch.variants {
            match grouped.get_mut(staged.id.as_str()) {
                Some(op) => op.payloads.push(staged.payload.clone()),
                None => {
                    grouped.insert(
                        staged.id.as_str(),
                        StageUpsert {
                            id: staged.id.clone(),
                            variant: staged.variant.clone(),
                            study: self.study.clone(),
                            file: self.file.clone(),
                            payloads: vec![staged.payload.clone()],
                        },
                    );
                }
            }
        }
        let ops: Vec<StageUpsert> = grouped.into_values().collect();

        let mut result = StageWriteResult {
            skipped_variants: batch.skipped,
            ..Default::default()
        };

        let report = self.store.upsert_batch(&ops, UpsertMode::Upsert, self.resume).await?;
        result.account(&report);

        if !report.conflicts.is_empty() {
            let conflicts: HashSet<&str> = report.conflicts.iter().map(String::as_str).collect();
            let retry: Vec<StageUpsert> = ops
                .iter()
                .filter(|op| conflicts.contains(op.id.as_str()))
                .cloned()
                .collect();
            warn!(
                "Duplicate key on {} stage documents of {}/{}, retrying as updates: {:?}",
                retry.len(),
                self.study,
                self.file,
                report.conflicts
            );
            result.retried_keys += retry.len() as u64;

            let retried = self.store.upsert_batch(&retry, UpsertMode::UpdateOnly, self.resume).await?;
            if !retried.conflicts.is_empty() {
                error!(
                    "Write conflict persisted after retry on {} stage documents of {}/{}",
                    retried.conflicts.len(),
                    self.study,
                    self.file
                );
                return Err(IndexError::StageWriteConflict {
                    keys: retried.conflicts,
                });
            }
            result.account(&retried);
        }

        debug!("Loaded batch of {} keys: {}", ops.len(), result);
        Ok(result)
    }

    /// Stage a whole file in batches, tracking the file's status
    ///
    /// A file left RUNNING or ERROR by an earlier attempt is loaded again in
    /// resume mode. A READY file is not loaded twice.
    pub async fn stage_file(
        self,
        metadata: &dyn MetadataStore,
        converter: &StageConverter,
        records: impl IntoIterator<Item = Result<VariantRecord>>,
        batch_size: usize,
    ) -> Result<StageWriteResult> {
        let mut loader = self;
        let status = metadata.file_status(&loader.study, &loader.file).await?;
        match status {
            TaskStatus::Ready => {
                info!("File {} already staged in study {}, skipping", loader.file, loader.study);
                return Ok(StageWriteResult::default());
            }
            TaskStatus::Running => {
                warn!("File {} was left RUNNING, resuming", loader.file);
                loader.resume = true;
            }
            TaskStatus::Error => {
                warn!("Previous staging of {} failed, resuming", loader.file);
                metadata.set_file_status(&loader.study, &loader.file, TaskStatus::None).await?;
                loader.resume = true;
            }
            TaskStatus::None => {}
        }
        metadata
            .set_file_status(&loader.study, &loader.file, TaskStatus::Running)
            .await?;

        match loader.load_all(converter, records, batch_size.max(1)).await {
            Ok(result) => {
                metadata
                    .set_file_status(&loader.study, &loader.file, TaskStatus::Ready)
                    .await?;
                info!("Staged {} in study {}: {}", loader.file, loader.study, result);
                Ok(result)
            }
            Err(e) => {
                error!("Staging of {} failed: {}", loader.file, e);
                if let Err(status_err) = metadata
                    .set_file_status(&loader.study, &loader.file, TaskStatus::Error)
                    .await
                {
                    error!("Failed to mark file {} as ERROR: {}", loader.file, status_err);
                }
                Err(e)
            }
        }
    }

    async fn load_all(
        &self,
        converter: &StageConverter,
        records: impl IntoIterator<Item = Result<VariantRecord>>,
        batch_size: usize,
    ) -> Result<StageWriteResult> {
        let mut total = StageWriteResult::default();
        let mut pending = Vec::with_capacity(batch_size);
        for record in records {
            pending.push(record?);
            if pending.len() >= batch_size {
                let result = self.load(&converter.convert(&pending)?).await?;
                total.merge(&result);
                pending.clear();
            }
        }
        if !pending.is_empty() {
            let result = self.load(&converter.convert(&pending)?).await?;
            total.merge(&result);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MemoryMetadataStore;
    use crate::models::Variant;
    use crate::stage::document::stage_id;
    use crate::stage::store::MemoryStageStore;

    fn record(pos: u64, sample_gt: &str) -> VariantRecord {
        let mut record = VariantRecord::new(Variant::new("1", pos, "A", "G"));
        record.genotypes.push(("S1".into(), sample_gt.into()));
        record
    }

    fn convert(records: &[VariantRecord]) -> ConvertedBatch {
        StageConverter::default().convert(records).unwrap()
    }

    #[tokio::test]
    async fn test_same_variant_twice_counts_one_duplicate() {
        let store = Arc::new(MemoryStageStore::new());
        let loader = StageLoader::new(store.clone(), "study", "f1");

        let result = loader
            .load(&convert(&[record(100, "0/1"), record(100, "1/1")]))
            .await
            .unwrap();
        assert_eq!(result.new_variants, 1);
        assert_eq!(result.duplicated_variants, 1);
        assert_eq!(result.updated_variants, 0);

        let doc = store.get(&stage_id("1", 100, "A", "G")).await.unwrap().unwrap();
        assert_eq!(doc.payloads("study", "f1").len(), 2);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_variant_in_two_batches() {
        let store = Arc::new(MemoryStageStore::new());
        let loader = StageLoader::new(store.clone(), "study", "f1");

        let mut total = loader.load(&convert(&[record(100, "0/1")])).await.unwrap();
        total.merge(&loader.load(&convert(&[record(100, "0/1")])).await.unwrap());
        assert_eq!(total.new_variants, 1);
        assert_eq!(total.duplicated_variants, 1);

        let doc = store.get(&stage_id("1", 100, "A", "G")).await.unwrap().unwrap();
        assert_eq!(doc.payloads("study", "f1").len(), 2);
    }

    #[tokio::test]
    async fn test_resume_reload_reports_nothing_written() {
        let store = Arc::new(MemoryStageStore::new());
        let batch = convert(&[record(100, "0/1"), record(200, "0/1")]);
        StageLoader::new(store.clone(), "study", "f1").load(&batch).await.unwrap();

        let result = StageLoader::new(store.clone(), "study", "f1")
            .resume(true)
            .load(&batch)
            .await
            .unwrap();
        assert_eq!(result, StageWriteResult::default());

        // Only the missing payload of a partly stored key is counted
        let partial = convert(&[record(100, "0/1"), record(100, "1/1")]);
        let result = StageLoader::new(store.clone(), "study", "f1")
            .resume(true)
            .load(&partial)
            .await
            .unwrap();
        assert_eq!(result.duplicated_variants, 1);
        assert_eq!(result.updated_variants, 0);

        let doc = store.get(&stage_id("1", 100, "A", "G")).await.unwrap().unwrap();
        assert_eq!(doc.payloads("study", "f1").len(), 2);
    }

    #[tokio::test]
    async fn test_race_recovered_by_one_retry() {
        let store = Arc::new(MemoryStageStore::new());
        let key = stage_id("1", 100, "A", "G");
        store.inject_conflicts(&[&key], 1).await;

        let loader = StageLoader::new(store.clone(), "study", "f1");
        let result = loader
            .load(&convert(&[record(100, "0/1"), record(200, "0/1")]))
            .await
            .unwrap();
        assert_eq!(result.retried_keys, 1);
        assert_eq!(result.new_variants, 1);
        assert_eq!(result.updated_variants, 1);

        let doc = store.get(&key).await.unwrap().unwrap();
        assert_eq!(doc.payloads("study", "f1").len(), 1);
        assert!(doc.study_files.contains("study_f1"));
    }

    #[tokio::test]
    async fn test_second_conflict_is_fatal() {
        let store = Arc::new(MemoryStageStore::new());
        let key = stage_id("1", 100, "A", "G");
        store.inject_conflicts(&[&key], 2).await;

        let loader = StageLoader::new(store.clone(), "study", "f1");
        let err = loader.load(&convert(&[record(100, "0/1")])).await.unwrap_err();
        match err {
            IndexError::StageWriteConflict { keys } => assert_eq!(keys, vec![key]),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_skipped_types_counted() {
        let store = Arc::new(MemoryStageStore::new());
        let mut symbolic = VariantRecord::new(Variant::new("1", 50, "A", "<DUP>"));
        symbolic.genotypes.push(("S1".into(), "0/1".into()));

        let result = StageLoader::new(store.clone(), "study", "f1")
            .load(&convert(&[symbolic, record(60, "0/1")]))
            .await
            .unwrap();
        assert_eq!(result.skipped_variants, 1);
        assert_eq!(result.new_variants, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_files_same_keys() {
        let store = Arc::new(MemoryStageStore::new());
        let records: Vec<VariantRecord> = (1..=50).map(|i| record(i * 10, "0/1")).collect();

        let mut handles = Vec::new();
        for file in ["f1", "f2", "f3", "f4"] {
            let store = store.clone();
            let records = records.clone();
            handles.push(tokio::spawn(async move {
                let loader = StageLoader::new(store, "study", file);
                let mut total = StageWriteResult::default();
                for chunk in records.chunks(7) {
                    total.merge(&loader.load(&convert(chunk)).await?);
                }
                Ok::<_, IndexError>(total)
            }));
        }

        let mut total = StageWriteResult::default();
        for handle in handles {
            total.merge(&handle.await.unwrap().unwrap());
        }
        assert_eq!(total.new_variants, 50);
        assert_eq!(total.updated_variants, 150);
        assert_eq!(total.duplicated_variants, 0);

        assert_eq!(store.len().await, 50);
        let doc = store.get(&stage_id("1", 250, "A", "G")).await.unwrap().unwrap();
        for file in ["f1", "f2", "f3", "f4"] {
            assert_eq!(doc.payloads("study", file).len(), 1);
        }
    }

    #[tokio::test]
    async fn test_stage_file_status_and_resume() {
        let store = Arc::new(MemoryStageStore::new());
        let metadata = MemoryMetadataStore::new();
        let converter = StageConverter::default();
        let records: Vec<Result<VariantRecord>> = (1..=5).map(|i| Ok(record(i * 10, "0/1"))).collect();

        // Interrupted earlier attempt left the file RUNNING with some data in place
        metadata.set_file_status("study", "f1", TaskStatus::Running).await.unwrap();
        StageLoader::new(store.clone(), "study", "f1")
            .load(&convert(&[record(10, "0/1")]))
            .await
            .unwrap();

        let result = StageLoader::new(store.clone(), "study", "f1")
            .stage_file(&metadata, &converter, records, 2)
            .await
            .unwrap();
        assert_eq!(result.new_variants, 4);
        assert_eq!(result.updated_variants, 0);
        assert_eq!(result.duplicated_variants, 0);
        assert_eq!(metadata.file_status("study", "f1").await.unwrap(), TaskStatus::Ready);

        let doc = store.get(&stage_id("1", 10, "A", "G")).await.unwrap().unwrap();
        assert_eq!(doc.payloads("study", "f1").len(), 1);

        // Ready files are not staged again
        let again = StageLoader::new(store.clone(), "study", "f1")
            .stage_file(&metadata, &converter, vec![Ok(record(60, "0/1"))], 2)
            .await
            .unwrap();
        assert_eq!(again, StageWriteResult::default());
        assert_eq!(store.len().await, 5);
    }
}
