// ==============================================================================
// stage/store.rs - Staging Store
// ==============================================================================
// Description: Batch upsert-with-conflict-report storage for stage documents
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Upsert semantics per operation:
//   - create the document if missing (immutable fields set on insert only)
//   - add the "<study>_<file>" tag
//   - append the payloads to studies[study].files[file]
// A duplicate-key race on insert is reported as a conflict for that key;
// the operation is not applied and the rest of the batch proceeds.
// ==============================================================================

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use tokio::sync::Mutex;

use super::document::{study_file_tag, StageDocument, StudyStage};
use crate::error::Result;
use crate::models::Variant;

/// Append of one or more payloads to one document
#[derive(Debug, Clone, PartialEq)]
pub struct StageUpsert {
    pub id: String,
    pub variant: Variant,
    pub study: String,
    pub file: String,
    pub payloads: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertMode {
    /// Insert missing documents, update existing ones
    Upsert,
    /// Update existing documents only; a missing document is a conflict
    UpdateOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Document created; `appended` payloads stored
    Inserted { appended: usize },
    /// `previous_file_entries` payloads were stored for the same study/file
    /// before this update, `appended` were added by it
    Updated { previous_file_entries: usize, appended: usize },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertReport {
    pub outcomes: Vec<(String, UpsertOutcome)>,
    /// Keys whose operation was not applied because of a duplicate-key race
    pub conflicts: Vec<String>,
}

/// Selection of documents for scans and counts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageFilter {
    pub study: String,
    /// Restrict to documents with data from these files (empty keeps all)
    pub files: Vec<String>,
    /// Restrict to these chromosomes (empty keeps all)
    pub chromosomes: Vec<String>,
}

impl StageFilter {
    pub fn new(study: &str) -> Self {
        Self {
            study: study.to_string(),
            ..Default::default()
        }
    }

    pub fn files(mut self, files: &[String]) -> Self {
        self.files = files.to_vec();
        self
    }

    pub fn chromosomes(mut self, chromosomes: &[String]) -> Self {
        self.chromosomes = chromosomes.to_vec();
        self
    }

    pub fn matches(&self, doc: &StageDocument) -> bool {
        doc.has_study(&self.study)
            && (self.files.is_empty()
                || self
                    .files
                    .iter()
                    .any(|f| doc.study_files.contains(&study_file_tag(&self.study, f))))
            && (self.chromosomes.is_empty() || self.chromosomes.contains(&doc.chromosome))
    }
}

#[async_trait]
pub trait StageStore: Send + Sync {
    /// Apply a batch of upserts; conflicting keys are reported, not raised
    ///
    /// With `resume`, payloads already present for the study/file are not
    /// appended again.
    async fn upsert_batch(&self, ops: &[StageUpsert], mode: UpsertMode, resume: bool) -> Result<UpsertReport>;

    async fn get(&self, id: &str) -> Result<Option<StageDocument>>;

    /// Up to `limit` matching documents with id greater than `after`, in id order
    async fn scan(&self, filter: &StageFilter, after: Option<&str>, limit: usize) -> Result<Vec<StageDocument>>;

    async fn count(&self, filter: &StageFilter) -> Result<u64>;

    /// Mark files as merged: their payloads become `None` and the study is no
    /// longer new. Returns the number of documents modified.
    async fn clean_files(&self, study: &str, files: &[String], chromosomes: &[String]) -> Result<usize>;
}

/// Apply one upsert to a document
///
/// # Returns
/// * `(previous, appended)` - Payloads stored for the file before the call,
///   and payloads actually added (resume skips those already present)
pub(crate) fn apply_upsert(doc: &mut StageDocument, op: &StageUpsert, resume: bool) -> (usize, usize) {
    doc.study_files.insert(study_file_tag(&op.study, &op.file));
    let study = doc
        .studies
        .entry(op.study.clone())
        .or_insert_with(|| StudyStage {
            new_study: true,
            files: BTreeMap::new(),
        });
    let data = study
        .files
        .entry(op.file.clone())
        .or_insert(None)
        .get_or_insert_with(Vec::new);

    let previous = data.len();
    for payload in &op.payloads {
        if resume && data.contains(payload) {
            continue;
        }
        data.push(payload.clone());
    }
    (previous, data.len() - previous)
}

/// Clear the given files of one document, returning whether anything changed
pub(crate) fn apply_clean(doc: &mut StageDocument, study: &str, files: &[String]) -> bool {
    let Some(stage) = doc.studies.get_mut(study) else {
        return false;
    };
    let mut changed = false;
    for file in files {
        if let Some(slot) = stage.files.get_mut(file) {
            if slot.is_some() {
                *slot = None;
                changed = true;
            }
        }
    }
    if changed {
        stage.new_study = false;
    }
    changed
}

#[derive(Debug, Default)]
struct MemoryStageState {
    docs: BTreeMap<String, StageDocument>,
    conflict_keys: HashSet<String>,
    conflict_batches: usize,
}

/// In-memory staging store
///
/// Duplicate-key races can be injected with [`MemoryStageStore::inject_conflicts`].
#[derive(Debug, Default)]
pub struct MemoryStageStore {
    state: Mutex<MemoryStageState>,
}

impl MemoryStageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `keys` as duplicate-key conflicts in the next `batches` upsert calls
    ///
    /// A conflicting key behaves as if another writer inserted the document
    /// first: the document exists afterwards, without this operation's data.
    pub async fn inject_conflicts(&self, keys: &[&str], batches: usize) {
        let mut state = self.state.lock().await;
        state.conflict_keys = keys.iter().map(|k| k.to_string()).collect();
        state.conflict_batches = batches;
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.docs.is_empty()
    }
}

#[async_trait]
impl StageStore for MemoryStageStore {
    async fn upsert_batch(&self, ops: &[StageUpsert], mode: UpsertMode, resume: bool) -> Result<UpsertReport> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let inject = state.conflict_batches > 0;
        if inject {
            state.conflict_batches -= 1;
        }

        let mut report = UpsertReport::default();
        for op in ops {
            if inject && state.conflict_keys.contains(&op.id) {
                state
                    .docs
                    .entry(op.id.clone())
                    .or_insert_with(|| StageDocument::new(&op.variant));
                report.conflicts.push(op.id.clone());
                continue;
            }

            match state.docs.get_mut(&op.id) {
                Some(doc) => {
                    let (previous, appended) = apply_upsert(doc, op, resume);
                    report.outcomes.push((
                        op.id.clone(),
                        UpsertOutcome::Updated {
                            previous_file_entries: previous,
                            appended,
                        },
                    ));
                }
                None if mode == UpsertMode::UpdateOnly => report.conflicts.push(op.id.clone()),
                None => {
                    let mut doc = StageDocument::new(&op.variant);
                    let (_, appended) = apply_upsert(&mut doc, op, resume);
                    state.docs.insert(op.id.clone(), doc);
                    report.outcomes.push((op.id.clone(), UpsertOutcome::Inserted { appended }));
                }
            }
        }
        Ok(report)
    }

    async fn get(&self, id: &str) -> Result<Option<StageDocument>> {
        Ok(self.state.lock().await.docs.get(id).cloned())
    }

    async fn scan(&self, filter: &StageFilter, after: Option<&str>, limit: usize) -> Result<Vec<StageDocument>> {
        let state = self.state.lock().await;
        let lower = match after {
            Some(after) => Bound::Excluded(after),
            None => Bound::Unbounded,
        };
        Ok(state
            .docs
            .range::<str, _>((lower, Bound::Unbounded))
            .map(|(_, doc)| doc)
            .filter(|doc| filter.matches(doc))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &StageFilter) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.docs.values().filter(|doc| filter.matches(doc)).count() as u64)
    }

    async fn clean_files(&self, study: &str, files: &[String], chromosomes: &[String]) -> Result<usize> {
        let mut state = self.state.lock().await;
        let mut modified = 0;
        for doc in state.docs.values_mut() {
            if !chromosomes.is_empty() && !chromosomes.contains(&doc.chromosome) {
                continue;
            }
            if apply_clean(doc, study, files) {
                modified += 1;
            }
        }
        Ok(modified)
    }
}
