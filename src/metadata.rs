// ==============================================================================
// metadata.rs - Sample and File Index Metadata
// ==============================================================================
// Description: Index task status tracking, sample resolution and trio discovery
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Status transitions:
//   NONE    -> RUNNING
//   RUNNING -> RUNNING (resumed run), READY, ERROR
//   READY   -> RUNNING (re-index)
//   ERROR   -> NONE    (external reset only)
// ==============================================================================

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::error::{IndexError, Result};
use crate::models::{SampleId, Trio};

/// Status of one index task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    None,
    Running,
    Ready,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::None => "NONE",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Ready => "READY",
            TaskStatus::Error => "ERROR",
        }
    }

    /// Validate a transition and return the new status
    pub fn transition(self, to: TaskStatus) -> Result<TaskStatus> {
        use TaskStatus::*;
        match (self, to) {
            (None, Running)
            | (Running, Running)
            | (Running, Ready)
            | (Running, Error)
            | (Ready, Running)
            | (Error, None) => Ok(to),
            (from, to) => Err(IndexError::InvalidTransition { from, to }),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which per-sample index a status refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Genotype,
    Annotation,
    Family,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Genotype => "genotype",
            IndexKind::Annotation => "annotation",
            IndexKind::Family => "family",
        }
    }
}

/// Metadata record of one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub id: SampleId,
    pub name: String,
    #[serde(default)]
    pub father: Option<SampleId>,
    #[serde(default)]
    pub mother: Option<SampleId>,

    /// Status per schema version
    #[serde(default)]
    pub genotype_index: BTreeMap<u32, TaskStatus>,
    #[serde(default)]
    pub annotation_index: BTreeMap<u32, TaskStatus>,
    #[serde(default)]
    pub family_index: BTreeMap<u32, TaskStatus>,

    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run: Option<Uuid>,
}

impl SampleMetadata {
    pub fn new(id: SampleId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            father: None,
            mother: None,
            genotype_index: BTreeMap::new(),
            annotation_index: BTreeMap::new(),
            family_index: BTreeMap::new(),
            updated_at: Utc::now(),
            last_run: None,
        }
    }

    fn statuses(&self, kind: IndexKind) -> &BTreeMap<u32, TaskStatus> {
        match kind {
            IndexKind::Genotype => &self.genotype_index,
            IndexKind::Annotation => &self.annotation_index,
            IndexKind::Family => &self.family_index,
        }
    }

    fn statuses_mut(&mut self, kind: IndexKind) -> &mut BTreeMap<u32, TaskStatus> {
        match kind {
            IndexKind::Genotype => &mut self.genotype_index,
            IndexKind::Annotation => &mut self.annotation_index,
            IndexKind::Family => &mut self.family_index,
        }
    }

    pub fn status(&self, kind: IndexKind, version: u32) -> TaskStatus {
        self.statuses(kind).get(&version).copied().unwrap_or_default()
    }

    /// Apply a checked transition
    pub fn set_status(&mut self, kind: IndexKind, version: u32, to: TaskStatus) -> Result<()> {
        let next = self.status(kind, version).transition(to)?;
        self.statuses_mut(kind).insert(version, next);
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn ready_in_any_version(&self, kind: IndexKind) -> bool {
        self.statuses(kind).values().any(|s| *s == TaskStatus::Ready)
    }

    pub fn has_parents(&self) -> bool {
        self.father.is_some() || self.mother.is_some()
    }

    /// Reset annotation and family statuses after a schema bump
    ///
    /// Versions older than `new_version` go back to NONE and `new_version`
    /// starts at NONE. The genotype index is left alone.
    pub fn invalidate_secondary(&mut self, new_version: u32) {
        for kind in [IndexKind::Annotation, IndexKind::Family] {
            let statuses = self.statuses_mut(kind);
            for (_, status) in statuses.range_mut(..new_version) {
                *status = TaskStatus::None;
            }
            statuses.entry(new_version).or_insert(TaskStatus::None);
        }
        self.updated_at = Utc::now();
    }
}

/// Transition function applied to a copy of a sample record
pub type SampleUpdate<'a> = &'a (dyn Fn(SampleMetadata) -> Result<SampleMetadata> + Send + Sync);

/// Sample/file metadata collaborator
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Register a sample by name, returning its (possibly existing) id
    async fn register_sample(&self, study: &str, name: &str) -> Result<SampleId>;

    async fn sample_id(&self, study: &str, name: &str) -> Result<Option<SampleId>>;

    async fn sample(&self, study: &str, sample: SampleId) -> Result<SampleMetadata>;

    async fn samples(&self, study: &str) -> Result<Vec<SampleMetadata>>;

    /// Apply `update` to a copy of the record and store the result
    ///
    /// If `update` fails the stored record is unchanged.
    async fn update_sample(
        &self,
        study: &str,
        sample: SampleId,
        update: SampleUpdate<'_>,
    ) -> Result<SampleMetadata>;

    async fn register_trio(&self, study: &str, trio: Trio) -> Result<()>;

    /// Samples with at least one registered parent
    async fn trios(&self, study: &str) -> Result<Vec<Trio>>;

    async fn file_status(&self, study: &str, file: &str) -> Result<TaskStatus>;

    async fn set_file_status(&self, study: &str, file: &str, to: TaskStatus) -> Result<()>;

    async fn sample_name(&self, study: &str, sample: SampleId) -> Result<String> {
        Ok(self.sample(study, sample).await?.name)
    }

    /// Set one index status on a sample through a checked transition
    async fn set_index_status(
        &self,
        study: &str,
        sample: SampleId,
        kind: IndexKind,
        version: u32,
        to: TaskStatus,
    ) -> Result<SampleMetadata> {
        debug!(
            "Sample {} {} index v{} -> {}",
            sample,
            kind.as_str(),
            version,
            to
        );
        self.update_sample(study, sample, &move |mut metadata: SampleMetadata| {
            metadata.set_status(kind, version, to)?;
            Ok(metadata)
        })
        .await
    }

    /// Move the index of every sample to RUNNING, or of none of them
    ///
    /// All transitions are checked before any status changes. If the store
    /// fails midway, samples already moved are marked ERROR.
    async fn begin_index_run(
        &self,
        study: &str,
        samples: &[SampleId],
        kind: IndexKind,
        version: u32,
    ) -> Result<()> {
        for sample in samples {
            self.sample(study, *sample)
                .await?
                .status(kind, version)
                .transition(TaskStatus::Running)?;
        }
        for (done, sample) in samples.iter().enumerate() {
            if let Err(e) = self
                .set_index_status(study, *sample, kind, version, TaskStatus::Running)
                .await
            {
                for started in &samples[..done] {
                    if let Err(status_err) = self
                        .set_index_status(study, *started, kind, version, TaskStatus::Error)
                        .await
                    {
                        error!("Failed to mark sample {} as ERROR: {}", started, status_err);
                    }
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Record the run id on a sample
    async fn set_last_run(&self, study: &str, sample: SampleId, run: Uuid) -> Result<()> {
        self.update_sample(study, sample, &move |mut metadata: SampleMetadata| {
            metadata.last_run = Some(run);
            Ok(metadata)
        })
        .await?;
        Ok(())
    }

    /// Reset annotation and family statuses of every sample after a schema bump
    async fn invalidate_secondary_indexes(&self, study: &str, new_version: u32) -> Result<usize> {
        let samples = self.samples(study).await?;
        for sample in &samples {
            self.update_sample(study, sample.id, &move |mut metadata: SampleMetadata| {
                metadata.invalidate_secondary(new_version);
                Ok(metadata)
            })
            .await?;
        }
        info!(
            "Invalidated secondary indexes of {} samples in study {} for schema version {}",
            samples.len(),
            study,
            new_version
        );
        Ok(samples.len())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StudyState {
    next_id: SampleId,
    names: BTreeMap<String, SampleId>,
    samples: BTreeMap<SampleId, SampleMetadata>,
    files: BTreeMap<String, TaskStatus>,
}

/// In-process metadata store with JSON snapshots
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    studies: RwLock<BTreeMap<String, StudyState>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a snapshot written by [`MemoryMetadataStore::save`]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = tokio::fs::read(path.as_ref()).await?;
        let studies: BTreeMap<String, StudyState> = serde_json::from_slice(&data)?;
        Ok(Self {
            studies: RwLock::new(studies),
        })
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let studies = self.studies.read().await;
        let data = serde_json::to_vec_pretty(&*studies)?;
        tokio::fs::write(path.as_ref(), data).await?;
        Ok(())
    }
}

fn unknown(study: &str, sample: SampleId) -> IndexError {
    IndexError::UnknownSample {
        study: study.to_string(),
        sample: sample.to_string(),
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn register_sample(&self, study: &str, name: &str) -> Result<SampleId> {
        let mut studies = self.studies.write().await;
        let state = studies.entry(study.to_string()).or_default();
        if let Some(id) = state.names.get(name) {
            return Ok(*id);
        }
        state.next_id += 1;
        let id = state.next_id;
        state.names.insert(name.to_string(), id);
        state.samples.insert(id, SampleMetadata::new(id, name));
        Ok(id)
    }

    async fn sample_id(&self, study: &str, name: &str) -> Result<Option<SampleId>> {
        let studies = self.studies.read().await;
        Ok(studies.get(study).and_then(|s| s.names.get(name).copied()))
    }

    async fn sample(&self, study: &str, sample: SampleId) -> Result<SampleMetadata> {
        let studies = self.studies.read().await;
        studies
            .get(study)
            .and_then(|s| s.samples.get(&sample))
            .cloned()
            .ok_or_else(|| unknown(study, sample))
    }

    async fn samples(&self, study: &str) -> Result<Vec<SampleMetadata>> {
        let studies = self.studies.read().await;
        Ok(studies
            .get(study)
            .map(|s| s.samples.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn update_sample(
        &self,
        study: &str,
        sample: SampleId,
        update: SampleUpdate<'_>,
    ) -> Result<SampleMetadata> {
        let mut studies = self.studies.write().await;
        let slot = studies
            .get_mut(study)
            .and_then(|s| s.samples.get_mut(&sample))
            .ok_or_else(|| unknown(study, sample))?;
        let updated = update(slot.clone())?;
        *slot = updated.clone();
        Ok(updated)
    }

    async fn register_trio(&self, study: &str, trio: Trio) -> Result<()> {
        let mut studies = self.studies.write().await;
        let state = studies
            .get_mut(study)
            .ok_or_else(|| unknown(study, trio.child))?;
        for parent in [trio.father, trio.mother].into_iter().flatten() {
            if !state.samples.contains_key(&parent) {
                return Err(unknown(study, parent));
            }
        }
        let child = state
            .samples
            .get_mut(&trio.child)
            .ok_or_else(|| unknown(study, trio.child))?;
        child.father = trio.father;
        child.mother = trio.mother;
        child.updated_at = Utc::now();
        Ok(())
    }

    async fn trios(&self, study: &str) -> Result<Vec<Trio>> {
        let studies = self.studies.read().await;
        Ok(studies
            .get(study)
            .map(|s| {
                s.samples
                    .values()
                    .filter(|m| m.has_parents())
                    .map(|m| Trio::new(m.id, m.father, m.mother))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn file_status(&self, study: &str, file: &str) -> Result<TaskStatus> {
        let studies = self.studies.read().await;
        Ok(studies
            .get(study)
            .and_then(|s| s.files.get(file).copied())
            .unwrap_or_default())
    }

    async fn set_file_status(&self, study: &str, file: &str, to: TaskStatus) -> Result<()> {
        let mut studies = self.studies.write().await;
        let state = studies.entry(study.to_string()).or_default();
        let current = state.files.get(file).copied().unwrap_or_default();
        state.files.insert(file.to_string(), current.transition(to)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        use TaskStatus::*;
        assert_eq!(None.transition(Running).unwrap(), Running);
        assert_eq!(Running.transition(Ready).unwrap(), Ready);
        assert_eq!(Running.transition(Error).unwrap(), Error);
        assert_eq!(Ready.transition(Running).unwrap(), Running);
        assert_eq!(Error.transition(None).unwrap(), None);

        assert!(None.transition(Ready).is_err());
        assert!(Ready.transition(None).is_err());
        assert!(Error.transition(Running).is_err());
        assert!(Ready.transition(Error).is_err());
    }

    #[test]
    fn test_invalidate_secondary_keeps_genotype() {
        let mut metadata = SampleMetadata::new(1, "child");
        metadata.genotype_index.insert(1, TaskStatus::Ready);
        metadata.annotation_index.insert(1, TaskStatus::Ready);
        metadata.family_index.insert(1, TaskStatus::Ready);

        metadata.invalidate_secondary(2);

        assert_eq!(metadata.status(IndexKind::Genotype, 1), TaskStatus::Ready);
        assert_eq!(metadata.status(IndexKind::Annotation, 1), TaskStatus::None);
        assert_eq!(metadata.status(IndexKind::Family, 1), TaskStatus::None);
        assert_eq!(metadata.status(IndexKind::Family, 2), TaskStatus::None);
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let store = MemoryMetadataStore::new();
        let a = store.register_sample("s", "NA12878").await.unwrap();
        let b = store.register_sample("s", "NA12891").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.register_sample("s", "NA12878").await.unwrap(), a);
        assert_eq!(store.sample_id("s", "NA12891").await.unwrap(), Some(b));
        assert_eq!(store.sample_name("s", a).await.unwrap(), "NA12878");
        assert!(store.sample("s", 99).await.is_err());
    }

    #[tokio::test]
    async fn test_failed_update_leaves_record_unchanged() {
        let store = MemoryMetadataStore::new();
        let id = store.register_sample("s", "x").await.unwrap();

        // NONE -> READY is not a legal transition
        let result = store
            .set_index_status("s", id, IndexKind::Genotype, 1, TaskStatus::Ready)
            .await;
        assert!(matches!(result, Err(IndexError::InvalidTransition { .. })));
        assert_eq!(
            store.sample("s", id).await.unwrap().status(IndexKind::Genotype, 1),
            TaskStatus::None
        );
    }

    #[tokio::test]
    async fn test_trios_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.json");

        let store = MemoryMetadataStore::new();
        let child = store.register_sample("s", "child").await.unwrap();
        let mother = store.register_sample("s", "mother").await.unwrap();
        store
            .register_trio("s", Trio::new(child, None, Some(mother)))
            .await
            .unwrap();
        store
            .set_index_status("s", child, IndexKind::Genotype, 1, TaskStatus::Running)
            .await
            .unwrap();
        store.save(&path).await.unwrap();

        let loaded = MemoryMetadataStore::load(&path).await.unwrap();
        assert_eq!(loaded.trios("s").await.unwrap(), vec![Trio::new(child, None, Some(mother))]);
        assert_eq!(
            loaded.sample("s", child).await.unwrap().status(IndexKind::Genotype, 1),
            TaskStatus::Running
        );
    }

    #[tokio::test]
    async fn test_invalidate_all_samples() {
        let store = MemoryMetadataStore::new();
        let id = store.register_sample("s", "x").await.unwrap();
        for kind in [IndexKind::Genotype, IndexKind::Family] {
            store.set_index_status("s", id, kind, 1, TaskStatus::Running).await.unwrap();
            store.set_index_status("s", id, kind, 1, TaskStatus::Ready).await.unwrap();
        }
        assert_eq!(store.invalidate_secondary_indexes("s", 2).await.unwrap(), 1);

        let metadata = store.sample("s", id).await.unwrap();
        assert_eq!(metadata.status(IndexKind::Genotype, 1), TaskStatus::Ready);
        assert_eq!(metadata.status(IndexKind::Family, 1), TaskStatus::None);
    }

    #[tokio::test]
    async fn test_file_status() {
        let store = MemoryMetadataStore::new();
        assert_eq!(store.file_status("s", "a.vcf").await.unwrap(), TaskStatus::None);
        store.set_file_status("s", "a.vcf", TaskStatus::Running).await.unwrap();
        store.set_file_status("s", "a.vcf", TaskStatus::Ready).await.unwrap();
        assert_eq!(store.file_status("s", "a.vcf").await.unwrap(), TaskStatus::Ready);
        assert!(store.set_file_status("s", "a.vcf", TaskStatus::Error).await.is_err());
    }
}
