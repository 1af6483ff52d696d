// ==============================================================================
// index/family_indexer.rs - Sample Family Indexer
// ==============================================================================
// Description: Fills parent codes and Mendelian error flags into child entries
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Trios run concurrently; each child entry is only written by its own trio,
// parent entries are read-only here.
// ==============================================================================

use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::entry::SampleIndexEntry;
use super::mendelian::{classify, parents_code, MendelianClass, ParentCall};
use super::store::SampleIndexStore;
use crate::error::{IndexError, Result};
use crate::metadata::{IndexKind, MetadataStore, TaskStatus};
use crate::models::{SampleId, Trio};
use crate::schema::SampleIndexSchema;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrioReport {
    pub child: SampleId,
    pub entries_written: usize,
    pub variants_checked: u64,
    pub mendelian_errors: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FamilyIndexReport {
    pub trios: Vec<TrioReport>,
}

impl FamilyIndexReport {
    pub fn mendelian_errors(&self) -> u64 {
        self.trios.iter().map(|t| t.mendelian_errors).sum()
    }

    pub fn entries_written(&self) -> usize {
        self.trios.iter().map(|t| t.entries_written).sum()
    }
}

pub struct SampleFamilyIndexer {
    store: Arc<dyn SampleIndexStore>,
    metadata: Arc<dyn MetadataStore>,
    parallelism: usize,
}

impl SampleFamilyIndexer {
    pub fn new(
        store: Arc<dyn SampleIndexStore>,
        metadata: Arc<dyn MetadataStore>,
        parallelism: usize,
    ) -> Self {
        Self {
            store,
            metadata,
            parallelism: parallelism.max(1),
        }
    }

    /// Build the family index of every trio's child
    ///
    /// Every trio is attempted; the first failure is returned after all
    /// trios finished, with the failed children marked ERROR.
    ///
    /// # Returns
    /// * `Ok(FamilyIndexReport)` - Per-trio counts, in completion order
    /// * `Err(IndexError::Schema)` - Family index disabled in this schema version
    /// * `Err(IndexError::InvalidInput)` - Same child listed twice
    pub async fn run(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        trios: &[Trio],
    ) -> Result<FamilyIndexReport> {
        if !schema.family_index_enabled() {
            return Err(IndexError::Schema(format!(
                "Family index disabled in schema version {}",
                schema.version()
            )));
        }
        let mut children = HashSet::with_capacity(trios.len());
        for trio in trios {
            if !children.insert(trio.child) {
                return Err(IndexError::InvalidInput(format!(
                    "Sample {} listed as child of more than one trio",
                    trio.child
                )));
            }
        }

        info!(
            "Family index for {} trios of study {} (schema v{}, parallelism {})",
            trios.len(),
            study,
            schema.version(),
            self.parallelism
        );

        let results: Vec<Result<TrioReport>> = stream::iter(trios.iter())
            .map(|trio| self.run_trio(study, schema, trio))
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        let mut report = FamilyIndexReport::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(trio) => report.trios.push(trio),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        info!(
            "Family index complete: {} trios, {} entries, {} Mendelian errors",
            report.trios.len(),
            report.entries_written(),
            report.mendelian_errors()
        );
        Ok(report)
    }

    async fn run_trio(&self, study: &str, schema: &SampleIndexSchema, trio: &Trio) -> Result<TrioReport> {
        let version = schema.version();
        self.metadata
            .set_index_status(study, trio.child, IndexKind::Family, version, TaskStatus::Running)
            .await?;

        match self.index_trio(study, schema, trio).await {
            Ok(report) => {
                self.metadata
                    .set_index_status(study, trio.child, IndexKind::Family, version, TaskStatus::Ready)
                    .await?;
                debug!(
                    "Trio of child {}: {} variants, {} errors",
                    trio.child, report.variants_checked, report.mendelian_errors
                );
                Ok(report)
            }
            Err(e) => {
                error!("Family index failed for child {}: {}", trio.child, e);
                if let Err(status_err) = self
                    .metadata
                    .set_index_status(study, trio.child, IndexKind::Family, version, TaskStatus::Error)
                    .await
                {
                    error!("Failed to mark sample {} as ERROR: {}", trio.child, status_err);
                }
                Err(e)
            }
        }
    }

    async fn index_trio(&self, study: &str, schema: &SampleIndexSchema, trio: &Trio) -> Result<TrioReport> {
        let mut report = TrioReport {
            child: trio.child,
            ..Default::default()
        };

        let entries = self.store.scan(study, schema, trio.child, None).await?;
        if entries.is_empty() {
            warn!("Child {} has no genotype index entries", trio.child);
        }

        let mut updated = Vec::with_capacity(entries.len());
        for mut entry in entries {
            let key = entry.key();
            let father = match trio.father {
                Some(father) => Some(self.store.read_entry(study, schema, &key.with_sample(father)).await?),
                None => None,
            };
            let mother = match trio.mother {
                Some(mother) => Some(self.store.read_entry(study, schema, &key.with_sample(mother)).await?),
                None => None,
            };

            let (checked, errors) = annotate_entry(&mut entry, father.as_ref(), mother.as_ref());
            report.variants_checked += checked;
            report.mendelian_errors += errors;
            updated.push(entry);
        }

        report.entries_written = updated.len();
        if !updated.is_empty() {
            self.store.write_entries(study, schema, updated).await?;
        }
        Ok(report)
    }
}

/// Genotype lookup of one parent for a chunk
enum ParentEntry<'a> {
    Absent,
    Lookup(HashMap<&'a [u8], &'a str>),
}

impl<'a> ParentEntry<'a> {
    /// `None` is a parent outside the family, `Some(None)` a parent with no entry
    fn new(entry: Option<&'a Option<SampleIndexEntry>>) -> Self {
        match entry {
            None => ParentEntry::Absent,
            Some(Some(entry)) => ParentEntry::Lookup(entry.genotype_lookup()),
            Some(None) => ParentEntry::Lookup(HashMap::new()),
        }
    }

    fn call(&self, key: &[u8]) -> ParentCall<'a> {
        match self {
            ParentEntry::Absent => ParentCall::Absent,
            ParentEntry::Lookup(lookup) => match lookup.get(key) {
                Some(gt) => ParentCall::Called(*gt),
                None => ParentCall::NoData,
            },
        }
    }
}

/// Fill family fields of one child entry, returning (variants, errors)
fn annotate_entry(
    entry: &mut SampleIndexEntry,
    father: Option<&Option<SampleIndexEntry>>,
    mother: Option<&Option<SampleIndexEntry>>,
) -> (u64, u64) {
    let father = ParentEntry::new(father);
    let mother = ParentEntry::new(mother);
    let mut checked = 0u64;
    let mut errors = 0u64;

    for (gt, gt_entry) in entry.gts.iter_mut() {
        let mut codes = Vec::with_capacity(gt_entry.variants.len());
        let mut flags = Vec::new();
        for (index, variant) in gt_entry.variants.iter().enumerate() {
            let f = father.call(&variant.position_key);
            let m = mother.call(&variant.position_key);
            codes.push(parents_code(f, m));
            if classify(gt, f, m) == MendelianClass::Error {
                flags.push(index as u32);
            }
        }
        checked += codes.len() as u64;
        errors += flags.len() as u64;
        gt_entry.parents_codes = codes;
        gt_entry.mendelian_flags = flags;
    }

    entry.discrepancies = errors as u32;
    (checked, errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::entry::ChunkKey;
    use crate::index::genotype_indexer::{GenotypeIndexOptions, SampleGenotypeIndexer};
    use crate::index::mendelian::{decode_father, decode_mother, GenotypeCode};
    use crate::index::store::MemorySampleIndexStore;
    use crate::metadata::MemoryMetadataStore;
    use crate::models::{AnnotatedVariant, Variant};
    use crate::schema::SampleIndexConfiguration;
    use crate::source::MemoryVariantSource;

    fn schema() -> SampleIndexSchema {
        SampleIndexSchema::new(1, SampleIndexConfiguration::default()).unwrap()
    }

    struct Family {
        store: Arc<MemorySampleIndexStore>,
        metadata: Arc<MemoryMetadataStore>,
        child: SampleId,
        father: SampleId,
        mother: SampleId,
    }

    async fn family(calls: Vec<(u64, &str, Option<&str>, Option<&str>)>) -> Family {
        let store = Arc::new(MemorySampleIndexStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let child = metadata.register_sample("study", "child").await.unwrap();
        let father = metadata.register_sample("study", "father").await.unwrap();
        let mother = metadata.register_sample("study", "mother").await.unwrap();

        let variants = calls
            .into_iter()
            .map(|(pos, c, f, m)| {
                let mut v = AnnotatedVariant::new(Variant::new("1", pos, "A", "G")).with_genotype(child, c);
                if let Some(f) = f {
                    v = v.with_genotype(father, f);
                }
                if let Some(m) = m {
                    v = v.with_genotype(mother, m);
                }
                v
            })
            .collect();
        SampleGenotypeIndexer::new(store.clone(), metadata.clone(), GenotypeIndexOptions::default())
            .run("study", &schema(), &[child, father, mother], &MemoryVariantSource::new(variants))
            .await
            .unwrap();

        Family {
            store,
            metadata,
            child,
            father,
            mother,
        }
    }

    #[tokio::test]
    async fn test_trio_flags_mendelian_errors() {
        let f = family(vec![
            (100, "1/1", Some("0/0"), Some("0/0")),
            (200, "0/1", Some("0/1"), Some("0/0")),
            (300, "0/1", None, Some("0/0")),
        ])
        .await;
        let indexer = SampleFamilyIndexer::new(f.store.clone(), f.metadata.clone(), 2);
        let report = indexer
            .run("study", &schema(), &[Trio::new(f.child, Some(f.father), Some(f.mother))])
            .await
            .unwrap();
        assert_eq!(report.mendelian_errors(), 1);
        assert_eq!(report.trios[0].variants_checked, 3);

        let entry = f
            .store
            .read_entry("study", &schema(), &ChunkKey::new(f.child, "1", 0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.discrepancies, 1);
        assert_eq!(entry.gts["1/1"].mendelian_flags, vec![0]);
        assert!(entry.gts["0/1"].mendelian_flags.is_empty());

        // Father has no call at 300: no data, not homozygous reference
        let codes = &entry.gts["0/1"].parents_codes;
        assert_eq!(decode_father(codes[0]), GenotypeCode::HET_REF);
        assert_eq!(decode_father(codes[1]), GenotypeCode::NO_DATA);
        assert_eq!(decode_mother(codes[1]), GenotypeCode::HOM_REF);

        let child = f.metadata.sample("study", f.child).await.unwrap();
        assert_eq!(child.status(IndexKind::Family, 1), TaskStatus::Ready);
        // Parents are not touched by the family pass
        let father = f.metadata.sample("study", f.father).await.unwrap();
        assert_eq!(father.status(IndexKind::Family, 1), TaskStatus::None);
    }

    #[tokio::test]
    async fn test_single_parent_family() {
        let f = family(vec![
            (100, "0/1", None, Some("0/0")),
            (200, "1/1", None, Some("0/0")),
        ])
        .await;
        let indexer = SampleFamilyIndexer::new(f.store.clone(), f.metadata.clone(), 1);
        let report = indexer
            .run("study", &schema(), &[Trio::new(f.child, None, Some(f.mother))])
            .await
            .unwrap();
        assert_eq!(report.mendelian_errors(), 1);

        let entry = f
            .store
            .read_entry("study", &schema(), &ChunkKey::new(f.child, "1", 0))
            .await
            .unwrap()
            .unwrap();
        let het = &entry.gts["0/1"];
        assert!(het.mendelian_flags.is_empty());
        assert_eq!(decode_father(het.parents_codes[0]), GenotypeCode::ABSENT);
        assert_eq!(decode_mother(het.parents_codes[0]), GenotypeCode::HOM_REF);
        assert_eq!(entry.gts["1/1"].mendelian_flags, vec![0]);
    }

    #[tokio::test]
    async fn test_parent_without_entries_is_no_data() {
        let f = family(vec![(100, "1/1", None, Some("0/0"))]).await;
        let indexer = SampleFamilyIndexer::new(f.store.clone(), f.metadata.clone(), 1);
        let report = indexer
            .run("study", &schema(), &[Trio::new(f.child, Some(f.father), Some(f.mother))])
            .await
            .unwrap();
        assert_eq!(report.mendelian_errors(), 0);
    }

    #[tokio::test]
    async fn test_rejects_disabled_and_duplicate_child() {
        let f = family(vec![(100, "0/1", Some("0/1"), Some("0/0"))]).await;
        let indexer = SampleFamilyIndexer::new(f.store.clone(), f.metadata.clone(), 4);
        let trio = Trio::new(f.child, Some(f.father), Some(f.mother));

        let err = indexer
            .run("study", &schema(), &[trio, trio])
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::InvalidInput(_)));

        let mut config = SampleIndexConfiguration::default();
        config.family_index_enabled = false;
        let disabled = SampleIndexSchema::new(1, config).unwrap();
        let err = indexer.run("study", &disabled, &[trio]).await.unwrap_err();
        assert!(matches!(err, IndexError::Schema(_)));
    }

    #[tokio::test]
    async fn test_many_trios_concurrently() {
        let store = Arc::new(MemorySampleIndexStore::new());
        let metadata = Arc::new(MemoryMetadataStore::new());
        let father = metadata.register_sample("study", "father").await.unwrap();
        let mother = metadata.register_sample("study", "mother").await.unwrap();
        let mut children = Vec::new();
        let mut variant = AnnotatedVariant::new(Variant::new("1", 10, "C", "T"))
            .with_genotype(father, "0/1")
            .with_genotype(mother, "0/0");
        for i in 0..8 {
            let child = metadata.register_sample("study", &format!("child{}", i)).await.unwrap();
            let gt = if i % 2 == 0 { "0/1" } else { "1/1" };
            variant = variant.with_genotype(child, gt);
            children.push(child);
        }
        let mut samples = children.clone();
        samples.extend([father, mother]);
        SampleGenotypeIndexer::new(store.clone(), metadata.clone(), GenotypeIndexOptions::default())
            .run("study", &schema(), &samples, &MemoryVariantSource::new(vec![variant]))
            .await
            .unwrap();

        let trios: Vec<Trio> = children
            .iter()
            .map(|c| Trio::new(*c, Some(father), Some(mother)))
            .collect();
        let report = SampleFamilyIndexer::new(store.clone(), metadata.clone(), 3)
            .run("study", &schema(), &trios)
            .await
            .unwrap();
        assert_eq!(report.trios.len(), 8);
        assert_eq!(report.mendelian_errors(), 4);
        for child in &children {
            assert_eq!(
                metadata.sample("study", *child).await.unwrap().status(IndexKind::Family, 1),
                TaskStatus::Ready
            );
        }
    }
}
