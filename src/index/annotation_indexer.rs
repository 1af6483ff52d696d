// ==============================================================================
// index/annotation_indexer.rs - Sample Annotation Indexer
// ==============================================================================
// Description: Second pass condensing variant annotations into existing entries
// Author: Matt Barham
// Created: 2026-10-19
// Modified: 2026-10-19
// Version: 0.1.0
// ==============================================================================
// Per region touched by the genotype index:
//   1. Load every sample's entries in the region
//   2. Stream the region's annotations (annotation-only projection)
//   3. OR each variant's encoded annotation into every matching entry
//   4. Write all touched entries once, after the stream completes
// A stream error discards the region's in-memory changes.
// ==============================================================================

use futures::StreamExt;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::codec::encode_position_key;
use super::entry::{ChunkKey, SampleIndexEntry};
use super::store::SampleIndexStore;
use crate::error::Result;
use crate::metadata::{IndexKind, MetadataStore, TaskStatus};
use crate::models::{Region, SampleId};
use crate::schema::layout;
use crate::schema::SampleIndexSchema;
use crate::source::{VariantQuery, VariantSource};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationIndexReport {
    pub regions: usize,
    pub variants_read: u64,
    pub variants_annotated: u64,
    pub entries_written: usize,
}

/// Where a position key sits inside the loaded entries
#[derive(Debug, Clone)]
struct Slot {
    entry: ChunkKey,
    gt: String,
    index: usize,
}

pub struct SampleAnnotationIndexer {
    store: Arc<dyn SampleIndexStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl SampleAnnotationIndexer {
    pub fn new(store: Arc<dyn SampleIndexStore>, metadata: Arc<dyn MetadataStore>) -> Self {
        Self { store, metadata }
    }

    /// Annotate the existing entries of `samples`
    ///
    /// # Returns
    /// * `Ok(AnnotationIndexReport)` - Regions processed and entries rewritten
    /// * `Err(IndexError::NotSupported)` - Store cannot report region bounds;
    ///   sample statuses are left untouched
    pub async fn run(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        samples: &[SampleId],
        source: &dyn VariantSource,
    ) -> Result<AnnotationIndexReport> {
        let version = schema.version();
        if !schema.annotation_index_enabled() {
            info!("Annotation index disabled in schema v{}, nothing to do", version);
            return Ok(AnnotationIndexReport::default());
        }

        let regions = match self.store.region_bounds(study, schema, samples).await {
            Ok(regions) => regions,
            Err(e) => {
                if e.is_not_supported() {
                    warn!("Annotation index not built for study {}: {}", study, e);
                }
                return Err(e);
            }
        };

        self.metadata
            .begin_index_run(study, samples, IndexKind::Annotation, version)
            .await?;

        let mut report = AnnotationIndexReport::default();
        for region in &regions {
            if let Err(e) = self.index_region(study, schema, samples, region, source, &mut report).await {
                error!("Annotation index failed in region {}: {}", region, e);
                for sample in samples {
                    if let Err(status_err) = self
                        .metadata
                        .set_index_status(study, *sample, IndexKind::Annotation, version, TaskStatus::Error)
                        .await
                    {
                        error!("Failed to mark sample {} as ERROR: {}", sample, status_err);
                    }
                }
                return Err(e);
            }
        }

        for sample in samples {
            self.metadata
                .set_index_status(study, *sample, IndexKind::Annotation, version, TaskStatus::Ready)
                .await?;
        }
        info!(
            "Annotation index complete for {} samples: {} regions, {} variants annotated, {} entries",
            samples.len(),
            report.regions,
            report.variants_annotated,
            report.entries_written
        );
        Ok(report)
    }

    /// Annotate one region; nothing is written unless the whole stream succeeds
    pub async fn index_region(
        &self,
        study: &str,
        schema: &SampleIndexSchema,
        samples: &[SampleId],
        region: &Region,
        source: &dyn VariantSource,
        report: &mut AnnotationIndexReport,
    ) -> Result<()> {
        let mut entries: BTreeMap<ChunkKey, SampleIndexEntry> = BTreeMap::new();
        for sample in samples {
            for entry in self.store.scan(study, schema, *sample, Some(region)).await? {
                entries.insert(entry.key(), entry);
            }
        }
        if entries.is_empty() {
            debug!("No entries in region {}, skipping", region);
            return Ok(());
        }

        // (chunk start, position key) -> every (entry, gt, index) holding it
        let mut lookup: HashMap<(u64, Vec<u8>), Vec<Slot>> = HashMap::new();
        for (key, entry) in &entries {
            for (gt, gt_entry) in &entry.gts {
                for (index, variant) in gt_entry.variants.iter().enumerate() {
                    lookup
                        .entry((entry.chunk_start, variant.position_key.clone()))
                        .or_default()
                        .push(Slot {
                            entry: key.clone(),
                            gt: gt.clone(),
                            index,
                        });
                }
            }
        }

        let query = VariantQuery::new(study)
            .samples(samples)
            .region(region.clone())
            .annotation_only();
        let mut stream = source.query(&query)?;
        let mut touched: BTreeSet<ChunkKey> = BTreeSet::new();
        let mut variants_read = 0u64;
        let mut variants_annotated = 0u64;

        while let Some(item) = stream.next().await {
            // An error drops `entries` unwritten
            let annotated = item?;
            variants_read += 1;
            let Some(annotation) = &annotated.annotation else {
                continue;
            };
            let chunk_start = schema.chunk_start(annotated.variant.start);
            let position_key = encode_position_key(&annotated.variant, chunk_start)?;
            let Some(slots) = lookup.get(&(chunk_start, position_key)) else {
                continue;
            };

            let bits = schema.annotation_bits(annotation);
            for slot in slots {
                if let Some(variant) = entries
                    .get_mut(&slot.entry)
                    .and_then(|e| e.gts.get_mut(&slot.gt))
                    .and_then(|g| g.variants.get_mut(slot.index))
                {
                    variant.annotation_bits = layout::merge(variant.annotation_bits, bits);
                    touched.insert(slot.entry.clone());
                }
            }
            variants_annotated += 1;
        }

        let mut updated = Vec::with_capacity(touched.len());
        for key in touched {
            if let Some(mut entry) = entries.remove(&key) {
                for gt_entry in entry.gts.values_mut() {
                    gt_entry.recompute_annotation();
                }
                updated.push(entry);
            }
        }

        let written = updated.len();
        if written > 0 {
            self.store.write_entries(study, schema, updated).await?;
        }
        debug!(
            "Region {}: {} variants read, {} annotated, {} entries written",
            region, variants_read, variants_annotated, written
        );

        report.regions += 1;
        report.variants_read += variants_read;
        report.variants_annotated += variants_annotated;
        report.entries_written += written;
        Ok(())
    }
}
